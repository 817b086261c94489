// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Turn a dissected flow match into rule keys.
//!
//! There is one handler per match category. A handler either encodes
//! its category completely and marks it consumed, or fails with the
//! parse error of that category. A category nobody consumed is one the
//! hardware cannot match on, and the request is refused.

use crate::api::ArpKey;
use crate::api::BasicKey;
use crate::api::ControlFlags;
use crate::api::ControlKey;
use crate::api::DissectorKeys;
use crate::api::ETH_P_8021AD;
use crate::api::ETH_P_8021Q;
use crate::api::ETH_P_ALL;
use crate::api::ETH_P_ARP;
use crate::api::ETH_P_IP;
use crate::api::ETH_P_IPV6;
use crate::api::EthKey;
use crate::api::FlowMatch;
use crate::api::IPPROTO_TCP;
use crate::api::IPPROTO_UDP;
use crate::api::IpKey;
use crate::api::Ipv4Key;
use crate::api::Ipv6Key;
use crate::api::Masked;
use crate::api::PortsKey;
use crate::api::TcpFlags;
use crate::api::TcpKey;
use crate::api::VcapType;
use crate::api::VlanKey;
use crate::vcap::VcapError;
use crate::vcap::model::KeyField;
use crate::vcap::rule::Rule;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("ip_frag parse error")]
    IpFrag,
    #[error("ip_proto parse error")]
    IpProto,
    #[error("ipv4_addr parse error")]
    Ipv4Addr,
    #[error("ipv6_addr parse error")]
    Ipv6Addr,
    #[error("port parse error")]
    Port,
    #[error("eth_addr parse error")]
    EthAddr,
    #[error("arp parse error")]
    Arp,
    #[error("vlan parse error")]
    Vlan,
    #[error("tcp_flags parse error")]
    TcpFlags,
    #[error("ip_tos parse error")]
    IpTos,
    #[error("cvlan parse error")]
    Cvlan,
}

/// How the basic key encodes an IPv6 ethertype.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BasicKeyMode {
    /// `IP4_IS` is cleared for IPv6.
    #[default]
    Normal,
    /// The chain is pinned to an IPv6 keyset; the ethertype adds no
    /// key at all.
    NormalIp6,
}

/// The protocol context dissection leaves behind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Dissected {
    pub l3_proto: u16,
    pub l4_proto: u8,
}

struct State<'a> {
    rule: &'a mut Rule,
    vtype: VcapType,
    mode: BasicKeyMode,
    l3_proto: u16,
    l4_proto: u8,
    consumed: DissectorKeys,
}

/// Add the keys of `fm` to `rule`. `protocol` is the L3 protocol the
/// filter was installed for; a basic key overrides it.
pub fn dissect(
    rule: &mut Rule,
    fm: &FlowMatch,
    protocol: u16,
    mode: BasicKeyMode,
) -> Result<Dissected, VcapError> {
    let vtype = rule.vtype();
    let mut st = State {
        rule,
        vtype,
        mode,
        l3_proto: protocol,
        l4_proto: 0,
        consumed: DissectorKeys::empty(),
    };

    if let Some(k) = &fm.control {
        control(&mut st, k)?;
    }
    if let Some(k) = &fm.basic {
        basic(&mut st, k)?;
    }
    if let Some(k) = &fm.ipv4 {
        ipv4(&mut st, k)?;
    }
    if let Some(k) = &fm.ipv6 {
        ipv6(&mut st, k)?;
    }
    if let Some(k) = &fm.ports {
        ports(&mut st, k)?;
    }
    if let Some(k) = &fm.eth {
        eth(&mut st, k)?;
    }
    if let Some(k) = &fm.arp {
        arp(&mut st, k)?;
    }
    if let Some(k) = &fm.vlan {
        vlan(&mut st, k)?;
    }
    if let Some(k) = &fm.cvlan {
        cvlan(&mut st, k)?;
    }
    if let Some(k) = &fm.tcp {
        tcp(&mut st, k)?;
    }
    if let Some(k) = &fm.ip {
        ip(&mut st, k)?;
    }

    if !st.consumed.contains(fm.present()) {
        return Err(VcapError::UnsupportedKey);
    }

    Ok(Dissected { l3_proto: st.l3_proto, l4_proto: st.l4_proto })
}

fn control(st: &mut State, key: &ControlKey) -> Result<(), VcapError> {
    let Masked { value, mask } = key.flags;
    if mask.contains(ControlFlags::ENCAPSULATION) {
        return Err(ParseError::IpFrag.into());
    }

    let is_frag = value.contains(ControlFlags::IS_FRAGMENT);
    let is_first = value.contains(ControlFlags::FIRST_FRAG);

    // L3_FRAGMENT_TYPE: 0 = none, 1 = initial, 3 = follow-up.
    let frag = match (
        mask.contains(ControlFlags::IS_FRAGMENT),
        mask.contains(ControlFlags::FIRST_FRAG),
    ) {
        (true, true) => match (is_frag, is_first) {
            (true, true) => Some((1, 3)),
            (true, false) => Some((3, 3)),
            (false, false) => Some((0, 3)),
            (false, true) => return Err(ParseError::IpFrag.into()),
        },
        (true, false) if is_frag => Some((1, 1)),
        (true, false) => Some((0, 3)),
        (false, true) if is_first => Some((1, 3)),
        (false, true) => return Err(ParseError::IpFrag.into()),
        (false, false) => None,
    };

    if let Some((v, m)) = frag {
        st.rule.add_key_u32(KeyField::L3FragmentType, v, m)?;
    }

    st.consumed |= DissectorKeys::CONTROL;
    Ok(())
}

fn basic(st: &mut State, key: &BasicKey) -> Result<(), VcapError> {
    if let Some(np) = key.n_proto.filter(|np| np.mask != 0) {
        match np.value {
            ETH_P_ALL => (),
            ETH_P_IP => st.rule.add_key_bit(KeyField::Ip4Is, true)?,
            ETH_P_IPV6 => {
                if st.mode == BasicKeyMode::Normal {
                    st.rule.add_key_bit(KeyField::Ip4Is, false)?;
                }
            }
            ETH_P_ARP => (),
            proto => {
                if st.vtype == VcapType::Is1 {
                    st.rule.add_key_bit(KeyField::EtypeLen, true)?;
                }
                st.rule.add_key_u32(
                    KeyField::Etype,
                    proto as u32,
                    np.mask as u32,
                )?;
            }
        }
        if np.value != ETH_P_ALL {
            st.l3_proto = np.value;
        }
    }

    if let Some(ip) = key.ip_proto.filter(|ip| ip.mask != 0) {
        if ip.mask != 0xff {
            return Err(ParseError::IpProto.into());
        }

        st.l4_proto = ip.value;
        match ip.value {
            IPPROTO_TCP => {
                st.rule.add_key_bit(KeyField::TcpUdpIs, true)?;
                st.rule.add_key_bit(KeyField::TcpIs, true)?;
            }
            IPPROTO_UDP => {
                st.rule.add_key_bit(KeyField::TcpUdpIs, true)?;
                st.rule.add_key_bit(KeyField::TcpIs, false)?;
            }
            proto => {
                st.rule.add_key_bit(KeyField::TcpUdpIs, false)?;
                st.rule.add_key_u32(KeyField::L3IpProto, proto as u32, 0xff)?;
            }
        }
    }

    st.consumed |= DissectorKeys::BASIC;
    Ok(())
}

fn ipv4(st: &mut State, key: &Ipv4Key) -> Result<(), VcapError> {
    if st.l3_proto != ETH_P_IP {
        return Err(ParseError::Ipv4Addr.into());
    }

    if let Some(src) = key.src {
        st.rule.add_key_u32(
            KeyField::L3Ip4Sip,
            u32::from(src.value),
            u32::from(src.mask),
        )?;
    }
    if let Some(dst) = key.dst {
        st.rule.add_key_u32(
            KeyField::L3Ip4Dip,
            u32::from(dst.value),
            u32::from(dst.mask),
        )?;
    }

    st.consumed |= DissectorKeys::IPV4_ADDRS;
    Ok(())
}

fn ipv6(st: &mut State, key: &Ipv6Key) -> Result<(), VcapError> {
    if st.l3_proto != ETH_P_IPV6 {
        return Err(ParseError::Ipv6Addr.into());
    }

    if let Some(src) = key.src {
        st.rule.add_key_u128(
            KeyField::L3Ip6Sip,
            src.value.octets(),
            src.mask.octets(),
        )?;
    }
    if let Some(dst) = key.dst {
        st.rule.add_key_u128(
            KeyField::L3Ip6Dip,
            dst.value.octets(),
            dst.mask.octets(),
        )?;
    }

    st.consumed |= DissectorKeys::IPV6_ADDRS;
    Ok(())
}

fn ports(st: &mut State, key: &PortsKey) -> Result<(), VcapError> {
    if st.l4_proto != IPPROTO_TCP && st.l4_proto != IPPROTO_UDP {
        return Err(ParseError::Port.into());
    }

    if let Some(src) = key.src {
        st.rule.add_key_u32(
            KeyField::L4Sport,
            src.value as u32,
            src.mask as u32,
        )?;
    }
    if let Some(dst) = key.dst {
        st.rule.add_key_u32(
            KeyField::L4Dport,
            dst.value as u32,
            dst.mask as u32,
        )?;
    }

    st.consumed |= DissectorKeys::PORTS;
    Ok(())
}

fn eth(st: &mut State, key: &EthKey) -> Result<(), VcapError> {
    if key.src.is_none() && key.dst.is_none() {
        return Err(ParseError::EthAddr.into());
    }

    if let Some(dst) = key.dst {
        st.rule.add_key_u48(
            KeyField::L2Dmac,
            dst.value.bytes(),
            dst.mask.bytes(),
        )?;
    }
    if let Some(src) = key.src {
        st.rule.add_key_u48(
            KeyField::L2Smac,
            src.value.bytes(),
            src.mask.bytes(),
        )?;
    }

    st.consumed |= DissectorKeys::ETH_ADDRS;
    Ok(())
}

fn arp(st: &mut State, key: &ArpKey) -> Result<(), VcapError> {
    // Sender and target hardware addresses have no key.
    let hw = [key.sha, key.tha];
    if hw.iter().flatten().any(|m| !m.mask.is_zero()) {
        return Err(ParseError::Arp.into());
    }

    if let Some(op) = key.op.filter(|op| op.mask != 0) {
        let code = match op.value {
            crate::api::ARPOP_REQUEST => 0,
            crate::api::ARPOP_REPLY => 1,
            _ => return Err(ParseError::Arp.into()),
        };
        st.rule.add_key_u32(KeyField::ArpOpcode, code, 0x3)?;
    }

    if let Some(sip) = key.sip {
        st.rule.add_key_u32(
            KeyField::L3Ip4Sip,
            u32::from(sip.value),
            u32::from(sip.mask),
        )?;
    }
    if let Some(tip) = key.tip {
        st.rule.add_key_u32(
            KeyField::L3Ip4Dip,
            u32::from(tip.value),
            u32::from(tip.mask),
        )?;
    }

    st.consumed |= DissectorKeys::ARP;
    Ok(())
}

fn vlan(st: &mut State, key: &VlanKey) -> Result<(), VcapError> {
    let (vid_f, pcp_f) = match st.vtype {
        VcapType::Is1 => (KeyField::Vid0, KeyField::Pcp0),
        VcapType::Is2 | VcapType::Es0 => (KeyField::VidCls, KeyField::PcpCls),
    };

    if let Some(vid) = key.vid {
        if vid.value > 4095 {
            return Err(ParseError::Vlan.into());
        }
        st.rule.add_key_u32(vid_f, vid.value as u32, vid.mask as u32 & 0xfff)?;
    }
    if let Some(pcp) = key.prio {
        st.rule.add_key_u32(pcp_f, pcp.value as u32, pcp.mask as u32 & 0x7)?;
    }

    if let Some(tpid) = key.tpid {
        if st.vtype != VcapType::Is1 {
            return Err(ParseError::Vlan.into());
        }
        let sel = match tpid {
            ETH_P_8021Q => 1,
            ETH_P_8021AD => 2,
            _ => return Err(ParseError::Vlan.into()),
        };
        st.rule.add_key_u32(KeyField::Tpid0, sel, 0x7)?;
    }

    st.rule.add_key_bit(KeyField::VlanTagged, true)?;
    st.consumed |= DissectorKeys::VLAN;
    Ok(())
}

fn cvlan(st: &mut State, key: &VlanKey) -> Result<(), VcapError> {
    if st.vtype != VcapType::Is1 {
        return Err(ParseError::Cvlan.into());
    }

    match key.tpid {
        None | Some(ETH_P_8021Q) | Some(ETH_P_8021AD) => (),
        Some(_) => return Err(ParseError::Cvlan.into()),
    }

    if let Some(vid) = key.vid {
        if vid.value > 4095 {
            return Err(ParseError::Cvlan.into());
        }
        st.rule.add_key_u32(
            KeyField::Vid1,
            vid.value as u32,
            vid.mask as u32 & 0xfff,
        )?;
    }
    if let Some(pcp) = key.prio {
        st.rule.add_key_u32(
            KeyField::Pcp1,
            pcp.value as u32,
            pcp.mask as u32 & 0x7,
        )?;
    }

    st.consumed |= DissectorKeys::CVLAN;
    Ok(())
}

const TCP_FLAG_KEYS: [(TcpFlags, KeyField); 6] = [
    (TcpFlags::FIN, KeyField::L4Fin),
    (TcpFlags::SYN, KeyField::L4Syn),
    (TcpFlags::RST, KeyField::L4Rst),
    (TcpFlags::PSH, KeyField::L4Psh),
    (TcpFlags::ACK, KeyField::L4Ack),
    (TcpFlags::URG, KeyField::L4Urg),
];

fn tcp(st: &mut State, key: &TcpKey) -> Result<(), VcapError> {
    let Masked { value, mask } = key.flags;
    let supported =
        TCP_FLAG_KEYS.iter().fold(TcpFlags::empty(), |acc, f| acc | f.0);
    if !supported.contains(mask) {
        return Err(ParseError::TcpFlags.into());
    }

    for (flag, field) in TCP_FLAG_KEYS {
        if mask.contains(flag) {
            st.rule.add_key_bit(field, value.contains(flag))?;
        }
    }

    st.consumed |= DissectorKeys::TCP;
    Ok(())
}

fn ip(st: &mut State, key: &IpKey) -> Result<(), VcapError> {
    if key.ttl.is_some_and(|ttl| ttl.mask != 0) {
        return Err(ParseError::IpTos.into());
    }

    if let Some(tos) = key.tos.filter(|tos| tos.mask != 0) {
        match st.vtype {
            VcapType::Is2 => {
                st.rule.add_key_u32(
                    KeyField::L3Tos,
                    tos.value as u32,
                    tos.mask as u32,
                )?;
            }

            VcapType::Is1 | VcapType::Es0 => {
                // Only the DSCP bits have a key.
                if tos.mask & 0x3 != 0 {
                    return Err(ParseError::IpTos.into());
                }
                st.rule.add_key_u32(
                    KeyField::L3Dscp,
                    (tos.value >> 2) as u32,
                    (tos.mask >> 2) as u32,
                )?;
            }
        }
    }

    st.consumed |= DissectorKeys::IP;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::IcmpKey;
    use crate::api::MacAddr;
    use crate::api::VCAP_CID_IS1_L0;
    use crate::api::VCAP_CID_IS2_L0;
    use crate::vcap::rule::KeyValue;
    use crate::vcap::rule::VcapUser;
    use std::net::Ipv4Addr;

    fn rule(chain: u32) -> Rule {
        Rule::new(8, 1, 0, chain, VcapUser::TcFlower, 1, 1).unwrap()
    }

    fn frag(value: ControlFlags, mask: ControlFlags) -> FlowMatch {
        FlowMatch {
            control: Some(ControlKey { flags: Masked::new(value, mask) }),
            ..Default::default()
        }
    }

    fn frag_key(
        value: ControlFlags,
        mask: ControlFlags,
    ) -> Result<Option<KeyValue>, VcapError> {
        let mut r = rule(VCAP_CID_IS2_L0);
        dissect(&mut r, &frag(value, mask), ETH_P_IP, BasicKeyMode::Normal)?;
        Ok(r.key(KeyField::L3FragmentType).copied())
    }

    #[test]
    fn fragment_encoding() {
        let both = ControlFlags::IS_FRAGMENT | ControlFlags::FIRST_FRAG;
        let u32k = |value, mask| Some(KeyValue::U32 { value, mask });

        assert_eq!(frag_key(both, both).unwrap(), u32k(1, 3));
        assert_eq!(
            frag_key(ControlFlags::IS_FRAGMENT, both).unwrap(),
            u32k(3, 3)
        );
        assert_eq!(frag_key(ControlFlags::empty(), both).unwrap(), u32k(0, 3));
        assert_eq!(
            frag_key(ControlFlags::FIRST_FRAG, both),
            Err(VcapError::Parse(ParseError::IpFrag))
        );

        let frag_only = ControlFlags::IS_FRAGMENT;
        assert_eq!(frag_key(frag_only, frag_only).unwrap(), u32k(1, 1));
        assert_eq!(
            frag_key(ControlFlags::empty(), frag_only).unwrap(),
            u32k(0, 3)
        );

        let first_only = ControlFlags::FIRST_FRAG;
        assert_eq!(frag_key(first_only, first_only).unwrap(), u32k(1, 3));
        assert_eq!(
            frag_key(ControlFlags::empty(), first_only),
            Err(VcapError::Parse(ParseError::IpFrag))
        );

        assert_eq!(
            frag_key(ControlFlags::empty(), ControlFlags::ENCAPSULATION),
            Err(VcapError::Parse(ParseError::IpFrag))
        );
    }

    #[test]
    fn ip_proto_needs_full_mask() {
        let mut r = rule(VCAP_CID_IS2_L0);
        let fm = FlowMatch {
            basic: Some(BasicKey {
                n_proto: Some(Masked::new(ETH_P_IP, 0xffff)),
                ip_proto: Some(Masked::new(IPPROTO_TCP, 0x0f)),
            }),
            ..Default::default()
        };
        let err = dissect(&mut r, &fm, ETH_P_IP, BasicKeyMode::Normal);
        assert_eq!(err, Err(VcapError::Parse(ParseError::IpProto)));
        assert_eq!(err.unwrap_err().ext_msg(), "ip_proto parse error");
    }

    #[test]
    fn basic_protocols() {
        let basic = |n_proto, ip_proto: Option<u8>| FlowMatch {
            basic: Some(BasicKey {
                n_proto: Some(Masked::new(n_proto, 0xffff)),
                ip_proto: ip_proto.map(|p| Masked::new(p, 0xff)),
            }),
            ..Default::default()
        };

        let mut r = rule(VCAP_CID_IS2_L0);
        let d = dissect(
            &mut r,
            &basic(ETH_P_IP, Some(IPPROTO_UDP)),
            ETH_P_ALL,
            BasicKeyMode::Normal,
        )
        .unwrap();
        assert_eq!(d, Dissected { l3_proto: ETH_P_IP, l4_proto: IPPROTO_UDP });
        assert_eq!(
            r.key_fields(),
            vec![KeyField::Ip4Is, KeyField::TcpUdpIs, KeyField::TcpIs]
        );
        assert_eq!(
            r.key(KeyField::TcpIs),
            Some(&KeyValue::Bit { value: 0, mask: 1 })
        );

        let mut r = rule(VCAP_CID_IS2_L0);
        let fm = basic(ETH_P_IP, Some(47));
        dissect(&mut r, &fm, ETH_P_IP, Default::default()).unwrap();
        assert_eq!(
            r.key(KeyField::L3IpProto),
            Some(&KeyValue::U32 { value: 47, mask: 0xff })
        );

        let mut r = rule(VCAP_CID_IS1_L0);
        dissect(
            &mut r,
            &basic(ETH_P_IPV6, None),
            ETH_P_IPV6,
            BasicKeyMode::NormalIp6,
        )
        .unwrap();
        assert!(r.keys().is_empty());

        let mut r = rule(VCAP_CID_IS1_L0);
        dissect(&mut r, &basic(0x88f7, None), 0x88f7, Default::default())
            .unwrap();
        assert_eq!(r.key_fields(), vec![KeyField::EtypeLen, KeyField::Etype]);

        let mut r = rule(VCAP_CID_IS2_L0);
        dissect(&mut r, &basic(ETH_P_ARP, None), ETH_P_ARP, Default::default())
            .unwrap();
        assert!(r.keys().is_empty());
    }

    #[test]
    fn addresses_need_context() {
        let fm = FlowMatch {
            ipv4: Some(Ipv4Key {
                src: Some(Masked::new(
                    Ipv4Addr::new(10, 0, 0, 1),
                    Ipv4Addr::BROADCAST,
                )),
                dst: None,
            }),
            ..Default::default()
        };

        let mut r = rule(VCAP_CID_IS2_L0);
        assert_eq!(
            dissect(&mut r, &fm, ETH_P_IPV6, Default::default()),
            Err(VcapError::Parse(ParseError::Ipv4Addr))
        );

        let mut r = rule(VCAP_CID_IS2_L0);
        dissect(&mut r, &fm, ETH_P_IP, Default::default()).unwrap();
        assert_eq!(
            r.key(KeyField::L3Ip4Sip),
            Some(&KeyValue::U32 { value: 0x0a00_0001, mask: u32::MAX })
        );

        let fm = FlowMatch {
            ports: Some(PortsKey {
                src: None,
                dst: Some(Masked::new(22, 0xffff)),
            }),
            ..Default::default()
        };
        let mut r = rule(VCAP_CID_IS2_L0);
        assert_eq!(
            dissect(&mut r, &fm, ETH_P_IP, Default::default()),
            Err(VcapError::Parse(ParseError::Port))
        );
    }

    #[test]
    fn eth_and_arp() {
        let mut r = rule(VCAP_CID_IS2_L0);
        let fm =
            FlowMatch { eth: Some(EthKey::default()), ..Default::default() };
        assert_eq!(
            dissect(&mut r, &fm, ETH_P_ALL, Default::default()),
            Err(VcapError::Parse(ParseError::EthAddr))
        );

        let mac = MacAddr::from([0, 1, 2, 3, 4, 5]);
        let fm = FlowMatch {
            arp: Some(ArpKey {
                op: Some(Masked::new(crate::api::ARPOP_REPLY, 0xff)),
                sha: Some(Masked::new(mac, MacAddr::from([0; 6]))),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut r = rule(VCAP_CID_IS2_L0);
        dissect(&mut r, &fm, ETH_P_ARP, Default::default()).unwrap();
        assert_eq!(
            r.key(KeyField::ArpOpcode),
            Some(&KeyValue::U32 { value: 1, mask: 0x3 })
        );

        let fm = FlowMatch {
            arp: Some(ArpKey {
                tha: Some(Masked::new(mac, MacAddr::from([0xff; 6]))),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut r = rule(VCAP_CID_IS2_L0);
        assert_eq!(
            dissect(&mut r, &fm, ETH_P_ARP, Default::default()),
            Err(VcapError::Parse(ParseError::Arp))
        );

        let fm = FlowMatch {
            arp: Some(ArpKey {
                op: Some(Masked::new(3, 0xff)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut r = rule(VCAP_CID_IS2_L0);
        assert_eq!(
            dissect(&mut r, &fm, ETH_P_ARP, Default::default()),
            Err(VcapError::Parse(ParseError::Arp))
        );
    }

    #[test]
    fn vlan_per_vcap() {
        let tag = |tpid| VlanKey {
            vid: Some(Masked::new(100, 0xfff)),
            prio: Some(Masked::new(3, 0x7)),
            tpid,
        };

        let mut r = rule(VCAP_CID_IS1_L0);
        let fm = FlowMatch {
            vlan: Some(tag(Some(ETH_P_8021AD))),
            ..Default::default()
        };
        dissect(&mut r, &fm, ETH_P_ALL, Default::default()).unwrap();
        assert_eq!(
            r.key_fields(),
            vec![
                KeyField::Vid0,
                KeyField::Pcp0,
                KeyField::Tpid0,
                KeyField::VlanTagged
            ]
        );
        assert_eq!(
            r.key(KeyField::Tpid0),
            Some(&KeyValue::U32 { value: 2, mask: 0x7 })
        );

        let mut r = rule(VCAP_CID_IS2_L0);
        assert_eq!(
            dissect(&mut r, &fm, ETH_P_ALL, Default::default()),
            Err(VcapError::Parse(ParseError::Vlan))
        );

        let fm = FlowMatch { vlan: Some(tag(None)), ..Default::default() };
        let mut r = rule(VCAP_CID_IS2_L0);
        dissect(&mut r, &fm, ETH_P_ALL, Default::default()).unwrap();
        assert!(r.key(KeyField::VidCls).is_some());

        let fm = FlowMatch { cvlan: Some(tag(None)), ..Default::default() };
        let mut r = rule(VCAP_CID_IS2_L0);
        assert_eq!(
            dissect(&mut r, &fm, ETH_P_ALL, Default::default()),
            Err(VcapError::Parse(ParseError::Cvlan))
        );

        let mut bad = tag(None);
        bad.vid = Some(Masked::new(4096, 0xfff));
        let fm = FlowMatch { vlan: Some(bad), ..Default::default() };
        let mut r = rule(VCAP_CID_IS1_L0);
        assert_eq!(
            dissect(&mut r, &fm, ETH_P_ALL, Default::default()),
            Err(VcapError::Parse(ParseError::Vlan))
        );
    }

    #[test]
    fn tcp_flags() {
        let flags = |value, mask| FlowMatch {
            tcp: Some(TcpKey { flags: Masked::new(value, mask) }),
            ..Default::default()
        };

        let mut r = rule(VCAP_CID_IS2_L0);
        dissect(
            &mut r,
            &flags(TcpFlags::SYN, TcpFlags::SYN | TcpFlags::ACK),
            ETH_P_IP,
            Default::default(),
        )
        .unwrap();
        assert_eq!(
            r.key(KeyField::L4Syn),
            Some(&KeyValue::Bit { value: 1, mask: 1 })
        );
        assert_eq!(
            r.key(KeyField::L4Ack),
            Some(&KeyValue::Bit { value: 0, mask: 1 })
        );
        assert!(r.key(KeyField::L4Fin).is_none());

        let mut r = rule(VCAP_CID_IS2_L0);
        assert_eq!(
            dissect(
                &mut r,
                &flags(TcpFlags::empty(), TcpFlags::ECE),
                ETH_P_IP,
                Default::default()
            ),
            Err(VcapError::Parse(ParseError::TcpFlags))
        );
    }

    #[test]
    fn tos_per_vcap() {
        let tos = |mask| FlowMatch {
            ip: Some(IpKey { tos: Some(Masked::new(0xb8, mask)), ttl: None }),
            ..Default::default()
        };

        let mut r = rule(VCAP_CID_IS1_L0);
        dissect(&mut r, &tos(0xfc), ETH_P_IP, Default::default()).unwrap();
        assert_eq!(
            r.key(KeyField::L3Dscp),
            Some(&KeyValue::U32 { value: 46, mask: 0x3f })
        );

        let mut r = rule(VCAP_CID_IS1_L0);
        assert_eq!(
            dissect(&mut r, &tos(0xff), ETH_P_IP, Default::default()),
            Err(VcapError::Parse(ParseError::IpTos))
        );

        let mut r = rule(VCAP_CID_IS2_L0);
        dissect(&mut r, &tos(0xff), ETH_P_IP, Default::default()).unwrap();
        assert_eq!(
            r.key(KeyField::L3Tos),
            Some(&KeyValue::U32 { value: 0xb8, mask: 0xff })
        );

        let fm = FlowMatch {
            ip: Some(IpKey { tos: None, ttl: Some(Masked::new(64, 0xff)) }),
            ..Default::default()
        };
        let mut r = rule(VCAP_CID_IS2_L0);
        assert_eq!(
            dissect(&mut r, &fm, ETH_P_IP, Default::default()),
            Err(VcapError::Parse(ParseError::IpTos))
        );
    }

    #[test]
    fn unsupported_key() {
        let fm = FlowMatch {
            eth: Some(EthKey {
                dst: Some(Masked::new(
                    MacAddr::from([1, 0, 0, 0, 0, 0]),
                    MacAddr::from([1, 0, 0, 0, 0, 0]),
                )),
                src: None,
            }),
            icmp: Some(IcmpKey::default()),
            ..Default::default()
        };
        let mut r = rule(VCAP_CID_IS2_L0);
        let err = dissect(&mut r, &fm, ETH_P_IP, Default::default());
        assert_eq!(err, Err(VcapError::UnsupportedKey));
        assert_eq!(err.unwrap_err().ext_msg(), "Unsupported match key");
    }
}

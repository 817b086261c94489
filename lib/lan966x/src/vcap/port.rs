// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The per-port keyset configuration.
//!
//! Each port classifies frames into a handful of traffic classes and
//! looks each class up with one configured keyset, per VCAP lookup.

use super::VcapError;
use super::model::Keyset;
use crate::api::ChainInfo;
use crate::api::ETH_P_ALL;
use crate::api::ETH_P_ARP;
use crate::api::ETH_P_IP;
use crate::api::ETH_P_IPV6;
use crate::api::ExtErr;
use crate::api::IPPROTO_TCP;
use crate::api::IPPROTO_UDP;
use crate::api::PortId;
use crate::api::VcapType;
use core::fmt;
use core::fmt::Display;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// The traffic classes a port picks a keyset for.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum KeysetClass {
    Other,
    Arp,
    Ipv4TcpUdp,
    Ipv4Other,
    Ipv6TcpUdp,
    Ipv6Other,
}

impl KeysetClass {
    pub const ALL: [KeysetClass; 6] = [
        Self::Other,
        Self::Arp,
        Self::Ipv4TcpUdp,
        Self::Ipv4Other,
        Self::Ipv6TcpUdp,
        Self::Ipv6Other,
    ];

    /// The classes frames of `l3_proto` fall into.
    pub fn for_l3(l3_proto: u16) -> &'static [KeysetClass] {
        match l3_proto {
            ETH_P_ALL => &Self::ALL,
            ETH_P_ARP => &[Self::Arp],
            ETH_P_IP => &[Self::Ipv4TcpUdp, Self::Ipv4Other],
            ETH_P_IPV6 => &[Self::Ipv6TcpUdp, Self::Ipv6Other],
            _ => &[Self::Other],
        }
    }

    /// The classes frames of `l3_proto` carrying `l4_proto` fall
    /// into. An `l4_proto` of 0 means any.
    pub fn for_l3_l4(l3_proto: u16, l4_proto: u8) -> Vec<KeysetClass> {
        let tcp_udp = l4_proto == IPPROTO_TCP || l4_proto == IPPROTO_UDP;
        Self::for_l3(l3_proto)
            .iter()
            .copied()
            .filter(|c| match c {
                _ if l4_proto == 0 => true,
                Self::Ipv4TcpUdp | Self::Ipv6TcpUdp => tcp_udp,
                Self::Ipv4Other | Self::Ipv6Other => !tcp_udp,
                _ => true,
            })
            .collect()
    }

    /// The keysets a port may use for this class, in `vtype`.
    pub fn legal(self, vtype: VcapType) -> &'static [Keyset] {
        use Keyset::*;

        match (vtype, self) {
            (VcapType::Is1, Self::Other | Self::Arp) => {
                &[Is1Normal, Is1SevenTuple, Is1DblVid, Is1Rt]
            }
            (VcapType::Is1, Self::Ipv4TcpUdp | Self::Ipv4Other) => {
                &[Is1FiveTupleIp4, Is1Normal, Is1SevenTuple, Is1DblVid]
            }
            (VcapType::Is1, Self::Ipv6TcpUdp | Self::Ipv6Other) => &[
                Is1NormalIp6,
                Is1FiveTupleIp6,
                Is1Normal,
                Is1SevenTuple,
                Is1DblVid,
            ],
            (VcapType::Is2, Self::Other) => &[Is2MacEtype],
            (VcapType::Is2, Self::Arp) => &[Is2Arp, Is2MacEtype],
            (VcapType::Is2, Self::Ipv4TcpUdp) => &[Is2Ip4TcpUdp, Is2MacEtype],
            (VcapType::Is2, Self::Ipv4Other) => {
                &[Is2Ip4Other, Is2MacEtype, Is2SmacSip4]
            }
            (VcapType::Is2, Self::Ipv6TcpUdp) => {
                &[Is2Ip6Std, Is2Ip6TcpUdp, Is2MacEtype, Is2SmacSip6]
            }
            (VcapType::Is2, Self::Ipv6Other) => {
                &[Is2Ip6Std, Is2Ip6Other, Is2MacEtype, Is2SmacSip6]
            }
            (VcapType::Es0, _) => &[Es0Vid],
        }
    }

    /// The keyset a port uses for this class out of reset.
    pub fn default_keyset(self, vtype: VcapType) -> Keyset {
        match (vtype, self) {
            (VcapType::Is1, Self::Other | Self::Arp) => Keyset::Is1Normal,
            (VcapType::Is1, Self::Ipv4TcpUdp | Self::Ipv4Other) => {
                Keyset::Is1FiveTupleIp4
            }
            (VcapType::Is1, Self::Ipv6TcpUdp | Self::Ipv6Other) => {
                Keyset::Is1NormalIp6
            }
            (VcapType::Is2, Self::Other) => Keyset::Is2MacEtype,
            (VcapType::Is2, Self::Arp) => Keyset::Is2Arp,
            (VcapType::Is2, Self::Ipv4TcpUdp) => Keyset::Is2Ip4TcpUdp,
            (VcapType::Is2, Self::Ipv4Other) => Keyset::Is2Ip4Other,
            (VcapType::Is2, Self::Ipv6TcpUdp | Self::Ipv6Other) => {
                Keyset::Is2Ip6Std
            }
            (VcapType::Es0, _) => Keyset::Es0Vid,
        }
    }
}

impl Display for KeysetClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Other => "other",
            Self::Arp => "arp",
            Self::Ipv4TcpUdp => "ipv4-tcp-udp",
            Self::Ipv4Other => "ipv4-other",
            Self::Ipv6TcpUdp => "ipv6-tcp-udp",
            Self::Ipv6Other => "ipv6-other",
        };
        write!(f, "{s}")
    }
}

type Lookup = (PortId, VcapType, u8);

/// The keyset every port uses per lookup and traffic class.
#[derive(Clone, Debug)]
pub struct PortKeysets {
    num_ports: u8,
    table: BTreeMap<Lookup, BTreeMap<KeysetClass, Keyset>>,
}

impl PortKeysets {
    /// Create the table for `num_ports` ports, every lookup set to
    /// its default keysets.
    pub fn new(num_ports: u8) -> Self {
        let mut table = BTreeMap::new();
        for port in 0..num_ports {
            for vt in VcapType::ALL {
                for lookup in 0..vt.lookups() {
                    let classes = KeysetClass::ALL
                        .iter()
                        .map(|c| (*c, c.default_keyset(vt)))
                        .collect();
                    table.insert((port, vt, lookup), classes);
                }
            }
        }

        Self { num_ports, table }
    }

    pub fn num_ports(&self) -> u8 {
        self.num_ports
    }

    fn lookup_of(
        &self,
        port: PortId,
        chain: u32,
    ) -> Result<Lookup, VcapError> {
        let ci = ChainInfo::new(chain).ok_or(ExtErr::NoAdmin)?;
        if port >= self.num_ports {
            return Err(ExtErr::NoNetdev.into());
        }
        Ok((port, ci.vtype, ci.lookup))
    }

    /// The keysets `port` uses in the lookup of `chain` for frames of
    /// `l3_proto`, without duplicates.
    pub fn get_port_keyset(
        &self,
        port: PortId,
        chain: u32,
        l3_proto: u16,
    ) -> Result<Vec<Keyset>, VcapError> {
        let key = self.lookup_of(port, chain)?;
        let classes = self.table.get(&key).ok_or(ExtErr::NoNetdev)?;

        Ok(KeysetClass::for_l3(l3_proto)
            .iter()
            .filter_map(|c| classes.get(c).copied())
            .unique()
            .collect())
    }

    /// The keyset `port` uses for `class` in the lookup of `chain`.
    pub fn get_class(
        &self,
        port: PortId,
        chain: u32,
        class: KeysetClass,
    ) -> Result<Keyset, VcapError> {
        let key = self.lookup_of(port, chain)?;
        self.table
            .get(&key)
            .and_then(|classes| classes.get(&class).copied())
            .ok_or(ExtErr::NoNetdev.into())
    }

    /// Use `keyset` on `port` in the lookup of `chain` for frames of
    /// `l3_proto`/`l4_proto`. Return the keysets replaced.
    ///
    /// # Errors
    ///
    /// `IllegalPortKeyset` if `keyset` is not one the port may use for
    /// every affected class; nothing is changed in that case.
    pub fn set_port_keyset(
        &mut self,
        port: PortId,
        chain: u32,
        l3_proto: u16,
        l4_proto: u8,
        keyset: Keyset,
    ) -> Result<Vec<(KeysetClass, Keyset)>, VcapError> {
        let key = self.lookup_of(port, chain)?;
        let classes = KeysetClass::for_l3_l4(l3_proto, l4_proto);

        let legal = |c: &&KeysetClass| c.legal(key.1).contains(&keyset);
        if let Some(c) = classes.iter().find(|c| !legal(c)) {
            return Err(VcapError::IllegalPortKeyset { keyset, class: *c });
        }

        let table = self.table.get_mut(&key).ok_or(ExtErr::NoNetdev)?;
        Ok(classes
            .into_iter()
            .filter_map(|c| table.insert(c, keyset).map(|old| (c, old)))
            .collect())
    }

    /// Put back keysets returned by [`PortKeysets::set_port_keyset`].
    pub fn restore(
        &mut self,
        port: PortId,
        chain: u32,
        saved: &[(KeysetClass, Keyset)],
    ) -> Result<(), VcapError> {
        let key = self.lookup_of(port, chain)?;
        let table = self.table.get_mut(&key).ok_or(ExtErr::NoNetdev)?;
        for (c, ks) in saved {
            table.insert(*c, *ks);
        }
        Ok(())
    }

    /// Iterate the whole table.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (PortId, VcapType, u8, KeysetClass, Keyset)> + '_
    {
        self.table.iter().flat_map(|((port, vt, lookup), classes)| {
            classes.iter().map(move |(c, ks)| (*port, *vt, *lookup, *c, *ks))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::VCAP_CID_ES0_L0;
    use crate::api::VCAP_CID_IS1_L1;
    use crate::api::VCAP_CID_IS2_L0;

    #[test]
    fn defaults() {
        let pk = PortKeysets::new(4);
        assert_eq!(
            pk.get_port_keyset(0, VCAP_CID_IS2_L0, ETH_P_IP).unwrap(),
            vec![Keyset::Is2Ip4TcpUdp, Keyset::Is2Ip4Other]
        );
        assert_eq!(
            pk.get_port_keyset(1, VCAP_CID_IS2_L0 + 3, ETH_P_IPV6).unwrap(),
            vec![Keyset::Is2Ip6Std]
        );
        assert_eq!(
            pk.get_port_keyset(2, VCAP_CID_IS1_L1, ETH_P_ALL).unwrap(),
            vec![
                Keyset::Is1Normal,
                Keyset::Is1FiveTupleIp4,
                Keyset::Is1NormalIp6
            ]
        );
        assert_eq!(
            pk.get_port_keyset(3, VCAP_CID_ES0_L0, 0x88f7).unwrap(),
            vec![Keyset::Es0Vid]
        );
        assert!(pk.get_port_keyset(4, VCAP_CID_IS2_L0, ETH_P_IP).is_err());
        assert!(pk.get_port_keyset(0, 5, ETH_P_IP).is_err());
    }

    #[test]
    fn set_and_restore() {
        let mut pk = PortKeysets::new(2);
        let saved = pk
            .set_port_keyset(
                0,
                VCAP_CID_IS2_L0,
                ETH_P_IP,
                0,
                Keyset::Is2MacEtype,
            )
            .unwrap();
        assert_eq!(
            saved,
            vec![
                (KeysetClass::Ipv4TcpUdp, Keyset::Is2Ip4TcpUdp),
                (KeysetClass::Ipv4Other, Keyset::Is2Ip4Other),
            ]
        );
        assert_eq!(
            pk.get_port_keyset(0, VCAP_CID_IS2_L0, ETH_P_IP).unwrap(),
            vec![Keyset::Is2MacEtype]
        );
        // The other port and the other lookup are untouched.
        assert_eq!(
            pk.get_class(1, VCAP_CID_IS2_L0, KeysetClass::Ipv4Other).unwrap(),
            Keyset::Is2Ip4Other
        );

        pk.restore(0, VCAP_CID_IS2_L0, &saved).unwrap();
        assert_eq!(
            pk.get_port_keyset(0, VCAP_CID_IS2_L0, ETH_P_IP).unwrap(),
            vec![Keyset::Is2Ip4TcpUdp, Keyset::Is2Ip4Other]
        );
    }

    #[test]
    fn l4_narrows_classes() {
        let mut pk = PortKeysets::new(1);
        pk.set_port_keyset(
            0,
            VCAP_CID_IS2_L0,
            ETH_P_IPV6,
            IPPROTO_TCP,
            Keyset::Is2Ip6TcpUdp,
        )
        .unwrap();
        assert_eq!(
            pk.get_class(0, VCAP_CID_IS2_L0, KeysetClass::Ipv6Other).unwrap(),
            Keyset::Is2Ip6Std
        );
        assert_eq!(
            pk.get_class(0, VCAP_CID_IS2_L0, KeysetClass::Ipv6TcpUdp)
                .unwrap(),
            Keyset::Is2Ip6TcpUdp
        );
    }

    #[test]
    fn illegal_keyset_rejected() {
        let mut pk = PortKeysets::new(1);
        let err = pk.set_port_keyset(
            0,
            VCAP_CID_IS2_L0,
            ETH_P_ARP,
            0,
            Keyset::Is2Ip4TcpUdp,
        );
        assert!(matches!(err, Err(VcapError::IllegalPortKeyset { .. })));
        assert_eq!(
            pk.get_class(0, VCAP_CID_IS2_L0, KeysetClass::Arp).unwrap(),
            Keyset::Is2Arp
        );
    }
}

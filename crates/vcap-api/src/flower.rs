// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The flow-offload request boundary.
//!
//! A request is a presence-tagged dissector match (each category a
//! value/mask pair), an ordered list of actions, and the chain,
//! priority and cookie identifying the rule.

use crate::ETH_P_ALL;
use crate::MacAddr;
use crate::PortId;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

/// A value and the mask of the bits which must match.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct Masked<T> {
    pub value: T,
    pub mask: T,
}

impl<T> Masked<T> {
    pub const fn new(value: T, mask: T) -> Self {
        Self { value, mask }
    }
}

bitflags! {
    /// The dissector key categories a [`FlowMatch`] may carry.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DissectorKeys: u32 {
        const CONTROL = 1 << 0;
        const BASIC = 1 << 1;
        const IPV4_ADDRS = 1 << 2;
        const IPV6_ADDRS = 1 << 3;
        const PORTS = 1 << 4;
        const ETH_ADDRS = 1 << 5;
        const ARP = 1 << 6;
        const VLAN = 1 << 7;
        const CVLAN = 1 << 8;
        const TCP = 1 << 9;
        const IP = 1 << 10;
        const ICMP = 1 << 11;
        const META = 1 << 12;
    }
}

bitflags! {
    /// Flags of the control key.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct ControlFlags: u32 {
        const IS_FRAGMENT = 1 << 0;
        const FIRST_FRAG = 1 << 1;
        const ENCAPSULATION = 1 << 2;
    }
}

bitflags! {
    /// TCP header flags.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct TcpFlags: u16 {
        const FIN = 0x001;
        const SYN = 0x002;
        const RST = 0x004;
        const PSH = 0x008;
        const ACK = 0x010;
        const URG = 0x020;
        const ECE = 0x040;
        const CWR = 0x080;
        const NS = 0x100;
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct ControlKey {
    pub flags: Masked<ControlFlags>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct BasicKey {
    #[serde(default)]
    pub n_proto: Option<Masked<u16>>,
    #[serde(default)]
    pub ip_proto: Option<Masked<u8>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct Ipv4Key {
    #[serde(default)]
    pub src: Option<Masked<Ipv4Addr>>,
    #[serde(default)]
    pub dst: Option<Masked<Ipv4Addr>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct Ipv6Key {
    #[serde(default)]
    pub src: Option<Masked<Ipv6Addr>>,
    #[serde(default)]
    pub dst: Option<Masked<Ipv6Addr>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct PortsKey {
    #[serde(default)]
    pub src: Option<Masked<u16>>,
    #[serde(default)]
    pub dst: Option<Masked<u16>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct EthKey {
    #[serde(default)]
    pub src: Option<Masked<MacAddr>>,
    #[serde(default)]
    pub dst: Option<Masked<MacAddr>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct ArpKey {
    #[serde(default)]
    pub sip: Option<Masked<Ipv4Addr>>,
    #[serde(default)]
    pub tip: Option<Masked<Ipv4Addr>>,
    #[serde(default)]
    pub op: Option<Masked<u8>>,
    #[serde(default)]
    pub sha: Option<Masked<MacAddr>>,
    #[serde(default)]
    pub tha: Option<Masked<MacAddr>>,
}

pub const ARPOP_REQUEST: u8 = 1;
pub const ARPOP_REPLY: u8 = 2;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct VlanKey {
    #[serde(default)]
    pub vid: Option<Masked<u16>>,
    #[serde(default)]
    pub prio: Option<Masked<u8>>,
    /// The TPID of the tag, when the match is restricted to one.
    #[serde(default)]
    pub tpid: Option<u16>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct TcpKey {
    pub flags: Masked<TcpFlags>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct IpKey {
    #[serde(default)]
    pub tos: Option<Masked<u8>>,
    #[serde(default)]
    pub ttl: Option<Masked<u8>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct IcmpKey {
    #[serde(default)]
    pub icmp_type: Option<Masked<u8>>,
    #[serde(default)]
    pub code: Option<Masked<u8>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct MetaKey {
    pub ingress_ifindex: u32,
}

/// A dissected flow match. Each present category constrains the
/// frames the rule applies to.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FlowMatch {
    #[serde(default)]
    pub control: Option<ControlKey>,
    #[serde(default)]
    pub basic: Option<BasicKey>,
    #[serde(default)]
    pub ipv4: Option<Ipv4Key>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Key>,
    #[serde(default)]
    pub ports: Option<PortsKey>,
    #[serde(default)]
    pub eth: Option<EthKey>,
    #[serde(default)]
    pub arp: Option<ArpKey>,
    #[serde(default)]
    pub vlan: Option<VlanKey>,
    #[serde(default)]
    pub cvlan: Option<VlanKey>,
    #[serde(default)]
    pub tcp: Option<TcpKey>,
    #[serde(default)]
    pub ip: Option<IpKey>,
    #[serde(default)]
    pub icmp: Option<IcmpKey>,
    #[serde(default)]
    pub meta: Option<MetaKey>,
}

impl FlowMatch {
    /// The set of categories present in this match.
    pub fn present(&self) -> DissectorKeys {
        let mut keys = DissectorKeys::empty();
        keys.set(DissectorKeys::CONTROL, self.control.is_some());
        keys.set(DissectorKeys::BASIC, self.basic.is_some());
        keys.set(DissectorKeys::IPV4_ADDRS, self.ipv4.is_some());
        keys.set(DissectorKeys::IPV6_ADDRS, self.ipv6.is_some());
        keys.set(DissectorKeys::PORTS, self.ports.is_some());
        keys.set(DissectorKeys::ETH_ADDRS, self.eth.is_some());
        keys.set(DissectorKeys::ARP, self.arp.is_some());
        keys.set(DissectorKeys::VLAN, self.vlan.is_some());
        keys.set(DissectorKeys::CVLAN, self.cvlan.is_some());
        keys.set(DissectorKeys::TCP, self.tcp.is_some());
        keys.set(DissectorKeys::IP, self.ip.is_some());
        keys.set(DissectorKeys::ICMP, self.icmp.is_some());
        keys.set(DissectorKeys::META, self.meta.is_some());
        keys
    }
}

/// One entry of a PSFP gate control list.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GateEntry {
    pub open: bool,
    /// Interval in nanoseconds.
    pub interval: u32,
    /// Internal priority value, -1 for "unchanged".
    pub ipv: i32,
    /// Maximum octets passed during the interval, -1 for unlimited.
    pub max_octets: i32,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowAction {
    Accept,
    Drop,
    Trap,
    Mirror {
        port: PortId,
    },
    Redirect {
        port: PortId,
    },
    Police {
        index: u32,
        rate: u64,
        burst: u32,
    },
    VlanPop,
    VlanPush {
        vid: u16,
        prio: u8,
        tpid: u16,
    },
    VlanMangle {
        vid: u16,
        prio: u8,
    },
    Priority {
        prio: u32,
    },
    Gate {
        index: u32,
        prio: i32,
        base_time: u64,
        cycle_time: u64,
        entries: Vec<GateEntry>,
    },
    Goto {
        chain: u32,
    },
    /// Any action the hardware has no counterpart for.
    Other {
        name: String,
    },
}

impl FlowAction {
    pub fn name(&self) -> &str {
        match self {
            Self::Accept => "accept",
            Self::Drop => "drop",
            Self::Trap => "trap",
            Self::Mirror { .. } => "mirror",
            Self::Redirect { .. } => "redirect",
            Self::Police { .. } => "police",
            Self::VlanPop => "vlan pop",
            Self::VlanPush { .. } => "vlan push",
            Self::VlanMangle { .. } => "vlan modify",
            Self::Priority { .. } => "skbedit priority",
            Self::Gate { .. } => "gate",
            Self::Goto { .. } => "goto",
            Self::Other { name } => name,
        }
    }
}

impl Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowCommand {
    Replace,
    Destroy,
    Stats,
    TemplateCreate,
    TemplateDestroy,
}

fn default_protocol() -> u16 {
    ETH_P_ALL
}

/// A single flow-offload request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FlowOffload {
    pub command: FlowCommand,
    pub port: PortId,
    pub chain: u32,
    #[serde(default)]
    pub prio: u16,
    pub cookie: u64,
    /// The L3 protocol the filter was installed for.
    #[serde(default = "default_protocol")]
    pub protocol: u16,
    #[serde(default)]
    pub matches: FlowMatch,
    #[serde(default)]
    pub actions: Vec<FlowAction>,
}

impl FlowOffload {
    pub fn new(command: FlowCommand, port: PortId, chain: u32) -> Self {
        Self {
            command,
            port,
            chain,
            prio: 0,
            cookie: 0,
            protocol: ETH_P_ALL,
            matches: FlowMatch::default(),
            actions: Vec::new(),
        }
    }
}

/// How fresh the counters reported by a stats request are.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum StatsFreshness {
    Immediate,
    Delayed,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowStats {
    pub packets: u64,
    pub drops: u64,
    pub used: StatsFreshness,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn present_keys() {
        let mut fm = FlowMatch::default();
        assert_eq!(fm.present(), DissectorKeys::empty());

        fm.eth = Some(EthKey::default());
        fm.tcp = Some(TcpKey::default());
        assert_eq!(
            fm.present(),
            DissectorKeys::ETH_ADDRS | DissectorKeys::TCP
        );
    }
}

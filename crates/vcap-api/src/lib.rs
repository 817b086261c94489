// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types shared between the LAN966x VCAP/FDMA engine and its
//! consumers.
//!
//! Everything a flow-offload caller hands to the rule compiler, and
//! everything a DMA client hands to (or receives from) a descriptor
//! ring, lives here. The engine itself lives in the `lan966x` crate.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod chain;
pub mod dma;
pub mod flower;
pub mod mac;

pub use chain::*;
pub use dma::*;
pub use flower::*;
pub use mac::*;

/// The overall version of the API. Bump this whenever a type in this
/// crate changes shape.
pub const API_VERSION: u64 = 3;

/// A front port number on the switch.
pub type PortId = u8;

/// Ethertype used by flow-offload requests that match any L3
/// protocol.
pub const ETH_P_ALL: u16 = 0x0003;
pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_ARP: u16 = 0x0806;
pub const ETH_P_8021Q: u16 = 0x8100;
pub const ETH_P_8021AD: u16 = 0x88A8;
pub const ETH_P_IPV6: u16 = 0x86DD;
pub const ETH_P_SNAP: u16 = 0x0005;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// The extended error code attached to a rule which failed
/// validation.
///
/// This is what a flow-offload caller ultimately sees as the reason a
/// rule could not be placed in hardware.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum ExtErr {
    #[default]
    None,
    NoAdmin,
    NoNetdev,
    NoKeysetMatch,
    NoActionsetMatch,
    NoPortKeysetMatch,
}

impl Display for ExtErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::None => "No error",
            Self::NoAdmin => "Missing VCAP instance",
            Self::NoNetdev => "Missing network interface",
            Self::NoKeysetMatch => "No keyset matched the filter keys",
            Self::NoActionsetMatch => {
                "No actionset matched the filter actions"
            }
            Self::NoPortKeysetMatch => {
                "No port keyset matched the filter keys"
            }
        };

        write!(f, "{s}")
    }
}

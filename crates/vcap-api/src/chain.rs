// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Chain identifiers and the VCAP instances they map onto.
//!
//! A flow-offload chain id selects both a VCAP instance and a lookup
//! within that instance. Each lookup owns a contiguous block of
//! [`VCAP_CID_LOOKUP_SIZE`] chain ids: the first id of the block is the
//! lookup's base chain, every other id is a goto target reached by
//! chaining from an earlier lookup.

use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

pub const VCAP_CID_LOOKUP_SIZE: u32 = 100_000;

/// The chain every flow-offload block starts on. It is not backed by
/// a VCAP.
pub const VCAP_CID_ROOT: u32 = 0;

pub const VCAP_CID_IS1_L0: u32 = 1_000_000;
pub const VCAP_CID_IS1_L1: u32 = 1_100_000;
pub const VCAP_CID_IS1_L2: u32 = 1_200_000;
pub const VCAP_CID_IS1_MAX: u32 = 1_299_999;

pub const VCAP_CID_IS2_L0: u32 = 8_000_000;
pub const VCAP_CID_IS2_L1: u32 = 8_100_000;
pub const VCAP_CID_IS2_MAX: u32 = 8_199_999;

pub const VCAP_CID_ES0_L0: u32 = 10_000_000;
pub const VCAP_CID_ES0_MAX: u32 = 10_099_999;

/// A VCAP instance.
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
pub enum VcapType {
    /// Ingress stage 1: classification, VLAN rewrite, PSFP.
    Is1,
    /// Ingress stage 2: security enforcement, forwarding overrides.
    Is2,
    /// Egress stage 0: egress VLAN tagging.
    Es0,
}

impl VcapType {
    pub const ALL: [VcapType; 3] = [Self::Is1, Self::Is2, Self::Es0];

    pub const fn first_cid(self) -> u32 {
        match self {
            Self::Is1 => VCAP_CID_IS1_L0,
            Self::Is2 => VCAP_CID_IS2_L0,
            Self::Es0 => VCAP_CID_ES0_L0,
        }
    }

    pub const fn last_cid(self) -> u32 {
        match self {
            Self::Is1 => VCAP_CID_IS1_MAX,
            Self::Is2 => VCAP_CID_IS2_MAX,
            Self::Es0 => VCAP_CID_ES0_MAX,
        }
    }

    /// The number of lookups this instance performs per frame.
    pub const fn lookups(self) -> u8 {
        match self {
            Self::Is1 => 3,
            Self::Is2 => 2,
            Self::Es0 => 1,
        }
    }

    /// Return the instance serving `chain`, if any.
    pub fn from_chain(chain: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|vt| chain >= vt.first_cid() && chain <= vt.last_cid())
    }
}

impl Display for VcapType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Is1 => "IS1",
            Self::Is2 => "IS2",
            Self::Es0 => "ES0",
        };
        write!(f, "{s}")
    }
}

impl FromStr for VcapType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "is1" => Ok(Self::Is1),
            "is2" => Ok(Self::Is2),
            "es0" => Ok(Self::Es0),
            _ => Err(format!("unknown VCAP: {s}")),
        }
    }
}

/// Where a chain id sits in the VCAP hierarchy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChainInfo {
    pub vtype: VcapType,
    /// The lookup index within `vtype`.
    pub lookup: u8,
    /// The offset of the chain within its lookup. Non-zero values are
    /// goto targets and double as the link value carried between
    /// lookups.
    pub link: u32,
}

impl ChainInfo {
    /// Resolve `chain`, returning `None` if no VCAP serves it.
    pub fn new(chain: u32) -> Option<Self> {
        let vtype = VcapType::from_chain(chain)?;
        let offset = chain - vtype.first_cid();
        Some(Self {
            vtype,
            lookup: (offset / VCAP_CID_LOOKUP_SIZE) as u8,
            link: offset % VCAP_CID_LOOKUP_SIZE,
        })
    }

    /// Is this the base chain of its lookup?
    pub fn is_base(&self) -> bool {
        self.link == 0
    }

    /// Is this the first lookup performed by its instance?
    pub fn is_first_lookup(&self) -> bool {
        self.lookup == 0
    }

    /// The chain id of the base of this lookup.
    pub fn base_chain(&self) -> u32 {
        self.vtype.first_cid() + self.lookup as u32 * VCAP_CID_LOOKUP_SIZE
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_resolution() {
        assert_eq!(ChainInfo::new(VCAP_CID_ROOT), None);
        assert_eq!(ChainInfo::new(2_000_000), None);

        let ci = ChainInfo::new(VCAP_CID_IS1_L2 + 5).unwrap();
        assert_eq!(ci.vtype, VcapType::Is1);
        assert_eq!(ci.lookup, 2);
        assert_eq!(ci.link, 5);
        assert!(!ci.is_base());
        assert_eq!(ci.base_chain(), VCAP_CID_IS1_L2);

        let ci = ChainInfo::new(VCAP_CID_IS2_L1).unwrap();
        assert_eq!(ci.vtype, VcapType::Is2);
        assert_eq!(ci.lookup, 1);
        assert!(ci.is_base());

        let ci = ChainInfo::new(VCAP_CID_ES0_MAX).unwrap();
        assert_eq!(ci.vtype, VcapType::Es0);
        assert_eq!(ci.lookup, 0);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The VCAP field and keyset model.
//!
//! Every VCAP instance stores rules in rows of sub-words. A rule
//! occupies `sw_per_item` consecutive sub-words of one row, and the
//! layout of its key inside those sub-words is fixed by its keyset.
//! Keysets of the same size share row space, so each of them carries
//! a `TYPE` key which tells them apart at decode time; a keyset which
//! is the only one of its size has no `TYPE` (its `type_id` is -1).
//!
//! Each sub-word of a key starts with a type-group header of
//! `tg_width` bits which marks where an item begins. Field offsets in
//! the tables below are in the key stream *without* those headers;
//! [`KeysetInfo::layout`] packs fields in declaration order starting
//! at offset 0, `TYPE` first.
//!
//! The tables are pure data: nothing here has state and nothing fails
//! except a lookup of something which does not exist.

use crate::api::VcapType;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The storage class of a key or action field.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FieldKind {
    Bit,
    U32,
    U48,
    U72,
    U112,
    U128,
}

impl FieldKind {
    /// The storage class of a field `width` bits wide.
    pub const fn for_width(width: u16) -> Self {
        match width {
            0..=1 => Self::Bit,
            2..=32 => Self::U32,
            33..=48 => Self::U48,
            49..=72 => Self::U72,
            73..=112 => Self::U112,
            _ => Self::U128,
        }
    }

    /// The size of the big-endian byte array holding a value of this
    /// kind.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bit => 1,
            Self::U32 => 4,
            Self::U48 => 6,
            Self::U72 => 9,
            Self::U112 => 14,
            Self::U128 => 16,
        }
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Bit => "bit",
            Self::U32 => "u32",
            Self::U48 => "u48",
            Self::U72 => "u72",
            Self::U112 => "u112",
            Self::U128 => "u128",
        };
        write!(f, "{s}")
    }
}

/// Where a field lives in an encoded key or action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldDesc {
    pub kind: FieldKind,
    pub offset: u16,
    pub width: u16,
}

/// A hardware key field.
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
pub enum KeyField {
    Type,
    First,
    LookupPag,
    LookupGenIdxSel,
    LookupGenIdx,
    IsdxCls,
    IfIgrPortMask,
    IfEgrPort,
    L2Mc,
    L2Bc,
    VlanTagged,
    Tpid0,
    Vid0,
    Pcp0,
    Vid1,
    Pcp1,
    VidCls,
    PcpCls,
    L2Dmac,
    L2Smac,
    EtypeLen,
    Etype,
    Ip4Is,
    L3FragmentType,
    L3Tos,
    L3Dscp,
    L3Ip4Sip,
    L3Ip4Dip,
    L3Ip6Sip,
    L3Ip6Dip,
    L3IpProto,
    TcpUdpIs,
    TcpIs,
    L4Sport,
    L4Dport,
    L4Fin,
    L4Syn,
    L4Rst,
    L4Psh,
    L4Ack,
    L4Urg,
    ArpOpcode,
}

impl KeyField {
    pub const ALL: [KeyField; 42] = [
        Self::Type,
        Self::First,
        Self::LookupPag,
        Self::LookupGenIdxSel,
        Self::LookupGenIdx,
        Self::IsdxCls,
        Self::IfIgrPortMask,
        Self::IfEgrPort,
        Self::L2Mc,
        Self::L2Bc,
        Self::VlanTagged,
        Self::Tpid0,
        Self::Vid0,
        Self::Pcp0,
        Self::Vid1,
        Self::Pcp1,
        Self::VidCls,
        Self::PcpCls,
        Self::L2Dmac,
        Self::L2Smac,
        Self::EtypeLen,
        Self::Etype,
        Self::Ip4Is,
        Self::L3FragmentType,
        Self::L3Tos,
        Self::L3Dscp,
        Self::L3Ip4Sip,
        Self::L3Ip4Dip,
        Self::L3Ip6Sip,
        Self::L3Ip6Dip,
        Self::L3IpProto,
        Self::TcpUdpIs,
        Self::TcpIs,
        Self::L4Sport,
        Self::L4Dport,
        Self::L4Fin,
        Self::L4Syn,
        Self::L4Rst,
        Self::L4Psh,
        Self::L4Ack,
        Self::L4Urg,
        Self::ArpOpcode,
    ];

    /// The width of this field in bits.
    ///
    /// `TYPE` is sized per keyset; this returns the widest `TYPE` any
    /// keyset uses.
    pub const fn width(self) -> u16 {
        match self {
            Self::Type => 4,
            Self::First => 1,
            Self::LookupPag => 8,
            Self::LookupGenIdxSel => 2,
            Self::LookupGenIdx => 12,
            Self::IsdxCls => 12,
            Self::IfIgrPortMask => 9,
            Self::IfEgrPort => 4,
            Self::L2Mc | Self::L2Bc | Self::VlanTagged => 1,
            Self::Tpid0 => 3,
            Self::Vid0 | Self::Vid1 | Self::VidCls => 12,
            Self::Pcp0 | Self::Pcp1 | Self::PcpCls => 3,
            Self::L2Dmac | Self::L2Smac => 48,
            Self::EtypeLen => 1,
            Self::Etype => 16,
            Self::Ip4Is => 1,
            Self::L3FragmentType => 2,
            Self::L3Tos => 8,
            Self::L3Dscp => 6,
            Self::L3Ip4Sip | Self::L3Ip4Dip => 32,
            Self::L3Ip6Sip | Self::L3Ip6Dip => 128,
            Self::L3IpProto => 8,
            Self::TcpUdpIs | Self::TcpIs => 1,
            Self::L4Sport | Self::L4Dport => 16,
            Self::L4Fin
            | Self::L4Syn
            | Self::L4Rst
            | Self::L4Psh
            | Self::L4Ack
            | Self::L4Urg => 1,
            Self::ArpOpcode => 2,
        }
    }

    pub const fn kind(self) -> FieldKind {
        match self {
            Self::Type => FieldKind::U32,
            _ => FieldKind::for_width(self.width()),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Type => "TYPE",
            Self::First => "FIRST",
            Self::LookupPag => "LOOKUP_PAG",
            Self::LookupGenIdxSel => "LOOKUP_GEN_IDX_SEL",
            Self::LookupGenIdx => "LOOKUP_GEN_IDX",
            Self::IsdxCls => "ISDX_CLS",
            Self::IfIgrPortMask => "IF_IGR_PORT_MASK",
            Self::IfEgrPort => "IF_EGR_PORT",
            Self::L2Mc => "L2_MC_IS",
            Self::L2Bc => "L2_BC_IS",
            Self::VlanTagged => "VLAN_TAGGED",
            Self::Tpid0 => "TPID0",
            Self::Vid0 => "VID0",
            Self::Pcp0 => "PCP0",
            Self::Vid1 => "VID1",
            Self::Pcp1 => "PCP1",
            Self::VidCls => "8021Q_VID_CLS",
            Self::PcpCls => "8021Q_PCP_CLS",
            Self::L2Dmac => "L2_DMAC",
            Self::L2Smac => "L2_SMAC",
            Self::EtypeLen => "ETYPE_LEN_IS",
            Self::Etype => "ETYPE",
            Self::Ip4Is => "IP4_IS",
            Self::L3FragmentType => "L3_FRAGMENT_TYPE",
            Self::L3Tos => "L3_TOS",
            Self::L3Dscp => "L3_DSCP",
            Self::L3Ip4Sip => "L3_IP4_SIP",
            Self::L3Ip4Dip => "L3_IP4_DIP",
            Self::L3Ip6Sip => "L3_IP6_SIP",
            Self::L3Ip6Dip => "L3_IP6_DIP",
            Self::L3IpProto => "L3_IP_PROTO",
            Self::TcpUdpIs => "TCP_UDP_IS",
            Self::TcpIs => "TCP_IS",
            Self::L4Sport => "L4_SPORT",
            Self::L4Dport => "L4_DPORT",
            Self::L4Fin => "L4_FIN",
            Self::L4Syn => "L4_SYN",
            Self::L4Rst => "L4_RST",
            Self::L4Psh => "L4_PSH",
            Self::L4Ack => "L4_ACK",
            Self::L4Urg => "L4_URG",
            Self::ArpOpcode => "ARP_OPCODE",
        }
    }
}

impl Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for KeyField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let up = s.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|kf| kf.name() == up)
            .ok_or_else(|| format!("unknown key field: {s}"))
    }
}

/// A hardware action field.
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
pub enum ActionField {
    CntId,
    Esdx,
    PoliceEna,
    PoliceIdx,
    CpuCopyEna,
    CpuQuNum,
    MaskMode,
    PortMask,
    MirrorEna,
    PagOverrideMask,
    PagVal,
    IsdxAddReplaceSel,
    IsdxVal,
    NxtIdxCtrl,
    NxtIdx,
    VidReplaceEna,
    VidAddVal,
    PcpEna,
    PcpVal,
    VlanPopCntEna,
    VlanPopCnt,
    QosEna,
    QosVal,
    SfidEna,
    SfidVal,
    SgidEna,
    SgidVal,
    PushOuterTag,
    TagATpidSel,
    VidAVal,
    PcpAVal,
}

impl ActionField {
    pub const fn width(self) -> u16 {
        match self {
            Self::CntId => 12,
            Self::Esdx => 10,
            Self::PoliceEna => 1,
            Self::PoliceIdx => 6,
            Self::CpuCopyEna => 1,
            Self::CpuQuNum => 3,
            Self::MaskMode => 2,
            Self::PortMask => 9,
            Self::MirrorEna => 1,
            Self::PagOverrideMask | Self::PagVal => 8,
            Self::IsdxAddReplaceSel => 1,
            Self::IsdxVal => 12,
            Self::NxtIdxCtrl => 3,
            Self::NxtIdx => 12,
            Self::VidReplaceEna => 1,
            Self::VidAddVal => 12,
            Self::PcpEna => 1,
            Self::PcpVal => 3,
            Self::VlanPopCntEna => 1,
            Self::VlanPopCnt => 2,
            Self::QosEna => 1,
            Self::QosVal => 3,
            Self::SfidEna => 1,
            Self::SfidVal => 8,
            Self::SgidEna => 1,
            Self::SgidVal => 8,
            Self::PushOuterTag => 2,
            Self::TagATpidSel => 2,
            Self::VidAVal => 12,
            Self::PcpAVal => 3,
        }
    }

    pub const fn kind(self) -> FieldKind {
        FieldKind::for_width(self.width())
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::CntId => "CNT_ID",
            Self::Esdx => "ESDX",
            Self::PoliceEna => "POLICE_ENA",
            Self::PoliceIdx => "POLICE_IDX",
            Self::CpuCopyEna => "CPU_COPY_ENA",
            Self::CpuQuNum => "CPU_QU_NUM",
            Self::MaskMode => "MASK_MODE",
            Self::PortMask => "PORT_MASK",
            Self::MirrorEna => "MIRROR_ENA",
            Self::PagOverrideMask => "PAG_OVERRIDE_MASK",
            Self::PagVal => "PAG_VAL",
            Self::IsdxAddReplaceSel => "ISDX_ADD_REPLACE_SEL",
            Self::IsdxVal => "ISDX_VAL",
            Self::NxtIdxCtrl => "NXT_IDX_CTRL",
            Self::NxtIdx => "NXT_IDX",
            Self::VidReplaceEna => "VID_REPLACE_ENA",
            Self::VidAddVal => "VID_ADD_VAL",
            Self::PcpEna => "PCP_ENA",
            Self::PcpVal => "PCP_VAL",
            Self::VlanPopCntEna => "VLAN_POP_CNT_ENA",
            Self::VlanPopCnt => "VLAN_POP_CNT",
            Self::QosEna => "QOS_ENA",
            Self::QosVal => "QOS_VAL",
            Self::SfidEna => "SFID_ENA",
            Self::SfidVal => "SFID_VAL",
            Self::SgidEna => "SGID_ENA",
            Self::SgidVal => "SGID_VAL",
            Self::PushOuterTag => "PUSH_OUTER_TAG",
            Self::TagATpidSel => "TAG_A_TPID_SEL",
            Self::VidAVal => "VID_A_VAL",
            Self::PcpAVal => "PCP_A_VAL",
        }
    }
}

impl Display for ActionField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A key layout.
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
pub enum Keyset {
    Is1Normal,
    Is1FiveTupleIp4,
    Is1NormalIp6,
    Is1SevenTuple,
    Is1FiveTupleIp6,
    Is1DblVid,
    Is1Rt,
    Is2MacEtype,
    Is2MacLlc,
    Is2MacSnap,
    Is2Arp,
    Is2Ip4TcpUdp,
    Is2Ip4Other,
    Is2Ip6Std,
    Is2Oam,
    Is2Ip6TcpUdp,
    Is2Ip6Other,
    Is2SmacSip4,
    Is2SmacSip6,
    Es0Vid,
}

impl Keyset {
    pub fn info(self) -> &'static KeysetInfo {
        // The tables are in enum declaration order.
        &KEYSETS[self as usize]
    }

    pub fn vtype(self) -> VcapType {
        self.info().vtype
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn sw_per_item(self) -> u8 {
        self.info().sw_per_item
    }

    pub fn type_id(self) -> i8 {
        self.info().type_id
    }

    pub fn contains(self, field: KeyField) -> bool {
        self.info().contains(field)
    }
}

impl Display for Keyset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Keyset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let up = s.to_ascii_uppercase();
        KEYSETS
            .iter()
            .find(|ki| ki.name == up)
            .map(|ki| ki.keyset)
            .ok_or_else(|| format!("unknown keyset: {s}"))
    }
}

/// An action layout.
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
pub enum Actionset {
    Is1S1,
    Is2BaseType,
    Is2SmacSip,
    Es0Vid,
}

impl Actionset {
    pub fn info(self) -> &'static ActionsetInfo {
        &ACTIONSETS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn contains(self, field: ActionField) -> bool {
        self.info().fields.contains(&field)
    }
}

impl Display for Actionset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The geometry of one VCAP instance.
#[derive(Debug)]
pub struct VcapInfo {
    pub vtype: VcapType,
    /// Number of rows of sub-words.
    pub rows: u16,
    /// Sub-words per row.
    pub sw_count: u8,
    /// Bits per key sub-word, type-group header included.
    pub sw_width: u16,
    /// Bits of type-group header at the start of each key sub-word.
    pub tg_width: u16,
    /// Bits per action sub-word.
    pub act_width: u16,
}

impl VcapInfo {
    /// Key payload bits per sub-word.
    pub fn payload(&self) -> u16 {
        self.sw_width - self.tg_width
    }

    /// The type-group header value of sub-word `sw` of an item
    /// `sw_per_item` sub-words wide. Only the first sub-word of an
    /// item carries a non-zero header.
    pub fn tg_value(&self, sw_per_item: u8, sw: u8) -> u128 {
        if self.tg_width == 0 || sw != 0 {
            return 0;
        }

        match sw_per_item {
            1 => 0b01,
            2 => 0b10,
            _ => 0b11,
        }
    }

    /// Total sub-words available for rules.
    pub fn capacity(&self) -> u32 {
        self.rows as u32 * self.sw_count as u32
    }
}

static VCAPS: [VcapInfo; 3] = [
    VcapInfo {
        vtype: VcapType::Is1,
        rows: 192,
        sw_count: 4,
        sw_width: 96,
        tg_width: 2,
        act_width: 128,
    },
    VcapInfo {
        vtype: VcapType::Is2,
        rows: 256,
        sw_count: 4,
        sw_width: 96,
        tg_width: 2,
        act_width: 64,
    },
    VcapInfo {
        vtype: VcapType::Es0,
        rows: 256,
        sw_count: 1,
        sw_width: 96,
        tg_width: 0,
        act_width: 128,
    },
];

pub fn vcap_info(vtype: VcapType) -> &'static VcapInfo {
    match vtype {
        VcapType::Is1 => &VCAPS[0],
        VcapType::Is2 => &VCAPS[1],
        VcapType::Es0 => &VCAPS[2],
    }
}

#[derive(Debug)]
pub struct KeysetInfo {
    pub keyset: Keyset,
    pub vtype: VcapType,
    pub name: &'static str,
    /// Value of `TYPE`, or -1 if this keyset has no `TYPE` key.
    pub type_id: i8,
    /// Width of `TYPE` in bits, 0 when `type_id` is -1.
    pub type_width: u8,
    pub sw_per_item: u8,
    /// Fields in layout order, `TYPE` excluded.
    pub fields: &'static [KeyField],
    /// Bit fields which a rule may carry although this keyset has no
    /// room for them, because the keyset only ever sees frames for
    /// which the field has the given value.
    pub implied: &'static [(KeyField, bool)],
}

impl KeysetInfo {
    /// The value `field` always has in frames this keyset sees.
    pub fn implied_value(&self, field: KeyField) -> Option<bool> {
        self.implied.iter().find(|(f, _)| *f == field).map(|(_, v)| *v)
    }

    pub fn implies(&self, field: KeyField) -> bool {
        self.implied_value(field).is_some()
    }

    /// Items of this keyset which fit in one row.
    pub fn sw_cnt(&self) -> u8 {
        vcap_info(self.vtype).sw_count / self.sw_per_item
    }

    pub fn contains(&self, field: KeyField) -> bool {
        match field {
            KeyField::Type => self.type_id >= 0,
            _ => self.fields.contains(&field),
        }
    }

    /// Width in bits of the key payload of one item.
    pub fn key_width(&self) -> u16 {
        vcap_info(self.vtype).payload() * self.sw_per_item as u16
    }

    /// Iterate the field geometry of this keyset, `TYPE` first.
    pub fn layout(&self) -> impl Iterator<Item = (KeyField, FieldDesc)> + '_ {
        let ty = (self.type_id >= 0).then_some((
            KeyField::Type,
            FieldDesc {
                kind: FieldKind::U32,
                offset: 0,
                width: self.type_width as u16,
            },
        ));
        let mut offset = self.type_width as u16;

        ty.into_iter().chain(self.fields.iter().map(move |f| {
            let desc =
                FieldDesc { kind: f.kind(), offset, width: f.width() };
            offset += f.width();
            (*f, desc)
        }))
    }
}

#[derive(Debug)]
pub struct ActionsetInfo {
    pub actionset: Actionset,
    pub vtype: VcapType,
    pub name: &'static str,
    pub sw_per_item: u8,
    pub fields: &'static [ActionField],
}

impl ActionsetInfo {
    pub fn layout(
        &self,
    ) -> impl Iterator<Item = (ActionField, FieldDesc)> + '_ {
        let mut offset = 0;
        self.fields.iter().map(move |f| {
            let desc = FieldDesc { kind: f.kind(), offset, width: f.width() };
            offset += f.width();
            (*f, desc)
        })
    }
}

use ActionField as A;
use KeyField as K;

const IS1_HEAD: [KeyField; 9] = [
    K::LookupGenIdxSel,
    K::LookupGenIdx,
    K::IfIgrPortMask,
    K::L2Mc,
    K::L2Bc,
    K::VlanTagged,
    K::Tpid0,
    K::Vid0,
    K::Pcp0,
];

macro_rules! fields {
    ($head:expr; $($f:expr),* $(,)?) => {{
        const H: [KeyField; $head.len()] = $head;
        const T: &[KeyField] = &[$($f),*];
        const N: usize = H.len() + T.len();
        const OUT: [KeyField; N] = {
            let mut out = [KeyField::Type; N];
            let mut i = 0;
            while i < H.len() {
                out[i] = H[i];
                i += 1;
            }
            let mut j = 0;
            while j < T.len() {
                out[H.len() + j] = T[j];
                j += 1;
            }
            out
        };
        &OUT
    }};
}

const IS2_HEAD: [KeyField; 8] = [
    K::First,
    K::LookupPag,
    K::IfIgrPortMask,
    K::L2Mc,
    K::L2Bc,
    K::VlanTagged,
    K::VidCls,
    K::PcpCls,
];

const NO_HEAD: [KeyField; 0] = [];

const TCP_FLAGS: [KeyField; 6] =
    [K::L4Fin, K::L4Syn, K::L4Rst, K::L4Psh, K::L4Ack, K::L4Urg];

static KEYSETS: [KeysetInfo; 20] = [
    KeysetInfo {
        keyset: Keyset::Is1Normal,
        vtype: VcapType::Is1,
        name: "NORMAL",
        type_id: 0,
        type_width: 1,
        sw_per_item: 2,
        fields: fields!(IS1_HEAD;
            K::L2Smac, K::EtypeLen, K::Etype, K::Ip4Is, K::L3FragmentType,
            K::L3Dscp, K::L3Ip4Sip, K::TcpUdpIs, K::TcpIs, K::L4Sport,
        ),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is1FiveTupleIp4,
        vtype: VcapType::Is1,
        name: "5TUPLE_IP4",
        type_id: 1,
        type_width: 1,
        sw_per_item: 2,
        fields: fields!(IS1_HEAD;
            K::L3FragmentType, K::L3Dscp, K::L3Ip4Sip, K::L3Ip4Dip,
            K::L3IpProto, K::TcpUdpIs, K::TcpIs, K::L4Sport, K::L4Dport,
        ),
        implied: &[(K::Ip4Is, true)],
    },
    KeysetInfo {
        keyset: Keyset::Is1NormalIp6,
        vtype: VcapType::Is1,
        name: "NORMAL_IP6",
        type_id: 0,
        type_width: 2,
        sw_per_item: 4,
        fields: fields!(IS1_HEAD;
            K::L2Smac, K::L3Dscp, K::L3Ip6Sip, K::L3Ip6Dip, K::TcpUdpIs,
            K::TcpIs,
        ),
        implied: &[(K::Ip4Is, false)],
    },
    KeysetInfo {
        keyset: Keyset::Is1SevenTuple,
        vtype: VcapType::Is1,
        name: "7TUPLE",
        type_id: 1,
        type_width: 2,
        sw_per_item: 4,
        fields: fields!(IS1_HEAD;
            K::Vid1, K::Pcp1, K::L2Dmac, K::L2Smac, K::EtypeLen, K::Etype,
            K::Ip4Is, K::L3FragmentType, K::L3Dscp, K::L3Ip4Sip,
            K::L3Ip4Dip, K::TcpUdpIs, K::TcpIs, K::L4Sport, K::L4Dport,
        ),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is1FiveTupleIp6,
        vtype: VcapType::Is1,
        name: "5TUPLE_IP6",
        type_id: 2,
        type_width: 2,
        sw_per_item: 4,
        fields: fields!(IS1_HEAD;
            K::L3Dscp, K::L3Ip6Sip, K::L3Ip6Dip, K::L3IpProto,
            K::TcpUdpIs, K::TcpIs, K::L4Sport, K::L4Dport,
        ),
        implied: &[(K::Ip4Is, false)],
    },
    KeysetInfo {
        keyset: Keyset::Is1DblVid,
        vtype: VcapType::Is1,
        name: "DBL_VID",
        type_id: 0,
        type_width: 1,
        sw_per_item: 1,
        fields: fields!(IS1_HEAD;
            K::Vid1, K::Pcp1, K::Ip4Is, K::TcpUdpIs,
        ),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is1Rt,
        vtype: VcapType::Is1,
        name: "RT",
        type_id: 1,
        type_width: 1,
        sw_per_item: 1,
        fields: fields!(NO_HEAD;
            K::LookupGenIdxSel, K::LookupGenIdx, K::IfIgrPortMask,
            K::L2Mc, K::L2Bc, K::VlanTagged, K::Vid0, K::Pcp0, K::L2Dmac,
        ),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is2MacEtype,
        vtype: VcapType::Is2,
        name: "MAC_ETYPE",
        type_id: 0,
        type_width: 4,
        sw_per_item: 2,
        fields: fields!(IS2_HEAD; K::L2Dmac, K::L2Smac, K::Etype),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is2MacLlc,
        vtype: VcapType::Is2,
        name: "MAC_LLC",
        type_id: 1,
        type_width: 4,
        sw_per_item: 2,
        fields: fields!(IS2_HEAD; K::L2Dmac, K::L2Smac),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is2MacSnap,
        vtype: VcapType::Is2,
        name: "MAC_SNAP",
        type_id: 2,
        type_width: 4,
        sw_per_item: 2,
        fields: fields!(IS2_HEAD; K::L2Dmac, K::L2Smac),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is2Arp,
        vtype: VcapType::Is2,
        name: "ARP",
        type_id: 3,
        type_width: 4,
        sw_per_item: 2,
        fields: fields!(IS2_HEAD;
            K::L2Smac, K::ArpOpcode, K::L3Ip4Sip, K::L3Ip4Dip,
        ),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is2Ip4TcpUdp,
        vtype: VcapType::Is2,
        name: "IP4_TCP_UDP",
        type_id: 4,
        type_width: 4,
        sw_per_item: 2,
        fields: fields!(IS2_HEAD;
            K::L3FragmentType, K::L3Tos, K::L3Ip4Sip, K::L3Ip4Dip, K::TcpIs,
            K::L4Sport, K::L4Dport, TCP_FLAGS[0], TCP_FLAGS[1],
            TCP_FLAGS[2], TCP_FLAGS[3], TCP_FLAGS[4], TCP_FLAGS[5],
        ),
        implied: &[(K::TcpUdpIs, true), (K::Ip4Is, true)],
    },
    KeysetInfo {
        keyset: Keyset::Is2Ip4Other,
        vtype: VcapType::Is2,
        name: "IP4_OTHER",
        type_id: 5,
        type_width: 4,
        sw_per_item: 2,
        fields: fields!(IS2_HEAD;
            K::L3FragmentType, K::L3Tos, K::L3Ip4Sip, K::L3Ip4Dip,
            K::L3IpProto, K::TcpUdpIs,
        ),
        implied: &[(K::Ip4Is, true)],
    },
    KeysetInfo {
        keyset: Keyset::Is2Ip6Std,
        vtype: VcapType::Is2,
        name: "IP6_STD",
        type_id: 6,
        type_width: 4,
        sw_per_item: 2,
        fields: fields!(IS2_HEAD; K::L3Ip6Sip, K::L3IpProto, K::TcpUdpIs),
        implied: &[(K::Ip4Is, false)],
    },
    KeysetInfo {
        keyset: Keyset::Is2Oam,
        vtype: VcapType::Is2,
        name: "OAM",
        type_id: 7,
        type_width: 4,
        sw_per_item: 2,
        fields: fields!(IS2_HEAD; K::L2Dmac, K::L2Smac),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is2Ip6TcpUdp,
        vtype: VcapType::Is2,
        name: "IP6_TCP_UDP",
        type_id: 0,
        type_width: 1,
        sw_per_item: 4,
        fields: fields!(IS2_HEAD;
            K::L3Tos, K::L3Ip6Sip, K::L3Ip6Dip, K::TcpIs, K::L4Sport,
            K::L4Dport, TCP_FLAGS[0], TCP_FLAGS[1], TCP_FLAGS[2],
            TCP_FLAGS[3], TCP_FLAGS[4], TCP_FLAGS[5],
        ),
        implied: &[(K::Ip4Is, false), (K::TcpUdpIs, true)],
    },
    KeysetInfo {
        keyset: Keyset::Is2Ip6Other,
        vtype: VcapType::Is2,
        name: "IP6_OTHER",
        type_id: 1,
        type_width: 1,
        sw_per_item: 4,
        fields: fields!(IS2_HEAD;
            K::L3Tos, K::L3Ip6Sip, K::L3Ip6Dip, K::L3IpProto, K::TcpUdpIs,
        ),
        implied: &[(K::Ip4Is, false)],
    },
    KeysetInfo {
        keyset: Keyset::Is2SmacSip4,
        vtype: VcapType::Is2,
        name: "SMAC_SIP4",
        type_id: -1,
        type_width: 0,
        sw_per_item: 1,
        fields: fields!(NO_HEAD; K::IfIgrPortMask, K::L2Smac, K::L3Ip4Sip),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Is2SmacSip6,
        vtype: VcapType::Is2,
        name: "SMAC_SIP6",
        type_id: 8,
        type_width: 4,
        sw_per_item: 2,
        fields: fields!(NO_HEAD; K::L2Smac, K::L3Ip6Sip),
        implied: &[],
    },
    KeysetInfo {
        keyset: Keyset::Es0Vid,
        vtype: VcapType::Es0,
        name: "VID",
        type_id: -1,
        type_width: 0,
        sw_per_item: 1,
        fields: fields!(NO_HEAD;
            K::IfEgrPort, K::IsdxCls, K::L2Mc, K::L2Bc, K::VlanTagged,
            K::VidCls, K::PcpCls,
        ),
        implied: &[],
    },
];

static ACTIONSETS: [ActionsetInfo; 4] = [
    ActionsetInfo {
        actionset: Actionset::Is1S1,
        vtype: VcapType::Is1,
        name: "S1",
        sw_per_item: 1,
        fields: &[
            A::CntId,
            A::QosEna,
            A::QosVal,
            A::PagOverrideMask,
            A::PagVal,
            A::IsdxAddReplaceSel,
            A::IsdxVal,
            A::VidReplaceEna,
            A::VidAddVal,
            A::PcpEna,
            A::PcpVal,
            A::VlanPopCntEna,
            A::VlanPopCnt,
            A::NxtIdxCtrl,
            A::NxtIdx,
            A::SfidEna,
            A::SfidVal,
            A::SgidEna,
            A::SgidVal,
        ],
    },
    ActionsetInfo {
        actionset: Actionset::Is2BaseType,
        vtype: VcapType::Is2,
        name: "BASE_TYPE",
        sw_per_item: 2,
        fields: &[
            A::CntId,
            A::PoliceEna,
            A::PoliceIdx,
            A::CpuCopyEna,
            A::CpuQuNum,
            A::MaskMode,
            A::PortMask,
            A::MirrorEna,
        ],
    },
    ActionsetInfo {
        actionset: Actionset::Is2SmacSip,
        vtype: VcapType::Is2,
        name: "SMAC_SIP",
        sw_per_item: 1,
        fields: &[A::CntId, A::CpuCopyEna, A::CpuQuNum],
    },
    ActionsetInfo {
        actionset: Actionset::Es0Vid,
        vtype: VcapType::Es0,
        name: "VID",
        sw_per_item: 1,
        fields: &[
            A::Esdx,
            A::PushOuterTag,
            A::TagATpidSel,
            A::VidAVal,
            A::PcpAVal,
        ],
    },
];

/// Every keyset of `vtype`, in declaration order.
pub fn keysets(vtype: VcapType) -> impl Iterator<Item = Keyset> {
    KEYSETS.iter().filter(move |ki| ki.vtype == vtype).map(|ki| ki.keyset)
}

/// Look up `keyset` in the catalog of `vtype`.
pub fn lookup_keyset(
    vtype: VcapType,
    keyset: Keyset,
) -> Option<&'static KeysetInfo> {
    let ki = keyset.info();
    (ki.vtype == vtype).then_some(ki)
}

/// The geometry of `field` in `keyset` of `vtype`, if it has one.
pub fn lookup_field(
    vtype: VcapType,
    keyset: Keyset,
    field: KeyField,
) -> Option<FieldDesc> {
    lookup_keyset(vtype, keyset)?
        .layout()
        .find(|(f, _)| *f == field)
        .map(|(_, desc)| desc)
}

/// The geometry of action `field` in `actionset`, if it has one.
pub fn lookup_action_field(
    actionset: Actionset,
    field: ActionField,
) -> Option<FieldDesc> {
    actionset
        .info()
        .layout()
        .find(|(f, _)| *f == field)
        .map(|(_, desc)| desc)
}

/// The actionset rules of `keyset` carry.
pub fn actionset_for(keyset: Keyset) -> Actionset {
    match keyset {
        Keyset::Is2SmacSip4 | Keyset::Is2SmacSip6 => Actionset::Is2SmacSip,
        ks => match ks.vtype() {
            VcapType::Is1 => Actionset::Is1S1,
            VcapType::Is2 => Actionset::Is2BaseType,
            VcapType::Es0 => Actionset::Es0Vid,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn tables_in_declaration_order() {
        for (i, ki) in KEYSETS.iter().enumerate() {
            assert_eq!(ki.keyset as usize, i, "{}", ki.name);
        }

        for (i, ai) in ACTIONSETS.iter().enumerate() {
            assert_eq!(ai.actionset as usize, i, "{}", ai.name);
        }
    }

    #[test]
    fn keysets_fit_their_items() {
        for ki in &KEYSETS {
            let end = ki
                .layout()
                .map(|(_, d)| d.offset + d.width)
                .max()
                .unwrap_or(0);
            assert!(
                end <= ki.key_width(),
                "{} {} needs {end} bits, has {}",
                ki.vtype,
                ki.name,
                ki.key_width()
            );

            let uniq: BTreeSet<_> = ki.fields.iter().collect();
            assert_eq!(uniq.len(), ki.fields.len(), "{}", ki.name);
            assert!(!ki.fields.contains(&KeyField::Type));

            for (f, _) in ki.implied {
                assert!(!ki.contains(*f), "{} implies {f}", ki.name);
                assert_eq!(f.kind(), FieldKind::Bit, "{}", ki.name);
            }
        }

        for ai in &ACTIONSETS {
            let bits: u16 = ai.fields.iter().map(|f| f.width()).sum();
            let room = vcap_info(ai.vtype).act_width * ai.sw_per_item as u16;
            assert!(bits <= room, "{} needs {bits}", ai.name);
        }
    }

    // Within one instance, (type_id, sw_per_item) identifies a keyset.
    #[test]
    fn type_ids_unique_per_size() {
        for vt in VcapType::ALL {
            let mut seen = BTreeSet::new();
            for ks in keysets(vt) {
                let ki = ks.info();
                assert!(seen.insert((ki.sw_per_item, ki.type_id)), "{ks}");
                if ki.type_id >= 0 {
                    assert!((ki.type_id as u32) < (1 << ki.type_width));
                } else {
                    let same_size = keysets(vt)
                        .filter(|o| o.sw_per_item() == ki.sw_per_item)
                        .count();
                    assert_eq!(same_size, 1, "{ks}");
                }
            }
        }
    }

    #[test]
    fn field_lookup() {
        let d = lookup_field(VcapType::Is2, Keyset::Is2MacEtype, K::Type)
            .unwrap();
        assert_eq!(d, FieldDesc { kind: FieldKind::U32, offset: 0, width: 4 });

        // TYPE, FIRST, LOOKUP_PAG, ...
        let d =
            lookup_field(VcapType::Is2, Keyset::Is2MacEtype, K::LookupPag)
                .unwrap();
        assert_eq!(d.offset, 5);
        assert_eq!(d.width, 8);

        let d = lookup_field(VcapType::Is2, Keyset::Is2MacEtype, K::L2Dmac)
            .unwrap();
        assert_eq!(d.kind, FieldKind::U48);

        assert!(
            lookup_field(VcapType::Is2, Keyset::Is2MacEtype, K::L3Ip4Sip)
                .is_none()
        );
        assert!(lookup_field(VcapType::Is1, Keyset::Is2MacEtype, K::Type)
            .is_none());
        assert!(
            lookup_field(VcapType::Es0, Keyset::Es0Vid, K::Type).is_none()
        );
    }

    #[test]
    fn names_parse() {
        assert_eq!("ip4_tcp_udp".parse::<Keyset>(), Ok(Keyset::Is2Ip4TcpUdp));
        assert_eq!("L2_DMAC".parse::<KeyField>(), Ok(KeyField::L2Dmac));
        assert!("bogus".parse::<Keyset>().is_err());
    }

    #[test]
    fn sw_cnt() {
        assert_eq!(Keyset::Is1NormalIp6.info().sw_cnt(), 1);
        assert_eq!(Keyset::Is2MacEtype.info().sw_cnt(), 2);
        assert_eq!(Keyset::Es0Vid.info().sw_cnt(), 1);
    }
}

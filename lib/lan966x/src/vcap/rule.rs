// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The rule builder.
//!
//! A [`Rule`] collects key and action fields for one VCAP rule. While
//! no keyset is chosen it is a plain collection: any field may be
//! added, overwritten or removed. Once a keyset is chosen the rule is
//! pinned to it and only fields of that keyset may be added. A rule
//! is committed to a [`super::store::RuleStore`] after it validates,
//! and dropping a rule never touches committed state.

use super::VcapError;
use super::model::ActionField;
use super::model::Actionset;
use super::model::FieldKind;
use super::model::KeyField;
use super::model::Keyset;
use super::model::actionset_for;
use super::model::vcap_info;
use super::port::PortKeysets;
use super::select::select;
use crate::api::ChainInfo;
use crate::api::ExtErr;
use crate::api::PortId;
use crate::api::VcapType;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub type RuleId = u32;

/// Who owns a rule.
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
pub enum VcapUser {
    /// Rules compiled from flower offload requests.
    TcFlower,
    /// Auxiliary rules compiled alongside a flower rule.
    TcExtra,
}

impl Display for VcapUser {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::TcFlower => "tc",
            Self::TcExtra => "tc-extra",
        };
        write!(f, "{s}")
    }
}

/// A key value and mask. Fields wider than 32 bits are big-endian
/// byte arrays.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyValue {
    Bit { value: u8, mask: u8 },
    U32 { value: u32, mask: u32 },
    U48 { value: [u8; 6], mask: [u8; 6] },
    U72 { value: [u8; 9], mask: [u8; 9] },
    U112 { value: [u8; 14], mask: [u8; 14] },
    U128 { value: [u8; 16], mask: [u8; 16] },
}

fn be_bit(bytes: &[u8], i: u16) -> bool {
    let byte = i as usize / 8;
    if byte >= bytes.len() {
        return false;
    }
    (bytes[bytes.len() - 1 - byte] >> (i % 8)) & 1 == 1
}

fn write_hex(f: &mut fmt::Formatter, bytes: &[u8]) -> fmt::Result {
    write!(f, "0x")?;
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

impl KeyValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Bit { .. } => FieldKind::Bit,
            Self::U32 { .. } => FieldKind::U32,
            Self::U48 { .. } => FieldKind::U48,
            Self::U72 { .. } => FieldKind::U72,
            Self::U112 { .. } => FieldKind::U112,
            Self::U128 { .. } => FieldKind::U128,
        }
    }

    /// Bit `i` (least significant first) of the value and the mask.
    pub fn bit(&self, i: u16) -> (bool, bool) {
        match self {
            Self::Bit { value, mask } => {
                (i == 0 && value & 1 == 1, i == 0 && mask & 1 == 1)
            }
            Self::U32 { value, mask } => {
                if i >= 32 {
                    (false, false)
                } else {
                    ((value >> i) & 1 == 1, (mask >> i) & 1 == 1)
                }
            }
            Self::U48 { value, mask } => (be_bit(value, i), be_bit(mask, i)),
            Self::U72 { value, mask } => (be_bit(value, i), be_bit(mask, i)),
            Self::U112 { value, mask } => {
                (be_bit(value, i), be_bit(mask, i))
            }
            Self::U128 { value, mask } => {
                (be_bit(value, i), be_bit(mask, i))
            }
        }
    }

    /// Does the mask select no bits at all?
    pub fn is_wildcard(&self) -> bool {
        match self {
            Self::Bit { mask, .. } => *mask & 1 == 0,
            Self::U32 { mask, .. } => *mask == 0,
            Self::U48 { mask, .. } => mask.iter().all(|b| *b == 0),
            Self::U72 { mask, .. } => mask.iter().all(|b| *b == 0),
            Self::U112 { mask, .. } => mask.iter().all(|b| *b == 0),
            Self::U128 { mask, .. } => mask.iter().all(|b| *b == 0),
        }
    }
}

impl Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bit { value, mask } => write!(f, "{value}/{mask}"),
            Self::U32 { value, mask } => write!(f, "{value:#x}/{mask:#x}"),
            Self::U48 { value, mask } => {
                write_hex(f, value)?;
                write!(f, "/")?;
                write_hex(f, mask)
            }
            Self::U72 { value, mask } => {
                write_hex(f, value)?;
                write!(f, "/")?;
                write_hex(f, mask)
            }
            Self::U112 { value, mask } => {
                write_hex(f, value)?;
                write!(f, "/")?;
                write_hex(f, mask)
            }
            Self::U128 { value, mask } => {
                write_hex(f, value)?;
                write!(f, "/")?;
                write_hex(f, mask)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionValue {
    Bit(u8),
    U32(u32),
}

impl ActionValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Bit(_) => FieldKind::Bit,
            Self::U32(_) => FieldKind::U32,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Bit(b) => (*b & 1) as u32,
            Self::U32(v) => *v,
        }
    }
}

impl Display for ActionValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bit(b) => write!(f, "{b}"),
            Self::U32(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyEntry {
    pub field: KeyField,
    pub value: KeyValue,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ActionEntry {
    pub field: ActionField,
    pub value: ActionValue,
}

/// One key sub-word of an encoded rule.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SubWord {
    pub value: u128,
    pub mask: u128,
}

/// The hardware image of a rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedRule {
    pub keyset: Keyset,
    pub actionset: Actionset,
    pub key: Vec<SubWord>,
    pub action: Vec<u128>,
}

#[derive(Clone, Debug)]
pub struct Rule {
    id: RuleId,
    vtype: VcapType,
    port: PortId,
    chain: u32,
    user: VcapUser,
    priority: u16,
    cookie: u64,
    /// Opaque to the rule API. The flower compiler keeps the policer
    /// index it reserved for this rule here.
    pub client_id: u32,
    keyset: Option<Keyset>,
    actionset: Option<Actionset>,
    keys: Vec<KeyEntry>,
    actions: Vec<ActionEntry>,
    exterr: ExtErr,
}

impl Rule {
    /// Create an empty rule for `port` in `chain`.
    ///
    /// # Errors
    ///
    /// * `NoAdmin`: no VCAP serves `chain`.
    /// * `NoNetdev`: `port` is not a port of this switch.
    pub fn new(
        num_ports: u8,
        id: RuleId,
        port: PortId,
        chain: u32,
        user: VcapUser,
        priority: u16,
        cookie: u64,
    ) -> Result<Self, VcapError> {
        let ci = ChainInfo::new(chain).ok_or(ExtErr::NoAdmin)?;
        if port >= num_ports {
            return Err(ExtErr::NoNetdev.into());
        }

        Ok(Self {
            id,
            vtype: ci.vtype,
            port,
            chain,
            user,
            priority,
            cookie,
            client_id: 0,
            keyset: None,
            actionset: None,
            keys: Vec::new(),
            actions: Vec::new(),
            exterr: ExtErr::None,
        })
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn vtype(&self) -> VcapType {
        self.vtype
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn chain(&self) -> u32 {
        self.chain
    }

    pub fn user(&self) -> VcapUser {
        self.user
    }

    pub fn set_user(&mut self, user: VcapUser) {
        self.user = user;
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn keyset(&self) -> Option<Keyset> {
        self.keyset
    }

    pub fn actionset(&self) -> Option<Actionset> {
        self.actionset
    }

    /// The reason the last validation failed.
    pub fn exterr(&self) -> ExtErr {
        self.exterr
    }

    pub fn keys(&self) -> &[KeyEntry] {
        &self.keys
    }

    pub fn actions(&self) -> &[ActionEntry] {
        &self.actions
    }

    /// The key fields this rule matches on, `TYPE` excluded.
    pub fn key_fields(&self) -> Vec<KeyField> {
        self.keys
            .iter()
            .map(|k| k.field)
            .filter(|f| *f != KeyField::Type)
            .collect()
    }

    pub fn key(&self, field: KeyField) -> Option<&KeyValue> {
        self.keys.iter().find(|k| k.field == field).map(|k| &k.value)
    }

    /// Add `field`, overwriting any earlier value for it.
    ///
    /// # Errors
    ///
    /// * `FieldKind`: `value` is not of the field's storage class.
    /// * `KeysetMismatch`: a keyset is chosen and has no `field`.
    pub fn add_key(
        &mut self,
        field: KeyField,
        value: KeyValue,
    ) -> Result<(), VcapError> {
        if field.kind() != value.kind() {
            return Err(VcapError::FieldKind {
                field: field.name(),
                expected: field.kind(),
            });
        }

        if let Some(ks) = self.keyset {
            if !ks.contains(field) {
                return Err(VcapError::KeysetMismatch { keyset: ks, field });
            }
        }

        match self.keys.iter_mut().find(|k| k.field == field) {
            Some(entry) => entry.value = value,
            None => self.keys.push(KeyEntry { field, value }),
        }

        Ok(())
    }

    pub fn add_key_bit(
        &mut self,
        field: KeyField,
        value: bool,
    ) -> Result<(), VcapError> {
        self.add_key(field, KeyValue::Bit { value: value as u8, mask: 1 })
    }

    pub fn add_key_u32(
        &mut self,
        field: KeyField,
        value: u32,
        mask: u32,
    ) -> Result<(), VcapError> {
        self.add_key(field, KeyValue::U32 { value, mask })
    }

    pub fn add_key_u48(
        &mut self,
        field: KeyField,
        value: [u8; 6],
        mask: [u8; 6],
    ) -> Result<(), VcapError> {
        self.add_key(field, KeyValue::U48 { value, mask })
    }

    pub fn add_key_u128(
        &mut self,
        field: KeyField,
        value: [u8; 16],
        mask: [u8; 16],
    ) -> Result<(), VcapError> {
        self.add_key(field, KeyValue::U128 { value, mask })
    }

    /// Replace the value of a field the rule already carries.
    pub fn modify_key(
        &mut self,
        field: KeyField,
        value: KeyValue,
    ) -> Result<(), VcapError> {
        if self.key(field).is_none() {
            return Err(VcapError::NoSuchField(field.name()));
        }
        self.add_key(field, value)
    }

    /// Remove `field`. Return whether it was present.
    pub fn remove_key(&mut self, field: KeyField) -> bool {
        let before = self.keys.len();
        self.keys.retain(|k| k.field != field);
        before != self.keys.len()
    }

    pub fn action(&self, field: ActionField) -> Option<&ActionValue> {
        self.actions.iter().find(|a| a.field == field).map(|a| &a.value)
    }

    pub fn has_action(&self, field: ActionField) -> bool {
        self.action(field).is_some()
    }

    /// Add action `field`, overwriting any earlier value for it.
    pub fn add_action(
        &mut self,
        field: ActionField,
        value: ActionValue,
    ) -> Result<(), VcapError> {
        if field.kind() != value.kind() {
            return Err(VcapError::FieldKind {
                field: field.name(),
                expected: field.kind(),
            });
        }

        if let Some(aset) = self.actionset {
            if !aset.contains(field) {
                return Err(VcapError::ActionsetMismatch {
                    actionset: aset,
                    field,
                });
            }
        }

        match self.actions.iter_mut().find(|a| a.field == field) {
            Some(entry) => entry.value = value,
            None => self.actions.push(ActionEntry { field, value }),
        }

        Ok(())
    }

    pub fn add_action_bit(
        &mut self,
        field: ActionField,
        value: bool,
    ) -> Result<(), VcapError> {
        self.add_action(field, ActionValue::Bit(value as u8))
    }

    pub fn add_action_u32(
        &mut self,
        field: ActionField,
        value: u32,
    ) -> Result<(), VcapError> {
        self.add_action(field, ActionValue::U32(value))
    }

    pub fn remove_action(&mut self, field: ActionField) -> bool {
        let before = self.actions.len();
        self.actions.retain(|a| a.field != field);
        before != self.actions.len()
    }

    /// Pin the rule to `keyset`.
    ///
    /// # Errors
    ///
    /// * `KeysetFixed`: the rule is already pinned to another keyset.
    /// * `KeysetMismatch`: the rule carries a field `keyset` has no
    ///   room for.
    pub fn set_keyset(&mut self, keyset: Keyset) -> Result<(), VcapError> {
        match self.keyset {
            Some(ks) if ks == keyset => return Ok(()),
            Some(ks) => return Err(VcapError::KeysetFixed(ks)),
            None => (),
        }

        if keyset.vtype() != self.vtype {
            return Err(ExtErr::NoKeysetMatch.into());
        }

        if let Some(k) = self.keys.iter().find(|k| !keyset.contains(k.field))
        {
            return Err(VcapError::KeysetMismatch { keyset, field: k.field });
        }

        self.keyset = Some(keyset);
        self.actionset = Some(actionset_for(keyset));
        Ok(())
    }

    /// Unpin the rule so another keyset may be tried.
    pub(crate) fn clear_keyset(&mut self) {
        self.keyset = None;
        self.actionset = None;
    }

    /// Pin the rule to `keyset` after dropping the fields `keyset`
    /// implies. Return the fields dropped.
    ///
    /// Only fields on the keyset's implied list whose value agrees with
    /// the implied one are ever dropped; if any other field is missing
    /// from `keyset` this fails like [`Rule::set_keyset`] and leaves
    /// the rule untouched.
    pub fn reduce(
        &mut self,
        keyset: Keyset,
    ) -> Result<Vec<KeyField>, VcapError> {
        let info = keyset.info();
        let drop: Vec<KeyField> = self
            .keys
            .iter()
            .filter(|k| !keyset.contains(k.field))
            .filter(|k| match info.implied_value(k.field) {
                Some(implied) => {
                    let (value, mask) = k.value.bit(0);
                    !mask || value == implied
                }
                None => false,
            })
            .map(|k| k.field)
            .collect();

        if let Some(f) = self
            .key_fields()
            .into_iter()
            .find(|f| !keyset.contains(*f) && !drop.contains(f))
        {
            return Err(VcapError::KeysetMismatch { keyset, field: f });
        }

        self.clear_keyset();
        for f in &drop {
            self.remove_key(*f);
        }
        self.set_keyset(keyset)?;
        Ok(drop)
    }

    /// Check that every field of the rule is representable in its
    /// keyset and actionset.
    ///
    /// A rule with no keyset yet is placed in the first port keyset
    /// for `l3_proto` which holds all of its fields. On failure the
    /// rule is left as it was and the reason is recorded as its
    /// [`Rule::exterr`].
    pub fn validate(
        &mut self,
        ports: &PortKeysets,
        l3_proto: u16,
    ) -> Result<(), ExtErr> {
        let res = self.check(ports, l3_proto);
        self.exterr = match res {
            Ok(_) => ExtErr::None,
            Err(e) => e,
        };
        res
    }

    fn check(
        &mut self,
        ports: &PortKeysets,
        l3_proto: u16,
    ) -> Result<(), ExtErr> {
        match ChainInfo::new(self.chain) {
            Some(ci) if ci.vtype == self.vtype => (),
            _ => return Err(ExtErr::NoAdmin),
        }

        if self.port >= ports.num_ports() {
            return Err(ExtErr::NoNetdev);
        }

        let keyset = match self.keyset {
            Some(ks) => ks,
            None => {
                let avail = ports
                    .get_port_keyset(self.port, self.chain, l3_proto)
                    .map_err(|_| ExtErr::NoPortKeysetMatch)?;
                let sel = select(&self.key_fields(), &avail);
                match sel.exact() {
                    Some(ks) => ks,
                    None => return Err(ExtErr::NoPortKeysetMatch),
                }
            }
        };

        if self.keys.iter().any(|k| !keyset.contains(k.field)) {
            return Err(ExtErr::NoKeysetMatch);
        }

        let aset = actionset_for(keyset);
        if self.actions.iter().any(|a| !aset.contains(a.field)) {
            return Err(ExtErr::NoActionsetMatch);
        }

        self.keyset = Some(keyset);
        self.actionset = Some(aset);
        Ok(())
    }

    /// Deep copy this rule for use as an auxiliary rule of the same
    /// cookie. The copy has no id until it is committed.
    pub fn copy(&self) -> Rule {
        let mut r = self.clone();
        r.id = 0;
        r.exterr = ExtErr::None;
        r
    }

    pub(crate) fn set_id(&mut self, id: RuleId) {
        self.id = id;
    }

    /// Encode this rule into its keyset's and actionset's bit image.
    ///
    /// `TYPE` takes the rule's own value when it carries one (a
    /// wildcarded type), otherwise the keyset's `type_id`. Each key
    /// sub-word starts with its type-group header.
    pub fn encode(&self) -> Result<EncodedRule, VcapError> {
        let keyset = self.keyset.ok_or(ExtErr::NoKeysetMatch)?;
        let actionset = self.actionset.ok_or(ExtErr::NoActionsetMatch)?;
        let ki = keyset.info();
        let vi = vcap_info(self.vtype);
        let payload = vi.payload();

        let mut key: Vec<SubWord> = (0..ki.sw_per_item)
            .map(|sw| SubWord {
                value: vi.tg_value(ki.sw_per_item, sw),
                mask: (1u128 << vi.tg_width) - 1,
            })
            .collect();

        for (field, desc) in ki.layout() {
            let kv = match (field, self.key(field)) {
                (_, Some(kv)) => *kv,
                (KeyField::Type, None) => KeyValue::U32 {
                    value: ki.type_id as u32,
                    mask: u32::MAX,
                },
                (_, None) => continue,
            };

            for i in 0..desc.width {
                let (v, m) = kv.bit(i);
                let pos = desc.offset + i;
                let sw = &mut key[(pos / payload) as usize];
                let bit = vi.tg_width + pos % payload;
                sw.value |= (v as u128) << bit;
                sw.mask |= (m as u128) << bit;
            }
        }

        let ai = actionset.info();
        let mut action = vec![0u128; ai.sw_per_item as usize];
        for (field, desc) in ai.layout() {
            let Some(av) = self.action(field) else {
                continue;
            };
            let v = av.as_u32() as u128;
            for i in 0..desc.width.min(32) {
                let pos = desc.offset + i;
                let word = &mut action[(pos / vi.act_width) as usize];
                *word |= ((v >> i) & 1) << (pos % vi.act_width);
            }
        }

        Ok(EncodedRule { keyset, actionset, key, action })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::VCAP_CID_IS1_L0;
    use crate::api::VCAP_CID_IS2_L0;
    use crate::api::ETH_P_ALL;
    use crate::api::ETH_P_IP;

    fn is2_rule() -> Rule {
        Rule::new(8, 1, 0, VCAP_CID_IS2_L0, VcapUser::TcFlower, 10, 0xc0)
            .unwrap()
    }

    #[test]
    fn alloc_errors() {
        let r = Rule::new(8, 1, 0, 42, VcapUser::TcFlower, 0, 0);
        assert!(matches!(r, Err(VcapError::Ext(ExtErr::NoAdmin))));

        let r =
            Rule::new(8, 1, 8, VCAP_CID_IS2_L0, VcapUser::TcFlower, 0, 0);
        assert!(matches!(r, Err(VcapError::Ext(ExtErr::NoNetdev))));
    }

    #[test]
    fn add_modify_remove() {
        let mut r = is2_rule();
        r.add_key_u32(KeyField::Etype, 0x0800, 0xffff).unwrap();
        r.add_key_u32(KeyField::Etype, 0x86dd, 0xffff).unwrap();
        assert_eq!(r.keys().len(), 1);
        assert_eq!(
            r.key(KeyField::Etype),
            Some(&KeyValue::U32 { value: 0x86dd, mask: 0xffff })
        );

        let bad = r.add_key_u32(KeyField::L2Dmac, 1, 1);
        assert!(matches!(bad, Err(VcapError::FieldKind { .. })));

        assert!(r.modify_key(KeyField::L2Smac, KeyValue::Bit {
            value: 0,
            mask: 0
        })
        .is_err());

        assert!(r.remove_key(KeyField::Etype));
        assert!(!r.remove_key(KeyField::Etype));
        assert!(r.keys().is_empty());
    }

    #[test]
    fn keyset_pins_fields() {
        let mut r = is2_rule();
        r.add_key_u48(KeyField::L2Dmac, [1, 2, 3, 4, 5, 6], [0xff; 6])
            .unwrap();
        r.set_keyset(Keyset::Is2MacEtype).unwrap();
        assert_eq!(r.actionset(), Some(Actionset::Is2BaseType));

        let err = r.add_key_u32(KeyField::L4Dport, 80, 0xffff);
        assert!(matches!(err, Err(VcapError::KeysetMismatch { .. })));
        assert!(matches!(
            r.set_keyset(Keyset::Is2MacLlc),
            Err(VcapError::KeysetFixed(Keyset::Is2MacEtype))
        ));

        let mut r = is2_rule();
        r.add_key_u32(KeyField::L4Dport, 80, 0xffff).unwrap();
        assert!(matches!(
            r.set_keyset(Keyset::Is2MacEtype),
            Err(VcapError::KeysetMismatch { field: KeyField::L4Dport, .. })
        ));
        assert_eq!(r.keyset(), None);
    }

    #[test]
    fn reduce_drops_only_implied() {
        let mut r = is2_rule();
        r.add_key_bit(KeyField::Ip4Is, true).unwrap();
        r.add_key_bit(KeyField::TcpUdpIs, true).unwrap();
        r.add_key_u32(KeyField::L4Dport, 22, 0xffff).unwrap();

        let dropped = r.reduce(Keyset::Is2Ip4TcpUdp).unwrap();
        assert_eq!(dropped, vec![KeyField::Ip4Is, KeyField::TcpUdpIs]);
        assert_eq!(r.keyset(), Some(Keyset::Is2Ip4TcpUdp));
        assert_eq!(r.key_fields(), vec![KeyField::L4Dport]);

        let mut r = is2_rule();
        r.add_key_bit(KeyField::Ip4Is, true).unwrap();
        r.add_key_u32(KeyField::L4Dport, 22, 0xffff).unwrap();
        assert!(r.reduce(Keyset::Is2Ip4Other).is_err());
        assert_eq!(r.keys().len(), 2);
    }

    #[test]
    fn reduce_keeps_contradicting_bit() {
        // An IPv4-only rule never fits an IPv6 layout.
        let mut r = is2_rule();
        r.add_key_bit(KeyField::Ip4Is, true).unwrap();
        assert!(matches!(
            r.reduce(Keyset::Is2Ip6Std),
            Err(VcapError::KeysetMismatch { field: KeyField::Ip4Is, .. })
        ));
        assert_eq!(r.key_fields(), vec![KeyField::Ip4Is]);
        assert_eq!(r.keyset(), None);

        let mut r = is2_rule();
        r.add_key_bit(KeyField::Ip4Is, false).unwrap();
        let dropped = r.reduce(Keyset::Is2Ip6Std).unwrap();
        assert_eq!(dropped, vec![KeyField::Ip4Is]);
        assert_eq!(r.keyset(), Some(Keyset::Is2Ip6Std));
    }

    #[test]
    fn validate_picks_port_keyset() {
        let ports = PortKeysets::new(8);
        let mut r = is2_rule();
        r.add_key_u32(KeyField::L4Dport, 22, 0xffff).unwrap();
        r.add_key_bit(KeyField::TcpIs, true).unwrap();
        r.add_action_bit(ActionField::CpuCopyEna, true).unwrap();
        r.validate(&ports, ETH_P_IP).unwrap();
        assert_eq!(r.keyset(), Some(Keyset::Is2Ip4TcpUdp));
        assert_eq!(r.exterr(), ExtErr::None);

        let mut r = is2_rule();
        r.add_key_u128(KeyField::L3Ip6Dip, [0; 16], [0xff; 16]).unwrap();
        assert_eq!(
            r.validate(&ports, ETH_P_IP),
            Err(ExtErr::NoPortKeysetMatch)
        );
        assert_eq!(r.exterr(), ExtErr::NoPortKeysetMatch);
        assert_eq!(r.keyset(), None);

        let mut r = is2_rule();
        r.add_action_bit(ActionField::VlanPopCntEna, true).unwrap();
        assert_eq!(
            r.validate(&ports, ETH_P_ALL),
            Err(ExtErr::NoActionsetMatch)
        );
    }

    #[test]
    fn copy_keeps_cookie() {
        let mut r = is2_rule();
        r.client_id = 7;
        r.add_key_bit(KeyField::L2Mc, true).unwrap();
        let c = r.copy();
        assert_eq!(c.cookie(), r.cookie());
        assert_eq!(c.client_id, 7);
        assert_eq!(c.keys(), r.keys());
        assert_eq!(c.id(), 0);
    }

    #[test]
    fn encode_geometry() {
        let mut r = is2_rule();
        // DMAC sits after TYPE(4) and the 36 bit IS2 head.
        r.add_key_u48(
            KeyField::L2Dmac,
            [0, 0, 0, 0, 0, 0x81],
            [0, 0, 0, 0, 0, 0xff],
        )
        .unwrap();
        r.add_action_u32(ActionField::CntId, 5).unwrap();
        r.set_keyset(Keyset::Is2MacEtype).unwrap();

        let enc = r.encode().unwrap();
        assert_eq!(enc.key.len(), 2);
        assert_eq!(enc.action.len(), 2);

        let sw0 = enc.key[0];
        // Type-group header of a two sub-word item.
        assert_eq!(sw0.value & 0b11, 0b10);
        assert_eq!(sw0.mask & 0b11, 0b11);
        // TYPE = 0 fully masked at payload bits 0..4.
        assert_eq!((sw0.mask >> 2) & 0xf, 0xf);
        assert_eq!((sw0.value >> 2) & 0xf, 0);
        // DMAC bits 0..8 at payload offset 40.
        assert_eq!((sw0.value >> 42) & 0xff, 0x81);
        assert_eq!((sw0.mask >> 42) & 0xffff, 0xff);

        assert_eq!(enc.action[0] & 0xfff, 5);
    }

    #[test]
    fn encode_wildcard_type() {
        let mut r =
            Rule::new(8, 1, 0, VCAP_CID_IS1_L0, VcapUser::TcFlower, 0, 0)
                .unwrap();
        r.set_keyset(Keyset::Is1Normal).unwrap();
        r.add_key_u32(KeyField::Type, 0, 0).unwrap();
        let enc = r.encode().unwrap();
        assert_eq!((enc.key[0].mask >> 2) & 1, 0);
    }
}

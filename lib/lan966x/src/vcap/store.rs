// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Committed rules.

use super::VcapError;
use super::model::vcap_info;
use super::rule::Rule;
use super::rule::RuleId;
use crate::api::PortId;
use crate::api::VcapType;

/// Where committed rules live. The hardware rule store is an external
/// collaborator; [`MemStore`] stands in for it.
pub trait RuleStore {
    /// Hand out an id no rule in the store carries.
    fn next_id(&mut self) -> RuleId;

    /// Add a rule.
    ///
    /// # Errors
    ///
    /// `NoSpace` if the rule's VCAP has no room for it.
    fn add(&mut self, rule: Rule) -> Result<RuleId, VcapError>;

    fn remove(&mut self, id: RuleId) -> Option<Rule>;

    fn get(&self, id: RuleId) -> Option<&Rule>;

    /// The first rule, in lookup order, carrying `cookie`.
    fn find_cookie(&self, cookie: u64) -> Option<RuleId>;

    /// Every rule carrying `cookie`, in lookup order.
    fn cookie_rules(&self, cookie: u64) -> Vec<RuleId>;

    /// Does any rule of `port` live in `chain`?
    fn chain_in_use(&self, port: PortId, chain: u32) -> bool;

    /// The packet counter of rule `id`, zeroed after reading if
    /// `clear` is set.
    fn read_counter(&mut self, id: RuleId, clear: bool) -> Option<u64>;

    fn dump(&self) -> Vec<StoreEntry>;
}

#[derive(Clone, Debug)]
pub struct StoreEntry {
    pub hits: u64,
    pub rule: Rule,
}

/// Rules kept in memory, in lookup order: by VCAP, then priority, then
/// id.
#[derive(Debug)]
pub struct MemStore {
    rules: Vec<StoreEntry>,
    next_id: RuleId,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self { rules: Vec::new(), next_id: 1 }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Sub-words used in `vtype`.
    pub fn used(&self, vtype: VcapType) -> u32 {
        self.rules
            .iter()
            .filter(|e| e.rule.vtype() == vtype)
            .filter_map(|e| e.rule.keyset())
            .map(|ks| ks.sw_per_item() as u32)
            .sum()
    }

    /// Count `packets` frames as matched by rule `id`.
    pub fn hit(&mut self, id: RuleId, packets: u64) -> bool {
        match self.rules.iter_mut().find(|e| e.rule.id() == id) {
            Some(e) => {
                e.hits += packets;
                true
            }
            None => false,
        }
    }

    // Find the position in which to insert this rule.
    fn find_pos(&self, rule: &Rule) -> usize {
        let key = |r: &Rule| (r.vtype(), r.priority(), r.id());
        self.rules
            .iter()
            .position(|e| key(rule) < key(&e.rule))
            .unwrap_or(self.rules.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoreEntry> {
        self.rules.iter()
    }
}

impl RuleStore for MemStore {
    fn next_id(&mut self) -> RuleId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn add(&mut self, rule: Rule) -> Result<RuleId, VcapError> {
        let vtype = rule.vtype();
        let need = rule.keyset().map(|ks| ks.sw_per_item()).unwrap_or(0);
        if self.used(vtype) + need as u32 > vcap_info(vtype).capacity() {
            return Err(VcapError::NoSpace(vtype));
        }

        let id = rule.id();
        let idx = self.find_pos(&rule);
        self.rules.insert(idx, StoreEntry { hits: 0, rule });
        Ok(id)
    }

    fn remove(&mut self, id: RuleId) -> Option<Rule> {
        let idx = self.rules.iter().position(|e| e.rule.id() == id)?;
        Some(self.rules.remove(idx).rule)
    }

    fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.iter().find(|e| e.rule.id() == id).map(|e| &e.rule)
    }

    fn find_cookie(&self, cookie: u64) -> Option<RuleId> {
        self.rules
            .iter()
            .find(|e| e.rule.cookie() == cookie)
            .map(|e| e.rule.id())
    }

    fn cookie_rules(&self, cookie: u64) -> Vec<RuleId> {
        self.rules
            .iter()
            .filter(|e| e.rule.cookie() == cookie)
            .map(|e| e.rule.id())
            .collect()
    }

    fn chain_in_use(&self, port: PortId, chain: u32) -> bool {
        self.rules
            .iter()
            .any(|e| e.rule.port() == port && e.rule.chain() == chain)
    }

    fn read_counter(&mut self, id: RuleId, clear: bool) -> Option<u64> {
        let e = self.rules.iter_mut().find(|e| e.rule.id() == id)?;
        let hits = e.hits;
        if clear {
            e.hits = 0;
        }
        Some(hits)
    }

    fn dump(&self) -> Vec<StoreEntry> {
        self.rules.clone()
    }
}

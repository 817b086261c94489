// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The VCAP rule compiler.
//!
//! A [`Vcap`] handle owns everything the compiler mutates: the rule
//! store, the per-port keyset table, the resource pools actions
//! reserve from, and the per-chain templates. All of it sits behind
//! one lock; a flow-offload request holds it for its whole duration.

pub mod flower;
pub mod model;
pub mod port;
pub mod resource;
pub mod rule;
pub mod select;
pub mod store;

use crate::ExecCtx;
use crate::api::ChainInfo;
use crate::api::ExtErr;
use crate::api::FlowOffload;
use crate::api::FlowStats;
use crate::api::PortId;
use crate::api::VcapType;
use crate::ddi::sync::KMutex;
use flower::ParseError;
use flower::template::Template;
use model::ActionField;
use model::Actionset;
use model::FieldKind;
use model::KeyField;
use model::Keyset;
use port::KeysetClass;
use port::PortKeysets;
use resource::ResourceError;
use resource::Resources;
use rule::Rule;
use rule::RuleId;
use rule::VcapUser;
use serde::Deserialize;
use serde::Serialize;
use store::MemStore;
use store::RuleStore;
use store::StoreEntry;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum VcapError {
    #[error("{0}")]
    Ext(ExtErr),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("Unsupported match key")]
    UnsupportedKey,

    #[error("field {field} expects a {expected} value")]
    FieldKind { field: &'static str, expected: FieldKind },

    #[error("keyset {keyset} has no field {field}")]
    KeysetMismatch { keyset: Keyset, field: KeyField },

    #[error("actionset {actionset} has no field {field}")]
    ActionsetMismatch { actionset: Actionset, field: ActionField },

    #[error("rule is already fixed to keyset {0}")]
    KeysetFixed(Keyset),

    #[error("rule has no field {0}")]
    NoSuchField(&'static str),

    #[error("keyset {keyset} cannot be used for {class} traffic")]
    IllegalPortKeyset { keyset: Keyset, class: KeysetClass },

    #[error("Cannot offload action {action} in {vtype}")]
    ActionNotSupported { action: String, vtype: VcapType },

    #[error("{0}")]
    InvalidAction(String),

    #[error("Invalid chain {0}")]
    InvalidChain(u32),

    #[error("Invalid goto chain {0}")]
    InvalidGoto(u32),

    #[error("{0}")]
    Resource(#[from] ResourceError),

    #[error("Rules exist in the chain")]
    Busy,

    #[error("no rule with cookie {0:#x}")]
    NotFound(u64),

    #[error("a rule with cookie {0:#x} already exists")]
    Exists(u64),

    #[error("{0} has no room for the rule")]
    NoSpace(VcapType),

    #[error("no template on port {port} chain {chain}")]
    NoTemplate { port: PortId, chain: u32 },
}

impl From<ExtErr> for VcapError {
    fn from(e: ExtErr) -> Self {
        Self::Ext(e)
    }
}

impl VcapError {
    /// The extended error message handed back to the flow-offload
    /// caller.
    pub fn ext_msg(&self) -> String {
        self.to_string()
    }

    /// The extended error code of the rule this error rejected, if it
    /// maps onto one.
    pub fn exterr(&self) -> Option<ExtErr> {
        match self {
            Self::Ext(e) => Some(*e),
            Self::KeysetMismatch { .. } | Self::KeysetFixed(_) => {
                Some(ExtErr::NoKeysetMatch)
            }
            Self::ActionsetMismatch { .. } => Some(ExtErr::NoActionsetMatch),
            Self::IllegalPortKeyset { .. } => Some(ExtErr::NoPortKeysetMatch),
            _ => None,
        }
    }
}

/// Sizing of a [`Vcap`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VcapConfig {
    pub num_ports: u8,
    pub policer_count: u32,
    pub sfid_count: u32,
    pub sgid_count: u32,
}

impl Default for VcapConfig {
    fn default() -> Self {
        Self {
            num_ports: 8,
            policer_count: 64,
            sfid_count: 256,
            sgid_count: 256,
        }
    }
}

pub(crate) struct VcapState<S> {
    pub(crate) cfg: VcapConfig,
    pub(crate) ports: PortKeysets,
    pub(crate) store: S,
    pub(crate) res: Resources,
    pub(crate) templates: Vec<Template>,
}

impl<S: RuleStore> VcapState<S> {
    pub(crate) fn rule_alloc(
        &mut self,
        port: PortId,
        chain: u32,
        user: VcapUser,
        priority: u16,
        cookie: u64,
    ) -> Result<Rule, VcapError> {
        let mut rule = Rule::new(
            self.cfg.num_ports,
            0,
            port,
            chain,
            user,
            priority,
            cookie,
        )?;
        rule.set_id(self.store.next_id());
        Ok(rule)
    }

    /// Add the keys every rule of its keyset carries, then place the
    /// rule in the store.
    pub(crate) fn commit(
        &mut self,
        mut rule: Rule,
    ) -> Result<RuleId, VcapError> {
        if rule.keyset().is_none() {
            return Err(ExtErr::NoKeysetMatch.into());
        }

        // Copies get their own id and with it their own counter.
        if rule.id() == 0 {
            let id = self.store.next_id();
            rule.set_id(id);
            if rule.has_action(ActionField::CntId) {
                rule.add_action_u32(ActionField::CntId, id)?;
            }
            if rule.has_action(ActionField::Esdx) {
                rule.add_action_u32(ActionField::Esdx, id)?;
            }
        }

        add_default_fields(&mut rule)?;
        self.store.add(rule)
    }

    pub(crate) fn template(
        &self,
        port: PortId,
        chain: u32,
    ) -> Option<&Template> {
        self.templates.iter().find(|t| t.port == port && t.chain == chain)
    }
}

fn add_default_fields(rule: &mut Rule) -> Result<(), VcapError> {
    let keyset = rule.keyset().ok_or(ExtErr::NoKeysetMatch)?;
    let ci = ChainInfo::new(rule.chain()).ok_or(ExtErr::NoAdmin)?;
    let port = rule.port() as u32;

    match rule.vtype() {
        VcapType::Is1 | VcapType::Is2 => {
            if keyset.contains(KeyField::IfIgrPortMask) {
                let mask = 1 << port;
                rule.add_key_u32(KeyField::IfIgrPortMask, mask, mask)?;
            }
        }

        VcapType::Es0 => {
            if keyset.contains(KeyField::IfEgrPort) {
                rule.add_key_u32(KeyField::IfEgrPort, port, 0xf)?;
            }
        }
    }

    if rule.vtype() == VcapType::Is2 && keyset.contains(KeyField::First) {
        rule.add_key_bit(KeyField::First, ci.is_first_lookup())?;
    }

    Ok(())
}

/// A handle on the VCAP instances of one switch.
pub struct Vcap<S = MemStore> {
    ectx: ExecCtx,
    state: KMutex<VcapState<S>>,
}

impl Vcap<MemStore> {
    pub fn new(ectx: ExecCtx, cfg: VcapConfig) -> Self {
        Self::new_with_store(ectx, cfg, MemStore::new())
    }
}

impl<S: RuleStore> Vcap<S> {
    pub fn new_with_store(ectx: ExecCtx, cfg: VcapConfig, store: S) -> Self {
        let state = VcapState {
            cfg,
            ports: PortKeysets::new(cfg.num_ports),
            store,
            res: Resources::new(
                cfg.policer_count,
                cfg.sfid_count,
                cfg.sgid_count,
            ),
            templates: Vec::new(),
        };

        Self { ectx, state: KMutex::new(state) }
    }

    pub fn config(&self) -> VcapConfig {
        self.state.lock().cfg
    }

    /// Allocate an empty rule with a fresh id.
    pub fn rule_alloc(
        &self,
        port: PortId,
        chain: u32,
        user: VcapUser,
        priority: u16,
        cookie: u64,
    ) -> Result<Rule, VcapError> {
        self.state.lock().rule_alloc(port, chain, user, priority, cookie)
    }

    /// Validate `rule` against the current port keysets.
    pub fn validate(
        &self,
        rule: &mut Rule,
        l3_proto: u16,
    ) -> Result<(), ExtErr> {
        rule.validate(&self.state.lock().ports, l3_proto)
    }

    /// Place a validated rule in the store.
    pub fn commit(&self, rule: Rule) -> Result<RuleId, VcapError> {
        self.state.lock().commit(rule)
    }

    /// Remove a rule from the store without touching any resource it
    /// holds.
    pub fn remove(&self, id: RuleId) -> Option<Rule> {
        self.state.lock().store.remove(id)
    }

    pub fn get_port_keyset(
        &self,
        port: PortId,
        chain: u32,
        l3_proto: u16,
    ) -> Result<Vec<Keyset>, VcapError> {
        self.state.lock().ports.get_port_keyset(port, chain, l3_proto)
    }

    pub fn set_port_keyset(
        &self,
        port: PortId,
        chain: u32,
        l3_proto: u16,
        l4_proto: u8,
        keyset: Keyset,
    ) -> Result<(), VcapError> {
        self.state
            .lock()
            .ports
            .set_port_keyset(port, chain, l3_proto, l4_proto, keyset)
            .map(|_| ())
    }

    /// Handle one flow-offload request. Only `Stats` returns a value.
    pub fn flower(
        &self,
        req: &FlowOffload,
    ) -> Result<Option<FlowStats>, VcapError> {
        let mut state = self.state.lock();
        flower::offload(&self.ectx, &mut state, req)
    }

    /// Run `f` with the rule store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.state.lock().store)
    }

    pub fn dump_rules(&self) -> Vec<StoreEntry> {
        self.state.lock().store.dump()
    }

    pub fn dump_port_keysets(
        &self,
    ) -> Vec<(PortId, VcapType, u8, KeysetClass, Keyset)> {
        self.state.lock().ports.iter().collect()
    }

    pub fn dump_templates(&self) -> Vec<Template> {
        self.state.lock().templates.clone()
    }

    /// Policers, stream filters and stream gates in use.
    pub fn resources_in_use(&self) -> (u32, u32, u32) {
        let state = self.state.lock();
        (
            state.res.policers.in_use(),
            state.res.sfid.in_use(),
            state.res.sgid.in_use(),
        )
    }

    /// The mirror monitor port and the number of rules mirroring to it.
    pub fn mirror(&self) -> (Option<PortId>, u32) {
        let state = self.state.lock();
        (state.res.mirror.port(), state.res.mirror.users())
    }
}

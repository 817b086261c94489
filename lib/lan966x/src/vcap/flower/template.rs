// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Chain templates.
//!
//! A template pins the keyset every rule of a port's chain is placed
//! in. Creating one may reconfigure the port to use that keyset for
//! the template's protocol; destroying it puts the old keysets back.
//! The caller removes the chain's rules before destroying its
//! template.

use super::dissect::BasicKeyMode;
use super::dissect::dissect;
use crate::ExecCtx;
use crate::LogLevel;
use crate::api::FlowOffload;
use crate::api::PortId;
use crate::vcap::VcapError;
use crate::vcap::VcapState;
use crate::vcap::model;
use crate::vcap::model::Keyset;
use crate::vcap::port::KeysetClass;
use crate::vcap::rule::Rule;
use crate::vcap::rule::VcapUser;
use crate::vcap::select::select;
use crate::vcap::store::RuleStore;

#[derive(Clone, Debug)]
pub struct Template {
    pub port: PortId,
    pub chain: u32,
    pub l3_proto: u16,
    pub keyset: Keyset,
    saved: Vec<(KeysetClass, Keyset)>,
}

impl Template {
    /// The port keysets this template replaced.
    pub fn saved(&self) -> &[(KeysetClass, Keyset)] {
        &self.saved
    }
}

pub(crate) fn create<S: RuleStore>(
    ectx: &ExecCtx,
    state: &mut VcapState<S>,
    req: &FlowOffload,
) -> Result<(), VcapError> {
    let (port, chain) = (req.port, req.chain);
    if state.template(port, chain).is_some()
        || state.store.chain_in_use(port, chain)
    {
        return Err(VcapError::Busy);
    }

    let mut scratch = Rule::new(
        state.cfg.num_ports,
        0,
        port,
        chain,
        VcapUser::TcFlower,
        req.prio,
        req.cookie,
    )?;
    let d = dissect(
        &mut scratch,
        &req.matches,
        req.protocol,
        BasicKeyMode::Normal,
    )?;

    // Only keysets the port may use for every class the template
    // covers.
    let vtype = scratch.vtype();
    let classes = KeysetClass::for_l3_l4(d.l3_proto, d.l4_proto);
    let usable: Vec<Keyset> = model::keysets(vtype)
        .filter(|ks| classes.iter().all(|c| c.legal(vtype).contains(ks)))
        .collect();

    let sel = select(&scratch.key_fields(), &usable);
    let keyset = match (sel.exact(), sel.best_match) {
        (Some(ks), _) => ks,
        (None, Some(ks))
            if sel
                .unmatched_keys
                .iter()
                .all(|f| ks.info().implies(*f)) =>
        {
            ks
        }
        _ => return Err(crate::api::ExtErr::NoKeysetMatch.into()),
    };

    let current = state.ports.get_port_keyset(port, chain, d.l3_proto)?;
    let saved = if current != [keyset] {
        let saved = state.ports.set_port_keyset(
            port,
            chain,
            d.l3_proto,
            d.l4_proto,
            keyset,
        )?;
        ectx.log.log(
            LogLevel::Note,
            &format!(
                "port {port} chain {chain}: keyset {keyset} for \
                 protocol {:#06x}",
                d.l3_proto
            ),
        );
        saved
    } else {
        Vec::new()
    };

    state.templates.push(Template {
        port,
        chain,
        l3_proto: d.l3_proto,
        keyset,
        saved,
    });
    Ok(())
}

pub(crate) fn destroy<S: RuleStore>(
    ectx: &ExecCtx,
    state: &mut VcapState<S>,
    req: &FlowOffload,
) -> Result<(), VcapError> {
    let (port, chain) = (req.port, req.chain);
    let idx = state
        .templates
        .iter()
        .position(|t| t.port == port && t.chain == chain)
        .ok_or(VcapError::NoTemplate { port, chain })?;

    let t = state.templates.remove(idx);
    if !t.saved.is_empty() {
        state.ports.restore(port, chain, &t.saved)?;
        ectx.log.log(
            LogLevel::Note,
            &format!(
                "port {port} chain {chain}: keysets restored for \
                 protocol {:#06x}",
                t.l3_proto
            ),
        );
    }
    Ok(())
}

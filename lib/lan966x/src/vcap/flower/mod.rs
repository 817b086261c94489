// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The flower offload compiler.
//!
//! A `Replace` request is compiled into one primary rule and, when the
//! filter matches every protocol, auxiliary rules covering the port
//! keysets the primary cannot share a row layout with. All rules of a
//! request carry its cookie; resources reserved by its actions belong
//! to the primary.
//!
//! Compilation either commits every rule or none. Resources reserved
//! along the way are given back on every failure path.

pub mod action;
pub mod dissect;
pub mod template;

pub use dissect::BasicKeyMode;
pub use dissect::Dissected;
pub use dissect::ParseError;
pub use dissect::dissect;

use super::VcapError;
use super::VcapState;
use super::model;
use super::model::ActionField;
use super::model::KeyField;
use super::model::Keyset;
use super::resource::FiniteResource;
use super::resource::Reservation;
use super::resource::Resources;
use super::rule::Rule;
use super::rule::RuleId;
use super::rule::VcapUser;
use super::select::TypeWildcard;
use super::select::group_by_size;
use super::select::select;
use super::store::RuleStore;
use crate::ExecCtx;
use crate::LogLevel;
use crate::api::ETH_P_ALL;
use crate::api::ExtErr;
use crate::api::FlowCommand;
use crate::api::FlowOffload;
use crate::api::FlowStats;
use crate::api::StatsFreshness;
use crate::api::VcapType;

/// Handle one flow-offload request. Only `Stats` returns a value.
pub(crate) fn offload<S: RuleStore>(
    ectx: &ExecCtx,
    state: &mut VcapState<S>,
    req: &FlowOffload,
) -> Result<Option<FlowStats>, VcapError> {
    match req.command {
        FlowCommand::Replace => {
            let res = replace(state, req);
            if let Err(e) = &res {
                ectx.log.log(
                    LogLevel::Note,
                    &format!(
                        "port {} chain {} cookie {:#x}: {}",
                        req.port,
                        req.chain,
                        req.cookie,
                        e.ext_msg()
                    ),
                );
            }
            res.map(|_| None)
        }

        FlowCommand::Destroy => destroy(state, req.cookie).map(|_| None),
        FlowCommand::Stats => stats(state, req.cookie).map(Some),
        FlowCommand::TemplateCreate => {
            template::create(ectx, state, req).map(|_| None)
        }
        FlowCommand::TemplateDestroy => {
            template::destroy(ectx, state, req).map(|_| None)
        }
    }
}

fn release_all(res: &mut Resources, reserved: Vec<Reservation>) {
    for r in reserved.into_iter().rev() {
        r.release(res);
    }
}

/// Compile and commit the rules of `req`. Return the ids committed,
/// primary first.
fn replace<S: RuleStore>(
    state: &mut VcapState<S>,
    req: &FlowOffload,
) -> Result<Vec<RuleId>, VcapError> {
    if state.store.find_cookie(req.cookie).is_some() {
        return Err(VcapError::Exists(req.cookie));
    }

    let mut rule = state.rule_alloc(
        req.port,
        req.chain,
        VcapUser::TcFlower,
        req.prio,
        req.cookie,
    )?;

    let blank = rule.clone();
    let tmpl = state
        .template(req.port, req.chain)
        .map(|t| (t.l3_proto, t.keyset));
    let mode = match tmpl {
        Some((_, Keyset::Is1NormalIp6)) => BasicKeyMode::NormalIp6,
        _ => BasicKeyMode::Normal,
    };

    let mut d = dissect(&mut rule, &req.matches, req.protocol, mode)?;
    let pinned = match tmpl {
        Some((proto, ks)) if same_proto(proto, d.l3_proto) => Some(ks),
        // A template for another protocol leaves the rule to the
        // port's keysets.
        Some(_) => {
            if mode != BasicKeyMode::Normal {
                rule = blank;
                d = dissect(
                    &mut rule,
                    &req.matches,
                    req.protocol,
                    BasicKeyMode::Normal,
                )?;
            }
            None
        }
        None => None,
    };
    if let Some(ks) = pinned {
        rule.reduce(ks).map_err(|_| ExtErr::NoKeysetMatch)?;
    }

    action::add_link_keys(&mut rule)?;
    action::add_counter(&mut rule)?;

    let mut reserved = Vec::new();
    let res = action::apply_actions(
        &mut rule,
        &req.actions,
        &state.cfg,
        &mut state.res,
        &mut reserved,
    )
    .and_then(|_| place(state, rule, pinned.is_some(), d.l3_proto));

    let (rule, aux) = match res {
        Ok(placed) => placed,
        Err(e) => {
            release_all(&mut state.res, reserved);
            return Err(e);
        }
    };

    let mut committed = Vec::new();
    for r in std::iter::once(rule).chain(aux) {
        match state.commit(r) {
            Ok(id) => committed.push(id),
            Err(e) => {
                for id in committed {
                    state.store.remove(id);
                }
                release_all(&mut state.res, reserved);
                return Err(e);
            }
        }
    }

    Ok(committed)
}

fn same_proto(a: u16, b: u16) -> bool {
    a == b || a == ETH_P_ALL || b == ETH_P_ALL
}

/// Pin `rule` to a keyset of its port and build the auxiliary rules
/// it needs. Nothing is committed.
fn place<S: RuleStore>(
    state: &VcapState<S>,
    mut rule: Rule,
    pinned: bool,
    l3_proto: u16,
) -> Result<(Rule, Vec<Rule>), VcapError> {
    if pinned {
        rule.validate(&state.ports, l3_proto)?;
        return Ok((rule, Vec::new()));
    }

    let groups = select_keysets(state, &mut rule, l3_proto)?;
    if l3_proto != ETH_P_ALL {
        return Ok((rule, Vec::new()));
    }

    let mut aux = Vec::new();
    for group in groups.iter().skip(1) {
        let mut r = rule.copy();
        r.set_user(VcapUser::TcExtra);
        r.clear_keyset();
        r.remove_key(KeyField::Type);
        pin(&mut r, group)?;
        r.validate(&state.ports, l3_proto)?;
        aux.push(r);
    }

    Ok((rule, aux))
}

/// Pin `rule` to the first keyset of `group`, covering the rest of the
/// group with a wildcarded `TYPE`.
fn pin(rule: &mut Rule, group: &[Keyset]) -> Result<(), VcapError> {
    let Some(first) = group.first() else {
        return Err(ExtErr::NoKeysetMatch.into());
    };

    rule.set_keyset(*first)?;
    if group.len() > 1 {
        let tw = TypeWildcard::for_keysets(group);
        rule.add_key_u32(KeyField::Type, tw.value, tw.mask)?;
    }
    Ok(())
}

/// Place `rule` in a keyset and return the size groups of port
/// keysets it can be placed in, the group it was placed in first.
///
/// The preferred placement is the port keysets holding every field of
/// the rule. Failing that, the rule is validated against the port's
/// keysets as they are, and as a last resort reduced into the port
/// keyset missing only fields it implies.
fn select_keysets<S: RuleStore>(
    state: &VcapState<S>,
    rule: &mut Rule,
    l3_proto: u16,
) -> Result<Vec<Vec<Keyset>>, VcapError> {
    let vtype = rule.vtype();
    let fields = rule.key_fields();
    let admin: Vec<Keyset> = model::keysets(vtype).collect();
    let sel = select(&fields, &admin);
    let port_ks =
        state.ports.get_port_keyset(rule.port(), rule.chain(), l3_proto)?;

    let candidates: Vec<Keyset> = match vtype {
        VcapType::Es0 => sel.matches.clone(),
        VcapType::Is1 | VcapType::Is2 => sel
            .matches
            .iter()
            .copied()
            .filter(|ks| port_ks.contains(ks))
            .collect(),
    };

    let groups = group_by_size(&candidates);
    if let Some(first) = groups.first() {
        pin(rule, first)?;
        if rule.validate(&state.ports, l3_proto).is_ok() {
            return Ok(groups);
        }
        rule.clear_keyset();
        rule.remove_key(KeyField::Type);
    }

    let err = match rule.validate(&state.ports, l3_proto) {
        Ok(_) => return Ok(Vec::new()),
        Err(e) => e,
    };

    let psel = select(&fields, &port_ks);
    match psel.best_match {
        Some(ks)
            if !psel.unmatched_keys.is_empty()
                && psel
                    .unmatched_keys
                    .iter()
                    .all(|f| ks.info().implies(*f)) =>
        {
            rule.reduce(ks)?;
            rule.validate(&state.ports, l3_proto)?;
            Ok(Vec::new())
        }
        _ if sel.matches.is_empty() => Err(ExtErr::NoKeysetMatch.into()),
        _ => Err(err.into()),
    }
}

/// Remove every rule carrying `cookie`. The resources of the request
/// are released once, from the first rule found.
fn destroy<S: RuleStore>(
    state: &mut VcapState<S>,
    cookie: u64,
) -> Result<(), VcapError> {
    let mut found = false;

    while let Some(id) = state.store.find_cookie(cookie) {
        let Some(rule) = state.store.remove(id) else {
            break;
        };

        if !found {
            release_rule(&mut state.res, &rule);
            found = true;
        }
    }

    if !found {
        return Err(VcapError::NotFound(cookie));
    }
    Ok(())
}

/// Give back the resources the actions of `rule` reserved.
fn release_rule(res: &mut Resources, rule: &Rule) {
    let user = VcapUser::TcFlower;

    if rule.has_action(ActionField::PoliceEna) {
        let key = (user, rule.client_id);
        if let Some(entry) = res.policers.lookup(&key) {
            res.policers.release(&key, entry);
        }
    }

    if rule.has_action(ActionField::MirrorEna) {
        res.mirror.release();
    }

    let gate = rule
        .action(ActionField::SgidVal)
        .map(|v| (user, v.as_u32()))
        .filter(|_| rule.has_action(ActionField::SgidEna));
    if let Some(key) = gate {
        if rule.has_action(ActionField::SfidEna) {
            if let Some(entry) = res.sfid.lookup(&key) {
                res.sfid.release(&key, entry);
            }
        }
        if let Some(entry) = res.sgid.lookup(&key) {
            res.sgid.release(&key, entry);
        }
    }
}

/// Sum and clear the counters of every rule carrying `cookie`.
fn stats<S: RuleStore>(
    state: &mut VcapState<S>,
    cookie: u64,
) -> Result<FlowStats, VcapError> {
    let ids = state.store.cookie_rules(cookie);
    if ids.is_empty() {
        return Err(VcapError::NotFound(cookie));
    }

    let packets = ids
        .into_iter()
        .filter_map(|id| state.store.read_counter(id, true))
        .sum();

    // The hardware keeps no per-rule drop counter.
    Ok(FlowStats { packets, drops: 0, used: StatsFreshness::Immediate })
}

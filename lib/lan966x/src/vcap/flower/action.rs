// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Flow actions to rule actions.

use crate::api::ChainInfo;
use crate::api::ETH_P_8021AD;
use crate::api::ETH_P_8021Q;
use crate::api::ExtErr;
use crate::api::FlowAction;
use crate::api::GateEntry;
use crate::api::PortId;
use crate::api::VcapType;
use crate::vcap::VcapConfig;
use crate::vcap::VcapError;
use crate::vcap::model::ActionField;
use crate::vcap::model::KeyField;
use crate::vcap::resource::FiniteResource;
use crate::vcap::resource::Reservation;
use crate::vcap::resource::Resources;
use crate::vcap::rule::Rule;
use crate::vcap::rule::VcapUser;

/// Gate control lists hold at most this many entries.
pub const GATE_MAX_ENTRIES: usize = 4;

const PAG_MAX: u32 = 0xff;
const IDX_MAX: u32 = 0xfff;

/// Mask modes of the IS2 forwarding override.
const MASK_MODE_REPLACE: u32 = 1;
const MASK_MODE_REDIRECT: u32 = 3;

/// ES0 outer tag operations.
const PUSH_TAG_A: u32 = 1;
const PUSH_FORCE_REWRITE: u32 = 3;

fn only(
    action: &FlowAction,
    vtype: VcapType,
    allowed: VcapType,
) -> Result<(), VcapError> {
    if vtype != allowed {
        return Err(VcapError::ActionNotSupported {
            action: action.name().to_string(),
            vtype,
        });
    }
    Ok(())
}

fn check_port(cfg: &VcapConfig, port: PortId) -> Result<(), VcapError> {
    if port >= cfg.num_ports {
        return Err(ExtErr::NoNetdev.into());
    }
    Ok(())
}

/// Add the action fields of `actions` to `rule`, in order.
///
/// Every resource reserved along the way is pushed onto `reserved`,
/// also when a later action fails; giving them back is up to the
/// caller.
pub fn apply_actions(
    rule: &mut Rule,
    actions: &[FlowAction],
    cfg: &VcapConfig,
    res: &mut Resources,
    reserved: &mut Vec<Reservation>,
) -> Result<(), VcapError> {
    for action in actions {
        apply(rule, action, cfg, res, reserved)?;
    }
    Ok(())
}

fn apply(
    rule: &mut Rule,
    action: &FlowAction,
    cfg: &VcapConfig,
    res: &mut Resources,
    reserved: &mut Vec<Reservation>,
) -> Result<(), VcapError> {
    let vtype = rule.vtype();

    match action {
        FlowAction::Accept => (),

        FlowAction::Trap => {
            only(action, vtype, VcapType::Is2)?;
            rule.add_action_bit(ActionField::CpuCopyEna, true)?;
            rule.add_action_u32(ActionField::CpuQuNum, 0)?;
            rule.add_action_u32(ActionField::MaskMode, MASK_MODE_REPLACE)?;
            rule.add_action_u32(ActionField::PortMask, 0)?;
        }

        FlowAction::Drop => {
            only(action, vtype, VcapType::Is2)?;
            rule.add_action_u32(ActionField::MaskMode, MASK_MODE_REPLACE)?;
            rule.add_action_u32(ActionField::PortMask, 0)?;
        }

        FlowAction::Mirror { port } => {
            only(action, vtype, VcapType::Is2)?;
            check_port(cfg, *port)?;
            res.mirror.reserve(*port, rule.port())?;
            reserved.push(Reservation::Mirror);
            rule.add_action_bit(ActionField::MirrorEna, true)?;
        }

        FlowAction::Redirect { port } => {
            only(action, vtype, VcapType::Is2)?;
            check_port(cfg, *port)?;
            rule.add_action_u32(ActionField::MaskMode, MASK_MODE_REDIRECT)?;
            rule.add_action_u32(ActionField::PortMask, 1 << *port)?;
        }

        FlowAction::Police { index, rate, .. } => {
            only(action, vtype, VcapType::Is2)?;
            if *rate == 0 {
                return Err(VcapError::InvalidAction(
                    "Police rate must be non-zero".to_string(),
                ));
            }

            let key = (VcapUser::TcFlower, *index);
            let entry = res.policers.obtain_raw(&key)?;
            reserved.push(Reservation::Policer { key, entry });
            rule.add_action_bit(ActionField::PoliceEna, true)?;
            rule.add_action_u32(ActionField::PoliceIdx, entry.0)?;
            rule.client_id = *index;
        }

        FlowAction::VlanPop => {
            only(action, vtype, VcapType::Is1)?;
            rule.add_action_bit(ActionField::VlanPopCntEna, true)?;
            rule.add_action_u32(ActionField::VlanPopCnt, 1)?;
        }

        FlowAction::Priority { prio } => {
            only(action, vtype, VcapType::Is1)?;
            if *prio > 7 {
                return Err(VcapError::InvalidAction(format!(
                    "Invalid skbedit priority {prio}"
                )));
            }
            rule.add_action_bit(ActionField::QosEna, true)?;
            rule.add_action_u32(ActionField::QosVal, *prio)?;
        }

        FlowAction::Gate { index, prio, entries, .. } => {
            only(action, vtype, VcapType::Is1)?;
            gate(rule, *index, *prio, entries, cfg, res, reserved)?;
        }

        FlowAction::VlanMangle { vid, prio } => {
            if *vid > 4095 || *prio > 7 {
                return Err(VcapError::InvalidAction(format!(
                    "Invalid vlan modify {vid}/{prio}"
                )));
            }

            match vtype {
                VcapType::Is1 => {
                    rule.add_action_bit(ActionField::VidReplaceEna, true)?;
                    rule.add_action_u32(ActionField::VidAddVal, *vid as u32)?;
                    rule.add_action_bit(ActionField::PcpEna, true)?;
                    rule.add_action_u32(ActionField::PcpVal, *prio as u32)?;
                }
                VcapType::Es0 => {
                    rule.add_action_u32(
                        ActionField::PushOuterTag,
                        PUSH_FORCE_REWRITE,
                    )?;
                    rule.add_action_u32(ActionField::VidAVal, *vid as u32)?;
                    rule.add_action_u32(ActionField::PcpAVal, *prio as u32)?;
                }
                VcapType::Is2 => {
                    return Err(VcapError::ActionNotSupported {
                        action: action.name().to_string(),
                        vtype,
                    });
                }
            }
        }

        FlowAction::VlanPush { vid, prio, tpid } => {
            only(action, vtype, VcapType::Es0)?;
            let sel = match *tpid {
                ETH_P_8021Q => 0,
                ETH_P_8021AD => 1,
                _ => {
                    return Err(VcapError::InvalidAction(format!(
                        "Invalid vlan proto {tpid:#06x}"
                    )));
                }
            };
            if *vid > 4095 || *prio > 7 {
                return Err(VcapError::InvalidAction(format!(
                    "Invalid vlan push {vid}/{prio}"
                )));
            }
            rule.add_action_u32(ActionField::PushOuterTag, PUSH_TAG_A)?;
            rule.add_action_u32(ActionField::TagATpidSel, sel)?;
            rule.add_action_u32(ActionField::VidAVal, *vid as u32)?;
            rule.add_action_u32(ActionField::PcpAVal, *prio as u32)?;
        }

        FlowAction::Goto { chain } => goto(rule, *chain)?,

        FlowAction::Other { .. } => {
            return Err(VcapError::ActionNotSupported {
                action: action.name().to_string(),
                vtype,
            });
        }
    }

    Ok(())
}

fn gate(
    rule: &mut Rule,
    index: u32,
    prio: i32,
    entries: &[GateEntry],
    cfg: &VcapConfig,
    res: &mut Resources,
    reserved: &mut Vec<Reservation>,
) -> Result<(), VcapError> {
    if index >= cfg.sgid_count {
        return Err(VcapError::InvalidAction(format!(
            "Invalid gate index {index}"
        )));
    }
    if !(-1..=7).contains(&prio) {
        return Err(VcapError::InvalidAction(format!(
            "Invalid gate priority {prio}"
        )));
    }
    if entries.is_empty() || entries.len() > GATE_MAX_ENTRIES {
        return Err(VcapError::InvalidAction(format!(
            "Invalid number of gate entries {}",
            entries.len()
        )));
    }

    let key = (VcapUser::TcFlower, index);
    let sfid = res.sfid.obtain_raw(&key)?;
    reserved.push(Reservation::Sfid { key, entry: sfid });
    let sgid = res.sgid.obtain_raw(&key)?;
    reserved.push(Reservation::Sgid { key, entry: sgid });

    rule.add_action_bit(ActionField::SfidEna, true)?;
    rule.add_action_u32(ActionField::SfidVal, sfid.0)?;
    rule.add_action_bit(ActionField::SgidEna, true)?;
    rule.add_action_u32(ActionField::SgidVal, sgid.0)?;
    Ok(())
}

/// Link `rule` to the later lookup serving `target`.
///
/// From IS1 the link value (the offset of `target` within its lookup)
/// is handed to the next lookup, which must match it with
/// [`add_link_keys`]. IS2 and ES0 cannot pass anything on, so they may
/// only continue at the base chain of a later lookup.
fn goto(rule: &mut Rule, target: u32) -> Result<(), VcapError> {
    let ci = ChainInfo::new(rule.chain())
        .ok_or(VcapError::InvalidChain(rule.chain()))?;
    let tci = ChainInfo::new(target).ok_or(VcapError::InvalidGoto(target))?;

    if (tci.vtype, tci.lookup) <= (ci.vtype, ci.lookup) {
        return Err(VcapError::InvalidGoto(target));
    }

    match ci.vtype {
        VcapType::Is1 => match tci.vtype {
            VcapType::Is1 => {
                if tci.link > IDX_MAX {
                    return Err(VcapError::InvalidGoto(target));
                }
                if tci.link != 0 {
                    rule.add_action_u32(ActionField::NxtIdxCtrl, 1)?;
                    rule.add_action_u32(ActionField::NxtIdx, tci.link)?;
                }
            }
            VcapType::Is2 => {
                if tci.link > PAG_MAX {
                    return Err(VcapError::InvalidGoto(target));
                }
                rule.add_action_u32(ActionField::PagOverrideMask, PAG_MAX)?;
                rule.add_action_u32(ActionField::PagVal, tci.link)?;
            }
            VcapType::Es0 => {
                if tci.link > IDX_MAX {
                    return Err(VcapError::InvalidGoto(target));
                }
                rule.add_action_bit(ActionField::IsdxAddReplaceSel, true)?;
                rule.add_action_u32(ActionField::IsdxVal, tci.link)?;
            }
        },

        VcapType::Is2 | VcapType::Es0 => {
            if !tci.is_base() {
                return Err(VcapError::InvalidGoto(target));
            }
        }
    }

    Ok(())
}

/// Match the link value an earlier lookup handed to the chain of
/// `rule`, if the chain is a goto target.
pub fn add_link_keys(rule: &mut Rule) -> Result<(), VcapError> {
    let chain = rule.chain();
    let ci = ChainInfo::new(chain).ok_or(VcapError::InvalidChain(chain))?;
    if ci.is_base() {
        return Ok(());
    }

    match ci.vtype {
        VcapType::Is1 => {
            if ci.link > IDX_MAX {
                return Err(VcapError::InvalidChain(chain));
            }
            rule.add_key_u32(KeyField::LookupGenIdxSel, 1, 0x3)?;
            rule.add_key_u32(KeyField::LookupGenIdx, ci.link, IDX_MAX)?;
        }
        VcapType::Is2 => {
            if ci.link > PAG_MAX {
                return Err(VcapError::InvalidChain(chain));
            }
            rule.add_key_u32(KeyField::LookupPag, ci.link, PAG_MAX)?;
        }
        VcapType::Es0 => {
            if ci.link > IDX_MAX {
                return Err(VcapError::InvalidChain(chain));
            }
            rule.add_key_u32(KeyField::IsdxCls, ci.link, IDX_MAX)?;
        }
    }

    Ok(())
}

/// Count frames hitting `rule` in the counter named by its id.
pub fn add_counter(rule: &mut Rule) -> Result<(), VcapError> {
    match rule.vtype() {
        VcapType::Is1 | VcapType::Is2 => {
            rule.add_action_u32(ActionField::CntId, rule.id())
        }
        VcapType::Es0 => rule.add_action_u32(ActionField::Esdx, rule.id()),
    }
}

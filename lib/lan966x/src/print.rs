// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print engine state in a human-friendly manner.
//!
//! These are shared by `vcapadm` and the integration tests.

use crate::api::PortId;
use crate::api::VcapType;
use crate::fdma::ChannelStats;
use crate::vcap::flower::template::Template;
use crate::vcap::model;
use crate::vcap::model::Keyset;
use crate::vcap::port::KeysetClass;
use crate::vcap::rule::EncodedRule;
use crate::vcap::rule::Rule;
use crate::vcap::store::StoreEntry;
use itertools::Itertools;
use std::io::Write;
use tabwriter::TabWriter;

/// Print the rules of a store dump, in lookup order.
pub fn print_rules(rules: &[StoreEntry]) -> std::io::Result<()> {
    print_rules_into(&mut std::io::stdout(), rules)
}

/// Print the rules of a store dump into a given writer.
pub fn print_rules_into(
    writer: &mut impl Write,
    rules: &[StoreEntry],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(
        t,
        "ID\tVCAP\tPORT\tCHAIN\tPRI\tCOOKIE\tUSER\tKEYSET\tHITS\tKEYS\tACTIONS"
    )?;
    write_hr(&mut t)?;
    for e in rules {
        print_rule(&mut t, e.hits, &e.rule)?;
    }
    t.flush()
}

fn print_rule(
    t: &mut impl Write,
    hits: u64,
    rule: &Rule,
) -> std::io::Result<()> {
    let keyset = rule.keyset().map(|ks| ks.to_string());
    let keys = rule
        .keys()
        .iter()
        .map(|k| format!("{}={}", k.field, k.value))
        .join(",");
    let actions = rule
        .actions()
        .iter()
        .map(|a| format!("{}={}", a.field, a.value))
        .join(",");
    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{:#x}\t{}\t{}\t{hits}\t{keys}\t{actions}",
        rule.id(),
        rule.vtype(),
        rule.port(),
        rule.chain(),
        rule.priority(),
        rule.cookie(),
        rule.user(),
        keyset.as_deref().unwrap_or("-"),
    )
}

/// Print the hardware image of a rule.
pub fn print_encoded(enc: &EncodedRule) -> std::io::Result<()> {
    print_encoded_into(&mut std::io::stdout(), enc)
}

/// Print the hardware image of a rule into a given writer.
pub fn print_encoded_into(
    writer: &mut impl Write,
    enc: &EncodedRule,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "{} / {}", enc.keyset, enc.actionset)?;
    writeln!(t, "SW\tVALUE\tMASK")?;
    for (i, sw) in enc.key.iter().enumerate() {
        writeln!(t, "{i}\t{:#034x}\t{:#034x}", sw.value, sw.mask)?;
    }
    for (i, word) in enc.action.iter().enumerate() {
        writeln!(t, "A{i}\t{word:#034x}\t")?;
    }
    t.flush()
}

/// Print the keyset catalog of `vtype`, or of every VCAP.
pub fn print_keysets(vtype: Option<VcapType>) -> std::io::Result<()> {
    print_keysets_into(&mut std::io::stdout(), vtype)
}

/// Print the keyset catalog into a given writer.
pub fn print_keysets_into(
    writer: &mut impl Write,
    vtype: Option<VcapType>,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "VCAP\tKEYSET\tTYPE\tSW\tACTIONSET\tFIELDS")?;
    write_hr(&mut t)?;
    let vtypes = match vtype {
        Some(vt) => vec![vt],
        None => vec![VcapType::Is1, VcapType::Is2, VcapType::Es0],
    };
    for vt in vtypes {
        for ks in model::keysets(vt) {
            let info = ks.info();
            let ty = if info.type_id < 0 {
                "-".to_string()
            } else {
                format!("{}/{}", info.type_id, info.type_width)
            };
            writeln!(
                t,
                "{vt}\t{ks}\t{ty}\t{}\t{}\t{}",
                info.sw_per_item,
                model::actionset_for(ks),
                info.fields.len(),
            )?;
        }
    }
    t.flush()
}

/// Print the field geometry of one keyset.
pub fn print_keyset_layout(keyset: Keyset) -> std::io::Result<()> {
    print_keyset_layout_into(&mut std::io::stdout(), keyset)
}

/// Print the field geometry of one keyset into a given writer.
pub fn print_keyset_layout_into(
    writer: &mut impl Write,
    keyset: Keyset,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    let info = keyset.info();
    writeln!(
        t,
        "{} {keyset}: {} bits in {} sub-words",
        info.vtype,
        info.key_width(),
        info.sw_per_item
    )?;
    write_hrb(&mut t)?;
    writeln!(t, "FIELD\tKIND\tOFFSET\tWIDTH\tIMPLIED")?;
    for (field, desc) in info.layout() {
        writeln!(
            t,
            "{field}\t{}\t{}\t{}\t",
            desc.kind, desc.offset, desc.width
        )?;
    }
    for (field, value) in info.implied {
        writeln!(
            t,
            "{field}\t{}\t-\t-\t={}",
            field.kind(),
            u8::from(*value)
        )?;
    }
    t.flush()
}

/// Print the port keyset table.
pub fn print_port_keysets(
    table: &[(PortId, VcapType, u8, KeysetClass, Keyset)],
) -> std::io::Result<()> {
    print_port_keysets_into(&mut std::io::stdout(), table)
}

/// Print the port keyset table into a given writer.
pub fn print_port_keysets_into(
    writer: &mut impl Write,
    table: &[(PortId, VcapType, u8, KeysetClass, Keyset)],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "PORT\tVCAP\tLOOKUP\tCLASS\tKEYSET")?;
    for (port, vt, lookup, class, ks) in table {
        writeln!(t, "{port}\t{vt}\t{lookup}\t{class}\t{ks}")?;
    }
    t.flush()
}

/// Print chain templates.
pub fn print_templates(templates: &[Template]) -> std::io::Result<()> {
    print_templates_into(&mut std::io::stdout(), templates)
}

/// Print chain templates into a given writer.
pub fn print_templates_into(
    writer: &mut impl Write,
    templates: &[Template],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "PORT\tCHAIN\tPROTO\tKEYSET\tSAVED")?;
    for tmpl in templates {
        let saved = tmpl
            .saved()
            .iter()
            .map(|(class, ks)| format!("{class}={ks}"))
            .join(",");
        writeln!(
            t,
            "{}\t{}\t{:#06x}\t{}\t{}",
            tmpl.port,
            tmpl.chain,
            tmpl.l3_proto,
            tmpl.keyset,
            if saved.is_empty() { "-" } else { &saved },
        )?;
    }
    t.flush()
}

/// Print FDMA channel statistics.
pub fn print_channels(stats: &[ChannelStats]) -> std::io::Result<()> {
    print_channels_into(&mut std::io::stdout(), stats)
}

/// Print FDMA channel statistics into a given writer.
pub fn print_channels_into(
    writer: &mut impl Write,
    stats: &[ChannelStats],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(
        t,
        "CH\tROLE\tSTATE\tFREE\tQUEUED\tLOW\tSUBMITTED\tCOMPLETED\tABORTED"
    )?;
    for s in stats {
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            s.ch,
            s.role,
            s.state,
            s.free_count,
            s.queued_count,
            s.low_water,
            s.submitted,
            s.completed,
            s.aborted,
        )?;
    }
    t.flush()
}

/// Output a horizontal rule in bold to the given writer.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Output a horizontal rule to the given writer.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

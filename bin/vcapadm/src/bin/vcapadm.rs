// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use lan966x::ExecCtx;
use lan966x::print::print_encoded;
use lan966x::print::print_keyset_layout;
use lan966x::print::print_keysets;
use lan966x::print::print_port_keysets;
use lan966x::print::print_rules;
use lan966x::print::print_templates;
use lan966x::vcap::model;
use lan966x::vcap::model::KeyField;
use lan966x::vcap::model::Keyset;
use lan966x::vcap::select::select;
use vcap_api::API_VERSION;
use vcap_api::VcapType;
use vcapadm::RuleFile;
use vcapadm::SlogLog;

/// Inspect the LAN966x VCAP model and compile flower rules against it.
#[derive(Debug, Parser)]
#[command(version, about)]
enum Command {
    /// List the keysets of one VCAP, or of all of them.
    ListKeysets {
        #[arg(long)]
        vcap: Option<VcapType>,
    },

    /// Show the field layout of a keyset.
    ShowKeyset { keyset: Keyset },

    /// Pick the keyset that best holds a set of key fields.
    Select {
        #[arg(long)]
        vcap: VcapType,

        /// Choose among these keysets instead of every keyset of the
        /// VCAP.
        #[arg(long = "keyset", value_delimiter = ',')]
        keysets: Vec<Keyset>,

        fields: Vec<KeyField>,
    },

    /// Run the flower requests of a TOML rule file and dump the
    /// resulting rules.
    Compile {
        file: PathBuf,

        /// Also print the hardware image of every rule.
        #[arg(long)]
        encode: bool,

        /// Also print the port keyset table.
        #[arg(long)]
        port_keysets: bool,
    },

    /// Print the API version.
    Version,
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    match cmd {
        Command::ListKeysets { vcap } => print_keysets(vcap)?,

        Command::ShowKeyset { keyset } => print_keyset_layout(keyset)?,

        Command::Select { vcap, keysets, fields } => {
            let offered: Vec<Keyset> = if keysets.is_empty() {
                model::keysets(vcap).collect()
            } else {
                keysets
            };
            if let Some(ks) = offered.iter().find(|ks| ks.vtype() != vcap) {
                anyhow::bail!("keyset {ks} does not belong to {vcap}");
            }

            let sel = select(&fields, &offered);
            match sel.best_match {
                Some(ks) => println!("best match: {ks}"),
                None => println!("best match: none"),
            }
            let matches: Vec<String> =
                sel.matches.iter().map(|ks| ks.to_string()).collect();
            println!("full matches: {}", matches.join(" "));
            if !sel.unmatched_keys.is_empty() {
                let missing: Vec<String> =
                    sel.unmatched_keys.iter().map(|f| f.to_string()).collect();
                println!("unmatched keys: {}", missing.join(" "));
            }
        }

        Command::Compile { file, encode, port_keysets } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let rf = RuleFile::parse(&text)?;
            let log = vcapadm::term_logger();
            let ectx = ExecCtx::new(SlogLog::new(log.clone()));
            let (vcap, outcomes) = rf.compile(ectx)?;

            for o in &outcomes {
                match &o.result {
                    Ok(Some(st)) => println!(
                        "{:?} {:#x}: packets {} drops {} ({:?})",
                        o.command, o.cookie, st.packets, st.drops, st.used
                    ),
                    Ok(None) => println!("{:?} {:#x}: ok", o.command, o.cookie),
                    Err(e) => println!(
                        "{:?} {:#x}: {}",
                        o.command,
                        o.cookie,
                        e.ext_msg()
                    ),
                }
            }
            println!();

            let rules = vcap.dump_rules();
            print_rules(&rules)?;
            if encode {
                for e in &rules {
                    println!("\nrule {}:", e.rule.id());
                    print_encoded(&e.rule.encode()?)?;
                }
            }

            let templates = vcap.dump_templates();
            if !templates.is_empty() {
                println!();
                print_templates(&templates)?;
            }
            if port_keysets {
                println!();
                print_port_keysets(&vcap.dump_port_keysets())?;
            }

            let (policers, sfid, sgid) = vcap.resources_in_use();
            println!(
                "\npolicers {policers} stream filters {sfid} stream gates \
                 {sgid}"
            );
            if let (Some(port), users) = vcap.mirror() {
                println!("mirror port {port} ({users} rules)");
            }
        }

        Command::Version => println!("API version: {API_VERSION}"),
    }

    Ok(())
}

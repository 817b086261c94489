// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! VCAP administration library: the rule file format read by
//! `vcapadm compile` and the `slog` log provider the tool runs the
//! engine with.

use lan966x::ExecCtx;
use lan966x::LogLevel;
use lan966x::LogProvider;
use lan966x::vcap::Vcap;
use lan966x::vcap::VcapConfig;
use lan966x::vcap::VcapError;
use lan966x::vcap::model::Keyset;
use serde::Deserialize;
use slog::Drain;
use vcap_api::FlowCommand;
use vcap_api::FlowOffload;
use vcap_api::FlowStats;
use vcap_api::PortId;

/// Log engine messages through `slog`.
pub struct SlogLog {
    log: slog::Logger,
}

impl SlogLog {
    pub fn new(log: slog::Logger) -> Self {
        Self { log }
    }
}

impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => slog::info!(self.log, "{}", msg),
            LogLevel::Warn => slog::warn!(self.log, "{}", msg),
            LogLevel::Error => slog::error!(self.log, "{}", msg),
        }
    }
}

/// A terminal logger on stderr, filtered by `RUST_LOG`.
pub fn term_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("component" => "vcapadm"))
}

#[derive(Debug, thiserror::Error)]
pub enum RuleFileError {
    #[error("failed to parse rule file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("port_keyset #{index}: {msg}")]
    Keyset { index: usize, msg: String },

    #[error("port_keyset #{index}: {err}")]
    PortKeyset { index: usize, err: VcapError },
}

/// A port keyset to program before any request runs.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortKeysetEntry {
    pub port: PortId,
    pub chain: u32,
    pub l3_proto: u16,
    #[serde(default)]
    pub l4_proto: u8,
    pub keyset: String,
}

/// The contents of a rule file.
///
/// ```toml
/// [vcap]
/// num_ports = 8
/// policer_count = 64
/// sfid_count = 256
/// sgid_count = 256
///
/// [[port_keyset]]
/// port = 0
/// chain = 8000000
/// l3_proto = 0x86dd
/// l4_proto = 6
/// keyset = "IP6_TCP_UDP"
///
/// [[request]]
/// command = "replace"
/// port = 0
/// chain = 8000000
/// prio = 1
/// cookie = 1
/// actions = [{ kind = "drop" }]
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    #[serde(default)]
    pub vcap: VcapConfig,
    #[serde(default, rename = "port_keyset")]
    pub port_keysets: Vec<PortKeysetEntry>,
    #[serde(default, rename = "request")]
    pub requests: Vec<FlowOffload>,
}

/// What became of one request.
#[derive(Debug)]
pub struct Outcome {
    pub command: FlowCommand,
    pub cookie: u64,
    pub result: Result<Option<FlowStats>, VcapError>,
}

impl RuleFile {
    pub fn parse(s: &str) -> Result<Self, RuleFileError> {
        Ok(toml::from_str(s)?)
    }

    /// Run the file against a fresh [`Vcap`]. Port keysets must all
    /// apply; a failed request is recorded in its outcome and the rest
    /// still run.
    pub fn compile(
        &self,
        ectx: ExecCtx,
    ) -> Result<(Vcap, Vec<Outcome>), RuleFileError> {
        let vcap = Vcap::new(ectx, self.vcap);

        for (index, pk) in self.port_keysets.iter().enumerate() {
            let keyset: Keyset = pk
                .keyset
                .parse()
                .map_err(|msg| RuleFileError::Keyset { index, msg })?;
            vcap.set_port_keyset(
                pk.port,
                pk.chain,
                pk.l3_proto,
                pk.l4_proto,
                keyset,
            )
            .map_err(|err| RuleFileError::PortKeyset { index, err })?;
        }

        let outcomes = self
            .requests
            .iter()
            .map(|req| Outcome {
                command: req.command,
                cookie: req.cookie,
                result: vcap.flower(req),
            })
            .collect();

        Ok((vcap, outcomes))
    }
}

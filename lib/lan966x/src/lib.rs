// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The LAN966x switch core: the VCAP rule compiler used by the
//! traffic-control offload path, and the FDMA descriptor-ring engine
//! which moves frames between the CPU and the switch fabric.
//!
//! Neither half keeps any process-wide state. Everything is reached
//! through an explicit handle ([`vcap::Vcap`], [`fdma::Fdma`]) which
//! carries its own [`ExecCtx`].

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub use vcap_api as api;

pub mod ddi;
pub mod fdma;
pub mod print;
pub mod provider;
pub mod vcap;

pub use provider::LogLevel;
pub use provider::LogProvider;

use std::sync::Arc;

/// The execution context handed to every engine handle.
#[derive(Clone)]
pub struct ExecCtx {
    pub log: Arc<dyn LogProvider>,
}

impl ExecCtx {
    pub fn new(log: impl LogProvider + 'static) -> Self {
        Self { log: Arc::new(log) }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The DMA client boundary of the FDMA engine.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The direction of a slave transfer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DmaDirection {
    MemToMem,
    /// Injection: frames leave the CPU towards the switch.
    MemToDev,
    /// Extraction: frames arrive at the CPU from the switch.
    DevToMem,
    DevToDev,
}

impl Display for DmaDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::MemToMem => "mem-to-mem",
            Self::MemToDev => "mem-to-dev",
            Self::DevToMem => "dev-to-mem",
            Self::DevToDev => "dev-to-dev",
        };
        write!(f, "{s}")
    }
}

/// One scatter-gather segment of a transfer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Segment {
    /// Bus address of the buffer.
    pub addr: u64,
    pub len: u16,
    /// Byte offset into the buffer where data starts.
    pub offset: u16,
}

impl Segment {
    pub const fn new(addr: u64, len: u16) -> Self {
        Self { addr, len, offset: 0 }
    }
}

/// The terminal result of a completed block range.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DmaResult {
    NoError,
    Aborted,
    ReadFailed,
    WriteFailed,
}

/// What a client callback receives.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Completion {
    pub result: DmaResult,
    /// Bytes of the transfer not yet accounted for by this or an
    /// earlier completion. Zero at the final end-of-frame.
    pub residue: u32,
    /// Size of the frame this completion reports. Zero when the
    /// transfer's buffers filled before the frame ended; the frame is
    /// then reported by the transfer holding its end.
    pub len: u32,
    /// This is the final completion of the transfer.
    pub last: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TxState {
    InProgress,
    Complete,
    Error,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TxStatus {
    pub state: TxState,
    pub residue: u32,
}

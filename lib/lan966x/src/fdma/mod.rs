// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The FDMA descriptor-ring engine.
//!
//! Each hardware channel owns a fixed arena of DCBs split between a
//! free list and a queued list. Clients submit scatter-gather
//! transfers which are written into DCBs taken from the free list;
//! `issue_pending` links them into the list the hardware walks. When
//! the hardware raises a channel's interrupt the [`Fdma`] handle only
//! records it; a dedicated worker thread then runs that channel's
//! completion walk, which accounts for finished blocks, returns DCBs
//! to the free list and runs client callbacks in submission order.
//!
//! Channels below [`FdmaConfig::xtr_channel`] inject frames into the
//! switch; the rest extract frames from it.

pub mod channel;
pub mod dcb;
#[cfg(any(test, feature = "test-help"))]
pub mod sim;
mod worker;

pub use channel::Callback;
pub use channel::ChanState;
pub use channel::Channel;
pub use channel::ChannelStats;
pub use channel::Role;
pub use channel::TxHandle;

use crate::ExecCtx;
use crate::api::DmaDirection;
use crate::api::Segment;
use crate::api::TxStatus;
use core::time::Duration;
use dcb::DcbMem;
use dcb::FDMA_DB_MAX;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use worker::IntrWorker;

/// DCBs per channel.
pub const FDMA_DCB_MAX: usize = 32;
pub const FDMA_CHANNELS: u8 = 8;
/// The first extraction channel.
pub const FDMA_XTR_CHANNEL: u8 = 6;
pub const FDMA_SYNC_TIMEOUT: Duration = Duration::from_millis(5);

/// Bus address of channel 0's DCB memory.
const DCB_BASE: u64 = 0x2000_0000;
const DCB_CHANNEL_STRIDE: u64 = 0x1_0000;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct FdmaConfig {
    pub channels: u8,
    pub dcb_max: usize,
    /// Data blocks used in each DCB, at most [`FDMA_DB_MAX`].
    pub db_per_dcb: u8,
    pub xtr_channel: u8,
    /// Upper bound on every hardware poll.
    pub sync_timeout: Duration,
}

impl Default for FdmaConfig {
    fn default() -> Self {
        Self {
            channels: FDMA_CHANNELS,
            dcb_max: FDMA_DCB_MAX,
            db_per_dcb: FDMA_DB_MAX as u8,
            xtr_channel: FDMA_XTR_CHANNEL,
            sync_timeout: FDMA_SYNC_TIMEOUT,
        }
    }
}

impl FdmaConfig {
    fn validate(&self) -> Result<(), FdmaError> {
        if self.channels == 0 || self.channels > 32 {
            return Err(FdmaError::Config(format!(
                "channels must be 1..=32, not {}",
                self.channels
            )));
        }
        if self.db_per_dcb == 0 || self.db_per_dcb as usize > FDMA_DB_MAX {
            return Err(FdmaError::Config(format!(
                "db_per_dcb must be 1..={FDMA_DB_MAX}, not {}",
                self.db_per_dcb
            )));
        }
        if self.dcb_max == 0 || self.dcb_max > DCB_CHANNEL_STRIDE as usize / 64
        {
            return Err(FdmaError::Config(format!(
                "dcb_max {} out of range",
                self.dcb_max
            )));
        }
        if self.xtr_channel > self.channels {
            return Err(FdmaError::Config(format!(
                "xtr_channel {} beyond {} channels",
                self.xtr_channel, self.channels
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FdmaError {
    #[error("invalid FDMA configuration: {0}")]
    Config(String),

    #[error("no channel {0}")]
    NoChannel(u8),

    #[error("channel {ch} is {state}")]
    BadState { ch: u8, state: ChanState },

    #[error("channel {ch} does not support {dir} transfers")]
    Direction { ch: u8, dir: DmaDirection },

    #[error("transfer has no segments")]
    Empty,

    #[error("segment {index} cannot be described by a data block")]
    BadSegment { index: usize },

    #[error("channel {ch} has no free DCB")]
    NoDcb { ch: u8 },

    #[error("channel {ch} has no transfer {handle}")]
    UnknownTx { ch: u8, handle: TxHandle },

    #[error("failed to start completion worker: {0}")]
    Worker(String),
}

/// Register-level access to the FDMA block.
///
/// The engine never touches registers directly; a platform provides
/// this and [`sim::SimFdma`] stands in for it under test.
pub trait FdmaHw: Send + Sync {
    /// Program the channel's blocks-per-DCB count and interrupt mode
    /// and hand it the memory its DCBs live in.
    fn configure(&self, ch: u8, db_per_dcb: u8, xtr: bool, mem: Arc<DcbMem>);

    fn enable_intr(&self, ch: u8, enable: bool);

    /// Set the address of the first DCB the channel reads.
    fn set_head(&self, ch: u8, addr: u64);

    fn activate(&self, ch: u8);

    /// Re-read the `nextptr` of the DCB the channel stopped at.
    fn reload(&self, ch: u8);

    fn disable(&self, ch: u8);

    /// Assert the injection or extraction stop bit.
    fn stop(&self, ch: u8);

    fn xtr_buffer_empty(&self, ch: u8) -> bool;

    fn active(&self, ch: u8) -> bool;

    fn pending(&self, ch: u8) -> bool;
}

/// A handle on the FDMA engine.
pub struct Fdma {
    cfg: FdmaConfig,
    channels: Vec<Arc<Channel>>,
    worker: IntrWorker,
}

impl Fdma {
    pub fn new(
        ectx: ExecCtx,
        cfg: FdmaConfig,
        hw: Arc<dyn FdmaHw>,
    ) -> Result<Self, FdmaError> {
        cfg.validate()?;

        let channels: Vec<Arc<Channel>> = (0..cfg.channels)
            .map(|id| {
                let mem = DcbMem::new(
                    DCB_BASE + id as u64 * DCB_CHANNEL_STRIDE,
                    cfg.dcb_max,
                );
                Arc::new(Channel::new(
                    id,
                    Role::for_channel(id, cfg.xtr_channel),
                    &cfg,
                    ectx.log.clone(),
                    hw.clone(),
                    Arc::new(mem),
                ))
            })
            .collect();

        let worker = IntrWorker::spawn(channels.clone())
            .map_err(|e| FdmaError::Worker(e.to_string()))?;

        Ok(Self { cfg, channels, worker })
    }

    pub fn config(&self) -> &FdmaConfig {
        &self.cfg
    }

    pub fn channel(&self, ch: u8) -> Result<&Arc<Channel>, FdmaError> {
        self.channels.get(ch as usize).ok_or(FdmaError::NoChannel(ch))
    }

    pub fn alloc_channel_resources(&self, ch: u8) -> Result<(), FdmaError> {
        self.channel(ch)?.alloc_resources()
    }

    pub fn free_channel_resources(&self, ch: u8) -> Result<(), FdmaError> {
        self.channel(ch)?.free_resources();
        Ok(())
    }

    pub fn prep_slave_sg(
        &self,
        ch: u8,
        segs: &[Segment],
        dir: DmaDirection,
        callback: Option<Callback>,
    ) -> Result<TxHandle, FdmaError> {
        self.channel(ch)?.submit(segs, dir, callback)
    }

    pub fn tx_status(
        &self,
        ch: u8,
        handle: TxHandle,
    ) -> Result<TxStatus, FdmaError> {
        self.channel(ch)?
            .tx_status(handle)
            .ok_or(FdmaError::UnknownTx { ch, handle })
    }

    pub fn issue_pending(&self, ch: u8) -> Result<(), FdmaError> {
        self.channel(ch)?.issue();
        Ok(())
    }

    pub fn terminate_all(&self, ch: u8) -> Result<(), FdmaError> {
        self.channel(ch)?.terminate();
        Ok(())
    }

    pub fn synchronize(&self, ch: u8) -> Result<(), FdmaError> {
        self.channel(ch)?.sync();
        Ok(())
    }

    /// The completion interrupt handler: `mask` has a bit set for
    /// every channel with finished blocks.
    pub fn interrupt(&self, mask: u32) {
        self.worker.notify(mask & self.channel_mask());
    }

    /// The error interrupt handler.
    pub fn error_interrupt(&self, mask: u32) {
        for ch in &self.channels {
            if mask & (1 << ch.id()) != 0 {
                ch.on_error();
            }
        }
    }

    /// Run a channel's completion walk on the calling thread.
    ///
    /// This must not race the worker: only use it when no completion
    /// interrupt has been raised for the channel.
    #[cfg(any(test, feature = "test-help"))]
    pub fn service(&self, ch: u8) -> Result<bool, FdmaError> {
        Ok(self.channel(ch)?.on_completion())
    }

    pub fn stats(&self) -> Vec<ChannelStats> {
        self.channels.iter().map(|ch| ch.stats()).collect()
    }

    fn channel_mask(&self) -> u32 {
        if self.cfg.channels >= 32 {
            u32::MAX
        } else {
            (1u32 << self.cfg.channels) - 1
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Completion;
    use crate::api::DmaResult;
    use crate::api::TxState;
    use crate::provider::CaptureLog;
    use sim::SimFdma;
    use std::sync::mpsc;

    fn fdma() -> (Fdma, Arc<SimFdma>) {
        let sim = Arc::new(SimFdma::new(FDMA_CHANNELS));
        let log = Arc::new(CaptureLog::new());
        let f = Fdma::new(ExecCtx::new(log), FdmaConfig::default(), sim.clone())
            .unwrap();
        (f, sim)
    }

    #[test]
    fn bad_config() {
        let sim = Arc::new(SimFdma::new(FDMA_CHANNELS));
        let ectx = ExecCtx::new(CaptureLog::new());
        let cfg = FdmaConfig { db_per_dcb: 4, ..Default::default() };
        assert!(matches!(
            Fdma::new(ectx.clone(), cfg, sim.clone()),
            Err(FdmaError::Config(_))
        ));
        let cfg = FdmaConfig { xtr_channel: 9, ..Default::default() };
        assert!(matches!(Fdma::new(ectx, cfg, sim), Err(FdmaError::Config(_))));
    }

    #[test]
    fn roles() {
        let (f, _) = fdma();
        assert_eq!(f.channel(0).unwrap().role(), Role::Injection);
        assert_eq!(f.channel(5).unwrap().role(), Role::Injection);
        assert_eq!(f.channel(6).unwrap().role(), Role::Extraction);
        assert_eq!(f.channel(8).err(), Some(FdmaError::NoChannel(8)));
    }

    #[test]
    fn interrupt_runs_worker() {
        let (f, sim) = fdma();
        let (tx, rx) = mpsc::channel::<Completion>();
        f.alloc_channel_resources(1).unwrap();
        let h = f
            .prep_slave_sg(
                1,
                &[Segment::new(0x8000, 60), Segment::new(0x9000, 40)],
                DmaDirection::MemToDev,
                Some(Box::new(move |c| {
                    let _ = tx.send(c);
                })),
            )
            .unwrap();
        f.issue_pending(1).unwrap();
        assert_eq!(sim.run(1), 2);

        f.interrupt(sim.take_interrupts());
        let c = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(c.result, DmaResult::NoError);
        assert_eq!(c.len, 100);
        assert_eq!(c.residue, 0);
        assert!(c.last);
        assert_eq!(f.tx_status(1, h).unwrap().state, TxState::Complete);
    }

    #[test]
    fn error_interrupt_fails_outstanding() {
        let (f, sim) = fdma();
        let (tx, rx) = mpsc::channel::<Completion>();
        for ch in [2, 7] {
            let tx = tx.clone();
            f.alloc_channel_resources(ch).unwrap();
            let dir = f.channel(ch).unwrap().role().direction();
            f.prep_slave_sg(
                ch,
                &[Segment::new(0x4000, 128)],
                dir,
                Some(Box::new(move |c| {
                    let _ = tx.send(c);
                })),
            )
            .unwrap();
            f.issue_pending(ch).unwrap();
        }
        sim.stall(2, true);

        f.error_interrupt(1 << 2 | 1 << 7);
        let mut got: Vec<DmaResult> = rx.try_iter().map(|c| c.result).collect();
        got.sort_by_key(|r| *r as u8);
        assert_eq!(got, vec![DmaResult::ReadFailed, DmaResult::WriteFailed]);
        assert_eq!(f.channel(2).unwrap().state(), ChanState::Error);
        assert_eq!(
            f.prep_slave_sg(
                2,
                &[Segment::new(0x4000, 64)],
                DmaDirection::MemToDev,
                None
            ),
            Err(FdmaError::BadState { ch: 2, state: ChanState::Error })
        );

        // A free/alloc cycle recovers the channel.
        f.free_channel_resources(2).unwrap();
        sim.stall(2, false);
        f.synchronize(2).unwrap();
        f.alloc_channel_resources(2).unwrap();
        assert_eq!(f.channel(2).unwrap().state(), ChanState::Active);
    }
}

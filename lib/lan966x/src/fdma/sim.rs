// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A simulated FDMA block.
//!
//! Nothing happens on its own: a test moves the hardware forward
//! explicitly. [`SimFdma::run`] completes injection blocks,
//! [`SimFdma::receive`] lands a frame in a channel's extraction
//! buffers, and [`SimFdma::take_interrupts`] collects the completion
//! interrupts that raised along the way.

use super::FdmaHw;
use super::dcb::DbStatus;
use super::dcb::DcbMem;
use super::dcb::db_status;
use super::dcb::status_flags;
use super::dcb::status_len;
use crate::ddi::sync::KMutex;
use std::sync::Arc;

#[derive(Default)]
struct SimChan {
    mem: Option<Arc<DcbMem>>,
    db_per_dcb: u8,
    xtr: bool,
    intr: bool,
    head: u64,
    /// The next block the channel processes.
    cur: Option<(usize, usize)>,
    activated: bool,
    stopped: bool,
    stalled: bool,
    activations: u32,
    reloads: u32,
}

impl SimChan {
    /// Follow `nextptr` out of fully processed DCBs.
    fn advance(&mut self, mem: &DcbMem) -> Option<(usize, usize)> {
        let (mut d, mut b) = self.cur?;
        loop {
            let hw = mem.read(d);
            if b < hw.blocks() as usize {
                self.cur = Some((d, b));
                return self.cur;
            }
            d = mem.index(hw.nextptr)?;
            b = 0;
            self.cur = Some((d, b));
        }
    }

    fn running(&self) -> bool {
        self.activated && !self.stopped && !self.stalled
    }

    fn has_work(&mut self) -> bool {
        let Some(mem) = self.mem.clone() else { return false };
        match self.advance(&mem) {
            Some((d, b)) => {
                !status_flags(mem.read(d).db[b].status)
                    .contains(DbStatus::DONE)
            }
            None => false,
        }
    }
}

struct SimState {
    chans: Vec<SimChan>,
    raised: u32,
}

pub struct SimFdma {
    state: KMutex<SimState>,
}

impl SimFdma {
    pub fn new(channels: u8) -> Self {
        let chans = (0..channels).map(|_| SimChan::default()).collect();
        Self { state: KMutex::new(SimState { chans, raised: 0 }) }
    }

    /// Complete every injection block the channel can reach.
    pub fn run(&self, ch: u8) -> usize {
        self.run_blocks(ch, usize::MAX)
    }

    /// Complete up to `max` injection blocks.
    pub fn run_blocks(&self, ch: u8, max: usize) -> usize {
        let mut st = self.state.lock();
        let c = &mut st.chans[ch as usize];
        let Some(mem) = c.mem.clone() else { return 0 };
        if c.xtr || !c.running() {
            return 0;
        }

        let mut n = 0;
        while n < max {
            let Some((d, b)) = c.advance(&mem) else { break };
            mem.update(d, |hw| hw.db[b].status |= DbStatus::DONE.bits());
            c.cur = Some((d, b + 1));
            n += 1;
        }

        if n > 0 && c.intr {
            st.raised |= 1 << ch;
        }
        n
    }

    /// Land a frame of `len` bytes in the channel's extraction
    /// buffers. Return false, writing nothing, if the buffers the
    /// channel can reach are too small.
    pub fn receive(&self, ch: u8, len: u32) -> bool {
        let mut st = self.state.lock();
        let c = &mut st.chans[ch as usize];
        let Some(mem) = c.mem.clone() else { return false };
        if !c.xtr || !c.running() || len == 0 {
            return false;
        }

        // Find the blocks first so a frame that does not fit leaves
        // no trace.
        let saved = c.cur;
        let mut blocks = Vec::new();
        let mut room = 0u32;
        while room < len {
            let Some((d, b)) = c.advance(&mem) else { break };
            room += status_len(mem.read(d).db[b].status) as u32;
            blocks.push((d, b));
            c.cur = Some((d, b + 1));
        }
        if room < len {
            c.cur = saved;
            return false;
        }

        let mut left = len;
        let count = blocks.len();
        for (i, (d, b)) in blocks.into_iter().enumerate() {
            mem.update(d, |hw| {
                let cap = status_len(hw.db[b].status) as u32;
                let n = left.min(cap);
                left -= n;
                let mut flags = DbStatus::DONE;
                if i == 0 {
                    flags |= DbStatus::SOF;
                }
                if i + 1 == count {
                    flags |= DbStatus::EOF;
                }
                hw.db[b].status = db_status(flags, n as u16, 0);
            });
        }

        if c.intr {
            st.raised |= 1 << ch;
        }
        true
    }

    /// Freeze the channel: it stays active and pending and its
    /// extraction buffer never drains.
    pub fn stall(&self, ch: u8, stalled: bool) {
        self.state.lock().chans[ch as usize].stalled = stalled;
    }

    /// Take the mask of raised completion interrupts.
    pub fn take_interrupts(&self) -> u32 {
        core::mem::take(&mut self.state.lock().raised)
    }

    pub fn head(&self, ch: u8) -> u64 {
        self.state.lock().chans[ch as usize].head
    }

    pub fn db_per_dcb(&self, ch: u8) -> u8 {
        self.state.lock().chans[ch as usize].db_per_dcb
    }

    /// How many times the channel was activated and reloaded.
    pub fn kicks(&self, ch: u8) -> (u32, u32) {
        let st = self.state.lock();
        let c = &st.chans[ch as usize];
        (c.activations, c.reloads)
    }
}

impl FdmaHw for SimFdma {
    fn configure(&self, ch: u8, db_per_dcb: u8, xtr: bool, mem: Arc<DcbMem>) {
        let mut st = self.state.lock();
        let c = &mut st.chans[ch as usize];
        *c = SimChan {
            mem: Some(mem),
            db_per_dcb,
            xtr,
            stalled: c.stalled,
            ..Default::default()
        };
    }

    fn enable_intr(&self, ch: u8, enable: bool) {
        self.state.lock().chans[ch as usize].intr = enable;
    }

    fn set_head(&self, ch: u8, addr: u64) {
        self.state.lock().chans[ch as usize].head = addr;
    }

    fn activate(&self, ch: u8) {
        let mut st = self.state.lock();
        let c = &mut st.chans[ch as usize];
        c.cur = c.mem.as_ref().and_then(|m| m.index(c.head)).map(|d| (d, 0));
        c.activated = true;
        c.stopped = false;
        c.activations += 1;
    }

    fn reload(&self, ch: u8) {
        self.state.lock().chans[ch as usize].reloads += 1;
    }

    fn disable(&self, ch: u8) {
        self.state.lock().chans[ch as usize].activated = false;
    }

    fn stop(&self, ch: u8) {
        self.state.lock().chans[ch as usize].stopped = true;
    }

    fn xtr_buffer_empty(&self, ch: u8) -> bool {
        !self.state.lock().chans[ch as usize].stalled
    }

    fn active(&self, ch: u8) -> bool {
        let mut st = self.state.lock();
        let c = &mut st.chans[ch as usize];
        c.stalled || (c.running() && !c.xtr && c.has_work())
    }

    fn pending(&self, ch: u8) -> bool {
        self.state.lock().chans[ch as usize].stalled
    }
}

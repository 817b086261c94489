// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! One FDMA channel.
//!
//! The ring lock ([`KMutex`]) protects the DCB arena, the free and
//! queued lists and the transfer table. It is never held while a
//! client callback runs: a walk that produces a completion takes the
//! callback out of its transfer, drops the lock, runs it, and takes
//! the lock again before looking for the next one. A callback may
//! therefore submit and issue more work on the same channel.
//!
//! ```text
//!   IDLE --alloc--> ACTIVE --issue--> RUNNING --free--> STOPPING
//!    ^                                   |                  |
//!    |                                 error                |
//!    |                                   v                  |
//!    +---sync---- STOPPING <--free---- ERROR                |
//!    +-----------------------------sync---------------------+
//! ```

use super::FdmaConfig;
use super::FdmaError;
use super::FdmaHw;
use super::dcb::BLOCKO_MAX;
use super::dcb::DCB_INVALID;
use super::dcb::DbStatus;
use super::dcb::Dcb;
use super::dcb::DcbInfo;
use super::dcb::DcbMem;
use super::dcb::DcbState;
use super::dcb::FDMA_DB_MAX;
use super::dcb::HwDb;
use super::dcb::HwDcb;
use super::dcb::db_status;
use super::dcb::dcb_info;
use super::dcb::status_flags;
use super::dcb::status_len;
use crate::LogLevel;
use crate::LogProvider;
use crate::api::Completion;
use crate::api::DmaDirection;
use crate::api::DmaResult;
use crate::api::Segment;
use crate::api::TxState;
use crate::api::TxStatus;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KMutexGuard;
use crate::ddi::time::poll_timeout;
use core::fmt;
use core::fmt::Display;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;
use core::sync::atomic::fence;
use core::time::Duration;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;

/// Blocks an extraction walk looks at before yielding the worker.
pub const XTR_BUDGET: usize = 10;

/// The first cookie handed out; anything below is a placeholder.
const MIN_COOKIE: u64 = 1;

const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Called once per completed frame of a transfer.
pub type Callback = Box<dyn FnMut(Completion) + Send>;

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct TxHandle(pub u64);

impl Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Role {
    /// CPU to switch.
    Injection,
    /// Switch to CPU.
    Extraction,
}

impl Role {
    pub fn for_channel(ch: u8, xtr_channel: u8) -> Self {
        if ch >= xtr_channel { Self::Extraction } else { Self::Injection }
    }

    /// The only slave direction this role accepts.
    pub fn direction(&self) -> DmaDirection {
        match self {
            Self::Injection => DmaDirection::MemToDev,
            Self::Extraction => DmaDirection::DevToMem,
        }
    }

    fn failure(&self) -> DmaResult {
        match self {
            Self::Injection => DmaResult::WriteFailed,
            Self::Extraction => DmaResult::ReadFailed,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Injection => "inj",
            Self::Extraction => "xtr",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ChanState {
    Idle,
    Active,
    Running,
    Stopping,
    Error,
}

impl Display for ChanState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Active => "ACTIVE",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChannelStats {
    pub ch: u8,
    pub role: Role,
    pub state: ChanState,
    pub free_count: usize,
    pub queued_count: usize,
    /// The fewest free DCBs seen since the last allocation.
    pub low_water: usize,
    pub submitted: u64,
    pub completed: u64,
    pub aborted: u64,
}

struct Transfer {
    cookie: Option<u64>,
    total: u32,
    consumed: u32,
    callback: Option<Callback>,
}

struct Event {
    handle: u64,
    completion: Completion,
    callback: Option<Callback>,
}

struct Ring {
    state: ChanState,
    dcbs: Vec<Dcb>,
    free: VecDeque<usize>,
    queued: VecDeque<usize>,
    txs: BTreeMap<u64, Transfer>,
    failed: BTreeSet<u64>,
    /// Bytes of the frame in progress. A received frame may start in
    /// one transfer's buffers and end in the next one's.
    frame: Option<u32>,
    next_handle: u64,
    next_cookie: u64,
    completed_cookie: u64,
    low_water: usize,
    submitted: u64,
    completed: u64,
    aborted: u64,
}

impl Ring {
    fn new(dcb_max: usize) -> Self {
        Self {
            state: ChanState::Idle,
            dcbs: vec![Dcb::default(); dcb_max],
            free: (0..dcb_max).collect(),
            queued: VecDeque::new(),
            txs: BTreeMap::new(),
            failed: BTreeSet::new(),
            frame: None,
            next_handle: 1,
            next_cookie: MIN_COOKIE,
            completed_cookie: 0,
            low_water: dcb_max,
            submitted: 0,
            completed: 0,
            aborted: 0,
        }
    }

    fn release(&mut self, d: usize) {
        self.dcbs[d].reset();
        self.free.push_back(d);
    }

    /// Account for one finished block of DCB `d`. Return the
    /// completion it produces, if it ends a frame or the transfer.
    fn account(&mut self, d: usize, blk: usize, status: u64) -> Option<Event> {
        let dcb = &mut self.dcbs[d];
        dcb.sizes[blk] = 0;
        dcb.done_blocks += 1;
        let last = dcb.is_last_dcb && dcb.done_blocks == dcb.valid_blocks;
        if dcb.done_blocks == dcb.valid_blocks {
            dcb.state = DcbState::Complete;
        }
        let handle = dcb.tx?;

        let flags = status_flags(status);
        let len = status_len(status) as u32;
        if flags.contains(DbStatus::SOF) {
            self.frame = Some(0);
        }
        if let Some(frame) = self.frame.as_mut() {
            *frame += len;
        }
        let eof = flags.contains(DbStatus::EOF);

        let tx = self.txs.get_mut(&handle)?;
        tx.consumed = tx.consumed.saturating_add(len);
        if !eof && !last {
            return None;
        }

        // A transfer whose buffers fill mid-frame completes with no
        // frame of its own.
        let frame = if eof { self.frame.take() } else { None };
        let completion = Completion {
            result: DmaResult::NoError,
            residue: tx.total.saturating_sub(tx.consumed),
            len: frame.unwrap_or(0),
            last,
        };
        let callback = tx.callback.take();
        if last {
            self.finish(handle);
        }
        Some(Event { handle, completion, callback })
    }

    fn finish(&mut self, handle: u64) {
        if let Some(tx) = self.txs.remove(&handle) {
            if let Some(c) = tx.cookie {
                self.completed_cookie = self.completed_cookie.max(c);
            }
            self.completed += 1;
        }
    }

    /// Complete every outstanding transfer with `result` and return
    /// every DCB to the free list.
    fn abort_all(&mut self, result: DmaResult) -> Vec<Event> {
        self.frame = None;
        while let Some(d) = self.queued.pop_front() {
            self.release(d);
        }
        let txs = core::mem::take(&mut self.txs);
        txs.into_iter()
            .map(|(handle, tx)| {
                self.failed.insert(handle);
                self.aborted += 1;
                Event {
                    handle,
                    completion: Completion {
                        result,
                        residue: 0,
                        len: 0,
                        last: true,
                    },
                    callback: tx.callback,
                }
            })
            .collect()
    }
}

/// One FDMA channel and its DCB ring.
pub struct Channel {
    id: u8,
    role: Role,
    dcb_max: usize,
    db_per_dcb: u8,
    sync_timeout: Duration,
    log: Arc<dyn LogProvider>,
    hw: Arc<dyn FdmaHw>,
    mem: Arc<DcbMem>,
    ring: KMutex<Ring>,
    // The extraction walk cursor. Only the channel's completion
    // worker writes these once the channel is running; `issue` seeds
    // them before the first activation, when no interrupt can fire.
    next_dcb: AtomicUsize,
    next_idx: AtomicUsize,
}

impl Channel {
    pub(crate) fn new(
        id: u8,
        role: Role,
        cfg: &FdmaConfig,
        log: Arc<dyn LogProvider>,
        hw: Arc<dyn FdmaHw>,
        mem: Arc<DcbMem>,
    ) -> Self {
        Self {
            id,
            role,
            dcb_max: cfg.dcb_max,
            db_per_dcb: cfg.db_per_dcb,
            sync_timeout: cfg.sync_timeout,
            log,
            hw,
            mem,
            ring: KMutex::new(Ring::new(cfg.dcb_max)),
            next_dcb: AtomicUsize::new(0),
            next_idx: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ChanState {
        self.ring.lock().state
    }

    /// The memory the hardware reads this channel's DCBs from.
    pub fn mem(&self) -> &Arc<DcbMem> {
        &self.mem
    }

    fn log(&self, level: LogLevel, msg: &str) {
        let msg = format!("fdma ch{} ({}): {msg}", self.id, self.role);
        self.log.log(level, &msg);
    }

    pub fn alloc_resources(&self) -> Result<(), FdmaError> {
        let mut ring = self.ring.lock();
        if ring.state != ChanState::Idle {
            return Err(FdmaError::BadState { ch: self.id, state: ring.state });
        }

        // Handles stay unique and keep their final state across
        // reallocation.
        let next_handle = ring.next_handle;
        let failed = core::mem::take(&mut ring.failed);
        *ring = Ring::new(self.dcb_max);
        ring.next_handle = next_handle;
        ring.failed = failed;
        for d in 0..self.dcb_max {
            self.mem.update(d, |hw| *hw = HwDcb::empty());
        }
        self.next_dcb.store(0, Ordering::Relaxed);
        self.next_idx.store(0, Ordering::Relaxed);

        self.hw.configure(
            self.id,
            self.db_per_dcb,
            self.role == Role::Extraction,
            self.mem.clone(),
        );
        self.hw.enable_intr(self.id, true);
        ring.state = ChanState::Active;
        Ok(())
    }

    /// Stop the channel. In-flight transfers are left for
    /// [`Channel::sync`] to reap.
    pub fn free_resources(&self) {
        {
            let mut ring = self.ring.lock();
            if matches!(ring.state, ChanState::Idle | ChanState::Stopping) {
                return;
            }
            ring.state = ChanState::Stopping;
        }

        match self.role {
            Role::Extraction => {
                if !self.poll_xtr_empty() {
                    self.log(
                        LogLevel::Warn,
                        "extraction buffer not empty before stop",
                    );
                }
                self.hw.stop(self.id);
                if !self.poll_xtr_empty() {
                    self.log(
                        LogLevel::Warn,
                        "extraction buffer not empty after stop",
                    );
                }
            }
            Role::Injection => self.hw.stop(self.id),
        }

        self.hw.disable(self.id);
        self.hw.enable_intr(self.id, false);
    }

    fn poll_xtr_empty(&self) -> bool {
        poll_timeout(self.sync_timeout, POLL_INTERVAL, || {
            self.hw.xtr_buffer_empty(self.id)
        })
    }

    /// Queue a transfer. It is not handed to the hardware until the
    /// next [`Channel::issue`].
    pub fn submit(
        &self,
        segs: &[Segment],
        dir: DmaDirection,
        callback: Option<Callback>,
    ) -> Result<TxHandle, FdmaError> {
        if dir != self.role.direction() {
            return Err(FdmaError::Direction { ch: self.id, dir });
        }
        if segs.is_empty() {
            return Err(FdmaError::Empty);
        }
        if let Some(index) =
            segs.iter().position(|s| s.len == 0 || s.offset > BLOCKO_MAX)
        {
            return Err(FdmaError::BadSegment { index });
        }

        let mut ring = self.ring.lock();
        if !matches!(ring.state, ChanState::Active | ChanState::Running) {
            return Err(FdmaError::BadState { ch: self.id, state: ring.state });
        }

        let per_dcb = self.db_per_dcb as usize;
        let need = segs.len().div_ceil(per_dcb);
        let mut taken = Vec::with_capacity(need);
        for _ in 0..need {
            match ring.free.pop_front() {
                Some(d) => taken.push(d),
                None => {
                    for d in taken {
                        ring.release(d);
                    }
                    return Err(FdmaError::NoDcb { ch: self.id });
                }
            }
        }

        let handle = ring.next_handle;
        ring.next_handle += 1;
        let first = taken[0];
        let nsegs = segs.len();

        for (n, chunk) in segs.chunks(per_dcb).enumerate() {
            let d = taken[n];
            let mut hw = HwDcb::empty();
            let mut sizes = [0u16; FDMA_DB_MAX];
            for (b, seg) in chunk.iter().enumerate() {
                let pos = n * per_dcb + b;
                let mut flags = DbStatus::empty();
                if pos == 0 {
                    flags |= DbStatus::SOF;
                }
                if pos + 1 == nsegs {
                    flags |= DbStatus::EOF | DbStatus::INTR;
                }
                hw.db[b] = HwDb {
                    dataptr: seg.addr,
                    status: db_status(flags, seg.len, seg.offset),
                };
                sizes[b] = seg.len;
            }
            let datal = chunk.iter().map(|s| s.len).max().unwrap_or(0);
            hw.info = dcb_info(DcbInfo::INTR, datal, chunk.len() as u8);
            self.mem.update(d, |m| *m = hw);

            ring.dcbs[d] = Dcb {
                state: DcbState::Queued,
                valid_blocks: chunk.len() as u8,
                done_blocks: 0,
                first,
                is_last_dcb: n + 1 == need,
                sizes,
                tx: Some(handle),
            };
        }

        ring.queued.extend(taken);
        ring.txs.insert(
            handle,
            Transfer {
                cookie: None,
                total: segs.iter().map(|s| s.len as u32).sum(),
                consumed: 0,
                callback,
            },
        );
        ring.submitted += 1;
        ring.low_water = ring.low_water.min(ring.free.len());
        Ok(TxHandle(handle))
    }

    /// Hand every queued DCB to the hardware.
    pub fn issue(&self) {
        let mut ring = self.ring.lock();
        match ring.state {
            ChanState::Active | ChanState::Running => (),
            state => {
                drop(ring);
                self.log(LogLevel::Note, &format!("issue while {state}"));
                return;
            }
        }

        let mut head = None;
        let mut prev: Option<usize> = None;
        for i in 0..ring.queued.len() {
            let d = ring.queued[i];
            if ring.dcbs[d].state == DcbState::Queued {
                if let Some(p) = prev {
                    let addr = self.mem.addr(d);
                    self.mem.update(p, |hw| hw.nextptr = addr);
                }
                ring.dcbs[d].state = DcbState::Issued;
                if head.is_none() {
                    head = Some(d);
                }
                if ring.dcbs[d].first == d {
                    let cookie = ring.next_cookie;
                    ring.next_cookie += 1;
                    let handle = ring.dcbs[d].tx;
                    if let Some(tx) =
                        handle.and_then(|h| ring.txs.get_mut(&h))
                    {
                        tx.cookie = Some(cookie);
                    }
                }
            }
            prev = Some(d);
        }

        let Some(head) = head else {
            drop(ring);
            self.log(LogLevel::Warn, "issue with nothing queued");
            return;
        };

        if ring.state == ChanState::Active {
            self.next_dcb.store(head, Ordering::Relaxed);
            self.next_idx.store(0, Ordering::Relaxed);
            self.hw.set_head(self.id, self.mem.addr(head));
            self.hw.activate(self.id);
            ring.state = ChanState::Running;
        } else {
            self.hw.reload(self.id);
        }
    }

    /// A no-op: transfers are only ever cancelled as a whole by
    /// [`Channel::sync`].
    pub fn terminate(&self) {}

    /// Wait a bounded time for the hardware to go quiet, then complete
    /// every outstanding transfer as aborted.
    pub fn sync(&self) {
        let quiet = poll_timeout(self.sync_timeout, POLL_INTERVAL, || {
            !self.hw.active(self.id) && !self.hw.pending(self.id)
        });
        if !quiet {
            self.log(
                LogLevel::Warn,
                &format!(
                    "sync timed out after {:?}, aborting outstanding \
                     transfers",
                    self.sync_timeout
                ),
            );
        }

        let events = {
            let mut ring = self.ring.lock();
            let events = ring.abort_all(DmaResult::Aborted);
            if ring.state == ChanState::Stopping {
                ring.state = ChanState::Idle;
            }
            events
        };
        Self::deliver(events);
    }

    /// The channel's error interrupt fired: the hardware has halted
    /// it.
    pub fn on_error(&self) {
        let events = {
            let mut ring = self.ring.lock();
            for i in 0..ring.queued.len() {
                let d = ring.queued[i];
                ring.dcbs[d].state = DcbState::Error;
            }
            ring.state = ChanState::Error;
            ring.abort_all(self.role.failure())
        };
        self.log(
            LogLevel::Error,
            &format!("error interrupt, failed {} transfers", events.len()),
        );
        Self::deliver(events);
    }

    fn deliver(events: Vec<Event>) {
        for ev in events {
            if let Some(mut cb) = ev.callback {
                cb(ev.completion);
            }
        }
    }

    /// Run the completion walk. Return true if the walk stopped with
    /// work left over.
    pub fn on_completion(&self) -> bool {
        match self.role {
            Role::Injection => {
                self.inj_complete();
                false
            }
            Role::Extraction => self.xtr_complete(),
        }
    }

    fn inj_complete(&self) {
        let mut ring = self.ring.lock();
        if ring.state != ChanState::Running {
            return;
        }
        loop {
            let ev = self.inj_step(&mut ring);
            self.free_behind(&mut ring);
            let Some(ev) = ev else { break };
            ring = self.run_callback(ring, ev);
        }
    }

    /// Walk the queued list from the head up to the next completion.
    fn inj_step(&self, ring: &mut Ring) -> Option<Event> {
        for i in 0..ring.queued.len() {
            let d = ring.queued[i];
            match ring.dcbs[d].state {
                DcbState::Complete => continue,
                DcbState::Issued => (),
                _ => return None,
            }
            let hw = self.mem.read(d);
            while ring.dcbs[d].done_blocks < ring.dcbs[d].valid_blocks {
                let blk = ring.dcbs[d].done_blocks as usize;
                let status = hw.db[blk].status;
                if !status_flags(status).contains(DbStatus::DONE) {
                    return None;
                }
                fence(Ordering::Acquire);
                if let Some(ev) = ring.account(d, blk, status) {
                    return Some(ev);
                }
            }
        }
        None
    }

    /// Move completed DCBs at the head of the queue to the free list
    /// once the hardware has followed their `nextptr`.
    fn free_behind(&self, ring: &mut Ring) {
        while ring.queued.len() >= 2 {
            let (d, next) = (ring.queued[0], ring.queued[1]);
            if ring.dcbs[d].state != DcbState::Complete
                || self.mem.read(d).nextptr == DCB_INVALID
            {
                return;
            }
            let started = ring.dcbs[next].state == DcbState::Complete
                || status_flags(self.mem.read(next).db[0].status)
                    .contains(DbStatus::DONE);
            if !started {
                return;
            }
            ring.queued.pop_front();
            ring.release(d);
        }
    }

    /// Run one client callback with the ring unlocked.
    fn run_callback<'a>(
        &'a self,
        ring: KMutexGuard<'a, Ring>,
        ev: Event,
    ) -> KMutexGuard<'a, Ring> {
        let Some(mut cb) = ev.callback else { return ring };
        drop(ring);
        cb(ev.completion);
        let mut ring = self.ring.lock();
        if !ev.completion.last {
            if let Some(tx) = ring.txs.get_mut(&ev.handle) {
                tx.callback = Some(cb);
            }
        }
        ring
    }

    fn xtr_complete(&self) -> bool {
        if self.ring.lock().state != ChanState::Running {
            return false;
        }

        enum Seen {
            Block { dcb: usize, blk: usize, status: u64 },
            Left(usize),
        }

        // Only DCB memory is read here; the lists are not touched
        // until the walk is done.
        let mut d = self.next_dcb.load(Ordering::Relaxed);
        let mut i = self.next_idx.load(Ordering::Relaxed);
        let mut seen = Vec::new();
        let mut more = true;
        for _ in 0..XTR_BUDGET {
            let hw = self.mem.read(d);
            if i >= hw.blocks() as usize {
                match self.mem.index(hw.nextptr) {
                    Some(next) => {
                        seen.push(Seen::Left(d));
                        d = next;
                        i = 0;
                        continue;
                    }
                    None => {
                        more = false;
                        break;
                    }
                }
            }
            let status = hw.db[i].status;
            if !status_flags(status).contains(DbStatus::DONE) {
                more = false;
                break;
            }
            fence(Ordering::Acquire);
            seen.push(Seen::Block { dcb: d, blk: i, status });
            i += 1;
        }
        self.next_dcb.store(d, Ordering::Relaxed);
        self.next_idx.store(i, Ordering::Relaxed);

        let mut ring = self.ring.lock();
        for s in seen {
            match s {
                Seen::Block { dcb, blk, status } => {
                    if ring.dcbs[dcb].state != DcbState::Issued {
                        continue;
                    }
                    if let Some(ev) = ring.account(dcb, blk, status) {
                        ring = self.run_callback(ring, ev);
                    }
                }
                Seen::Left(dcb) => {
                    if ring.queued.front() == Some(&dcb)
                        && ring.dcbs[dcb].state == DcbState::Complete
                    {
                        ring.queued.pop_front();
                        ring.release(dcb);
                    }
                }
            }
        }
        more
    }

    pub fn tx_status(&self, handle: TxHandle) -> Option<TxStatus> {
        let ring = self.ring.lock();
        if ring.failed.contains(&handle.0) {
            return Some(TxStatus { state: TxState::Error, residue: 0 });
        }
        if let Some(tx) = ring.txs.get(&handle.0) {
            return Some(TxStatus {
                state: TxState::InProgress,
                residue: tx.total.saturating_sub(tx.consumed),
            });
        }
        (handle.0 > 0 && handle.0 < ring.next_handle)
            .then_some(TxStatus { state: TxState::Complete, residue: 0 })
    }

    pub fn stats(&self) -> ChannelStats {
        let ring = self.ring.lock();
        ChannelStats {
            ch: self.id,
            role: self.role,
            state: ring.state,
            free_count: ring.free.len(),
            queued_count: ring.queued.len(),
            low_water: ring.low_water,
            submitted: ring.submitted,
            completed: ring.completed,
            aborted: ring.aborted,
        }
    }

    /// The most recent cookie to complete.
    pub fn completed_cookie(&self) -> u64 {
        self.ring.lock().completed_cookie
    }

    /// The software state of every queued DCB, head first.
    pub fn queued(&self) -> Vec<(usize, Dcb)> {
        let ring = self.ring.lock();
        ring.queued.iter().map(|&d| (d, ring.dcbs[d])).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ExecCtx;
    use crate::fdma::Fdma;
    use crate::fdma::sim::SimFdma;
    use crate::provider::CaptureLog;
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(u64, Completion)>>>;

    struct Fixture {
        fdma: Fdma,
        sim: Arc<SimFdma>,
        log: Arc<CaptureLog>,
        seen: Seen,
    }

    fn fixture(cfg: FdmaConfig) -> Fixture {
        let sim = Arc::new(SimFdma::new(cfg.channels));
        let log = Arc::new(CaptureLog::new());
        let fdma =
            Fdma::new(ExecCtx::new(log.clone()), cfg, sim.clone()).unwrap();
        Fixture { fdma, sim, log, seen: Arc::new(Mutex::new(Vec::new())) }
    }

    impl Fixture {
        fn ch(&self, id: u8) -> &Channel {
            self.fdma.channel(id).unwrap()
        }

        fn record(&self, tag: u64) -> Option<Callback> {
            let seen = self.seen.clone();
            Some(Box::new(move |c| seen.lock().unwrap().push((tag, c))))
        }

        fn seen(&self) -> Vec<(u64, Completion)> {
            core::mem::take(&mut *self.seen.lock().unwrap())
        }

        fn conserved(&self, id: u8) {
            let s = self.ch(id).stats();
            assert_eq!(s.free_count + s.queued_count, 32);
        }
    }

    fn segs(lens: &[u16]) -> Vec<Segment> {
        lens.iter()
            .enumerate()
            .map(|(i, &l)| Segment::new(0x10_0000 + i as u64 * 0x800, l))
            .collect()
    }

    const INJ: DmaDirection = DmaDirection::MemToDev;
    const XTR: DmaDirection = DmaDirection::DevToMem;

    #[test]
    fn single_segment_injection() {
        let f = fixture(FdmaConfig::default());
        let ch = f.ch(0);
        assert_eq!(ch.state(), ChanState::Idle);
        ch.alloc_resources().unwrap();
        assert_eq!(ch.state(), ChanState::Active);

        let h = ch.submit(&segs(&[100]), INJ, f.record(1)).unwrap();
        let q = ch.queued();
        assert_eq!(q.len(), 1);
        let (d, dcb) = q[0];
        assert_eq!(dcb.state, DcbState::Queued);
        assert!(dcb.is_last_dcb);
        let flags = status_flags(ch.mem().read(d).db[0].status);
        assert!(flags.contains(DbStatus::SOF | DbStatus::EOF));
        assert_eq!(
            ch.tx_status(h),
            Some(TxStatus { state: TxState::InProgress, residue: 100 })
        );

        ch.issue();
        assert_eq!(ch.state(), ChanState::Running);
        assert_eq!(ch.queued()[0].1.state, DcbState::Issued);

        assert_eq!(f.sim.run(0), 1);
        assert!(!ch.on_completion());
        let seen = f.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].1,
            Completion {
                result: DmaResult::NoError,
                residue: 0,
                len: 100,
                last: true
            }
        );
        assert_eq!(ch.tx_status(h).unwrap().state, TxState::Complete);
        assert_eq!(ch.completed_cookie(), MIN_COOKIE);

        // A second walk reports nothing new.
        ch.on_completion();
        assert!(f.seen().is_empty());
        f.conserved(0);
    }

    #[test]
    fn transfer_spans_dcbs() {
        let cfg = FdmaConfig { db_per_dcb: 2, ..Default::default() };
        let f = fixture(cfg);
        let ch = f.ch(1);
        ch.alloc_resources().unwrap();

        ch.submit(&segs(&[50, 50, 50]), INJ, f.record(1)).unwrap();
        let q = ch.queued();
        assert_eq!(q.len(), 2);
        assert!(!q[0].1.is_last_dcb);
        assert!(q[1].1.is_last_dcb);
        assert_eq!(q[1].1.first, q[0].0);
        assert_eq!((q[0].1.valid_blocks, q[1].1.valid_blocks), (2, 1));
        f.conserved(1);

        ch.issue();
        assert_eq!(ch.mem().read(q[0].0).nextptr, ch.mem().addr(q[1].0));
        assert_eq!(ch.mem().read(q[1].0).nextptr, DCB_INVALID);

        // Finish only the first DCB: no frame has ended yet.
        assert_eq!(f.sim.run_blocks(1, 2), 2);
        ch.on_completion();
        assert!(f.seen().is_empty());
        assert_eq!(ch.tx_status(TxHandle(1)).unwrap().residue, 50);

        f.sim.run(1);
        ch.on_completion();
        let seen = f.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1.residue, 0);
        assert_eq!(seen[0].1.len, 150);
        assert!(seen[0].1.last);

        // The first DCB is behind the hardware and has been freed; the
        // tail stays queued until something follows it.
        assert_eq!(ch.queued().len(), 1);
        f.conserved(1);
    }

    #[test]
    fn four_segments_at_hardware_maximum() {
        let f = fixture(FdmaConfig::default());
        let ch = f.ch(2);
        ch.alloc_resources().unwrap();
        ch.submit(&segs(&[100, 200, 300, 400]), INJ, f.record(1)).unwrap();
        let q = ch.queued();
        assert_eq!(q.len(), 2);
        assert_eq!((q[0].1.valid_blocks, q[1].1.valid_blocks), (3, 1));
        let tail = ch.mem().read(q[1].0);
        assert!(status_flags(tail.db[0].status).contains(DbStatus::EOF));
        assert!(!status_flags(tail.db[0].status).contains(DbStatus::SOF));

        ch.issue();
        f.sim.run(2);
        ch.on_completion();
        let seen = f.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1.len, 1000);
        assert_eq!(seen[0].1.residue, 0);
    }

    #[test]
    fn callbacks_in_submission_order() {
        let f = fixture(FdmaConfig::default());
        let ch = f.ch(3);
        ch.alloc_resources().unwrap();

        for tag in 1..=3 {
            ch.submit(&segs(&[64, 64]), INJ, f.record(tag)).unwrap();
        }
        ch.issue();
        // Submissions made after an issue wait for the next one.
        ch.submit(&segs(&[64]), INJ, f.record(4)).unwrap();
        f.sim.run(3);
        ch.on_completion();
        let tags: Vec<u64> = f.seen().iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![1, 2, 3]);

        ch.issue();
        f.sim.run(3);
        ch.on_completion();
        let tags: Vec<u64> = f.seen().iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![4]);
        assert_eq!(ch.completed_cookie(), MIN_COOKIE + 3);
        assert_eq!(ch.stats().completed, 4);
        f.conserved(3);
    }

    #[test]
    fn callback_may_resubmit() {
        let f = fixture(FdmaConfig::default());
        let fdma = Arc::new(f.fdma);
        let again = fdma.clone();
        let ch = fdma.channel(0).unwrap();
        ch.alloc_resources().unwrap();

        let cb: Callback = Box::new(move |_| {
            let ch = again.channel(0).unwrap();
            ch.submit(&segs(&[32]), INJ, None).unwrap();
            ch.issue();
        });
        ch.submit(&segs(&[32]), INJ, Some(cb)).unwrap();
        ch.issue();
        f.sim.run(0);
        ch.on_completion();
        assert_eq!(ch.stats().submitted, 2);
        assert_eq!(ch.stats().completed, 1);
    }

    #[test]
    fn ring_runs_dry() {
        let cfg =
            FdmaConfig { dcb_max: 4, db_per_dcb: 1, ..Default::default() };
        let f = fixture(cfg);
        let ch = f.ch(0);
        ch.alloc_resources().unwrap();

        ch.submit(&segs(&[10, 10, 10]), INJ, None).unwrap();
        assert_eq!(
            ch.submit(&segs(&[10, 10]), INJ, None),
            Err(FdmaError::NoDcb { ch: 0 })
        );
        let s = ch.stats();
        assert_eq!((s.free_count, s.queued_count, s.low_water), (1, 3, 1));
        ch.submit(&segs(&[10]), INJ, None).unwrap();
        assert_eq!(ch.stats().low_water, 0);
    }

    #[test]
    fn submit_rejected() {
        let f = fixture(FdmaConfig::default());
        let ch = f.ch(0);
        assert_eq!(
            ch.submit(&segs(&[10]), INJ, None),
            Err(FdmaError::BadState { ch: 0, state: ChanState::Idle })
        );
        ch.alloc_resources().unwrap();
        assert_eq!(
            ch.submit(&segs(&[10]), XTR, None),
            Err(FdmaError::Direction { ch: 0, dir: XTR })
        );
        assert_eq!(ch.submit(&[], INJ, None), Err(FdmaError::Empty));
        assert_eq!(
            ch.submit(&segs(&[10, 0]), INJ, None),
            Err(FdmaError::BadSegment { index: 1 })
        );
        assert_eq!(
            ch.alloc_resources(),
            Err(FdmaError::BadState { ch: 0, state: ChanState::Active })
        );

        ch.free_resources();
        assert_eq!(ch.state(), ChanState::Stopping);
        assert_eq!(
            ch.submit(&segs(&[10]), INJ, None),
            Err(FdmaError::BadState { ch: 0, state: ChanState::Stopping })
        );
        ch.issue();
        assert!(f.log.contains(LogLevel::Note, "issue while STOPPING"));
    }

    #[test]
    fn issue_with_nothing_queued() {
        let f = fixture(FdmaConfig::default());
        let ch = f.ch(0);
        ch.alloc_resources().unwrap();
        ch.issue();
        assert_eq!(ch.state(), ChanState::Active);
        assert!(f.log.contains(LogLevel::Warn, "nothing queued"));
    }

    #[test]
    fn sync_aborts_outstanding() {
        let f = fixture(FdmaConfig::default());
        let ch = f.ch(4);
        ch.alloc_resources().unwrap();
        let a = ch.submit(&segs(&[100]), INJ, f.record(1)).unwrap();
        let b = ch.submit(&segs(&[200]), INJ, f.record(2)).unwrap();
        ch.issue();
        assert_eq!(ch.queued().len(), 2);
        assert!(ch.queued().iter().all(|(_, d)| d.state == DcbState::Issued));

        f.sim.stall(4, true);
        ch.free_resources();
        ch.sync();
        assert!(f.log.contains(LogLevel::Warn, "sync timed out"));

        let seen = f.seen();
        assert_eq!(seen.len(), 2);
        for (_, c) in &seen {
            assert_eq!(c.result, DmaResult::Aborted);
            assert_eq!(c.residue, 0);
        }
        assert_eq!(ch.state(), ChanState::Idle);
        assert_eq!(ch.tx_status(a).unwrap().state, TxState::Error);
        assert_eq!(ch.tx_status(b).unwrap().state, TxState::Error);
        assert_eq!(ch.stats().aborted, 2);
        f.conserved(4);

        // Ready for another allocation.
        f.sim.stall(4, false);
        ch.alloc_resources().unwrap();
        assert_eq!(ch.state(), ChanState::Active);
        assert_eq!(ch.tx_status(a).unwrap().state, TxState::Error);
        assert_eq!(ch.tx_status(b).unwrap().state, TxState::Error);

        // A transfer of the new allocation gets a fresh handle.
        let c = ch.submit(&segs(&[50]), INJ, f.record(3)).unwrap();
        assert!(c.0 > b.0);
        assert_eq!(ch.tx_status(c).unwrap().state, TxState::InProgress);
    }

    #[test]
    fn extraction_frames() {
        let f = fixture(FdmaConfig::default());
        let ch = f.ch(6);
        ch.alloc_resources().unwrap();

        // Two receive DCBs of three 128-byte buffers each.
        let bufs = segs(&[128; 6]);
        ch.submit(&bufs, XTR, f.record(1)).unwrap();
        ch.issue();

        // One frame in a single block, then one spanning into the next
        // DCB.
        assert!(f.sim.receive(6, 60));
        assert!(f.sim.receive(6, 300));
        ch.on_completion();
        let seen = f.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1.len, 60);
        assert_eq!(seen[0].1.residue, 768 - 60);
        assert!(!seen[0].1.last);
        assert_eq!(seen[1].1.len, 300);
        assert_eq!(seen[1].1.residue, 768 - 360);

        // The walk moved past the first DCB and freed it.
        assert_eq!(ch.queued().len(), 1);
        f.conserved(6);

        assert!(f.sim.receive(6, 100));
        assert!(f.sim.receive(6, 128));
        assert!(!f.sim.receive(6, 10));
        ch.on_completion();
        let seen = f.seen();
        assert_eq!(seen.len(), 2);
        assert!(!seen[0].1.last);
        assert!(seen[1].1.last);
        assert_eq!(seen[1].1.residue, 768 - 588);
        assert_eq!(ch.stats().completed, 1);
    }

    #[test]
    fn frame_spans_transfers() {
        let cfg = FdmaConfig { db_per_dcb: 1, ..Default::default() };
        let f = fixture(cfg);
        let ch = f.ch(6);
        ch.alloc_resources().unwrap();
        let a = ch.submit(&segs(&[128]), XTR, f.record(1)).unwrap();
        let b = ch.submit(&segs(&[128]), XTR, f.record(2)).unwrap();
        ch.issue();

        assert!(f.sim.receive(6, 200));
        ch.on_completion();
        let seen = f.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            (
                1,
                Completion {
                    result: DmaResult::NoError,
                    residue: 0,
                    len: 0,
                    last: true
                }
            )
        );
        assert_eq!(
            seen[1],
            (
                2,
                Completion {
                    result: DmaResult::NoError,
                    residue: 56,
                    len: 200,
                    last: true
                }
            )
        );
        let total: u32 = seen.iter().map(|(_, c)| c.len).sum();
        assert_eq!(total, 200);

        assert_eq!(ch.tx_status(a).unwrap().state, TxState::Complete);
        assert_eq!(ch.tx_status(b).unwrap().state, TxState::Complete);
        let s = ch.stats();
        assert_eq!((s.submitted, s.completed), (2, 2));
        f.conserved(6);
    }

    #[test]
    fn extraction_walk_is_bounded() {
        let cfg = FdmaConfig { db_per_dcb: 1, ..Default::default() };
        let f = fixture(cfg);
        let ch = f.ch(7);
        ch.alloc_resources().unwrap();
        for _ in 0..12 {
            ch.submit(&segs(&[64]), XTR, f.record(1)).unwrap();
        }
        ch.issue();
        for _ in 0..12 {
            assert!(f.sim.receive(7, 64));
        }

        // Moving to the next DCB costs a step too.
        assert!(ch.on_completion());
        let first = f.seen().len();
        assert!(first < 12);
        while ch.on_completion() {}
        assert_eq!(first + f.seen().len(), 12);
        f.conserved(7);
    }
}

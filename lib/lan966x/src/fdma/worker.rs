// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The completion worker.
//!
//! Interrupt context only ORs the raised channels into a pending mask
//! and wakes the worker, so a burst of interrupts for one channel
//! coalesces into one walk. The worker is the only thread that runs
//! completion walks, which keeps every channel's walk single-threaded.

use super::channel::Channel;
use crate::ddi::sync::KCondvar;
use crate::ddi::sync::KMutex;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Default)]
struct Pending {
    mask: u32,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    pending: KMutex<Pending>,
    cv: KCondvar,
}

pub(crate) struct IntrWorker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl IntrWorker {
    pub(crate) fn spawn(channels: Vec<Arc<Channel>>) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let s = shared.clone();
        let thread = std::thread::Builder::new()
            .name("fdma-completion".to_string())
            .spawn(move || run(&s, &channels))?;
        Ok(Self { shared, thread: Some(thread) })
    }

    pub(crate) fn notify(&self, mask: u32) {
        if mask == 0 {
            return;
        }
        self.shared.pending.lock().mask |= mask;
        self.shared.cv.notify_one();
    }
}

impl Drop for IntrWorker {
    fn drop(&mut self) {
        self.shared.pending.lock().shutdown = true;
        self.shared.cv.notify_all();
        // The last handle may be dropped by a callback on the worker
        // itself.
        if let Some(t) = self.thread.take() {
            if t.thread().id() != std::thread::current().id() {
                let _ = t.join();
            }
        }
    }
}

fn run(shared: &Shared, channels: &[Arc<Channel>]) {
    loop {
        let mask = {
            let mut p = shared.pending.lock();
            while p.mask == 0 && !p.shutdown {
                p = shared.cv.wait(p);
            }
            if p.shutdown {
                return;
            }
            core::mem::take(&mut p.mask)
        };

        // A walk that ran out of budget goes to the back of the line.
        let mut again = 0;
        for ch in channels {
            let bit = 1u32 << ch.id();
            if mask & bit != 0 && ch.on_completion() {
                again |= bit;
            }
        }
        if again != 0 {
            shared.pending.lock().mask |= again;
        }
    }
}

#[cfg(test)]
mod test {
    use crate::ExecCtx;
    use crate::api::Completion;
    use crate::api::DmaDirection;
    use crate::api::Segment;
    use crate::fdma::Fdma;
    use crate::fdma::FdmaConfig;
    use crate::fdma::sim::SimFdma;
    use crate::provider::CaptureLog;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn coalesced_interrupts() {
        let cfg = FdmaConfig { db_per_dcb: 1, ..Default::default() };
        let sim = Arc::new(SimFdma::new(cfg.channels));
        let f = Fdma::new(ExecCtx::new(CaptureLog::new()), cfg, sim.clone())
            .unwrap();
        let (tx, rx) = mpsc::channel::<(u8, Completion)>();

        f.alloc_channel_resources(6).unwrap();
        for i in 0..16 {
            let tx = tx.clone();
            f.prep_slave_sg(
                6,
                &[Segment::new(0x1000 * i, 256)],
                DmaDirection::DevToMem,
                Some(Box::new(move |c| {
                    let _ = tx.send((i as u8, c));
                })),
            )
            .unwrap();
        }
        f.issue_pending(6).unwrap();

        for _ in 0..16 {
            assert!(sim.receive(6, 200));
        }
        // One interrupt for all sixteen frames; the worker requeues
        // itself until the walk catches up.
        f.interrupt(sim.take_interrupts());
        let got: Vec<u8> = (0..16)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().0)
            .collect();
        assert_eq!(got, (0..16).collect::<Vec<u8>>());
    }
}

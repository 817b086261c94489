// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Drive the FDMA engine against the simulated block, through the
//! same entry points a network driver uses.

use lan966x::ExecCtx;
use lan966x::LogLevel;
use lan966x::api::Completion;
use lan966x::api::DmaDirection;
use lan966x::api::DmaResult;
use lan966x::api::Segment;
use lan966x::api::TxState;
use lan966x::fdma::Callback;
use lan966x::fdma::ChanState;
use lan966x::fdma::Fdma;
use lan966x::fdma::FdmaConfig;
use lan966x::fdma::FdmaError;
use lan966x::fdma::sim::SimFdma;
use lan966x::print::print_channels_into;
use lan966x::provider::CaptureLog;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;
use std::time::Duration;

const INJ: DmaDirection = DmaDirection::MemToDev;
const XTR: DmaDirection = DmaDirection::DevToMem;

fn engine(cfg: FdmaConfig) -> (Fdma, Arc<SimFdma>, Arc<CaptureLog>) {
    let sim = Arc::new(SimFdma::new(cfg.channels));
    let log = Arc::new(CaptureLog::new());
    let fdma = Fdma::new(ExecCtx::new(log.clone()), cfg, sim.clone()).unwrap();
    (fdma, sim, log)
}

fn segs(lens: &[u16]) -> Vec<Segment> {
    lens.iter()
        .enumerate()
        .map(|(i, &l)| Segment::new(0x40_0000 + i as u64 * 0x800, l))
        .collect()
}

fn conserved(fdma: &Fdma, ch: u8) {
    let s = &fdma.stats()[ch as usize];
    assert_eq!(
        s.free_count + s.queued_count,
        fdma.config().dcb_max,
        "channel {ch}: {s:?}"
    );
}

#[test]
fn loopback_through_worker() {
    let (fdma, sim, _) = engine(FdmaConfig::default());
    let (tx, rx) = mpsc::channel::<(u8, u64, Completion)>();
    let send = |ch: u8, tag: u64| -> Option<Callback> {
        let tx = tx.clone();
        Some(Box::new(move |c| {
            let _ = tx.send((ch, tag, c));
        }))
    };

    fdma.alloc_channel_resources(0).unwrap();
    fdma.alloc_channel_resources(6).unwrap();

    for tag in 0..3 {
        fdma.prep_slave_sg(6, &segs(&[256]), XTR, send(6, tag)).unwrap();
    }
    fdma.issue_pending(6).unwrap();

    let frames: [&[u16]; 3] = [&[60], &[100, 120], &[64, 64, 64]];
    for (tag, lens) in frames.iter().enumerate() {
        fdma.prep_slave_sg(0, &segs(lens), INJ, send(0, tag as u64))
            .unwrap();
    }
    fdma.issue_pending(0).unwrap();

    // Every injected frame comes straight back on extraction.
    assert_eq!(sim.run(0), 6);
    for lens in frames {
        let len: u16 = lens.iter().sum();
        assert!(sim.receive(6, len as u32));
    }
    fdma.interrupt(sim.take_interrupts());

    let mut got: Vec<(u8, u64, Completion)> = (0..6)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    got.sort_by_key(|(ch, tag, _)| (*ch, *tag));
    let lens: Vec<(u8, u32)> =
        got.iter().map(|(ch, _, c)| (*ch, c.len)).collect();
    assert_eq!(
        lens,
        vec![(0, 60), (0, 220), (0, 192), (6, 60), (6, 220), (6, 192)]
    );
    for (ch, _, c) in &got {
        assert_eq!(c.result, DmaResult::NoError, "channel {ch}");
        assert!(c.last);
    }

    let stats = fdma.stats();
    assert_eq!(stats[0].completed, 3);
    assert_eq!(stats[6].completed, 3);
    let mut out = Vec::new();
    print_channels_into(&mut out, &stats).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("RUNNING"));
    assert!(out.contains("xtr"));

    for ch in [0, 6] {
        fdma.free_channel_resources(ch).unwrap();
        fdma.synchronize(ch).unwrap();
        assert_eq!(fdma.channel(ch).unwrap().state(), ChanState::Idle);
        conserved(&fdma, ch);
    }
}

#[test]
fn ring_conserved_under_churn() {
    let cfg = FdmaConfig { dcb_max: 8, db_per_dcb: 2, ..Default::default() };
    let (fdma, sim, _) = engine(cfg);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = |tag: u64| -> Option<Callback> {
        let seen = seen.clone();
        Some(Box::new(move |c| seen.lock().unwrap().push((tag, c))))
    };

    fdma.alloc_channel_resources(0).unwrap();
    let mut next = 0u64;
    for round in 0..24 {
        loop {
            let n = 1 + (next % 4) as usize;
            let lens = vec![64u16; n];
            match fdma.prep_slave_sg(0, &segs(&lens), INJ, record(next)) {
                Ok(_) => next += 1,
                Err(FdmaError::NoDcb { ch: 0 }) => break,
                Err(e) => panic!("unexpected submit error: {e}"),
            }
            conserved(&fdma, 0);
        }

        fdma.issue_pending(0).unwrap();
        sim.run_blocks(0, 1 + round % 5);
        fdma.service(0).unwrap();
        conserved(&fdma, 0);
    }

    for _ in 0..100 {
        sim.run(0);
        let more = fdma.service(0).unwrap();
        let s = &fdma.stats()[0];
        if !more && s.completed == s.submitted {
            break;
        }
    }

    let seen = core::mem::take(&mut *seen.lock().unwrap());
    let tags: Vec<u64> = seen.iter().map(|(t, _)| *t).collect();
    assert_eq!(tags, (0..next).collect::<Vec<u64>>());
    for (tag, c) in &seen {
        let want = 64 * (1 + (tag % 4) as u32);
        assert_eq!((c.len, c.residue, c.last), (want, 0, true));
    }

    let s = &fdma.stats()[0];
    assert_eq!(s.completed, next);
    assert_eq!(s.low_water, 0);
    conserved(&fdma, 0);
}

#[test]
fn hung_extraction_torn_down() {
    let cfg = FdmaConfig {
        sync_timeout: Duration::from_millis(2),
        ..Default::default()
    };
    let (fdma, sim, log) = engine(cfg);
    let seen = Arc::new(Mutex::new(Vec::new()));

    fdma.alloc_channel_resources(6).unwrap();
    let mut handles = Vec::new();
    for tag in 0..3u64 {
        let seen = seen.clone();
        let cb: Callback =
            Box::new(move |c| seen.lock().unwrap().push((tag, c)));
        handles.push(
            fdma.prep_slave_sg(6, &segs(&[512, 512]), XTR, Some(cb)).unwrap(),
        );
    }
    fdma.issue_pending(6).unwrap();

    sim.stall(6, true);
    fdma.free_channel_resources(6).unwrap();
    assert!(log.contains(LogLevel::Warn, "not empty before stop"));
    assert!(log.contains(LogLevel::Warn, "not empty after stop"));
    assert_eq!(fdma.channel(6).unwrap().state(), ChanState::Stopping);

    fdma.synchronize(6).unwrap();
    assert!(log.contains(LogLevel::Warn, "sync timed out"));
    assert_eq!(fdma.channel(6).unwrap().state(), ChanState::Idle);

    let seen = core::mem::take(&mut *seen.lock().unwrap());
    assert_eq!(seen.len(), 3);
    for (_, c) in &seen {
        assert_eq!(c.result, DmaResult::Aborted);
        assert!(c.last);
    }
    for h in handles {
        assert_eq!(fdma.tx_status(6, h).unwrap().state, TxState::Error);
    }
    assert_eq!(fdma.stats()[6].aborted, 3);
    conserved(&fdma, 6);

    // Freeing an idle channel again is harmless.
    fdma.free_channel_resources(6).unwrap();
    assert_eq!(fdma.channel(6).unwrap().state(), ChanState::Idle);
}

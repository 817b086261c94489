// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Moments and bounded hardware polling.

use core::time::Duration;
use std::time::Instant;

/// A moment in time.
#[derive(Clone, Copy, Debug)]
pub struct Moment {
    inner: Instant,
}

impl Moment {
    pub fn now() -> Self {
        Self { inner: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.elapsed()
    }
}

/// Poll `cond` every `interval` until it holds or `timeout` passes.
///
/// Return `true` if the condition was observed. The condition is
/// always evaluated one final time after the deadline, so a condition
/// that becomes true right at the deadline is not reported as a
/// timeout.
pub fn poll_timeout<F>(
    timeout: Duration,
    interval: Duration,
    mut cond: F,
) -> bool
where
    F: FnMut() -> bool,
{
    let start = Moment::now();

    loop {
        if cond() {
            return true;
        }

        if start.elapsed() >= timeout {
            return cond();
        }

        if interval.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(interval);
        }
    }
}

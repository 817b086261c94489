// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Abstractions over the driver services the engine depends on:
//! locks, condition variables, and time.
pub mod sync;
pub mod time;

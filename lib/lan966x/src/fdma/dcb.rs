// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Descriptor control blocks.
//!
//! A DCB is the record the FDMA hardware walks: a pointer to the next
//! DCB, an info word, and up to [`FDMA_DB_MAX`] data blocks, each a
//! buffer pointer and a status word. The layout is bit-exact with the
//! LAN966x so that a ring can be handed to real hardware.
//!
//! ```text
//!   0  nextptr          physical address of the next DCB, or 1
//!   8  info             DATAL[15:0] TOKEN[17] INTR[18] SW[31:24]
//!  16  db[0].dataptr
//!  24  db[0].status     BLOCKL[15:0] SOF[16] EOF[17] INTR[18]
//!                       DONE[19] BLOCKO[31:20]
//!  32  db[1] ...
//! ```

use crate::ddi::sync::KMutex;
use bitflags::bitflags;
use core::mem::size_of;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Data blocks in one DCB.
pub const FDMA_DB_MAX: usize = 3;

/// The `nextptr` of the last DCB of a list.
pub const DCB_INVALID: u64 = 0x1;

const BLOCKL_MASK: u64 = 0xffff;
const BLOCKO_SHIFT: u64 = 20;
const BLOCKO_MASK: u64 = 0xfff;
const DATAL_MASK: u64 = 0xffff;
const SW_SHIFT: u64 = 24;
const SW_MASK: u64 = 0xff;

/// The largest block offset the status word can hold.
pub const BLOCKO_MAX: u16 = BLOCKO_MASK as u16;

bitflags! {
    /// Flag bits of a data block status word.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DbStatus: u64 {
        const SOF = 1 << 16;
        const EOF = 1 << 17;
        const INTR = 1 << 18;
        const DONE = 1 << 19;
    }
}

bitflags! {
    /// Flag bits of a DCB info word.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DcbInfo: u64 {
        const TOKEN = 1 << 17;
        const INTR = 1 << 18;
    }
}

/// Build a status word.
pub fn db_status(flags: DbStatus, len: u16, offset: u16) -> u64 {
    flags.bits()
        | (len as u64 & BLOCKL_MASK)
        | ((offset as u64 & BLOCKO_MASK) << BLOCKO_SHIFT)
}

pub fn status_flags(status: u64) -> DbStatus {
    DbStatus::from_bits_truncate(status)
}

pub fn status_len(status: u64) -> u16 {
    (status & BLOCKL_MASK) as u16
}

pub fn status_offset(status: u64) -> u16 {
    ((status >> BLOCKO_SHIFT) & BLOCKO_MASK) as u16
}

/// Build an info word. The SW field carries the number of valid data
/// blocks.
pub fn dcb_info(flags: DcbInfo, datal: u16, blocks: u8) -> u64 {
    flags.bits()
        | (datal as u64 & DATAL_MASK)
        | ((blocks as u64 & SW_MASK) << SW_SHIFT)
}

pub fn info_blocks(info: u64) -> u8 {
    ((info >> SW_SHIFT) & SW_MASK) as u8
}

pub fn info_datal(info: u64) -> u16 {
    (info & DATAL_MASK) as u16
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, FromBytes, Immutable, IntoBytes, KnownLayout,
)]
pub struct HwDb {
    pub dataptr: u64,
    pub status: u64,
}

/// The hardware image of a DCB.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, FromBytes, Immutable, IntoBytes, KnownLayout,
)]
pub struct HwDcb {
    pub nextptr: u64,
    pub info: u64,
    pub db: [HwDb; FDMA_DB_MAX],
}

pub const DCB_SIZE: usize = size_of::<HwDcb>();
const _: () = assert!(DCB_SIZE == 64);

impl HwDcb {
    /// A DCB with no blocks, terminating its list.
    pub fn empty() -> Self {
        Self { nextptr: DCB_INVALID, ..Default::default() }
    }

    pub fn blocks(&self) -> u8 {
        info_blocks(self.info)
    }
}

/// The coherent memory one channel's DCBs live in, as seen by both the
/// CPU and the FDMA.
pub struct DcbMem {
    base: u64,
    dcbs: KMutex<Vec<HwDcb>>,
}

impl DcbMem {
    pub fn new(base: u64, count: usize) -> Self {
        Self { base, dcbs: KMutex::new(vec![HwDcb::empty(); count]) }
    }

    pub fn len(&self) -> usize {
        self.dcbs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bus address of DCB `idx`.
    pub fn addr(&self, idx: usize) -> u64 {
        self.base + (idx * DCB_SIZE) as u64
    }

    /// The DCB at bus address `addr`, if it is one of ours.
    pub fn index(&self, addr: u64) -> Option<usize> {
        let off = addr.checked_sub(self.base)? as usize;
        if off % DCB_SIZE != 0 {
            return None;
        }
        let idx = off / DCB_SIZE;
        (idx < self.len()).then_some(idx)
    }

    pub fn read(&self, idx: usize) -> HwDcb {
        self.dcbs.lock()[idx]
    }

    pub fn update<R>(&self, idx: usize, f: impl FnOnce(&mut HwDcb) -> R) -> R {
        f(&mut self.dcbs.lock()[idx])
    }

    /// The raw bytes of DCB `idx`, as the hardware reads them.
    pub fn bytes(&self, idx: usize) -> [u8; DCB_SIZE] {
        let mut out = [0u8; DCB_SIZE];
        out.copy_from_slice(self.dcbs.lock()[idx].as_bytes());
        out
    }
}

/// Software state of a DCB.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DcbState {
    /// On the free list.
    Idle,
    /// Filled by a submission, not yet handed to the hardware.
    Queued,
    /// Linked into the hardware list.
    Issued,
    Error,
    /// Every block has been accounted for.
    Complete,
}

/// Software shadow of a DCB.
#[derive(Clone, Copy, Debug)]
pub struct Dcb {
    pub state: DcbState,
    pub valid_blocks: u8,
    /// Blocks already accounted for by a completion walk.
    pub done_blocks: u8,
    /// The first DCB of the transfer this DCB belongs to.
    pub first: usize,
    pub is_last_dcb: bool,
    /// Size of each block as submitted.
    pub sizes: [u16; FDMA_DB_MAX],
    /// The transfer this DCB carries.
    pub tx: Option<u64>,
}

impl Default for Dcb {
    fn default() -> Self {
        Self {
            state: DcbState::Idle,
            valid_blocks: 0,
            done_blocks: 0,
            first: 0,
            is_last_dcb: false,
            sizes: [0; FDMA_DB_MAX],
            tx: None,
        }
    }
}

impl Dcb {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_word() {
        let s = db_status(DbStatus::SOF | DbStatus::EOF, 100, 2);
        assert_eq!(s, 100 | 1 << 16 | 1 << 17 | 2 << 20);
        assert_eq!(status_len(s), 100);
        assert_eq!(status_offset(s), 2);
        assert_eq!(status_flags(s), DbStatus::SOF | DbStatus::EOF);
        assert!(!status_flags(s).contains(DbStatus::DONE));

        let i = dcb_info(DcbInfo::INTR, 1518, 3);
        assert_eq!(info_blocks(i), 3);
        assert_eq!(info_datal(i), 1518);
    }

    #[test]
    fn layout_is_bit_exact() {
        let mem = DcbMem::new(0x1000, 4);
        assert_eq!(mem.addr(2), 0x1080);
        assert_eq!(mem.index(0x1080), Some(2));
        assert_eq!(mem.index(0x1084), None);
        assert_eq!(mem.index(0x1100), None);
        assert_eq!(mem.index(DCB_INVALID), None);

        mem.update(1, |d| {
            d.nextptr = 0x1080;
            d.db[1].dataptr = 0xdead_beef;
            d.db[1].status = db_status(DbStatus::DONE, 64, 0);
        });
        let b = mem.bytes(1);
        assert_eq!(&b[0..8], &0x1080u64.to_ne_bytes());
        assert_eq!(&b[32..40], &0xdead_beefu64.to_ne_bytes());
        assert_eq!(&b[40..48], &(64u64 | 1 << 19).to_ne_bytes());

        let back = HwDcb::read_from_bytes(&b[..]).unwrap();
        assert_eq!(back.nextptr, 0x1080);
        assert_eq!(status_len(back.db[1].status), 64);
    }
}

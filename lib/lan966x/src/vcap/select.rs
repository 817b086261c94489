// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Keyset selection.
//!
//! Given the key fields a rule needs and the keysets it may be placed
//! in, pick the keyset to use. When several keysets of the same size
//! are all acceptable, one rule can cover all of them by wildcarding
//! the bits of `TYPE` on which they disagree.

use super::model::KeyField;
use super::model::Keyset;
use itertools::Itertools;

/// The outcome of a keyset selection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Selection {
    /// Every keyset holding all required fields, in the order they
    /// were offered.
    pub matches: Vec<Keyset>,
    /// The keyset to use, if any keyset holds at least one required
    /// field or nothing was required.
    pub best_match: Option<Keyset>,
    /// Required fields `best_match` has no room for. Empty when
    /// `best_match` is a member of `matches`.
    pub unmatched_keys: Vec<KeyField>,
}

impl Selection {
    /// The best match if it holds every required field.
    pub fn exact(&self) -> Option<Keyset> {
        self.best_match.filter(|_| !self.matches.is_empty())
    }
}

/// Select a keyset for `required` among `keysets`.
///
/// A keyset whose fields are exactly `required` is preferred over any
/// other keyset holding them all; otherwise the first such keyset in
/// `keysets` order wins. When no keyset holds every field the one
/// missing the fewest wins, ties going to the earlier keyset.
///
/// This is a pure function of its inputs.
pub fn select(required: &[KeyField], keysets: &[Keyset]) -> Selection {
    let required: Vec<KeyField> = required
        .iter()
        .copied()
        .filter(|f| *f != KeyField::Type)
        .unique()
        .collect();

    let missing = |ks: Keyset| -> Vec<KeyField> {
        required.iter().copied().filter(|f| !ks.contains(*f)).collect()
    };

    let matches: Vec<Keyset> = keysets
        .iter()
        .copied()
        .unique()
        .filter(|ks| missing(*ks).is_empty())
        .collect();

    if !matches.is_empty() {
        let exact = matches.iter().copied().find(|ks| {
            ks.info().fields.len() == required.len()
        });
        return Selection {
            best_match: exact.or(matches.first().copied()),
            matches,
            unmatched_keys: Vec::new(),
        };
    }

    // `min_by_key` keeps the first of equal elements.
    let best = keysets.iter().copied().min_by_key(|ks| missing(*ks).len());

    Selection {
        matches,
        best_match: best,
        unmatched_keys: best.map(missing).unwrap_or_default(),
    }
}

/// A `TYPE` key covering several keysets of the same size.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TypeWildcard {
    /// The bits all type ids have set.
    pub value: u32,
    /// The bits on which the type ids disagree.
    pub wildcard: u32,
    /// The ternary mask: every bit of the field except the
    /// disagreeing ones.
    pub mask: u32,
}

impl TypeWildcard {
    /// Combine `type_ids` into one value/mask for a `width` bit
    /// `TYPE` field.
    pub fn compute(type_ids: &[u32], width: u8) -> Self {
        let all = type_ids.iter().fold(u32::MAX, |acc, t| acc & t);
        let any = type_ids.iter().fold(0, |acc, t| acc | t);
        let value = if type_ids.is_empty() { 0 } else { all };
        let wildcard = value ^ any;
        let width_mask = if width >= 32 { u32::MAX } else { (1 << width) - 1 };

        Self { value, wildcard, mask: !wildcard & width_mask }
    }

    /// Does this wildcard match `type_id`?
    pub fn matches(&self, type_id: u32) -> bool {
        type_id & self.mask == self.value & self.mask
    }

    /// The wildcard over the type ids of `keysets`, which must all be
    /// of one size.
    pub fn for_keysets(keysets: &[Keyset]) -> Self {
        let ids: Vec<u32> = keysets
            .iter()
            .filter(|ks| ks.type_id() >= 0)
            .map(|ks| ks.type_id() as u32)
            .collect();
        let width =
            keysets.iter().map(|ks| ks.info().type_width).max().unwrap_or(0);
        Self::compute(&ids, width)
    }
}

/// Split `keysets` into groups of equal `sw_per_item`, in order of
/// first appearance.
pub fn group_by_size(keysets: &[Keyset]) -> Vec<Vec<Keyset>> {
    keysets
        .iter()
        .map(|ks| ks.sw_per_item())
        .unique()
        .map(|size| {
            keysets
                .iter()
                .copied()
                .filter(|ks| ks.sw_per_item() == size)
                .collect()
        })
        .collect()
}

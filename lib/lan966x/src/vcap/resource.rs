// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Hardware resources reserved by offloaded actions.

use super::rule::VcapUser;
use crate::api::PortId;
use crate::ddi::sync::KMutex;
use core::fmt;
use core::fmt::Display;

/// A marker trait indicating a type is an entry acquired from a
/// [`Resource`].
pub trait ResourceEntry {}

/// A marker trait indicating a type is a resource.
pub trait Resource {}

/// A finite resource represents a shared map from a key to an
/// exclusively owned [`ResourceEntry`].
///
/// The idea being that a single consumer takes ownership of the
/// [`ResourceEntry`] for some amount of time; and while that consumer
/// owns the entry no other consumer may have access to it. The
/// resource represents a finite collection of entries, and thus may
/// be exhausted at any given moment.
pub trait FiniteResource: Resource {
    type Key: Clone;
    type Entry: ResourceEntry;

    /// Obtain a new entry given the key.
    ///
    /// Callers are responsible for manually `release`ing this entry
    /// into the correct parent pool.
    ///
    /// # Errors
    ///
    /// Return an error if the key is already held, is out of range,
    /// or if the resource is exhausted.
    fn obtain_raw(&self, key: &Self::Key)
    -> Result<Self::Entry, ResourceError>;

    /// Release the entry back to the available resources.
    fn release(&self, key: &Self::Key, entry: Self::Entry);
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ResourceError {
    #[error("no free {0} left")]
    Exhausted(&'static str),

    #[error("{name} {index} is already in use")]
    InUse { name: &'static str, index: u32 },

    #[error("{name} index {index} out of range")]
    OutOfRange { name: &'static str, index: u32 },

    #[error("Cannot change the mirror monitor port while in use")]
    MonitorInUse,

    #[error("Cannot mirror the monitor port")]
    MirrorMonitor,
}

/// How an [`IndexPool`] maps a requested index onto a slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolMode {
    /// Any free slot will do.
    Any,
    /// The slot is the requested index.
    Exact,
}

/// A hardware slot handed out by an [`IndexPool`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolEntry(pub u32);

impl ResourceEntry for PoolEntry {}

/// A pool of hardware indices (policers, stream filters, stream
/// gates), each reserved by a (user, requested index) key.
pub struct IndexPool {
    name: &'static str,
    mode: PoolMode,
    slots: KMutex<Vec<Option<(VcapUser, u32)>>>,
}

impl IndexPool {
    pub fn new(name: &'static str, mode: PoolMode, count: u32) -> Self {
        Self {
            name,
            mode,
            slots: KMutex::new(vec![None; count as usize]),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> u32 {
        self.slots.lock().len() as u32
    }

    pub fn in_use(&self) -> u32 {
        self.slots.lock().iter().filter(|s| s.is_some()).count() as u32
    }

    /// The slot `key` holds, if any.
    pub fn lookup(&self, key: &(VcapUser, u32)) -> Option<PoolEntry> {
        self.slots
            .lock()
            .iter()
            .position(|s| s.as_ref() == Some(key))
            .map(|i| PoolEntry(i as u32))
    }
}

impl Resource for IndexPool {}

impl FiniteResource for IndexPool {
    type Key = (VcapUser, u32);
    type Entry = PoolEntry;

    fn obtain_raw(
        &self,
        key: &Self::Key,
    ) -> Result<Self::Entry, ResourceError> {
        let mut slots = self.slots.lock();
        let (_, index) = *key;

        if slots.iter().any(|s| s.as_ref() == Some(key)) {
            return Err(ResourceError::InUse { name: self.name, index });
        }

        let slot = match self.mode {
            PoolMode::Any => slots
                .iter()
                .position(|s| s.is_none())
                .ok_or(ResourceError::Exhausted(self.name))?,

            PoolMode::Exact => {
                let i = index as usize;
                match slots.get(i) {
                    None => {
                        return Err(ResourceError::OutOfRange {
                            name: self.name,
                            index,
                        });
                    }
                    Some(Some(_)) => {
                        return Err(ResourceError::InUse {
                            name: self.name,
                            index,
                        });
                    }
                    Some(None) => i,
                }
            }
        };

        slots[slot] = Some(*key);
        Ok(PoolEntry(slot as u32))
    }

    fn release(&self, key: &Self::Key, entry: Self::Entry) {
        let mut slots = self.slots.lock();
        match slots.get_mut(entry.0 as usize) {
            Some(slot) if slot.as_ref() == Some(key) => *slot = None,
            _ => panic!(
                "cannot release {} slot {} not held by {:?}",
                self.name, entry.0, key
            ),
        }
    }
}

/// The single mirror monitor port of the switch.
#[derive(Debug, Default)]
pub struct MirrorState {
    port: Option<PortId>,
    users: u32,
}

impl MirrorState {
    /// Take a reference on `monitor` as the mirror destination for
    /// frames received on `ingress`.
    pub fn reserve(
        &mut self,
        monitor: PortId,
        ingress: PortId,
    ) -> Result<(), ResourceError> {
        if monitor == ingress {
            return Err(ResourceError::MirrorMonitor);
        }

        match self.port {
            Some(p) if p != monitor && self.users > 0 => {
                return Err(ResourceError::MonitorInUse);
            }
            _ => (),
        }

        self.port = Some(monitor);
        self.users += 1;
        Ok(())
    }

    /// Drop a reference taken by [`MirrorState::reserve`].
    pub fn release(&mut self) {
        self.users = self.users.saturating_sub(1);
        if self.users == 0 {
            self.port = None;
        }
    }

    pub fn port(&self) -> Option<PortId> {
        self.port
    }

    pub fn users(&self) -> u32 {
        self.users
    }
}

/// Every pool the flower compiler reserves from.
pub struct Resources {
    pub policers: IndexPool,
    pub sfid: IndexPool,
    pub sgid: IndexPool,
    pub mirror: MirrorState,
}

impl Resources {
    pub fn new(policers: u32, sfid: u32, sgid: u32) -> Self {
        Self {
            policers: IndexPool::new("policer", PoolMode::Any, policers),
            sfid: IndexPool::new("stream filter", PoolMode::Any, sfid),
            sgid: IndexPool::new("stream gate", PoolMode::Exact, sgid),
            mirror: MirrorState::default(),
        }
    }
}

/// A reservation made while compiling one rule, kept so that it can be
/// given back if the rule never makes it into hardware.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reservation {
    Policer { key: (VcapUser, u32), entry: PoolEntry },
    Sfid { key: (VcapUser, u32), entry: PoolEntry },
    Sgid { key: (VcapUser, u32), entry: PoolEntry },
    Mirror,
}

impl Reservation {
    pub fn release(self, res: &mut Resources) {
        match self {
            Self::Policer { key, entry } => res.policers.release(&key, entry),
            Self::Sfid { key, entry } => res.sfid.release(&key, entry),
            Self::Sgid { key, entry } => res.sgid.release(&key, entry),
            Self::Mirror => res.mirror.release(),
        }
    }
}

impl Display for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Policer { entry, .. } => write!(f, "policer {}", entry.0),
            Self::Sfid { entry, .. } => write!(f, "sfid {}", entry.0),
            Self::Sgid { entry, .. } => write!(f, "sgid {}", entry.0),
            Self::Mirror => write!(f, "mirror"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn any_pool() {
        let pool = IndexPool::new("policer", PoolMode::Any, 2);
        let k1 = (VcapUser::TcFlower, 100);
        let k2 = (VcapUser::TcFlower, 7);

        let e1 = pool.obtain_raw(&k1).unwrap();
        assert_eq!(e1, PoolEntry(0));
        assert_eq!(
            pool.obtain_raw(&k1),
            Err(ResourceError::InUse { name: "policer", index: 100 })
        );

        let e2 = pool.obtain_raw(&k2).unwrap();
        assert_eq!(e2, PoolEntry(1));
        assert_eq!(
            pool.obtain_raw(&(VcapUser::TcExtra, 1)),
            Err(ResourceError::Exhausted("policer"))
        );
        assert_eq!(pool.lookup(&k2), Some(e2));

        pool.release(&k1, e1);
        assert_eq!(pool.in_use(), 1);
        assert_eq!(pool.obtain_raw(&k1).unwrap(), PoolEntry(0));
    }

    #[test]
    fn exact_pool() {
        let pool = IndexPool::new("stream gate", PoolMode::Exact, 4);
        let k = (VcapUser::TcFlower, 3);
        assert_eq!(pool.obtain_raw(&k).unwrap(), PoolEntry(3));
        assert!(matches!(
            pool.obtain_raw(&(VcapUser::TcExtra, 3)),
            Err(ResourceError::InUse { .. })
        ));
        assert!(matches!(
            pool.obtain_raw(&(VcapUser::TcFlower, 4)),
            Err(ResourceError::OutOfRange { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn release_unheld_panics() {
        let pool = IndexPool::new("policer", PoolMode::Any, 2);
        pool.release(&(VcapUser::TcFlower, 1), PoolEntry(0));
    }

    #[test]
    fn mirror_monitor() {
        let mut m = MirrorState::default();
        assert_eq!(m.reserve(2, 2), Err(ResourceError::MirrorMonitor));

        m.reserve(2, 0).unwrap();
        m.reserve(2, 1).unwrap();
        assert_eq!(m.reserve(3, 0), Err(ResourceError::MonitorInUse));
        assert_eq!(m.users(), 2);

        m.release();
        m.release();
        assert_eq!(m.port(), None);
        m.reserve(3, 0).unwrap();
        assert_eq!(m.port(), Some(3));
    }
}

//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Hash-identified, refcounted debug name registry.
//!
//! Resources and command queues carry a name for debug-marker purposes
//! (push/pop debug group calls, log messages) without paying for a `String`
//! clone at every comparison; only the 64-bit hash travels through hot
//! paths, and the table is where the hash can be turned back into a string
//! for a human.
use parking_lot::Mutex;
use std::collections::HashMap;

/// Hash `0` is reserved for "unnamed"; it is never handed out for a real
/// string so callers can use it as a sentinel.
pub const UNNAMED_HASH: u64 = 0;

fn fnv1a(s: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    // Hash 0 is reserved, so perturb the rare collision deterministically.
    if hash == UNNAMED_HASH {
        hash = PRIME;
    }
    hash
}

struct Entry {
    name: String,
    refcount: u64,
}

/// Map from a 64-bit name hash to the original string plus a refcount of
/// how many live holders reference it.
#[derive(Default)]
pub struct NameTable {
    entries: Mutex<HashMap<u64, Entry>>,
}

impl NameTable {
    pub fn new() -> Self {
        NameTable {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Hashes `name`, inserting a fresh entry or bumping the refcount of an
    /// existing one, and returns the hash.
    pub fn intern(&self, name: &str) -> u64 {
        let hash = fnv1a(name);
        let mut entries = self.entries.lock();
        entries
            .entry(hash)
            .and_modify(|e| e.refcount += 1)
            .or_insert_with(|| Entry {
                name: name.to_owned(),
                refcount: 1,
            });
        hash
    }

    /// Decrements the refcount of `hash`, evicting the entry once it
    /// reaches zero.
    pub fn release(&self, hash: u64) {
        if hash == UNNAMED_HASH {
            return;
        }
        let mut entries = self.entries.lock();
        let evict = if let Some(entry) = entries.get_mut(&hash) {
            entry.refcount = entry.refcount.saturating_sub(1);
            entry.refcount == 0
        } else {
            false
        };
        if evict {
            entries.remove(&hash);
        }
    }

    /// Debug/tooling accessor: recovers the original string for `hash`, if
    /// still live.
    pub fn lookup(&self, hash: u64) -> Option<String> {
        self.entries.lock().get(&hash).map(|e| e.name.clone())
    }
}

lazy_static::lazy_static! {
    /// The process-wide name table. Shared by every `CommandQueue` and
    /// named `AsyncResource`, mirroring the reference engine's posture of a
    /// single global string interning table behind a mutex.
    pub static ref NAME_TABLE: NameTable = NameTable::new();
}

/// A small wrapper any `CommandQueue` or `AsyncResource` can embed to hold
/// an optional interned name and automatically release it on drop.
pub struct NamedObject {
    hash: u64,
}

impl NamedObject {
    pub fn unnamed() -> Self {
        NamedObject { hash: UNNAMED_HASH }
    }

    pub fn named(name: &str) -> Self {
        NamedObject {
            hash: NAME_TABLE.intern(name),
        }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn has_name(&self) -> bool {
        self.hash != UNNAMED_HASH
    }

    pub fn name(&self) -> Option<String> {
        if self.has_name() {
            NAME_TABLE.lookup(self.hash)
        } else {
            None
        }
    }
}

impl Drop for NamedObject {
    fn drop(&mut self) {
        if self.has_name() {
            NAME_TABLE.release(self.hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_hash_never_allocated() {
        let table = NameTable::new();
        // Extremely unlikely to collide, but if it ever does the
        // perturbation in `fnv1a` must have kicked in.
        assert_ne!(table.intern("anything"), UNNAMED_HASH);
    }

    #[test]
    fn refcounted_eviction() {
        let table = NameTable::new();
        let h1 = table.intern("forward");
        let h2 = table.intern("forward");
        assert_eq!(h1, h2);
        assert!(table.lookup(h1).is_some());
        table.release(h1);
        assert!(table.lookup(h1).is_some());
        table.release(h2);
        assert!(table.lookup(h1).is_none());
    }

    #[test]
    fn named_object_releases_on_drop() {
        let hash = {
            let obj = NamedObject::named("cq:test-named-object-releases-on-drop");
            assert!(obj.has_name());
            assert_eq!(NAME_TABLE.lookup(obj.hash()), obj.name());
            obj.hash()
        };
        assert!(NAME_TABLE.lookup(hash).is_none());
    }

    #[test]
    fn unnamed_object_has_no_name() {
        let obj = NamedObject::unnamed();
        assert!(!obj.has_name());
        assert_eq!(obj.hash(), UNNAMED_HASH);
        assert!(obj.name().is_none());
    }
}

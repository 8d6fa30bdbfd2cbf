//! Name/handle object table (spec.md §4.G). Bidirectional map between
//! inode numbers and 128-bit UUIDs, reference-counted, modeled as an
//! arena of entries indexed by a stable index rather than the original's
//! raw-pointer-aliased dual structure (spec.md §9: "model the entry as an
//! arena-owned value with a stable index; both indexes store only the
//! index, not pointers").
//!
//! Grounded on `finesse/bitbucket/object.c`'s magic-tagged,
//! atomically-refcounted object header, adapted to the arena shape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use uuid::Uuid;

/// One resident object-table entry. `refcount` starts at 2 on first
/// insertion: one for the table's own implicit reference, one for the
/// caller that triggered the insert (spec.md §3 "Object table entry").
struct Entry {
    inode: u64,
    uuid: Uuid,
    refcount: AtomicU32,
}

/// Stable index into the entry arena. Both the inode-keyed and
/// uuid-keyed indexes store only this, never a pointer, so there is no
/// aliasing hazard between the two lookup paths.
type EntryIndex = usize;

#[derive(Default)]
struct Inner {
    entries: Vec<Option<Entry>>,
    free_list: Vec<EntryIndex>,
    by_inode: HashMap<u64, EntryIndex>,
    by_uuid: HashMap<Uuid, EntryIndex>,
}

/// The server-wide table of resident filesystem objects. All operations
/// take `&self`; a single `RwLock` protects the indexes and the arena
/// (spec.md §4.G permits "a bucketed hash table per index with per-bucket
/// locking"; the teacher's stack never reaches for a sharded map crate, so
/// one coarse `RwLock` is kept here — sharding is noted as a possible
/// follow-up in the design ledger, not implemented).
pub struct ObjectTable {
    inner: RwLock<Inner>,
}

/// A reference-counted handle into the table. Dropping it does **not**
/// release the reference automatically — callers must call
/// [`ObjectTable::release`] explicitly, mirroring the protocol-level
/// `NameMap`/`NameMapRelease` pairing (spec.md §4.I) rather than hiding the
/// decrement in a destructor that would run at the wrong time relative to
/// a client's explicit release message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub inode: u64,
    pub uuid: Uuid,
}

impl ObjectTable {
    pub fn new() -> Self {
        ObjectTable { inner: RwLock::new(Inner::default()) }
    }

    /// **Create(inode, uuid)** (spec.md §4.G). If an entry already exists
    /// for `inode`, its reference is incremented and *its* uuid is
    /// returned — the caller's proposed `uuid` is discarded. Otherwise a
    /// new entry is installed with refcount 2 (table + caller).
    pub fn create(&self, inode: u64, uuid: Uuid) -> ObjectRef {
        let mut inner = self.inner.write().unwrap();
        if let Some(&idx) = inner.by_inode.get(&inode) {
            let entry = inner.entries[idx].as_ref().unwrap();
            entry.refcount.fetch_add(1, Ordering::AcqRel);
            return ObjectRef { inode: entry.inode, uuid: entry.uuid };
        }
        let entry = Entry { inode, uuid, refcount: AtomicU32::new(2) };
        let idx = match inner.free_list.pop() {
            Some(idx) => {
                inner.entries[idx] = Some(entry);
                idx
            }
            None => {
                inner.entries.push(Some(entry));
                inner.entries.len() - 1
            }
        };
        inner.by_inode.insert(inode, idx);
        inner.by_uuid.insert(uuid, idx);
        ObjectRef { inode, uuid }
    }

    /// **LookupByInode** (spec.md §4.G): increments the reference on
    /// success.
    pub fn lookup_by_inode(&self, inode: u64) -> Option<ObjectRef> {
        let inner = self.inner.read().unwrap();
        let idx = *inner.by_inode.get(&inode)?;
        let entry = inner.entries[idx].as_ref()?;
        entry.refcount.fetch_add(1, Ordering::AcqRel);
        Some(ObjectRef { inode: entry.inode, uuid: entry.uuid })
    }

    /// **LookupByUuid** (spec.md §4.G): increments the reference on
    /// success.
    pub fn lookup_by_uuid(&self, uuid: Uuid) -> Option<ObjectRef> {
        let inner = self.inner.read().unwrap();
        let idx = *inner.by_uuid.get(&uuid)?;
        let entry = inner.entries[idx].as_ref()?;
        entry.refcount.fetch_add(1, Ordering::AcqRel);
        Some(ObjectRef { inode: entry.inode, uuid: entry.uuid })
    }

    /// **Release(entry)** (spec.md §4.G): decrements the caller's
    /// reference; removes the entry from both indexes once it reaches
    /// zero.
    pub fn release(&self, uuid: Uuid) {
        // The fast path (decrement without dropping to zero) only needs a
        // read lock; re-check under the write lock before actually
        // removing to avoid a lost wakeup against a concurrent `create`.
        let should_remove = {
            let inner = self.inner.read().unwrap();
            match inner.by_uuid.get(&uuid) {
                Some(&idx) => {
                    let entry = inner.entries[idx].as_ref().unwrap();
                    entry.refcount.fetch_sub(1, Ordering::AcqRel) == 1
                }
                None => false,
            }
        };
        if !should_remove {
            return;
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(&idx) = inner.by_uuid.get(&uuid) {
            let still_zero = inner.entries[idx].as_ref().map(|e| e.refcount.load(Ordering::Acquire) == 0).unwrap_or(false);
            if still_zero {
                let entry = inner.entries[idx].take().unwrap();
                inner.by_inode.remove(&entry.inode);
                inner.by_uuid.remove(&entry.uuid);
                inner.free_list.push(idx);
            }
        }
    }

    /// **Size** (spec.md §4.G): count of resident entries.
    pub fn size(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.entries.len() - inner.free_list.len()
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_twice_for_same_inode_returns_same_entry() {
        let table = ObjectTable::new();
        let first = table.create(42, Uuid::new_v4());
        let second = table.create(42, Uuid::new_v4());
        assert_eq!(first.uuid, second.uuid);
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn lookup_by_either_index_agree_until_final_release() {
        let table = ObjectTable::new();
        let obj = table.create(7, Uuid::new_v4());
        assert_eq!(table.lookup_by_inode(7).unwrap().uuid, obj.uuid);
        assert_eq!(table.lookup_by_uuid(obj.uuid).unwrap().inode, 7);

        // Four references are outstanding now: table(1) + create-caller(1)
        // + the two lookups just performed. Release them all.
        table.release(obj.uuid);
        table.release(obj.uuid);
        table.release(obj.uuid);
        assert!(table.lookup_by_inode(7).is_some());
        table.release(obj.uuid);
        assert!(table.lookup_by_inode(7).is_none());
        assert!(table.lookup_by_uuid(obj.uuid).is_none());
    }

    #[test]
    fn name_map_then_release_is_size_neutral() {
        let table = ObjectTable::new();
        let before = table.size();
        let obj = table.create(100, Uuid::new_v4());
        table.release(obj.uuid); // drop the table's implicit ref too, for this test
        table.release(obj.uuid);
        assert_eq!(table.size(), before);
    }
}

//! Native operation handlers (spec.md §4.I): requests with no FUSE
//! low-level counterpart, used for liveness probing, diagnostics, and
//! short-circuiting the client's own path walk.

use std::collections::HashMap;
use std::sync::Mutex;

use finesse_abi::native_protocol::*;
use uuid::Uuid;

use crate::adapter::{self, encode_dir_entries};
use crate::arena::SlotSegment;
use crate::error::FinesseError;
use crate::lowlevel::FuseLowLevelOps;
use crate::object_table::ObjectTable;
use crate::pathresolve::{self, ResolveOptions};

/// The counters `ServerStat` reports, computed by the caller (the
/// dispatcher has the connected-client count and statistics bucket totals
/// on hand already; this handler only renders them into the wire shape).
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStatSnapshot {
    pub total_calls: u64,
    pub total_errors: u64,
    pub clients_connected: u32,
}

pub struct NativeCompletion {
    pub errno: i32,
    pub response: NativeResponse,
    pub aux: Option<SlotSegment>,
}

impl NativeCompletion {
    fn ok(response: NativeResponse) -> Self {
        NativeCompletion { errno: 0, response, aux: None }
    }

    fn ok_with_aux(response: NativeResponse, aux: SlotSegment) -> Self {
        NativeCompletion { errno: 0, response, aux: Some(aux) }
    }

    fn fail(errno: i32) -> Self {
        NativeCompletion { errno, response: NativeResponse::Test(TestReply { token: 0 }), aux: None }
    }
}

/// Tracks outstanding `DirectoryMap` grants so `DirectoryMapRelease` can
/// tell a live map from a stale or already-released one (spec.md §4.B:
/// "torn down when the slot is freed or the client disconnects" — here,
/// when the matching release arrives).
#[derive(Default)]
pub struct DirectoryMapTable {
    inner: Mutex<HashMap<Uuid, u64>>,
}

impl DirectoryMapTable {
    pub fn new() -> Self {
        DirectoryMapTable::default()
    }

    fn install(&self, target: Uuid, generation: u64) {
        self.inner.lock().unwrap().insert(target, generation);
    }

    fn release(&self, target: Uuid, generation: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(&target) {
            Some(&live) if live == generation => {
                inner.remove(&target);
                true
            }
            _ => false,
        }
    }
}

pub fn dispatch(
    ops: &dyn FuseLowLevelOps,
    table: &ObjectTable,
    dirmaps: &DirectoryMapTable,
    stat: ServerStatSnapshot,
    req: NativeRequest,
) -> NativeCompletion {
    match req {
        NativeRequest::Test(r) => NativeCompletion::ok(NativeResponse::Test(TestReply { token: r.token })),

        NativeRequest::ServerStat(_) => NativeCompletion::ok(NativeResponse::ServerStat(ServerStatReply {
            total_calls: stat.total_calls,
            total_errors: stat.total_errors,
            clients_connected: stat.clients_connected,
            regions_active: stat.clients_connected,
        })),

        NativeRequest::NameMap(r) => {
            let parent = match adapter::resolve_handle(table, r.parent) {
                Ok(ino) => ino,
                Err(e) => return NativeCompletion::fail(e.errno()),
            };
            let resolved = pathresolve::resolve(ops, parent, r.path.as_str(), &ResolveOptions::default());
            match resolved {
                Ok(r) => {
                    let obj = table.create(r.ino, Uuid::new_v4());
                    NativeCompletion::ok(NativeResponse::NameMap(NameMapReply { result_handle: obj.uuid, ino: obj.inode }))
                }
                Err(e) => NativeCompletion::fail(e.errno()),
            }
        }

        NativeRequest::NameMapRelease(r) => {
            let was_live = table.lookup_by_uuid(r.target).is_some();
            if was_live {
                // lookup_by_uuid above and the original reference both
                // need to drop: one for the peek, one for the balance
                // this release is discharging.
                table.release(r.target);
                table.release(r.target);
            }
            NativeCompletion::ok(NativeResponse::NameMapRelease(NameMapReleaseReply { was_live }))
        }

        NativeRequest::DirectoryMap(r) => {
            let ino = match adapter::resolve_handle(table, r.target) {
                Ok(ino) => ino,
                Err(e) => return NativeCompletion::fail(e.errno()),
            };
            match ops.opendir(ino, 0).and_then(|open| {
                let entries = ops.readdir(ino, open.fh, 0)?;
                let _ = ops.releasedir(ino, open.fh, 0);
                Ok(entries)
            }) {
                Ok(entries) => {
                    let buf = encode_dir_entries(&entries);
                    match SlotSegment::create(&buf) {
                        Ok(seg) => match NativeName::new(&seg.name) {
                            Ok(aux_name) => {
                                let generation = std::time::SystemTime::now()
                                    .duration_since(std::time::UNIX_EPOCH)
                                    .unwrap_or_default()
                                    .as_nanos() as u64;
                                dirmaps.install(r.target, generation);
                                NativeCompletion::ok_with_aux(
                                    NativeResponse::DirectoryMap(DirectoryMapReply {
                                        aux_name,
                                        entry_count: entries.len() as u32,
                                        generation,
                                    }),
                                    seg,
                                )
                            }
                            Err(_) => NativeCompletion::fail(FinesseError::Overflow.errno()),
                        },
                        Err(e) => NativeCompletion::fail(e.errno()),
                    }
                }
                Err(errno) => NativeCompletion::fail(errno),
            }
        }

        NativeRequest::DirectoryMapRelease(r) => {
            let was_live = dirmaps.release(r.target, r.generation);
            NativeCompletion::ok(NativeResponse::DirectoryMapRelease(DirectoryMapReleaseReply { was_live }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finesse_abi::codec::ROOT_HANDLE;

    #[test]
    fn test_echoes_token() {
        let fs = crate::memory::new(1 << 20);
        let table = ObjectTable::new();
        let dirmaps = DirectoryMapTable::new();
        let req = NativeRequest::Test(TestRequest { token: 0x10 });
        let completion = dispatch(&fs, &table, &dirmaps, ServerStatSnapshot::default(), req);
        assert_eq!(completion.errno, 0);
        match completion.response {
            NativeResponse::Test(r) => assert_eq!(r.token, 0x10),
            _ => panic!("wrong response variant"),
        }
    }

    #[test]
    fn name_map_of_root_then_release_is_size_neutral() {
        let fs = crate::memory::new(1 << 20);
        let table = ObjectTable::new();
        let dirmaps = DirectoryMapTable::new();
        let before = table.size();

        let req = NativeRequest::NameMap(NameMapRequest { parent: ROOT_HANDLE, path: NativeName::new("").unwrap() });
        let completion = dispatch(&fs, &table, &dirmaps, ServerStatSnapshot::default(), req);
        assert_eq!(completion.errno, 0);
        let handle = match completion.response {
            NativeResponse::NameMap(r) => r.result_handle,
            _ => panic!("wrong response variant"),
        };
        assert_eq!(table.size(), before + 1);

        let release_req = NativeRequest::NameMapRelease(NameMapReleaseRequest { target: handle });
        let release = dispatch(&fs, &table, &dirmaps, ServerStatSnapshot::default(), release_req);
        match release.response {
            NativeResponse::NameMapRelease(r) => assert!(r.was_live),
            _ => panic!("wrong response variant"),
        }
        // The table's own implicit reference is still outstanding.
        assert_eq!(table.size(), before + 1);
    }
}

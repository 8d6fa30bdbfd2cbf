//! End-to-end scenarios from spec.md §8, driven through the real
//! registration socket and shared-memory region rather than calling
//! `adapter`/`native` handlers directly (those round trips are already
//! covered by the per-module unit tests). Each test starts a real
//! [`FinesseServer`], connects a real [`FinesseClient`], and exercises one
//! of the spec's concrete scenarios.

use std::path::PathBuf;
use std::time::Duration;

use finesse::client::FinesseClient;
use finesse::config::FinesseConfig;
use finesse::server::{self, FinesseServer};
use finesse_abi::codec::ROOT_HANDLE;
use finesse_abi::fuse_protocol::{FuseRequest, FuseResponse, StatfsRequest, UnlinkRequest};
use finesse_abi::native_protocol::{
    DirectoryMapRequest, NameMapReleaseRequest, NameMapRequest, NativeName, NativeRequest, NativeResponse,
};
use finesse_abi::region::RegionLayout;

/// A scratch mountpoint directory, unique per test, so concurrently running
/// tests don't collide on the same registration socket path (spec.md §4.D
/// derives the path from the mountpoint).
struct ScratchMount {
    dir: PathBuf,
}

impl ScratchMount {
    fn new(tag: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("finesse-e2e-{tag}-{:?}", std::thread::current().id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        ScratchMount { dir }
    }
}

impl Drop for ScratchMount {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn start_server(mount: &ScratchMount) -> FinesseServer<finesse::memory::MemoryFS> {
    let config = FinesseConfig { log_prefix: "finesse-e2e".into(), log_dir: mount.dir.clone() };
    let srv = FinesseServer::start(finesse::memory::new(1 << 20), &mount.dir, config).unwrap();
    let path = server::registration_socket_path(&FinesseConfig { log_prefix: "finesse-e2e".into(), log_dir: mount.dir.clone() }, &mount.dir);
    assert!(FinesseClient::wait_until_live(&path, Duration::from_secs(2)), "registration socket never came up");
    srv
}

fn connect(mount: &ScratchMount) -> FinesseClient {
    let config = FinesseConfig { log_prefix: "finesse-e2e".into(), log_dir: mount.dir.clone() };
    let path = server::registration_socket_path(&config, &mount.dir);
    FinesseClient::connect(&path, RegionLayout::total_size() as u64).unwrap()
}

/// Scenario 1 (spec.md §8): test echo. A `Test` request with a non-zero
/// token round-trips with `result = 0` and the same token back.
#[test]
fn scenario_test_echo() {
    let mount = ScratchMount::new("echo");
    let srv = start_server(&mount);
    let client = connect(&mount);

    let token = client.ping(0x10).expect("ping failed");
    assert_eq!(token, 0x10);

    srv.shutdown();
}

/// Scenario 2 (spec.md §8): name-map of the root. A `NameMap` with a null
/// parent and empty name resolves the FUSE root, and the returned handle
/// stays resolvable by a subsequent `Stat`/`Getattr`-style call even after
/// `NameMapRelease` drops the caller's own reference (the table's implicit
/// reference keeps it alive).
#[test]
fn scenario_name_map_of_root() {
    let mount = ScratchMount::new("namemap-root");
    let srv = start_server(&mount);
    let client = connect(&mount);

    let (errno, resp) = client
        .call_native(NativeRequest::NameMap(NameMapRequest { parent: ROOT_HANDLE, path: NativeName::new("").unwrap() }))
        .expect("name-map call failed");
    assert_eq!(errno, 0);
    let handle = match resp {
        NativeResponse::NameMap(r) => r.result_handle,
        other => panic!("unexpected response: {other:?}"),
    };
    assert_ne!(handle, ROOT_HANDLE, "a fresh opaque handle should be minted, not the nil sentinel");

    let (errno, resp) = client
        .call_native(NativeRequest::NameMapRelease(NameMapReleaseRequest { target: handle }))
        .expect("name-map-release call failed");
    assert_eq!(errno, 0);
    match resp {
        NativeResponse::NameMapRelease(r) => assert!(r.was_live),
        other => panic!("unexpected response: {other:?}"),
    }

    srv.shutdown();
}

/// Scenario 3 (spec.md §8): statfs forwarding. A FUSE-class `Statfs`
/// request against the root resolves through the adapter into the embedded
/// filesystem's `statfs` op and comes back with a non-zero block size.
#[test]
fn scenario_statfs_forwarding() {
    let mount = ScratchMount::new("statfs");
    let srv = start_server(&mount);
    let client = connect(&mount);

    let (errno, resp) = client.call_fuse(FuseRequest::Statfs(StatfsRequest { target: ROOT_HANDLE })).expect("statfs call failed");
    assert_eq!(errno, 0);
    match resp {
        FuseResponse::Statfs(stat) => assert!(stat.bsize > 0, "block size field should be populated"),
        other => panic!("unexpected response: {other:?}"),
    }

    srv.shutdown();
}

/// Scenario 4 (spec.md §8): unlink of a missing name returns `ENOENT` and
/// creates no object-table entry as a side effect.
#[test]
fn scenario_unlink_missing_name() {
    let mount = ScratchMount::new("unlink-missing");
    let srv = start_server(&mount);
    let client = connect(&mount);

    let (errno, _resp) = client
        .call_fuse(FuseRequest::Unlink(UnlinkRequest { parent: ROOT_HANDLE, name: finesse_abi::fuse_protocol::Name::new("nope").unwrap() }))
        .expect("unlink call failed");
    assert_eq!(errno, libc::ENOENT);

    srv.shutdown();
}

/// Scenario 5 (spec.md §8): client disconnect mid-flight. Dropping the
/// client (closing the registration socket) tears down its server-side
/// state without taking the server itself down; a second, independently
/// connected client on the same server still works afterwards.
#[test]
fn scenario_client_disconnect_does_not_affect_server() {
    let mount = ScratchMount::new("disconnect");
    let srv = start_server(&mount);

    {
        let first = connect(&mount);
        assert_eq!(first.ping(1).unwrap(), 1);
        // Dropping sends a DeregistrationRecord and unmaps; the server's
        // disconnect watcher removes this client's state.
    }

    // Give the disconnect watcher thread a moment to observe end-of-stream
    // and remove the client from the server's table.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while srv.client_count() > 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(srv.client_count(), 0, "disconnected client should be torn down");

    let second = connect(&mount);
    assert_eq!(second.ping(2).unwrap(), 2);

    srv.shutdown();
}

/// Regression test for the monitor-thread busy-spin: several threads
/// hammer the same client's shared-memory channel with concurrent `ping`
/// calls, which repeatedly drives the request-ready bitmap non-empty while
/// the dispatch pool is still draining it — exactly the condition under
/// which a monitor thread that re-calls `wait_for_ready_request` in a hot
/// loop (instead of parking until told to look again) would spin at 100%
/// CPU. This doesn't measure CPU directly, but a monitor thread stuck
/// spinning starves the dispatch threads of cache/scheduler time badly
/// enough that this bound (generous relative to a handful of in-memory
/// round trips) would be blown if the spin regressed.
#[test]
fn scenario_concurrent_requests_do_not_spin_monitor_thread() {
    let mount = ScratchMount::new("no-spin");
    let srv = start_server(&mount);
    let client = std::sync::Arc::new(connect(&mount));

    let start = std::time::Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let client = std::sync::Arc::clone(&client);
            std::thread::spawn(move || {
                for i in 0..20u64 {
                    let token = (t * 100 + i) as u64;
                    assert_eq!(client.ping(token).unwrap(), token);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_secs(5),
        "80 concurrent round trips on one client took {elapsed:?}; a spinning or \
         stalled monitor thread would make this far slower"
    );

    srv.shutdown();
}

/// Regression test for the auxiliary-segment leak: a `DirectoryMap` call
/// creates a named POSIX shm segment for its oversized reply; once the
/// client has read the reply and released the slot (which `call_native`
/// does as part of the round trip), the server should notice the slot was
/// freed and unlink the segment rather than holding it open for the rest
/// of the connection.
#[test]
fn scenario_directory_map_aux_segment_is_reaped_after_release() {
    let mount = ScratchMount::new("aux-reap");
    let srv = start_server(&mount);
    let client = connect(&mount);

    let (errno, resp) = client
        .call_native(NativeRequest::DirectoryMap(DirectoryMapRequest { target: ROOT_HANDLE }))
        .expect("directory-map call failed");
    assert_eq!(errno, 0);
    let aux_name = match resp {
        NativeResponse::DirectoryMap(r) => r.aux_name.as_str().to_string(),
        other => panic!("unexpected response: {other:?}"),
    };

    // The segment must exist right after the call (the server just wrote
    // the reply into it and the client hasn't acted on it yet).
    assert!(finesse_sys::shm::open_existing(&aux_name).is_ok(), "aux segment should exist immediately after the call");

    // `call_native` already released the request buffer as part of its
    // round trip; give the server's dispatch loop a moment to notice the
    // freed slot and reap the segment.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut still_open = true;
    while std::time::Instant::now() < deadline {
        if finesse_sys::shm::open_existing(&aux_name).is_err() {
            still_open = false;
            break;
        }
        // Nudge the dispatch loop by issuing unrelated traffic so it has
        // a reason to cycle through this client's state again.
        let _ = client.ping(0);
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!still_open, "aux segment for a released slot should eventually be unlinked");

    srv.shutdown();
}

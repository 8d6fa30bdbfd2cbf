//! Server-side registration transport and dispatch loop (spec.md §4.D,
//! §4.E, §4.F). Grounded on the teacher's `session.rs`: a `Session` owns
//! one kernel channel and a read-dispatch loop; `FinesseServer` is the
//! same shape generalized to many clients, each with its own
//! shared-memory channel instead of `/dev/fuse`.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use finesse_abi::codec::WireCodec;
use finesse_abi::fuse_protocol::{FuseOp, FuseRequest};
use finesse_abi::native_protocol::{NativeOp, NativeRequest};
use finesse_abi::region::RegionLayout;
use finesse_abi::wire::{ConfirmationRecord, DeregistrationRecord, RegistrationRecord};
use finesse_abi::{MessageClass, FINESSE_MESSAGE_VERSION};

use crate::adapter::{self, RequestOrigin};
use crate::arena::SlotSegment;
use crate::config::FinesseConfig;
use crate::lowlevel::FuseLowLevelOps;
use crate::native::{self, DirectoryMapTable, ServerStatSnapshot};
use crate::object_table::ObjectTable;
use crate::region::{self, MappedRegion};
use crate::stats::StatsCollector;

/// Largest registration-record datagram we'll read (spec.md §4.D records
/// are tiny and fixed; this is generous headroom, not a real limit).
const REGISTRATION_BUF: usize = 512;

/// Per-client server-side state: the mapped region, its shm name (needed
/// to unlink it on teardown), and the auxiliary segments currently live
/// for its in-flight oversized responses, keyed by slot index so a new
/// response for the same slot naturally replaces (and unlinks) the old
/// one (spec.md §4.B "torn down when the slot is freed").
struct ClientState {
    region: Arc<MappedRegion>,
    shm_name: String,
    aux: Mutex<HashMap<usize, SlotSegment>>,
    /// Signalled by a dispatch thread once it has observed this client's
    /// request-ready bitmap go empty, so the monitor thread (parked here
    /// instead of hammering `wait_for_ready_request`) knows to go back to
    /// blocking on the region's own condvar (spec.md §4.E step 2: "wait on
    /// the monitor condvar until the main dispatcher tells it to look
    /// again").
    drained: Condvar,
    drained_lock: Mutex<()>,
}

/// Computes the deterministic registration socket path (spec.md §4.D:
/// "a deterministic path derived from the mountpoint"): SHA-256 of the
/// canonicalized mountpoint, hex-encoded, under `/tmp` with the
/// configured prefix.
pub fn registration_socket_path(config: &FinesseConfig, mountpoint: &Path) -> PathBuf {
    let canon = mountpoint.canonicalize().unwrap_or_else(|_| mountpoint.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canon.as_os_str().as_encoded_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    config.log_dir.join(format!("{}-{}.sock", config.log_prefix, hex))
}

/// The daemon-side half of the Finesse bypass (spec.md §1, §4). Owns the
/// registration listener, one monitor thread per connected client, and a
/// small pool of dispatch threads that service whichever clients have a
/// request ready.
pub struct FinesseServer<FS: FuseLowLevelOps + 'static> {
    ops: Arc<FS>,
    table: Arc<ObjectTable>,
    dirmaps: Arc<DirectoryMapTable>,
    stats: Arc<StatsCollector>,
    config: FinesseConfig,
    server_id: Uuid,
    socket_path: PathBuf,
    clients: Arc<Mutex<HashMap<Uuid, Arc<ClientState>>>>,
    ready: Arc<ReadyQueue>,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// The hand-off between per-client monitor threads and the dispatch pool:
/// a FIFO of clients known to have at least one ready request, guarded by
/// a condvar (spec.md §4.E/§4.F).
#[derive(Default)]
struct ReadyQueue {
    queue: Mutex<std::collections::VecDeque<Uuid>>,
    signal: Condvar,
}

impl ReadyQueue {
    fn push(&self, client: Uuid) {
        let mut q = self.queue.lock().unwrap();
        if !q.contains(&client) {
            q.push_back(client);
        }
        self.signal.notify_one();
    }

    fn pop_wait(&self, shutdown: &AtomicBool) -> Option<Uuid> {
        let mut q = self.queue.lock().unwrap();
        loop {
            if let Some(client) = q.pop_front() {
                return Some(client);
            }
            if shutdown.load(Ordering::Acquire) {
                return None;
            }
            let (guard, _timeout) = self.signal.wait_timeout(q, std::time::Duration::from_millis(200)).unwrap();
            q = guard;
        }
    }
}

const DISPATCH_THREADS: usize = 4;

impl<FS: FuseLowLevelOps + 'static> FinesseServer<FS> {
    /// Binds the registration socket for `mountpoint` and starts the
    /// accept and dispatch threads. Does not block; call
    /// [`FinesseServer::wait_for_shutdown`] or drop the server to stop.
    pub fn start(ops: FS, mountpoint: &Path, config: FinesseConfig) -> std::io::Result<Self> {
        let socket_path = registration_socket_path(&config, mountpoint);
        finesse_sys::seqpacket::remove_stale(&socket_path)?;
        let listener = finesse_sys::seqpacket::listen(&socket_path, 16)?;
        info!("Finesse registration socket listening at {}", socket_path.display());

        let server = FinesseServer {
            ops: Arc::new(ops),
            table: Arc::new(ObjectTable::new()),
            dirmaps: Arc::new(DirectoryMapTable::new()),
            stats: Arc::new(StatsCollector::new()),
            config,
            server_id: Uuid::new_v4(),
            socket_path,
            clients: Arc::new(Mutex::new(HashMap::new())),
            ready: Arc::new(ReadyQueue::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        };

        server.ops.init();

        let mut threads = Vec::new();
        threads.push(server.spawn_accept_loop(listener));
        for _ in 0..DISPATCH_THREADS {
            threads.push(server.spawn_dispatch_thread());
        }
        *server.threads.lock().unwrap() = threads;
        Ok(server)
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    fn spawn_accept_loop(&self, listener: OwnedFd) -> JoinHandle<()> {
        let ops = Arc::clone(&self.ops);
        let table = Arc::clone(&self.table);
        let clients = Arc::clone(&self.clients);
        let ready = Arc::clone(&self.ready);
        let shutdown = Arc::clone(&self.shutdown);
        let server_id = self.server_id;

        std::thread::spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                let conn = match finesse_sys::seqpacket::accept(&listener) {
                    Ok(fd) => fd,
                    Err(e) => {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                if let Err(e) = handle_registration(conn, server_id, &clients, &ready, &table, &ops, &shutdown) {
                    warn!("registration failed: {e}");
                }
            }
        })
    }

    fn spawn_dispatch_thread(&self) -> JoinHandle<()> {
        let ops = Arc::clone(&self.ops);
        let table = Arc::clone(&self.table);
        let dirmaps = Arc::clone(&self.dirmaps);
        let stats = Arc::clone(&self.stats);
        let clients = Arc::clone(&self.clients);
        let ready = Arc::clone(&self.ready);
        let shutdown = Arc::clone(&self.shutdown);

        std::thread::spawn(move || {
            while let Some(client_id) = ready.pop_wait(&shutdown) {
                let state = match clients.lock().unwrap().get(&client_id).cloned() {
                    Some(s) => s,
                    None => continue,
                };
                let region = state.region.layout();
                match region::get_ready_request(region) {
                    Ok(Some(idx)) => {
                        dispatch_one(&ops, &table, &dirmaps, &stats, &clients, &state, region, idx);
                        // more than one request may be ready; keep this client
                        // in the queue until a scan finds it drained.
                        if region.header.request_ready_bitmap.load(Ordering::Acquire) != 0 {
                            ready.push(client_id);
                        } else {
                            state.drained.notify_all();
                        }
                    }
                    Ok(None) => {
                        state.drained.notify_all();
                    }
                    Err(_) => {
                        clients.lock().unwrap().remove(&client_id);
                        debug!("client {client_id} torn down (region signalled shutdown)");
                        state.drained.notify_all();
                    }
                }
                // The client may have released slots (spec.md §3: "until
                // client acknowledges or slot is freed") since this aux map
                // was last checked; drop any aux segment whose slot is no
                // longer allocated so it doesn't outlive the response it
                // carried (spec.md §4.B).
                reap_released_aux(region, &state);
            }
        })
    }

    /// Blocks the calling thread until [`FinesseServer::shutdown`] is
    /// called from another thread (e.g. a ctrl-c handler).
    pub fn wait_for_shutdown(&self) {
        while !self.shutdown.load(Ordering::Acquire) {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    }

    /// Signals every thread to stop, joins them, and flushes the
    /// statistics CSV (spec.md §4.K).
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.ready.signal.notify_all();
        for client in self.clients.lock().unwrap().values() {
            let _ = region::destroy_region(client.region.layout());
        }
        for t in self.threads.lock().unwrap().drain(..) {
            let _ = t.join();
        }
        self.ops.destroy();
        let csv_path = self.config.log_dir.join(format!("{}-stats.csv", self.config.log_prefix));
        if let Err(e) = self.stats.flush_csv(&csv_path) {
            error!("failed to write statistics report to {}: {e}", csv_path.display());
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

impl<FS: FuseLowLevelOps + 'static> Drop for FinesseServer<FS> {
    fn drop(&mut self) {
        if !self.shutdown.load(Ordering::Acquire) {
            self.shutdown();
        }
        info!("Finesse server at {} stopped", self.socket_path.display());
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_registration<FS: FuseLowLevelOps>(
    conn: OwnedFd,
    server_id: Uuid,
    clients: &Arc<Mutex<HashMap<Uuid, Arc<ClientState>>>>,
    ready: &Arc<ReadyQueue>,
    table: &Arc<ObjectTable>,
    ops: &Arc<FS>,
    shutdown: &Arc<AtomicBool>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; REGISTRATION_BUF];
    let n = finesse_sys::seqpacket::recv(&conn, &mut buf)?;
    if n == 0 {
        return Ok(());
    }
    let record = RegistrationRecord::decode(&buf[..n])?;

    let region_size = RegionLayout::total_size() as u64;
    let fd = finesse_sys::shm::create_exclusive(record.shm_name.as_str(), region_size)?;
    let region = Arc::new(MappedRegion::map(fd)?);
    unsafe {
        region::init_region(region.layout_mut_ptr(), region_size, server_id, record.client_id)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    }

    let confirmation = ConfirmationRecord {
        result: 0,
        server_id,
        shm_name: record.shm_name.clone(),
        region_size,
    };
    let mut reply_buf = vec![0u8; REGISTRATION_BUF];
    let written = confirmation.encode(&mut reply_buf)?;
    finesse_sys::seqpacket::send(&conn, &reply_buf[..written])?;

    let state = Arc::new(ClientState {
        region: Arc::clone(&region),
        shm_name: record.shm_name.as_str().to_string(),
        aux: Mutex::new(HashMap::new()),
        drained: Condvar::new(),
        drained_lock: Mutex::new(()),
    });
    clients.lock().unwrap().insert(record.client_id, Arc::clone(&state));
    info!("client {} registered, region {}", record.client_id, record.shm_name.as_str());

    spawn_monitor_thread(record.client_id, Arc::clone(&state), Arc::clone(ready), Arc::clone(shutdown));
    spawn_disconnect_watcher(record.client_id, conn, Arc::clone(clients), Arc::clone(table), Arc::clone(ops));
    Ok(())
}

/// One thread per client (spec.md §4.E): blocks on the region's request
/// condvar and enqueues the client id whenever a request becomes ready.
///
/// After enqueuing, this thread does *not* immediately call
/// `wait_for_ready_request` again — that call returns instantly as long as
/// any bit in the request-ready bitmap remains set, and nothing clears
/// those bits except a dispatch thread's `GetReadyRequest`. Looping
/// straight back into it would spin the monitor thread at 100% CPU for as
/// long as the dispatch pool lags behind. Instead it parks on `drained`
/// until a dispatch thread has emptied this client's bitmap, matching
/// spec.md §4.E step 2's "wait on the monitor condvar until the main
/// dispatcher tells it to look again."
fn spawn_monitor_thread(
    client_id: Uuid,
    state: Arc<ClientState>,
    ready: Arc<ReadyQueue>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let region = state.region.layout();
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            match region::wait_for_ready_request(region) {
                Ok(()) => {
                    ready.push(client_id);
                    let guard = state.drained_lock.lock().unwrap();
                    let _ = state
                        .drained
                        .wait_timeout_while(guard, std::time::Duration::from_millis(200), |_| {
                            region.header.request_ready_bitmap.load(Ordering::Acquire) != 0
                                && !shutdown.load(Ordering::Acquire)
                        })
                        .unwrap();
                }
                Err(_) => break,
            }
        }
        debug!("monitor thread for client {client_id} exiting");
    })
}

/// Watches the registration socket for orderly (`DeregistrationRecord`) or
/// implicit (zero-length `recv`) teardown (spec.md §4.D), and releases the
/// client's resources either way.
fn spawn_disconnect_watcher<FS: FuseLowLevelOps>(
    client_id: Uuid,
    conn: OwnedFd,
    clients: Arc<Mutex<HashMap<Uuid, Arc<ClientState>>>>,
    table: Arc<ObjectTable>,
    ops: Arc<FS>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = vec![0u8; REGISTRATION_BUF];
        loop {
            match finesse_sys::seqpacket::recv(&conn, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if DeregistrationRecord::decode(&buf[..n]).is_ok() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = &table;
        let _ = &ops;
        if let Some(state) = clients.lock().unwrap().remove(&client_id) {
            let region = state.region.layout();
            region.header.shutdown_requested.store(true, Ordering::Release);
            unsafe {
                region.header.request_condvar.broadcast();
                region.header.response_condvar.broadcast();
            }
            let _ = finesse_sys::shm::unlink(&state.shm_name);
            info!("client {client_id} disconnected");
        }
    })
}

/// Drops any `state.aux` entry whose slot index is no longer set in the
/// region's allocation bitmap — i.e. the client has since called
/// `ReleaseRequestBuffer` on it (spec.md §3's auxiliary-buffer lifecycle:
/// "server marks the slot's aux-in-use flag until client acknowledges or
/// slot is freed"). The client releases slots entirely on its own side of
/// the shared-memory mapping, so the allocation bitmap is the only signal
/// the server has that an aux segment is safe to unlink.
fn reap_released_aux(region: &RegionLayout, state: &ClientState) {
    let allocated = region.header.allocation_bitmap.load(Ordering::Acquire);
    let mut aux = state.aux.lock().unwrap();
    aux.retain(|&idx, _| allocated & (1u64 << idx) != 0);
}

/// Services exactly one ready request slot for one client (spec.md §4.F):
/// decode, dispatch to the FUSE adapter or native handler, encode the
/// reply, record statistics, and signal `ResponseReady`.
#[allow(clippy::too_many_arguments)]
fn dispatch_one<FS: FuseLowLevelOps>(
    ops: &Arc<FS>,
    table: &Arc<ObjectTable>,
    dirmaps: &Arc<DirectoryMapTable>,
    stats: &Arc<StatsCollector>,
    clients: &Arc<Mutex<HashMap<Uuid, Arc<ClientState>>>>,
    state: &Arc<ClientState>,
    region: &RegionLayout,
    idx: usize,
) {
    let class = region.slot(idx).message_class();
    let request_type = region.slot(idx).stats.request_type;
    let version = region.slot(idx).version();
    let payload = region.slot(idx).payload;

    let (op_name, errno, body, aux): (&'static str, i32, Vec<u8>, Option<SlotSegment>) = if version != FINESSE_MESSAGE_VERSION {
        ("unknown", libc::EPROTO, Vec::new(), None)
    } else {
        match class {
            Some(MessageClass::Fuse) => match FuseOp::from_u32(request_type as u32) {
                Some(op) => match FuseRequest::decode(op, &payload) {
                    Ok(req) => {
                        let completion = adapter::execute(ops.as_ref(), table, RequestOrigin::Finesse, req);
                        let mut buf = vec![0u8; finesse_abi::message::PAYLOAD_SIZE];
                        let n = completion.response.encode(&mut buf).unwrap_or(0);
                        buf.truncate(n);
                        (op.name(), completion.errno, buf, completion.aux)
                    }
                    Err(_) => (op.name(), libc::EINVAL, Vec::new(), None),
                },
                None => ("unknown", libc::EINVAL, Vec::new(), None),
            },
            Some(MessageClass::Native) => match NativeOp::from_u32(request_type as u32) {
                Some(op) => match NativeRequest::decode(op, &payload) {
                    Ok(req) => {
                        let snapshot = ServerStatSnapshot {
                            total_calls: stats.total_calls(),
                            total_errors: stats.total_errors(),
                            clients_connected: clients.lock().unwrap().len() as u32,
                        };
                        let completion = native::dispatch(ops.as_ref(), table, dirmaps, snapshot, req);
                        let mut buf = vec![0u8; finesse_abi::message::PAYLOAD_SIZE];
                        let n = completion.response.encode(&mut buf).unwrap_or(0);
                        buf.truncate(n);
                        (op.name(), completion.errno, buf, completion.aux)
                    }
                    Err(_) => (op.name(), libc::EINVAL, Vec::new(), None),
                },
                None => ("unknown", libc::EINVAL, Vec::new(), None),
            },
            None => ("unknown", libc::EINVAL, Vec::new(), None),
        }
    };

    stats.record(op_name, errno, &region.slot(idx).stats);

    if let Some(seg) = aux {
        state.aux.lock().unwrap().insert(idx, seg);
    }

    unsafe {
        let slot = region.slot_mut(idx);
        slot.set_result(errno);
        slot.payload[..body.len()].copy_from_slice(&body);
    }
    if let Err(e) = region::response_ready(region, idx) {
        error!("response_ready failed for slot {idx}: {e}");
    }
}

/// Minimal liveness write used by tests/diagnostics to confirm a socket
/// file exists and is connectable without going through the full
/// registration handshake.
pub fn probe(path: &Path) -> bool {
    finesse_sys::seqpacket::is_live(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_socket_path_is_stable_for_same_mountpoint() {
        let config = FinesseConfig::default();
        let a = registration_socket_path(&config, Path::new("/tmp"));
        let b = registration_socket_path(&config, Path::new("/tmp"));
        assert_eq!(a, b);
    }

    #[test]
    fn server_starts_and_stops_with_no_clients() {
        let dir = std::env::temp_dir().join(format!("finesse-server-test-{:?}", std::thread::current().id()));
        let _ = std::fs::create_dir_all(&dir);
        let config = FinesseConfig { log_prefix: "finesse-test".into(), log_dir: dir.clone() };
        let server = FinesseServer::start(crate::memory::new(1 << 20), &dir, config).unwrap();
        assert_eq!(server.client_count(), 0);
        server.shutdown();
        let _ = std::fs::remove_dir_all(&dir);
    }
}

//! The handshake exchanged over the `SOCK_SEQPACKET` registration socket
//! (spec.md §4.D, §6): unlike the shared-memory message slots, these two
//! records are the only bytes ever sent over the socket itself, so they
//! carry their own minimal framing rather than reusing [`crate::message`].

use crate::codec::{wire_struct, FixedName, WireCodec};
use uuid::Uuid;

pub const SHM_NAME_CAP: usize = 104;
pub type ShmName = FixedName<SHM_NAME_CAP>;

/// Sent by a connecting client immediately after `connect()` succeeds
/// (spec.md §4.D "registration"). The server creates a fresh shared-memory
/// region sized for this client and replies with a [`ConfirmationRecord`].
wire_struct! {
    pub struct RegistrationRecord {
        pub client_id: Uuid,
        pub shm_name: ShmName,
        pub requested_region_size: u64,
    }
}

/// The server's reply to a [`RegistrationRecord`]. `result` is `0` on
/// success and a negative errno otherwise (spec.md §4.D), in which case the
/// client must not attempt to map `shm_name`.
wire_struct! {
    pub struct ConfirmationRecord {
        pub result: i32,
        pub server_id: Uuid,
        pub shm_name: ShmName,
        pub region_size: u64,
    }
}

/// A client signals orderly teardown by sending this record and then
/// closing the socket (spec.md §4.D "deregistration"); the server is free
/// to also detect teardown implicitly via a zero-length `recv`.
wire_struct! {
    pub struct DeregistrationRecord { pub client_id: Uuid }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_round_trips() {
        let rec = RegistrationRecord {
            client_id: Uuid::new_v4(),
            shm_name: ShmName::new("finesse-client-abcdef").unwrap(),
            requested_region_size: 1 << 20,
        };
        let mut buf = vec![0u8; 256];
        let n = rec.encode(&mut buf).unwrap();
        let back = RegistrationRecord::decode(&buf[..n]).unwrap();
        assert_eq!(rec.client_id, back.client_id);
        assert_eq!(rec.shm_name.as_str(), back.shm_name.as_str());
        assert_eq!(rec.requested_region_size, back.requested_region_size);
    }

    #[test]
    fn confirmation_round_trips_error_case() {
        let rec = ConfirmationRecord {
            result: -(libc::EMFILE),
            server_id: Uuid::nil(),
            shm_name: ShmName::new("").unwrap(),
            region_size: 0,
        };
        let mut buf = vec![0u8; 256];
        let n = rec.encode(&mut buf).unwrap();
        let back = ConfirmationRecord::decode(&buf[..n]).unwrap();
        assert_eq!(rec.result, back.result);
        assert_eq!(back.shm_name.as_str(), "");
    }
}

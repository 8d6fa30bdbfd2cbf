//! Minimal little-endian binary codec for the class-tagged request/response
//! bodies that live in a [`crate::message::Message`]'s `payload` array.
//!
//! spec.md §6 is explicit: "every field is little-endian, naturally
//! aligned; no length-prefixed variable-size fields inside the slot body;
//! inline strings are null-terminated and bounded by the slot size."  This
//! module is the one place that discipline is enforced; every per-operation
//! struct in [`crate::fuse_protocol`]/[`crate::native_protocol`] is built
//! from the primitives here via the [`wire_struct!`] macro.

use std::io;
use uuid::Uuid;

/// A cursor over a fixed `&mut [u8]` payload buffer, writing fields in
/// order.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Writer { buf, pos: 0 }
    }

    pub fn written(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> io::Result<&mut [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "payload overflow"));
        }
        let slice = &mut self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.take(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }
}

/// A cursor over a `&[u8]` payload buffer, reading fields in order.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> io::Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "payload truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_bytes(&mut self, len: usize) -> io::Result<&'a [u8]> {
        self.take(len)
    }
}

/// Implemented for every field type a wire struct can contain.
pub trait WireField: Sized {
    fn write(&self, w: &mut Writer<'_>) -> io::Result<()>;
    fn read(r: &mut Reader<'_>) -> io::Result<Self>;
}

macro_rules! impl_wire_int {
    ($($t:ty),*) => {
        $(
            impl WireField for $t {
                fn write(&self, w: &mut Writer<'_>) -> io::Result<()> {
                    w.write_bytes(&self.to_le_bytes())
                }
                fn read(r: &mut Reader<'_>) -> io::Result<Self> {
                    let bytes = r.read_bytes(std::mem::size_of::<$t>())?;
                    Ok(<$t>::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    };
}

impl_wire_int!(u8, u16, u32, u64, i32, i64);

impl WireField for bool {
    fn write(&self, w: &mut Writer<'_>) -> io::Result<()> {
        (*self as u8).write(w)
    }
    fn read(r: &mut Reader<'_>) -> io::Result<Self> {
        Ok(u8::read(r)? != 0)
    }
}

impl WireField for Uuid {
    fn write(&self, w: &mut Writer<'_>) -> io::Result<()> {
        w.write_bytes(self.as_bytes())
    }
    fn read(r: &mut Reader<'_>) -> io::Result<Self> {
        let bytes = r.read_bytes(16)?;
        Ok(Uuid::from_bytes(bytes.try_into().unwrap()))
    }
}

/// A handle is just a 128-bit id; the all-zero uuid is the root sentinel
/// (spec.md §3: "A null parent handle is interpreted as the root of the
/// mounted volume").
pub type Handle = Uuid;

pub const ROOT_HANDLE: Handle = Uuid::nil();

/// A null-terminated name, bounded to `N` bytes including the terminator
/// (spec.md §6). `N` is chosen per use site to keep the enclosing struct
/// well under [`crate::message::PAYLOAD_SIZE`].
#[derive(Debug, Clone)]
pub struct FixedName<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> FixedName<N> {
    pub fn new(s: &str) -> io::Result<Self> {
        if s.as_bytes().len() + 1 > N {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name too long"));
        }
        let mut bytes = [0u8; N];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(FixedName { bytes, len: s.len() })
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }
}

impl<const N: usize> WireField for FixedName<N> {
    fn write(&self, w: &mut Writer<'_>) -> io::Result<()> {
        w.write_bytes(&self.bytes)
    }
    fn read(r: &mut Reader<'_>) -> io::Result<Self> {
        let bytes_slice = r.read_bytes(N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(bytes_slice);
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(N);
        Ok(FixedName { bytes, len })
    }
}

/// A fixed-capacity byte buffer with an explicit length prefix. Used for
/// read/write data payloads and extended-attribute values that are
/// genuinely variable-length but bounded by slot capacity.
#[derive(Debug, Clone)]
pub struct FixedBuf<const N: usize> {
    bytes: [u8; N],
    len: u32,
}

impl<const N: usize> FixedBuf<N> {
    pub fn new(data: &[u8]) -> io::Result<Self> {
        if data.len() > N {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "buffer too large for slot"));
        }
        let mut bytes = [0u8; N];
        bytes[..data.len()].copy_from_slice(data);
        Ok(FixedBuf {
            bytes,
            len: data.len() as u32,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl<const N: usize> WireField for FixedBuf<N> {
    fn write(&self, w: &mut Writer<'_>) -> io::Result<()> {
        self.len.write(w)?;
        w.write_bytes(&self.bytes)
    }
    fn read(r: &mut Reader<'_>) -> io::Result<Self> {
        let len = u32::read(r)?;
        let bytes_slice = r.read_bytes(N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(bytes_slice);
        Ok(FixedBuf { bytes, len })
    }
}

/// Implemented by every per-operation request/response struct.
pub trait WireCodec: Sized {
    fn encode(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn decode(buf: &[u8]) -> io::Result<Self>;
}

/// Generates a plain-data struct plus a [`WireCodec`] impl that writes/reads
/// its fields in declaration order. Keeps the per-operation structs in
/// [`crate::fuse_protocol`] free of hand-written (de)serialization
/// boilerplate while still producing the exact fixed, non-length-prefixed
/// layout spec.md §6 requires for everything except [`FixedBuf`] fields.
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            $( pub $field: $ty, )*
        }

        impl $crate::codec::WireCodec for $name {
            fn encode(&self, buf: &mut [u8]) -> std::io::Result<usize> {
                #[allow(unused_mut)]
                let mut w = $crate::codec::Writer::new(buf);
                $( $crate::codec::WireField::write(&self.$field, &mut w)?; )*
                Ok(w.written())
            }
            fn decode(buf: &[u8]) -> std::io::Result<Self> {
                #[allow(unused_mut)]
                let mut r = $crate::codec::Reader::new(buf);
                Ok(Self {
                    $( $field: $crate::codec::WireField::read(&mut r)?, )*
                })
            }
        }
    };
}

pub(crate) use wire_struct;

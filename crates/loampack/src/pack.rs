//! Static codec used by generated bindings.
//!
//! `Pack` mirrors `encode`/`decode` for native Rust types. Generated structs
//! implement it member by member; the impls here cover the leaves.

use crate::error::Error;
use crate::error::Result;

/// A native type with a fixed wire representation.
pub trait Pack: Sized {
    /// Encoded size in bytes, or `None` when the length is derived from the span.
    const FIXED_SIZE: Option<usize>;

    /// Appends the encoding of `self`.
    fn pack(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Decodes from the front of `buf`.
    ///
    /// Fixed-size types consume `FIXED_SIZE` bytes. Variable-length types consume
    /// all of `buf`.
    fn unpack(buf: &[u8]) -> Result<(Self, usize)>;

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.pack(&mut buf)?;
        Ok(buf)
    }

    /// Decodes a value that must occupy all of `buf`.
    fn from_bytes(buf: &[u8]) -> Result<Self> {
        let (value, consumed) = Self::unpack(buf)?;
        if consumed != buf.len() {
            return Err(Error::TrailingBytes { consumed, available: buf.len() });
        }
        Ok(value)
    }
}

/// Borrows `len` bytes at `offset`, or reports how many bytes were needed.
pub fn window(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset.saturating_add(len);
    buf.get(offset..end).ok_or(Error::TruncatedMessage { needed: end, available: buf.len() })
}

/// Length of the variable member of a struct occupying `span` bytes, whose other
/// members take `fixed` bytes.
pub fn derived_len(span: usize, fixed: usize) -> Result<usize> {
    span.checked_sub(fixed).ok_or(Error::TruncatedMessage { needed: fixed, available: span })
}

macro_rules! pack_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Pack for $ty {
                const FIXED_SIZE: Option<usize> = Some(std::mem::size_of::<$ty>());

                fn pack(&self, buf: &mut Vec<u8>) -> Result<()> {
                    buf.extend_from_slice(&self.to_le_bytes());
                    Ok(())
                }

                fn unpack(buf: &[u8]) -> Result<(Self, usize)> {
                    const SIZE: usize = std::mem::size_of::<$ty>();
                    let mut raw = [0u8; SIZE];
                    raw.copy_from_slice(window(buf, 0, SIZE)?);
                    Ok((<$ty>::from_le_bytes(raw), SIZE))
                }
            }
        )*
    };
}

pack_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32);

impl Pack for String {
    const FIXED_SIZE: Option<usize> = None;

    fn pack(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }

    fn unpack(buf: &[u8]) -> Result<(Self, usize)> {
        let text = std::str::from_utf8(buf).map_err(|_| Error::InvalidUtf8)?;
        Ok((text.to_string(), buf.len()))
    }
}

/// Lists and byte buffers. `Vec<u8>` encodes identically as `bytes` and `list<u8>`.
impl<T: Pack> Pack for Vec<T> {
    const FIXED_SIZE: Option<usize> = None;

    fn pack(&self, buf: &mut Vec<u8>) -> Result<()> {
        for item in self {
            item.pack(buf)?;
        }
        Ok(())
    }

    fn unpack(buf: &[u8]) -> Result<(Self, usize)> {
        let width = match T::FIXED_SIZE {
            Some(w) if w > 0 => w,
            _ => return Err(Error::InvalidListElement(std::any::type_name::<T>().to_string())),
        };
        let rem = buf.len() % width;
        if rem != 0 {
            return Err(Error::TruncatedMessage { needed: buf.len() + (width - rem), available: buf.len() });
        }
        let items = buf
            .chunks_exact(width)
            .map(|chunk| T::unpack(chunk).map(|(item, _)| item))
            .collect::<Result<Vec<_>>>()?;
        Ok((items, buf.len()))
    }
}

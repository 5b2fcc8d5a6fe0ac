//! Big-endian primitives used by the persisted format.
//!
//! Every reader maps a premature end of input to [`EmbeddingError::Malformed`]
//! so callers never observe a partially decoded value.

use std::io::{Read, Write};

use crate::error::{EmbeddingError, Result};

/// Upper bound for a single length-prefixed byte string (16 MiB).
pub const MAX_BYTES_LEN: usize = 16 * 1024 * 1024;

#[inline]
fn read_array<R: Read, const N: usize>(r: &mut R, what: &str) -> Result<[u8; N]> {
    let mut b = [0u8; N];
    r.read_exact(&mut b).map_err(|e| EmbeddingError::from_read(e, what))?;
    Ok(b)
}

#[inline]
pub fn read_u8<R: Read>(r: &mut R, what: &str) -> Result<u8> {
    Ok(read_array::<R, 1>(r, what)?[0])
}

#[inline]
pub fn read_bool<R: Read>(r: &mut R, what: &str) -> Result<bool> {
    Ok(read_u8(r, what)? != 0)
}

#[inline]
pub fn read_u16<R: Read>(r: &mut R, what: &str) -> Result<u16> {
    Ok(u16::from_be_bytes(read_array(r, what)?))
}

#[inline]
pub fn read_i32<R: Read>(r: &mut R, what: &str) -> Result<i32> {
    Ok(i32::from_be_bytes(read_array(r, what)?))
}

#[inline]
pub fn read_i64<R: Read>(r: &mut R, what: &str) -> Result<i64> {
    Ok(i64::from_be_bytes(read_array(r, what)?))
}

/// Read a non-negative `i32` count or length.
pub fn read_len<R: Read>(r: &mut R, what: &str) -> Result<usize> {
    let n = read_i32(r, what)?;
    usize::try_from(n).map_err(|_| EmbeddingError::malformed(format!("negative {what}: {n}")))
}

/// Fill a buffer of exactly `len` bytes.
pub fn read_bytes<R: Read>(r: &mut R, len: usize, what: &str) -> Result<Vec<u8>> {
    if len > MAX_BYTES_LEN {
        return Err(EmbeddingError::malformed(format!("{what} too large: {len} bytes")));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| EmbeddingError::from_read(e, what))?;
    Ok(buf)
}

/// Read a `u16`-length-prefixed UTF-8 string.
pub fn read_utf<R: Read>(r: &mut R, what: &str) -> Result<String> {
    let len = read_u16(r, what)? as usize;
    let bytes = read_bytes(r, len, what)?;
    String::from_utf8(bytes).map_err(|_| EmbeddingError::malformed(format!("{what} is not UTF-8")))
}

#[inline]
pub fn write_u8<W: Write>(w: &mut W, v: u8) -> Result<()> {
    w.write_all(&[v])?;
    Ok(())
}

#[inline]
pub fn write_bool<W: Write>(w: &mut W, v: bool) -> Result<()> {
    write_u8(w, u8::from(v))
}

#[inline]
pub fn write_u16<W: Write>(w: &mut W, v: u16) -> Result<()> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

#[inline]
pub fn write_i32<W: Write>(w: &mut W, v: i32) -> Result<()> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

#[inline]
pub fn write_i64<W: Write>(w: &mut W, v: i64) -> Result<()> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

/// Write a count or length that must fit the format's `i32` field.
pub fn write_len<W: Write>(w: &mut W, len: usize, what: &str) -> Result<()> {
    let n = i32::try_from(len)
        .map_err(|_| EmbeddingError::malformed(format!("{what} {len} exceeds i32 range")))?;
    write_i32(w, n)
}

pub fn write_utf<W: Write>(w: &mut W, s: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        EmbeddingError::malformed(format!("string of {} bytes is too long", s.len()))
    })?;
    write_u16(w, len)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

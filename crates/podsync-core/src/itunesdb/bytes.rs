//! Bounds-checked little-endian field access.
//!
//! Every record in the image starts with the same 12 bytes:
//!
//! ```text
//! [0..4]   tag             e.g. b"mhit"
//! [4..8]   header length   u32 le
//! [8..12]  total length    u32 le (child count for list records)
//! ```

use crate::error::{Error, Result};

/// Size of the common record prefix.
pub(crate) const PREFIX_LEN: usize = 12;

/// Decoded common prefix of a record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub tag: [u8; 4],
    pub header_len: usize,
    /// Total record length, or child count for `mhlt`/`mhlp`.
    pub len_or_count: usize,
}

impl RecordHeader {
    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }
}

fn slice(buf: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    at.checked_add(len)
        .and_then(|end| buf.get(at..end))
        .ok_or_else(|| Error::corrupt(at, format!("truncated: need {len} bytes")))
}

pub(crate) fn read_u8(buf: &[u8], at: usize) -> Result<u8> {
    buf.get(at)
        .copied()
        .ok_or_else(|| Error::corrupt(at, "truncated: need 1 byte"))
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> Result<u16> {
    let b = slice(buf, at, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> Result<u32> {
    let b = slice(buf, at, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> Result<u64> {
    let b = slice(buf, at, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Ok(u64::from_le_bytes(raw))
}

/// Read a field that may lie past the end of a short header.
///
/// Older database versions use shorter headers; fields they lack read as 0.
pub(crate) fn field_u32(header: &[u8], at: usize) -> u32 {
    read_u32(header, at).unwrap_or(0)
}

pub(crate) fn field_u16(header: &[u8], at: usize) -> u16 {
    read_u16(header, at).unwrap_or(0)
}

pub(crate) fn field_u8(header: &[u8], at: usize) -> u8 {
    read_u8(header, at).unwrap_or(0)
}

pub(crate) fn field_u64(header: &[u8], at: usize) -> u64 {
    read_u64(header, at).unwrap_or(0)
}

/// Overwrite a field in place. Fields beyond the header are dropped.
pub(crate) fn put_u32(header: &mut [u8], at: usize, value: u32) {
    if let Some(dst) = header.get_mut(at..at + 4) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

pub(crate) fn put_u16(header: &mut [u8], at: usize, value: u16) {
    if let Some(dst) = header.get_mut(at..at + 2) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

pub(crate) fn put_u8(header: &mut [u8], at: usize, value: u8) {
    if let Some(dst) = header.get_mut(at) {
        *dst = value;
    }
}

pub(crate) fn put_u64(header: &mut [u8], at: usize, value: u64) {
    if let Some(dst) = header.get_mut(at..at + 8) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

/// Length as the u32 stored on disk.
pub(crate) fn len_u32(len: usize, at: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::corrupt(at, format!("record too large: {len} bytes")))
}

/// Read the common prefix of the record at `at`, which must end by `limit`.
pub(crate) fn read_record_header(buf: &[u8], at: usize, limit: usize) -> Result<RecordHeader> {
    if at + PREFIX_LEN > limit {
        return Err(Error::corrupt(at, "record prefix runs past its parent"));
    }
    let raw = slice(buf, at, 4)?;
    let tag = [raw[0], raw[1], raw[2], raw[3]];
    let header_len = read_u32(buf, at + 4)? as usize;
    let len_or_count = read_u32(buf, at + 8)? as usize;

    if header_len < PREFIX_LEN || at + header_len > limit {
        return Err(Error::corrupt(
            at,
            format!(
                "{} header length {header_len} out of range",
                String::from_utf8_lossy(&tag)
            ),
        ));
    }

    Ok(RecordHeader {
        tag,
        header_len,
        len_or_count,
    })
}

/// Read a record prefix and check that its total length fits inside `limit`.
pub(crate) fn read_sized_record(
    buf: &[u8],
    at: usize,
    limit: usize,
    expected: &[u8; 4],
) -> Result<RecordHeader> {
    let header = read_record_header(buf, at, limit)?;
    if &header.tag != expected {
        return Err(Error::corrupt(
            at,
            format!(
                "expected {} record, found {}",
                String::from_utf8_lossy(expected),
                header.tag_str()
            ),
        ));
    }
    check_total(&header, at, limit)?;
    Ok(header)
}

/// Check that a record's total length covers its header and fits its parent.
pub(crate) fn check_total(header: &RecordHeader, at: usize, limit: usize) -> Result<()> {
    let total = header.len_or_count;
    if total < header.header_len || at + total > limit {
        return Err(Error::corrupt(
            at,
            format!("{} total length {total} out of range", header.tag_str()),
        ));
    }
    Ok(())
}

/// A zero-filled header with the common prefix written in.
pub(crate) fn new_header(tag: &[u8; 4], header_len: usize) -> Vec<u8> {
    let mut header = vec![0u8; header_len];
    header[..4].copy_from_slice(tag);
    put_u32(&mut header, 4, header_len as u32);
    header
}

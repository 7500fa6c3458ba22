//! `mhod` data objects.
//!
//! Only the string-bearing kinds are decoded. A decoded string keeps the raw
//! bytes it came from so an unchanged value is re-emitted verbatim; anything
//! this module does not understand stays an opaque blob.

use super::bytes::{RecordHeader, check_total, field_u32, put_u32, read_record_header, read_u32};
use crate::error::{Error, Result};

/// Header length written for new data objects.
pub(crate) const MHOD_HEADER_LEN: usize = 0x18;
/// Offset of the string payload inside a string object.
pub(crate) const STRING_DATA_OFFSET: usize = 0x28;

const ENCODING_UTF16: u32 = 1;
const ENCODING_UTF8: u32 = 2;

/// String data-object kinds carried by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum StringKind {
    Title,
    Location,
    Album,
    Artist,
    Genre,
    FileType,
    Comment,
    Composer,
    AlbumArtist,
}

impl StringKind {
    /// Order in which missing kinds are appended to a record.
    pub const CANONICAL: [Self; 9] = [
        Self::Title,
        Self::Location,
        Self::Album,
        Self::Artist,
        Self::Genre,
        Self::FileType,
        Self::Comment,
        Self::Composer,
        Self::AlbumArtist,
    ];

    pub const fn from_type(kind: u32) -> Option<Self> {
        match kind {
            1 => Some(Self::Title),
            2 => Some(Self::Location),
            3 => Some(Self::Album),
            4 => Some(Self::Artist),
            5 => Some(Self::Genre),
            6 => Some(Self::FileType),
            8 => Some(Self::Comment),
            12 => Some(Self::Composer),
            22 => Some(Self::AlbumArtist),
            _ => None,
        }
    }

    pub const fn type_code(self) -> u32 {
        match self {
            Self::Title => 1,
            Self::Location => 2,
            Self::Album => 3,
            Self::Artist => 4,
            Self::Genre => 5,
            Self::FileType => 6,
            Self::Comment => 8,
            Self::Composer => 12,
            Self::AlbumArtist => 22,
        }
    }
}

/// Whether a data-object type marks a smart playlist (rules, preferences).
pub(crate) const fn is_smart_playlist_type(kind: u32) -> bool {
    matches!(kind, 50..=53)
}

/// A decoded string object together with its original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StringObject {
    pub kind: StringKind,
    pub value: String,
    raw: Vec<u8>,
    utf8: bool,
}

impl StringObject {
    /// Build a fresh UTF-16 string object.
    pub fn new(kind: StringKind, value: &str) -> Self {
        let mut prefix = vec![0u8; STRING_DATA_OFFSET];
        prefix[..4].copy_from_slice(b"mhod");
        put_u32(&mut prefix, 4, MHOD_HEADER_LEN as u32);
        put_u32(&mut prefix, 0x0C, kind.type_code());
        put_u32(&mut prefix, 0x18, ENCODING_UTF16);
        Self::rebuild(prefix, kind, value, false)
    }

    fn rebuild(mut prefix: Vec<u8>, kind: StringKind, value: &str, utf8: bool) -> Self {
        let data: Vec<u8> = if utf8 {
            value.as_bytes().to_vec()
        } else {
            value.encode_utf16().flat_map(u16::to_le_bytes).collect()
        };
        let total = (prefix.len() + data.len()) as u32;
        put_u32(&mut prefix, 0x08, total);
        put_u32(&mut prefix, 0x1C, data.len() as u32);
        prefix.extend_from_slice(&data);
        Self {
            kind,
            value: value.to_string(),
            raw: prefix,
            utf8,
        }
    }

    /// Bytes for `value`: the original bytes if unchanged, else a re-encoding
    /// that keeps this object's prefix and encoding.
    pub fn encode(&self, value: &str) -> Vec<u8> {
        if value == self.value {
            return self.raw.clone();
        }
        let prefix = self.raw[..STRING_DATA_OFFSET].to_vec();
        Self::rebuild(prefix, self.kind, value, self.utf8).raw
    }
}

/// A child data object of a track or playlist record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DataObject {
    String(StringObject),
    Opaque { kind: u32, raw: Vec<u8> },
}

impl DataObject {
    pub const fn type_code(&self) -> u32 {
        match self {
            Self::String(s) => s.kind.type_code(),
            Self::Opaque { kind, .. } => *kind,
        }
    }
}

/// Decode the `mhod` at `at`. Returns the object and its total length.
pub(crate) fn decode(buf: &[u8], at: usize, limit: usize) -> Result<(DataObject, usize)> {
    let header = read_record_header(buf, at, limit)?;
    if &header.tag != b"mhod" {
        return Err(Error::corrupt(
            at,
            format!("expected mhod record, found {}", header.tag_str()),
        ));
    }
    check_total(&header, at, limit)?;
    let total = header.len_or_count;
    let raw = &buf[at..at + total];
    let kind = read_u32(buf, at + 0x0C)?;

    let object = match StringKind::from_type(kind).and_then(|k| decode_string(raw, &header, k)) {
        Some(s) => DataObject::String(s),
        None => DataObject::Opaque {
            kind,
            raw: raw.to_vec(),
        },
    };
    Ok((object, total))
}

/// Decode a string payload; `None` means "keep as opaque".
fn decode_string(raw: &[u8], header: &RecordHeader, kind: StringKind) -> Option<StringObject> {
    if header.header_len != MHOD_HEADER_LEN || raw.len() < STRING_DATA_OFFSET {
        return None;
    }
    let encoding = field_u32(raw, 0x18);
    let len = field_u32(raw, 0x1C) as usize;
    let data = raw.get(STRING_DATA_OFFSET..STRING_DATA_OFFSET + len)?;
    // Trailing bytes after the string cannot be reproduced on re-encode.
    if STRING_DATA_OFFSET + len != raw.len() {
        return None;
    }

    let (value, utf8) = if encoding == ENCODING_UTF8 {
        (String::from_utf8(data.to_vec()).ok()?, true)
    } else {
        if len % 2 != 0 {
            return None;
        }
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        (String::from_utf16(&units).ok()?, false)
    };

    Some(StringObject {
        kind,
        value,
        raw: raw.to_vec(),
        utf8,
    })
}

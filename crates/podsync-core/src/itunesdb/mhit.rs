//! `mhit` track records.
//!
//! The raw header is kept and known fields are patched over it, so bytes at
//! offsets this module does not model survive a round trip. Child data
//! objects are re-emitted in their original order; string fields the model
//! gained are appended after them.

use super::bytes::{
    field_u8, field_u32, field_u64, len_u32, new_header, put_u8, put_u32, put_u64,
    read_sized_record,
};
use super::convert::{
    rating_from_disk, rating_to_disk, sample_rate_from_disk, sample_rate_to_disk, time_from_disk,
    time_to_disk,
};
use super::mhod::{self, DataObject, StringKind, StringObject};
use crate::error::{Error, Result};
use crate::model::{MediaType, Track, TrackStatus};
use tracing::debug;

/// Smallest track header accepted (iTunes 4 layout).
const MIN_HEADER_LEN: usize = 0x9C;
/// Header length written for new tracks.
const NEW_HEADER_LEN: usize = 0x184;

const OFF_CHILD_COUNT: usize = 0x0C;
const OFF_ID: usize = 0x10;
const OFF_VISIBLE: usize = 0x14;
const OFF_COMPILATION: usize = 0x1E;
const OFF_RATING: usize = 0x1F;
const OFF_MODIFIED: usize = 0x20;
const OFF_SIZE: usize = 0x24;
const OFF_LENGTH: usize = 0x28;
const OFF_TRACK_NUMBER: usize = 0x2C;
const OFF_TRACK_COUNT: usize = 0x30;
const OFF_YEAR: usize = 0x34;
const OFF_BITRATE: usize = 0x38;
const OFF_SAMPLE_RATE: usize = 0x3C;
const OFF_PLAY_COUNT: usize = 0x50;
const OFF_LAST_PLAYED: usize = 0x58;
const OFF_DISC_NUMBER: usize = 0x5C;
const OFF_DISC_COUNT: usize = 0x60;
const OFF_ADDED: usize = 0x68;
const OFF_DBID: usize = 0x70;
const OFF_SKIP_SHUFFLE: usize = 0xA5;
const OFF_REMEMBER_POSITION: usize = 0xA6;
const OFF_MEDIA_TYPE: usize = 0xD0;

/// Raw parts of a decoded track record.
#[derive(Debug, Clone)]
pub(crate) struct RawTrack {
    header: Vec<u8>,
    children: Vec<DataObject>,
}

/// Decode the `mhit` at `at`. Returns the track and the record length.
pub(crate) fn decode(buf: &[u8], at: usize, limit: usize) -> Result<(Track, usize)> {
    let record = read_sized_record(buf, at, limit, b"mhit")?;
    if record.header_len < MIN_HEADER_LEN {
        return Err(Error::corrupt(
            at,
            format!("mhit header length {:#x} too short", record.header_len),
        ));
    }
    let end = at + record.len_or_count;
    let header = buf[at..at + record.header_len].to_vec();
    let child_count = field_u32(&header, OFF_CHILD_COUNT) as usize;

    let mut track = Track::empty(field_u32(&header, OFF_ID));
    let mut children = Vec::with_capacity(child_count);
    let mut offset = at + record.header_len;
    for _ in 0..child_count {
        let (object, len) = mhod::decode(buf, offset, end)?;
        offset += len;
        children.push(assign_string(&mut track, object));
    }
    if offset != end {
        return Err(Error::corrupt(
            offset,
            format!("{} unexpected byte(s) after track {}", end - offset, track.id),
        ));
    }

    track.compilation = field_u8(&header, OFF_COMPILATION) != 0;
    track.rating = rating_from_disk(field_u8(&header, OFF_RATING));
    track.date_modified = time_from_disk(field_u32(&header, OFF_MODIFIED));
    track.size = u64::from(field_u32(&header, OFF_SIZE));
    track.duration_ms = field_u32(&header, OFF_LENGTH);
    track.track_number = field_u32(&header, OFF_TRACK_NUMBER);
    track.track_count = field_u32(&header, OFF_TRACK_COUNT);
    track.year = field_u32(&header, OFF_YEAR);
    track.bitrate = field_u32(&header, OFF_BITRATE);
    track.sample_rate = sample_rate_from_disk(field_u32(&header, OFF_SAMPLE_RATE));
    track.play_count = field_u32(&header, OFF_PLAY_COUNT);
    track.last_played = time_from_disk(field_u32(&header, OFF_LAST_PLAYED));
    track.disc_number = field_u32(&header, OFF_DISC_NUMBER);
    track.disc_count = field_u32(&header, OFF_DISC_COUNT);
    track.date_added = time_from_disk(field_u32(&header, OFF_ADDED));
    track.dbid = field_u64(&header, OFF_DBID);
    track.skip_when_shuffling = field_u8(&header, OFF_SKIP_SHUFFLE) != 0;
    track.remember_position = field_u8(&header, OFF_REMEMBER_POSITION) != 0;
    track.media_type = MediaType::from_raw(field_u32(&header, OFF_MEDIA_TYPE));
    track.status = TrackStatus::OnDevice;
    track.raw = Some(RawTrack { header, children });

    Ok((track, record.len_or_count))
}

/// Move a decoded string into its model field. A second string of the same
/// kind is kept opaque so it is written back untouched.
fn assign_string(track: &mut Track, object: DataObject) -> DataObject {
    let DataObject::String(s) = object else {
        return object;
    };
    let slot = string_slot(track, s.kind);
    if slot.is_some() {
        let kind = s.kind.type_code();
        return DataObject::Opaque {
            kind,
            raw: s.encode(&s.value),
        };
    }
    *slot = Some(s.value.clone());
    DataObject::String(s)
}

fn string_slot(track: &mut Track, kind: StringKind) -> &mut Option<String> {
    match kind {
        StringKind::Title => &mut track.title,
        StringKind::Location => &mut track.location,
        StringKind::Album => &mut track.album,
        StringKind::Artist => &mut track.artist,
        StringKind::Genre => &mut track.genre,
        StringKind::FileType => &mut track.filetype,
        StringKind::Comment => &mut track.comment,
        StringKind::Composer => &mut track.composer,
        StringKind::AlbumArtist => &mut track.album_artist,
    }
}

fn string_value(track: &Track, kind: StringKind) -> Option<&str> {
    match kind {
        StringKind::Title => track.title.as_deref(),
        StringKind::Location => track.location.as_deref(),
        StringKind::Album => track.album.as_deref(),
        StringKind::Artist => track.artist.as_deref(),
        StringKind::Genre => track.genre.as_deref(),
        StringKind::FileType => track.filetype.as_deref(),
        StringKind::Comment => track.comment.as_deref(),
        StringKind::Composer => track.composer.as_deref(),
        StringKind::AlbumArtist => track.album_artist.as_deref(),
    }
}

fn new_track_header() -> Vec<u8> {
    let mut header = new_header(b"mhit", NEW_HEADER_LEN);
    put_u32(&mut header, OFF_VISIBLE, 1);
    header
}

/// Write `value` unless the stored byte already decodes to the same flag.
fn patch_flag(header: &mut [u8], at: usize, value: bool) {
    if (field_u8(header, at) != 0) != value {
        put_u8(header, at, u8::from(value));
    }
}

/// Encode a track record, appending it to `out`.
pub(crate) fn encode(track: &Track, out: &mut Vec<u8>) -> Result<()> {
    let (mut header, children) = match &track.raw {
        Some(raw) => (raw.header.clone(), raw.children.as_slice()),
        None => (new_track_header(), &[][..]),
    };

    put_u32(&mut header, OFF_ID, track.id);
    patch_flag(&mut header, OFF_COMPILATION, track.compilation);
    if rating_from_disk(field_u8(&header, OFF_RATING)) != track.rating {
        put_u8(&mut header, OFF_RATING, rating_to_disk(track.rating));
    }
    put_u32(&mut header, OFF_MODIFIED, time_to_disk(track.date_modified));
    put_u32(
        &mut header,
        OFF_SIZE,
        u32::try_from(track.size).unwrap_or(u32::MAX),
    );
    put_u32(&mut header, OFF_LENGTH, track.duration_ms);
    put_u32(&mut header, OFF_TRACK_NUMBER, track.track_number);
    put_u32(&mut header, OFF_TRACK_COUNT, track.track_count);
    put_u32(&mut header, OFF_YEAR, track.year);
    put_u32(&mut header, OFF_BITRATE, track.bitrate);
    if sample_rate_from_disk(field_u32(&header, OFF_SAMPLE_RATE)) != track.sample_rate {
        match sample_rate_to_disk(track.sample_rate) {
            Some(raw) => put_u32(&mut header, OFF_SAMPLE_RATE, raw),
            None => debug!(
                "Track {}: sample rate {} Hz does not fit the record, left unchanged",
                track.id, track.sample_rate
            ),
        }
    }
    put_u32(&mut header, OFF_PLAY_COUNT, track.play_count);
    put_u32(&mut header, OFF_LAST_PLAYED, time_to_disk(track.last_played));
    put_u32(&mut header, OFF_DISC_NUMBER, track.disc_number);
    put_u32(&mut header, OFF_DISC_COUNT, track.disc_count);
    put_u32(&mut header, OFF_ADDED, time_to_disk(track.date_added));
    put_u64(&mut header, OFF_DBID, track.dbid);
    patch_flag(&mut header, OFF_SKIP_SHUFFLE, track.skip_when_shuffling);
    patch_flag(&mut header, OFF_REMEMBER_POSITION, track.remember_position);
    if MediaType::from_raw(field_u32(&header, OFF_MEDIA_TYPE)) != track.media_type {
        put_u32(&mut header, OFF_MEDIA_TYPE, track.media_type.to_raw());
    }

    let mut body = Vec::new();
    let mut count = 0u32;
    let mut written: Vec<StringKind> = Vec::new();
    for child in children {
        match child {
            DataObject::String(s) => {
                if let Some(value) = string_value(track, s.kind) {
                    body.extend_from_slice(&s.encode(value));
                    written.push(s.kind);
                    count += 1;
                }
            }
            DataObject::Opaque { raw, .. } => {
                body.extend_from_slice(raw);
                count += 1;
            }
        }
    }
    for kind in StringKind::CANONICAL {
        if written.contains(&kind) {
            continue;
        }
        if let Some(value) = string_value(track, kind).filter(|v| !v.is_empty()) {
            body.extend_from_slice(&StringObject::new(kind, value).encode(value));
            count += 1;
        }
    }

    let start = out.len();
    put_u32(&mut header, OFF_CHILD_COUNT, count);
    let total = len_u32(header.len() + body.len(), start)?;
    put_u32(&mut header, 0x08, total);
    out.extend_from_slice(&header);
    out.extend_from_slice(&body);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::itunesdb::convert::MAC_EPOCH_OFFSET;

    fn encoded(track: &Track) -> Vec<u8> {
        let mut out = Vec::new();
        encode(track, &mut out).unwrap();
        out
    }

    fn sample_track() -> Track {
        let mut track = Track::empty(42);
        track.title = Some("Song".to_string());
        track.artist = Some("Artist".to_string());
        track.location = Some(":iPod_Control:Music:F02:ABCD.mp3".to_string());
        track.size = 4_000_000;
        track.duration_ms = 215_000;
        track.rating = 4;
        track.sample_rate = 44_100;
        track.play_count = 7;
        track.date_added = Some(1_600_000_000);
        track.media_type = MediaType::Podcast;
        track.remember_position = true;
        track
    }

    #[test]
    fn test_new_track_round_trip() {
        let bytes = encoded(&sample_track());
        let (track, len) = decode(&bytes, 0, bytes.len()).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(track.id, 42);
        assert_eq!(track.title.as_deref(), Some("Song"));
        assert_eq!(track.artist.as_deref(), Some("Artist"));
        assert_eq!(track.size, 4_000_000);
        assert_eq!(track.rating, 4);
        assert_eq!(track.sample_rate, 44_100);
        assert_eq!(track.play_count, 7);
        assert_eq!(track.date_added, Some(1_600_000_000));
        assert_eq!(track.media_type, MediaType::Podcast);
        assert!(track.remember_position);
        assert!(!track.skip_when_shuffling);
        assert_eq!(field_u32(&bytes, OFF_VISIBLE), 1);
        assert_eq!(field_u32(&bytes, OFF_CHILD_COUNT), 3);
    }

    #[test]
    fn test_decoded_track_reencodes_identically() {
        let mut bytes = encoded(&sample_track());
        // Lossy encodings and unmodelled bytes must survive.
        put_u8(&mut bytes, OFF_RATING, 83);
        put_u32(&mut bytes, OFF_SAMPLE_RATE, (44_100 << 16) | 0x1234);
        put_u32(&mut bytes, 0x90, 0xDEAD_BEEF);
        put_u32(&mut bytes, OFF_MEDIA_TYPE, 0);

        let (track, _) = decode(&bytes, 0, bytes.len()).unwrap();
        assert_eq!(encoded(&track), bytes);
    }

    #[test]
    fn test_changed_field_is_written() {
        let bytes = encoded(&sample_track());
        let (mut track, _) = decode(&bytes, 0, bytes.len()).unwrap();
        track.rating = 2;
        track.last_played = Some(0);
        let out = encoded(&track);
        assert_eq!(field_u8(&out, OFF_RATING), 40);
        assert_eq!(i64::from(field_u32(&out, OFF_LAST_PLAYED)), MAC_EPOCH_OFFSET);
    }

    #[test]
    fn test_string_changes_keep_order_and_append_new_kinds() {
        let bytes = encoded(&sample_track());
        let (mut track, _) = decode(&bytes, 0, bytes.len()).unwrap();
        track.artist = None;
        track.genre = Some("Jazz".to_string());
        track.title = Some("Renamed".to_string());

        let out = encoded(&track);
        let (again, _) = decode(&out, 0, out.len()).unwrap();
        assert_eq!(again.title.as_deref(), Some("Renamed"));
        assert_eq!(again.artist, None);
        assert_eq!(again.genre.as_deref(), Some("Jazz"));
        assert_eq!(field_u32(&out, 0x08) as usize, out.len());

        let kinds: Vec<u32> = again
            .raw
            .as_ref()
            .unwrap()
            .children
            .iter()
            .map(DataObject::type_code)
            .collect();
        assert_eq!(kinds, vec![1, 2, 5]);
    }

    #[test]
    fn test_unrepresentable_sample_rate_keeps_stored_value() {
        let bytes = encoded(&sample_track());
        let (mut track, _) = decode(&bytes, 0, bytes.len()).unwrap();
        track.sample_rate = 96_000;

        let out = encoded(&track);
        assert_eq!(field_u32(&out, OFF_SAMPLE_RATE), 44_100 << 16);
    }

    #[test]
    fn test_record_lengths_cover_children() {
        let out = encoded(&sample_track());
        assert_eq!(field_u32(&out, 0x08) as usize, out.len());
    }

    #[test]
    fn test_short_header_rejected() {
        let mut bytes = new_header(b"mhit", 0x40);
        put_u32(&mut bytes, 0x08, 0x40);
        assert!(decode(&bytes, 0, bytes.len()).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encoded(&sample_track());
        let total = bytes.len() + 4;
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        put_u32(&mut bytes, 0x08, total as u32);
        assert!(decode(&bytes, 0, bytes.len()).is_err());
    }
}

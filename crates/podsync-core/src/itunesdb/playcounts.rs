//! The firmware's `Play Counts` file.
//!
//! The device does not touch the iTunesDB itself. Plays, ratings and
//! last-played times recorded since the last sync go into a separate `mhdp`
//! file with one fixed-size entry per track, in track record order.

use tracing::{debug, warn};

use super::bytes::{field_u32, read_record_header, read_u32};
use super::convert::{rating_from_disk, time_from_disk};
use crate::error::{Error, Result};
use crate::model::Document;

const MIN_ENTRY_LEN: usize = 0x08;
const RATING_ENTRY_LEN: usize = 0x10;

/// One track's activity since the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayCountEntry {
    /// Plays since the last sync.
    pub play_count: u32,
    /// Last time the track was played (Unix seconds).
    pub last_played: Option<i64>,
    /// Rating set on the device, in stars. `None` for short entries.
    pub rating: Option<u8>,
}

/// Parse a `Play Counts` file.
pub fn parse(buf: &[u8]) -> Result<Vec<PlayCountEntry>> {
    let header = read_record_header(buf, 0, buf.len())?;
    if &header.tag != b"mhdp" {
        return Err(Error::corrupt(0, "play counts file has no mhdp header"));
    }
    let entry_len = header.len_or_count;
    if entry_len < MIN_ENTRY_LEN {
        return Err(Error::corrupt(8, format!("play count entry length {entry_len} too short")));
    }
    let count = read_u32(buf, 0x0C)? as usize;

    let mut entries = Vec::with_capacity(count.min(65_536));
    for index in 0..count {
        let at = header.header_len + index * entry_len;
        let raw = buf
            .get(at..at + entry_len)
            .ok_or_else(|| Error::corrupt(at, "play counts file truncated"))?;
        let rating = (entry_len >= RATING_ENTRY_LEN).then(|| {
            let raw_rating = field_u32(raw, 0x0C).min(100) as u8;
            rating_from_disk(raw_rating)
        });
        entries.push(PlayCountEntry {
            play_count: field_u32(raw, 0x00),
            last_played: time_from_disk(field_u32(raw, 0x04)),
            rating,
        });
    }
    Ok(entries)
}

/// Apply play count entries to the tracks they belong to.
///
/// Entry `n` belongs to the `n`th track record. Play counts are added, the
/// last-played time and rating replace the stored ones. Marks the document
/// dirty. Returns how many tracks changed.
pub fn merge(doc: &mut Document, entries: &[PlayCountEntry]) -> usize {
    if entries.len() != doc.track_order.len() {
        warn!(
            "Play Counts has {} entries for {} tracks; merging the overlap",
            entries.len(),
            doc.track_order.len()
        );
    }

    let mut changed = 0;
    for (id, entry) in doc.track_order.iter().zip(entries) {
        let Some(track) = doc.tracks.get_mut(id) else {
            continue;
        };
        let before = (track.play_count, track.last_played, track.rating);
        track.play_count = track.play_count.saturating_add(entry.play_count);
        if entry.last_played.is_some() {
            track.last_played = entry.last_played;
        }
        if let Some(rating) = entry.rating {
            track.rating = rating;
        }
        if before != (track.play_count, track.last_played, track.rating) {
            changed += 1;
        }
    }
    doc.dirty = true;
    debug!("Merged play counts into {} track(s)", changed);
    changed
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::itunesdb::bytes::{new_header, put_u32};
    use crate::itunesdb::convert::MAC_EPOCH_OFFSET;
    use crate::itunesdb::new_document;
    use crate::model::Track;

    fn play_counts(entry_len: usize, entries: &[(u32, u32, u32)]) -> Vec<u8> {
        let mut buf = new_header(b"mhdp", 0x60);
        put_u32(&mut buf, 0x08, entry_len as u32);
        put_u32(&mut buf, 0x0C, entries.len() as u32);
        for (plays, played, rating) in entries {
            let mut entry = vec![0u8; entry_len];
            put_u32(&mut entry, 0, *plays);
            put_u32(&mut entry, 4, *played);
            put_u32(&mut entry, 0x0C, *rating);
            buf.extend_from_slice(&entry);
        }
        buf
    }

    #[test]
    fn test_parse_entries() {
        let played = (1_700_000_000 + MAC_EPOCH_OFFSET) as u32;
        let buf = play_counts(0x1C, &[(3, played, 80), (0, 0, 0)]);
        let entries = parse(&buf).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].play_count, 3);
        assert_eq!(entries[0].last_played, Some(1_700_000_000));
        assert_eq!(entries[0].rating, Some(4));
        assert_eq!(entries[1].last_played, None);
    }

    #[test]
    fn test_short_entries_have_no_rating() {
        let buf = play_counts(0x0C, &[(1, 0, 0)]);
        assert_eq!(parse(&buf).unwrap()[0].rating, None);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let mut buf = play_counts(0x10, &[(1, 0, 0)]);
        buf.truncate(buf.len() - 4);
        assert!(parse(&buf).is_err());
    }

    #[test]
    fn test_merge_adds_play_counts_in_record_order() {
        let mut doc = new_document("iPod");
        for _ in 0..2 {
            let id = doc.allocate_track_id();
            let mut track = Track::empty(id);
            track.play_count = 2;
            doc.insert_track(track).unwrap();
        }
        doc.dirty = false;

        let entries = [
            PlayCountEntry {
                play_count: 5,
                last_played: Some(100),
                rating: Some(3),
            },
            PlayCountEntry {
                play_count: 0,
                last_played: None,
                rating: None,
            },
        ];
        assert_eq!(merge(&mut doc, &entries), 1);
        assert_eq!(doc.track(1).unwrap().play_count, 7);
        assert_eq!(doc.track(1).unwrap().rating, 3);
        assert_eq!(doc.track(2).unwrap().play_count, 2);
        assert!(doc.is_dirty());
    }
}

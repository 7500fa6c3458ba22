//! `mhyp` playlist records and their `mhip` items.
//!
//! ```text
//! mhyp  header (id, master flag, podcast flag, counts)
//!   mhod*   title, smart-playlist rules, sort indices, ...
//!   mhip*   one per entry, each with its own child objects
//!   mhod*   objects that followed the items (rare)
//! ```

use super::bytes::{
    field_u8, field_u16, field_u32, field_u64, len_u32, new_header, put_u8, put_u16, put_u32,
    put_u64, read_record_header, read_sized_record,
};
use super::convert::{time_to_disk, unix_now};
use super::mhod::{self, DataObject, StringKind, StringObject, is_smart_playlist_type};
use crate::error::{Error, Result};
use crate::model::{Playlist, PlaylistEntry};

const MIN_HEADER_LEN: usize = 0x2C;
const NEW_HEADER_LEN: usize = 0x6C;
const MHIP_MIN_HEADER_LEN: usize = 0x1C;
const MHIP_HEADER_LEN: usize = 0x4C;

const OFF_OBJECT_COUNT: usize = 0x0C;
const OFF_ITEM_COUNT: usize = 0x10;
const OFF_MASTER: usize = 0x14;
const OFF_TIMESTAMP: usize = 0x18;
const OFF_ID: usize = 0x1C;
const OFF_PODCAST: usize = 0x2A;

const MHIP_OFF_TRACK_ID: usize = 0x18;
const MHIP_OFF_TIMESTAMP: usize = 0x1C;

/// Library sort-index objects. They index positions in the entry list.
const fn is_sort_index_type(kind: u32) -> bool {
    matches!(kind, 52 | 53)
}

/// Raw parts of a decoded playlist record.
#[derive(Debug, Clone)]
pub(crate) struct RawPlaylist {
    header: Vec<u8>,
    objects: Vec<DataObject>,
    trailing: Vec<Vec<u8>>,
    decoded_track_ids: Vec<u32>,
}

/// Decode the `mhyp` at `at`. Returns the playlist and the record length.
pub(crate) fn decode(buf: &[u8], at: usize, limit: usize) -> Result<(Playlist, usize)> {
    let record = read_sized_record(buf, at, limit, b"mhyp")?;
    if record.header_len < MIN_HEADER_LEN {
        return Err(Error::corrupt(
            at,
            format!("mhyp header length {:#x} too short", record.header_len),
        ));
    }
    let end = at + record.len_or_count;
    let header = buf[at..at + record.header_len].to_vec();

    let mut playlist = Playlist::new(field_u64(&header, OFF_ID), String::new());
    playlist.is_master = field_u8(&header, OFF_MASTER) != 0;
    playlist.is_podcast = field_u16(&header, OFF_PODCAST) != 0;

    let mut objects = Vec::new();
    let mut trailing = Vec::new();
    let mut have_title = false;
    let mut offset = at + record.header_len;
    while offset < end {
        let child = read_record_header(buf, offset, end)?;
        match &child.tag {
            b"mhod" => {
                let (object, len) = mhod::decode(buf, offset, end)?;
                if !playlist.entries.is_empty() {
                    trailing.push(buf[offset..offset + len].to_vec());
                } else {
                    objects.push(assign_object(&mut playlist, object, &mut have_title));
                }
                offset += len;
            }
            b"mhip" => {
                let item = read_sized_record(buf, offset, end, b"mhip")?;
                if item.header_len < MHIP_MIN_HEADER_LEN {
                    return Err(Error::corrupt(offset, "mhip header too short"));
                }
                let raw = buf[offset..offset + item.len_or_count].to_vec();
                playlist.entries.push(PlaylistEntry {
                    track_id: field_u32(&raw, MHIP_OFF_TRACK_ID),
                    raw: Some(raw),
                });
                offset += item.len_or_count;
            }
            _ => {
                return Err(Error::corrupt(
                    offset,
                    format!("unexpected {} record inside playlist", child.tag_str()),
                ));
            }
        }
    }

    let decoded_track_ids = playlist.track_ids();
    playlist.raw = Some(RawPlaylist {
        header,
        objects,
        trailing,
        decoded_track_ids,
    });
    Ok((playlist, record.len_or_count))
}

fn assign_object(playlist: &mut Playlist, object: DataObject, have_title: &mut bool) -> DataObject {
    if is_smart_playlist_type(object.type_code()) {
        playlist.is_smart = true;
    }
    match object {
        DataObject::String(s) if s.kind == StringKind::Title && !*have_title => {
            *have_title = true;
            playlist.name.clone_from(&s.value);
            DataObject::String(s)
        }
        DataObject::String(s) => DataObject::Opaque {
            kind: s.kind.type_code(),
            raw: s.encode(&s.value),
        },
        opaque @ DataObject::Opaque { .. } => opaque,
    }
}

fn new_playlist_header(playlist: &Playlist) -> Vec<u8> {
    let mut header = new_header(b"mhyp", NEW_HEADER_LEN);
    put_u32(&mut header, OFF_TIMESTAMP, time_to_disk(Some(unix_now())));
    put_u8(&mut header, OFF_MASTER, u8::from(playlist.is_master));
    header
}

fn new_item(track_id: u32) -> Vec<u8> {
    let mut item = new_header(b"mhip", MHIP_HEADER_LEN);
    put_u32(&mut item, 0x08, MHIP_HEADER_LEN as u32);
    put_u32(&mut item, MHIP_OFF_TRACK_ID, track_id);
    put_u32(&mut item, MHIP_OFF_TIMESTAMP, time_to_disk(Some(unix_now())));
    item
}

/// Encode a playlist record, keeping only entries for which `keep` holds.
pub(crate) fn encode(playlist: &Playlist, keep: impl Fn(u32) -> bool, out: &mut Vec<u8>) -> Result<()> {
    let entries: Vec<&PlaylistEntry> = playlist.entries.iter().filter(|e| keep(e.track_id)).collect();

    let (mut header, objects, trailing, entries_changed) = match &playlist.raw {
        Some(raw) => (
            raw.header.clone(),
            raw.objects.as_slice(),
            raw.trailing.as_slice(),
            !entries.iter().map(|e| e.track_id).eq(raw.decoded_track_ids.iter().copied()),
        ),
        None => (new_playlist_header(playlist), &[][..], &[][..], true),
    };

    if (field_u8(&header, OFF_MASTER) != 0) != playlist.is_master {
        put_u8(&mut header, OFF_MASTER, u8::from(playlist.is_master));
    }
    put_u64(&mut header, OFF_ID, playlist.id);
    if (field_u16(&header, OFF_PODCAST) != 0) != playlist.is_podcast {
        put_u16(&mut header, OFF_PODCAST, u16::from(playlist.is_podcast));
    }

    let mut body = Vec::new();
    let mut object_count = 0u32;
    let mut wrote_title = false;
    for object in objects {
        match object {
            DataObject::String(s) => {
                body.extend_from_slice(&s.encode(&playlist.name));
                wrote_title = true;
            }
            DataObject::Opaque { kind, .. } if entries_changed && is_sort_index_type(*kind) => {
                continue;
            }
            DataObject::Opaque { raw, .. } => body.extend_from_slice(raw),
        }
        object_count += 1;
    }
    if !wrote_title {
        body.extend_from_slice(&StringObject::new(StringKind::Title, &playlist.name).encode(&playlist.name));
        object_count += 1;
    }

    for entry in &entries {
        match &entry.raw {
            Some(raw) => body.extend_from_slice(raw),
            None => body.extend_from_slice(&new_item(entry.track_id)),
        }
    }
    for raw in trailing {
        body.extend_from_slice(raw);
        object_count += 1;
    }

    let start = out.len();
    put_u32(&mut header, OFF_OBJECT_COUNT, object_count);
    put_u32(&mut header, OFF_ITEM_COUNT, len_u32(entries.len(), start)?);
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

    fn encoded(playlist: &Playlist) -> Vec<u8> {
        let mut out = Vec::new();
        encode(playlist, |_| true, &mut out).unwrap();
        out
    }

    fn road_trip() -> Playlist {
        let mut playlist = Playlist::new(0xABCD_0001_0002_0003, "Road Trip");
        for id in [3, 1, 3] {
            playlist.insert(id, None);
        }
        playlist
    }

    #[test]
    fn test_new_playlist_round_trip() {
        let bytes = encoded(&road_trip());
        let (playlist, len) = decode(&bytes, 0, bytes.len()).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(playlist.id, 0xABCD_0001_0002_0003);
        assert_eq!(playlist.name, "Road Trip");
        assert_eq!(playlist.track_ids(), vec![3, 1, 3]);
        assert!(!playlist.is_master);
        assert!(!playlist.is_smart);
        assert_eq!(field_u32(&bytes, OFF_OBJECT_COUNT), 1);
        assert_eq!(field_u32(&bytes, OFF_ITEM_COUNT), 3);
    }

    #[test]
    fn test_decoded_playlist_reencodes_identically() {
        let bytes = encoded(&road_trip());
        let (playlist, _) = decode(&bytes, 0, bytes.len()).unwrap();
        assert_eq!(encoded(&playlist), bytes);
    }

    #[test]
    fn test_rename_keeps_items() {
        let bytes = encoded(&road_trip());
        let (mut playlist, _) = decode(&bytes, 0, bytes.len()).unwrap();
        playlist.name = "Favorites".to_string();
        let out = encoded(&playlist);
        let (again, _) = decode(&out, 0, out.len()).unwrap();
        assert_eq!(again.name, "Favorites");
        assert_eq!(again.track_ids(), vec![3, 1, 3]);
    }

    #[test]
    fn test_filtered_entries_are_omitted() {
        let mut out = Vec::new();
        encode(&road_trip(), |id| id != 3, &mut out).unwrap();
        let (playlist, _) = decode(&out, 0, out.len()).unwrap();
        assert_eq!(playlist.track_ids(), vec![1]);
    }

    #[test]
    fn test_master_and_podcast_flags() {
        let mut master = Playlist::new_master(1, "iPod");
        master.insert(5, None);
        let bytes = encoded(&master);
        let (decoded, _) = decode(&bytes, 0, bytes.len()).unwrap();
        assert!(decoded.is_master);

        let podcast = Playlist::new_podcast(2);
        let bytes = encoded(&podcast);
        let (decoded, _) = decode(&bytes, 0, bytes.len()).unwrap();
        assert!(decoded.is_podcast);
        assert_eq!(decoded.name, "Podcasts");
    }

    #[test]
    fn test_unexpected_child_is_corrupt() {
        let mut bytes = encoded(&road_trip());
        let junk = new_header(b"mhit", 0x10);
        let total = bytes.len() + junk.len();
        bytes.extend_from_slice(&junk);
        put_u32(&mut bytes, 0x08, total as u32);
        assert!(decode(&bytes, 0, bytes.len()).is_err());
    }
}

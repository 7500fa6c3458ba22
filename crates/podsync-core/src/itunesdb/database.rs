//! Top-level image layout: the `mhbd` header and its `mhsd` datasets.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use super::bytes::{
    field_u32, len_u32, new_header, put_u32, put_u64, read_record_header, read_sized_record,
};
use super::{mhit, mhyp};
use crate::error::{DatabaseError, Error, Result};
use crate::model::{Document, Playlist, Track, TrackStatus};

/// Oldest and newest database versions accepted.
pub const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 0x09..=0x80;

/// Version written into fresh databases.
const NEW_DATABASE_VERSION: u32 = 0x13;

const MHBD_MIN_HEADER_LEN: usize = 0x20;
const MHBD_NEW_HEADER_LEN: usize = 0x68;
const MHSD_MIN_HEADER_LEN: usize = 0x10;
const MHSD_NEW_HEADER_LEN: usize = 0x60;
const LIST_NEW_HEADER_LEN: usize = 0x5C;

const DATASET_TRACKS: u32 = 1;
const DATASET_PLAYLISTS: u32 = 2;
const DATASET_PODCASTS: u32 = 3;

/// One `mhsd` dataset.
#[derive(Debug, Clone)]
pub(crate) enum Section {
    /// Track list, rebuilt from the model.
    Tracks { header: Vec<u8>, list_header: Vec<u8> },
    /// Playlist list, rebuilt from the model.
    Playlists { header: Vec<u8>, list_header: Vec<u8> },
    /// Podcast playlist list. Written back verbatim until the playlists change.
    Podcasts {
        raw: Vec<u8>,
        header: Vec<u8>,
        list_header: Vec<u8>,
    },
    /// Any dataset this codec does not model.
    Opaque(Vec<u8>),
}

/// Decode a full iTunesDB image.
pub fn decode(buf: &[u8]) -> Result<Document> {
    let record = read_record_header(buf, 0, buf.len())?;
    if &record.tag != b"mhbd" {
        return Err(Error::corrupt(0, "missing mhbd database header"));
    }
    if record.header_len < MHBD_MIN_HEADER_LEN {
        return Err(Error::corrupt(0, "mhbd header too short"));
    }
    if record.len_or_count != buf.len() {
        return Err(Error::corrupt(
            0,
            format!(
                "header declares {} bytes but image has {}",
                record.len_or_count,
                buf.len()
            ),
        ));
    }
    let header = buf[..record.header_len].to_vec();
    let version = field_u32(&header, 0x10);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(DatabaseError::UnsupportedVersion { version }.into());
    }
    let dataset_count = field_u32(&header, 0x14) as usize;

    let mut sections = Vec::with_capacity(dataset_count);
    let mut tracks: Option<Vec<Track>> = None;
    let mut playlists: Option<Vec<Playlist>> = None;
    let mut have_podcasts = false;
    let mut offset = record.header_len;

    for _ in 0..dataset_count {
        let mhsd = read_sized_record(buf, offset, buf.len(), b"mhsd")?;
        if mhsd.header_len < MHSD_MIN_HEADER_LEN {
            return Err(Error::corrupt(offset, "mhsd header too short"));
        }
        let end = offset + mhsd.len_or_count;
        let mhsd_header = buf[offset..offset + mhsd.header_len].to_vec();
        let list_at = offset + mhsd.header_len;

        let section = match field_u32(&mhsd_header, 0x0C) {
            DATASET_TRACKS if tracks.is_none() => {
                let (list_header, decoded) = decode_list(buf, list_at, end, b"mhlt", mhit::decode)?;
                tracks = Some(decoded);
                Section::Tracks {
                    header: mhsd_header,
                    list_header,
                }
            }
            DATASET_PLAYLISTS if playlists.is_none() => {
                let (list_header, decoded) = decode_list(buf, list_at, end, b"mhlp", mhyp::decode)?;
                playlists = Some(decoded);
                Section::Playlists {
                    header: mhsd_header,
                    list_header,
                }
            }
            DATASET_PODCASTS if !have_podcasts => {
                // Validated structurally, but only ever re-emitted or regenerated.
                let (list_header, _) = decode_list(buf, list_at, end, b"mhlp", mhyp::decode)?;
                have_podcasts = true;
                Section::Podcasts {
                    raw: buf[offset..end].to_vec(),
                    header: mhsd_header,
                    list_header,
                }
            }
            other => {
                debug!("Keeping dataset type {} at {:#x} opaque", other, offset);
                Section::Opaque(buf[offset..end].to_vec())
            }
        };
        sections.push(section);
        offset = end;
    }
    if offset != buf.len() {
        return Err(Error::corrupt(
            offset,
            format!("{} unexpected byte(s) after the last dataset", buf.len() - offset),
        ));
    }

    let tracks = tracks.ok_or_else(|| Error::corrupt(0, "image has no track dataset"))?;
    let playlists = playlists.ok_or_else(|| Error::corrupt(0, "image has no playlist dataset"))?;

    let mut seen = HashSet::with_capacity(tracks.len());
    if let Some(dup) = tracks.iter().find(|t| !seen.insert(t.id)) {
        return Err(Error::corrupt(0, format!("track id {} appears twice", dup.id)));
    }
    let masters = playlists.iter().filter(|p| p.is_master).count();
    if masters != 1 {
        return Err(Error::corrupt(
            0,
            format!("expected exactly one master playlist, found {masters}"),
        ));
    }
    if !playlists[0].is_master {
        return Err(Error::corrupt(0, "master playlist is not the first playlist"));
    }

    debug!(
        "Decoded iTunesDB v{:#x}: {} tracks, {} playlists",
        version,
        tracks.len(),
        playlists.len()
    );
    Ok(Document::from_parts(header, sections, tracks, playlists))
}

/// Decode an `mhlt`/`mhlp` list that must exactly fill `[at, end)`.
fn decode_list<T>(
    buf: &[u8],
    at: usize,
    end: usize,
    tag: &[u8; 4],
    decode_item: fn(&[u8], usize, usize) -> Result<(T, usize)>,
) -> Result<(Vec<u8>, Vec<T>)> {
    let list = read_record_header(buf, at, end)?;
    if &list.tag != tag {
        return Err(Error::corrupt(
            at,
            format!(
                "expected {} list, found {}",
                String::from_utf8_lossy(tag),
                list.tag_str()
            ),
        ));
    }
    let count = list.len_or_count;
    let mut items = Vec::with_capacity(count.min(65_536));
    let mut offset = at + list.header_len;
    for _ in 0..count {
        let (item, len) = decode_item(buf, offset, end)?;
        items.push(item);
        offset += len;
    }
    if offset != end {
        return Err(Error::corrupt(
            offset,
            format!("{} unexpected byte(s) after list", end - offset),
        ));
    }
    Ok((buf[at..at + list.header_len].to_vec(), items))
}

/// Encode a document into a full iTunesDB image.
///
/// Pending tracks are left out, along with every playlist entry that
/// references one.
pub fn encode(doc: &Document) -> Result<Vec<u8>> {
    let on_device: HashSet<u32> = doc
        .tracks()
        .filter(|t| t.status == TrackStatus::OnDevice)
        .map(|t| t.id)
        .collect();
    let keep = |id: u32| on_device.contains(&id);

    let mut out = doc.header.clone();
    for section in &doc.sections {
        match section {
            Section::Tracks {
                header,
                list_header,
            } => {
                let mut body = Vec::new();
                for track in doc.tracks_in_record_order().filter(|t| keep(t.id)) {
                    mhit::encode(track, &mut body)?;
                }
                write_dataset(&mut out, header, list_header, on_device.len(), &body)?;
            }
            Section::Playlists {
                header,
                list_header,
            } => {
                let body = encode_playlists(doc, keep)?;
                write_dataset(&mut out, header, list_header, doc.playlists.len(), &body)?;
            }
            Section::Podcasts {
                raw,
                header,
                list_header,
            } => {
                if doc.playlists_changed {
                    let body = encode_playlists(doc, keep)?;
                    write_dataset(&mut out, header, list_header, doc.playlists.len(), &body)?;
                } else {
                    out.extend_from_slice(raw);
                }
            }
            Section::Opaque(raw) => out.extend_from_slice(raw),
        }
    }

    let total = len_u32(out.len(), 0)?;
    put_u32(&mut out, 0x08, total);
    put_u32(&mut out, 0x14, len_u32(doc.sections.len(), 0)?);
    Ok(out)
}

fn encode_playlists(doc: &Document, keep: impl Fn(u32) -> bool + Copy) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    for playlist in &doc.playlists {
        mhyp::encode(playlist, keep, &mut body)?;
    }
    Ok(body)
}

fn write_dataset(
    out: &mut Vec<u8>,
    header: &[u8],
    list_header: &[u8],
    count: usize,
    body: &[u8],
) -> Result<()> {
    let start = out.len();
    let mut header = header.to_vec();
    let mut list_header = list_header.to_vec();
    put_u32(&mut list_header, 0x08, len_u32(count, start)?);
    let total = len_u32(header.len() + list_header.len() + body.len(), start)?;
    put_u32(&mut header, 0x08, total);
    out.extend_from_slice(&header);
    out.extend_from_slice(&list_header);
    out.extend_from_slice(body);
    Ok(())
}

fn dataset_header(kind: u32) -> Vec<u8> {
    let mut header = new_header(b"mhsd", MHSD_NEW_HEADER_LEN);
    put_u32(&mut header, 0x0C, kind);
    header
}

fn fresh_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x0050_4f44_5359_4e43)
}

/// A fresh, empty database with a master playlist named `name` and an empty
/// podcast playlist.
pub fn new_document(name: &str) -> Document {
    let database_id = fresh_id();
    let mut header = new_header(b"mhbd", MHBD_NEW_HEADER_LEN);
    put_u32(&mut header, 0x0C, 1);
    put_u32(&mut header, 0x10, NEW_DATABASE_VERSION);
    put_u32(&mut header, 0x14, 3);
    put_u64(&mut header, 0x18, database_id);

    let sections = vec![
        Section::Tracks {
            header: dataset_header(DATASET_TRACKS),
            list_header: new_header(b"mhlt", LIST_NEW_HEADER_LEN),
        },
        Section::Playlists {
            header: dataset_header(DATASET_PLAYLISTS),
            list_header: new_header(b"mhlp", LIST_NEW_HEADER_LEN),
        },
        Section::Podcasts {
            raw: Vec::new(),
            header: dataset_header(DATASET_PODCASTS),
            list_header: new_header(b"mhlp", LIST_NEW_HEADER_LEN),
        },
    ];

    let master_id = database_id.wrapping_add(1);
    let playlists = vec![
        Playlist::new_master(master_id, name),
        Playlist::new_podcast(master_id.wrapping_add(1)),
    ];

    let mut doc = Document::from_parts(header, sections, Vec::new(), playlists);
    doc.mark_changed();
    doc
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn populated() -> Document {
        let mut doc = new_document("iPod");
        for n in 1..=3u32 {
            let id = doc.allocate_track_id();
            let mut track = Track::empty(id);
            track.title = Some(format!("Track {n}"));
            track.location = Some(format!(":iPod_Control:Music:F0{n}:T{n}.mp3"));
            doc.insert_track(track).unwrap();
        }
        let list = doc.create_playlist("Road Trip").unwrap().id;
        doc.add_track_to_playlist(list, 3, None).unwrap();
        doc.add_track_to_playlist(list, 1, None).unwrap();
        doc
    }

    #[test]
    fn test_new_document_encodes_and_decodes() {
        let bytes = encode(&new_document("My iPod")).unwrap();
        assert_eq!(field_u32(&bytes, 0x08) as usize, bytes.len());
        let doc = decode(&bytes).unwrap();
        assert_eq!(doc.master_playlist().name, "My iPod");
        assert!(doc.podcast_playlist().is_some());
        assert_eq!(doc.version(), NEW_DATABASE_VERSION);
        assert!(!doc.is_dirty());
    }

    #[test]
    fn test_decode_then_encode_is_identical() {
        let bytes = encode(&populated()).unwrap();
        let doc = decode(&bytes).unwrap();
        assert_eq!(encode(&doc).unwrap(), bytes);
    }

    #[test]
    fn test_pending_tracks_are_not_written() {
        let mut doc = populated();
        let id = doc.allocate_track_id();
        let mut pending = Track::empty(id);
        pending.status = TrackStatus::Pending;
        doc.insert_track(pending).unwrap();
        let list = doc.playlists()[2].id;
        doc.add_track_to_playlist(list, id, Some(0)).unwrap();

        let decoded = decode(&encode(&doc).unwrap()).unwrap();
        assert_eq!(decoded.track_count(), 3);
        assert_eq!(decoded.master_playlist().track_ids(), vec![1, 2, 3]);
        assert_eq!(decoded.playlist(list).unwrap().track_ids(), vec![3, 1]);
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = encode(&populated()).unwrap();
        put_u32(&mut bytes, 0x10, 0x01);
        assert!(matches!(
            decode(&bytes),
            Err(Error::Database(DatabaseError::UnsupportedVersion { version: 1 }))
        ));
    }

    #[test]
    fn test_length_mismatch_is_corrupt() {
        let mut bytes = encode(&populated()).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode(&bytes),
            Err(Error::Database(DatabaseError::CorruptImage { .. }))
        ));
    }

    #[test]
    fn test_truncated_image_is_corrupt() {
        let bytes = encode(&populated()).unwrap();
        let mut cut = bytes[..bytes.len() - 10].to_vec();
        let len = cut.len() as u32;
        put_u32(&mut cut, 0x08, len);
        assert!(decode(&cut).is_err());
    }

    #[test]
    fn test_not_an_itunesdb() {
        assert!(decode(b"this is not a database at all").is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_podcast_dataset_regenerated_after_change() {
        let bytes = encode(&populated()).unwrap();
        let mut doc = decode(&bytes).unwrap();
        doc.rename_playlist(doc.playlists()[2].id, "Favorites").unwrap();
        let out = encode(&doc).unwrap();
        let again = decode(&out).unwrap();
        let Section::Podcasts { raw, .. } = &again.sections[2] else {
            unreachable!("third dataset is the podcast list");
        };
        let needle: Vec<u8> = "Favorites".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert!(raw.windows(needle.len()).any(|w| w == needle.as_slice()));
    }
}

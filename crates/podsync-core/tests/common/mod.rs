//! Shared fixtures: a hand-assembled iTunesDB image and fake device trees.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn record(tag: &[u8; 4], header_len: usize) -> Vec<u8> {
    let mut header = vec![0u8; header_len];
    header[..4].copy_from_slice(tag);
    put_u32(&mut header, 4, header_len as u32);
    header
}

/// A UTF-16 string `mhod`.
pub fn string_mhod(kind: u32, value: &str) -> Vec<u8> {
    let data: Vec<u8> = value.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let mut raw = record(b"mhod", 0x18);
    raw.resize(0x28, 0);
    put_u32(&mut raw, 0x08, (0x28 + data.len()) as u32);
    put_u32(&mut raw, 0x0C, kind);
    put_u32(&mut raw, 0x18, 1);
    put_u32(&mut raw, 0x1C, data.len() as u32);
    raw.extend_from_slice(&data);
    raw
}

/// An `mhod` of a type nobody models, with an arbitrary body.
pub fn unknown_mhod(kind: u32, body: &[u8]) -> Vec<u8> {
    let mut raw = record(b"mhod", 0x18);
    put_u32(&mut raw, 0x0C, kind);
    raw.extend_from_slice(body);
    let total = raw.len() as u32;
    put_u32(&mut raw, 0x08, total);
    raw
}

/// A track to put in the image.
#[derive(Debug, Clone)]
pub struct TrackSpec {
    pub id: u32,
    pub title: String,
    pub artist: Option<String>,
    pub location: String,
    pub size: u32,
    pub rating_raw: u8,
    pub extra_mhods: Vec<Vec<u8>>,
}

impl TrackSpec {
    pub fn new(id: u32, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            artist: None,
            location: format!(":iPod_Control:Music:F{:02}:T{id:05}.mp3", id % 20),
            size: 0,
            rating_raw: 0,
            extra_mhods: Vec::new(),
        }
    }

    pub fn artist(mut self, artist: &str) -> Self {
        self.artist = Some(artist.to_string());
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn rating_raw(mut self, raw: u8) -> Self {
        self.rating_raw = raw;
        self
    }

    pub fn with_mhod(mut self, raw: Vec<u8>) -> Self {
        self.extra_mhods.push(raw);
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut children = vec![
            string_mhod(1, &self.title),
            string_mhod(2, &self.location),
        ];
        if let Some(artist) = &self.artist {
            children.push(string_mhod(4, artist));
        }
        children.extend(self.extra_mhods.iter().cloned());

        let mut header = record(b"mhit", 0x184);
        put_u32(&mut header, 0x0C, children.len() as u32);
        put_u32(&mut header, 0x10, self.id);
        put_u32(&mut header, 0x14, 1);
        header[0x1F] = self.rating_raw;
        put_u32(&mut header, 0x24, self.size);
        put_u32(&mut header, 0x3C, 44_100 << 16);
        // Unmodelled fields.
        put_u32(&mut header, 0x90, 0xCAFE_BABE);
        put_u32(&mut header, 0x120, 0x0102_0304);
        put_u64(&mut header, 0x70, 0x1000 + u64::from(self.id));

        let body: Vec<u8> = children.concat();
        let total = (header.len() + body.len()) as u32;
        put_u32(&mut header, 0x08, total);
        header.extend_from_slice(&body);
        header
    }
}

/// A playlist to put in the image.
#[derive(Debug, Clone)]
pub struct PlaylistSpec {
    pub id: u64,
    pub name: String,
    pub master: bool,
    pub podcast: bool,
    pub track_ids: Vec<u32>,
    pub extra_mhods: Vec<Vec<u8>>,
}

impl PlaylistSpec {
    pub fn new(id: u64, name: &str, track_ids: &[u32]) -> Self {
        Self {
            id,
            name: name.to_string(),
            master: false,
            podcast: false,
            track_ids: track_ids.to_vec(),
            extra_mhods: Vec::new(),
        }
    }

    pub fn master(mut self) -> Self {
        self.master = true;
        self
    }

    pub fn podcast(mut self) -> Self {
        self.podcast = true;
        self
    }

    pub fn with_mhod(mut self, raw: Vec<u8>) -> Self {
        self.extra_mhods.push(raw);
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut objects = vec![string_mhod(1, &self.name)];
        objects.extend(self.extra_mhods.iter().cloned());

        let mut items = Vec::new();
        for (position, id) in self.track_ids.iter().enumerate() {
            let mut item = record(b"mhip", 0x4C);
            put_u32(&mut item, 0x08, 0x4C);
            put_u32(&mut item, 0x14, position as u32);
            put_u32(&mut item, 0x18, *id);
            items.extend_from_slice(&item);
        }

        let mut header = record(b"mhyp", 0x6C);
        put_u32(&mut header, 0x0C, objects.len() as u32);
        put_u32(&mut header, 0x10, self.track_ids.len() as u32);
        header[0x14] = u8::from(self.master);
        put_u64(&mut header, 0x1C, self.id);
        header[0x2A] = u8::from(self.podcast);
        put_u32(&mut header, 0x50, 0xFEED_F00D);

        let body = [objects.concat(), items].concat();
        let total = (header.len() + body.len()) as u32;
        put_u32(&mut header, 0x08, total);
        header.extend_from_slice(&body);
        header
    }
}

fn dataset(kind: u32, list_tag: &[u8; 4], count: usize, body: &[u8]) -> Vec<u8> {
    let mut list = record(list_tag, 0x5C);
    put_u32(&mut list, 0x08, count as u32);
    let mut header = record(b"mhsd", 0x60);
    put_u32(&mut header, 0x0C, kind);
    let total = (header.len() + list.len() + body.len()) as u32;
    put_u32(&mut header, 0x08, total);
    [header, list, body.to_vec()].concat()
}

/// Builds a complete image the way a desktop application would have left it.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    pub tracks: Vec<TrackSpec>,
    pub playlists: Vec<PlaylistSpec>,
    pub podcasts: Vec<PlaylistSpec>,
    pub with_album_dataset: bool,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(mut self, track: TrackSpec) -> Self {
        self.tracks.push(track);
        self
    }

    /// A master playlist named `name` holding every track added so far.
    pub fn master(mut self, name: &str) -> Self {
        let ids: Vec<u32> = self.tracks.iter().map(|t| t.id).collect();
        self.playlists
            .insert(0, PlaylistSpec::new(0xAAAA, name, &ids).master());
        self
    }

    pub fn playlist(mut self, playlist: PlaylistSpec) -> Self {
        self.playlists.push(playlist);
        self
    }

    pub fn podcast_dataset(mut self, playlists: Vec<PlaylistSpec>) -> Self {
        self.podcasts = playlists;
        self
    }

    /// Adds a type 4 dataset this library does not model.
    pub fn album_dataset(mut self) -> Self {
        self.with_album_dataset = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let tracks: Vec<u8> = self.tracks.iter().flat_map(TrackSpec::encode).collect();
        let playlists: Vec<u8> = self.playlists.iter().flat_map(PlaylistSpec::encode).collect();
        let mut datasets = vec![
            dataset(1, b"mhlt", self.tracks.len(), &tracks),
            dataset(2, b"mhlp", self.playlists.len(), &playlists),
        ];
        if !self.podcasts.is_empty() {
            let podcasts: Vec<u8> = self.podcasts.iter().flat_map(PlaylistSpec::encode).collect();
            datasets.push(dataset(3, b"mhlp", self.podcasts.len(), &podcasts));
        }
        if self.with_album_dataset {
            datasets.push(dataset(4, b"mhla", 0, &[]));
        }

        let mut header = record(b"mhbd", 0x68);
        put_u32(&mut header, 0x0C, 1);
        put_u32(&mut header, 0x10, 0x19);
        put_u32(&mut header, 0x14, datasets.len() as u32);
        put_u64(&mut header, 0x18, 0x0123_4567_89AB_CDEF);
        put_u32(&mut header, 0x40, 0x5A5A_5A5A);

        let body = datasets.concat();
        let total = (header.len() + body.len()) as u32;
        put_u32(&mut header, 0x08, total);
        header.extend_from_slice(&body);
        header
    }
}

/// The image used by most scenarios: three tracks, a master, one user
/// playlist carrying an unknown object, a podcast dataset and an album dataset.
pub fn sample_image() -> Vec<u8> {
    ImageBuilder::new()
        .track(TrackSpec::new(1, "One").artist("Band").size(3).rating_raw(60))
        .track(TrackSpec::new(2, "Two").artist("Band").size(3).with_mhod(unknown_mhod(100, &[9; 12])))
        .track(TrackSpec::new(3, "Three").size(3))
        .master("Sample iPod")
        .playlist(
            PlaylistSpec::new(0xBBBB, "Road Trip", &[2, 1]).with_mhod(unknown_mhod(100, &[7; 20])),
        )
        .podcast_dataset(vec![PlaylistSpec::new(0xAAAA, "Sample iPod", &[1, 2, 3]).master()])
        .album_dataset()
        .build()
}

/// A fake device with `image` as its database and a backing file for every
/// track location found in `builder`.
pub struct Device {
    pub dir: TempDir,
}

impl Device {
    pub fn empty() -> Self {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir_all(dir.path().join("iPod_Control").join("iTunes")).unwrap();
        fs::create_dir_all(dir.path().join("iPod_Control").join("Device")).unwrap();
        Self { dir }
    }

    pub fn with_image(builder: &ImageBuilder) -> Self {
        let device = Self::empty();
        fs::write(device.database_path(), builder.build()).unwrap();
        for track in &builder.tracks {
            let path = device.location_path(&track.location);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            let content: Vec<u8> = (0..track.size)
                .map(|i| (track.id as u8).wrapping_add(i as u8))
                .collect();
            fs::write(&path, content).unwrap();
        }
        device
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn database_path(&self) -> PathBuf {
        self.path().join("iPod_Control").join("iTunes").join("iTunesDB")
    }

    pub fn play_counts_path(&self) -> PathBuf {
        self.path().join("iPod_Control").join("iTunes").join("Play Counts")
    }

    pub fn location_path(&self, location: &str) -> PathBuf {
        let mut path = self.path().to_path_buf();
        for part in location.split(':').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    pub fn write_sysinfo(&self, text: &str) {
        fs::write(self.path().join("iPod_Control").join("Device").join("SysInfo"), text).unwrap();
    }
}

/// A `Play Counts` file: (plays, last played unix seconds, raw rating).
pub fn play_counts(entries: &[(u32, Option<i64>, u32)]) -> Vec<u8> {
    let mut out = record(b"mhdp", 0x60);
    put_u32(&mut out, 0x08, 0x10);
    put_u32(&mut out, 0x0C, entries.len() as u32);
    for (plays, last_played, rating) in entries {
        let mut entry = vec![0u8; 0x10];
        put_u32(&mut entry, 0x00, *plays);
        let mac = last_played.map_or(0, |t| (t + MAC_EPOCH_OFFSET) as u32);
        put_u32(&mut entry, 0x04, mac);
        put_u32(&mut entry, 0x0C, *rating);
        out.extend_from_slice(&entry);
    }
    out
}

/// A source file with `len` bytes generated from `seed`.
pub fn source_file(dir: &Path, name: &str, len: usize, seed: u8) -> PathBuf {
    let content: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

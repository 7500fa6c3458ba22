//! Device identification and volume space.
//!
//! Identity comes from two firmware files under `iPod_Control/Device/`:
//!
//! - `SysInfo`: `Key: value` lines (`ModelNumStr`, `pszSerialNumber`, ...).
//! - `SysInfoExtended`: an XML property list with richer keys.
//!
//! Both are optional. Reading never fails: missing or garbled files yield an
//! unknown device, which is treated as permissive everywhere it matters.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sysinfo::Disks;
use tracing::{debug, warn};

use crate::layout::DeviceLayout;

/// Model name reported for unrecognized devices.
pub const UNKNOWN_MODEL: &str = "iPod";

/// Generation reported for unrecognized devices.
pub const UNKNOWN_GENERATION: &str = "Unknown generation";

// =============================================================================
// Model table
// =============================================================================

/// One row of the model table.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ModelEntry {
    /// First five characters of the model number, leading letter as `x`.
    key: &'static str,
    name: &'static str,
    generation: &'static str,
    capacity_gb: f64,
    video: bool,
}

const fn entry(
    key: &'static str,
    name: &'static str,
    generation: &'static str,
    capacity_gb: f64,
    video: bool,
) -> ModelEntry {
    ModelEntry {
        key,
        name,
        generation,
        capacity_gb,
        video,
    }
}

static MODEL_TABLE: &[ModelEntry] = &[
    entry("x8513", "iPod", "1st generation", 5.0, false),
    entry("x8541", "iPod", "1st generation", 5.0, false),
    entry("x8697", "iPod", "1st generation", 5.0, false),
    entry("x8709", "iPod", "1st generation", 10.0, false),
    entry("x8737", "iPod", "2nd generation", 10.0, false),
    entry("x8740", "iPod", "2nd generation", 10.0, false),
    entry("x8738", "iPod", "2nd generation", 20.0, false),
    entry("x8741", "iPod", "2nd generation", 20.0, false),
    entry("x8976", "iPod", "3rd generation", 10.0, false),
    entry("x8946", "iPod", "3rd generation", 15.0, false),
    entry("x9460", "iPod", "3rd generation", 15.0, false),
    entry("x9244", "iPod", "3rd generation", 20.0, false),
    entry("x8948", "iPod", "3rd generation", 30.0, false),
    entry("x9245", "iPod", "3rd generation", 40.0, false),
    entry("x9282", "iPod", "4th generation", 20.0, false),
    entry("x9787", "iPod U2", "4th generation", 25.0, false),
    entry("x9268", "iPod", "4th generation", 40.0, false),
    entry("xA079", "iPod Photo", "4th generation", 20.0, false),
    entry("x9829", "iPod Photo", "4th generation", 30.0, false),
    entry("x9585", "iPod Photo", "4th generation", 40.0, false),
    entry("x9830", "iPod Photo", "4th generation", 60.0, false),
    entry("x9160", "iPod Mini", "1st generation", 4.0, false),
    entry("x9800", "iPod Mini", "2nd generation", 4.0, false),
    entry("x9802", "iPod Mini", "2nd generation", 6.0, false),
    entry("x9724", "iPod Shuffle", "1st generation", 0.5, false),
    entry("x9725", "iPod Shuffle", "1st generation", 1.0, false),
    entry("xA350", "iPod Nano", "1st generation", 1.0, false),
    entry("xA004", "iPod Nano", "1st generation", 2.0, false),
    entry("xA005", "iPod Nano", "1st generation", 4.0, false),
    entry("xA477", "iPod Nano", "2nd generation", 2.0, false),
    entry("xA426", "iPod Nano", "2nd generation", 4.0, false),
    entry("xA497", "iPod Nano", "2nd generation", 8.0, false),
    entry("xA978", "iPod Nano", "3rd generation", 4.0, true),
    entry("xA980", "iPod Nano", "3rd generation", 8.0, true),
    entry("xA002", "iPod Video", "5th generation", 30.0, true),
    entry("xA146", "iPod Video", "5th generation", 30.0, true),
    entry("xA003", "iPod Video", "5th generation", 60.0, true),
    entry("xA147", "iPod Video", "5th generation", 60.0, true),
    entry("xA444", "iPod Video", "5.5th generation", 30.0, true),
    entry("xA446", "iPod Video", "5.5th generation", 80.0, true),
    entry("xB029", "iPod Classic", "6th generation", 80.0, true),
    entry("xB147", "iPod Classic", "6th generation", 80.0, true),
    entry("xB145", "iPod Classic", "6th generation", 160.0, true),
];

/// Table key for a model number such as `MA147LL/A` or `A147`.
fn model_key(model_number: &str) -> Option<String> {
    let trimmed = model_number.trim();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    let key: String = if first.is_ascii_alphabetic() && trimmed.len() >= 5 {
        std::iter::once('x').chain(chars.take(4)).collect()
    } else {
        // Some SysInfo files drop the leading region letter.
        std::iter::once('x').chain(trimmed.chars().take(4)).collect()
    };
    (key.len() == 5).then(|| key.to_ascii_uppercase().replacen('X', "x", 1))
}

fn lookup_model(model_number: &str) -> Option<&'static ModelEntry> {
    let key = model_key(model_number)?;
    MODEL_TABLE.iter().find(|e| e.key == key)
}

// =============================================================================
// Device info
// =============================================================================

/// Identity of a device as read from its firmware files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    /// Raw model number, e.g. `MA147`.
    pub model_number: Option<String>,
    /// Product name, e.g. `iPod Video`.
    pub model_name: String,
    /// Generation, e.g. `5th generation`.
    pub generation: String,
    /// Nominal capacity in GB (0 when unknown).
    pub capacity_gb: f64,
    /// Serial number.
    pub serial_number: Option<String>,
    /// Firmware version string.
    pub firmware_version: Option<String>,
    /// FireWire GUID, used by later firmware to sign the database.
    pub firewire_guid: Option<String>,
    /// Whether the model plays video.
    pub supports_video: bool,
}

impl DeviceInfo {
    /// Result for a device that could not be identified.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            model_number: None,
            model_name: UNKNOWN_MODEL.to_string(),
            generation: UNKNOWN_GENERATION.to_string(),
            capacity_gb: 0.0,
            serial_number: None,
            firmware_version: None,
            firewire_guid: None,
            supports_video: false,
        }
    }

    /// Whether the model number matched the table.
    pub fn is_known(&self) -> bool {
        self.generation != UNKNOWN_GENERATION
    }

    /// Whether a video track may be added. Unknown devices are not refused.
    pub fn accepts_video(&self) -> bool {
        self.supports_video || !self.is_known()
    }

    fn apply_model(&mut self, model_number: &str) {
        self.model_number = Some(model_number.trim().to_string());
        match lookup_model(model_number) {
            Some(model) => {
                self.model_name = model.name.to_string();
                self.generation = model.generation.to_string();
                self.capacity_gb = model.capacity_gb;
                self.supports_video = model.video;
            }
            None => debug!("Model number {} not in table", model_number.trim()),
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.model_name, self.generation)?;
        if self.capacity_gb > 0.0 {
            write!(f, " {}GB", self.capacity_gb)?;
        }
        Ok(())
    }
}

/// Read device identity from the files under `mountpoint`.
///
/// Never fails; anything missing or unparseable degrades to
/// [`DeviceInfo::unknown`].
pub fn read_device_info(mountpoint: &Path) -> DeviceInfo {
    let layout = DeviceLayout::new(mountpoint);
    let mut info = DeviceInfo::unknown();

    let mut keys = read_optional(&layout.sysinfo_path())
        .map(|text| parse_sysinfo(&text))
        .unwrap_or_default();
    if let Some(text) = read_optional(&layout.sysinfo_extended_path()) {
        // Extended values win; they come from newer firmware.
        keys.extend(parse_sysinfo_extended(&text));
    }

    if let Some(model) = first_of(&keys, &["ModelNumStr", "ModelNumber"]) {
        info.apply_model(model);
    }
    info.serial_number = first_of(&keys, &["SerialNumber", "pszSerialNumber"]).map(String::from);
    info.firmware_version =
        first_of(&keys, &["VisibleBuildID", "visibleBuildID", "BuildID", "buildID"]).map(String::from);
    info.firewire_guid = first_of(&keys, &["FireWireGUID", "FirewireGuid"]).map(String::from);

    debug!("Device info for {}: {}", mountpoint.display(), info);
    info
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

fn first_of<'a>(keys: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| keys.get(*name))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Parse `Key: value` lines. Later duplicates win.
pub fn parse_sysinfo(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

static PLIST_ENTRY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"<key>([^<]+)</key>\s*<(string|integer|real)>([^<]*)</(?:string|integer|real)>").ok()
});

/// Parse the scalar top-level entries of a `SysInfoExtended` plist.
///
/// Nested dictionaries and arrays are flattened; keys inside them may shadow
/// top-level keys of the same name, which the firmware does not produce for
/// the keys read here.
pub fn parse_sysinfo_extended(text: &str) -> HashMap<String, String> {
    let Some(re) = PLIST_ENTRY.as_ref() else {
        return HashMap::new();
    };
    re.captures_iter(text)
        .map(|c| (c[1].trim().to_string(), c[3].trim().to_string()))
        .collect()
}

// =============================================================================
// Storage
// =============================================================================

/// Space on the device volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageInfo {
    /// Volume size in bytes.
    pub total_bytes: u64,
    /// Free bytes.
    pub available_bytes: u64,
    /// Why the figures are zero, if they are.
    pub error: Option<String>,
}

impl StorageInfo {
    /// Returns the used space in bytes.
    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    /// Returns the usage percentage (0.0 - 100.0).
    #[must_use]
    pub fn usage_percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes() as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Reports free space for a path.
#[cfg_attr(test, mockall::automock)]
pub trait SpaceProbe: Send + Sync {
    /// Space on the volume holding `path`.
    fn storage_info(&self, path: &Path) -> StorageInfo;
}

/// [`SpaceProbe`] backed by the `sysinfo` disk list.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpaceProbe;

impl SpaceProbe for SystemSpaceProbe {
    fn storage_info(&self, path: &Path) -> StorageInfo {
        storage_info(path)
    }
}

/// Space on the volume holding `mountpoint`.
///
/// Picks the disk with the longest mount point that contains the path.
/// Degrades to zeros with an error message when no disk matches.
pub fn storage_info(mountpoint: &Path) -> StorageInfo {
    let target = fs::canonicalize(mountpoint).unwrap_or_else(|_| mountpoint.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let best = disks
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    match best {
        Some(disk) => StorageInfo {
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
            error: None,
        },
        None => {
            warn!("No volume found for {}", mountpoint.display());
            StorageInfo {
                error: Some(format!("No volume found for {}", mountpoint.display())),
                ..StorageInfo::default()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn device_dir(dir: &TempDir) -> std::path::PathBuf {
        let layout = DeviceLayout::new(dir.path());
        fs::create_dir_all(layout.device_dir()).unwrap();
        layout.device_dir()
    }

    #[test]
    fn test_model_key_normalizes_leading_letter() {
        assert_eq!(model_key("MA147LL/A").as_deref(), Some("xA147"));
        assert_eq!(model_key("PA147").as_deref(), Some("xA147"));
        assert_eq!(model_key("A147").as_deref(), Some("xA147"));
        assert_eq!(model_key("M8541").as_deref(), Some("x8541"));
        assert_eq!(model_key("ab").as_deref(), None);
    }

    #[test]
    fn test_lookup_model() {
        let model = lookup_model("MA147").unwrap();
        assert_eq!(model.name, "iPod Video");
        assert!(model.video);
        assert!(lookup_model("MZ999").is_none());
    }

    #[test]
    fn test_parse_sysinfo() {
        let keys = parse_sysinfo("ModelNumStr: MA147\npszSerialNumber: 8K1234\nbogus line\n");
        assert_eq!(keys.get("ModelNumStr").map(String::as_str), Some("MA147"));
        assert_eq!(keys.get("pszSerialNumber").map(String::as_str), Some("8K1234"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_parse_sysinfo_extended() {
        let plist = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
    <key>SerialNumber</key>
    <string>YM1234ABC</string>
    <key>FireWireGUID</key><string>000A2700138F2B1E</string>
    <key>FamilyID</key><integer>6</integer>
    <key>SupportsSparseArtwork</key><true/>
</dict></plist>"#;
        let keys = parse_sysinfo_extended(plist);
        assert_eq!(keys.get("SerialNumber").map(String::as_str), Some("YM1234ABC"));
        assert_eq!(
            keys.get("FireWireGUID").map(String::as_str),
            Some("000A2700138F2B1E")
        );
        assert_eq!(keys.get("FamilyID").map(String::as_str), Some("6"));
    }

    #[test]
    fn test_read_device_info_missing_files() {
        let dir = TempDir::new().expect("temp dir");
        let info = read_device_info(dir.path());
        assert_eq!(info, DeviceInfo::unknown());
        assert!(!info.is_known());
        assert!(info.accepts_video());
    }

    #[test]
    fn test_read_device_info_from_sysinfo() {
        let dir = TempDir::new().expect("temp dir");
        let device = device_dir(&dir);
        fs::write(
            device.join("SysInfo"),
            "ModelNumStr: M9282\npszSerialNumber: JQ4123\nvisibleBuildID: 0x02308000\n",
        )
        .unwrap();

        let info = read_device_info(dir.path());

        assert_eq!(info.model_name, "iPod");
        assert_eq!(info.generation, "4th generation");
        assert_eq!(info.serial_number.as_deref(), Some("JQ4123"));
        assert_eq!(info.firmware_version.as_deref(), Some("0x02308000"));
        assert!(!info.supports_video);
        assert!(!info.accepts_video());
    }

    #[test]
    fn test_extended_values_override_sysinfo() {
        let dir = TempDir::new().expect("temp dir");
        let device = device_dir(&dir);
        fs::write(device.join("SysInfo"), "pszSerialNumber: OLD\n").unwrap();
        fs::write(
            device.join("SysInfoExtended"),
            "<dict><key>SerialNumber</key><string>NEW</string>\
             <key>ModelNumStr</key><string>MB029</string></dict>",
        )
        .unwrap();

        let info = read_device_info(dir.path());

        assert_eq!(info.serial_number.as_deref(), Some("NEW"));
        assert_eq!(info.model_name, "iPod Classic");
        assert!(info.supports_video);
    }

    #[test]
    fn test_unmatched_model_is_generic() {
        let dir = TempDir::new().expect("temp dir");
        let device = device_dir(&dir);
        fs::write(device.join("SysInfo"), "ModelNumStr: MZ999\n").unwrap();

        let info = read_device_info(dir.path());

        assert_eq!(info.model_number.as_deref(), Some("MZ999"));
        assert_eq!(info.model_name, UNKNOWN_MODEL);
        assert_eq!(info.generation, UNKNOWN_GENERATION);
    }

    #[test]
    fn test_garbage_files_do_not_fail() {
        let dir = TempDir::new().expect("temp dir");
        let device = device_dir(&dir);
        fs::write(device.join("SysInfo"), [0xFFu8, 0xFE, 0x00, 0x13]).unwrap();
        fs::write(device.join("SysInfoExtended"), "<plist><dict>").unwrap();

        assert_eq!(read_device_info(dir.path()), DeviceInfo::unknown());
    }

    #[test]
    fn test_storage_info_usage() {
        let info = StorageInfo {
            total_bytes: 1000,
            available_bytes: 250,
            error: None,
        };
        assert_eq!(info.used_bytes(), 750);
        assert!((info.usage_percentage() - 75.0).abs() < f64::EPSILON);
        assert!((StorageInfo::default().usage_percentage()).abs() < f64::EPSILON);
    }
}

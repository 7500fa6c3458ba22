//! Conversions between on-disk field encodings and model values.

/// Seconds between 1904-01-01 (Mac epoch) and 1970-01-01 (Unix epoch).
pub const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Convert an on-disk rating (0-100) to stars (0-5), rounding to nearest.
pub const fn rating_from_disk(raw: u8) -> u8 {
    let raw = if raw > 100 { 100 } else { raw };
    (raw + 10) / 20
}

/// Convert stars (0-5) to the on-disk rating. Values above 5 clamp to 5.
pub const fn rating_to_disk(stars: u8) -> u8 {
    let stars = if stars > 5 { 5 } else { stars };
    stars * 20
}

/// Convert a Mac-epoch timestamp to Unix seconds. 0 means "never".
pub const fn time_from_disk(raw: u32) -> Option<i64> {
    if raw == 0 {
        None
    } else {
        Some(raw as i64 - MAC_EPOCH_OFFSET)
    }
}

/// Convert Unix seconds to a Mac-epoch timestamp, saturating at the u32 range.
pub fn time_to_disk(unix: Option<i64>) -> u32 {
    match unix {
        None => 0,
        Some(secs) => {
            let mac = secs.saturating_add(MAC_EPOCH_OFFSET);
            u32::try_from(mac.max(1)).unwrap_or(u32::MAX)
        }
    }
}

/// Sample rate is stored as a 16.16 fixed-point value.
pub const fn sample_rate_from_disk(raw: u32) -> u32 {
    raw >> 16
}

/// `None` when `hz` does not fit the 16-bit integer part.
pub const fn sample_rate_to_disk(hz: u32) -> Option<u32> {
    if hz > 0xFFFF { None } else { Some(hz << 16) }
}

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_round_trip_stars() {
        for stars in 0..=5u8 {
            assert_eq!(rating_from_disk(rating_to_disk(stars)), stars);
        }
    }

    #[test]
    fn test_rating_from_disk_within_one_step() {
        for raw in 0..=100u8 {
            let back = rating_to_disk(rating_from_disk(raw));
            assert!(
                (i16::from(back) - i16::from(raw)).abs() <= 10,
                "raw {raw} came back as {back}"
            );
        }
    }

    #[test]
    fn test_rating_clamps() {
        assert_eq!(rating_from_disk(255), 5);
        assert_eq!(rating_to_disk(9), 100);
    }

    #[test]
    fn test_time_conversion() {
        assert_eq!(time_from_disk(0), None);
        let unix = 1_700_000_000;
        let raw = time_to_disk(Some(unix));
        assert_eq!(i64::from(raw), unix + MAC_EPOCH_OFFSET);
        assert_eq!(time_from_disk(raw), Some(unix));
        assert_eq!(time_to_disk(None), 0);
    }

    #[test]
    fn test_time_before_mac_epoch_is_not_zero() {
        assert_eq!(time_to_disk(Some(-MAC_EPOCH_OFFSET - 10)), 1);
    }

    #[test]
    fn test_sample_rate_fixed_point() {
        assert_eq!(sample_rate_to_disk(44_100), Some(44_100 << 16));
        assert_eq!(sample_rate_from_disk(44_100 << 16), 44_100);
    }

    #[test]
    fn test_sample_rate_too_large_is_not_encoded() {
        assert_eq!(sample_rate_to_disk(65_535), Some(65_535 << 16));
        assert_eq!(sample_rate_to_disk(96_000), None);
    }
}

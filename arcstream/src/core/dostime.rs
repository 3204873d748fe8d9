//! MS-DOS packed timestamps (ARJ, ZIP).
//!
//! Layout of the 32-bit value, date in the high half:
//! - bits 0-4: seconds / 2
//! - bits 5-10: minutes
//! - bits 11-15: hours
//! - bits 16-20: day
//! - bits 21-24: month
//! - bits 25-31: years since 1980
//!
//! The fields carry no zone; they are interpreted as UTC.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime(u32);

impl DosDateTime {
    pub fn from_raw(raw: u32) -> Self {
        DosDateTime(raw)
    }

    /// ZIP stores time and date as two separate little-endian u16 fields.
    pub fn from_parts(date: u16, time: u16) -> Self {
        DosDateTime(((date as u32) << 16) | time as u32)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn date(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn time(self) -> u16 {
        self.0 as u16
    }

    /// Seconds since the Unix epoch, `None` when month or day is zero or out
    /// of range.
    pub fn to_unix_seconds(self) -> Option<i64> {
        let time = self.time() as u32;
        let date = self.date() as u32;

        let seconds = (time & 0x1f) * 2;
        let minutes = (time >> 5) & 0x3f;
        let hours = (time >> 11) & 0x1f;
        let day = date & 0x1f;
        let month = (date >> 5) & 0x0f;
        let year = 1980 + (date >> 9) as i64;

        if !(1..=12).contains(&month) || day == 0 || hours > 23 || minutes > 59 || seconds > 59 {
            return None;
        }

        let days = days_from_civil(year, month, day);
        Some(days * 86_400 + (hours * 3600 + minutes * 60 + seconds) as i64)
    }

    pub fn to_system_time(self) -> Option<SystemTime> {
        self.to_unix_seconds().and_then(unix_to_system_time)
    }

    /// Pack a Unix timestamp; anything before 1980 clamps to 1980-01-01.
    pub fn from_unix_seconds(secs: i64) -> Self {
        let min = days_from_civil(1980, 1, 1) * 86_400;
        let secs = secs.max(min);
        let days = secs.div_euclid(86_400);
        let rem = secs.rem_euclid(86_400) as u32;
        let (year, month, day) = civil_from_days(days);
        let year = (year - 1980).min(127) as u32;

        let date = (year << 9) | (month << 5) | day;
        let time = ((rem / 3600) << 11) | (((rem % 3600) / 60) << 5) | ((rem % 60) / 2);
        DosDateTime::from_parts(date as u16, time as u16)
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let secs = match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => 0,
        };
        Self::from_unix_seconds(secs)
    }
}

/// Convert signed Unix seconds, `None` before the epoch overflows `SystemTime`.
pub fn unix_to_system_time(secs: i64) -> Option<SystemTime> {
    if secs >= 0 {
        UNIX_EPOCH.checked_add(Duration::from_secs(secs as u64))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(secs.unsigned_abs()))
    }
}

fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { y + 1 } else { y }, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_epoch() {
        // 1980-01-01 00:00:00
        let t = DosDateTime::from_parts((1 << 5) | 1, 0);
        assert_eq!(t.to_unix_seconds(), Some(315_532_800));
    }

    #[test]
    fn known_timestamp() {
        // 2021-06-15 13:45:30
        let date = ((2021 - 1980) << 9) | (6 << 5) | 15;
        let time = (13 << 11) | (45 << 5) | (30 / 2);
        let t = DosDateTime::from_parts(date, time);
        assert_eq!(t.to_unix_seconds(), Some(1_623_764_730));
        assert_eq!(DosDateTime::from_unix_seconds(1_623_764_730), t);
    }

    #[test]
    fn invalid_month_is_none() {
        assert_eq!(DosDateTime::from_raw(0).to_unix_seconds(), None);
    }

    #[test]
    fn pre_1980_clamps() {
        assert_eq!(DosDateTime::from_unix_seconds(0).to_unix_seconds(), Some(315_532_800));
    }
}

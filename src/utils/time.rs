use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};

use crate::err::{DeserializationError, DeserializationResult};

/// 100-nanosecond ticks between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_SHIFT: i64 = 11_644_473_600 * 10_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Converts a FILETIME tick count (100 ns since 1601-01-01 UTC) to a UTC time.
///
/// Out-of-range tick counts (seen when carving garbage) clamp to the FILETIME
/// epoch rather than failing the record.
pub(crate) fn datetime_from_filetime(filetime: u64) -> DateTime<Utc> {
    let relative = (filetime as i64).wrapping_sub(FILETIME_EPOCH_SHIFT);
    let secs = relative.div_euclid(TICKS_PER_SECOND);
    let nanos = (relative.rem_euclid(TICKS_PER_SECOND) * 100) as u32;

    DateTime::<Utc>::from_timestamp(secs, nanos).unwrap_or_else(filetime_epoch)
}

fn filetime_epoch() -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &NaiveDate::from_ymd_opt(1601, 1, 1)
            .expect("filetime epoch date is valid")
            .and_hms_opt(0, 0, 0)
            .expect("filetime epoch time is valid"),
    )
}

/// Decodes a Windows SYSTEMTIME structure (8 little-endian 16-bit fields).
pub(crate) fn systime_from_bytes(bytes: &[u8; 16]) -> DeserializationResult<DateTime<Utc>> {
    let field = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);

    let year = i32::from(field(0));
    let month = u32::from(field(1));
    // field(2) is the day of week, derivable from the date
    let day = u32::from(field(3));
    let hour = u32::from(field(4));
    let minute = u32::from(field(5));
    let second = u32::from(field(6));
    let milliseconds = u32::from(field(7));

    // An all-zero value is the conventional "unset" timestamp.
    if year == 0
        && month == 0
        && day == 0
        && hour == 0
        && minute == 0
        && second == 0
        && milliseconds == 0
    {
        return Ok(filetime_epoch());
    }

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or(DeserializationError::InvalidDateTime)?
        .and_hms_nano_opt(hour, minute, second, milliseconds * 1000)
        .ok_or(DeserializationError::InvalidDateTime)?;

    Ok(Utc.from_utc_datetime(&date))
}

/// RFC 3339 with nanoseconds, always UTC with a `Z` suffix.
pub(crate) fn format_utc(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

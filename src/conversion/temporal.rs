//! Date, time, timestamp, and interval codecs.
//!
//! Binary temporal values count from the PostgreSQL epoch 2000-01-01. With
//! `integer_datetimes` on (every supported server) they are 64-bit
//! microsecond counts; with it off they are 64-bit float seconds. The
//! representation is chosen once per connection from the startup parameters.
//!
//! Text values use the ISO date style.

use crate::error::{Error, Result};
use crate::value::{Date, Interval, Time, TimeTz, Timestamp, Value};

use super::CodecEnv;

const MICROS_PER_SEC: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SEC;
/// Days from 1970-01-01 to 2000-01-01.
const PG_EPOCH_UNIX_DAYS: i64 = 10_957;

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(y: i32, m: u32, d: u32) -> i64 {
    let y = y - if m <= 2 { 1 } else { 0 };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = (y - era * 400) as i64;
    let mp = if m > 2 { m - 3 } else { m + 9 } as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era as i64 * 146_097 + doe - 719_468
}

/// Proleptic Gregorian date for days since 1970-01-01.
fn civil_from_days(z: i64) -> (i32, u32, u32) {
    let z = z + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    ((y + if m <= 2 { 1 } else { 0 }) as i32, m as u32, d as u32)
}

// === binary ===

pub fn date_from_binary(bytes: &[u8]) -> Result<Date> {
    super::primitives::i32_from_binary(bytes).map(Date)
}

pub fn date_to_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let days = match value {
        Value::Date(d) => d.0,
        Value::Text(s) => date_from_text(s)?.0,
        other => {
            return Err(Error::Decode(format!(
                "cannot encode {} as date",
                other.type_name()
            )));
        }
    };
    out.extend_from_slice(&days.to_be_bytes());
    Ok(())
}

fn micros_from_binary(env: &CodecEnv, bytes: &[u8]) -> Result<i64> {
    if env.integer_datetimes {
        super::primitives::i64_from_binary(bytes)
    } else {
        let secs = super::primitives::f64_from_binary(bytes)?;
        Ok((secs * MICROS_PER_SEC as f64).round() as i64)
    }
}

fn micros_to_binary(env: &CodecEnv, micros: i64, out: &mut Vec<u8>) {
    if env.integer_datetimes {
        out.extend_from_slice(&micros.to_be_bytes());
    } else {
        let secs = micros as f64 / MICROS_PER_SEC as f64;
        out.extend_from_slice(&secs.to_be_bytes());
    }
}

pub fn time_from_binary(env: &CodecEnv, bytes: &[u8]) -> Result<Time> {
    micros_from_binary(env, bytes).map(Time)
}

pub fn time_to_binary(env: &CodecEnv, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let micros = match value {
        Value::Time(t) => t.0,
        Value::Text(s) => time_from_text(s)?.0,
        other => {
            return Err(Error::Decode(format!(
                "cannot encode {} as time",
                other.type_name()
            )));
        }
    };
    micros_to_binary(env, micros, out);
    Ok(())
}

pub fn timetz_from_binary(env: &CodecEnv, bytes: &[u8]) -> Result<TimeTz> {
    let split = bytes.len().checked_sub(4).ok_or_else(|| {
        Error::Decode(format!("invalid timetz length: {}", bytes.len()))
    })?;
    let micros = micros_from_binary(env, &bytes[..split])?;
    let offset_secs = super::primitives::i32_from_binary(&bytes[split..])?;
    Ok(TimeTz {
        micros,
        offset_secs,
    })
}

pub fn timetz_to_binary(env: &CodecEnv, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let t = match value {
        Value::TimeTz(t) => *t,
        Value::Text(s) => timetz_from_text(s)?,
        other => {
            return Err(Error::Decode(format!(
                "cannot encode {} as timetz",
                other.type_name()
            )));
        }
    };
    micros_to_binary(env, t.micros, out);
    out.extend_from_slice(&t.offset_secs.to_be_bytes());
    Ok(())
}

pub fn timestamp_from_binary(env: &CodecEnv, bytes: &[u8]) -> Result<Timestamp> {
    micros_from_binary(env, bytes).map(Timestamp)
}

pub fn timestamp_to_binary(env: &CodecEnv, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let micros = match value {
        Value::Timestamp(ts) | Value::TimestampTz(ts) => ts.0,
        Value::Text(s) => timestamp_from_text(s)?.0,
        other => {
            return Err(Error::Decode(format!(
                "cannot encode {} as timestamp",
                other.type_name()
            )));
        }
    };
    micros_to_binary(env, micros, out);
    Ok(())
}

pub fn interval_from_binary(env: &CodecEnv, bytes: &[u8]) -> Result<Interval> {
    if bytes.len() < 16 {
        return Err(Error::Decode(format!(
            "invalid interval length: {}",
            bytes.len()
        )));
    }
    let micros = micros_from_binary(env, &bytes[..8])?;
    let days = super::primitives::i32_from_binary(&bytes[8..12])?;
    let months = super::primitives::i32_from_binary(&bytes[12..16])?;
    Ok(Interval {
        months,
        days,
        micros,
    })
}

pub fn interval_to_binary(env: &CodecEnv, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let iv = match value {
        Value::Interval(iv) => *iv,
        Value::Text(s) => interval_from_text(s)?,
        other => {
            return Err(Error::Decode(format!(
                "cannot encode {} as interval",
                other.type_name()
            )));
        }
    };
    micros_to_binary(env, iv.micros, out);
    out.extend_from_slice(&iv.days.to_be_bytes());
    out.extend_from_slice(&iv.months.to_be_bytes());
    Ok(())
}

// === text ===

pub fn date_from_text(s: &str) -> Result<Date> {
    match s {
        "infinity" => return Ok(Date(i32::MAX)),
        "-infinity" => return Ok(Date(i32::MIN)),
        _ => {}
    }
    let (y, m, d) = parse_ymd(s)?;
    let days = days_from_civil(y, m, d) - PG_EPOCH_UNIX_DAYS;
    Ok(Date(days as i32))
}

fn parse_ymd(s: &str) -> Result<(i32, u32, u32)> {
    let mut parts = s.splitn(3, '-');
    let bad = || Error::Decode(format!("invalid date: {:?}", s));
    let y: i32 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let m: u32 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let d: u32 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return Err(bad());
    }
    Ok((y, m, d))
}

fn parse_hms(s: &str) -> Result<i64> {
    let bad = || Error::Decode(format!("invalid time: {:?}", s));
    let (hms, frac) = match s.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (s, None),
    };
    let mut parts = hms.splitn(3, ':');
    let h: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let m: i64 = parts.next().unwrap_or("0").parse().map_err(|_| bad())?;
    let sec: i64 = parts.next().unwrap_or("0").parse().map_err(|_| bad())?;
    if !(0..=24).contains(&h) || !(0..60).contains(&m) || !(0..61).contains(&sec) {
        return Err(bad());
    }

    let mut micros = ((h * 60 + m) * 60 + sec) * MICROS_PER_SEC;
    if let Some(frac) = frac {
        if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let mut padded = frac.to_string();
        while padded.len() < 6 {
            padded.push('0');
        }
        micros += padded.parse::<i64>().map_err(|_| bad())?;
    }
    Ok(micros)
}

pub fn time_from_text(s: &str) -> Result<Time> {
    parse_hms(s).map(Time)
}

/// Split a trailing `[+-]HH[:MM[:SS]]` zone suffix, returning the prefix and
/// the offset in seconds east of UTC.
fn split_zone(s: &str) -> (&str, Option<i32>) {
    let bytes = s.as_bytes();
    // Search from the end; the date at the front also contains '-'.
    for idx in (1..bytes.len()).rev() {
        let b = bytes[idx];
        if b == b'+' || b == b'-' {
            let zone = &s[idx..];
            // A '-' directly inside the date part is not a zone.
            if zone.len() > 9 || zone[1..].contains('-') {
                break;
            }
            let mut secs = 0i64;
            let mut ok = true;
            for (i, part) in zone[1..].split(':').enumerate() {
                match (i, part.parse::<i64>()) {
                    (0, Ok(h)) => secs += h * 3600,
                    (1, Ok(m)) => secs += m * 60,
                    (2, Ok(sec)) => secs += sec,
                    _ => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                let sign = if b == b'-' { -1 } else { 1 };
                return (&s[..idx], Some(sign * secs as i32));
            }
            break;
        }
        if !(b.is_ascii_digit() || b == b':') {
            break;
        }
    }
    (s, None)
}

pub fn timetz_from_text(s: &str) -> Result<TimeTz> {
    let (time_part, offset_east) = split_zone(s);
    let micros = parse_hms(time_part)?;
    // The wire carries seconds west of UTC.
    Ok(TimeTz {
        micros,
        offset_secs: -offset_east.unwrap_or(0),
    })
}

pub fn timestamp_from_text(s: &str) -> Result<Timestamp> {
    match s {
        "infinity" => return Ok(Timestamp(i64::MAX)),
        "-infinity" => return Ok(Timestamp(i64::MIN)),
        _ => {}
    }
    let bad = || Error::Decode(format!("invalid timestamp: {:?}", s));
    let (date_part, rest) = s.split_once([' ', 'T']).ok_or_else(bad)?;
    let (time_part, offset_east) = split_zone(rest);

    let date = date_from_text(date_part)?;
    let time = parse_hms(time_part)?;
    let mut micros = date.0 as i64 * MICROS_PER_DAY + time;
    if let Some(east) = offset_east {
        micros -= east as i64 * MICROS_PER_SEC;
    }
    Ok(Timestamp(micros))
}

/// Parse the `postgres` interval output style, e.g.
/// `1 year 2 mons 3 days -04:05:06.07`.
pub fn interval_from_text(s: &str) -> Result<Interval> {
    let bad = || Error::Decode(format!("invalid interval: {:?}", s));
    let mut iv = Interval::default();

    let mut tokens = s.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token.contains(':') {
            let (negative, hms) = match token.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, token),
            };
            let micros = parse_hms(hms)?;
            iv.micros += if negative { -micros } else { micros };
            continue;
        }

        let n: i64 = token.parse().map_err(|_| bad())?;
        let unit = tokens.next().ok_or_else(bad)?;
        match unit.trim_end_matches('s') {
            "year" => iv.months += (n * 12) as i32,
            "mon" | "month" => iv.months += n as i32,
            "day" => iv.days += n as i32,
            "week" => iv.days += (n * 7) as i32,
            "hour" => iv.micros += n * 3600 * MICROS_PER_SEC,
            "minute" | "min" => iv.micros += n * 60 * MICROS_PER_SEC,
            "second" | "sec" => iv.micros += n * MICROS_PER_SEC,
            _ => return Err(bad()),
        }
    }

    Ok(iv)
}

// === rendering (ISO style) ===

pub fn render_date(d: Date) -> String {
    match d.0 {
        i32::MAX => return "infinity".into(),
        i32::MIN => return "-infinity".into(),
        _ => {}
    }
    let (y, m, day) = civil_from_days(d.0 as i64 + PG_EPOCH_UNIX_DAYS);
    format!("{:04}-{:02}-{:02}", y, m, day)
}

fn render_micros_of_day(micros: i64) -> String {
    let secs = micros.div_euclid(MICROS_PER_SEC);
    let frac = micros.rem_euclid(MICROS_PER_SEC);
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if frac == 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        let frac = format!("{:06}", frac);
        format!("{:02}:{:02}:{:02}.{}", h, m, s, frac.trim_end_matches('0'))
    }
}

pub fn render_time(t: Time) -> String {
    render_micros_of_day(t.0)
}

pub fn render_timetz(t: TimeTz) -> String {
    let east = -t.offset_secs;
    let sign = if east < 0 { '-' } else { '+' };
    let abs = east.abs();
    let base = render_micros_of_day(t.micros);
    if abs % 3600 == 0 {
        format!("{}{}{:02}", base, sign, abs / 3600)
    } else {
        format!("{}{}{:02}:{:02}", base, sign, abs / 3600, (abs % 3600) / 60)
    }
}

pub fn render_timestamp(ts: Timestamp) -> String {
    match ts.0 {
        i64::MAX => return "infinity".into(),
        i64::MIN => return "-infinity".into(),
        _ => {}
    }
    let days = ts.0.div_euclid(MICROS_PER_DAY);
    let micros = ts.0.rem_euclid(MICROS_PER_DAY);
    format!(
        "{} {}+00",
        render_date(Date(days as i32)),
        render_micros_of_day(micros)
    )
}

pub fn render_interval(iv: Interval) -> String {
    let mut parts = Vec::new();
    let years = iv.months / 12;
    let months = iv.months % 12;
    if years != 0 {
        parts.push(format!("{} years", years));
    }
    if months != 0 {
        parts.push(format!("{} mons", months));
    }
    if iv.days != 0 {
        parts.push(format!("{} days", iv.days));
    }
    if iv.micros != 0 || parts.is_empty() {
        if iv.micros < 0 {
            parts.push(format!("-{}", render_micros_of_day(-iv.micros)));
        } else {
            parts.push(render_micros_of_day(iv.micros));
        }
    }
    parts.join(" ")
}

#[cfg(feature = "with-time")]
mod time_integration {
    use super::*;

    impl Date {
        /// Convert to a calendar date.
        pub fn to_time_date(self) -> Result<time::Date> {
            // Julian day of 2000-01-01 is 2451545.
            time::Date::from_julian_day(
                self.0
                    .checked_add(2_451_545)
                    .ok_or_else(|| Error::Decode("date out of range".into()))?,
            )
            .map_err(|e| Error::Decode(format!("date out of range: {}", e)))
        }
    }

    impl Timestamp {
        /// Convert to an `OffsetDateTime` in UTC.
        pub fn to_offset_date_time(self) -> Result<time::OffsetDateTime> {
            let unix_micros =
                self.0 as i128 + (PG_EPOCH_UNIX_DAYS as i128) * (MICROS_PER_DAY as i128);
            time::OffsetDateTime::from_unix_timestamp_nanos(unix_micros * 1000)
                .map_err(|e| Error::Decode(format!("timestamp out of range: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_conversions_agree() {
        for days in [-730_120, -1, 0, 1, 59, 60, 365, 10_957, 100_000] {
            let (y, m, d) = civil_from_days(days);
            assert_eq!(days_from_civil(y, m, d), days);
        }
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(PG_EPOCH_UNIX_DAYS), (2000, 1, 1));
    }

    #[test]
    fn date_text_round_trip() {
        for s in ["2000-01-01", "1999-12-31", "2024-02-29", "1969-07-20"] {
            let d = date_from_text(s).unwrap();
            assert_eq!(render_date(d), s);
        }
        assert_eq!(date_from_text("2000-01-01").unwrap(), Date(0));
        assert_eq!(date_from_text("2000-01-02").unwrap(), Date(1));
    }

    #[test]
    fn time_text_round_trip() {
        assert_eq!(time_from_text("00:00:00").unwrap(), Time(0));
        let t = time_from_text("10:23:54.123").unwrap();
        assert_eq!(render_time(t), "10:23:54.123");
        assert_eq!(t.0, ((10 * 60 + 23) * 60 + 54) * 1_000_000 + 123_000);
    }

    #[test]
    fn timestamp_with_zone() {
        // 2000-01-01 01:00:00+01 is the PostgreSQL epoch in UTC.
        let ts = timestamp_from_text("2000-01-01 01:00:00+01").unwrap();
        assert_eq!(ts, Timestamp(0));
        assert_eq!(render_timestamp(ts), "2000-01-01 00:00:00+00");

        let ts = timestamp_from_text("1999-12-31 23:30:00-00:30").unwrap();
        assert_eq!(ts, Timestamp(0));
    }

    #[test]
    fn timestamp_binary_integer_datetimes() {
        let env = CodecEnv::default();
        let mut buf = Vec::new();
        timestamp_to_binary(&env, &Value::Timestamp(Timestamp(123_456)), &mut buf).unwrap();
        assert_eq!(buf, 123_456_i64.to_be_bytes());
        assert_eq!(
            timestamp_from_binary(&env, &buf).unwrap(),
            Timestamp(123_456)
        );
    }

    #[test]
    fn timestamp_binary_float_datetimes() {
        let env = CodecEnv {
            integer_datetimes: false,
            ..CodecEnv::default()
        };
        let mut buf = Vec::new();
        timestamp_to_binary(&env, &Value::Timestamp(Timestamp(1_500_000)), &mut buf).unwrap();
        assert_eq!(buf, 1.5_f64.to_be_bytes());
        assert_eq!(
            timestamp_from_binary(&env, &buf).unwrap(),
            Timestamp(1_500_000)
        );
    }

    #[test]
    fn interval_text_round_trip() {
        let iv = interval_from_text("1 year 2 mons 3 days 04:05:06.07").unwrap();
        assert_eq!(
            iv,
            Interval {
                months: 14,
                days: 3,
                micros: ((4 * 60 + 5) * 60 + 6) * 1_000_000 + 70_000,
            }
        );
        assert_eq!(render_interval(iv), "1 years 2 mons 3 days 04:05:06.07");

        let neg = interval_from_text("-1 days -00:00:01").unwrap();
        assert_eq!(neg.days, -1);
        assert_eq!(neg.micros, -1_000_000);
    }

    #[test]
    fn interval_binary_layout() {
        let env = CodecEnv::default();
        let iv = Interval {
            months: 14,
            days: 3,
            micros: 5,
        };
        let mut buf = Vec::new();
        interval_to_binary(&env, &Value::Interval(iv), &mut buf).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(interval_from_binary(&env, &buf).unwrap(), iv);
    }

    #[test]
    fn timetz_round_trip() {
        let t = timetz_from_text("12:00:00+02").unwrap();
        assert_eq!(t.offset_secs, -7200);
        assert_eq!(render_timetz(t), "12:00:00+02");

        let env = CodecEnv::default();
        let mut buf = Vec::new();
        timetz_to_binary(&env, &Value::TimeTz(t), &mut buf).unwrap();
        assert_eq!(timetz_from_binary(&env, &buf).unwrap(), t);
    }

    #[test]
    fn infinities() {
        assert_eq!(date_from_text("infinity").unwrap(), Date(i32::MAX));
        assert_eq!(render_date(Date(i32::MIN)), "-infinity");
        assert_eq!(
            timestamp_from_text("infinity").unwrap(),
            Timestamp(i64::MAX)
        );
    }
}

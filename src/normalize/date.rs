use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Resolves an entry's publish timestamp.
///
/// Tries each accepted format in order and falls back to `now` when the raw
/// value is missing, blank or matches none of them. Dateless entries are
/// therefore stamped with their processing time rather than rejected.
pub fn publish_date(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        tracing::debug!("Entry has no pubDate, using processing time");
        return now;
    };

    match parse_pub_date(raw) {
        Some(date) => date,
        None => {
            tracing::debug!(pub_date = %raw, "Unrecognised pubDate format, using processing time");
            now
        }
    }
}

/// Parses a feed date against the accepted formats, first match wins:
///
/// 1. RFC 1123 with a zone abbreviation (`Mon, 02 Jan 2006 15:04:05 MST`)
/// 2. RFC 1123 with a numeric zone (`Mon, 02 Jan 2006 15:04:05 -0700`)
/// 3. RFC 3339 (`2006-01-02T15:04:05Z07:00`)
/// 4. Date only (`Mon, 2 Jan 2006`), taken as midnight UTC
///
/// The weekday is accepted but never cross-checked against the date.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let body = strip_weekday(raw);

    parse_rfc1123(body)
        .or_else(|| parse_rfc1123z(body))
        .or_else(|| parse_rfc3339(raw))
        .or_else(|| parse_date_only(body))
}

fn parse_rfc1123(body: &str) -> Option<DateTime<Utc>> {
    let (stamp, zone) = body.rsplit_once(char::is_whitespace)?;
    if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(stamp.trim(), "%d %b %Y %H:%M:%S").ok()?;
    let offset = FixedOffset::east_opt(zone_offset_hours(zone) * 3600)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rfc1123z(body: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(body, "%d %b %Y %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_date_only(body: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(body, "%d %b %Y")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Drops a leading `Mon, ` style weekday.
fn strip_weekday(s: &str) -> &str {
    match s.split_once(',') {
        Some((day, rest)) if day.len() >= 3 && day.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest.trim_start()
        }
        _ => s,
    }
}

/// Offsets for the zone names RFC 822 defines plus a few regional ones seen
/// in the wild. Unknown abbreviations are read as UTC.
fn zone_offset_hours(zone: &str) -> i32 {
    match zone.to_ascii_uppercase().as_str() {
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" => -8,
        "CET" | "BST" => 1,
        "CEST" | "EET" => 2,
        "EEST" | "TRT" | "MSK" => 3,
        _ => 0,
    }
}

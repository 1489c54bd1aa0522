use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::domain::{Coordinate, MetadataRecord};
use crate::report::ProgressSink;

pub type BBox = [f64; 4];

pub const WORLD_BBOX: BBox = [-180.0, -90.0, 180.0, 90.0];

const LON_RANGE: (f64, f64) = (-180.0, 180.0);
const LAT_RANGE: (f64, f64) = (-90.0, 90.0);
const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Resolved start/end pair of an item, both in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn start_string(&self) -> String {
        format_utc(&self.start)
    }

    pub fn end_string(&self) -> String {
        format_utc(&self.end)
    }
}

pub fn default_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn default_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn format_utc(value: &DateTime<Utc>) -> String {
    value.format(UTC_FORMAT).to_string()
}

/// Bounding box of an item: the explicit bbox, else the geographic extent,
/// else the whole world.
///
/// A box with any missing, NaN or non-numeric coordinate is replaced by the
/// whole world; finite coordinates outside their range are clamped one by one.
pub fn finalize_boundaries(record: &MetadataRecord, sink: &dyn ProgressSink) -> BBox {
    let (source, coords) = match (&record.bbox, &record.geographic_extent) {
        (Some(bbox), _) if !bbox.is_empty() => ("record bbox", bbox),
        (_, Some(extent)) if !extent.is_empty() => ("geographic extent", extent),
        _ => {
            sink.warn(&record.id, "no boundaries found, using world coordinates".to_string());
            return WORLD_BBOX;
        }
    };

    let values = coords
        .iter()
        .map(|coord| coord.as_ref().and_then(Coordinate::value))
        .collect::<Option<Vec<f64>>>();
    let values = match values {
        Some(values) if values.len() == 4 => values,
        _ => {
            sink.warn(
                &record.id,
                format!("invalid coordinates in {source} {coords:?}, using world coordinates"),
            );
            return WORLD_BBOX;
        }
    };

    let names = ["longitude minimum", "latitude minimum", "longitude maximum", "latitude maximum"];
    let ranges = [LON_RANGE, LAT_RANGE, LON_RANGE, LAT_RANGE];
    let mut bbox = WORLD_BBOX;
    for (index, value) in values.into_iter().enumerate() {
        let clamped = clamp_coordinate(value, ranges[index]);
        if clamped != value {
            sink.warn(
                &record.id,
                format!("invalid {} {value}, setting to {clamped}", names[index]),
            );
        }
        bbox[index] = clamped;
    }
    bbox
}

pub fn clamp_coordinate(value: f64, (min, max): (f64, f64)) -> f64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Appends the time of day to year, year-month and date-only strings.
pub fn expand_partial_date(raw: &str) -> String {
    match raw.len() {
        4 => format!("{raw}-01-01T00:00:00"),
        7 => format!("{raw}-01T00:00:00"),
        10 => format!("{raw}T00:00:00"),
        _ => raw.to_string(),
    }
}

/// Parses a harvested date string into UTC.
///
/// Offset-carrying forms are converted; naive forms are taken as UTC.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_partial_date(trimmed);

    if let Ok(value) = DateTime::parse_from_rfc3339(&expanded) {
        return Some(value.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(value) = DateTime::parse_from_str(&expanded, format) {
            return Some(value.with_timezone(&Utc));
        }
    }

    let naive = expanded.trim_end_matches('Z');
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(value) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(value.and_utc());
        }
    }
    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|value| value.and_utc())
}

/// Normalizes a date string to `YYYY-MM-DDTHH:MM:SSZ`; `None` when unparseable.
pub fn normalize_datetime(raw: &str) -> Option<String> {
    parse_datetime(raw).map(|value| format_utc(&value))
}

/// Start/end of an item, using the current time for open-ended periods.
pub fn finalize_interval(record: &MetadataRecord, sink: &dyn ProgressSink) -> Interval {
    finalize_interval_at(record, Utc::now(), sink)
}

/// Start/end of an item.
///
/// Explicit start/end seed the window; creation, generic, issue and
/// modification dates can only widen it. Without any of those, the
/// enrichment time period is used, an open end becoming `now`. A missing
/// start falls back to 1970-01-01, and a missing end or one equal to the
/// start falls back to 2100-01-01.
pub fn finalize_interval_at(
    record: &MetadataRecord,
    now: DateTime<Utc>,
    sink: &dyn ProgressSink,
) -> Interval {
    let mut start = parse_field(record, "start_datetime", record.start_datetime.as_deref(), sink);
    let mut end = parse_field(record, "end_datetime", record.end_datetime.as_deref(), sink);

    let dated = [
        ("created", record.created.as_deref()),
        ("date", record.date.as_deref()),
        ("issued", record.issued.as_deref()),
        ("modified", record.modified.as_deref()),
    ];
    for (name, raw) in dated {
        let Some(value) = parse_field(record, name, raw, sink) else {
            continue;
        };
        start = Some(start.map_or(value, |current| current.min(value)));
        end = Some(end.map_or(value, |current| current.max(value)));
    }

    if start.is_none() && end.is_none() {
        if let Some(period) = &record.temporal_extent {
            let period_start = parse_field(record, "time period begin", period.start.as_deref(), sink);
            let period_end = parse_field(record, "time period end", period.end.as_deref(), sink);
            if period_start.is_some() {
                start = period_start;
                end = Some(period_end.unwrap_or_else(|| {
                    sink.warn(&record.id, "time period has no end, using today".to_string());
                    now
                }));
            }
        }
    }

    let start = start.unwrap_or_else(|| {
        sink.warn(&record.id, "start datetime not found, using 1970-01-01".to_string());
        default_start()
    });
    let end = match end {
        Some(end) if end != start => end,
        _ => {
            sink.warn(&record.id, "end datetime not found, using 2100-01-01".to_string());
            default_end()
        }
    };
    Interval { start, end }
}

fn parse_field(
    record: &MetadataRecord,
    name: &str,
    raw: Option<&str>,
    sink: &dyn ProgressSink,
) -> Option<DateTime<Utc>> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty())?;
    let parsed = parse_datetime(raw);
    if parsed.is_none() {
        sink.warn(&record.id, format!("unable to parse {name} {raw:?}"));
    }
    parsed
}

/// Smallest box containing every input box.
pub fn union_bbox<'a>(boxes: impl IntoIterator<Item = &'a BBox>) -> Option<BBox> {
    boxes.into_iter().fold(None, |acc, bbox| {
        Some(match acc {
            None => *bbox,
            Some(acc) => [
                acc[0].min(bbox[0]),
                acc[1].min(bbox[1]),
                acc[2].max(bbox[2]),
                acc[3].max(bbox[3]),
            ],
        })
    })
}

/// Earliest start and latest end of every input interval.
pub fn union_interval(intervals: impl IntoIterator<Item = Interval>) -> Option<Interval> {
    intervals.into_iter().reduce(|acc, interval| Interval {
        start: acc.start.min(interval.start),
        end: acc.end.max(interval.end),
    })
}

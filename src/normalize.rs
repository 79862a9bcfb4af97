use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Epoch values above this are treated as milliseconds.
const EPOCH_MS_THRESHOLD: f64 = 1e11;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%z",
];

type ExtractFn = dyn Fn(&Value) -> Option<f64> + Send + Sync;

/// Pulls one numeric signal out of a loosely-typed record.
pub struct Extractor {
    name: String,
    extract: Box<ExtractFn>,
}

impl Extractor {
    pub fn new(
        name: impl Into<String>,
        extract: impl Fn(&Value) -> Option<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            extract: Box::new(extract),
        }
    }

    /// Reads the field of the same name.
    pub fn field(name: &str) -> Self {
        let key = name.to_string();
        Self::new(name, move |record| record.get(&key).and_then(coerce_number))
    }

    /// Reads the first present, numeric field among `sources`.
    pub fn first_of(name: &str, sources: &[&str]) -> Self {
        let keys: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
        Self::new(name, move |record| {
            keys.iter()
                .find_map(|key| record.get(key).and_then(coerce_number))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, record: &Value) -> Option<f64> {
        (self.extract)(record)
    }
}

/// A named, time-ordered signal. `None` marks a gap.
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub name: String,
    pub points: Vec<(i64, Option<f64>)>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.points.get(index).and_then(|(_, v)| *v)
    }

    /// Points that carry a value, gaps skipped.
    pub fn present(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.points.iter().filter_map(|(t, v)| v.map(|v| (*t, v)))
    }

    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.present().fold(None, |acc, (_, v)| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Output of one normalization pass: every series shares `axis`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedFrame {
    pub axis: Vec<i64>,
    pub series: Vec<Series>,
    /// Records excluded because their time could not be parsed.
    pub dropped: usize,
}

impl NormalizedFrame {
    pub fn get(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn value(&self, name: &str, index: usize) -> Option<f64> {
        self.get(name).and_then(|s| s.value_at(index))
    }

    pub fn len(&self) -> usize {
        self.axis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axis.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct SeriesNormalizer {
    tz: Tz,
    time_fields: Vec<String>,
}

impl SeriesNormalizer {
    /// `time_fields` are tried in order; the first one present on a record wins.
    pub fn new(tz: Tz, time_fields: &[&str]) -> Self {
        Self {
            tz,
            time_fields: time_fields.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn normalize(&self, records: &[Value], extractors: &[Extractor]) -> NormalizedFrame {
        // Later duplicates overwrite earlier ones; BTreeMap keeps the axis sorted.
        let mut by_time: BTreeMap<i64, usize> = BTreeMap::new();
        let mut dropped = 0;

        for (idx, record) in records.iter().enumerate() {
            match self.record_time(record) {
                Some(ts) => {
                    by_time.insert(ts, idx);
                }
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!(
                "Dropped {} of {} records with unparsable time (fields: {:?})",
                dropped,
                records.len(),
                self.time_fields
            );
        }

        let axis: Vec<i64> = by_time.keys().copied().collect();
        let series = extractors
            .iter()
            .map(|extractor| Series {
                name: extractor.name().to_string(),
                points: by_time
                    .iter()
                    .map(|(ts, idx)| (*ts, extractor.apply(&records[*idx])))
                    .collect(),
            })
            .collect();

        NormalizedFrame {
            axis,
            series,
            dropped,
        }
    }

    fn record_time(&self, record: &Value) -> Option<i64> {
        let object = record.as_object()?;
        let raw = self
            .time_fields
            .iter()
            .find_map(|field| object.get(field).filter(|v| !v.is_null()))?;
        parse_time(raw, self.tz)
    }
}

/// Coerces an ISO datetime, a `"date time"` string, a bare date or an epoch
/// (seconds, or milliseconds when large) into epoch seconds.
pub fn parse_time(raw: &Value, tz: Tz) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_f64().and_then(epoch_from_number),
        Value::String(s) => parse_time_str(s, tz),
        _ => None,
    }
}

fn parse_time_str(raw: &str, tz: Tz) -> Option<i64> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    // Compact `YYYYMMDD` dates would otherwise read as 1970 epoch seconds.
    if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y%m%d") {
            return localize(date.and_hms_opt(0, 0, 0)?, tz);
        }
    }
    if text.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return text.parse::<f64>().ok().and_then(epoch_from_number);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp());
    }
    for fmt in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.timestamp());
        }
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return localize(naive, tz);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return localize(date.and_hms_opt(0, 0, 0)?, tz);
    }
    None
}

fn localize(naive: NaiveDateTime, tz: Tz) -> Option<i64> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

fn epoch_from_number(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let seconds = if value.abs() > EPOCH_MS_THRESHOLD {
        value / 1000.0
    } else {
        value
    };
    Some(seconds.trunc() as i64)
}

/// Numbers and numeric strings become values; everything else is absent.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Zips a column-oriented table (`{dates: [...], prices: [...]}`) into
/// row records keyed by column name. A non-array time column yields no rows;
/// a non-array value column yields nulls.
pub fn columns_to_records(table: &Value, time_column: &str, value_columns: &[&str]) -> Vec<Value> {
    let Some(times) = table.get(time_column).and_then(Value::as_array) else {
        return Vec::new();
    };
    let columns: Vec<(&str, Option<&Vec<Value>>)> = value_columns
        .iter()
        .map(|name| (*name, table.get(*name).and_then(Value::as_array)))
        .collect();

    times
        .iter()
        .enumerate()
        .map(|(idx, time)| {
            let mut row = Map::new();
            row.insert(time_column.to_string(), time.clone());
            for (name, column) in &columns {
                let cell = column
                    .and_then(|c| c.get(idx))
                    .cloned()
                    .unwrap_or(Value::Null);
                row.insert(name.to_string(), cell);
            }
            Value::Object(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> SeriesNormalizer {
        SeriesNormalizer::new(Tz::UTC, &["time", "time_key"])
    }

    #[test]
    fn test_equivalent_instants_share_epoch() {
        let expected = 1_704_187_800; // 2024-01-02T09:30:00Z
        let inputs = [
            json!("2024-01-02T09:30:00Z"),
            json!("2024-01-02T17:30:00+08:00"),
            json!("2024-01-02T17:30:00+0800"),
            json!("2024-01-02T17:30:00.000+0800"),
            json!("2024-01-02 09:30:00"),
            json!("2024-01-02T09:30:00"),
            json!(1_704_187_800),
            json!("1704187800"),
            json!(1_704_187_800_000_i64),
        ];
        for raw in inputs {
            assert_eq!(parse_time(&raw, Tz::UTC), Some(expected), "input {}", raw);
        }
    }

    #[test]
    fn test_naive_times_use_market_zone() {
        let hk: Tz = "Asia/Hong_Kong".parse().unwrap();
        let utc = parse_time(&json!("2024-01-02T09:30:00Z"), Tz::UTC).unwrap();
        let local = parse_time(&json!("2024-01-02 17:30:00"), hk).unwrap();
        assert_eq!(utc, local);
    }

    #[test]
    fn test_bare_date_is_midnight() {
        assert_eq!(parse_time(&json!("2024-01-02"), Tz::UTC), Some(1_704_153_600));
        assert_eq!(parse_time(&json!("20240102"), Tz::UTC), Some(1_704_153_600));
        // Eight digits that are not a calendar date still read as epoch seconds.
        assert_eq!(parse_time(&json!("20241399"), Tz::UTC), Some(20_241_399));
    }

    #[test]
    fn test_unparsable_times_are_rejected() {
        for raw in [json!("yesterday"), json!(""), json!(null), json!(true), json!({"t": 1})] {
            assert_eq!(parse_time(&raw, Tz::UTC), None, "input {}", raw);
        }
    }

    #[test]
    fn test_series_share_axis_and_drop_bad_times() {
        let records = vec![
            json!({"time": "2024-01-03", "close": 11.0, "EMA5": 10.5}),
            json!({"time": "not a date", "close": 99.0, "EMA5": 99.0}),
            json!({"time": "2024-01-01", "close": 9.0}),
            json!({"time_key": "2024-01-02 00:00:00", "close": "10.0", "EMA5": null}),
            json!("garbage"),
        ];
        let frame = normalizer().normalize(
            &records,
            &[Extractor::field("close"), Extractor::field("EMA5")],
        );

        assert_eq!(frame.dropped, 2);
        assert_eq!(frame.axis, vec![1_704_067_200, 1_704_153_600, 1_704_240_000]);
        for series in &frame.series {
            let times: Vec<i64> = series.points.iter().map(|(t, _)| *t).collect();
            assert_eq!(times, frame.axis);
        }
        let close = frame.get("close").unwrap();
        assert_eq!(close.value_at(1), Some(10.0));
        let ema = frame.get("EMA5").unwrap();
        assert_eq!(ema.value_at(0), None);
        assert_eq!(ema.value_at(1), None);
        assert_eq!(ema.value_at(2), Some(10.5));
    }

    #[test]
    fn test_duplicate_timestamps_keep_last() {
        let records = vec![
            json!({"time": "2024-01-02", "close": 1.0}),
            json!({"time": "2024-01-02", "close": 2.0}),
        ];
        let frame = normalizer().normalize(&records, &[Extractor::field("close")]);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.value("close", 0), Some(2.0));
    }

    #[test]
    fn test_empty_input_yields_empty_series() {
        let frame = normalizer().normalize(&[], &[Extractor::field("close"), Extractor::field("EMA5")]);
        assert!(frame.is_empty());
        assert_eq!(frame.series.len(), 2);
        assert!(frame.series.iter().all(|s| s.is_empty()));
        assert_eq!(frame.dropped, 0);
    }

    #[test]
    fn test_non_numeric_values_are_absent_not_zero() {
        assert_eq!(coerce_number(&json!(null)), None);
        assert_eq!(coerce_number(&json!("n/a")), None);
        assert_eq!(coerce_number(&json!("NaN")), None);
        assert_eq!(coerce_number(&json!(false)), None);
        assert_eq!(coerce_number(&json!([1])), None);
        assert_eq!(coerce_number(&json!(" 12.5 ")), Some(12.5));
        assert_eq!(coerce_number(&json!(0)), Some(0.0));
    }

    #[test]
    fn test_first_of_prefers_earlier_sources() {
        let extractor = Extractor::first_of("open", &["open", "open_price"]);
        assert_eq!(extractor.apply(&json!({"open_price": "3.5"})), Some(3.5));
        assert_eq!(extractor.apply(&json!({"open": 1.0, "open_price": 3.5})), Some(1.0));
        assert_eq!(extractor.apply(&json!({"open": null, "open_price": 3.5})), Some(3.5));
    }

    #[test]
    fn test_columns_to_records_zips_by_index() {
        let table = json!({
            "dates": ["2024-01-01", "2024-01-02"],
            "prices": [1.0, 2.0],
            "ema5": [null],
            "ema10": "oops",
        });
        let rows = columns_to_records(&table, "dates", &["prices", "ema5", "ema10"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["prices"], json!(2.0));
        assert_eq!(rows[1]["ema5"], Value::Null);
        assert_eq!(rows[0]["ema10"], Value::Null);

        assert!(columns_to_records(&json!({"dates": "x"}), "dates", &["prices"]).is_empty());
    }

    #[test]
    fn test_series_bounds_skip_gaps() {
        let series = Series {
            name: "x".into(),
            points: vec![(1, Some(3.0)), (2, None), (3, Some(-1.0))],
        };
        assert_eq!(series.bounds(), Some((-1.0, 3.0)));
        assert_eq!(series.present().count(), 2);
    }
}

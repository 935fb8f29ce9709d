//! Fixed-width time buckets aligned to the Unix epoch

use chrono::{DateTime, NaiveDateTime};
use std::collections::BTreeMap;

use crate::models::AccessRecord;

/// Start of the bucket of width `width_secs` containing `ts`
pub fn bucket_start(ts: NaiveDateTime, width_secs: i64) -> Option<NaiveDateTime> {
    if width_secs <= 0 {
        return None;
    }
    let secs = ts.and_utc().timestamp();
    let start = secs.div_euclid(width_secs) * width_secs;
    DateTime::from_timestamp(start, 0).map(|dt| dt.naive_utc())
}

/// Most buckets `request_counts` will fill between two records
pub const MAX_FILLED_BUCKETS: i64 = 100_000;

/// Requests per bucket, including empty buckets between the first and the
/// last timestamped record. Records without a timestamp are ignored.
///
/// When the records span more than [`MAX_FILLED_BUCKETS`] buckets the gaps
/// are left unfilled and only occupied buckets are returned.
pub fn request_counts(records: &[AccessRecord], width_secs: i64) -> BTreeMap<NaiveDateTime, usize> {
    let mut counts = BTreeMap::new();
    for ts in records.iter().filter_map(|r| r.timestamp) {
        if let Some(start) = bucket_start(ts, width_secs) {
            *counts.entry(start).or_insert(0usize) += 1;
        }
    }

    let (first, last) = match (counts.keys().next(), counts.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return counts,
    };

    let span = (last - first).num_seconds() / width_secs;
    if span > MAX_FILLED_BUCKETS {
        log::warn!(
            "Records span {} buckets of {}s ({} to {}), not filling gaps",
            span,
            width_secs,
            first,
            last
        );
        return counts;
    }

    let step = chrono::Duration::seconds(width_secs);
    let mut cursor = first;
    while cursor < last {
        counts.entry(cursor).or_insert(0);
        cursor += step;
    }
    counts
}

/// Fraction of error responses per bucket. Buckets without requests are
/// absent, they have no rate.
pub fn error_rates(records: &[AccessRecord], width_secs: i64) -> BTreeMap<NaiveDateTime, f64> {
    let mut totals: BTreeMap<NaiveDateTime, (usize, usize)> = BTreeMap::new();
    for record in records {
        let Some(start) = record.timestamp.and_then(|ts| bucket_start(ts, width_secs)) else {
            continue;
        };
        let entry = totals.entry(start).or_insert((0, 0));
        entry.1 += 1;
        if record.is_error() {
            entry.0 += 1;
        }
    }

    totals
        .into_iter()
        .map(|(start, (errors, total))| (start, errors as f64 / total as f64))
        .collect()
}

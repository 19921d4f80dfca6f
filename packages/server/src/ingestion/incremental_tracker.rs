//! Incremental window narrowing.
//!
//! Policy: trailing gap only. We look at the newest persisted timestamp for
//! the asset; everything at or before it is considered covered. Leading gaps
//! are never auto-filled — historical backfill is the caller's job via an
//! explicit fixed-window request.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::common::TargetTable;

/// Narrow `[start, end]` to the sub-window not yet persisted for the asset.
///
/// Returns `None` when the persisted range already covers the request, in
/// which case the caller skips the upstream call entirely.
pub async fn narrow_window(
    pool: &PgPool,
    asset_id: i64,
    table: TargetTable,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, sqlx::Error> {
    // Table names come from a closed enum, not user input.
    let sql = format!(
        "SELECT max(time) FROM {} WHERE asset_id = $1",
        table.table_name()
    );
    let newest: Option<DateTime<Utc>> = sqlx::query_scalar(&sql)
        .bind(asset_id)
        .fetch_one(pool)
        .await?;

    Ok(narrow(newest, start, end))
}

/// Pure narrowing rule, split out for tests.
fn narrow(
    newest: Option<DateTime<Utc>>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    match newest {
        None => Some((start, end)),
        Some(newest) if newest >= end => None,
        Some(newest) => {
            // One microsecond past the newest row: Postgres timestamptz
            // resolution, so the row itself is excluded.
            let resume = newest + Duration::microseconds(1);
            Some((resume.max(start), end))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn no_persisted_rows_keeps_the_full_window() {
        assert_eq!(narrow(None, at(1, 0), at(5, 0)), Some((at(1, 0), at(5, 0))));
    }

    #[test]
    fn fully_covered_window_is_empty() {
        assert_eq!(narrow(Some(at(5, 0)), at(1, 0), at(5, 0)), None);
        assert_eq!(narrow(Some(at(6, 0)), at(1, 0), at(5, 0)), None);
    }

    #[test]
    fn trailing_gap_resumes_just_past_the_newest_row() {
        let (start, end) = narrow(Some(at(3, 0)), at(1, 0), at(5, 0)).unwrap();
        assert_eq!(start, at(3, 0) + Duration::microseconds(1));
        assert_eq!(end, at(5, 0));
    }

    #[test]
    fn leading_gap_is_not_filled() {
        // Persisted data newer than `start`: the request is clamped forward,
        // never backward.
        let (start, end) = narrow(Some(at(3, 0)), at(2, 0), at(5, 0)).unwrap();
        assert!(start > at(3, 0));
        assert_eq!(end, at(5, 0));
    }

    #[test]
    fn old_persisted_data_before_start_keeps_requested_start() {
        let (start, _) = narrow(Some(at(1, 0)), at(2, 0), at(5, 0)).unwrap();
        assert_eq!(start, at(2, 0));
    }
}

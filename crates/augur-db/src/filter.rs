//! Renders [`StatusFilter`] trees as SQL predicates over `collection_status`.

use augur_core::status::format_timestamp;
use augur_core::StatusFilter;
use sqlx::{Postgres, QueryBuilder};

/// Appends the predicate for `filter`. Column names come from the fixed track
/// prefixes; every value is bound.
pub fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &StatusFilter) {
    match filter {
        StatusFilter::State(track, state) => {
            qb.push(format!("cs.{}_status = ", track.as_str()));
            qb.push_bind(state.as_str());
        }
        StatusFilter::TaskHandle(track, handle) => {
            qb.push(format!("cs.{}_task_id = ", track.as_str()));
            qb.push_bind(handle.clone());
        }
        StatusFilter::NeverCollected(track) => {
            qb.push(format!("cs.{}_data_last_collected IS NULL", track.as_str()));
        }
        StatusFilter::CollectedBefore(track, cutoff) => {
            // Text comparison is chronological for YYYY-MM-DD HH:MM:SS.
            qb.push(format!(
                "(cs.{0}_data_last_collected IS NOT NULL AND cs.{0}_data_last_collected < ",
                track.as_str()
            ));
            qb.push_bind(format_timestamp(cutoff));
            qb.push(")");
        }
        StatusFilter::Any(filters) => push_group(qb, filters, " OR ", "FALSE"),
        StatusFilter::All(filters) => push_group(qb, filters, " AND ", "TRUE"),
        StatusFilter::Not(inner) => {
            qb.push("NOT (");
            push_filter(qb, inner);
            qb.push(")");
        }
    }
}

fn push_group(
    qb: &mut QueryBuilder<'_, Postgres>,
    filters: &[StatusFilter],
    separator: &str,
    empty: &str,
) {
    if filters.is_empty() {
        qb.push(empty);
        return;
    }

    qb.push("(");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        push_filter(qb, filter);
    }
    qb.push(")");
}

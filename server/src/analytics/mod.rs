//! Pull-model response-time analytics over the persisted request history.
//!
//! Internal requests fanned out to several warehousemen persist as several
//! rows; rows sharing a sender and a grouping key (gigaId when present,
//! otherwise sender/buyer/seller plus a 5-second creation-time bucket) are
//! counted as one logical request. The bucket absorbs clock and processing
//! skew between near-simultaneous fanout writes — it is a best-effort
//! heuristic, not an exact identity test.

use axum::extract::{Query, State};
use axum::Json;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::auth::middleware::Claims;
use crate::db::store;
use crate::error::ApiError;
use crate::state::AppState;

/// Width of the dedup time bucket in milliseconds.
const DEDUP_BUCKET_MS: i64 = 5_000;

/// Marker used when a mean is undefined (no includable samples).
const NOT_AVAILABLE: &str = "not available";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    /// Deduplicated request count.
    pub count: usize,
    /// Arithmetic mean response time in milliseconds, if any sample exists.
    pub average_response_ms: Option<i64>,
    /// Human-readable mean, or "not available".
    pub average_response_human: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopAnalytics {
    pub shop_id: String,
    pub internal: CategoryStats,
    pub external: CategoryStats,
}

/// The columns analytics needs from one request row.
#[derive(Debug, Clone)]
struct RequestStats {
    id: String,
    sender_id: String,
    giga_id: Option<String>,
    buyer: Option<String>,
    external_seller: Option<String>,
    opened: bool,
    opened_at: Option<i64>,
    is_external: bool,
    created_at: i64,
    updated_at: i64,
}

/// Grouping key for fanout deduplication: sender + gigaId when present,
/// otherwise sender + buyer + external seller + 5-second creation bucket.
fn grouping_key(row: &RequestStats) -> String {
    match &row.giga_id {
        Some(giga_id) => format!("{}|g:{}", row.sender_id, giga_id),
        None => format!(
            "{}|{}|{}|{}",
            row.sender_id,
            row.buyer.as_deref().unwrap_or(""),
            row.external_seller.as_deref().unwrap_or(""),
            row.created_at.div_euclid(DEDUP_BUCKET_MS),
        ),
    }
}

/// Keep the first row per grouping key, in creation order.
fn dedup_internal(rows: Vec<RequestStats>) -> Vec<RequestStats> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(grouping_key(row)))
        .collect()
}

/// Response time of an internal request: time to the first explicit open,
/// else to the last modification if the request is marked opened, else the
/// request carries no sample. Negative samples (clock anomalies) are
/// excluded, not clamped.
fn internal_response_ms(row: &RequestStats) -> Option<i64> {
    let responded_at = match row.opened_at {
        Some(opened_at) => opened_at,
        None if row.opened => row.updated_at,
        None => return None,
    };
    let elapsed = responded_at - row.created_at;
    (elapsed >= 0).then_some(elapsed)
}

/// Response time of an external request: time to the second status_history
/// entry — the first real response after the initial `pending` entry.
fn external_response_ms(created_at: i64, second_entry_at: Option<i64>) -> Option<i64> {
    let elapsed = second_entry_at? - created_at;
    (elapsed >= 0).then_some(elapsed)
}

fn mean(samples: &[i64]) -> Option<i64> {
    if samples.is_empty() {
        return None;
    }
    let sum: i64 = samples.iter().sum();
    Some(sum / samples.len() as i64)
}

/// Render a duration as its largest two non-zero units out of
/// days / hours / minutes / seconds.
fn format_duration_ms(ms: i64) -> String {
    let total_secs = ms / 1_000;
    let units = [
        (total_secs / 86_400, "d"),
        (total_secs % 86_400 / 3_600, "h"),
        (total_secs % 3_600 / 60, "m"),
        (total_secs % 60, "s"),
    ];
    let parts: Vec<String> = units
        .iter()
        .filter(|(value, _)| *value > 0)
        .take(2)
        .map(|(value, unit)| format!("{}{}", value, unit))
        .collect();
    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

fn category_stats(count: usize, samples: &[i64]) -> CategoryStats {
    let average = mean(samples);
    CategoryStats {
        count,
        average_response_ms: average,
        average_response_human: average
            .map(format_duration_ms)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
    }
}

/// Compute per-shop analytics by scanning the shop's persisted requests.
pub fn shop_analytics(conn: &Connection, shop_id: &str) -> rusqlite::Result<ShopAnalytics> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, giga_id, buyer, external_seller, opened, opened_at,
                is_external, created_at, updated_at
         FROM requests WHERE shop_id = ?1 ORDER BY created_at, id",
    )?;
    let rows: Vec<RequestStats> = stmt
        .query_map(params![shop_id], |row| {
            Ok(RequestStats {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                giga_id: row.get(2)?,
                buyer: row.get(3)?,
                external_seller: row.get(4)?,
                opened: row.get(5)?,
                opened_at: row.get(6)?,
                is_external: row.get(7)?,
                created_at: row.get(8)?,
                updated_at: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let (external_rows, internal_rows): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|row| row.is_external);

    let internal = dedup_internal(internal_rows);
    let internal_samples: Vec<i64> = internal.iter().filter_map(internal_response_ms).collect();
    let internal_stats = category_stats(internal.len(), &internal_samples);

    let mut external_samples = Vec::new();
    for row in &external_rows {
        let second_entry_at: Option<i64> = conn
            .query_row(
                "SELECT updated_at FROM status_history
                 WHERE request_id = ?1 ORDER BY id LIMIT 1 OFFSET 1",
                params![row.id],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(sample) = external_response_ms(row.created_at, second_entry_at) {
            external_samples.push(sample);
        }
    }
    let external_stats = category_stats(external_rows.len(), &external_samples);

    Ok(ShopAnalytics {
        shop_id: shop_id.to_string(),
        internal: internal_stats,
        external: external_stats,
    })
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    /// A shop id, or "all" (oversight role only). Defaults to the caller's shop.
    pub shop: Option<String>,
}

/// GET /api/analytics?shop=<id|all>
/// Only the oversight role may request "all" or a foreign shop; everyone
/// else gets their own tenant only.
pub async fn get_analytics(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Vec<ShopAnalytics>>, ApiError> {
    let db = state.db.clone();
    let caller_id = claims.sub.clone();
    let scope = query.shop.unwrap_or_else(|| claims.shop_id.clone());

    let results = tokio::task::spawn_blocking(move || -> Result<Vec<ShopAnalytics>, ApiError> {
        let conn = db
            .lock()
            .map_err(|e| ApiError::Internal(format!("DB lock error: {}", e).into()))?;

        let caller = store::get_user(&conn, &caller_id)?
            .filter(|u| u.active)
            .ok_or(ApiError::Unauthorized)?;

        let shop_ids: Vec<String> = if scope == "all" {
            if !caller.role.is_oversight() {
                return Err(ApiError::Forbidden(
                    "only the oversight role may request all shops".to_string(),
                ));
            }
            store::active_shop_ids(&conn)?
        } else {
            if scope != caller.shop_id && !caller.role.is_oversight() {
                return Err(ApiError::Forbidden(
                    "analytics are scoped to your own shop".to_string(),
                ));
            }
            vec![scope]
        };

        let mut results = Vec::with_capacity(shop_ids.len());
        for shop_id in shop_ids {
            results.push(shop_analytics(&conn, &shop_id)?);
        }
        Ok(results)
    })
    .await??;

    Ok(Json(results))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(sender: &str, giga: Option<&str>, buyer: &str, seller: &str, created: i64) -> RequestStats {
        RequestStats {
            id: format!("{}-{}", sender, created),
            sender_id: sender.to_string(),
            giga_id: giga.map(str::to_string),
            buyer: Some(buyer.to_string()),
            external_seller: Some(seller.to_string()),
            opened: false,
            opened_at: None,
            is_external: false,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn dedup_by_giga_id() {
        let rows = vec![
            row("u1", Some("G1"), "b", "s", 0),
            row("u1", Some("G1"), "b", "s", 60_000),
        ];
        assert_eq!(dedup_internal(rows).len(), 1);
    }

    #[test]
    fn dedup_by_composite_within_bucket() {
        // Different gigaIds are irrelevant when absent; same composite key and
        // same 5s bucket collapse into one.
        let rows = vec![
            row("u1", None, "b", "s", 1_000),
            row("u1", None, "b", "s", 4_999),
        ];
        assert_eq!(dedup_internal(rows).len(), 1);
    }

    #[test]
    fn dedup_keeps_rows_outside_bucket() {
        let rows = vec![
            row("u1", None, "b", "s", 1_000),
            row("u1", None, "b", "s", 5_001),
        ];
        assert_eq!(dedup_internal(rows).len(), 2);
    }

    #[test]
    fn dedup_distinguishes_senders() {
        let rows = vec![
            row("u1", None, "b", "s", 1_000),
            row("u2", None, "b", "s", 1_000),
        ];
        assert_eq!(dedup_internal(rows).len(), 2);
    }

    #[test]
    fn unopened_request_contributes_no_sample() {
        let unopened = row("u1", None, "b", "s", 1_000);
        assert_eq!(internal_response_ms(&unopened), None);
    }

    #[test]
    fn opened_flag_falls_back_to_updated_at() {
        let mut r = row("u1", None, "b", "s", 1_000);
        r.opened = true;
        r.updated_at = 31_000;
        assert_eq!(internal_response_ms(&r), Some(30_000));

        r.opened_at = Some(11_000);
        assert_eq!(internal_response_ms(&r), Some(10_000), "explicit open wins");
    }

    #[test]
    fn negative_samples_are_excluded_not_clamped() {
        let mut r = row("u1", None, "b", "s", 10_000);
        r.opened = true;
        r.opened_at = Some(5_000);
        assert_eq!(internal_response_ms(&r), None);

        assert_eq!(external_response_ms(10_000, Some(5_000)), None);
    }

    #[test]
    fn external_needs_a_second_history_entry() {
        assert_eq!(external_response_ms(1_000, None), None);
        assert_eq!(external_response_ms(1_000, Some(61_000)), Some(60_000));
    }

    #[test]
    fn duration_uses_largest_two_nonzero_units() {
        assert_eq!(format_duration_ms(15_000), "15s");
        assert_eq!(format_duration_ms(3 * 60_000 + 12_000), "3m 12s");
        assert_eq!(format_duration_ms(2 * 3_600_000 + 4 * 60_000), "2h 4m");
        // Middle unit zero: hours skip to minutes
        assert_eq!(format_duration_ms(86_400_000 + 5 * 60_000), "1d 5m");
        assert_eq!(format_duration_ms(0), "0s");
    }

    #[test]
    fn mean_is_undefined_without_samples() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1_000, 3_000]), Some(2_000));
        assert_eq!(
            category_stats(3, &[]).average_response_human,
            "not available"
        );
    }
}

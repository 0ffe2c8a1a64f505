//! Synchronous query layer over the SQLite store.
//!
//! Everything here runs on a locked connection inside
//! `tokio::task::spawn_blocking` — see the HTTP handlers. The store is the
//! single source of truth for the request lifecycle; live WebSocket delivery
//! is best-effort on top of it.

use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::models::{
    RequestItem, RequestRecord, Role, ShopRow, StatusHistoryEntry, UserRow,
};

/// Current time in Unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Load a user by id. Returns None for unknown ids and for rows whose role
/// string no longer parses (treated the same as missing).
pub fn get_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT id, shop_id, display_name, role, active FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            },
        )
        .optional()?;

    Ok(row.and_then(|(id, shop_id, display_name, role, active)| {
        Role::from_str(&role).map(|role| UserRow {
            id,
            shop_id,
            display_name,
            role,
            active,
        })
    }))
}

pub fn get_shop(conn: &Connection, shop_id: &str) -> rusqlite::Result<Option<ShopRow>> {
    conn.query_row(
        "SELECT id, name, active FROM shops WHERE id = ?1",
        params![shop_id],
        |row| {
            Ok(ShopRow {
                id: row.get(0)?,
                name: row.get(1)?,
                active: row.get(2)?,
            })
        },
    )
    .optional()
}

/// Group ids the user belongs to.
pub fn user_group_ids(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT group_id FROM user_groups WHERE user_id = ?1")?;
    let ids = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Ids of every active shop. Used for oversight room membership.
pub fn active_shop_ids(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM shops WHERE active = 1")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Whether `warehouse_shop_id` is on `shop_id`'s assigned-warehouse list.
/// The assignment is directed: A -> B does not imply B -> A.
pub fn is_assigned_warehouse(
    conn: &Connection,
    shop_id: &str,
    warehouse_shop_id: &str,
) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM shop_warehouses WHERE shop_id = ?1 AND warehouse_shop_id = ?2",
        params![shop_id, warehouse_shop_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Active warehouse-role users of a shop — the recipients of an external
/// request routed to that shop.
pub fn warehouse_user_ids(conn: &Connection, shop_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT id FROM users WHERE shop_id = ?1 AND role = ?2 AND active = 1")?;
    let ids = stmt
        .query_map(params![shop_id, Role::Warehouse.as_str()], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Input for `insert_request`. The handler has already validated the
/// receiver/target and authorization; the store just persists.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub shop_id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub receiver_shop_id: Option<String>,
    pub giga_id: Option<String>,
    pub buyer: Option<String>,
    pub external_seller: Option<String>,
    pub is_external: bool,
    pub items: Vec<RequestItem>,
}

/// Generated order numbers for external requests: "ON-" + 8 random
/// uppercase alphanumerics.
fn generate_order_number() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("ON-{}", suffix)
}

/// Persist a new request with its line items. External requests additionally
/// get a generated order number, `pending` status, and the initial
/// status_history entry — all in one transaction.
pub fn insert_request(conn: &mut Connection, new: &NewRequest) -> rusqlite::Result<RequestRecord> {
    let id = Uuid::now_v7().to_string();
    let now = now_ms();
    let order_number = new.is_external.then(generate_order_number);
    let external_status = new.is_external.then(|| "pending".to_string());

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO requests (id, shop_id, sender_id, receiver_id, receiver_shop_id,
                               giga_id, buyer, external_seller, opened, opened_at,
                               is_external, order_number, external_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9, ?10, ?11, ?12, ?12)",
        params![
            id,
            new.shop_id,
            new.sender_id,
            new.receiver_id,
            new.receiver_shop_id,
            new.giga_id,
            new.buyer,
            new.external_seller,
            new.is_external,
            order_number,
            external_status,
            now,
        ],
    )?;

    for (position, item) in new.items.iter().enumerate() {
        tx.execute(
            "INSERT INTO request_items (request_id, position, product_code, name, quantity, urgent, missing)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                position as i64,
                item.product_code,
                item.name,
                item.quantity,
                item.urgent,
                item.missing,
            ],
        )?;
    }

    if new.is_external {
        tx.execute(
            "INSERT INTO status_history (request_id, status, updated_by, updated_at, notes)
             VALUES (?1, 'pending', ?2, ?3, NULL)",
            params![id, new.sender_id, now],
        )?;
    }

    tx.commit()?;

    get_request(conn, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Load a full request record: row, items, status trail.
pub fn get_request(conn: &Connection, request_id: &str) -> rusqlite::Result<Option<RequestRecord>> {
    let base = conn
        .query_row(
            "SELECT id, shop_id, sender_id, receiver_id, receiver_shop_id, giga_id, buyer,
                    external_seller, opened, opened_at, is_external, order_number,
                    external_status, created_at, updated_at
             FROM requests WHERE id = ?1",
            params![request_id],
            |row| {
                Ok(RequestRecord {
                    id: row.get(0)?,
                    shop_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    receiver_id: row.get(3)?,
                    receiver_shop_id: row.get(4)?,
                    giga_id: row.get(5)?,
                    buyer: row.get(6)?,
                    external_seller: row.get(7)?,
                    opened: row.get(8)?,
                    opened_at: row.get(9)?,
                    is_external_request: row.get(10)?,
                    order_number: row.get(11)?,
                    external_status: row.get(12)?,
                    created_at: row.get(13)?,
                    updated_at: row.get(14)?,
                    items: Vec::new(),
                    status_history: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut record) = base else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT product_code, name, quantity, urgent, missing
         FROM request_items WHERE request_id = ?1 ORDER BY position",
    )?;
    record.items = stmt
        .query_map(params![request_id], |row| {
            Ok(RequestItem {
                product_code: row.get(0)?,
                name: row.get(1)?,
                quantity: row.get(2)?,
                urgent: row.get(3)?,
                missing: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    record.status_history = status_history(conn, request_id)?;

    Ok(Some(record))
}

/// Status trail in append order.
pub fn status_history(
    conn: &Connection,
    request_id: &str,
) -> rusqlite::Result<Vec<StatusHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT status, updated_by, updated_at, notes
         FROM status_history WHERE request_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![request_id], |row| {
            Ok(StatusHistoryEntry {
                status: row.get(0)?,
                updated_by: row.get(1)?,
                updated_at: row.get(2)?,
                notes: row.get(3)?,
            })
        })?
        .collect();
    entries
}

/// Flip the opened flag. The first open stamps `opened_at`; re-opening later
/// never rewrites it (analytics uses the first explicit open).
pub fn set_opened(
    conn: &Connection,
    request_id: &str,
    opened: bool,
) -> rusqlite::Result<Option<RequestRecord>> {
    let now = now_ms();
    let changed = conn.execute(
        "UPDATE requests
         SET opened = ?2,
             opened_at = CASE WHEN ?2 = 1 AND opened_at IS NULL THEN ?3 ELSE opened_at END,
             updated_at = ?3
         WHERE id = ?1",
        params![request_id, opened, now],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_request(conn, request_id)
}

/// Append one status_history entry and set the request's current status, in
/// one transaction. Append-once: callers must not retry this on a later
/// broadcast failure.
pub fn append_status(
    conn: &mut Connection,
    request_id: &str,
    status: &str,
    actor_id: &str,
    notes: Option<&str>,
) -> rusqlite::Result<Option<RequestRecord>> {
    let now = now_ms();

    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE requests SET external_status = ?2, updated_at = ?3 WHERE id = ?1",
        params![request_id, status, now],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    tx.execute(
        "INSERT INTO status_history (request_id, status, updated_by, updated_at, notes)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![request_id, status, actor_id, now, notes],
    )?;
    tx.commit()?;

    get_request(conn, request_id)
}

/// Requests visible to a user: sent by them, addressed to them, or — for
/// warehouse-role users — addressed externally to their shop. This is the
/// pull-based reconciliation path for missed live deliveries.
pub fn list_requests_for_user(
    conn: &Connection,
    user: &UserRow,
) -> rusqlite::Result<Vec<RequestRecord>> {
    let include_shop_inbox = user.role == Role::Warehouse;
    let mut stmt = conn.prepare(
        "SELECT id FROM requests
         WHERE sender_id = ?1
            OR receiver_id = ?1
            OR (?2 AND receiver_shop_id = ?3)
         ORDER BY created_at DESC",
    )?;
    let ids: Vec<String> = stmt
        .query_map(params![user.id, include_shop_inbox, user.shop_id], |row| {
            row.get(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = get_request(conn, &id)? {
            records.push(record);
        }
    }
    Ok(records)
}

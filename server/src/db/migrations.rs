use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: tenants and users

CREATE TABLE shops (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE shop_warehouses (
    shop_id TEXT NOT NULL,
    warehouse_shop_id TEXT NOT NULL,
    PRIMARY KEY (shop_id, warehouse_shop_id),
    FOREIGN KEY (shop_id) REFERENCES shops(id),
    FOREIGN KEY (warehouse_shop_id) REFERENCES shops(id)
);

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    shop_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    role TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (shop_id) REFERENCES shops(id)
);

CREATE INDEX idx_users_shop ON users(shop_id);

CREATE TABLE user_groups (
    user_id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    PRIMARY KEY (user_id, group_id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);
",
        ),
        M::up(
            "-- Migration 2: requests, line items and the external status audit trail.
-- Request timestamps are Unix milliseconds: analytics does millisecond
-- arithmetic and 5-second bucketing over them.

CREATE TABLE requests (
    id TEXT PRIMARY KEY,
    shop_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    receiver_id TEXT,
    receiver_shop_id TEXT,
    giga_id TEXT,
    buyer TEXT,
    external_seller TEXT,
    opened INTEGER NOT NULL DEFAULT 0,
    opened_at INTEGER,
    is_external INTEGER NOT NULL DEFAULT 0,
    order_number TEXT,
    external_status TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (shop_id) REFERENCES shops(id),
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX idx_requests_shop ON requests(shop_id);
CREATE INDEX idx_requests_sender ON requests(sender_id);
CREATE INDEX idx_requests_receiver ON requests(receiver_id);
CREATE INDEX idx_requests_receiver_shop ON requests(receiver_shop_id);

CREATE TABLE request_items (
    request_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    product_code TEXT NOT NULL,
    name TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    urgent INTEGER NOT NULL DEFAULT 0,
    missing INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (request_id, position),
    FOREIGN KEY (request_id) REFERENCES requests(id)
);

CREATE TABLE status_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL,
    status TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    notes TEXT,
    FOREIGN KEY (request_id) REFERENCES requests(id)
);

CREATE INDEX idx_status_history_request ON status_history(request_id);
",
        ),
    ])
}

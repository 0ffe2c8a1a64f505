//! Row types for the SQLite schema and the string-typed enums stored in it.

use serde::{Deserialize, Serialize};

/// User roles, stored as lowercase strings in the users table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Employee,
    Warehouseman,
    Warehouse,
    Manager,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "employee" => Some(Self::Employee),
            "warehouseman" => Some(Self::Warehouseman),
            "warehouse" => Some(Self::Warehouse),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Warehouseman => "warehouseman",
            Self::Warehouse => "warehouse",
            Self::Manager => "manager",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    /// The top-level oversight role: global room membership and "all" analytics.
    pub fn is_oversight(&self) -> bool {
        matches!(self, Self::SuperAdmin)
    }
}

/// Lifecycle status of an external (cross-shop) request.
/// `pending` is the initial entry written at creation; the warehouse side
/// moves the request to one of the other three. Transitions between the
/// non-pending statuses are not restricted — every hop is audited in
/// status_history either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalStatus {
    Pending,
    Sending,
    Keeping,
    Rejected,
}

impl ExternalStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sending" => Some(Self::Sending),
            "keeping" => Some(Self::Keeping),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Keeping => "keeping",
            Self::Rejected => "rejected",
        }
    }
}

/// User record in the users table
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub shop_id: String,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
}

/// Shop (tenant) record
#[derive(Debug, Clone)]
pub struct ShopRow {
    pub id: String,
    pub name: String,
    pub active: bool,
}

/// One line item of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestItem {
    pub product_code: String,
    pub name: String,
    pub quantity: i64,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default)]
    pub missing: bool,
}

/// One append-only audit entry of an external request's status trail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: String,
    pub updated_by: String,
    /// Unix milliseconds
    pub updated_at: i64,
    pub notes: Option<String>,
}

/// Full request payload: the row plus its items and status trail.
/// This is both what the store returns and what goes over the wire in
/// `newMessage` / `requestUpdated` events, so field names follow the
/// client-facing JSON contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: String,
    pub shop_id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub receiver_shop_id: Option<String>,
    pub giga_id: Option<String>,
    pub buyer: Option<String>,
    pub external_seller: Option<String>,
    pub opened: bool,
    pub opened_at: Option<i64>,
    pub is_external_request: bool,
    pub order_number: Option<String>,
    pub external_status: Option<String>,
    /// Unix milliseconds
    pub created_at: i64,
    /// Unix milliseconds
    pub updated_at: i64,
    pub items: Vec<RequestItem>,
    pub status_history: Vec<StatusHistoryEntry>,
}

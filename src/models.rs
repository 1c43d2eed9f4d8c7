//! Persisted record types.
//!
//! Every record is scoped by the owner id of the signed-in restaurant.
//! Field names serialize as camelCase to match the JSON the frontend reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The owner (restaurant) record, keyed by the owner id itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiningTable {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub category_ids: Vec<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn in_category(&self, category_id: &str) -> bool {
        self.category_ids.iter().any(|c| c == category_id)
    }
}

/// A persisted order line: one product at one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub id: String,
    pub owner_id: String,
    pub table_id: String,
    pub product_id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrderLine {
    pub fn subtotal(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }

    /// Timestamp the sale is attributed to.
    pub fn sold_at(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.created_at)
    }
}

/// Insert payload for an order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderLine {
    pub table_id: String,
    pub product_id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
    pub completed: bool,
}

/// Partial update of an order line. `quantity: None` leaves it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLinePatch {
    pub quantity: Option<u32>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub cost: f64,
    pub spent_at: DateTime<Utc>,
}

/// Product form payload (create and update).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    pub name: String,
    /// Raw text from the price field; validated before use.
    pub price: String,
    #[serde(default)]
    pub category_ids: Vec<String>,
    pub image_url: Option<String>,
}

/// Expense form payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseInput {
    pub name: String,
    pub cost: String,
}

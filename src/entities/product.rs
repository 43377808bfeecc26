// 📦 Product Entity - Catalog item with stock on hand
//
// Stock is never edited directly by documents: bills add received units,
// invoices remove sold units (see ledger side effects).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default)]
    pub id: i64,
    pub business_id: i64,
    #[serde(default)]
    pub category_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub cost_price: f64,
    #[serde(default)]
    pub sale_price: f64,
    #[serde(default)]
    pub stock_quantity: f64,
    #[serde(default)]
    pub reorder_level: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_unit() -> String {
    "pcs".to_string()
}

fn default_active() -> bool {
    true
}

impl Product {
    pub fn new(business_id: i64, name: &str, cost_price: f64, sale_price: f64) -> Self {
        let now = Utc::now();
        Product {
            id: 0,
            business_id,
            category_id: None,
            name: name.to_string(),
            sku: String::new(),
            description: String::new(),
            unit: default_unit(),
            cost_price,
            sale_price,
            stock_quantity: 0.0,
            reorder_level: 0.0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active products at or under their reorder level
    pub fn is_low_stock(&self) -> bool {
        self.active && self.stock_quantity <= self.reorder_level
    }

    /// Stock valued at cost (never negative)
    pub fn inventory_value(&self) -> f64 {
        self.stock_quantity.max(0.0) * self.cost_price
    }

    pub fn adjust_stock(&mut self, delta: f64) {
        if delta.is_finite() {
            self.stock_quantity += delta;
        }
    }
}

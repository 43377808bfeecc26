use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The tenant every other record hangs off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub tax_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Business {
    pub fn new(name: &str, currency: &str) -> Self {
        Business {
            id: 0,
            name: name.to_string(),
            currency: currency.to_string(),
            address: String::new(),
            phone: String::new(),
            tax_id: String::new(),
            created_at: Utc::now(),
        }
    }
}

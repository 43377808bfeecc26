use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Money moved between two accounts of the same business
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    #[serde(default)]
    pub id: i64,
    pub business_id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: f64,
    pub date: NaiveDate,
    #[serde(default)]
    pub note: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    pub fn new(business_id: i64, from: i64, to: i64, amount: f64, date: NaiveDate) -> Self {
        Transfer {
            id: 0,
            business_id,
            from_account_id: from,
            to_account_id: to,
            amount,
            date,
            note: String::new(),
            created_at: Utc::now(),
        }
    }
}

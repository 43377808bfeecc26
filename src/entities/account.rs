// 💳 Account Entity - Money account with a running balance
//
// Opening balance is fixed at creation; current balance moves with payments
// and transfers recorded through the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ACCOUNT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Cash drawer / petty cash
    Cash,

    /// Bank account
    Bank,

    /// Credit card (liability)
    CreditCard,

    /// Loan (liability)
    Loan,

    /// Owner's equity
    Equity,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Cash => "cash",
            AccountType::Bank => "bank",
            AccountType::CreditCard => "credit_card",
            AccountType::Loan => "loan",
            AccountType::Equity => "equity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(AccountType::Cash),
            "bank" => Some(AccountType::Bank),
            "credit_card" => Some(AccountType::CreditCard),
            "loan" => Some(AccountType::Loan),
            "equity" => Some(AccountType::Equity),
            _ => None,
        }
    }

    pub fn is_asset(&self) -> bool {
        matches!(self, AccountType::Cash | AccountType::Bank)
    }

    pub fn is_liability(&self) -> bool {
        matches!(self, AccountType::CreditCard | AccountType::Loan)
    }
}

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub id: i64,
    pub business_id: i64,
    pub name: String,
    pub account_type: AccountType,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub opening_balance: f64,
    /// Starts at the opening balance (`Ledger::create_account`)
    #[serde(default)]
    pub current_balance: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Account {
    pub fn new(business_id: i64, name: &str, account_type: AccountType, opening_balance: f64) -> Self {
        Account {
            id: 0,
            business_id,
            name: name.to_string(),
            account_type,
            currency: default_currency(),
            opening_balance,
            current_balance: opening_balance,
            created_at: Utc::now(),
        }
    }

    /// Move the balance by `delta` (positive = money in)
    pub fn apply_delta(&mut self, delta: f64) {
        if delta.is_finite() {
            self.current_balance = crate::bill::round_cents(self.current_balance + delta);
        }
    }

    pub fn is_overdrawn(&self) -> bool {
        self.account_type.is_asset() && self.current_balance < 0.0
    }
}

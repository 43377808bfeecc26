// 🏷️ Categories - product grouping and income/expense classification

use serde::{Deserialize, Serialize};

/// Whether an account category classifies money in or money out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Income,
    Expense,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Income => "income",
            CategoryKind::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "income" => Some(CategoryKind::Income),
            "expense" => Some(CategoryKind::Expense),
            _ => None,
        }
    }
}

/// Ledger category ("Sales", "Rent", "Utilities", ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCategory {
    #[serde(default)]
    pub id: i64,
    pub business_id: i64,
    pub name: String,
    pub kind: CategoryKind,
}

impl AccountCategory {
    pub fn new(business_id: i64, name: &str, kind: CategoryKind) -> Self {
        AccountCategory {
            id: 0,
            business_id,
            name: name.to_string(),
            kind,
        }
    }
}

/// Catalog grouping for products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCategory {
    #[serde(default)]
    pub id: i64,
    pub business_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ProductCategory {
    pub fn new(business_id: i64, name: &str) -> Self {
        ProductCategory {
            id: 0,
            business_id,
            name: name.to_string(),
            description: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_kind_roundtrip_str() {
        for kind in [CategoryKind::Income, CategoryKind::Expense] {
            assert_eq!(CategoryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CategoryKind::parse("INCOME"), Some(CategoryKind::Income));
        assert_eq!(CategoryKind::parse("transfer"), None);
    }

    #[test]
    fn test_account_category_json_shape() {
        let c = AccountCategory::new(3, "Rent", CategoryKind::Expense);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["businessId"], 3);
        assert_eq!(json["kind"], "expense");
    }
}

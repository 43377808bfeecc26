// 🧾 Transaction Entity - income/expense documents
//
// One table covers purchase bills, sales invoices, receipts and journal
// entries. Bills and invoices carry line items; receipts and journals only a
// total.
//
// Received quantity lives on the line item (`quantity_received`) and nowhere
// else. The metadata blob is for ad hoc fields only.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money in
    Income,

    /// Money out
    Expense,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "income" => Some(TransactionKind::Income),
            "expense" => Some(TransactionKind::Expense),
            _ => None,
        }
    }

    /// +1 for income, -1 for expense
    pub fn sign(&self) -> f64 {
        match self {
            TransactionKind::Income => 1.0,
            TransactionKind::Expense => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// Vendor invoice (purchase bill)
    Bill,

    /// Customer invoice (sale)
    Invoice,

    /// Cash receipt or payment without line items
    Receipt,

    /// Manual journal entry
    Journal,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Bill => "bill",
            DocumentType::Invoice => "invoice",
            DocumentType::Receipt => "receipt",
            DocumentType::Journal => "journal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bill" => Some(DocumentType::Bill),
            "invoice" => Some(DocumentType::Invoice),
            "receipt" => Some(DocumentType::Receipt),
            "journal" => Some(DocumentType::Journal),
            _ => None,
        }
    }

    /// Bills and invoices are itemised and track payment progress
    pub fn carries_items(&self) -> bool {
        matches!(self, DocumentType::Bill | DocumentType::Invoice)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentType::Bill => "PURCHASE BILL",
            DocumentType::Invoice => "INVOICE",
            DocumentType::Receipt => "RECEIPT",
            DocumentType::Journal => "JOURNAL ENTRY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxMode {
    #[default]
    None,

    /// Tax is added on top of the discounted line amount
    Exclusive,

    /// Line prices already include tax
    Inclusive,
}

impl TaxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxMode::None => "none",
            TaxMode::Exclusive => "exclusive",
            TaxMode::Inclusive => "inclusive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(TaxMode::None),
            "exclusive" => Some(TaxMode::Exclusive),
            "inclusive" => Some(TaxMode::Inclusive),
            _ => None,
        }
    }
}

/// Bill-level discount: `{"type":"flat","value":10}` or
/// `{"type":"percentage","value":5}`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Discount {
    #[default]
    None,
    Flat(f64),
    Percentage(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Draft,
    Partial,
    Completed,
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Partial => "partial",
            Status::Completed => "completed",
            Status::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Status::Draft),
            "partial" => Some(Status::Partial),
            "completed" => Some(Status::Completed),
            "cancelled" => Some(Status::Cancelled),
            _ => None,
        }
    }
}

// ============================================================================
// LINE ITEM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub description: String,
    pub quantity: f64,
    /// Units physically received (bills only), within `[0, quantity]`
    #[serde(default)]
    pub quantity_received: f64,
    pub unit_price: f64,
    /// Percent, e.g. `16.0`
    #[serde(default)]
    pub tax_rate: f64,
}

impl LineItem {
    pub fn new(product_id: Option<i64>, description: &str, quantity: f64, unit_price: f64) -> Self {
        LineItem {
            id: 0,
            product_id,
            description: description.to_string(),
            quantity,
            quantity_received: 0.0,
            unit_price,
            tax_rate: 0.0,
        }
    }

    pub fn with_tax_rate(mut self, rate: f64) -> Self {
        self.tax_rate = rate;
        self
    }

    /// Gross line amount before discount and tax
    pub fn amount(&self) -> f64 {
        crate::bill::coerce_quantity(self.quantity) * crate::bill::coerce_amount(self.unit_price)
    }
}

// ============================================================================
// TRANSACTION ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: i64,
    pub business_id: i64,
    pub kind: TransactionKind,
    pub document_type: DocumentType,
    #[serde(default)]
    pub document_number: String,
    /// Vendor for bills, customer for invoices
    #[serde(default)]
    pub contact_name: String,
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub category_id: Option<i64>,
    pub date: NaiveDate,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub discount: Discount,
    #[serde(default)]
    pub tax_mode: TaxMode,

    // Computed by the ledger on every write
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub discount_amount: f64,
    #[serde(default)]
    pub tax_amount: f64,
    #[serde(default)]
    pub total: f64,

    #[serde(default)]
    pub amount_paid: f64,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub cancelled: bool,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Bumped on each update; prior states live in transaction_versions
    #[serde(default)]
    pub version: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        business_id: i64,
        kind: TransactionKind,
        document_type: DocumentType,
        date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Transaction {
            id: 0,
            business_id,
            kind,
            document_type,
            document_number: String::new(),
            contact_name: String::new(),
            account_id: None,
            category_id: None,
            date,
            due_date: None,
            description: String::new(),
            items: Vec::new(),
            discount: Discount::None,
            tax_mode: TaxMode::None,
            subtotal: 0.0,
            discount_amount: 0.0,
            tax_amount: 0.0,
            total: 0.0,
            amount_paid: 0.0,
            status: Status::Draft,
            cancelled: false,
            metadata: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Purchase bill: expense + bill
    pub fn new_bill(business_id: i64, vendor: &str, date: NaiveDate) -> Self {
        let mut tx = Self::new(business_id, TransactionKind::Expense, DocumentType::Bill, date);
        tx.contact_name = vendor.to_string();
        tx
    }

    /// Sales invoice: income + invoice
    pub fn new_invoice(business_id: i64, customer: &str, date: NaiveDate) -> Self {
        let mut tx = Self::new(business_id, TransactionKind::Income, DocumentType::Invoice, date);
        tx.contact_name = customer.to_string();
        tx
    }

    pub fn is_bill(&self) -> bool {
        self.kind == TransactionKind::Expense && self.document_type == DocumentType::Bill
    }

    pub fn is_invoice(&self) -> bool {
        self.kind == TransactionKind::Income && self.document_type == DocumentType::Invoice
    }

    pub fn balance_due(&self) -> f64 {
        if self.cancelled {
            return 0.0;
        }
        crate::bill::round_cents((self.total - self.amount_paid).max(0.0))
    }

    /// Signed cash movement on `account_id` (income in, expense out).
    /// Cancelling a document returns its payments.
    pub fn cash_effect(&self) -> f64 {
        if self.cancelled {
            return 0.0;
        }
        self.kind.sign() * self.amount_paid
    }

    /// Stock movements per product: bills add received units, invoices
    /// remove ordered units. Cancelled documents move nothing.
    pub fn stock_effects(&self) -> Vec<(i64, f64)> {
        if self.cancelled {
            return Vec::new();
        }

        let mut effects: Vec<(i64, f64)> = Vec::new();
        for item in &self.items {
            let Some(product_id) = item.product_id else {
                continue;
            };
            let delta = if self.is_bill() {
                item.quantity_received
            } else if self.is_invoice() {
                -item.quantity
            } else {
                0.0
            };
            if delta == 0.0 {
                continue;
            }
            match effects.iter_mut().find(|(id, _)| *id == product_id) {
                Some(entry) => entry.1 += delta,
                None => effects.push((product_id, delta)),
            }
        }
        effects
    }

    pub fn item(&self, item_id: i64) -> Option<&LineItem> {
        self.items.iter().find(|i| i.id == item_id)
    }
}

// ============================================================================
// FILTER
// ============================================================================

/// Query filter for `Storage::list_transactions`. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub business_id: Option<i64>,
    pub kind: Option<TransactionKind>,
    pub document_type: Option<DocumentType>,
    pub status: Option<Status>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl TransactionFilter {
    pub fn for_business(business_id: i64) -> Self {
        TransactionFilter {
            business_id: Some(business_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        self.business_id.map_or(true, |b| tx.business_id == b)
            && self.kind.map_or(true, |k| tx.kind == k)
            && self.document_type.map_or(true, |d| tx.document_type == d)
            && self.status.map_or(true, |s| tx.status == s)
            && self.from.map_or(true, |from| tx.date >= from)
            && self.to.map_or(true, |to| tx.date <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_bill_deserializes_from_form_payload() {
        let json = serde_json::json!({
            "businessId": 1,
            "kind": "expense",
            "documentType": "bill",
            "contactName": "Acme Wholesale",
            "date": "2024-03-01",
            "items": [
                {"productId": 7, "quantity": 10, "unitPrice": 2.5, "taxRate": 16}
            ],
            "discount": {"type": "percentage", "value": 10},
            "taxMode": "exclusive"
        });

        let tx: Transaction = serde_json::from_value(json).unwrap();
        assert!(tx.is_bill());
        assert_eq!(tx.items.len(), 1);
        assert_eq!(tx.items[0].quantity_received, 0.0);
        assert_eq!(tx.discount, Discount::Percentage(10.0));
        assert_eq!(tx.tax_mode, TaxMode::Exclusive);
        assert_eq!(tx.status, Status::Draft);
    }

    #[test]
    fn test_discount_none_serializes_tag_only() {
        let json = serde_json::to_value(Discount::None).unwrap();
        assert_eq!(json, serde_json::json!({"type": "none"}));
    }

    #[test]
    fn test_stock_effects_bill_and_invoice() {
        let mut bill = Transaction::new_bill(1, "Vendor", date(2024, 1, 1));
        let mut a = LineItem::new(Some(1), "A", 10.0, 1.0);
        a.quantity_received = 4.0;
        let mut b = LineItem::new(Some(1), "A again", 5.0, 1.0);
        b.quantity_received = 5.0;
        let c = LineItem::new(None, "Freight", 1.0, 20.0);
        bill.items = vec![a, b, c];

        assert_eq!(bill.stock_effects(), vec![(1, 9.0)]);

        let mut invoice = Transaction::new_invoice(1, "Customer", date(2024, 1, 2));
        invoice.items = vec![LineItem::new(Some(2), "B", 3.0, 9.0)];
        assert_eq!(invoice.stock_effects(), vec![(2, -3.0)]);

        invoice.cancelled = true;
        assert!(invoice.stock_effects().is_empty());
    }

    #[test]
    fn test_cash_effect_sign() {
        let mut bill = Transaction::new_bill(1, "V", date(2024, 1, 1));
        bill.amount_paid = 30.0;
        assert_eq!(bill.cash_effect(), -30.0);

        let mut inv = Transaction::new_invoice(1, "C", date(2024, 1, 1));
        inv.amount_paid = 12.0;
        assert_eq!(inv.cash_effect(), 12.0);
    }

    #[test]
    fn test_filter_matches_inclusive_dates() {
        let tx = Transaction::new_bill(4, "V", date(2024, 5, 31));
        let mut filter = TransactionFilter::for_business(4);
        filter.from = Some(date(2024, 5, 1));
        filter.to = Some(date(2024, 5, 31));
        assert!(filter.matches(&tx));

        filter.to = Some(date(2024, 5, 30));
        assert!(!filter.matches(&tx));

        let other = TransactionFilter {
            document_type: Some(DocumentType::Invoice),
            ..Default::default()
        };
        assert!(!other.matches(&tx));
    }

    #[test]
    fn test_balance_due() {
        let mut bill = Transaction::new_bill(1, "V", date(2024, 1, 1));
        bill.total = 100.0;
        bill.amount_paid = 40.0;
        assert_eq!(bill.balance_due(), 60.0);

        bill.cancelled = true;
        assert_eq!(bill.balance_due(), 0.0);
    }
}

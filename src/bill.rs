// 🧮 Purchase Bill Rules - totals, received quantities, status
//
// Pure functions, no storage access. The ledger calls `recalculate` on
// every write so stored totals and status always follow from line items.
//
//   status = cancelled                        → cancelled
//          | fully received && fully paid     → completed
//          | anything received or paid        → partial
//          | otherwise                        → draft

use serde_json::Value;
use std::collections::BTreeMap;

use crate::entities::{Discount, DocumentType, LineItem, Status, TaxMode, Transaction};

/// Keys older clients wrote received quantities under. Read once by the
/// normalization migration, then removed.
pub const LEGACY_RECEIVED_MAP: &str = "receivedQuantities";
pub const LEGACY_RECEIVED_LIST: &str = "itemsReceived";
pub const LEGACY_RECEIVED_PREFIX: &str = "quantityReceived_";

/// Half a cent: payments within this of the total count as full
pub const PAYMENT_TOLERANCE: f64 = 0.005;

// ============================================================================
// NUMERIC COERCION
// ============================================================================

pub fn round_cents(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    (x * 100.0).round() / 100.0
}

/// NaN, infinities and negatives become 0
pub fn coerce_quantity(x: f64) -> f64 {
    if x.is_finite() && x > 0.0 {
        x
    } else {
        0.0
    }
}

pub fn coerce_amount(x: f64) -> f64 {
    coerce_quantity(x)
}

/// Received quantity clamped to `[0, ordered]`
pub fn clamp_received(received: f64, ordered: f64) -> f64 {
    coerce_quantity(received).min(coerce_quantity(ordered))
}

// ============================================================================
// TOTALS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BillTotals {
    pub subtotal: f64,
    pub discount_amount: f64,
    pub tax_amount: f64,
    pub total: f64,
}

/// Discount in currency units, capped to `[0, subtotal]`
pub fn discount_amount(discount: Discount, subtotal: f64) -> f64 {
    let subtotal = coerce_amount(subtotal);
    let raw = match discount {
        Discount::None => 0.0,
        Discount::Flat(amount) => coerce_amount(amount),
        Discount::Percentage(pct) => subtotal * coerce_amount(pct).min(100.0) / 100.0,
    };
    raw.min(subtotal)
}

pub fn compute_totals(items: &[LineItem], discount: Discount, tax_mode: TaxMode) -> BillTotals {
    let amounts: Vec<f64> = items.iter().map(LineItem::amount).collect();
    let subtotal: f64 = amounts.iter().sum();
    let discount = discount_amount(discount, subtotal);

    let mut tax = 0.0;
    if subtotal > 0.0 {
        for (item, amount) in items.iter().zip(&amounts) {
            // Discount is spread pro rata before tax
            let base = amount - discount * amount / subtotal;
            let rate = coerce_amount(item.tax_rate) / 100.0;
            tax += match tax_mode {
                TaxMode::None => 0.0,
                TaxMode::Exclusive => base * rate,
                TaxMode::Inclusive => base - base / (1.0 + rate),
            };
        }
    }

    let subtotal = round_cents(subtotal);
    let discount_amount = round_cents(discount);
    let tax_amount = round_cents(tax);
    let added_tax = if tax_mode == TaxMode::Exclusive { tax_amount } else { 0.0 };

    BillTotals {
        subtotal,
        discount_amount,
        tax_amount,
        total: round_cents(subtotal - discount_amount + added_tax),
    }
}

/// `(ordered, received)` unit totals
pub fn received_totals(items: &[LineItem]) -> (f64, f64) {
    items.iter().fold((0.0, 0.0), |(ordered, received), item| {
        (
            ordered + coerce_quantity(item.quantity),
            received + clamp_received(item.quantity_received, item.quantity),
        )
    })
}

pub fn is_fully_paid(total: f64, paid: f64) -> bool {
    total <= 0.0 || coerce_amount(paid) + PAYMENT_TOLERANCE >= total
}

pub fn derive_status(cancelled: bool, ordered: f64, received: f64, total: f64, paid: f64) -> Status {
    if cancelled {
        return Status::Cancelled;
    }

    let fully_received = ordered > 0.0 && received >= ordered;
    if fully_received && is_fully_paid(total, paid) {
        Status::Completed
    } else if received > 0.0 || coerce_amount(paid) > 0.0 {
        Status::Partial
    } else {
        Status::Draft
    }
}

// ============================================================================
// WHOLE-DOCUMENT RECALCULATION
// ============================================================================

/// Normalizes line items and recomputes totals and status in place.
///
/// Itemised documents derive their totals from the items. Documents without
/// items keep the entered `total`. Receipts and journals are settled on
/// entry, so `amount_paid` follows `total`.
pub fn recalculate(tx: &mut Transaction) {
    for item in tx.items.iter_mut() {
        item.quantity = coerce_quantity(item.quantity);
        item.unit_price = coerce_amount(item.unit_price);
        item.tax_rate = coerce_amount(item.tax_rate);
        item.quantity_received = if tx.document_type == DocumentType::Bill {
            clamp_received(item.quantity_received, item.quantity)
        } else {
            0.0
        };
    }

    if tx.document_type.carries_items() && !tx.items.is_empty() {
        let totals = compute_totals(&tx.items, tx.discount, tx.tax_mode);
        tx.subtotal = totals.subtotal;
        tx.discount_amount = totals.discount_amount;
        tx.tax_amount = totals.tax_amount;
        tx.total = totals.total;
    } else {
        let total = round_cents(coerce_amount(tx.total));
        tx.subtotal = total;
        tx.discount_amount = 0.0;
        tx.tax_amount = 0.0;
        tx.total = total;
    }

    tx.amount_paid = if tx.document_type.carries_items() {
        round_cents(coerce_amount(tx.amount_paid))
    } else {
        tx.total
    };

    tx.status = document_status(tx);
}

fn document_status(tx: &Transaction) -> Status {
    if tx.cancelled {
        return Status::Cancelled;
    }
    if !tx.document_type.carries_items() {
        return Status::Completed;
    }
    if tx.items.is_empty() && tx.total <= 0.0 {
        return Status::Draft;
    }

    // Only bills track receipt of goods; everything else settles on payment
    let (ordered, received) = if tx.is_bill() && !tx.items.is_empty() {
        received_totals(&tx.items)
    } else if is_fully_paid(tx.total, tx.amount_paid) {
        (1.0, 1.0)
    } else {
        (1.0, 0.0)
    };

    derive_status(false, ordered, received, tx.total, tx.amount_paid)
}

// ============================================================================
// LEGACY RECEIVED-QUANTITY ENCODINGS
// ============================================================================

fn json_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    Some(if n.is_nan() { 0.0 } else { n })
}

/// Received quantity for the item at `index` from the old metadata shapes.
///
/// Precedence: `receivedQuantities` map, then `itemsReceived` list (by
/// product id, or by position for entries without one), then flat
/// `quantityReceived_<productId>` keys.
pub fn legacy_received_quantity(
    metadata: &BTreeMap<String, Value>,
    product_id: Option<i64>,
    index: usize,
) -> Option<f64> {
    if let (Some(pid), Some(Value::Object(map))) = (product_id, metadata.get(LEGACY_RECEIVED_MAP)) {
        if let Some(q) = map.get(&pid.to_string()).and_then(json_number) {
            return Some(q);
        }
    }

    if let Some(Value::Array(list)) = metadata.get(LEGACY_RECEIVED_LIST) {
        let by_product = product_id.and_then(|pid| {
            list.iter().find(|entry| {
                entry.get("productId").and_then(json_number).map(|p| p as i64) == Some(pid)
            })
        });
        let entry = by_product.or_else(|| list.get(index).filter(|e| e.get("productId").is_none()));
        if let Some(q) = entry.and_then(|e| e.get("quantityReceived")).and_then(json_number) {
            return Some(q);
        }
    }

    product_id.and_then(|pid| {
        metadata
            .get(&format!("{}{}", LEGACY_RECEIVED_PREFIX, pid))
            .and_then(json_number)
    })
}

pub fn has_legacy_received(metadata: &BTreeMap<String, Value>) -> bool {
    metadata.keys().any(|k| is_legacy_key(k))
}

fn is_legacy_key(key: &str) -> bool {
    key == LEGACY_RECEIVED_MAP || key == LEGACY_RECEIVED_LIST || key.starts_with(LEGACY_RECEIVED_PREFIX)
}

/// Removes every legacy key. Returns whether anything was removed.
pub fn strip_legacy_received(metadata: &mut BTreeMap<String, Value>) -> bool {
    let before = metadata.len();
    metadata.retain(|k, _| !is_legacy_key(k));
    metadata.len() != before
}

/// Moves legacy received quantities onto the line items (clamped) and
/// strips the legacy keys. Returns whether the transaction changed.
pub fn absorb_legacy_received(tx: &mut Transaction) -> bool {
    if !has_legacy_received(&tx.metadata) {
        return false;
    }

    if tx.is_bill() {
        for (index, item) in tx.items.iter_mut().enumerate() {
            if let Some(q) = legacy_received_quantity(&tx.metadata, item.product_id, index) {
                item.quantity_received = clamp_received(q, item.quantity);
            }
        }
    }

    strip_legacy_received(&mut tx.metadata);
    true
}

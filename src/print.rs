// 🖨️ Bill printing - fixed-width plain text
//
// Output is meant for receipt printers and `text/plain` responses, so it
// stays within WIDTH columns and uses no control characters.

use std::fmt::Write;

use crate::entities::{Business, DocumentType, TaxMode, Transaction};

pub const WIDTH: usize = 72;
const DESCRIPTION_WIDTH: usize = 26;

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}~", cut)
    }
}

fn centered(s: &str) -> String {
    let s = truncate(s, WIDTH);
    let pad = (WIDTH - s.chars().count()) / 2;
    format!("{}{}", " ".repeat(pad), s)
}

/// Left text and right text on one line, right text flush to WIDTH
fn spread(left: &str, right: &str) -> String {
    let used = left.chars().count() + right.chars().count();
    let gap = WIDTH.saturating_sub(used).max(1);
    format!("{}{}{}", left, " ".repeat(gap), right)
}

fn money(currency: &str, amount: f64) -> String {
    format!("{} {:.2}", currency, amount)
}

fn quantity(q: f64) -> String {
    if q.fract() == 0.0 {
        format!("{:.0}", q)
    } else {
        format!("{:.2}", q)
    }
}

pub fn render_bill(business: &Business, tx: &Transaction) -> String {
    let rule = "=".repeat(WIDTH);
    let thin = "-".repeat(WIDTH);
    let currency = business.currency.as_str();
    let mut out = String::new();

    // writeln! into a String cannot fail
    let mut line = |s: &str| {
        let _ = writeln!(out, "{}", s);
    };

    line(&rule);
    line(&centered(&business.name));
    if !business.address.is_empty() {
        line(&centered(&business.address));
    }
    if !business.tax_id.is_empty() {
        line(&centered(&format!("Tax ID: {}", business.tax_id)));
    }
    line(&rule);

    let number = if tx.document_number.is_empty() {
        format!("#{}", tx.id)
    } else {
        tx.document_number.clone()
    };
    line(&spread(tx.document_type.label(), &format!("No. {}", number)));

    let contact_label = match tx.document_type {
        DocumentType::Bill => "Vendor",
        DocumentType::Invoice => "Customer",
        _ => "Contact",
    };
    line(&spread(
        &format!("{}: {}", contact_label, tx.contact_name),
        &format!("Date: {}", tx.date.format("%Y-%m-%d")),
    ));
    if let Some(due) = tx.due_date {
        line(&spread("", &format!("Due: {}", due.format("%Y-%m-%d"))));
    }
    if !tx.description.is_empty() {
        line(&truncate(&tx.description, WIDTH));
    }
    line(&thin);

    if !tx.items.is_empty() {
        line(&format!(
            "{:<26} {:>8} {:>8} {:>12} {:>13}",
            "Description", "Ordered", "Received", "Unit Price", "Amount"
        ));
        line(&thin);
        for item in &tx.items {
            let received = if tx.document_type == DocumentType::Bill {
                quantity(item.quantity_received)
            } else {
                "-".to_string()
            };
            line(&format!(
                "{:<26} {:>8} {:>8} {:>12.2} {:>13.2}",
                truncate(&item.description, DESCRIPTION_WIDTH),
                quantity(item.quantity),
                received,
                item.unit_price,
                item.amount()
            ));
        }
        line(&thin);
    }

    line(&spread("Subtotal:", &money(currency, tx.subtotal)));
    if tx.discount_amount > 0.0 {
        line(&spread("Discount:", &money(currency, -tx.discount_amount)));
    }
    match tx.tax_mode {
        TaxMode::None => {}
        TaxMode::Exclusive => line(&spread("Tax:", &money(currency, tx.tax_amount))),
        TaxMode::Inclusive => line(&spread(
            "Tax (included):",
            &money(currency, tx.tax_amount),
        )),
    }
    line(&spread("TOTAL:", &money(currency, tx.total)));
    line(&spread("Paid:", &money(currency, tx.amount_paid)));
    line(&spread("Balance due:", &money(currency, tx.balance_due())));
    line(&thin);
    line(&format!("Status: {}", tx.status.as_str().to_uppercase()));
    line(&rule);

    out
}

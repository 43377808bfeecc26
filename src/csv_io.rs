// CSV import (products) and export (transactions)

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::entities::{Product, Transaction};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct ProductRow {
    name: String,
    #[serde(default)]
    sku: String,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    cost_price: f64,
    #[serde(default)]
    sale_price: f64,
    #[serde(default)]
    stock_quantity: f64,
    #[serde(default)]
    reorder_level: f64,
}

/// Reads `name,sku,unit,cost_price,sale_price,stock_quantity,reorder_level`.
/// Rows come back unsaved (id 0) for `business_id`.
pub fn load_products_csv(path: &Path, business_id: i64) -> Result<Vec<Product>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;

    let mut products = Vec::new();
    for (index, result) in rdr.deserialize().enumerate() {
        let row: ProductRow = result?;
        if row.name.is_empty() {
            // +2: header line, 1-based
            return Err(Error::validation(format!("row {}: name is required", index + 2)));
        }

        let mut product = Product::new(business_id, &row.name, row.cost_price, row.sale_price);
        product.sku = row.sku;
        if !row.unit.is_empty() {
            product.unit = row.unit;
        }
        product.stock_quantity = row.stock_quantity;
        product.reorder_level = row.reorder_level;
        products.push(product);
    }

    tracing::info!("loaded {} products from {}", products.len(), path.display());
    Ok(products)
}

#[derive(Debug, Serialize)]
struct TransactionRow<'a> {
    id: i64,
    date: String,
    kind: &'a str,
    document_type: &'a str,
    document_number: &'a str,
    contact_name: &'a str,
    status: &'a str,
    subtotal: f64,
    discount_amount: f64,
    tax_amount: f64,
    total: f64,
    amount_paid: f64,
    balance_due: f64,
}

/// One row per transaction. Returns the number of rows written.
pub fn write_transactions_csv<W: Write>(writer: W, transactions: &[Transaction]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for tx in transactions {
        wtr.serialize(TransactionRow {
            id: tx.id,
            date: tx.date.format("%Y-%m-%d").to_string(),
            kind: tx.kind.as_str(),
            document_type: tx.document_type.as_str(),
            document_number: &tx.document_number,
            contact_name: &tx.contact_name,
            status: tx.status.as_str(),
            subtotal: tx.subtotal,
            discount_amount: tx.discount_amount,
            tax_amount: tx.tax_amount,
            total: tx.total,
            amount_paid: tx.amount_paid,
            balance_due: tx.balance_due(),
        })?;
    }
    wtr.flush()?;
    Ok(transactions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill;
    use crate::entities::LineItem;
    use chrono::NaiveDate;
    use std::fs;

    #[test]
    fn test_load_products_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.csv");
        fs::write(
            &path,
            "name,sku,unit,cost_price,sale_price,stock_quantity,reorder_level\n\
             Flour, FL-1 ,kg,1.20,2.00,40,10\n\
             Sugar,SG-1,,0.8,1.5,5,8\n",
        )
        .unwrap();

        let products = load_products_csv(&path, 3).unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].sku, "FL-1");
        assert_eq!(products[0].unit, "kg");
        assert_eq!(products[0].business_id, 3);
        assert_eq!(products[1].unit, "pcs");
        assert!(products[1].is_low_stock());
    }

    #[test]
    fn test_load_products_csv_requires_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "name,sku\nFlour,F\n,X\n").unwrap();

        let err = load_products_csv(&path, 1).unwrap_err();
        assert!(err.to_string().contains("row 3"));
    }

    #[test]
    fn test_write_transactions_csv() {
        let mut tx = Transaction::new_bill(1, "Acme, Inc.", NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        tx.id = 12;
        tx.items = vec![LineItem::new(None, "Boxes", 2.0, 5.0)];
        tx.amount_paid = 4.0;
        bill::recalculate(&mut tx);

        let mut buf = Vec::new();
        let n = write_transactions_csv(&mut buf, &[tx]).unwrap();
        assert_eq!(n, 1);

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("id,date,kind,document_type"));
        assert_eq!(
            lines.next().unwrap(),
            "12,2024-03-09,expense,bill,,\"Acme, Inc.\",partial,10.0,0.0,0.0,10.0,4.0,6.0"
        );
    }
}

// 🗄️ Schema & Migrations
//
// `setup_database` is safe to run on every start: tables use IF NOT EXISTS
// and each migration checks before it alters anything.

use rusqlite::{params, Connection};

use crate::bill;
use crate::entities::TransactionVersion;
use crate::error::Result;
use crate::storage::sqlite::{insert_version_row, load_transactions, write_transaction_rows};

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery (in-memory databases silently stay in "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS businesses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            currency TEXT NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            tax_id TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id INTEGER NOT NULL REFERENCES businesses(id),
            name TEXT NOT NULL,
            sku TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            unit TEXT NOT NULL DEFAULT 'pcs',
            cost_price REAL NOT NULL DEFAULT 0,
            sale_price REAL NOT NULL DEFAULT 0,
            stock_quantity REAL NOT NULL DEFAULT 0,
            reorder_level REAL NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS account_categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id INTEGER NOT NULL REFERENCES businesses(id),
            name TEXT NOT NULL,
            kind TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id INTEGER NOT NULL REFERENCES businesses(id),
            name TEXT NOT NULL,
            account_type TEXT NOT NULL,
            currency TEXT NOT NULL,
            opening_balance REAL NOT NULL DEFAULT 0,
            current_balance REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id INTEGER NOT NULL REFERENCES businesses(id),
            kind TEXT NOT NULL,
            document_type TEXT NOT NULL,
            document_number TEXT NOT NULL DEFAULT '',
            contact_name TEXT NOT NULL DEFAULT '',
            account_id INTEGER REFERENCES accounts(id) ON DELETE SET NULL,
            category_id INTEGER REFERENCES account_categories(id) ON DELETE SET NULL,
            date TEXT NOT NULL,
            due_date TEXT,
            description TEXT NOT NULL DEFAULT '',
            discount TEXT NOT NULL DEFAULT '{\"type\":\"none\"}',
            tax_mode TEXT NOT NULL DEFAULT 'none',
            subtotal REAL NOT NULL DEFAULT 0,
            discount_amount REAL NOT NULL DEFAULT 0,
            tax_amount REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            amount_paid REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'draft',
            cancelled INTEGER NOT NULL DEFAULT 0,
            metadata TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transaction_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            product_id INTEGER REFERENCES products(id) ON DELETE SET NULL,
            description TEXT NOT NULL DEFAULT '',
            quantity REAL NOT NULL,
            unit_price REAL NOT NULL,
            tax_rate REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS transaction_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
            version INTEGER NOT NULL,
            snapshot TEXT NOT NULL,
            change_reason TEXT,
            checksum TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transfers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id INTEGER NOT NULL REFERENCES businesses(id),
            from_account_id INTEGER NOT NULL REFERENCES accounts(id),
            to_account_id INTEGER NOT NULL REFERENCES accounts(id),
            amount REAL NOT NULL,
            date TEXT NOT NULL,
            note TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id INTEGER REFERENCES businesses(id) ON DELETE SET NULL,
            username TEXT UNIQUE NOT NULL,
            display_name TEXT NOT NULL DEFAULT '',
            role TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id INTEGER NOT NULL REFERENCES businesses(id),
            customer_name TEXT NOT NULL DEFAULT '',
            messages TEXT NOT NULL DEFAULT '[]',
            cart TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'open',
            order_transaction_id INTEGER REFERENCES transactions(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_products_business ON products(business_id);
        CREATE INDEX IF NOT EXISTS idx_accounts_business ON accounts(business_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_business_date ON transactions(business_id, date);
        CREATE INDEX IF NOT EXISTS idx_items_transaction ON transaction_items(transaction_id);
        CREATE INDEX IF NOT EXISTS idx_versions_transaction ON transaction_versions(transaction_id, version);
        CREATE INDEX IF NOT EXISTS idx_transfers_business ON transfers(business_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_business ON conversations(business_id);",
    )?;

    migrate_add_product_categories(conn)?;
    ensure_column(
        conn,
        "transaction_items",
        "quantity_received",
        "REAL NOT NULL DEFAULT 0",
    )?;

    Ok(())
}

/// True when `table` already has `column`
pub fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|n| n == column))
}

/// ALTER TABLE ADD COLUMN unless it exists. Returns whether it was added.
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<bool> {
    if has_column(conn, table, column)? {
        return Ok(false);
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
        [],
    )?;
    tracing::info!("added column {}.{}", table, column);
    Ok(true)
}

/// Product categories table plus `products.category_id`
pub fn migrate_add_product_categories(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS product_categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id INTEGER NOT NULL REFERENCES businesses(id),
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_product_categories_business ON product_categories(business_id)",
        [],
    )?;

    ensure_column(
        conn,
        "products",
        "category_id",
        "INTEGER REFERENCES product_categories(id) ON DELETE SET NULL",
    )?;

    Ok(())
}

/// Moves received quantities out of the legacy metadata encodings and onto
/// `transaction_items.quantity_received`, then recomputes status.
///
/// Each changed bill gets a version snapshot of its prior state. Stock is
/// not touched. Returns the number of bills changed; a second run returns 0.
pub fn migrate_normalize_received_quantities(conn: &mut Connection) -> Result<usize> {
    let txn = conn.transaction()?;

    let candidates = load_transactions(
        &txn,
        "WHERE metadata LIKE '%quantityReceived%' OR metadata LIKE '%receivedQuantities%' OR metadata LIKE '%itemsReceived%'",
        &[],
    )?;

    let mut changed = 0;
    for before in candidates {
        let mut after = before.clone();
        if !bill::absorb_legacy_received(&mut after) {
            continue;
        }
        bill::recalculate(&mut after);
        after.version = before.version + 1;
        after.updated_at = chrono::Utc::now();

        let snapshot = TransactionVersion::capture(
            &before,
            Some("normalized received quantities".to_string()),
        )?;
        insert_version_row(&txn, &snapshot)?;
        write_transaction_rows(&txn, &after)?;
        changed += 1;
    }

    txn.commit()?;
    tracing::info!("normalized received quantities on {} transactions", changed);
    Ok(changed)
}

/// Row counts per table, for the admin CLI
pub fn table_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let tables = [
        "businesses",
        "products",
        "product_categories",
        "accounts",
        "account_categories",
        "transactions",
        "transaction_items",
        "transaction_versions",
        "transfers",
        "users",
        "conversations",
    ];

    let mut counts = Vec::with_capacity(tables.len());
    for table in tables {
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), params![], |row| row.get(0))?;
        counts.push((table.to_string(), count));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::{LEGACY_RECEIVED_LIST, LEGACY_RECEIVED_MAP};
    use crate::entities::{Business, LineItem, Product, Status, Transaction};
    use crate::storage::{DatabaseStorage, Storage};
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        assert!(has_column(&conn, "products", "category_id").unwrap());
        assert!(has_column(&conn, "transaction_items", "quantity_received").unwrap());
    }

    #[test]
    fn test_product_categories_added_to_legacy_schema() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE businesses (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL,
                currency TEXT NOT NULL, address TEXT NOT NULL DEFAULT '', phone TEXT NOT NULL DEFAULT '',
                tax_id TEXT NOT NULL DEFAULT '', created_at TEXT NOT NULL);
             CREATE TABLE products (id INTEGER PRIMARY KEY AUTOINCREMENT, business_id INTEGER NOT NULL,
                name TEXT NOT NULL);",
        )
        .unwrap();
        assert!(!has_column(&conn, "products", "category_id").unwrap());

        migrate_add_product_categories(&conn).unwrap();
        migrate_add_product_categories(&conn).unwrap();

        assert!(has_column(&conn, "products", "category_id").unwrap());
        assert!(has_column(&conn, "product_categories", "name").unwrap());
    }

    #[test]
    fn test_normalize_received_quantities() {
        let storage = DatabaseStorage::in_memory().unwrap();
        let b = storage.create_business(Business::new("Shop", "USD")).unwrap();
        let p = storage.create_product(Product::new(b.id, "Flour", 1.0, 2.0)).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let mut legacy = Transaction::new_bill(b.id, "Mill", date);
        legacy.items = vec![
            LineItem::new(Some(p.id), "Flour", 10.0, 1.0),
            LineItem::new(None, "Freight", 1.0, 5.0),
        ];
        legacy.metadata.insert(LEGACY_RECEIVED_MAP.into(), json!({ p.id.to_string(): "12" }));
        legacy.metadata.insert(
            LEGACY_RECEIVED_LIST.into(),
            json!([{"productId": p.id, "quantityReceived": 1}, {"quantityReceived": 1}]),
        );
        legacy.metadata.insert("dueNote".into(), json!("net 30"));
        legacy.version = 1;
        let stored = storage.create_transaction(legacy).unwrap();

        let changed = storage
            .with_connection(|conn| migrate_normalize_received_quantities(conn))
            .unwrap();
        assert_eq!(changed, 1);

        let after = storage.get_transaction(stored.id).unwrap().unwrap();
        assert_eq!(after.items[0].quantity_received, 10.0, "clamped to ordered");
        assert_eq!(after.items[1].quantity_received, 1.0, "positional fallback");
        assert_eq!(after.status, Status::Partial);
        assert_eq!(after.version, 2);
        assert!(after.metadata.contains_key("dueNote"));
        assert!(!bill::has_legacy_received(&after.metadata));

        let versions = storage.list_transaction_versions(stored.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);

        let again = storage
            .with_connection(|conn| migrate_normalize_received_quantities(conn))
            .unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn test_table_counts() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let counts = table_counts(&conn).unwrap();
        assert!(counts.iter().all(|(_, n)| *n == 0));
        assert_eq!(counts.len(), 11);
    }
}

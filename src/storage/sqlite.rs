// SQLite backend
//
// One connection behind a Mutex, same as the API server's shared state.
// Enums are stored as their lowercase names, structured fields (discount,
// metadata, messages, cart, version snapshots) as JSON text.

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::{Effects, Storage};
use crate::db::setup_database;
use crate::entities::{
    Account, AccountCategory, AccountType, Business, CategoryKind, Conversation,
    ConversationStatus, DocumentType, LineItem, Product, ProductCategory, Role, Status, TaxMode,
    Transaction, TransactionFilter, TransactionKind, TransactionVersion, Transfer, User,
};
use crate::error::{Error, Result};

pub struct DatabaseStorage {
    conn: Mutex<Connection>,
}

impl DatabaseStorage {
    /// Opens (or creates) the database file and brings the schema up to date
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        tracing::info!("database opened: {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        DatabaseStorage {
            conn: Mutex::new(conn),
        }
    }

    /// Direct access for migrations and maintenance
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let mut conn = self.conn.lock()?;
        f(&mut conn)
    }
}

// ============================================================================
// COLUMN HELPERS
// ============================================================================

fn text_enum<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown value {:?}", raw).into(),
        )
    })
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Constraint violations surface as `Conflict`, everything else as-is
fn write_error(e: rusqlite::Error, context: &str) -> Error {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        if err.code == ErrorCode::ConstraintViolation {
            return Error::Conflict(format!("{}: {}", context, e));
        }
    }
    e.into()
}

fn require_row(conn: &Connection, table: &str, entity: &'static str, id: i64) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE id = ?1", table),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    found.map(|_| ()).ok_or_else(|| Error::not_found(entity, id))
}

fn expect_changed(changed: usize, entity: &'static str, id: i64) -> Result<()> {
    if changed == 0 {
        Err(Error::not_found(entity, id))
    } else {
        Ok(())
    }
}

fn delete_row(conn: &Connection, table: &str, entity: &'static str, id: i64) -> Result<()> {
    let changed = conn
        .execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])
        .map_err(|e| write_error(e, &format!("{} {} is still referenced", entity, id)))?;
    expect_changed(changed, entity, id)
}

// ============================================================================
// ROW MAPPERS
// ============================================================================

const BUSINESS_COLUMNS: &str = "id, name, currency, address, phone, tax_id, created_at";

fn map_business(row: &Row) -> rusqlite::Result<Business> {
    Ok(Business {
        id: row.get(0)?,
        name: row.get(1)?,
        currency: row.get(2)?,
        address: row.get(3)?,
        phone: row.get(4)?,
        tax_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const PRODUCT_COLUMNS: &str = "id, business_id, category_id, name, sku, description, unit,
    cost_price, sale_price, stock_quantity, reorder_level, active, created_at, updated_at";

fn map_product(row: &Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        business_id: row.get(1)?,
        category_id: row.get(2)?,
        name: row.get(3)?,
        sku: row.get(4)?,
        description: row.get(5)?,
        unit: row.get(6)?,
        cost_price: row.get(7)?,
        sale_price: row.get(8)?,
        stock_quantity: row.get(9)?,
        reorder_level: row.get(10)?,
        active: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn map_product_category(row: &Row) -> rusqlite::Result<ProductCategory> {
    Ok(ProductCategory {
        id: row.get(0)?,
        business_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
    })
}

fn map_account_category(row: &Row) -> rusqlite::Result<AccountCategory> {
    Ok(AccountCategory {
        id: row.get(0)?,
        business_id: row.get(1)?,
        name: row.get(2)?,
        kind: text_enum(row, 3, CategoryKind::parse)?,
    })
}

const ACCOUNT_COLUMNS: &str =
    "id, business_id, name, account_type, currency, opening_balance, current_balance, created_at";

fn map_account(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        business_id: row.get(1)?,
        name: row.get(2)?,
        account_type: text_enum(row, 3, AccountType::parse)?,
        currency: row.get(4)?,
        opening_balance: row.get(5)?,
        current_balance: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const TRANSACTION_COLUMNS: &str = "id, business_id, kind, document_type, document_number,
    contact_name, account_id, category_id, date, due_date, description, discount, tax_mode,
    subtotal, discount_amount, tax_amount, total, amount_paid, status, cancelled, metadata,
    version, created_at, updated_at";

/// Header row only; items are loaded separately
fn map_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let metadata: Option<String> = row.get(20)?;
    let metadata: BTreeMap<String, serde_json::Value> = match metadata {
        Some(json) => serde_json::from_str(&json).unwrap_or_default(),
        None => BTreeMap::new(),
    };

    Ok(Transaction {
        id: row.get(0)?,
        business_id: row.get(1)?,
        kind: text_enum(row, 2, TransactionKind::parse)?,
        document_type: text_enum(row, 3, DocumentType::parse)?,
        document_number: row.get(4)?,
        contact_name: row.get(5)?,
        account_id: row.get(6)?,
        category_id: row.get(7)?,
        date: row.get(8)?,
        due_date: row.get(9)?,
        description: row.get(10)?,
        items: Vec::new(),
        discount: json_column(row, 11)?,
        tax_mode: text_enum(row, 12, TaxMode::parse)?,
        subtotal: row.get(13)?,
        discount_amount: row.get(14)?,
        tax_amount: row.get(15)?,
        total: row.get(16)?,
        amount_paid: row.get(17)?,
        status: text_enum(row, 18, Status::parse)?,
        cancelled: row.get(19)?,
        metadata,
        version: row.get(21)?,
        created_at: row.get(22)?,
        updated_at: row.get(23)?,
    })
}

fn map_item(row: &Row) -> rusqlite::Result<LineItem> {
    Ok(LineItem {
        id: row.get(0)?,
        product_id: row.get(1)?,
        description: row.get(2)?,
        quantity: row.get(3)?,
        quantity_received: row.get(4)?,
        unit_price: row.get(5)?,
        tax_rate: row.get(6)?,
    })
}

const VERSION_COLUMNS: &str =
    "id, transaction_id, version, snapshot, change_reason, checksum, created_at";

fn map_version(row: &Row) -> rusqlite::Result<TransactionVersion> {
    Ok(TransactionVersion {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        version: row.get(2)?,
        snapshot: json_column(row, 3)?,
        change_reason: row.get(4)?,
        checksum: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const TRANSFER_COLUMNS: &str =
    "id, business_id, from_account_id, to_account_id, amount, date, note, created_at";

fn map_transfer(row: &Row) -> rusqlite::Result<Transfer> {
    Ok(Transfer {
        id: row.get(0)?,
        business_id: row.get(1)?,
        from_account_id: row.get(2)?,
        to_account_id: row.get(3)?,
        amount: row.get(4)?,
        date: row.get(5)?,
        note: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const USER_COLUMNS: &str =
    "id, business_id, username, display_name, role, password_hash, created_at";

fn map_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        business_id: row.get(1)?,
        username: row.get(2)?,
        display_name: row.get(3)?,
        role: text_enum(row, 4, Role::parse)?,
        password_hash: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const CONVERSATION_COLUMNS: &str = "id, business_id, customer_name, messages, cart, status,
    order_transaction_id, created_at, updated_at";

fn map_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        business_id: row.get(1)?,
        customer_name: row.get(2)?,
        messages: json_column(row, 3)?,
        cart: json_column(row, 4)?,
        status: text_enum(row, 5, ConversationStatus::parse)?,
        order_transaction_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn query_all<T>(
    conn: &Connection,
    sql: &str,
    args: &[&dyn ToSql],
    map: fn(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_one<T>(
    conn: &Connection,
    sql: &str,
    args: &[&dyn ToSql],
    map: fn(&Row) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    Ok(conn.query_row(sql, args, map).optional()?)
}

// ============================================================================
// TRANSACTION ROWS (shared with migrations)
// ============================================================================

fn load_items(conn: &Connection, transaction_id: i64) -> Result<Vec<LineItem>> {
    query_all(
        conn,
        "SELECT id, product_id, description, quantity, quantity_received, unit_price, tax_rate
         FROM transaction_items
         WHERE transaction_id = ?1
         ORDER BY position, id",
        &[&transaction_id],
        map_item,
    )
}

/// Transactions with their items. `where_sql` may be empty.
pub(crate) fn load_transactions(
    conn: &Connection,
    where_sql: &str,
    args: &[&dyn ToSql],
) -> Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions {} ORDER BY date, id",
        TRANSACTION_COLUMNS, where_sql
    );
    let mut transactions = query_all(conn, &sql, args, map_transaction)?;
    for tx in transactions.iter_mut() {
        tx.items = load_items(conn, tx.id)?;
    }
    Ok(transactions)
}

fn replace_items(conn: &Connection, tx: &mut Transaction) -> Result<()> {
    conn.execute(
        "DELETE FROM transaction_items WHERE transaction_id = ?1",
        [tx.id],
    )?;

    for (position, item) in tx.items.iter_mut().enumerate() {
        let id: Option<i64> = if item.id > 0 { Some(item.id) } else { None };
        conn.execute(
            "INSERT INTO transaction_items (
                id, transaction_id, position, product_id, description,
                quantity, quantity_received, unit_price, tax_rate
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                tx.id,
                position as i64,
                item.product_id,
                item.description,
                item.quantity,
                item.quantity_received,
                item.unit_price,
                item.tax_rate,
            ],
        )
        .map_err(|e| write_error(e, "line item"))?;
        item.id = conn.last_insert_rowid();
    }
    Ok(())
}

fn insert_transaction_rows(conn: &Connection, mut tx: Transaction) -> Result<Transaction> {
    conn.execute(
        "INSERT INTO transactions (
            business_id, kind, document_type, document_number, contact_name,
            account_id, category_id, date, due_date, description, discount, tax_mode,
            subtotal, discount_amount, tax_amount, total, amount_paid, status, cancelled,
            metadata, version, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
        params![
            tx.business_id,
            tx.kind.as_str(),
            tx.document_type.as_str(),
            tx.document_number,
            tx.contact_name,
            tx.account_id,
            tx.category_id,
            tx.date,
            tx.due_date,
            tx.description,
            serde_json::to_string(&tx.discount)?,
            tx.tax_mode.as_str(),
            tx.subtotal,
            tx.discount_amount,
            tx.tax_amount,
            tx.total,
            tx.amount_paid,
            tx.status.as_str(),
            tx.cancelled,
            serde_json::to_string(&tx.metadata)?,
            tx.version,
            tx.created_at,
            tx.updated_at,
        ],
    )
    .map_err(|e| write_error(e, "transaction"))?;

    tx.id = conn.last_insert_rowid();
    for item in tx.items.iter_mut() {
        item.id = 0;
    }
    replace_items(conn, &mut tx)?;
    Ok(tx)
}

/// Overwrites the header row and replaces the items of an existing
/// transaction. Item ids are kept; new items get fresh ids.
pub(crate) fn write_transaction_rows(conn: &Connection, tx: &Transaction) -> Result<Transaction> {
    let changed = conn
        .execute(
            "UPDATE transactions SET
                business_id = ?2, kind = ?3, document_type = ?4, document_number = ?5,
                contact_name = ?6, account_id = ?7, category_id = ?8, date = ?9, due_date = ?10,
                description = ?11, discount = ?12, tax_mode = ?13, subtotal = ?14,
                discount_amount = ?15, tax_amount = ?16, total = ?17, amount_paid = ?18,
                status = ?19, cancelled = ?20, metadata = ?21, version = ?22, updated_at = ?23
             WHERE id = ?1",
            params![
                tx.id,
                tx.business_id,
                tx.kind.as_str(),
                tx.document_type.as_str(),
                tx.document_number,
                tx.contact_name,
                tx.account_id,
                tx.category_id,
                tx.date,
                tx.due_date,
                tx.description,
                serde_json::to_string(&tx.discount)?,
                tx.tax_mode.as_str(),
                tx.subtotal,
                tx.discount_amount,
                tx.tax_amount,
                tx.total,
                tx.amount_paid,
                tx.status.as_str(),
                tx.cancelled,
                serde_json::to_string(&tx.metadata)?,
                tx.version,
                tx.updated_at,
            ],
        )
        .map_err(|e| write_error(e, "transaction"))?;
    expect_changed(changed, "transaction", tx.id)?;

    let mut stored = tx.clone();
    replace_items(conn, &mut stored)?;
    Ok(stored)
}

pub(crate) fn insert_version_row(
    conn: &Connection,
    version: &TransactionVersion,
) -> Result<TransactionVersion> {
    conn.execute(
        "INSERT INTO transaction_versions (
            transaction_id, version, snapshot, change_reason, checksum, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            version.transaction_id,
            version.version,
            serde_json::to_string(&version.snapshot)?,
            version.change_reason,
            version.checksum,
            version.created_at,
        ],
    )
    .map_err(|e| write_error(e, "transaction version"))?;

    let mut stored = version.clone();
    stored.id = conn.last_insert_rowid();
    Ok(stored)
}

/// Balance and stock deltas computed by the ledger, applied in SQL so the
/// read and the write are one statement
fn apply_effect_rows(conn: &Connection, effects: &Effects) -> Result<()> {
    for (account_id, delta) in effects.account_deltas() {
        conn.execute(
            "UPDATE accounts SET current_balance = round(current_balance + ?2, 2) WHERE id = ?1",
            params![account_id, delta],
        )?;
    }
    let now = Utc::now();
    for (product_id, delta) in effects.stock_deltas() {
        conn.execute(
            "UPDATE products SET stock_quantity = stock_quantity + ?2, updated_at = ?3
             WHERE id = ?1",
            params![product_id, delta, now],
        )?;
    }
    Ok(())
}

// ============================================================================
// STORAGE IMPL
// ============================================================================

impl Storage for DatabaseStorage {
    // Businesses

    fn create_business(&self, mut business: Business) -> Result<Business> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT INTO businesses (name, currency, address, phone, tax_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                business.name,
                business.currency,
                business.address,
                business.phone,
                business.tax_id,
                business.created_at,
            ],
        )?;
        business.id = conn.last_insert_rowid();
        tracing::debug!("created business {}", business.id);
        Ok(business)
    }

    fn get_business(&self, id: i64) -> Result<Option<Business>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM businesses WHERE id = ?1", BUSINESS_COLUMNS);
        query_one(&conn, &sql, &[&id], map_business)
    }

    fn list_businesses(&self) -> Result<Vec<Business>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM businesses ORDER BY id", BUSINESS_COLUMNS);
        query_all(&conn, &sql, &[], map_business)
    }

    fn update_business(&self, business: Business) -> Result<Business> {
        let conn = self.conn.lock()?;
        let changed = conn.execute(
            "UPDATE businesses SET name = ?2, currency = ?3, address = ?4, phone = ?5, tax_id = ?6
             WHERE id = ?1",
            params![
                business.id,
                business.name,
                business.currency,
                business.address,
                business.phone,
                business.tax_id,
            ],
        )?;
        expect_changed(changed, "business", business.id)?;
        Ok(business)
    }

    fn delete_business(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock()?;
        delete_row(&conn, "businesses", "business", id)
    }

    // Product categories

    fn create_product_category(&self, mut category: ProductCategory) -> Result<ProductCategory> {
        let conn = self.conn.lock()?;
        require_row(&conn, "businesses", "business", category.business_id)?;
        conn.execute(
            "INSERT INTO product_categories (business_id, name, description) VALUES (?1, ?2, ?3)",
            params![category.business_id, category.name, category.description],
        )?;
        category.id = conn.last_insert_rowid();
        Ok(category)
    }

    fn list_product_categories(&self, business_id: i64) -> Result<Vec<ProductCategory>> {
        let conn = self.conn.lock()?;
        query_all(
            &conn,
            "SELECT id, business_id, name, description FROM product_categories
             WHERE business_id = ?1 ORDER BY id",
            &[&business_id],
            map_product_category,
        )
    }

    fn delete_product_category(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock()?;
        delete_row(&conn, "product_categories", "product category", id)
    }

    // Products

    fn create_product(&self, mut product: Product) -> Result<Product> {
        let conn = self.conn.lock()?;
        require_row(&conn, "businesses", "business", product.business_id)?;
        let now = Utc::now();
        product.created_at = now;
        product.updated_at = now;
        conn.execute(
            "INSERT INTO products (
                business_id, category_id, name, sku, description, unit, cost_price, sale_price,
                stock_quantity, reorder_level, active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                product.business_id,
                product.category_id,
                product.name,
                product.sku,
                product.description,
                product.unit,
                product.cost_price,
                product.sale_price,
                product.stock_quantity,
                product.reorder_level,
                product.active,
                product.created_at,
                product.updated_at,
            ],
        )
        .map_err(|e| write_error(e, "product"))?;
        product.id = conn.last_insert_rowid();
        Ok(product)
    }

    fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        query_one(&conn, &sql, &[&id], map_product)
    }

    fn list_products(&self, business_id: i64) -> Result<Vec<Product>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM products WHERE business_id = ?1 ORDER BY id",
            PRODUCT_COLUMNS
        );
        query_all(&conn, &sql, &[&business_id], map_product)
    }

    fn update_product(&self, mut product: Product) -> Result<Product> {
        let conn = self.conn.lock()?;
        product.updated_at = Utc::now();
        let changed = conn
            .execute(
                "UPDATE products SET
                    category_id = ?2, name = ?3, sku = ?4, description = ?5, unit = ?6,
                    cost_price = ?7, sale_price = ?8, stock_quantity = ?9, reorder_level = ?10,
                    active = ?11, updated_at = ?12
                 WHERE id = ?1",
                params![
                    product.id,
                    product.category_id,
                    product.name,
                    product.sku,
                    product.description,
                    product.unit,
                    product.cost_price,
                    product.sale_price,
                    product.stock_quantity,
                    product.reorder_level,
                    product.active,
                    product.updated_at,
                ],
            )
            .map_err(|e| write_error(e, "product"))?;
        expect_changed(changed, "product", product.id)?;
        Ok(product)
    }

    fn delete_product(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock()?;
        delete_row(&conn, "products", "product", id)
    }

    // Account categories

    fn create_account_category(&self, mut category: AccountCategory) -> Result<AccountCategory> {
        let conn = self.conn.lock()?;
        require_row(&conn, "businesses", "business", category.business_id)?;
        conn.execute(
            "INSERT INTO account_categories (business_id, name, kind) VALUES (?1, ?2, ?3)",
            params![category.business_id, category.name, category.kind.as_str()],
        )?;
        category.id = conn.last_insert_rowid();
        Ok(category)
    }

    fn get_account_category(&self, id: i64) -> Result<Option<AccountCategory>> {
        let conn = self.conn.lock()?;
        query_one(
            &conn,
            "SELECT id, business_id, name, kind FROM account_categories WHERE id = ?1",
            &[&id],
            map_account_category,
        )
    }

    fn list_account_categories(&self, business_id: i64) -> Result<Vec<AccountCategory>> {
        let conn = self.conn.lock()?;
        query_all(
            &conn,
            "SELECT id, business_id, name, kind FROM account_categories
             WHERE business_id = ?1 ORDER BY id",
            &[&business_id],
            map_account_category,
        )
    }

    fn update_account_category(&self, category: AccountCategory) -> Result<AccountCategory> {
        let conn = self.conn.lock()?;
        let changed = conn.execute(
            "UPDATE account_categories SET name = ?2, kind = ?3 WHERE id = ?1",
            params![category.id, category.name, category.kind.as_str()],
        )?;
        expect_changed(changed, "account category", category.id)?;
        Ok(category)
    }

    fn delete_account_category(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock()?;
        delete_row(&conn, "account_categories", "account category", id)
    }

    // Accounts

    fn create_account(&self, mut account: Account) -> Result<Account> {
        let conn = self.conn.lock()?;
        require_row(&conn, "businesses", "business", account.business_id)?;
        conn.execute(
            "INSERT INTO accounts (
                business_id, name, account_type, currency, opening_balance, current_balance,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                account.business_id,
                account.name,
                account.account_type.as_str(),
                account.currency,
                account.opening_balance,
                account.current_balance,
                account.created_at,
            ],
        )?;
        account.id = conn.last_insert_rowid();
        Ok(account)
    }

    fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        query_one(&conn, &sql, &[&id], map_account)
    }

    fn list_accounts(&self, business_id: i64) -> Result<Vec<Account>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM accounts WHERE business_id = ?1 ORDER BY id",
            ACCOUNT_COLUMNS
        );
        query_all(&conn, &sql, &[&business_id], map_account)
    }

    fn update_account(&self, account: Account) -> Result<Account> {
        let conn = self.conn.lock()?;
        let changed = conn.execute(
            "UPDATE accounts SET
                name = ?2, account_type = ?3, currency = ?4, opening_balance = ?5,
                current_balance = ?6
             WHERE id = ?1",
            params![
                account.id,
                account.name,
                account.account_type.as_str(),
                account.currency,
                account.opening_balance,
                account.current_balance,
            ],
        )?;
        expect_changed(changed, "account", account.id)?;
        Ok(account)
    }

    fn delete_account(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock()?;
        delete_row(&conn, "accounts", "account", id)
    }

    // Transactions

    fn create_transaction(&self, tx: Transaction) -> Result<Transaction> {
        self.commit_transaction_create(tx, &Effects::default())
    }

    fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn.lock()?;
        Ok(load_transactions(&conn, "WHERE id = ?1", &[&id])?.into_iter().next())
    }

    fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(business_id) = filter.business_id {
            clauses.push("business_id = ?");
            args.push(Box::new(business_id));
        }
        if let Some(kind) = filter.kind {
            clauses.push("kind = ?");
            args.push(Box::new(kind.as_str()));
        }
        if let Some(doc) = filter.document_type {
            clauses.push("document_type = ?");
            args.push(Box::new(doc.as_str()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            args.push(Box::new(status.as_str()));
        }
        if let Some(from) = filter.from {
            clauses.push("date >= ?");
            args.push(Box::new(from));
        }
        if let Some(to) = filter.to {
            clauses.push("date <= ?");
            args.push(Box::new(to));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();

        let conn = self.conn.lock()?;
        load_transactions(&conn, &where_sql, &refs)
    }

    fn update_transaction(&self, mut tx: Transaction) -> Result<Transaction> {
        let mut conn = self.conn.lock()?;
        tx.updated_at = Utc::now();

        let txn = conn.transaction()?;
        let stored = write_transaction_rows(&txn, &tx)?;
        txn.commit()?;
        Ok(stored)
    }

    fn delete_transaction(&self, id: i64) -> Result<()> {
        self.commit_transaction_delete(id, &Effects::default())
    }

    // Ledger commits

    fn commit_transaction_create(
        &self,
        mut tx: Transaction,
        effects: &Effects,
    ) -> Result<Transaction> {
        let mut conn = self.conn.lock()?;
        require_row(&conn, "businesses", "business", tx.business_id)?;
        let now = Utc::now();
        tx.created_at = now;
        tx.updated_at = now;

        let txn = conn.transaction()?;
        let stored = insert_transaction_rows(&txn, tx)?;
        apply_effect_rows(&txn, effects)?;
        txn.commit()?;
        tracing::debug!("created transaction {} ({} items)", stored.id, stored.items.len());
        Ok(stored)
    }

    fn commit_transaction_update(
        &self,
        mut tx: Transaction,
        snapshot: TransactionVersion,
        effects: &Effects,
    ) -> Result<Transaction> {
        if snapshot.transaction_id != tx.id {
            return Err(Error::validation(format!(
                "snapshot belongs to transaction {}, not {}",
                snapshot.transaction_id, tx.id
            )));
        }
        let mut conn = self.conn.lock()?;
        tx.updated_at = Utc::now();

        // Dropping `txn` on any error below rolls everything back
        let txn = conn.transaction()?;
        let stored = write_transaction_rows(&txn, &tx)?;
        insert_version_row(&txn, &snapshot)?;
        apply_effect_rows(&txn, effects)?;
        txn.commit()?;
        Ok(stored)
    }

    fn commit_transaction_delete(&self, id: i64, effects: &Effects) -> Result<()> {
        let mut conn = self.conn.lock()?;
        let txn = conn.transaction()?;
        delete_row(&txn, "transactions", "transaction", id)?;
        apply_effect_rows(&txn, effects)?;
        txn.commit()?;
        Ok(())
    }

    fn commit_transfer_create(&self, mut transfer: Transfer, effects: &Effects) -> Result<Transfer> {
        let mut conn = self.conn.lock()?;
        require_row(&conn, "businesses", "business", transfer.business_id)?;
        require_row(&conn, "accounts", "account", transfer.from_account_id)?;
        require_row(&conn, "accounts", "account", transfer.to_account_id)?;

        let txn = conn.transaction()?;
        txn.execute(
            "INSERT INTO transfers (
                business_id, from_account_id, to_account_id, amount, date, note, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                transfer.business_id,
                transfer.from_account_id,
                transfer.to_account_id,
                transfer.amount,
                transfer.date,
                transfer.note,
                transfer.created_at,
            ],
        )?;
        transfer.id = txn.last_insert_rowid();
        apply_effect_rows(&txn, effects)?;
        txn.commit()?;
        Ok(transfer)
    }

    fn commit_transfer_delete(&self, id: i64, effects: &Effects) -> Result<()> {
        let mut conn = self.conn.lock()?;
        let txn = conn.transaction()?;
        delete_row(&txn, "transfers", "transfer", id)?;
        apply_effect_rows(&txn, effects)?;
        txn.commit()?;
        Ok(())
    }

    // Transaction versions

    fn insert_transaction_version(&self, version: TransactionVersion) -> Result<TransactionVersion> {
        let conn = self.conn.lock()?;
        require_row(&conn, "transactions", "transaction", version.transaction_id)?;
        insert_version_row(&conn, &version)
    }

    fn list_transaction_versions(&self, transaction_id: i64) -> Result<Vec<TransactionVersion>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM transaction_versions WHERE transaction_id = ?1 ORDER BY version, id",
            VERSION_COLUMNS
        );
        query_all(&conn, &sql, &[&transaction_id], map_version)
    }

    fn get_transaction_version(&self, id: i64) -> Result<Option<TransactionVersion>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM transaction_versions WHERE id = ?1", VERSION_COLUMNS);
        query_one(&conn, &sql, &[&id], map_version)
    }

    // Transfers

    fn create_transfer(&self, transfer: Transfer) -> Result<Transfer> {
        self.commit_transfer_create(transfer, &Effects::default())
    }

    fn get_transfer(&self, id: i64) -> Result<Option<Transfer>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM transfers WHERE id = ?1", TRANSFER_COLUMNS);
        query_one(&conn, &sql, &[&id], map_transfer)
    }

    fn list_transfers(&self, business_id: i64) -> Result<Vec<Transfer>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM transfers WHERE business_id = ?1 ORDER BY id",
            TRANSFER_COLUMNS
        );
        query_all(&conn, &sql, &[&business_id], map_transfer)
    }

    fn delete_transfer(&self, id: i64) -> Result<()> {
        self.commit_transfer_delete(id, &Effects::default())
    }

    // Users

    fn create_user(&self, mut user: User) -> Result<User> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT INTO users (business_id, username, display_name, role, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.business_id,
                user.username,
                user.display_name,
                user.role.as_str(),
                user.password_hash,
                user.created_at,
            ],
        )
        .map_err(|e| write_error(e, &format!("username {} is taken", user.username)))?;
        user.id = conn.last_insert_rowid();
        Ok(user)
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        query_one(&conn, &sql, &[&id], map_user)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
        query_one(&conn, &sql, &[&username], map_user)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS);
        query_all(&conn, &sql, &[], map_user)
    }

    fn update_user(&self, user: User) -> Result<User> {
        let conn = self.conn.lock()?;
        let changed = conn
            .execute(
                "UPDATE users SET
                    business_id = ?2, username = ?3, display_name = ?4, role = ?5,
                    password_hash = ?6
                 WHERE id = ?1",
                params![
                    user.id,
                    user.business_id,
                    user.username,
                    user.display_name,
                    user.role.as_str(),
                    user.password_hash,
                ],
            )
            .map_err(|e| write_error(e, &format!("username {} is taken", user.username)))?;
        expect_changed(changed, "user", user.id)?;
        Ok(user)
    }

    fn delete_user(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock()?;
        delete_row(&conn, "users", "user", id)
    }

    // Conversations

    fn create_conversation(&self, mut conversation: Conversation) -> Result<Conversation> {
        let conn = self.conn.lock()?;
        require_row(&conn, "businesses", "business", conversation.business_id)?;
        let now = Utc::now();
        conversation.created_at = now;
        conversation.updated_at = now;
        conn.execute(
            "INSERT INTO conversations (
                business_id, customer_name, messages, cart, status, order_transaction_id,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation.business_id,
                conversation.customer_name,
                serde_json::to_string(&conversation.messages)?,
                serde_json::to_string(&conversation.cart)?,
                conversation.status.as_str(),
                conversation.order_transaction_id,
                conversation.created_at,
                conversation.updated_at,
            ],
        )
        .map_err(|e| write_error(e, "conversation"))?;
        conversation.id = conn.last_insert_rowid();
        Ok(conversation)
    }

    fn get_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
        query_one(&conn, &sql, &[&id], map_conversation)
    }

    fn list_conversations(&self, business_id: i64) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM conversations WHERE business_id = ?1 ORDER BY id",
            CONVERSATION_COLUMNS
        );
        query_all(&conn, &sql, &[&business_id], map_conversation)
    }

    fn update_conversation(&self, mut conversation: Conversation) -> Result<Conversation> {
        let conn = self.conn.lock()?;
        conversation.updated_at = Utc::now();
        let changed = conn
            .execute(
                "UPDATE conversations SET
                    customer_name = ?2, messages = ?3, cart = ?4, status = ?5,
                    order_transaction_id = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    conversation.id,
                    conversation.customer_name,
                    serde_json::to_string(&conversation.messages)?,
                    serde_json::to_string(&conversation.cart)?,
                    conversation.status.as_str(),
                    conversation.order_transaction_id,
                    conversation.updated_at,
                ],
            )
            .map_err(|e| write_error(e, "conversation"))?;
        expect_changed(changed, "conversation", conversation.id)?;
        Ok(conversation)
    }

    fn delete_conversation(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock()?;
        delete_row(&conn, "conversations", "conversation", id)
    }
}

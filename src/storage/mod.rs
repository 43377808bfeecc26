// Storage - CRUD accessors over every entity
//
// Two backends implement the same contract:
// - `MemStorage`: RwLock-guarded tables, for tests and throwaway servers
// - `DatabaseStorage`: SQLite via rusqlite
//
// Business rules spanning entities (balances, stock, versions) live in
// `ledger::Ledger`, not here. The `commit_*` methods only write what the
// ledger decided: the row change, its version snapshot and the balance and
// stock deltas land together or not at all.

pub mod memory;
pub mod sqlite;

pub use memory::MemStorage;
pub use sqlite::DatabaseStorage;

use crate::entities::{
    Account, AccountCategory, Business, Conversation, Product, ProductCategory, Transaction,
    TransactionFilter, TransactionVersion, Transfer, User,
};
use crate::error::Result;
use std::collections::BTreeMap;

// ============================================================================
// EFFECTS
// ============================================================================

/// Balance and stock deltas written in the same commit as a ledger change.
/// Deltas for accounts or products that no longer exist are skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub accounts: BTreeMap<i64, f64>,
    pub stock: BTreeMap<i64, f64>,
}

impl Effects {
    /// `direction` is 1.0 to apply the transaction, -1.0 to reverse it
    pub fn add_transaction(&mut self, tx: &Transaction, direction: f64) {
        let cash = tx.cash_effect() * direction;
        if let Some(account_id) = tx.account_id.filter(|_| cash != 0.0) {
            *self.accounts.entry(account_id).or_insert(0.0) += cash;
        }
        for (product_id, delta) in tx.stock_effects() {
            *self.stock.entry(product_id).or_insert(0.0) += delta * direction;
        }
    }

    pub fn add_transfer(&mut self, transfer: &Transfer, direction: f64) {
        let amount = transfer.amount * direction;
        *self.accounts.entry(transfer.from_account_id).or_insert(0.0) -= amount;
        *self.accounts.entry(transfer.to_account_id).or_insert(0.0) += amount;
    }

    /// Non-zero account deltas, ascending by account id
    pub fn account_deltas(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        nonzero(&self.accounts)
    }

    pub fn stock_deltas(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        nonzero(&self.stock)
    }
}

fn nonzero(deltas: &BTreeMap<i64, f64>) -> impl Iterator<Item = (i64, f64)> + '_ {
    deltas
        .iter()
        .filter(|(_, delta)| **delta != 0.0 && delta.is_finite())
        .map(|(id, delta)| (*id, *delta))
}

/// Conventions shared by all backends:
/// - `create_*` ignores the incoming id, assigns a fresh one, returns the row
/// - `get_*` returns `Ok(None)` for a missing row
/// - `update_*` / `delete_*` return `Error::NotFound` for a missing row
/// - `list_*` results are ordered by id (transactions: date, then id)
pub trait Storage: Send + Sync {
    // Businesses
    fn create_business(&self, business: Business) -> Result<Business>;
    fn get_business(&self, id: i64) -> Result<Option<Business>>;
    fn list_businesses(&self) -> Result<Vec<Business>>;
    fn update_business(&self, business: Business) -> Result<Business>;
    fn delete_business(&self, id: i64) -> Result<()>;

    // Product categories
    fn create_product_category(&self, category: ProductCategory) -> Result<ProductCategory>;
    fn list_product_categories(&self, business_id: i64) -> Result<Vec<ProductCategory>>;
    fn delete_product_category(&self, id: i64) -> Result<()>;

    // Products
    fn create_product(&self, product: Product) -> Result<Product>;
    fn get_product(&self, id: i64) -> Result<Option<Product>>;
    fn list_products(&self, business_id: i64) -> Result<Vec<Product>>;
    fn update_product(&self, product: Product) -> Result<Product>;
    fn delete_product(&self, id: i64) -> Result<()>;

    // Account categories
    fn create_account_category(&self, category: AccountCategory) -> Result<AccountCategory>;
    fn get_account_category(&self, id: i64) -> Result<Option<AccountCategory>>;
    fn list_account_categories(&self, business_id: i64) -> Result<Vec<AccountCategory>>;
    fn update_account_category(&self, category: AccountCategory) -> Result<AccountCategory>;
    fn delete_account_category(&self, id: i64) -> Result<()>;

    // Accounts
    fn create_account(&self, account: Account) -> Result<Account>;
    fn get_account(&self, id: i64) -> Result<Option<Account>>;
    fn list_accounts(&self, business_id: i64) -> Result<Vec<Account>>;
    fn update_account(&self, account: Account) -> Result<Account>;
    fn delete_account(&self, id: i64) -> Result<()>;

    // Transactions (line items are stored with their transaction)
    fn create_transaction(&self, tx: Transaction) -> Result<Transaction>;
    fn get_transaction(&self, id: i64) -> Result<Option<Transaction>>;
    fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>>;
    fn update_transaction(&self, tx: Transaction) -> Result<Transaction>;
    /// Also removes the transaction's versions
    fn delete_transaction(&self, id: i64) -> Result<()>;

    // Atomic ledger writes
    fn commit_transaction_create(&self, tx: Transaction, effects: &Effects) -> Result<Transaction>;
    /// Overwrites the row, stores `snapshot` (the state being replaced) and
    /// applies `effects`
    fn commit_transaction_update(
        &self,
        tx: Transaction,
        snapshot: TransactionVersion,
        effects: &Effects,
    ) -> Result<Transaction>;
    fn commit_transaction_delete(&self, id: i64, effects: &Effects) -> Result<()>;
    fn commit_transfer_create(&self, transfer: Transfer, effects: &Effects) -> Result<Transfer>;
    fn commit_transfer_delete(&self, id: i64, effects: &Effects) -> Result<()>;

    // Transaction versions
    fn insert_transaction_version(&self, version: TransactionVersion) -> Result<TransactionVersion>;
    /// Ascending by version number
    fn list_transaction_versions(&self, transaction_id: i64) -> Result<Vec<TransactionVersion>>;
    fn get_transaction_version(&self, id: i64) -> Result<Option<TransactionVersion>>;

    // Transfers
    fn create_transfer(&self, transfer: Transfer) -> Result<Transfer>;
    fn get_transfer(&self, id: i64) -> Result<Option<Transfer>>;
    fn list_transfers(&self, business_id: i64) -> Result<Vec<Transfer>>;
    fn delete_transfer(&self, id: i64) -> Result<()>;

    // Users
    fn create_user(&self, user: User) -> Result<User>;
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;
    fn update_user(&self, user: User) -> Result<User>;
    fn delete_user(&self, id: i64) -> Result<()>;

    // Conversations
    fn create_conversation(&self, conversation: Conversation) -> Result<Conversation>;
    fn get_conversation(&self, id: i64) -> Result<Option<Conversation>>;
    fn list_conversations(&self, business_id: i64) -> Result<Vec<Conversation>>;
    fn update_conversation(&self, conversation: Conversation) -> Result<Conversation>;
    fn delete_conversation(&self, id: i64) -> Result<()>;
}

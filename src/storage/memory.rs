// In-memory backend
//
// All tables sit behind one RwLock so multi-table operations (cascades,
// reference checks) see a consistent state. Ids come from per-table
// counters and are never reused. Ledger commits validate before they
// write anything, so a failed commit leaves every table untouched.

use chrono::Utc;
use std::sync::RwLock;

use super::{Effects, Storage};
use crate::entities::{
    Account, AccountCategory, Business, Conversation, Product, ProductCategory, Transaction,
    TransactionFilter, TransactionVersion, Transfer, User,
};
use crate::error::{Error, Result};

/// Rows addressable by integer id
trait Row: Clone {
    const ENTITY: &'static str;
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
}

macro_rules! impl_row {
    ($ty:ty, $name:literal) => {
        impl Row for $ty {
            const ENTITY: &'static str = $name;
            fn id(&self) -> i64 {
                self.id
            }
            fn set_id(&mut self, id: i64) {
                self.id = id;
            }
        }
    };
}

impl_row!(Business, "business");
impl_row!(ProductCategory, "product category");
impl_row!(Product, "product");
impl_row!(AccountCategory, "account category");
impl_row!(Account, "account");
impl_row!(Transaction, "transaction");
impl_row!(TransactionVersion, "transaction version");
impl_row!(Transfer, "transfer");
impl_row!(User, "user");
impl_row!(Conversation, "conversation");

struct Table<T> {
    rows: Vec<T>,
    next_id: i64,
}

impl<T: Row> Table<T> {
    fn new() -> Self {
        Table {
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, mut row: T) -> T {
        row.set_id(self.next_id);
        self.next_id += 1;
        self.rows.push(row.clone());
        row
    }

    fn get(&self, id: i64) -> Option<T> {
        self.rows.iter().find(|r| r.id() == id).cloned()
    }

    fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.iter().filter(|r| pred(r)).cloned().collect()
    }

    fn replace(&mut self, row: T) -> Result<T> {
        let slot = self
            .rows
            .iter_mut()
            .find(|r| r.id() == row.id())
            .ok_or_else(|| Error::not_found(T::ENTITY, row.id()))?;
        *slot = row.clone();
        Ok(row)
    }

    fn remove(&mut self, id: i64) -> Result<T> {
        let pos = self
            .rows
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| Error::not_found(T::ENTITY, id))?;
        Ok(self.rows.remove(pos))
    }

    fn contains(&self, id: i64) -> bool {
        self.rows.iter().any(|r| r.id() == id)
    }
}

struct Tables {
    businesses: Table<Business>,
    product_categories: Table<ProductCategory>,
    products: Table<Product>,
    account_categories: Table<AccountCategory>,
    accounts: Table<Account>,
    transactions: Table<Transaction>,
    versions: Table<TransactionVersion>,
    transfers: Table<Transfer>,
    users: Table<User>,
    conversations: Table<Conversation>,
    next_item_id: i64,
}

impl Tables {
    fn require_business(&self, id: i64) -> Result<()> {
        if self.businesses.contains(id) {
            Ok(())
        } else {
            Err(Error::not_found("business", id))
        }
    }

    fn assign_item_ids(&mut self, tx: &mut Transaction) {
        for item in tx.items.iter_mut().filter(|i| i.id == 0) {
            item.id = self.next_item_id;
            self.next_item_id += 1;
        }
    }

    fn apply_effects(&mut self, effects: &Effects) {
        for (account_id, delta) in effects.account_deltas() {
            if let Some(account) = self.accounts.rows.iter_mut().find(|a| a.id == account_id) {
                account.apply_delta(delta);
            }
        }
        let now = Utc::now();
        for (product_id, delta) in effects.stock_deltas() {
            if let Some(product) = self.products.rows.iter_mut().find(|p| p.id == product_id) {
                product.adjust_stock(delta);
                product.updated_at = now;
            }
        }
    }
}

pub struct MemStorage {
    tables: RwLock<Tables>,
}

impl MemStorage {
    pub fn new() -> Self {
        MemStorage {
            tables: RwLock::new(Tables {
                businesses: Table::new(),
                product_categories: Table::new(),
                products: Table::new(),
                account_categories: Table::new(),
                accounts: Table::new(),
                transactions: Table::new(),
                versions: Table::new(),
                transfers: Table::new(),
                users: Table::new(),
                conversations: Table::new(),
                next_item_id: 1,
            }),
        }
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemStorage {
    // ========================================================================
    // BUSINESSES
    // ========================================================================

    fn create_business(&self, business: Business) -> Result<Business> {
        let mut t = self.tables.write()?;
        Ok(t.businesses.insert(business))
    }

    fn get_business(&self, id: i64) -> Result<Option<Business>> {
        Ok(self.tables.read()?.businesses.get(id))
    }

    fn list_businesses(&self) -> Result<Vec<Business>> {
        Ok(self.tables.read()?.businesses.filter(|_| true))
    }

    fn update_business(&self, business: Business) -> Result<Business> {
        self.tables.write()?.businesses.replace(business)
    }

    fn delete_business(&self, id: i64) -> Result<()> {
        let mut t = self.tables.write()?;
        let in_use = t.products.rows.iter().any(|r| r.business_id == id)
            || t.product_categories.rows.iter().any(|r| r.business_id == id)
            || t.account_categories.rows.iter().any(|r| r.business_id == id)
            || t.accounts.rows.iter().any(|r| r.business_id == id)
            || t.transactions.rows.iter().any(|r| r.business_id == id)
            || t.transfers.rows.iter().any(|r| r.business_id == id)
            || t.conversations.rows.iter().any(|r| r.business_id == id);
        if in_use && t.businesses.contains(id) {
            return Err(Error::Conflict(format!("business {} still has records", id)));
        }
        t.businesses.remove(id)?;
        for user in t.users.rows.iter_mut().filter(|u| u.business_id == Some(id)) {
            user.business_id = None;
        }
        Ok(())
    }

    // ========================================================================
    // PRODUCT CATEGORIES
    // ========================================================================

    fn create_product_category(&self, category: ProductCategory) -> Result<ProductCategory> {
        let mut t = self.tables.write()?;
        t.require_business(category.business_id)?;
        Ok(t.product_categories.insert(category))
    }

    fn list_product_categories(&self, business_id: i64) -> Result<Vec<ProductCategory>> {
        Ok(self
            .tables
            .read()?
            .product_categories
            .filter(|c| c.business_id == business_id))
    }

    fn delete_product_category(&self, id: i64) -> Result<()> {
        let mut t = self.tables.write()?;
        t.product_categories.remove(id)?;
        for product in t.products.rows.iter_mut().filter(|p| p.category_id == Some(id)) {
            product.category_id = None;
        }
        Ok(())
    }

    // ========================================================================
    // PRODUCTS
    // ========================================================================

    fn create_product(&self, mut product: Product) -> Result<Product> {
        let mut t = self.tables.write()?;
        t.require_business(product.business_id)?;
        let now = Utc::now();
        product.created_at = now;
        product.updated_at = now;
        Ok(t.products.insert(product))
    }

    fn get_product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.tables.read()?.products.get(id))
    }

    fn list_products(&self, business_id: i64) -> Result<Vec<Product>> {
        Ok(self.tables.read()?.products.filter(|p| p.business_id == business_id))
    }

    fn update_product(&self, mut product: Product) -> Result<Product> {
        product.updated_at = Utc::now();
        self.tables.write()?.products.replace(product)
    }

    fn delete_product(&self, id: i64) -> Result<()> {
        let mut t = self.tables.write()?;
        t.products.remove(id)?;
        for tx in t.transactions.rows.iter_mut() {
            for item in tx.items.iter_mut().filter(|i| i.product_id == Some(id)) {
                item.product_id = None;
            }
        }
        Ok(())
    }

    // ========================================================================
    // ACCOUNT CATEGORIES
    // ========================================================================

    fn create_account_category(&self, category: AccountCategory) -> Result<AccountCategory> {
        let mut t = self.tables.write()?;
        t.require_business(category.business_id)?;
        Ok(t.account_categories.insert(category))
    }

    fn get_account_category(&self, id: i64) -> Result<Option<AccountCategory>> {
        Ok(self.tables.read()?.account_categories.get(id))
    }

    fn list_account_categories(&self, business_id: i64) -> Result<Vec<AccountCategory>> {
        Ok(self
            .tables
            .read()?
            .account_categories
            .filter(|c| c.business_id == business_id))
    }

    fn update_account_category(&self, category: AccountCategory) -> Result<AccountCategory> {
        self.tables.write()?.account_categories.replace(category)
    }

    fn delete_account_category(&self, id: i64) -> Result<()> {
        let mut t = self.tables.write()?;
        t.account_categories.remove(id)?;
        for tx in t.transactions.rows.iter_mut().filter(|tx| tx.category_id == Some(id)) {
            tx.category_id = None;
        }
        Ok(())
    }

    // ========================================================================
    // ACCOUNTS
    // ========================================================================

    fn create_account(&self, account: Account) -> Result<Account> {
        let mut t = self.tables.write()?;
        t.require_business(account.business_id)?;
        Ok(t.accounts.insert(account))
    }

    fn get_account(&self, id: i64) -> Result<Option<Account>> {
        Ok(self.tables.read()?.accounts.get(id))
    }

    fn list_accounts(&self, business_id: i64) -> Result<Vec<Account>> {
        Ok(self.tables.read()?.accounts.filter(|a| a.business_id == business_id))
    }

    fn update_account(&self, account: Account) -> Result<Account> {
        self.tables.write()?.accounts.replace(account)
    }

    fn delete_account(&self, id: i64) -> Result<()> {
        let mut t = self.tables.write()?;
        let in_use = t
            .transfers
            .rows
            .iter()
            .any(|tr| tr.from_account_id == id || tr.to_account_id == id);
        if in_use && t.accounts.contains(id) {
            return Err(Error::Conflict(format!("account {} has transfers", id)));
        }
        t.accounts.remove(id)?;
        for tx in t.transactions.rows.iter_mut().filter(|tx| tx.account_id == Some(id)) {
            tx.account_id = None;
        }
        Ok(())
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    fn create_transaction(&self, tx: Transaction) -> Result<Transaction> {
        self.commit_transaction_create(tx, &Effects::default())
    }

    fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        Ok(self.tables.read()?.transactions.get(id))
    }

    fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let mut rows = self.tables.read()?.transactions.filter(|tx| filter.matches(tx));
        rows.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn update_transaction(&self, mut tx: Transaction) -> Result<Transaction> {
        let mut t = self.tables.write()?;
        if !t.transactions.contains(tx.id) {
            return Err(Error::not_found("transaction", tx.id));
        }
        tx.updated_at = Utc::now();
        t.assign_item_ids(&mut tx);
        t.transactions.replace(tx)
    }

    fn delete_transaction(&self, id: i64) -> Result<()> {
        self.commit_transaction_delete(id, &Effects::default())
    }

    // ========================================================================
    // LEDGER COMMITS
    // ========================================================================

    fn commit_transaction_create(
        &self,
        mut tx: Transaction,
        effects: &Effects,
    ) -> Result<Transaction> {
        let mut t = self.tables.write()?;
        t.require_business(tx.business_id)?;
        let now = Utc::now();
        tx.created_at = now;
        tx.updated_at = now;
        for item in tx.items.iter_mut() {
            item.id = 0;
        }
        t.assign_item_ids(&mut tx);
        let stored = t.transactions.insert(tx);
        t.apply_effects(effects);
        Ok(stored)
    }

    fn commit_transaction_update(
        &self,
        mut tx: Transaction,
        snapshot: TransactionVersion,
        effects: &Effects,
    ) -> Result<Transaction> {
        let mut t = self.tables.write()?;
        if !t.transactions.contains(tx.id) {
            return Err(Error::not_found("transaction", tx.id));
        }
        if snapshot.transaction_id != tx.id {
            return Err(Error::validation(format!(
                "snapshot belongs to transaction {}, not {}",
                snapshot.transaction_id, tx.id
            )));
        }
        tx.updated_at = Utc::now();
        t.assign_item_ids(&mut tx);
        let stored = t.transactions.replace(tx)?;
        t.versions.insert(snapshot);
        t.apply_effects(effects);
        Ok(stored)
    }

    fn commit_transaction_delete(&self, id: i64, effects: &Effects) -> Result<()> {
        let mut t = self.tables.write()?;
        t.transactions.remove(id)?;
        t.versions.rows.retain(|v| v.transaction_id != id);
        for c in t
            .conversations
            .rows
            .iter_mut()
            .filter(|c| c.order_transaction_id == Some(id))
        {
            c.order_transaction_id = None;
        }
        t.apply_effects(effects);
        Ok(())
    }

    fn commit_transfer_create(&self, transfer: Transfer, effects: &Effects) -> Result<Transfer> {
        let mut t = self.tables.write()?;
        t.require_business(transfer.business_id)?;
        for account_id in [transfer.from_account_id, transfer.to_account_id] {
            if !t.accounts.contains(account_id) {
                return Err(Error::not_found("account", account_id));
            }
        }
        let stored = t.transfers.insert(transfer);
        t.apply_effects(effects);
        Ok(stored)
    }

    fn commit_transfer_delete(&self, id: i64, effects: &Effects) -> Result<()> {
        let mut t = self.tables.write()?;
        t.transfers.remove(id)?;
        t.apply_effects(effects);
        Ok(())
    }

    // ========================================================================
    // TRANSACTION VERSIONS
    // ========================================================================

    fn insert_transaction_version(&self, version: TransactionVersion) -> Result<TransactionVersion> {
        let mut t = self.tables.write()?;
        if !t.transactions.contains(version.transaction_id) {
            return Err(Error::not_found("transaction", version.transaction_id));
        }
        Ok(t.versions.insert(version))
    }

    fn list_transaction_versions(&self, transaction_id: i64) -> Result<Vec<TransactionVersion>> {
        let mut rows = self
            .tables
            .read()?
            .versions
            .filter(|v| v.transaction_id == transaction_id);
        rows.sort_by(|a, b| a.version.cmp(&b.version).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn get_transaction_version(&self, id: i64) -> Result<Option<TransactionVersion>> {
        Ok(self.tables.read()?.versions.get(id))
    }

    // ========================================================================
    // TRANSFERS
    // ========================================================================

    fn create_transfer(&self, transfer: Transfer) -> Result<Transfer> {
        self.commit_transfer_create(transfer, &Effects::default())
    }

    fn get_transfer(&self, id: i64) -> Result<Option<Transfer>> {
        Ok(self.tables.read()?.transfers.get(id))
    }

    fn list_transfers(&self, business_id: i64) -> Result<Vec<Transfer>> {
        Ok(self.tables.read()?.transfers.filter(|t| t.business_id == business_id))
    }

    fn delete_transfer(&self, id: i64) -> Result<()> {
        self.commit_transfer_delete(id, &Effects::default())
    }

    // ========================================================================
    // USERS
    // ========================================================================

    fn create_user(&self, user: User) -> Result<User> {
        let mut t = self.tables.write()?;
        if t.users.rows.iter().any(|u| u.username == user.username) {
            return Err(Error::Conflict(format!("username {} is taken", user.username)));
        }
        Ok(t.users.insert(user))
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.tables.read()?.users.get(id))
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .tables
            .read()?
            .users
            .rows
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.tables.read()?.users.filter(|_| true))
    }

    fn update_user(&self, user: User) -> Result<User> {
        let mut t = self.tables.write()?;
        if t
            .users
            .rows
            .iter()
            .any(|u| u.username == user.username && u.id != user.id)
        {
            return Err(Error::Conflict(format!("username {} is taken", user.username)));
        }
        t.users.replace(user)
    }

    fn delete_user(&self, id: i64) -> Result<()> {
        self.tables.write()?.users.remove(id).map(|_| ())
    }

    // ========================================================================
    // CONVERSATIONS
    // ========================================================================

    fn create_conversation(&self, mut conversation: Conversation) -> Result<Conversation> {
        let mut t = self.tables.write()?;
        t.require_business(conversation.business_id)?;
        let now = Utc::now();
        conversation.created_at = now;
        conversation.updated_at = now;
        Ok(t.conversations.insert(conversation))
    }

    fn get_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        Ok(self.tables.read()?.conversations.get(id))
    }

    fn list_conversations(&self, business_id: i64) -> Result<Vec<Conversation>> {
        Ok(self
            .tables
            .read()?
            .conversations
            .filter(|c| c.business_id == business_id))
    }

    fn update_conversation(&self, mut conversation: Conversation) -> Result<Conversation> {
        conversation.updated_at = Utc::now();
        self.tables.write()?.conversations.replace(conversation)
    }

    fn delete_conversation(&self, id: i64) -> Result<()> {
        self.tables.write()?.conversations.remove(id).map(|_| ())
    }
}

// 📒 Ledger - business rules spanning entities
//
// Storage only knows rows. The ledger keeps the derived state in step:
// - account balances follow `amount_paid` on each document
// - product stock follows received (bills) and sold (invoices) units
// - every update snapshots the previous state as a TransactionVersion
//
// Side effects are reconciled by reversing the stored document's effect and
// applying the new one. Each mutation holds the ledger's write lock from the
// first read to the storage commit, and the commit writes the row, its
// version snapshot and the balance/stock deltas in one step.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bill::{self, PAYMENT_TOLERANCE};
use crate::entities::{
    Account, Conversation, ConversationStatus, DocumentType, LineItem, Message, MessageRole, Role,
    Transaction, TransactionKind, TransactionVersion, Transfer, User,
};
use crate::error::{Error, Result};
use crate::storage::{Effects, Storage};

/// One line of a "receive items" request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReceipt {
    pub item_id: i64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    pub password: String,
    #[serde(default)]
    pub business_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmation {
    pub conversation: Conversation,
    pub invoice: Transaction,
}

/// Clones share the same write lock. Writers that bypass the ledger (or a
/// second `Ledger` over the same storage) are not serialized with it.
#[derive(Clone)]
pub struct Ledger {
    storage: Arc<dyn Storage>,
    write_lock: Arc<Mutex<()>>,
}

impl Ledger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Ledger {
            storage,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Plain CRUD for entities without cross-entity rules
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>> {
        Ok(self.write_lock.lock()?)
    }

    /// Runs a read-modify-write against storage under the ledger's write
    /// lock, for edits to rows the ledger also adjusts (accounts, products)
    pub fn exclusive<R>(&self, f: impl FnOnce(&dyn Storage) -> Result<R>) -> Result<R> {
        let _guard = self.write_guard()?;
        f(self.storage.as_ref())
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    pub fn get_transaction(&self, id: i64) -> Result<Transaction> {
        self.storage
            .get_transaction(id)?
            .ok_or_else(|| Error::not_found("transaction", id))
    }

    pub fn create_transaction(&self, draft: Transaction) -> Result<Transaction> {
        let _guard = self.write_guard()?;
        self.insert_transaction(draft)
    }

    /// Caller holds the write lock
    fn insert_transaction(&self, mut draft: Transaction) -> Result<Transaction> {
        draft.id = 0;
        draft.version = 1;
        for item in draft.items.iter_mut() {
            item.id = 0;
        }
        self.prepare(&mut draft)?;

        let mut effects = Effects::default();
        effects.add_transaction(&draft, 1.0);
        let stored = self.storage.commit_transaction_create(draft, &effects)?;
        self.warn_overdrawn(&effects);

        tracing::info!(
            "created {} {} total={:.2} status={}",
            stored.document_type.as_str(),
            stored.id,
            stored.total,
            stored.status.as_str()
        );
        Ok(stored)
    }

    /// Replaces the editable state of a transaction. Cancelled documents
    /// can only change through `restore_version`.
    pub fn update_transaction(
        &self,
        id: i64,
        draft: Transaction,
        reason: Option<String>,
    ) -> Result<Transaction> {
        self.edit_transaction(id, reason, move |_| Ok(draft))
    }

    /// `update_transaction` with the draft built from the current state
    /// while the write lock is held
    pub fn edit_transaction(
        &self,
        id: i64,
        reason: Option<String>,
        edit: impl FnOnce(&Transaction) -> Result<Transaction>,
    ) -> Result<Transaction> {
        let _guard = self.write_guard()?;
        let before = self.get_transaction(id)?;
        if before.cancelled {
            return Err(Error::validation(format!("transaction {} is cancelled", id)));
        }
        let draft = edit(&before)?;
        self.apply_update(before, draft, reason)
    }

    pub fn delete_transaction(&self, id: i64) -> Result<()> {
        let _guard = self.write_guard()?;
        let before = self.get_transaction(id)?;
        let mut effects = Effects::default();
        effects.add_transaction(&before, -1.0);
        self.storage.commit_transaction_delete(id, &effects)?;
        self.warn_overdrawn(&effects);
        tracing::info!("deleted transaction {}", id);
        Ok(())
    }

    /// Sets the received quantity per bill line, clamped to what was ordered
    pub fn receive_bill_items(&self, id: i64, receipts: &[ItemReceipt]) -> Result<Transaction> {
        let _guard = self.write_guard()?;
        let before = self.get_transaction(id)?;
        if !before.is_bill() {
            return Err(Error::validation(format!(
                "transaction {} is not a purchase bill",
                id
            )));
        }
        if before.cancelled {
            return Err(Error::validation(format!("transaction {} is cancelled", id)));
        }

        let mut draft = before.clone();
        for receipt in receipts {
            let item = draft
                .items
                .iter_mut()
                .find(|i| i.id == receipt.item_id)
                .ok_or_else(|| Error::not_found("line item", receipt.item_id))?;
            item.quantity_received = bill::clamp_received(receipt.quantity, item.quantity);
        }

        self.apply_update(before, draft, Some("items received".to_string()))
    }

    /// Adds a payment. The running total may not exceed the document total.
    /// Once something is paid, later payments must come from the same
    /// account: balances follow a single account per document.
    pub fn record_payment(
        &self,
        id: i64,
        amount: f64,
        account_id: Option<i64>,
    ) -> Result<Transaction> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Error::validation("payment amount must be positive"));
        }

        let _guard = self.write_guard()?;
        let before = self.get_transaction(id)?;
        if before.cancelled {
            return Err(Error::validation(format!("transaction {} is cancelled", id)));
        }
        if let Some(account_id) = account_id {
            if before.amount_paid > 0.0 && before.account_id != Some(account_id) {
                return Err(Error::validation(format!(
                    "transaction {} already has {:.2} paid from another account",
                    id, before.amount_paid
                )));
            }
        }

        let paid = bill::round_cents(before.amount_paid + amount);
        if paid > before.total + PAYMENT_TOLERANCE {
            return Err(Error::validation(format!(
                "payment of {:.2} exceeds balance due {:.2}",
                amount,
                before.balance_due()
            )));
        }

        let mut draft = before.clone();
        draft.amount_paid = paid.min(before.total);
        if account_id.is_some() {
            draft.account_id = account_id;
        }

        self.apply_update(before, draft, Some(format!("payment of {:.2}", amount)))
    }

    /// Idempotent: cancelling a cancelled document returns it unchanged
    pub fn cancel_transaction(&self, id: i64) -> Result<Transaction> {
        let _guard = self.write_guard()?;
        let before = self.get_transaction(id)?;
        if before.cancelled {
            return Ok(before);
        }

        let mut draft = before.clone();
        draft.cancelled = true;
        self.apply_update(before, draft, Some("cancelled".to_string()))
    }

    pub fn list_versions(&self, id: i64) -> Result<Vec<TransactionVersion>> {
        self.get_transaction(id)?;
        self.storage.list_transaction_versions(id)
    }

    /// Brings back the state captured as `version`. The restore itself is a
    /// new version, so it can be undone the same way.
    pub fn restore_version(&self, id: i64, version: i64) -> Result<Transaction> {
        let _guard = self.write_guard()?;
        let before = self.get_transaction(id)?;
        let snapshot = self
            .storage
            .list_transaction_versions(id)?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| Error::not_found("transaction version", version))?;

        if !snapshot.verify() {
            tracing::warn!(
                "checksum mismatch on transaction {} version {}",
                id,
                version
            );
        }

        let reason = format!("restored from version {}", version);
        self.apply_update(before, snapshot.snapshot, Some(reason))
    }

    /// Caller holds the write lock
    fn apply_update(
        &self,
        before: Transaction,
        mut draft: Transaction,
        reason: Option<String>,
    ) -> Result<Transaction> {
        draft.id = before.id;
        draft.business_id = before.business_id;
        draft.created_at = before.created_at;
        draft.version = before.version + 1;

        // Ids from other transactions become new lines; repeats are an error
        let mut seen = HashSet::new();
        for item in draft.items.iter_mut() {
            if before.item(item.id).is_none() {
                item.id = 0;
            } else if !seen.insert(item.id) {
                return Err(Error::validation(format!(
                    "line item {} appears more than once",
                    item.id
                )));
            }
        }
        self.prepare(&mut draft)?;

        let snapshot = TransactionVersion::capture(&before, reason.clone())?;
        let mut effects = Effects::default();
        effects.add_transaction(&before, -1.0);
        effects.add_transaction(&draft, 1.0);

        let stored = self
            .storage
            .commit_transaction_update(draft, snapshot, &effects)?;
        self.warn_overdrawn(&effects);

        tracing::info!(
            "updated transaction {} to version {} ({})",
            stored.id,
            stored.version,
            reason.as_deref().unwrap_or("edit")
        );
        Ok(stored)
    }

    /// Validates references and recomputes everything derived
    fn prepare(&self, tx: &mut Transaction) -> Result<()> {
        match (tx.document_type, tx.kind) {
            (DocumentType::Bill, TransactionKind::Income) => {
                return Err(Error::validation("a bill must be an expense"));
            }
            (DocumentType::Invoice, TransactionKind::Expense) => {
                return Err(Error::validation("an invoice must be income"));
            }
            _ => {}
        }

        if let Some(account_id) = tx.account_id {
            let account = self
                .storage
                .get_account(account_id)?
                .ok_or_else(|| Error::not_found("account", account_id))?;
            if account.business_id != tx.business_id {
                return Err(Error::validation(format!(
                    "account {} belongs to another business",
                    account_id
                )));
            }
        }

        if let Some(category_id) = tx.category_id {
            let category = self
                .storage
                .get_account_category(category_id)?
                .ok_or_else(|| Error::not_found("account category", category_id))?;
            if category.business_id != tx.business_id {
                return Err(Error::validation(format!(
                    "category {} belongs to another business",
                    category_id
                )));
            }
        }

        for product_id in tx.items.iter().filter_map(|i| i.product_id) {
            let product = self
                .storage
                .get_product(product_id)?
                .ok_or_else(|| Error::not_found("product", product_id))?;
            if product.business_id != tx.business_id {
                return Err(Error::validation(format!(
                    "product {} belongs to another business",
                    product_id
                )));
            }
        }

        // Old clients still send received quantities in metadata
        bill::absorb_legacy_received(tx);
        bill::recalculate(tx);

        if tx.amount_paid > tx.total + PAYMENT_TOLERANCE {
            return Err(Error::validation(format!(
                "amount paid {:.2} exceeds total {:.2}",
                tx.amount_paid, tx.total
            )));
        }
        Ok(())
    }

    /// The write is already committed; a failed read here only skips the log
    fn warn_overdrawn(&self, effects: &Effects) {
        for (account_id, _) in effects.account_deltas().filter(|(_, delta)| *delta < 0.0) {
            if let Ok(Some(account)) = self.storage.get_account(account_id) {
                if account.is_overdrawn() {
                    tracing::warn!(
                        "account {} ({}) is overdrawn: {:.2}",
                        account.id,
                        account.name,
                        account.current_balance
                    );
                }
            }
        }
    }

    // ========================================================================
    // ACCOUNTS & TRANSFERS
    // ========================================================================

    pub fn create_account(&self, mut account: Account) -> Result<Account> {
        account.opening_balance = bill::round_cents(account.opening_balance);
        account.current_balance = account.opening_balance;
        self.storage.create_account(account)
    }

    pub fn create_transfer(&self, mut transfer: Transfer) -> Result<Transfer> {
        let _guard = self.write_guard()?;
        if !transfer.amount.is_finite() || transfer.amount <= 0.0 {
            return Err(Error::validation("transfer amount must be positive"));
        }
        if transfer.from_account_id == transfer.to_account_id {
            return Err(Error::validation("cannot transfer to the same account"));
        }
        transfer.amount = bill::round_cents(transfer.amount);

        for account_id in [transfer.from_account_id, transfer.to_account_id] {
            let account = self
                .storage
                .get_account(account_id)?
                .ok_or_else(|| Error::not_found("account", account_id))?;
            if account.business_id != transfer.business_id {
                return Err(Error::validation(format!(
                    "account {} belongs to another business",
                    account_id
                )));
            }
        }

        let mut effects = Effects::default();
        effects.add_transfer(&transfer, 1.0);
        let stored = self.storage.commit_transfer_create(transfer, &effects)?;
        self.warn_overdrawn(&effects);

        tracing::info!(
            "transfer {}: {:.2} from account {} to {}",
            stored.id,
            stored.amount,
            stored.from_account_id,
            stored.to_account_id
        );
        Ok(stored)
    }

    pub fn delete_transfer(&self, id: i64) -> Result<()> {
        let _guard = self.write_guard()?;
        let transfer = self
            .storage
            .get_transfer(id)?
            .ok_or_else(|| Error::not_found("transfer", id))?;
        let mut effects = Effects::default();
        effects.add_transfer(&transfer, -1.0);
        self.storage.commit_transfer_delete(id, &effects)?;
        self.warn_overdrawn(&effects);
        Ok(())
    }

    // ========================================================================
    // USERS
    // ========================================================================

    pub fn create_user(&self, new_user: NewUser) -> Result<User> {
        let username = new_user.username.trim();
        if username.is_empty() {
            return Err(Error::validation("username is required"));
        }
        if new_user.password.is_empty() {
            return Err(Error::validation("password is required"));
        }
        if let Some(business_id) = new_user.business_id {
            if self.storage.get_business(business_id)?.is_none() {
                return Err(Error::not_found("business", business_id));
            }
        }

        let mut user = User::new(
            username,
            &new_user.display_name,
            new_user.role,
            &new_user.password,
        );
        user.business_id = new_user.business_id;

        let stored = self.storage.create_user(user)?;
        tracing::info!("created user {} ({})", stored.username, stored.role.as_str());
        Ok(stored)
    }

    /// `Some(user)` when the credentials match
    pub fn verify_user(&self, username: &str, password: &str) -> Result<Option<User>> {
        let user = self.storage.get_user_by_username(username.trim())?;
        Ok(user.filter(|u| u.verify_password(password)))
    }

    // ========================================================================
    // CONVERSATIONS
    // ========================================================================

    pub fn get_conversation(&self, id: i64) -> Result<Conversation> {
        self.storage
            .get_conversation(id)?
            .ok_or_else(|| Error::not_found("conversation", id))
    }

    pub fn create_conversation(&self, business_id: i64, customer_name: &str) -> Result<Conversation> {
        self.storage
            .create_conversation(Conversation::new(business_id, customer_name.trim()))
    }

    pub fn append_message(&self, id: i64, role: MessageRole, content: &str) -> Result<Conversation> {
        if content.trim().is_empty() {
            return Err(Error::validation("message is empty"));
        }
        let _guard = self.write_guard()?;
        let mut conversation = self.get_conversation(id)?;
        conversation.messages.push(Message {
            role,
            content: content.to_string(),
            at: Utc::now(),
        });
        self.storage.update_conversation(conversation)
    }

    pub fn add_to_cart(&self, id: i64, product_id: i64, quantity: f64) -> Result<Conversation> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(Error::validation("quantity must be positive"));
        }

        let _guard = self.write_guard()?;
        let mut conversation = self.open_conversation(id)?;
        let product = self
            .storage
            .get_product(product_id)?
            .ok_or_else(|| Error::not_found("product", product_id))?;
        if product.business_id != conversation.business_id {
            return Err(Error::validation(format!(
                "product {} belongs to another business",
                product_id
            )));
        }
        if !product.active {
            return Err(Error::validation(format!("{} is not for sale", product.name)));
        }

        conversation.add_to_cart(product_id, quantity);
        self.storage.update_conversation(conversation)
    }

    /// Turns the cart into a sales invoice priced at current sale prices
    pub fn confirm_order(&self, id: i64, account_id: Option<i64>) -> Result<OrderConfirmation> {
        let _guard = self.write_guard()?;
        let mut conversation = self.open_conversation(id)?;
        if conversation.cart.is_empty() {
            return Err(Error::validation("cart is empty"));
        }

        let mut invoice = Transaction::new_invoice(
            conversation.business_id,
            &conversation.customer_name,
            Utc::now().date_naive(),
        );
        invoice.account_id = account_id;
        invoice.description = format!("Order from conversation {}", conversation.id);
        invoice
            .metadata
            .insert("conversationId".to_string(), conversation.id.into());

        for line in &conversation.cart {
            let product = self
                .storage
                .get_product(line.product_id)?
                .ok_or_else(|| Error::not_found("product", line.product_id))?;
            invoice.items.push(LineItem::new(
                Some(product.id),
                &product.name,
                line.quantity,
                product.sale_price,
            ));
        }

        let invoice = self.insert_transaction(invoice)?;

        conversation.status = ConversationStatus::Ordered;
        conversation.order_transaction_id = Some(invoice.id);
        conversation.messages.push(Message {
            role: MessageRole::System,
            content: format!("Order placed: invoice {} total {:.2}", invoice.id, invoice.total),
            at: Utc::now(),
        });
        let conversation = self.storage.update_conversation(conversation)?;

        tracing::info!(
            "conversation {} ordered as invoice {}",
            conversation.id,
            invoice.id
        );
        Ok(OrderConfirmation {
            conversation,
            invoice,
        })
    }

    fn open_conversation(&self, id: i64) -> Result<Conversation> {
        let conversation = self.get_conversation(id)?;
        if !conversation.is_open() {
            return Err(Error::validation(format!(
                "conversation {} is {}",
                id,
                conversation.status.as_str()
            )));
        }
        Ok(conversation)
    }
}

// ShopLedger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod bill;
pub mod config;
pub mod csv_io;
pub mod db;
pub mod entities;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod print;
pub mod reports;
pub mod storage;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    migrate_add_product_categories, migrate_normalize_received_quantities, setup_database,
    table_counts,
};
pub use entities::{
    Account, AccountCategory, AccountType, Business, CartLine, CategoryKind, Conversation,
    ConversationStatus, Discount, DocumentType, LineItem, Message, MessageRole, Product,
    ProductCategory, Role, Status, TaxMode, Transaction, TransactionFilter, TransactionKind,
    TransactionVersion, Transfer, User,
};
pub use error::{Error, Result};
pub use ledger::{ItemReceipt, Ledger, NewUser, OrderConfirmation};
pub use storage::{DatabaseStorage, Effects, MemStorage, Storage};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

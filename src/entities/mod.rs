// Entity Models
//
// Conventional business records. Every entity carries an integer identity
// assigned by storage (0 until inserted).

pub mod account;
pub mod business;
pub mod category;
pub mod conversation;
pub mod product;
pub mod transaction;
pub mod transfer;
pub mod user;
pub mod version;

pub use account::{Account, AccountType};
pub use business::Business;
pub use category::{AccountCategory, CategoryKind, ProductCategory};
pub use conversation::{CartLine, Conversation, ConversationStatus, Message, MessageRole};
pub use product::Product;
pub use transaction::{
    Discount, DocumentType, LineItem, Status, TaxMode, Transaction, TransactionFilter,
    TransactionKind,
};
pub use transfer::Transfer;
pub use user::{Role, User};
pub use version::TransactionVersion;

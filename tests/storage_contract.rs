// Storage contract - the same checks against both backends

use chrono::NaiveDate;
use std::sync::Arc;

use shopledger::{
    Account, AccountCategory, AccountType, Business, CategoryKind, Conversation, DatabaseStorage,
    Effects, Error, LineItem, MemStorage, Product, ProductCategory, Role, Status, Storage, Transaction,
    TransactionFilter, TransactionKind, TransactionVersion, Transfer, User,
};

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn business(s: &dyn Storage) -> Business {
    s.create_business(Business::new("Shop", "USD")).unwrap()
}

fn check_business_crud(s: &dyn Storage) {
    let a = business(s);
    let b = s.create_business(Business::new("Second", "EUR")).unwrap();
    assert!(b.id > a.id);

    let mut renamed = a.clone();
    renamed.name = "Renamed".to_string();
    s.update_business(renamed).unwrap();
    assert_eq!(s.get_business(a.id).unwrap().unwrap().name, "Renamed");

    let names: Vec<String> = s.list_businesses().unwrap().into_iter().map(|b| b.name).collect();
    assert_eq!(names, vec!["Renamed", "Second"]);

    s.delete_business(b.id).unwrap();
    assert!(s.get_business(b.id).unwrap().is_none());
    assert!(matches!(s.delete_business(b.id), Err(Error::NotFound { .. })));

    let mut ghost = Business::new("Ghost", "USD");
    ghost.id = 999;
    assert!(matches!(s.update_business(ghost), Err(Error::NotFound { .. })));
}

fn check_business_with_records_conflicts(s: &dyn Storage) {
    let b = business(s);
    s.create_product(Product::new(b.id, "Flour", 1.0, 2.0)).unwrap();
    assert!(matches!(s.delete_business(b.id), Err(Error::Conflict(_))));
}

fn check_missing_business_is_not_found(s: &dyn Storage) {
    assert!(matches!(
        s.create_product(Product::new(77, "Orphan", 1.0, 1.0)),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        s.create_transaction(Transaction::new_bill(77, "V", date(1, 1))),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        s.create_conversation(Conversation::new(77, "Ana")),
        Err(Error::NotFound { .. })
    ));
}

fn check_products_and_categories(s: &dyn Storage) {
    let b = business(s);
    let cat = s
        .create_product_category(ProductCategory::new(b.id, "Baking"))
        .unwrap();

    let mut flour = Product::new(b.id, "Flour", 1.0, 2.0);
    flour.category_id = Some(cat.id);
    let flour = s.create_product(flour).unwrap();
    s.create_product(Product::new(b.id, "Sugar", 1.0, 2.0)).unwrap();

    assert_eq!(s.list_products(b.id).unwrap().len(), 2);
    assert_eq!(s.list_product_categories(b.id).unwrap().len(), 1);

    s.delete_product_category(cat.id).unwrap();
    assert_eq!(s.get_product(flour.id).unwrap().unwrap().category_id, None);

    let mut updated = s.get_product(flour.id).unwrap().unwrap();
    updated.stock_quantity = 12.5;
    s.update_product(updated).unwrap();
    assert_eq!(s.get_product(flour.id).unwrap().unwrap().stock_quantity, 12.5);
}

fn check_transaction_roundtrip_and_items(s: &dyn Storage) {
    let b = business(s);
    let p = s.create_product(Product::new(b.id, "Flour", 1.0, 2.0)).unwrap();

    let mut tx = Transaction::new_bill(b.id, "Mill", date(3, 1));
    tx.items = vec![
        LineItem::new(Some(p.id), "Flour", 10.0, 1.0),
        LineItem::new(None, "Freight", 1.0, 4.0),
    ];
    tx.version = 1;
    let stored = s.create_transaction(tx).unwrap();
    assert!(stored.id > 0);
    assert!(stored.items.iter().all(|i| i.id > 0));
    assert_ne!(stored.items[0].id, stored.items[1].id);

    let loaded = s.get_transaction(stored.id).unwrap().unwrap();
    assert_eq!(loaded.items, stored.items);
    assert_eq!(loaded.items[0].description, "Flour");

    let mut edit = loaded.clone();
    edit.items[0].quantity_received = 6.0;
    edit.items.push(LineItem::new(None, "Pallet", 1.0, 3.0));
    let edited = s.update_transaction(edit).unwrap();
    assert_eq!(edited.items[0].id, stored.items[0].id, "existing ids kept");
    assert!(edited.items[2].id > 0);

    let reloaded = s.get_transaction(stored.id).unwrap().unwrap();
    assert_eq!(reloaded.items.len(), 3);
    assert_eq!(reloaded.items[0].quantity_received, 6.0);

    s.delete_product(p.id).unwrap();
    let orphaned = s.get_transaction(stored.id).unwrap().unwrap();
    assert_eq!(orphaned.items[0].product_id, None);
}

fn check_transaction_filter(s: &dyn Storage) {
    let b = business(s);
    let other = s.create_business(Business::new("Other", "USD")).unwrap();

    s.create_transaction(Transaction::new_bill(b.id, "late", date(5, 1))).unwrap();
    s.create_transaction(Transaction::new_bill(b.id, "early", date(1, 1))).unwrap();
    let mut paid = Transaction::new_invoice(b.id, "paid", date(3, 1));
    paid.status = Status::Completed;
    s.create_transaction(paid).unwrap();
    s.create_transaction(Transaction::new_bill(other.id, "elsewhere", date(2, 1))).unwrap();

    let all = s.list_transactions(&TransactionFilter::for_business(b.id)).unwrap();
    let contacts: Vec<&str> = all.iter().map(|t| t.contact_name.as_str()).collect();
    assert_eq!(contacts, vec!["early", "paid", "late"]);

    let expenses = s
        .list_transactions(&TransactionFilter {
            kind: Some(TransactionKind::Expense),
            ..TransactionFilter::for_business(b.id)
        })
        .unwrap();
    assert_eq!(expenses.len(), 2);

    let completed = s
        .list_transactions(&TransactionFilter {
            status: Some(Status::Completed),
            ..TransactionFilter::for_business(b.id)
        })
        .unwrap();
    assert_eq!(completed.len(), 1);

    let window = s
        .list_transactions(&TransactionFilter {
            from: Some(date(1, 1)),
            to: Some(date(3, 1)),
            ..TransactionFilter::for_business(b.id)
        })
        .unwrap();
    assert_eq!(window.len(), 2, "bounds are inclusive");
}

fn check_versions(s: &dyn Storage) {
    let b = business(s);
    let mut tx = Transaction::new_bill(b.id, "Mill", date(1, 1));
    tx.version = 1;
    let tx = s.create_transaction(tx).unwrap();

    let mut v2 = tx.clone();
    v2.version = 2;
    s.insert_transaction_version(TransactionVersion::capture(&v2, Some("second".into())).unwrap())
        .unwrap();
    let first = s
        .insert_transaction_version(TransactionVersion::capture(&tx, None).unwrap())
        .unwrap();

    let versions = s.list_transaction_versions(tx.id).unwrap();
    assert_eq!(versions.iter().map(|v| v.version).collect::<Vec<_>>(), vec![1, 2]);
    assert!(versions.iter().all(|v| v.verify()));

    let fetched = s.get_transaction_version(first.id).unwrap().unwrap();
    assert_eq!(fetched.snapshot, tx);

    let mut orphan = TransactionVersion::capture(&tx, None).unwrap();
    orphan.transaction_id = 4242;
    assert!(matches!(
        s.insert_transaction_version(orphan),
        Err(Error::NotFound { .. })
    ));

    s.delete_transaction(tx.id).unwrap();
    assert!(s.list_transaction_versions(tx.id).unwrap().is_empty());
    assert!(s.get_transaction(tx.id).unwrap().is_none());
}

fn check_accounts_and_transfers(s: &dyn Storage) {
    let b = business(s);
    let cash = s
        .create_account(Account::new(b.id, "Till", AccountType::Cash, 50.0))
        .unwrap();
    let bank = s
        .create_account(Account::new(b.id, "Bank", AccountType::Bank, 0.0))
        .unwrap();
    let sales = s
        .create_account_category(AccountCategory::new(b.id, "Sales", CategoryKind::Income))
        .unwrap();

    let mut inv = Transaction::new_invoice(b.id, "Ana", date(2, 2));
    inv.account_id = Some(bank.id);
    inv.category_id = Some(sales.id);
    let inv = s.create_transaction(inv).unwrap();

    let t = s
        .create_transfer(Transfer::new(b.id, cash.id, bank.id, 10.0, date(2, 3)))
        .unwrap();
    assert_eq!(s.list_transfers(b.id).unwrap().len(), 1);
    assert!(matches!(
        s.create_transfer(Transfer::new(b.id, cash.id, 999, 1.0, date(2, 3))),
        Err(Error::NotFound { .. })
    ));

    assert!(matches!(s.delete_account(bank.id), Err(Error::Conflict(_))));
    s.delete_transfer(t.id).unwrap();
    s.delete_account(bank.id).unwrap();
    s.delete_account_category(sales.id).unwrap();

    let inv = s.get_transaction(inv.id).unwrap().unwrap();
    assert_eq!(inv.account_id, None);
    assert_eq!(inv.category_id, None);

    let mut renamed = s.get_account(cash.id).unwrap().unwrap();
    renamed.current_balance = 75.0;
    s.update_account(renamed).unwrap();
    assert_eq!(s.get_account(cash.id).unwrap().unwrap().current_balance, 75.0);
}

fn check_users(s: &dyn Storage) {
    let b = business(s);
    let mut owner = User::new("owner", "Owner", Role::Owner, "pw");
    owner.business_id = Some(b.id);
    let owner = s.create_user(owner).unwrap();

    assert!(matches!(
        s.create_user(User::new("owner", "Dup", Role::Staff, "pw")),
        Err(Error::Conflict(_))
    ));

    let fetched = s.get_user_by_username("owner").unwrap().unwrap();
    assert_eq!(fetched.id, owner.id);
    assert!(fetched.verify_password("pw"));
    assert!(s.get_user_by_username("nobody").unwrap().is_none());

    s.delete_business(b.id).unwrap();
    assert_eq!(s.get_user(owner.id).unwrap().unwrap().business_id, None);

    s.delete_user(owner.id).unwrap();
    assert!(s.list_users().unwrap().is_empty());
}

fn check_conversations(s: &dyn Storage) {
    let b = business(s);
    let mut c = s.create_conversation(Conversation::new(b.id, "Ana")).unwrap();
    c.add_to_cart(3, 2.0);
    s.update_conversation(c.clone()).unwrap();

    let mut order = Transaction::new_invoice(b.id, "Ana", date(4, 4));
    order.version = 1;
    let order = s.create_transaction(order).unwrap();

    let mut loaded = s.get_conversation(c.id).unwrap().unwrap();
    assert_eq!(loaded.cart.len(), 1);
    loaded.order_transaction_id = Some(order.id);
    s.update_conversation(loaded).unwrap();

    s.delete_transaction(order.id).unwrap();
    let after = s.get_conversation(c.id).unwrap().unwrap();
    assert_eq!(after.order_transaction_id, None);
    assert_eq!(s.list_conversations(b.id).unwrap().len(), 1);

    s.delete_conversation(c.id).unwrap();
    assert!(matches!(s.delete_conversation(c.id), Err(Error::NotFound { .. })));
}

fn check_ledger_commits(s: &dyn Storage) {
    let b = business(s);
    let till = s
        .create_account(Account::new(b.id, "Till", AccountType::Cash, 50.0))
        .unwrap();
    let bank = s
        .create_account(Account::new(b.id, "Bank", AccountType::Bank, 0.0))
        .unwrap();
    let mut flour = Product::new(b.id, "Flour", 1.0, 2.0);
    flour.stock_quantity = 2.0;
    let flour = s.create_product(flour).unwrap();
    let balance = |id: i64| s.get_account(id).unwrap().unwrap().current_balance;
    let stock = || s.get_product(flour.id).unwrap().unwrap().stock_quantity;

    let mut inv = Transaction::new_invoice(b.id, "Ana", date(6, 1));
    inv.version = 1;
    inv.account_id = Some(till.id);
    inv.amount_paid = 4.0;
    inv.items = vec![LineItem::new(Some(flour.id), "Flour", 2.0, 2.0)];
    let mut effects = Effects::default();
    effects.add_transaction(&inv, 1.0);
    let inv = s.commit_transaction_create(inv, &effects).unwrap();
    assert_eq!(balance(till.id), 54.0);
    assert_eq!(stock(), 0.0);

    let mut refunded = inv.clone();
    refunded.version = 2;
    refunded.amount_paid = 1.0;
    let mut effects = Effects::default();
    effects.add_transaction(&inv, -1.0);
    effects.add_transaction(&refunded, 1.0);
    let snapshot = TransactionVersion::capture(&inv, Some("refund".into())).unwrap();
    s.commit_transaction_update(refunded, snapshot, &effects).unwrap();
    assert_eq!(balance(till.id), 51.0);
    let versions = s.list_transaction_versions(inv.id).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].change_reason.as_deref(), Some("refund"));

    let mut ghost = inv.clone();
    ghost.id = 9999;
    let snapshot = TransactionVersion::capture(&ghost, None).unwrap();
    assert!(matches!(
        s.commit_transaction_update(ghost, snapshot, &effects),
        Err(Error::NotFound { .. })
    ));
    assert_eq!(balance(till.id), 51.0, "failed commit moves nothing");

    let t = Transfer::new(b.id, till.id, bank.id, 11.0, date(6, 2));
    let mut effects = Effects::default();
    effects.add_transfer(&t, 1.0);
    let t = s.commit_transfer_create(t, &effects).unwrap();
    assert_eq!((balance(till.id), balance(bank.id)), (40.0, 11.0));

    let mut effects = Effects::default();
    effects.add_transfer(&t, -1.0);
    s.commit_transfer_delete(t.id, &effects).unwrap();
    assert_eq!((balance(till.id), balance(bank.id)), (51.0, 0.0));

    let current = s.get_transaction(inv.id).unwrap().unwrap();
    let mut effects = Effects::default();
    effects.add_transaction(&current, -1.0);
    s.commit_transaction_delete(inv.id, &effects).unwrap();
    assert_eq!(balance(till.id), 50.0);
    assert_eq!(stock(), 2.0);
    assert!(s.list_transaction_versions(inv.id).unwrap().is_empty());
}

macro_rules! contract_suite {
    ($module:ident, $make:expr) => {
        mod $module {
            use super::*;

            fn storage() -> Arc<dyn Storage> {
                $make
            }

            #[test]
            fn business_crud() {
                check_business_crud(storage().as_ref());
            }

            #[test]
            fn business_with_records_conflicts() {
                check_business_with_records_conflicts(storage().as_ref());
            }

            #[test]
            fn missing_business_is_not_found() {
                check_missing_business_is_not_found(storage().as_ref());
            }

            #[test]
            fn products_and_categories() {
                check_products_and_categories(storage().as_ref());
            }

            #[test]
            fn transaction_roundtrip_and_items() {
                check_transaction_roundtrip_and_items(storage().as_ref());
            }

            #[test]
            fn transaction_filter() {
                check_transaction_filter(storage().as_ref());
            }

            #[test]
            fn versions() {
                check_versions(storage().as_ref());
            }

            #[test]
            fn accounts_and_transfers() {
                check_accounts_and_transfers(storage().as_ref());
            }

            #[test]
            fn users() {
                check_users(storage().as_ref());
            }

            #[test]
            fn conversations() {
                check_conversations(storage().as_ref());
            }

            #[test]
            fn ledger_commits() {
                check_ledger_commits(storage().as_ref());
            }
        }
    };
}

contract_suite!(memory, Arc::new(MemStorage::new()));
contract_suite!(sqlite, Arc::new(DatabaseStorage::in_memory().unwrap()));

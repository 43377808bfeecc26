// API - end-to-end through the axum router with in-memory storage
#![cfg(feature = "server")]

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use shopledger::api::{router, AppState};
use shopledger::{MemStorage, Storage};

fn app() -> Router {
    let storage: Arc<dyn Storage> = Arc::new(MemStorage::new());
    router(AppState::new(storage))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

async fn post(app: &Router, uri: &str, body: Value) -> Value {
    let (status, value) = send(app, Method::POST, uri, Some(body)).await;
    assert!(status.is_success(), "POST {} -> {} {}", uri, status, value);
    value["data"].clone()
}

async fn get(app: &Router, uri: &str) -> Value {
    let (status, value) = send(app, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::OK, "GET {} -> {}", uri, value);
    value["data"].clone()
}

/// Business, cash account and one product with 5 in stock
async fn seed(app: &Router) -> (i64, i64, i64) {
    let business = post(app, "/api/businesses", json!({"name": "Bakery", "currency": "USD"})).await;
    let b = business["id"].as_i64().unwrap();

    let account = post(
        app,
        "/api/accounts",
        json!({"businessId": b, "name": "Till", "accountType": "cash", "openingBalance": 100.0}),
    )
    .await;
    assert_eq!(account["currentBalance"], json!(100.0));

    let product = post(
        app,
        "/api/products",
        json!({"businessId": b, "name": "Flour", "costPrice": 2.0, "salePrice": 3.5, "stockQuantity": 5.0}),
    )
    .await;

    (b, account["id"].as_i64().unwrap(), product["id"].as_i64().unwrap())
}

#[tokio::test]
async fn test_health_envelope() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "data": "OK"}));
}

#[tokio::test]
async fn test_error_statuses() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/api/products/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("product"));

    let (status, body) = send(&app, Method::POST, "/api/businesses", Some(json!({"currency": "USD"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], json!(false));

    let (status, _) = send(&app, Method::GET, "/api/products", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "businessId is required");

    let (b, _, _) = seed(&app).await;
    let (status, _) = send(&app, Method::DELETE, &format!("/api/businesses/{}", b), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_purchase_bill_lifecycle() {
    let app = app();
    let (b, account, product) = seed(&app).await;

    let bill = post(
        &app,
        "/api/transactions",
        json!({
            "businessId": b,
            "kind": "expense",
            "documentType": "bill",
            "contactName": "Mill",
            "date": "2024-06-01",
            "accountId": account,
            "items": [{"productId": product, "description": "Flour", "quantity": 10, "unitPrice": 2.0}],
            "discount": {"type": "percentage", "value": 10}
        }),
    )
    .await;
    let id = bill["id"].as_i64().unwrap();
    let item_id = bill["items"][0]["id"].as_i64().unwrap();
    assert_eq!(bill["total"], json!(18.0));
    assert_eq!(bill["status"], json!("draft"));

    let received = post(
        &app,
        &format!("/api/transactions/{}/receive", id),
        json!({"items": [{"itemId": item_id, "quantity": 50}]}),
    )
    .await;
    assert_eq!(received["items"][0]["quantityReceived"], json!(10.0));
    assert_eq!(received["status"], json!("partial"));

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/transactions/{}/payments", id),
        Some(json!({"amount": 100})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let paid = post(
        &app,
        &format!("/api/transactions/{}/payments", id),
        json!({"amount": 18}),
    )
    .await;
    assert_eq!(paid["status"], json!("completed"));

    let stock = get(&app, &format!("/api/products/{}", product)).await;
    assert_eq!(stock["stockQuantity"], json!(15.0));
    let till = get(&app, &format!("/api/accounts/{}", account)).await;
    assert_eq!(till["currentBalance"], json!(82.0));

    let versions = get(&app, &format!("/api/transactions/{}/versions", id)).await;
    assert_eq!(versions.as_array().unwrap().len(), 2);

    let restored = post(
        &app,
        &format!("/api/transactions/{}/versions/1/restore", id),
        json!({}),
    )
    .await;
    assert_eq!(restored["status"], json!("draft"));
    assert_eq!(restored["version"], json!(4));
    let stock = get(&app, &format!("/api/products/{}", product)).await;
    assert_eq!(stock["stockQuantity"], json!(5.0));

    let (status, text) = send(&app, Method::GET, &format!("/api/transactions/{}/print", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.as_str().unwrap().contains("PURCHASE BILL"));
}

#[tokio::test]
async fn test_rejected_bill_edits_leave_history_and_balances() {
    let app = app();
    let (b, till, product) = seed(&app).await;

    let bill = post(
        &app,
        "/api/transactions",
        json!({
            "businessId": b, "kind": "expense", "documentType": "bill", "contactName": "Mill",
            "date": "2024-06-05", "accountId": till,
            "items": [{"productId": product, "description": "Flour", "quantity": 2, "unitPrice": 5.0}]
        }),
    )
    .await;
    let id = bill["id"].as_i64().unwrap();
    let line = bill["items"][0].clone();

    let (status, _) = send(
        &app,
        Method::PATCH,
        &format!("/api/transactions/{}", id),
        Some(json!({"items": [line.clone(), line]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let versions = get(&app, &format!("/api/transactions/{}/versions", id)).await;
    assert!(versions.as_array().unwrap().is_empty());

    let bank = post(
        &app,
        "/api/accounts",
        json!({"businessId": b, "name": "Bank", "accountType": "bank", "openingBalance": 50.0}),
    )
    .await;
    post(&app, &format!("/api/transactions/{}/payments", id), json!({"amount": 4})).await;
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/transactions/{}/payments", id),
        Some(json!({"amount": 6, "accountId": bank["id"]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let till = get(&app, &format!("/api/accounts/{}", till)).await;
    assert_eq!(till["currentBalance"], json!(96.0));
    let bank = get(&app, &format!("/api/accounts/{}", bank["id"])).await;
    assert_eq!(bank["currentBalance"], json!(50.0));
}

#[tokio::test]
async fn test_patch_transaction_records_reason() {
    let app = app();
    let (b, _, _) = seed(&app).await;

    let tx = post(
        &app,
        "/api/transactions",
        json!({
            "businessId": b, "kind": "expense", "documentType": "receipt",
            "date": "2024-06-02", "total": 40, "description": "Rent"
        }),
    )
    .await;
    let id = tx["id"].as_i64().unwrap();
    assert_eq!(tx["status"], json!("completed"));

    let (status, body) = send(
        &app,
        Method::PATCH,
        &format!("/api/transactions/{}", id),
        Some(json!({"total": 45, "changeReason": "rent went up"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], json!(45.0));
    assert_eq!(body["data"]["description"], json!("Rent"));

    let versions = get(&app, &format!("/api/transactions/{}/versions", id)).await;
    assert_eq!(versions[0]["changeReason"], json!("rent went up"));
    assert_eq!(versions[0]["snapshot"]["total"], json!(40.0));
}

#[tokio::test]
async fn test_conversation_to_invoice() {
    let app = app();
    let (b, _, product) = seed(&app).await;

    let convo = post(&app, "/api/conversations", json!({"businessId": b, "customerName": "Ana"})).await;
    let id = convo["id"].as_i64().unwrap();

    post(
        &app,
        &format!("/api/conversations/{}/messages", id),
        json!({"content": "two bags please"}),
    )
    .await;
    post(
        &app,
        &format!("/api/conversations/{}/cart", id),
        json!({"productId": product, "quantity": 2}),
    )
    .await;

    let order = post(&app, &format!("/api/conversations/{}/confirm", id), json!({})).await;
    assert_eq!(order["conversation"]["status"], json!("ordered"));
    assert_eq!(order["invoice"]["total"], json!(7.0));
    assert_eq!(order["invoice"]["documentType"], json!("invoice"));

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/conversations/{}/confirm", id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let analytics = get(&app, &format!("/api/reports/analytics?businessId={}", b)).await;
    assert_eq!(analytics["revenue"], json!(7.0));
    assert_eq!(analytics["receivables"], json!(7.0));
    assert_eq!(analytics["topProducts"][0]["quantity"], json!(2.0));
}

#[tokio::test]
async fn test_users_never_expose_hash() {
    let app = app();
    let user = post(
        &app,
        "/api/users",
        json!({"username": "maria", "password": "s3cret", "role": "owner"}),
    )
    .await;
    assert!(user.get("passwordHash").is_none());

    let ok = post(&app, "/api/users/verify", json!({"username": "maria", "password": "s3cret"})).await;
    assert_eq!(ok["valid"], json!(true));
    let bad = post(&app, "/api/users/verify", json!({"username": "maria", "password": "nope"})).await;
    assert_eq!(bad["valid"], json!(false));

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/users",
        Some(json!({"username": "maria", "password": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_reports_and_transfers() {
    let app = app();
    let (b, till, _) = seed(&app).await;
    let bank = post(
        &app,
        "/api/accounts",
        json!({"businessId": b, "name": "Bank", "accountType": "bank"}),
    )
    .await;

    post(
        &app,
        "/api/transfers",
        json!({"businessId": b, "fromAccountId": till, "toAccountId": bank["id"], "amount": 30, "date": "2024-06-03"}),
    )
    .await;
    post(
        &app,
        "/api/transactions",
        json!({"businessId": b, "kind": "income", "documentType": "receipt", "date": "2024-06-04", "total": 12, "accountId": till}),
    )
    .await;

    let flow = get(&app, &format!("/api/reports/cash-flow?businessId={}&from=2024-06-01&to=2024-06-30", b)).await;
    assert_eq!(flow["inflows"], json!(12.0));
    assert_eq!(flow["transferCount"], json!(1));

    let pnl = get(&app, &format!("/api/reports/profit-and-loss?businessId={}", b)).await;
    assert_eq!(pnl["netProfit"], json!(12.0));

    let sheet = get(&app, &format!("/api/reports/balance-sheet?businessId={}&asOf=2024-12-31", b)).await;
    // 100 opening + 12 receipt; flour 5 x 2.0 cost
    assert_eq!(sheet["cashAndBank"], json!(112.0));
    assert_eq!(sheet["inventory"], json!(10.0));
}

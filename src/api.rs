// 🌐 REST API - axum router under /api
//
// Every response is wrapped as `{ success, data, error? }`. Handlers return
// `Result<_, ApiError>` and the error side picks the status code.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::entities::{
    Account, AccountCategory, Business, Conversation, DocumentType, MessageRole, Product,
    ProductCategory, Status, Transaction, TransactionFilter, TransactionKind, TransactionVersion,
    Transfer, User,
};
use crate::error::Error;
use crate::ledger::{ItemReceipt, Ledger, NewUser, OrderConfirmation};
use crate::print::render_bill;
use crate::reports::{self, Analytics, BalanceSheet, CashFlowReport, Period, ProfitAndLoss};
use crate::storage::Storage;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    ledger: Ledger,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        AppState {
            ledger: Ledger::new(storage),
        }
    }

    fn store(&self) -> &Arc<dyn Storage> {
        self.ledger.storage()
    }
}

// ============================================================================
// ENVELOPE & ERRORS
// ============================================================================

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
type Created<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

fn created<T>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(data))))
}

#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError(Error::Json(e))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        } else {
            tracing::warn!("request rejected: {}", self.0);
        }
        (status, Json(ApiResponse::<()>::failure(self.0.to_string()))).into_response()
    }
}

/// `Json` whose rejection is enveloped like every other error
pub struct Body<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Body<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| Error::validation(e.body_text()))?;
        Ok(Body(value))
    }
}

/// `Query` with an enveloped rejection
pub struct Params<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| Error::validation(e.body_text()))?;
        Ok(Params(value))
    }
}

fn found<T>(entity: &'static str, id: i64, row: Option<T>) -> Result<T, ApiError> {
    row.ok_or_else(|| Error::not_found(entity, id).into())
}

/// RFC 7386 JSON merge patch
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(&key);
                } else {
                    merge(target.entry(key).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

fn patched<T: Serialize + DeserializeOwned>(current: &T, patch: Value) -> crate::error::Result<T> {
    let mut value = serde_json::to_value(current)?;
    merge(&mut value, patch);
    serde_json::from_value(value).map_err(|e| Error::validation(e.to_string()))
}

// ============================================================================
// QUERY & BODY TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessQuery {
    pub business_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    pub business_id: Option<i64>,
    pub kind: Option<TransactionKind>,
    pub document_type: Option<DocumentType>,
    pub status: Option<Status>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub business_id: i64,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveBody {
    pub items: Vec<ItemReceipt>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBody {
    pub amount: f64,
    #[serde(default)]
    pub account_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub business_id: i64,
    #[serde(default)]
    pub customer_name: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    #[serde(default = "customer_role")]
    pub role: MessageRole,
    pub content: String,
}

fn customer_role() -> MessageRole {
    MessageRole::Customer
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartBody {
    pub product_id: i64,
    pub quantity: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    #[serde(default)]
    pub account_id: Option<i64>,
}

// ============================================================================
// BUSINESSES & CATEGORIES
// ============================================================================

/// GET /api/health
async fn health_check() -> ApiResult<&'static str> {
    ok("OK")
}

async fn list_businesses(State(state): State<AppState>) -> ApiResult<Vec<Business>> {
    ok(state.store().list_businesses()?)
}

async fn create_business(
    State(state): State<AppState>,
    Body(business): Body<Business>,
) -> Created<Business> {
    if business.name.trim().is_empty() {
        return Err(Error::validation("business name is required").into());
    }
    created(state.store().create_business(business)?)
}

async fn get_business(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Business> {
    ok(found("business", id, state.store().get_business(id)?)?)
}

async fn update_business(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(patch): Body<Value>,
) -> ApiResult<Business> {
    let current = found("business", id, state.store().get_business(id)?)?;
    let mut next: Business = patched(&current, patch)?;
    next.id = id;
    ok(state.store().update_business(next)?)
}

async fn delete_business(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    ok(state.store().delete_business(id)?)
}

async fn list_product_categories(
    State(state): State<AppState>,
    Path(business_id): Path<i64>,
) -> ApiResult<Vec<ProductCategory>> {
    ok(state.store().list_product_categories(business_id)?)
}

async fn create_product_category(
    State(state): State<AppState>,
    Path(business_id): Path<i64>,
    Body(mut category): Body<ProductCategory>,
) -> Created<ProductCategory> {
    category.business_id = business_id;
    created(state.store().create_product_category(category)?)
}

async fn delete_product_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    ok(state.store().delete_product_category(id)?)
}

async fn list_account_categories(
    State(state): State<AppState>,
    Params(q): Params<BusinessQuery>,
) -> ApiResult<Vec<AccountCategory>> {
    ok(state.store().list_account_categories(q.business_id)?)
}

async fn create_account_category(
    State(state): State<AppState>,
    Body(category): Body<AccountCategory>,
) -> Created<AccountCategory> {
    created(state.store().create_account_category(category)?)
}

async fn get_account_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<AccountCategory> {
    ok(found("account category", id, state.store().get_account_category(id)?)?)
}

async fn update_account_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(patch): Body<Value>,
) -> ApiResult<AccountCategory> {
    let current = found("account category", id, state.store().get_account_category(id)?)?;
    let mut next: AccountCategory = patched(&current, patch)?;
    next.id = id;
    next.business_id = current.business_id;
    ok(state.store().update_account_category(next)?)
}

async fn delete_account_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    ok(state.store().delete_account_category(id)?)
}

// ============================================================================
// PRODUCTS & ACCOUNTS
// ============================================================================

async fn list_products(
    State(state): State<AppState>,
    Params(q): Params<BusinessQuery>,
) -> ApiResult<Vec<Product>> {
    ok(state.store().list_products(q.business_id)?)
}

async fn create_product(
    State(state): State<AppState>,
    Body(product): Body<Product>,
) -> Created<Product> {
    if product.name.trim().is_empty() {
        return Err(Error::validation("product name is required").into());
    }
    created(state.store().create_product(product)?)
}

async fn get_product(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Product> {
    ok(found("product", id, state.store().get_product(id)?)?)
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(patch): Body<Value>,
) -> ApiResult<Product> {
    // The ledger also writes stock, so edit under its lock
    let product = state.ledger.exclusive(|store| {
        let current = store
            .get_product(id)?
            .ok_or_else(|| Error::not_found("product", id))?;
        let mut next: Product = patched(&current, patch)?;
        next.id = id;
        next.business_id = current.business_id;
        store.update_product(next)
    })?;
    ok(product)
}

async fn delete_product(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    ok(state.store().delete_product(id)?)
}

async fn list_accounts(
    State(state): State<AppState>,
    Params(q): Params<BusinessQuery>,
) -> ApiResult<Vec<Account>> {
    ok(state.store().list_accounts(q.business_id)?)
}

async fn create_account(
    State(state): State<AppState>,
    Body(account): Body<Account>,
) -> Created<Account> {
    created(state.ledger.create_account(account)?)
}

async fn get_account(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Account> {
    ok(found("account", id, state.store().get_account(id)?)?)
}

async fn update_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(patch): Body<Value>,
) -> ApiResult<Account> {
    let account = state.ledger.exclusive(|store| {
        let current = store
            .get_account(id)?
            .ok_or_else(|| Error::not_found("account", id))?;
        let mut next: Account = patched(&current, patch)?;
        next.id = id;
        next.business_id = current.business_id;
        store.update_account(next)
    })?;
    ok(account)
}

async fn delete_account(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    ok(state.store().delete_account(id)?)
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

async fn list_transactions(
    State(state): State<AppState>,
    Params(q): Params<TransactionQuery>,
) -> ApiResult<Vec<Transaction>> {
    let filter = TransactionFilter {
        business_id: q.business_id,
        kind: q.kind,
        document_type: q.document_type,
        status: q.status,
        from: q.from,
        to: q.to,
    };
    ok(state.store().list_transactions(&filter)?)
}

async fn create_transaction(
    State(state): State<AppState>,
    Body(draft): Body<Transaction>,
) -> Created<Transaction> {
    created(state.ledger.create_transaction(draft)?)
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Transaction> {
    ok(state.ledger.get_transaction(id)?)
}

/// PATCH /api/transactions/:id - merge patch; optional `changeReason`
async fn update_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(mut patch): Body<Value>,
) -> ApiResult<Transaction> {
    let reason = patch
        .as_object_mut()
        .and_then(|obj| obj.remove("changeReason"))
        .and_then(|v| v.as_str().map(str::to_string));

    let updated = state
        .ledger
        .edit_transaction(id, reason, |current| patched(current, patch))?;
    ok(updated)
}

async fn delete_transaction(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    ok(state.ledger.delete_transaction(id)?)
}

async fn receive_items(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(body): Body<ReceiveBody>,
) -> ApiResult<Transaction> {
    ok(state.ledger.receive_bill_items(id, &body.items)?)
}

async fn record_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(body): Body<PaymentBody>,
) -> ApiResult<Transaction> {
    ok(state.ledger.record_payment(id, body.amount, body.account_id)?)
}

async fn cancel_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Transaction> {
    ok(state.ledger.cancel_transaction(id)?)
}

async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<TransactionVersion>> {
    ok(state.ledger.list_versions(id)?)
}

async fn restore_version(
    State(state): State<AppState>,
    Path((id, version)): Path<(i64, i64)>,
) -> ApiResult<Transaction> {
    ok(state.ledger.restore_version(id, version)?)
}

/// GET /api/transactions/:id/print - plain text, not enveloped
async fn print_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let tx = state.ledger.get_transaction(id)?;
    let business = found("business", tx.business_id, state.store().get_business(tx.business_id)?)?;
    let text = render_bill(&business, &tx);
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response())
}

// ============================================================================
// TRANSFERS & USERS
// ============================================================================

async fn list_transfers(
    State(state): State<AppState>,
    Params(q): Params<BusinessQuery>,
) -> ApiResult<Vec<Transfer>> {
    ok(state.store().list_transfers(q.business_id)?)
}

async fn create_transfer(
    State(state): State<AppState>,
    Body(transfer): Body<Transfer>,
) -> Created<Transfer> {
    created(state.ledger.create_transfer(transfer)?)
}

async fn delete_transfer(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    ok(state.ledger.delete_transfer(id)?)
}

async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    ok(state.store().list_users()?)
}

async fn create_user(State(state): State<AppState>, Body(new_user): Body<NewUser>) -> Created<User> {
    created(state.ledger.create_user(new_user)?)
}

async fn get_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<User> {
    ok(found("user", id, state.store().get_user(id)?)?)
}

async fn delete_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    ok(state.store().delete_user(id)?)
}

async fn verify_user(
    State(state): State<AppState>,
    Body(body): Body<CredentialsBody>,
) -> ApiResult<VerifyResult> {
    let user = state.ledger.verify_user(&body.username, &body.password)?;
    ok(VerifyResult {
        valid: user.is_some(),
        user,
    })
}

// ============================================================================
// CONVERSATIONS
// ============================================================================

async fn list_conversations(
    State(state): State<AppState>,
    Params(q): Params<BusinessQuery>,
) -> ApiResult<Vec<Conversation>> {
    ok(state.store().list_conversations(q.business_id)?)
}

async fn create_conversation(
    State(state): State<AppState>,
    Body(body): Body<NewConversation>,
) -> Created<Conversation> {
    created(
        state
            .ledger
            .create_conversation(body.business_id, &body.customer_name)?,
    )
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Conversation> {
    ok(state.ledger.get_conversation(id)?)
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(body): Body<MessageBody>,
) -> ApiResult<Conversation> {
    ok(state.ledger.append_message(id, body.role, &body.content)?)
}

async fn add_to_cart(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(body): Body<CartBody>,
) -> ApiResult<Conversation> {
    ok(state.ledger.add_to_cart(id, body.product_id, body.quantity)?)
}

async fn confirm_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Body(body): Body<ConfirmBody>,
) -> ApiResult<OrderConfirmation> {
    ok(state.ledger.confirm_order(id, body.account_id)?)
}

// ============================================================================
// REPORTS
// ============================================================================

fn period_transactions(state: &AppState, q: &ReportQuery) -> Result<Vec<Transaction>, ApiError> {
    let filter = TransactionFilter {
        from: q.from,
        to: q.to,
        ..TransactionFilter::for_business(q.business_id)
    };
    Ok(state.store().list_transactions(&filter)?)
}

async fn cash_flow_report(
    State(state): State<AppState>,
    Params(q): Params<ReportQuery>,
) -> ApiResult<CashFlowReport> {
    let period = Period::new(q.from, q.to);
    let transactions = period_transactions(&state, &q)?;
    let transfers = state.store().list_transfers(q.business_id)?;
    let categories = state.store().list_account_categories(q.business_id)?;
    ok(reports::cash_flow(&transactions, &transfers, &categories, period))
}

async fn profit_and_loss_report(
    State(state): State<AppState>,
    Params(q): Params<ReportQuery>,
) -> ApiResult<ProfitAndLoss> {
    let period = Period::new(q.from, q.to);
    let transactions = period_transactions(&state, &q)?;
    let categories = state.store().list_account_categories(q.business_id)?;
    ok(reports::profit_and_loss(&transactions, &categories, period))
}

async fn balance_sheet_report(
    State(state): State<AppState>,
    Params(q): Params<ReportQuery>,
) -> ApiResult<BalanceSheet> {
    let as_of = q.as_of.or(q.to).unwrap_or_else(|| Utc::now().date_naive());
    let store = state.store();
    let transactions = store.list_transactions(&TransactionFilter::for_business(q.business_id))?;
    ok(reports::balance_sheet(
        &store.list_accounts(q.business_id)?,
        &transactions,
        &store.list_transfers(q.business_id)?,
        &store.list_products(q.business_id)?,
        as_of,
    ))
}

async fn analytics_report(
    State(state): State<AppState>,
    Params(q): Params<ReportQuery>,
) -> ApiResult<Analytics> {
    let transactions = period_transactions(&state, &q)?;
    let products = state.store().list_products(q.business_id)?;
    ok(reports::analytics(&transactions, &products))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/businesses", get(list_businesses).post(create_business))
        .route(
            "/businesses/:id",
            get(get_business).patch(update_business).delete(delete_business),
        )
        .route(
            "/businesses/:id/product-categories",
            get(list_product_categories).post(create_product_category),
        )
        .route("/product-categories/:id", delete(delete_product_category))
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/:id",
            get(get_product).patch(update_product).delete(delete_product),
        )
        .route(
            "/account-categories",
            get(list_account_categories).post(create_account_category),
        )
        .route(
            "/account-categories/:id",
            get(get_account_category)
                .patch(update_account_category)
                .delete(delete_account_category),
        )
        .route("/accounts", get(list_accounts).post(create_account))
        .route(
            "/accounts/:id",
            get(get_account).patch(update_account).delete(delete_account),
        )
        .route(
            "/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route(
            "/transactions/:id",
            get(get_transaction)
                .patch(update_transaction)
                .delete(delete_transaction),
        )
        .route("/transactions/:id/receive", post(receive_items))
        .route("/transactions/:id/payments", post(record_payment))
        .route("/transactions/:id/cancel", post(cancel_transaction))
        .route("/transactions/:id/versions", get(list_versions))
        .route(
            "/transactions/:id/versions/:version/restore",
            post(restore_version),
        )
        .route("/transactions/:id/print", get(print_transaction))
        .route("/transfers", get(list_transfers).post(create_transfer))
        .route("/transfers/:id", delete(delete_transfer))
        .route("/users", get(list_users).post(create_user))
        .route("/users/verify", post(verify_user))
        .route("/users/:id", get(get_user).delete(delete_user))
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/conversations/:id", get(get_conversation))
        .route("/conversations/:id/messages", post(post_message))
        .route("/conversations/:id/cart", post(add_to_cart))
        .route("/conversations/:id/confirm", post(confirm_order))
        .route("/reports/cash-flow", get(cash_flow_report))
        .route("/reports/profit-and-loss", get(profit_and_loss_report))
        .route("/reports/balance-sheet", get(balance_sheet_report))
        .route("/reports/analytics", get(analytics_report))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

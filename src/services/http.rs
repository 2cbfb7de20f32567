use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{
    accruals::AccrualRequest, admin::AdminRequest, deposits::DepositRequest,
    transactions::TransactionServiceRequest, users::UserRequest, ServiceError,
};
use crate::models::users::NewUser;
use crate::settings;
use crate::utils::parse_amount;

mod users;

#[derive(Clone)]
pub struct Channels {
    pub accrual_channel: mpsc::Sender<AccrualRequest>,
    pub admin_channel: mpsc::Sender<AdminRequest>,
    pub deposit_channel: mpsc::Sender<DepositRequest>,
    pub transaction_channel: mpsc::Sender<TransactionServiceRequest>,
    pub user_channel: mpsc::Sender<UserRequest>,
}

type Reply = (StatusCode, Json<serde_json::Value>);

/// Sends a request to a service and waits for its answer.
async fn call<R, T>(
    channel: &mpsc::Sender<R>,
    request: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication("send".to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication("receive".to_string(), e.to_string()))?
}

fn status_for(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::AlreadyProcessed(_) | ServiceError::DepositClosed(_) => StatusCode::CONFLICT,
        ServiceError::InsufficientBalance { .. } | ServiceError::BelowMinimum { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServiceError::InvalidAmount(_)
        | ServiceError::InvalidAddress(_)
        | ServiceError::EmptyReason => StatusCode::BAD_REQUEST,
        ServiceError::Unauthorized(_) | ServiceError::InvalidPassword => StatusCode::FORBIDDEN,
        ServiceError::Storage(_) | ServiceError::Communication(_, _) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn reply<T: Serialize>(result: Result<T, ServiceError>, success: StatusCode) -> Reply {
    match result {
        Ok(body) => (success, Json(json!(body))),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                log::error!("Request failed: {}", e);
            }
            (status, Json(json!({"error": e.to_string()})))
        }
    }
}

fn acknowledge(result: Result<(), ServiceError>) -> Reply {
    reply(result.map(|()| json!({"status": "ok"})), StatusCode::OK)
}

#[derive(Deserialize)]
struct AmountRequest {
    amount: String,
}

#[derive(Deserialize)]
struct WithdrawRequest {
    amount: String,
    address: String,
}

#[derive(Deserialize)]
struct AdminQuery {
    admin_id: i64,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct AdminAction {
    admin_id: i64,
}

#[derive(Deserialize)]
struct RejectAction {
    admin_id: i64,
    reason: String,
}

#[derive(Deserialize)]
struct CreditAction {
    admin_id: i64,
    amount: String,
}

#[derive(Deserialize)]
struct AdminFlagAction {
    admin_id: i64,
    is_admin: bool,
}

#[derive(Deserialize)]
struct PasswordAction {
    admin_id: i64,
    password: String,
}

#[derive(Deserialize)]
struct NewsAction {
    admin_id: i64,
    content: String,
}

#[derive(Deserialize)]
struct AccrualAction {
    admin_id: i64,
    date: Option<NaiveDate>,
}

async fn register_user(State(state): State<Channels>, Json(req): Json<NewUser>) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::GetOrCreateUser {
        new_user: req,
        response,
    })
    .await;

    reply(result, StatusCode::OK)
}

async fn list_deposits(State(state): State<Channels>, Path(user_id): Path<i64>) -> impl IntoResponse {
    let result = call(&state.deposit_channel, |response| DepositRequest::ListDeposits {
        user_id,
        response,
    })
    .await;

    reply(result, StatusCode::OK)
}

async fn open_deposit(
    State(state): State<Channels>,
    Path(user_id): Path<i64>,
    Json(req): Json<AmountRequest>,
) -> impl IntoResponse {
    let amount = match parse_amount(&req.amount) {
        Ok(amount) => amount,
        Err(e) => return reply::<()>(Err(e), StatusCode::CREATED),
    };

    let result = call(&state.deposit_channel, |response| DepositRequest::OpenDeposit {
        user_id,
        amount,
        response,
    })
    .await;

    reply(result, StatusCode::CREATED)
}

async fn request_withdraw(
    State(state): State<Channels>,
    Path(user_id): Path<i64>,
    Json(req): Json<WithdrawRequest>,
) -> impl IntoResponse {
    let amount = match parse_amount(&req.amount) {
        Ok(amount) => amount,
        Err(e) => return reply::<()>(Err(e), StatusCode::CREATED),
    };

    let result = call(&state.transaction_channel, |response| {
        TransactionServiceRequest::RequestWithdraw {
            user_id,
            amount,
            address: req.address,
            response,
        }
    })
    .await;

    reply(result, StatusCode::CREATED)
}

async fn topup_instructions(State(state): State<Channels>) -> impl IntoResponse {
    let (response_tx, response_rx) = oneshot::channel();

    if let Err(e) = state
        .transaction_channel
        .send(TransactionServiceRequest::TopupInstructions {
            response: response_tx,
        })
        .await
    {
        return reply::<()>(
            Err(ServiceError::Communication("send".to_string(), e.to_string())),
            StatusCode::OK,
        );
    }

    let result = response_rx
        .await
        .map_err(|e| ServiceError::Communication("receive".to_string(), e.to_string()));
    reply(result, StatusCode::OK)
}

async fn get_news(State(state): State<Channels>) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::GetNews { response }).await;

    reply(result.map(|content| json!({"content": content})), StatusCode::OK)
}

async fn list_pending(
    State(state): State<Channels>,
    Query(query): Query<AdminQuery>,
) -> impl IntoResponse {
    let result = call(&state.transaction_channel, |response| {
        TransactionServiceRequest::ListPending {
            admin_id: query.admin_id,
            limit: query.limit,
            response,
        }
    })
    .await;

    reply(result, StatusCode::OK)
}

async fn approve_transaction(
    State(state): State<Channels>,
    Path(transaction_id): Path<i64>,
    Json(req): Json<AdminAction>,
) -> impl IntoResponse {
    let result = call(&state.transaction_channel, |response| {
        TransactionServiceRequest::Approve {
            transaction_id,
            admin_id: req.admin_id,
            response,
        }
    })
    .await;

    reply(result, StatusCode::OK)
}

async fn reject_transaction(
    State(state): State<Channels>,
    Path(transaction_id): Path<i64>,
    Json(req): Json<RejectAction>,
) -> impl IntoResponse {
    let result = call(&state.transaction_channel, |response| {
        TransactionServiceRequest::Reject {
            transaction_id,
            admin_id: req.admin_id,
            reason: req.reason,
            response,
        }
    })
    .await;

    reply(result, StatusCode::OK)
}

async fn credit_user(
    State(state): State<Channels>,
    Path(user_id): Path<i64>,
    Json(req): Json<CreditAction>,
) -> impl IntoResponse {
    let amount = match parse_amount(&req.amount) {
        Ok(amount) => amount,
        Err(e) => return reply::<()>(Err(e), StatusCode::CREATED),
    };

    let result = call(&state.transaction_channel, |response| {
        TransactionServiceRequest::AdminCredit {
            admin_id: req.admin_id,
            user_id,
            amount,
            response,
        }
    })
    .await;

    reply(result, StatusCode::CREATED)
}

async fn set_user_admin(
    State(state): State<Channels>,
    Path(user_id): Path<i64>,
    Json(req): Json<AdminFlagAction>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::SetAdmin {
        admin_id: req.admin_id,
        user_id,
        is_admin: req.is_admin,
        response,
    })
    .await;

    acknowledge(result)
}

async fn close_deposit(
    State(state): State<Channels>,
    Path(deposit_id): Path<i64>,
    Json(req): Json<AdminAction>,
) -> impl IntoResponse {
    let result = call(&state.deposit_channel, |response| DepositRequest::CloseDeposit {
        deposit_id,
        admin_id: req.admin_id,
        response,
    })
    .await;

    reply(result, StatusCode::OK)
}

async fn admin_login(State(state): State<Channels>, Json(req): Json<PasswordAction>) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::Login {
        admin_id: req.admin_id,
        password: req.password,
        response,
    })
    .await;

    acknowledge(result)
}

async fn change_password(
    State(state): State<Channels>,
    Json(req): Json<PasswordAction>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::ChangePassword {
        admin_id: req.admin_id,
        password: req.password,
        response,
    })
    .await;

    acknowledge(result)
}

async fn set_news(State(state): State<Channels>, Json(req): Json<NewsAction>) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::SetNews {
        admin_id: req.admin_id,
        content: req.content,
        response,
    })
    .await;

    acknowledge(result)
}

async fn stats(State(state): State<Channels>, Query(query): Query<AdminQuery>) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::GetStats {
        admin_id: query.admin_id,
        response,
    })
    .await;

    reply(result, StatusCode::OK)
}

async fn run_accruals(State(state): State<Channels>, Json(req): Json<AccrualAction>) -> impl IntoResponse {
    let authorized = call(&state.admin_channel, |response| AdminRequest::Authorize {
        admin_id: req.admin_id,
        response,
    })
    .await;
    if let Err(e) = authorized {
        return reply::<()>(Err(e), StatusCode::OK);
    }

    let result = call(&state.accrual_channel, |response| AccrualRequest::Run {
        as_of: req.date,
        response,
    })
    .await;

    reply(result, StatusCode::OK)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

fn admin_token_matches(expected: Option<&str>, headers: &HeaderMap) -> bool {
    match expected {
        Some(expected) => headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|token| token == expected),
        None => true,
    }
}

/// Admin handlers trust the `admin_id` they are given, so the caller must
/// prove it is the front end before reaching them.
async fn require_admin_token(
    State(expected): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Response {
    if !admin_token_matches(expected.as_deref(), request.headers()) {
        log::warn!("Rejected {} {}: bad admin token", request.method(), request.uri());
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Invalid admin token"}))).into_response();
    }

    next.run(request).await
}

fn router(channels: Channels, admin_token: Option<Arc<str>>) -> Router {
    let admin = Router::new()
        .route("/admin/login", post(admin_login))
        .route("/admin/password", put(change_password))
        .route("/admin/news", put(set_news))
        .route("/admin/stats", get(stats))
        .route("/admin/transactions/pending", get(list_pending))
        .route("/admin/transactions/{id}/approve", post(approve_transaction))
        .route("/admin/transactions/{id}/reject", post(reject_transaction))
        .route("/admin/users/{id}/credit", post(credit_user))
        .route("/admin/users/{id}/admin", put(set_user_admin))
        .route("/admin/deposits/{id}/close", post(close_deposit))
        .route("/admin/accruals/run", post(run_accruals))
        .route_layer(middleware::from_fn_with_state(admin_token, require_admin_token));

    Router::new()
        .route("/users", post(register_user))
        .route("/users/{id}", get(users::get_user_details))
        .route("/users/{id}/profile", get(users::get_profile))
        .route("/users/{id}/referrals", get(users::get_referrals))
        .route("/users/{id}/deposits", get(list_deposits).post(open_deposit))
        .route("/users/{id}/withdrawals", post(request_withdraw))
        .route("/topup", get(topup_instructions))
        .route("/news", get(get_news))
        .route("/health", get(|| async { "OK" }))
        .merge(admin)
        .with_state(channels)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(http: &settings::Http, channels: Channels) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::bind(&http.listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    if http.admin_token.is_none() {
        log::warn!("No admin token configured, /admin routes are open to any caller.");
    }

    let admin_token = http.admin_token.as_deref().map(Arc::from);
    axum::serve(listener, router(channels, admin_token))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::future::IntoFuture;

    #[test]
    fn errors_map_to_http_statuses() {
        assert_eq!(status_for(&ServiceError::NotFound("user 1".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&ServiceError::AlreadyProcessed(1)), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&ServiceError::InsufficientBalance {
                available: dec!(1),
                requested: dec!(2),
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(&ServiceError::EmptyReason), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ServiceError::InvalidPassword), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&ServiceError::Storage("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn admin_token_must_match_when_configured() {
        let mut headers = HeaderMap::new();
        assert!(admin_token_matches(None, &headers));
        assert!(!admin_token_matches(Some("secret"), &headers));

        headers.insert(ADMIN_TOKEN_HEADER, "wrong".parse().unwrap());
        assert!(!admin_token_matches(Some("secret"), &headers));

        headers.insert(ADMIN_TOKEN_HEADER, "secret".parse().unwrap());
        assert!(admin_token_matches(Some("secret"), &headers));
    }

    fn stopped_channels() -> Channels {
        Channels {
            accrual_channel: mpsc::channel(1).0,
            admin_channel: mpsc::channel(1).0,
            deposit_channel: mpsc::channel(1).0,
            transaction_channel: mpsc::channel(1).0,
            user_channel: mpsc::channel(1).0,
        }
    }

    #[tokio::test]
    async fn admin_routes_refuse_callers_without_the_token() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(axum::serve(listener, router(stopped_channels(), Some(Arc::from("secret")))).into_future());
        let client = reqwest::Client::new();
        let credit = json!({"admin_id": 1, "amount": "1000"});

        let anonymous = client
            .post(format!("{base}/admin/users/2/credit"))
            .json(&credit)
            .send()
            .await
            .unwrap();
        assert_eq!(anonymous.status().as_u16(), 401);

        let forged = client
            .post(format!("{base}/admin/users/2/credit"))
            .header(ADMIN_TOKEN_HEADER, "guess")
            .json(&credit)
            .send()
            .await
            .unwrap();
        assert_eq!(forged.status().as_u16(), 401);

        // Past the gate the request reaches the stopped service.
        let trusted = client
            .post(format!("{base}/admin/users/2/credit"))
            .header(ADMIN_TOKEN_HEADER, "secret")
            .json(&credit)
            .send()
            .await
            .unwrap();
        assert_eq!(trusted.status().as_u16(), 500);

        let health = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(health.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn call_reports_a_stopped_service() {
        let (channel, receiver) = mpsc::channel::<UserRequest>(1);
        drop(receiver);

        let result = call(&channel, |response| UserRequest::GetUser { id: 1, response }).await;
        assert!(matches!(result, Err(ServiceError::Communication(_, _))));
    }

    #[tokio::test]
    async fn call_returns_the_service_answer() {
        let (channel, mut receiver) = mpsc::channel::<UserRequest>(1);
        tokio::spawn(async move {
            if let Some(UserRequest::GetUser { id, response }) = receiver.recv().await {
                let _ = response.send(Err(ServiceError::NotFound(format!("user {}", id))));
            }
        });

        let result = call(&channel, |response| UserRequest::GetUser { id: 7, response }).await;
        assert!(matches!(result, Err(ServiceError::NotFound(what)) if what == "user 7"));
    }
}

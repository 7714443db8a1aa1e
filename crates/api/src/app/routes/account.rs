use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use multibpo_auth::{JwtClaims, RegisterAccount};
use multibpo_core::AccountId;
use multibpo_quota::QuestionOwner;

use crate::app::{dto, errors, services::AppServices};
use crate::context::PrincipalContext;

/// Registration and confirmation; no token required.
pub fn public_router() -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/confirm-email", post(confirm_email))
        .route("/auth/resend-confirmation", post(resend_confirmation))
}

/// Endpoints scoped to the authenticated account.
pub fn protected_router() -> Router {
    Router::new()
        .route("/me", get(me))
        .route("/me/modules/:module", get(module_access))
        .route("/me/questions", get(history))
}

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterRequest>,
) -> axum::response::Response {
    let cmd = RegisterAccount {
        account_id: AccountId::new(),
        password: body.new_password(),
        email: body.email,
        whatsapp: body.whatsapp,
        method: body.method,
        occurred_at: Utc::now(),
    };

    match services.accounts.register(cmd).await {
        Ok(account) => {
            let email_sent = account.confirmation_token.is_some();
            (
                StatusCode::CREATED,
                Json(dto::RegisterResponse {
                    success: true,
                    account,
                    email_sent,
                }),
            )
                .into_response()
        }
        Err(e) => errors::account_error_to_response(e),
    }
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::LoginRequest>,
) -> axum::response::Response {
    let account = match services.accounts.login(&body.email, &body.password).await {
        Ok(account) => account,
        Err(e) => return errors::account_error_to_response(e),
    };

    let claims = JwtClaims::for_account(&account, Utc::now());
    match services.tokens.sign(&claims) {
        Ok(access_token) => (
            StatusCode::OK,
            Json(dto::LoginResponse {
                success: true,
                access_token,
                token_type: "Bearer",
                expires_at: claims.expires_at,
                account,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to sign access token");
            errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "token_error",
                "internal error",
            )
        }
    }
}

pub async fn confirm_email(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ConfirmEmailRequest>,
) -> axum::response::Response {
    let token = match dto::parse_uuid(&body.token, "token") {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match services.accounts.confirm_email(token, Utc::now()).await {
        Ok(account) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "email confirmed",
                "account": account,
            })),
        )
            .into_response(),
        Err(e) => errors::account_error_to_response(e),
    }
}

pub async fn resend_confirmation(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ResendConfirmationRequest>,
) -> axum::response::Response {
    match services
        .accounts
        .resend_confirmation(&body.email, Utc::now())
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "confirmation email sent",
            })),
        )
            .into_response(),
        Err(e) => errors::account_error_to_response(e),
    }
}

pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services
        .accounts
        .profile(principal.account_id(), Utc::now())
        .await
    {
        Ok(profile) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "profile": profile })),
        )
            .into_response(),
        Err(e) => errors::account_error_to_response(e),
    }
}

pub async fn module_access(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(module): Path<String>,
) -> axum::response::Response {
    match services
        .accounts
        .module_access(principal.account_id(), &module)
        .await
    {
        Ok(access) => (
            StatusCode::OK,
            Json(dto::ModuleAccessResponse { module, access }),
        )
            .into_response(),
        Err(e) => errors::account_error_to_response(e),
    }
}

pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::HistoryQuery>,
) -> axum::response::Response {
    let owner = QuestionOwner::Account(principal.account_id());

    match services
        .gateway
        .history(&owner, query.effective_limit())
        .await
    {
        Ok(records) => {
            let items: Vec<dto::HistoryItem> =
                records.into_iter().map(dto::HistoryItem::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "success": true, "items": items })),
            )
                .into_response()
        }
        Err(e) => errors::gateway_error_to_response(e),
    }
}

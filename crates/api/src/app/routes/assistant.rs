use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use multibpo_infra::gateway::{AskQuestion, Caller};

use crate::app::{dto, errors, services::AppServices};
use crate::context::{ClientContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/assistant/questions", post(ask_question))
        .route("/assistant/status", get(status))
}

/// Authenticated callers are always billed to their account; the session
/// token only matters for anonymous callers.
fn caller(principal: Option<Extension<PrincipalContext>>, session_id: Option<String>) -> Caller {
    match principal {
        Some(Extension(p)) => Caller::Account(p.account_id()),
        None => Caller::Anonymous {
            session_token: session_id,
        },
    }
}

pub async fn ask_question(
    Extension(services): Extension<Arc<AppServices>>,
    principal: Option<Extension<PrincipalContext>>,
    client: ClientContext,
    Json(body): Json<dto::AskQuestionRequest>,
) -> axum::response::Response {
    let req = AskQuestion {
        caller: caller(principal, body.session_id),
        question: body.question,
        client: client.into_metadata(),
        now: Utc::now(),
    };

    match services.gateway.ask(req).await {
        Ok(answer) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "question_id": answer.question_id,
                "question": answer.question,
                "answer": answer.answer,
                "response_time": answer.response_time,
                "quota": answer.quota,
            })),
        )
            .into_response(),
        Err(e) => errors::gateway_error_to_response(e),
    }
}

pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    principal: Option<Extension<PrincipalContext>>,
    client: ClientContext,
    Query(query): Query<dto::StatusQuery>,
) -> axum::response::Response {
    let caller = caller(principal, query.session_id);

    match services
        .gateway
        .status(caller, client.ip_address(), Utc::now())
        .await
    {
        Ok(quota) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "quota": quota })),
        )
            .into_response(),
        Err(e) => errors::gateway_error_to_response(e),
    }
}

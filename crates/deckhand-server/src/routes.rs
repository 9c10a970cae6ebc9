use std::sync::Arc;

use axum::{
    Json,
    Router,
    extract::{
        Path,
        Query,
        State,
        rejection::JsonRejection,
    },
    http::{
        HeaderMap,
        StatusCode,
    },
    response::IntoResponse,
    routing::get,
};
use deckhand_portforward::{
    Error,
    PortForwardManager,
    PortForwardRequest,
    StopOrDeleteRequest,
};
use serde::Deserialize;
use tracing::error;

use crate::auth;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PortForwardManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/portforward", get(get_session))
        .route("/portforward/list", get(list_sessions))
        .route(
            "/portforward/{cluster}",
            axum::routing::post(start_portforward).delete(stop_or_delete),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    "OK"
}

fn error_response(err: &Error) -> (StatusCode, String) {
    let status = match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

async fn start_portforward(
    State(state): State<AppState>, Path(cluster): Path<String>, headers: HeaderMap,
    body: Result<Json<PortForwardRequest>, JsonRejection>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let Json(req) = body.map_err(|rejection| (StatusCode::BAD_REQUEST, rejection.body_text()))?;
    let user_id = auth::user_id(&headers);
    let token = auth::token_from_cookie(&headers, &cluster);

    let session = state
        .manager
        .start(&cluster, user_id.as_deref(), token.as_deref(), req)
        .await
        .map_err(|e| {
            error!(error = %e, cluster, "failed to start portforward");
            error_response(&e)
        })?;

    Ok(Json(session))
}

async fn stop_or_delete(
    State(state): State<AppState>, Path(cluster): Path<String>, headers: HeaderMap,
    body: Result<Json<StopOrDeleteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let Json(req) = body.map_err(|rejection| (StatusCode::BAD_REQUEST, rejection.body_text()))?;
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let user_id = auth::user_id(&headers);

    state
        .manager
        .stop_or_delete(&cluster, user_id.as_deref(), &req.id, req.stop_or_delete)
        .map_err(|e| {
            error!(error = %e, cluster, id = %req.id, "failed to stop portforward");
            // Registry misses on stop are server-side failures, not 404s.
            match e {
                Error::Validation(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        })?;

    Ok("stopped")
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    cluster: Option<String>,
}

async fn list_sessions(
    State(state): State<AppState>, Query(query): Query<ListQuery>, headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let cluster = query
        .cluster
        .filter(|cluster| !cluster.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "cluster is required".to_string()))?;
    let user_id = auth::user_id(&headers);

    Ok(Json(state.manager.list(&cluster, user_id.as_deref())))
}

#[derive(Debug, Deserialize)]
struct GetQuery {
    cluster: Option<String>,
    id: Option<String>,
}

async fn get_session(
    State(state): State<AppState>, Query(query): Query<GetQuery>, headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let cluster = query
        .cluster
        .filter(|cluster| !cluster.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "cluster is required".to_string()))?;
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "id is required".to_string()))?;
    let user_id = auth::user_id(&headers);

    let session = state
        .manager
        .get(&cluster, user_id.as_deref(), &id)
        .map_err(|e| error_response(&e))?;

    Ok(Json(session.projection()))
}

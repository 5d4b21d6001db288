use crate::{
    auth::Caller,
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use serde_json::{json, Value};
use vm_orchestrator::Request;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/rpc/{method}", post(call))
}

/// The body is the raw argument object. An empty body is passed on as
/// `null` so the handler reports the missing arguments.
async fn call(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(method): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let args = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))?
    };

    let req = Request::new(method, caller.username, args);
    let result = state.handlers.call(&req).await?;

    Ok(Json(json!({ "result": result })))
}

use axum::middleware;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{json, Value};

use crate::auth::{protect, CurrentUser};
use crate::server::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/me",
        get(get_me).layer(middleware::from_fn_with_state(state.clone(), protect)),
    )
}

async fn get_me(Extension(user): Extension<CurrentUser>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { "user": { "id": user.id } },
    }))
}

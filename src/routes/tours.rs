use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{json, Value};

use crate::error::{AppError, FieldError, RawFailure};
use crate::pipeline::{ParsedBody, QueryParams, RequestTime};
use crate::server::AppState;

/// Tour names already taken; stands in for the unique index on `name`.
const TAKEN_NAMES: &[&str] = &["The Forest Hiker"];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_all_tours).post(create_tour))
        .route("/{id}", get(get_tour))
}

/// 24 hex digits, the shape of a document id.
fn is_object_id(id: &str) -> bool {
    id.len() == 24 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

async fn get_all_tours(
    Extension(query): Extension<QueryParams>,
    requested_at: Option<Extension<RequestTime>>,
) -> Json<Value> {
    Json(json!({
        "status": "success",
        "requestedAt": requested_at.map(|Extension(t)| t.to_rfc3339()),
        "results": 0,
        "data": {
            "query": query,
            "tours": [],
        },
    }))
}

async fn get_tour(Path(id): Path<String>) -> Result<Json<Value>, RawFailure> {
    if !is_object_id(&id) {
        return Err(RawFailure::cast("_id", id, "ObjectId"));
    }
    Err(AppError::new("No tour found with that ID", StatusCode::NOT_FOUND).into())
}

async fn create_tour(
    body: Option<Extension<ParsedBody>>,
) -> Result<(StatusCode, Json<Value>), RawFailure> {
    let doc = body
        .map(|Extension(ParsedBody(value))| value)
        .unwrap_or_else(|| json!({}));

    let mut errors = Vec::new();
    let name = doc.get("name").and_then(Value::as_str).filter(|n| !n.trim().is_empty());
    if name.is_none() {
        errors.push(FieldError::new("name", "A tour must have a name"));
    }
    if doc.get("price").and_then(Value::as_f64).is_none() {
        errors.push(FieldError::new("price", "A tour must have a price"));
    }
    if !errors.is_empty() {
        return Err(RawFailure::validation(errors));
    }

    if let Some(name) = name.filter(|n| TAKEN_NAMES.contains(n)) {
        return Err(RawFailure::duplicate_key(format!(
            "E11000 duplicate key error collection: natours.tours index: name_1 dup key: {{ name: \"{}\" }}",
            name
        )));
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "data": { "tour": doc },
        })),
    ))
}

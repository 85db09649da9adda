//! Rendered pages.

use axum::middleware;
use axum::response::Html;
use axum::routing::get;
use axum::{Extension, Router};

use crate::auth::{is_logged_in, protect, CurrentUser};
use crate::error::responder::escape_html;
use crate::server::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(overview).layer(middleware::from_fn_with_state(state.clone(), is_logged_in)),
        )
        .route(
            "/me",
            get(account).layer(middleware::from_fn_with_state(state.clone(), protect)),
        )
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Natours | {}</title></head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        body
    ))
}

async fn overview(user: Option<Extension<CurrentUser>>) -> Html<String> {
    let greeting = match user {
        Some(Extension(user)) => format!("<p class=\"nav__user\">Signed in as {}</p>", escape_html(&user.id)),
        None => "<p class=\"nav__user\"><a href=\"/login\">Log in</a></p>".to_string(),
    };
    page(
        "All Tours",
        &format!("{}\n<main class=\"overview\"><h2>All tours</h2></main>", greeting),
    )
}

async fn account(Extension(user): Extension<CurrentUser>) -> Html<String> {
    page(
        "Your account",
        &format!(
            "<main class=\"user-view\"><h2>Your account settings</h2><p>{}</p></main>",
            escape_html(&user.id)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overview_shows_login_link_for_guests() {
        let Html(body) = overview(None).await;
        assert!(body.contains("href=\"/login\""));
    }

    #[tokio::test]
    async fn test_account_escapes_user_id() {
        let Html(body) = account(Extension(CurrentUser {
            id: "<script>".to_string(),
        }))
        .await;
        assert!(body.contains("&lt;script&gt;"));
        assert!(!body.contains("<script>"));
    }
}

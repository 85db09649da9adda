//! Route groups served behind the policy chain.
//!
//! These stand in for the business routes: each one exercises a failure the
//! error sink must translate (cast, duplicate key, validation, auth).

pub mod tours;
pub mod users;
pub mod views;

use crate::dispatch::Dispatcher;
use crate::server::AppState;

/// Every route group mounted at its prefix.
pub fn dispatcher(state: &AppState) -> Dispatcher<AppState> {
    Dispatcher::new()
        .mount("/", views::router(state))
        .mount("/api/v1/tours", tours::router())
        .mount("/api/v1/users", users::router(state))
}

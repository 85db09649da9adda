//! Natours - request pipeline and centralized error translation for a
//! tour-booking web application.
//!
//! Requests run through the [`pipeline::PolicyChain`], reach the
//! [`dispatch::Dispatcher`], and every failure on the way ends in the
//! [`error::ErrorSink`].

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod routes;
pub mod server;

pub use config::{AppConfig, DeploymentMode};
pub use server::{build_app, serve, AppState};

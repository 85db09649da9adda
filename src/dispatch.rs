//! Route dispatch.
//!
//! Route groups are mounted under path prefixes. A request no group matches
//! becomes the operational 404 failure for its original target.

use axum::extract::OriginalUri;
use axum::Router;

use crate::error::RawFailure;

/// Collects route groups into one router with a not-found fallback.
#[derive(Debug)]
pub struct Dispatcher<S = ()> {
    router: Router<S>,
}

impl<S> Default for Dispatcher<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Dispatcher<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            router: Router::new(),
        }
    }

    /// Mount `routes` under `prefix`. `"/"` mounts them at the root.
    pub fn mount(mut self, prefix: &str, routes: Router<S>) -> Self {
        self.router = if prefix.is_empty() || prefix == "/" {
            self.router.merge(routes)
        } else {
            self.router.nest(prefix, routes)
        };
        self
    }

    pub fn into_router(self) -> Router<S> {
        self.router.fallback(not_found)
    }
}

async fn not_found(OriginalUri(uri): OriginalUri) -> RawFailure {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    RawFailure::not_found(target)
}

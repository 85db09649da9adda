use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::http::header;

use crate::pipeline::{Cookies, InFlight, PolicyStage, StageOutcome};

/// Parse `name=value` pairs out of one or more `Cookie` header values.
///
/// Pairs without `=` or with an empty name are skipped; surrounding double
/// quotes on a value are removed. The first occurrence of a name wins.
pub fn parse_cookie_header<'a>(values: impl IntoIterator<Item = &'a str>) -> Cookies {
    let mut cookies = BTreeMap::new();
    for value in values {
        for pair in value.split(';') {
            let Some((name, val)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let val = val.trim();
            let val = val
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(val);
            cookies
                .entry(name.to_string())
                .or_insert_with(|| val.to_string());
        }
    }
    Cookies(cookies)
}

/// Stage 5: exposes request cookies.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieStage;

#[async_trait]
impl PolicyStage for CookieStage {
    fn name(&self) -> &'static str {
        "cookies"
    }

    async fn on_request(&self, exchange: &mut InFlight) -> StageOutcome {
        let cookies = parse_cookie_header(
            exchange
                .headers()
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );
        exchange.cookies = cookies;
        StageOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header(["jwt=abc.def.ghi; theme=\"dark\"; flag; =orphan"]);
        assert_eq!(cookies.get("jwt"), Some("abc.def.ghi"));
        assert_eq!(cookies.get("theme"), Some("dark"));
        assert_eq!(cookies.get("flag"), None);
        assert_eq!(cookies.0.len(), 2);
    }

    #[test]
    fn test_first_occurrence_wins_across_headers() {
        let cookies = parse_cookie_header(["jwt=first", "jwt=second; lang=en"]);
        assert_eq!(cookies.get("jwt"), Some("first"));
        assert_eq!(cookies.get("lang"), Some("en"));
    }

    #[tokio::test]
    async fn test_stage_reads_cookie_headers() {
        let request = axum::http::Request::builder()
            .uri("/me")
            .header(header::COOKIE, "jwt=token123")
            .body(axum::body::Body::empty())
            .unwrap();
        let mut exchange = InFlight::new(request, &crate::config::AppConfig::default());
        assert!(matches!(
            CookieStage.on_request(&mut exchange).await,
            StageOutcome::Continue
        ));
        assert_eq!(exchange.cookies.get("jwt"), Some("token123"));
    }
}

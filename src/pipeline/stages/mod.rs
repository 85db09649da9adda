//! The standard policy stages, in chain order.

mod body_limit;
mod cookies;
mod param_pollution;
mod rate_limit;
mod request_log;
mod request_time;
mod sanitize;
mod security_headers;

pub use body_limit::BodyLimitStage;
pub use cookies::{parse_cookie_header, CookieStage};
pub use param_pollution::{guard_parameters, ParamPollutionStage};
pub use rate_limit::{RateDecision, RateLimitStage, RateLimiter, RATE_LIMIT_MESSAGE};
pub use request_log::RequestLogStage;
pub use request_time::RequestTimeStage;
pub use sanitize::{is_operator_key, sanitize_value, SanitizeStage};
pub use security_headers::{content_security_policy, SecurityHeadersStage};

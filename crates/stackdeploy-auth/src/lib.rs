mod context;
mod error;
mod extractor;
mod middleware;
mod plugin;
mod rate_limit;
mod token;
mod user_service;
pub mod handlers;
pub mod test_utils;

pub use context::*;
pub use error::AuthError;
pub use extractor::RequireAuth;
pub use middleware::AuthMiddleware;
pub use plugin::AuthPlugin;
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use token::JwtVerifier;
pub use user_service::{ensure_profile_in, DataErasureSummary, ProfileSummary, UserProfileService};

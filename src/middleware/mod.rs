//! # Request Admission Pipeline
//!
//! Stages run outermost first: request context, panic recovery, CORS, rate
//! limiting, authentication, organization binding, feature gate, RBAC and,
//! after the handler returns, audit capture.

pub mod audit;
pub mod authenticate;
pub mod cors;
pub mod feature_flag;
pub mod organization;
pub mod rate_limit;
pub mod rbac;
pub mod recovery;

pub use audit::audit;
pub use authenticate::authenticate;
pub use cors::cors_layer;
pub use feature_flag::{FeatureGate, require_feature};
pub use organization::{ORGANIZATION_EXEMPT_PATHS, bind_organization};
pub use rate_limit::{RateLimiter, rate_limit};
pub use rbac::{PermissionGuard, require_permission};
pub use recovery::panic_response;

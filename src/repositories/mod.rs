//! # Repository Layer
//!
//! Repositories wrap SeaORM operations per aggregate. Each borrows a
//! connection, which may be a pool or an open transaction, so callers that
//! need atomicity pass `&txn`.

pub mod api_key;
pub mod application;
pub mod audit_log;
pub mod device_grant;
pub mod feature_flag;
pub mod organization;
pub mod refresh_token;
pub mod role;
pub mod user;

pub use api_key::ApiKeyRepository;
pub use application::ApplicationRepository;
pub use audit_log::AuditLogRepository;
pub use device_grant::DeviceGrantRepository;
pub use feature_flag::FeatureFlagRepository;
pub use organization::OrganizationRepository;
pub use refresh_token::RefreshTokenRepository;
pub use role::RoleRepository;
pub use user::UserRepository;

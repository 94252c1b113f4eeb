//! Staff authentication.
//!
//! Customers are anonymous and identified only by tracking ID. Staff present
//! an HS256 JWT (or a `dev:<id>` token in dev mode) which is checked on every
//! privileged REST call and every privileged realtime event.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::{CHATS_PERMISSION, Claims, Role};
pub use config::{AuthConfig, ConfigValidationError, StaffAccount};
pub use error::AuthError;
pub use middleware::{AuthState, CurrentStaff, RequireChatAccess};

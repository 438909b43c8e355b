//! Database models split into domain-specific modules.

pub mod analytics;
pub mod dashboard;
pub mod notification;
pub mod patient;
pub mod series;
pub mod session;
pub mod user;

pub use analytics::*;
pub use dashboard::*;
pub use notification::*;
pub use patient::*;
pub use series::*;
pub use session::*;
pub use user::*;

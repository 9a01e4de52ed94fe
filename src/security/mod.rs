//! Rate limiting and fraud detection for reward payouts.

pub mod fraud;
pub mod rate_limit;
pub mod store;
pub mod types;

pub use fraud::FraudDetector;
pub use rate_limit::RequestGate;
pub use store::{MemorySecurityStore, SecurityStore, SqliteSecurityStore};
pub use types::{
    EventType, FraudAssessment, SecurityConfig, SecurityEvent, SecurityStats, Severity,
    UserActivityProfile,
};

pub mod abuse;
pub mod window;

pub use abuse::{AbuseGuard, AbuseStatus};
pub use window::{SlidingWindowCounter, WindowDecision};

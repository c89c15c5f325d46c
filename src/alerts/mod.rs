//! Threshold evaluation, per-device throttling and alert persistence.

pub mod evaluator;
pub mod recorder;
pub mod throttle;

pub use evaluator::{evaluate, Verdict};
pub use recorder::AlertRecorder;
pub use throttle::{Admission, AlertThrottle};

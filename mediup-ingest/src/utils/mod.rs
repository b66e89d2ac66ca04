//! Utility modules for mediup-ingest

pub mod throttle;

pub use throttle::ThrottleGate;

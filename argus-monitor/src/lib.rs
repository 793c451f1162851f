//! Camera-based machine activity monitoring.
//!
//! The monitor periodically picks up a camera frame, measures the machine's
//! indicator lights over configured regions of interest, classifies the
//! machine as active or inactive, appends the result to a rolling history,
//! and turns state transitions into debounced email/SMS notifications.

pub mod alert;
pub mod camera;
pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod history;
pub mod monitor;
pub mod tracing;

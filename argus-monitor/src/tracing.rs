//! Tracing support.

/// Common tracing imports for modules that log.
pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

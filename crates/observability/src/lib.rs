//! Tracing/logging setup shared by fanout binaries.

/// Initialize process-wide logging from `RUST_LOG` and `FANOUT_LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, UnknownLogFormat};

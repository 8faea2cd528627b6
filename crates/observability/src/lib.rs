//! Tracing and logging setup shared by the binaries.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, UnknownLogFormat};

/// Initialize process-wide tracing/logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init(format: LogFormat) {
    self::tracing::init(format);
}

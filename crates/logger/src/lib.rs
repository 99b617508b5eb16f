//! Tracing subscriber setup shared by the pingnstor binaries.

mod tracing;

pub use self::tracing::{LogFormat, LogOptions, init_with};

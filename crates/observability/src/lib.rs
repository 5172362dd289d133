//! Process-wide tracing setup.

pub mod tracing;

pub use self::tracing::{LogFormat, init};

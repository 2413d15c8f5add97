//! Host adapter for the emulator core: loads serialized programs and wires
//! the CPU to the process console.

use tracing_subscriber as _;

/// Console IO over stdin/stdout.
pub mod console;
pub use console::StdIo;

/// Program and configuration files.
pub mod files;
pub use files::{load_config, load_program, LoadError};

/// Problem reporting to stderr.
pub mod report;
pub use report::ProblemReporter;

#[cfg(test)]
use tempfile as _;

//! Process side of a run: command construction, execution, cancellation.

pub mod command;
pub mod executor;
pub mod registry;

pub use command::{CommandLine, OutputFormat, RunConfiguration, build_command};
pub use executor::{ExecError, Executor, RunResult};
pub use registry::CancelRegistry;

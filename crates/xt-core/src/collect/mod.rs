//! Process execution for probes.

pub mod tool_runner;

pub use tool_runner::{ToolConfig, ToolError, ToolOutput, ToolRunner};

//! External processing tool: argument hygiene, invocation and output parsing

pub mod invoker;
pub mod output;
pub mod sanitize;

pub use invoker::{
    redact_args, CommandRunner, CompletionState, SpawnFailure, SystemRunner, ToolInvocation,
    ToolInvoker, ToolOutput,
};
pub use output::{InfoOutput, InfoParser, PageMetadata, SplitFile, SplitOutput};
pub use sanitize::{path_arg, sanitize_arg, sanitize_args};

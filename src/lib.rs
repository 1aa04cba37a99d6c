//! PDF Workbench Library
//!
//! Runs PDF operations through an external processing tool, with per-request
//! scratch workspaces and a shared store of downloadable results:
//! - `merge`, `split`, `compress`, `rotate`, `watermark`, `protect`,
//!   `unlock`, `info`
//! - large splits are batched; failed splits fall back to qpdf
//!
//! Two thin adapters expose the executor: MCP tools over stdio ([`server`])
//! and an HTTP/JSON API ([`http`]).

pub mod config;
pub mod error;
pub mod http;
pub mod ops;
pub mod pdf;
pub mod ratelimit;
pub mod server;
pub mod tool;
pub mod workspace;

pub use config::{RateLimitConfig, ServiceConfig, SplitPolicy};
pub use error::{Error, Result};
pub use ops::{
    CompressionQuality, OperationExecutor, OperationOutcome, OperationRequest, SplitSelection,
    SplitStrategy, UploadedFile,
};
pub use ratelimit::RateLimiter;
pub use server::{run_server, run_server_with_config, PdfServer, PdfSource};
pub use tool::{CommandRunner, ToolInvocation, ToolInvoker};
pub use workspace::{ArtifactName, ProcessedStore, StoredArtifact, SweepReport, WorkspaceManager};

//! Service configuration
//!
//! Defaults mirror the deployed layout: a data root with `uploads/`, `temp/`
//! and `processed/`, and the processing tool under `bin/`. Every field can be
//! overridden through `PDF_WORKBENCH_*` environment variables.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Thresholds used by the split planner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPolicy {
    /// Documents with more pages than this skip straight to batch mode
    /// when no explicit range was requested
    pub large_document_threshold: u32,
    /// Maximum number of pages in one batch window
    pub batch_size: u32,
    /// Longest page-range argument passed to the tool in one invocation
    pub max_range_arg_len: usize,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self {
            large_document_threshold: 200,
            batch_size: 50,
            max_range_arg_len: 2000,
        }
    }
}

/// Fixed-window request budget per client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length
    pub period: Duration,
    /// Upper bound on tracked clients (least recently seen are dropped)
    pub max_tracked_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            period: Duration::from_secs(60),
            max_tracked_clients: 10_000,
        }
    }
}

/// Configuration for the PDF workbench service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root holding `uploads/`, `temp/` and `processed/`
    pub data_root: PathBuf,
    /// Path to the external processing tool
    pub tool_path: PathBuf,
    /// Wall-clock budget for one tool invocation (default: 60s)
    pub tool_timeout: Duration,
    /// Artifacts and scratch files older than this are swept (default: 24h)
    pub max_artifact_age_hours: u64,
    /// How often the background sweep runs (default: 1h)
    pub sweep_interval: Duration,
    /// Split planner thresholds
    pub split: SplitPolicy,
    /// Per-client request budget
    pub rate_limit: RateLimitConfig,
    /// Serve HTTP on this address instead of MCP over stdio
    pub http_addr: Option<SocketAddr>,
    /// Maximum accepted request body for uploads (default: 100MB)
    pub max_upload_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            tool_path: default_tool_path(),
            tool_timeout: Duration::from_secs(60),
            max_artifact_age_hours: 24,
            sweep_interval: Duration::from_secs(60 * 60),
            split: SplitPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            http_addr: None,
            max_upload_bytes: 100 * 1024 * 1024, // 100MB
        }
    }
}

fn default_tool_path() -> PathBuf {
    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut path = base.join("bin").join("pdfeditor");
    if cfg!(windows) {
        path.set_extension("exe");
    }
    path
}

impl ServiceConfig {
    /// Build a configuration from defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] with an injectable lookup, so
    /// tests do not have to mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("PDF_WORKBENCH_DATA_DIR") {
            config.data_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("PDF_WORKBENCH_TOOL_PATH") {
            config.tool_path = PathBuf::from(v);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "PDF_WORKBENCH_TOOL_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(Error::Config {
                    reason: "PDF_WORKBENCH_TOOL_TIMEOUT_SECS must be positive".to_string(),
                });
            }
            config.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(hours) = parse_var(&lookup, "PDF_WORKBENCH_MAX_AGE_HOURS")? {
            config.max_artifact_age_hours = hours;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "PDF_WORKBENCH_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(v) = parse_var(&lookup, "PDF_WORKBENCH_LARGE_DOCUMENT_PAGES")? {
            config.split.large_document_threshold = v;
        }
        if let Some(v) = parse_var::<u32>(&lookup, "PDF_WORKBENCH_BATCH_SIZE")? {
            if v == 0 {
                return Err(Error::Config {
                    reason: "PDF_WORKBENCH_BATCH_SIZE must be positive".to_string(),
                });
            }
            config.split.batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "PDF_WORKBENCH_MAX_RANGE_ARG_LEN")? {
            config.split.max_range_arg_len = v;
        }
        if let Some(v) = parse_var(&lookup, "PDF_WORKBENCH_RATE_LIMIT")? {
            config.rate_limit.max_requests = v;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "PDF_WORKBENCH_RATE_PERIOD_SECS")? {
            config.rate_limit.period = Duration::from_secs(secs.max(1));
        }
        if let Some(addr) = parse_var(&lookup, "PDF_WORKBENCH_HTTP_ADDR")? {
            config.http_addr = Some(addr);
        }
        if let Some(v) = parse_var(&lookup, "PDF_WORKBENCH_MAX_UPLOAD_BYTES")? {
            config.max_upload_bytes = v;
        }

        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config {
                reason: format!("{}={:?}: {}", key, raw, e),
            }),
    }
}

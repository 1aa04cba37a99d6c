//! MCP server implementation using rmcp
//!
//! Thin adapter over [`OperationExecutor`]: decode the source, consult the
//! rate limiter, run one operation, encode the outcome.

use crate::config::ServiceConfig;
use crate::error::Error;
use crate::ops::{
    parse_opacity, CompressionQuality, InfoOutcome, MergeOutcome, OperationExecutor,
    SplitOutcome, SplitSelection, TransformOutcome, UploadedFile,
};
use crate::ratelimit::RateLimiter;
use crate::workspace::SweepReport;
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// The stdio transport has exactly one peer
const STDIO_CLIENT: &str = "mcp-stdio";

const DEFAULT_UPLOAD_NAME: &str = "document.pdf";

/// PDF source specification
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
    },
    /// Base64 encoded PDF data
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
        /// File name to report (default: document.pdf)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl<'de> serde::Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        let Some(obj) = value.as_object() else {
            return Err(serde::de::Error::custom(
                "Invalid source: expected an object with \"path\" or \"base64\"",
            ));
        };

        if let Some(v) = obj.get("path") {
            return match v.as_str() {
                Some(s) => Ok(PdfSource::Path {
                    path: s.to_string(),
                }),
                None => Err(serde::de::Error::custom("\"path\" must be a string")),
            };
        }

        if let Some(v) = obj.get("base64") {
            let Some(data) = v.as_str() else {
                return Err(serde::de::Error::custom("\"base64\" must be a string"));
            };
            let filename = match obj.get("filename") {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(_) => {
                    return Err(serde::de::Error::custom("\"filename\" must be a string"))
                }
            };
            return Ok(PdfSource::Base64 {
                base64: data.to_string(),
                filename,
            });
        }

        let keys: Vec<&String> = obj.keys().collect();
        Err(serde::de::Error::custom(format!(
            "Invalid source: expected an object with \"path\" or \"base64\", but got keys: {:?}",
            keys
        )))
    }
}

impl PdfSource {
    fn name(&self) -> String {
        match self {
            PdfSource::Path { path } => path.clone(),
            PdfSource::Base64 { filename, .. } => filename
                .clone()
                .unwrap_or_else(|| "<base64>".to_string()),
        }
    }

    async fn load(&self) -> crate::error::Result<UploadedFile> {
        match self {
            PdfSource::Path { path } => {
                let data = tokio::fs::read(path).await?;
                let filename = Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());
                Ok(UploadedFile::new(filename, data))
            }
            PdfSource::Base64 { base64, filename } => {
                let data = base64::engine::general_purpose::STANDARD.decode(base64)?;
                let filename = filename
                    .clone()
                    .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());
                Ok(UploadedFile::new(filename, data))
            }
        }
    }
}

/// One entry of a tool response: the outcome, or a client-safe error
#[derive(Debug, Serialize)]
pub struct ToolResult<T> {
    pub source: String,
    #[serde(flatten)]
    pub outcome: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn respond<T: Serialize>(tool: &str, source: String, result: crate::error::Result<T>) -> String {
    let entry = match result {
        Ok(outcome) => ToolResult {
            source,
            outcome: Some(outcome),
            error: None,
        },
        Err(e) => {
            tracing::warn!(tool, error = %e, "tool failed");
            ToolResult {
                source,
                outcome: None,
                error: Some(e.client_message()),
            }
        }
    };

    let response = serde_json::json!({ "results": [entry] });
    serde_json::to_string_pretty(&response).unwrap_or_default()
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MergePdfsParams {
    /// PDF sources, merged in this order (at least two)
    pub sources: Vec<PdfSource>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SplitPdfParams {
    /// PDF source to split
    pub source: PdfSource,
    /// Pages to extract, e.g. "1-3,5" (default: every page)
    #[serde(default)]
    pub page_range: Option<String>,
    /// Split into chunks of this many pages instead of a page range
    #[serde(default)]
    pub pages_per_file: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CompressPdfParams {
    /// PDF source to compress
    pub source: PdfSource,
    /// low, medium or high (default: medium)
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RotatePdfParams {
    /// PDF source to rotate
    pub source: PdfSource,
    /// Rotation in degrees, a multiple of 90
    pub degrees: i32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WatermarkPdfParams {
    /// PDF source to watermark
    pub source: PdfSource,
    /// Watermark text
    pub text: String,
    /// Opacity between 0 and 1 (default: 0.5)
    #[serde(default)]
    pub opacity: Option<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PasswordParams {
    /// PDF source
    pub source: PdfSource,
    /// Password to apply or remove
    pub password: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PdfInfoParams {
    /// PDF source to inspect
    pub source: PdfSource,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadArtifactParams {
    /// Artifact name as returned by a previous operation
    pub name: String,
    /// Delete the artifact once read (default: false)
    #[serde(default)]
    pub cleanup: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SweepArtifactsParams {
    /// Remove entries at least this old (default: configured maximum age)
    #[serde(default)]
    pub max_age_hours: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DownloadResult {
    pub name: String,
    pub download_name: String,
    pub size: usize,
    pub base64: String,
}

/// PDF workbench MCP server
#[derive(Clone)]
pub struct PdfServer {
    executor: Arc<OperationExecutor>,
    limiter: Arc<RateLimiter>,
    max_artifact_age_hours: u64,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl PdfServer {
    pub fn new(
        executor: Arc<OperationExecutor>,
        limiter: Arc<RateLimiter>,
        max_artifact_age_hours: u64,
    ) -> Self {
        Self {
            executor,
            limiter,
            max_artifact_age_hours,
            tool_router: Self::tool_router(),
        }
    }

    /// Build the executor and limiter from configuration
    pub fn from_config(config: &ServiceConfig) -> crate::error::Result<Self> {
        let executor = Arc::new(OperationExecutor::from_config(config)?);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        Ok(Self::new(executor, limiter, config.max_artifact_age_hours))
    }

    #[tool(
        description = "Merge two or more PDF files into one, in the order given. Returns the stored artifact name and download URL.

Source format: each element must be {\"path\": \"/absolute/path.pdf\"} or {\"base64\": \"...\", \"filename\": \"a.pdf\"}"
    )]
    async fn merge_pdfs(&self, Parameters(params): Parameters<MergePdfsParams>) -> String {
        let source = params
            .sources
            .iter()
            .map(PdfSource::name)
            .collect::<Vec<_>>()
            .join(", ");
        respond("merge_pdfs", source, self.process_merge_pdfs(&params).await)
    }

    #[tool(
        description = "Split a PDF into one file per page, per page range token, or per chunk of pages.

Page range syntax: \"all\", \"3\", \"1-5\", \"1-3,7,10-12\". Each comma token becomes one output file.
Large documents are processed in batches automatically. When more than one file is produced a ZIP bundle is stored too."
    )]
    async fn split_pdf(&self, Parameters(params): Parameters<SplitPdfParams>) -> String {
        respond(
            "split_pdf",
            params.source.name(),
            self.process_split_pdf(&params).await,
        )
    }

    #[tool(description = "Compress a PDF. Quality is low, medium (default) or high.")]
    async fn compress_pdf(&self, Parameters(params): Parameters<CompressPdfParams>) -> String {
        respond(
            "compress_pdf",
            params.source.name(),
            self.process_compress_pdf(&params).await,
        )
    }

    #[tool(description = "Rotate every page of a PDF by a multiple of 90 degrees.")]
    async fn rotate_pdf(&self, Parameters(params): Parameters<RotatePdfParams>) -> String {
        respond(
            "rotate_pdf",
            params.source.name(),
            self.process_rotate_pdf(&params).await,
        )
    }

    #[tool(description = "Add a text watermark to every page. Opacity outside 0..1 falls back to 0.5.")]
    async fn watermark_pdf(&self, Parameters(params): Parameters<WatermarkPdfParams>) -> String {
        respond(
            "watermark_pdf",
            params.source.name(),
            self.process_watermark_pdf(&params).await,
        )
    }

    #[tool(description = "Password-protect a PDF.")]
    async fn protect_pdf(&self, Parameters(params): Parameters<PasswordParams>) -> String {
        let result = match self.load_limited(&params.source).await {
            Ok(file) => self.executor.protect(&file, &params.password).await,
            Err(e) => Err(e),
        };
        respond("protect_pdf", params.source.name(), result)
    }

    #[tool(description = "Remove password protection from a PDF.")]
    async fn unlock_pdf(&self, Parameters(params): Parameters<PasswordParams>) -> String {
        let result = match self.load_limited(&params.source).await {
            Ok(file) => self.executor.unlock(&file, &params.password).await,
            Err(e) => Err(e),
        };
        respond("unlock_pdf", params.source.name(), result)
    }

    #[tool(
        description = "Get PDF metadata: page count, title, author, producer, dates and per-page dimensions."
    )]
    async fn pdf_info(&self, Parameters(params): Parameters<PdfInfoParams>) -> String {
        respond(
            "pdf_info",
            params.source.name(),
            self.process_pdf_info(&params).await,
        )
    }

    #[tool(
        description = "Fetch a stored artifact as base64. With cleanup=true the artifact is deleted after reading."
    )]
    async fn download_artifact(
        &self,
        Parameters(params): Parameters<DownloadArtifactParams>,
    ) -> String {
        respond(
            "download_artifact",
            params.name.clone(),
            self.process_download_artifact(&params),
        )
    }

    #[tool(description = "Delete stored artifacts and scratch files older than the given age in hours.")]
    async fn sweep_artifacts(&self, Parameters(params): Parameters<SweepArtifactsParams>) -> String {
        let max_age = params.max_age_hours.unwrap_or(self.max_artifact_age_hours);
        let workspaces = self.executor.workspaces().clone();
        let result = tokio::task::spawn_blocking(move || workspaces.sweep(max_age))
            .await
            .map_err(|e| Error::Internal {
                reason: format!("Task join error: {}", e),
            });
        respond::<SweepReport>("sweep_artifacts", format!("max_age_hours={}", max_age), result)
    }
}

impl PdfServer {
    async fn load_limited(&self, source: &PdfSource) -> crate::error::Result<UploadedFile> {
        self.limiter.check(STDIO_CLIENT)?;
        source.load().await
    }

    async fn process_merge_pdfs(&self, params: &MergePdfsParams) -> crate::error::Result<MergeOutcome> {
        self.limiter.check(STDIO_CLIENT)?;
        let mut files = Vec::with_capacity(params.sources.len());
        for source in &params.sources {
            files.push(source.load().await?);
        }
        self.executor.merge(&files).await
    }

    async fn process_split_pdf(&self, params: &SplitPdfParams) -> crate::error::Result<SplitOutcome> {
        let selection = match params.pages_per_file {
            Some(k) if k > 0 => SplitSelection::PagesPerFile(k),
            Some(_) => {
                return Err(Error::InvalidParameter {
                    name: "pages_per_file".to_string(),
                    reason: "must be at least 1".to_string(),
                })
            }
            None => SplitSelection::parse(params.page_range.as_deref())?,
        };
        let file = self.load_limited(&params.source).await?;
        self.executor.split(&file, &selection).await
    }

    async fn process_compress_pdf(
        &self,
        params: &CompressPdfParams,
    ) -> crate::error::Result<TransformOutcome> {
        let quality = CompressionQuality::parse_or_default(params.quality.as_deref());
        let file = self.load_limited(&params.source).await?;
        self.executor.compress(&file, quality).await
    }

    async fn process_rotate_pdf(&self, params: &RotatePdfParams) -> crate::error::Result<TransformOutcome> {
        let file = self.load_limited(&params.source).await?;
        self.executor.rotate(&file, params.degrees).await
    }

    async fn process_watermark_pdf(
        &self,
        params: &WatermarkPdfParams,
    ) -> crate::error::Result<TransformOutcome> {
        let opacity = parse_opacity(params.opacity.map(|o| o.to_string()).as_deref());
        let file = self.load_limited(&params.source).await?;
        self.executor.watermark(&file, &params.text, opacity).await
    }

    async fn process_pdf_info(&self, params: &PdfInfoParams) -> crate::error::Result<InfoOutcome> {
        let file = self.load_limited(&params.source).await?;
        self.executor.info(&file).await
    }

    fn process_download_artifact(
        &self,
        params: &DownloadArtifactParams,
    ) -> crate::error::Result<DownloadResult> {
        let fetched = self
            .executor
            .workspaces()
            .store()
            .fetch(&params.name, params.cleanup)?;
        Ok(DownloadResult {
            size: fetched.data.len(),
            base64: base64::engine::general_purpose::STANDARD.encode(&fetched.data),
            name: fetched.name,
            download_name: fetched.download_name,
        })
    }
}

#[tool_handler]
impl ServerHandler for PdfServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF workbench: merge, split, compress, rotate, watermark, protect, unlock and \
                 inspect PDFs. Results are stored as artifacts; fetch them with download_artifact."
                    .into(),
            ),
        }
    }
}

/// Serve MCP over stdio until the peer disconnects
pub async fn run_server(server: PdfServer) -> Result<()> {
    tracing::info!("PDF workbench MCP server ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

/// Build a server from configuration and serve it over stdio
pub async fn run_server_with_config(config: &ServiceConfig) -> Result<()> {
    run_server(PdfServer::from_config(config)?).await
}

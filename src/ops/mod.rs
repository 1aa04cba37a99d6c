//! Operation executor
//!
//! One routine per operation, shared by both presentation adapters. Every
//! routine follows the same shape: validate the upload, persist it into a
//! fresh workspace, run the tool, check the declared output, move it into
//! the processed store. The workspace is dropped (and deleted) on every
//! exit path.

pub mod extractor;
pub mod split;

pub use extractor::{ExtractedPage, LibraryExtractor, PageExtractor, ToolExtractor};
pub use split::{SplitPlanner, SplitResult, SplitSelection, SplitStrategy};

use crate::config::{ServiceConfig, SplitPolicy};
use crate::error::{Error, Result};
use crate::tool::output::{parse_info, InfoOutput, InfoParser};
use crate::tool::{path_arg, ToolInvoker};
use crate::workspace::{
    format_file_size, ArtifactName, ProcessedStore, StoredArtifact, Workspace, WorkspaceManager,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Opacity used when the requested one is missing, unparsable or out of range
pub const DEFAULT_OPACITY: f64 = 0.5;

const PDF_MAGIC: &[u8] = b"%PDF";

/// An uploaded input: declared filename plus content
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data,
        }
    }

    fn has_pdf_suffix(&self) -> bool {
        self.filename.to_ascii_lowercase().ends_with(".pdf")
    }

    fn has_pdf_magic(&self) -> bool {
        self.data.starts_with(PDF_MAGIC)
    }

    /// Reject empty or non-PDF uploads and return the safe filename.
    fn validate(&self) -> Result<String> {
        if self.data.is_empty() {
            return Err(Error::NoInputProvided);
        }
        if !self.has_pdf_suffix() || !self.has_pdf_magic() {
            return Err(Error::InvalidFileType {
                filename: self.filename.clone(),
            });
        }
        Ok(secure_filename(&self.filename))
    }
}

/// Reduce an uploaded filename to `[A-Za-z0-9._-]`, whitespace becoming `_`.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');

    if cleaned.is_empty() {
        "document.pdf".to_string()
    } else {
        cleaned.to_string()
    }
}

fn file_stem(safe_name: &str) -> &str {
    Path::new(safe_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document")
}

/// Operation kinds and their tool sub-commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Merge,
    Split,
    Compress,
    Rotate,
    Watermark,
    Protect,
    Unlock,
    Info,
}

impl Operation {
    pub fn subcommand(&self) -> &'static str {
        match self {
            Operation::Merge => "merge",
            Operation::Split => "split",
            Operation::Compress => "compress",
            Operation::Rotate => "rotate",
            Operation::Watermark => "watermark",
            Operation::Protect => "protect",
            Operation::Unlock => "unlock",
            Operation::Info => "info",
        }
    }

    fn artifact_tag(&self) -> &'static str {
        match self {
            Operation::Merge => "merged",
            Operation::Split => "split",
            Operation::Compress => "compressed",
            Operation::Rotate => "rotated",
            Operation::Watermark => "watermarked",
            Operation::Protect => "protected",
            Operation::Unlock => "unlocked",
            Operation::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl CompressionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionQuality::Low => "low",
            CompressionQuality::Medium => "medium",
            CompressionQuality::High => "high",
        }
    }

    /// Unknown or missing values fall back to `medium`.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Self::default(),
            Some(v) => v.parse().unwrap_or_else(|_| {
                tracing::warn!(quality = v, "Unknown compression quality, using medium");
                Self::default()
            }),
        }
    }
}

impl FromStr for CompressionQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(Error::InvalidParameter {
                name: "quality".to_string(),
                reason: format!("expected low, medium or high, got {:?}", s),
            }),
        }
    }
}

/// Parse an opacity in `[0, 1]`; anything else yields [`DEFAULT_OPACITY`].
pub fn parse_opacity(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && (0.0..=1.0).contains(v))
        .unwrap_or(DEFAULT_OPACITY)
}

/// Degrees must be a multiple of 90.
pub fn validate_rotation(degrees: i32) -> Result<i32> {
    if degrees % 90 != 0 {
        return Err(Error::InvalidParameter {
            name: "degrees".to_string(),
            reason: "rotation angle must be a multiple of 90 degrees".to_string(),
        });
    }
    Ok(degrees)
}

fn require_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::InvalidParameter {
            name: "password".to_string(),
            reason: "password must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Percentage saved, one decimal, never negative
pub fn compression_rate(original: u64, compressed: u64) -> String {
    if original == 0 || compressed >= original {
        return "0.0%".to_string();
    }
    let saved = (original - compressed) as f64 / original as f64 * 100.0;
    format!("{:.1}%", saved)
}

/// A request for one operation
#[derive(Debug, Clone)]
pub enum OperationRequest {
    Merge {
        files: Vec<UploadedFile>,
    },
    Split {
        file: UploadedFile,
        selection: SplitSelection,
    },
    Compress {
        file: UploadedFile,
        quality: CompressionQuality,
    },
    Rotate {
        file: UploadedFile,
        degrees: i32,
    },
    Watermark {
        file: UploadedFile,
        text: String,
        opacity: f64,
    },
    Protect {
        file: UploadedFile,
        password: String,
    },
    Unlock {
        file: UploadedFile,
        password: String,
    },
    Info {
        file: UploadedFile,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    #[serde(flatten)]
    pub artifact: StoredArtifact,
    pub merged_count: usize,
    pub original_filenames: Vec<String>,
    pub total_input_size: u64,
    pub total_input_size_formatted: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitArtifact {
    #[serde(flatten)]
    pub artifact: StoredArtifact,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitOutcome {
    pub files: Vec<SplitArtifact>,
    pub count: usize,
    pub strategy: SplitStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<StoredArtifact>,
}

/// Result of a single-input, single-output operation
#[derive(Debug, Clone, Serialize)]
pub struct TransformOutcome {
    pub operation: Operation,
    #[serde(flatten)]
    pub artifact: StoredArtifact,
    pub original_size: u64,
    pub original_size_formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<CompressionQuality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degrees: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_opacity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoOutcome {
    #[serde(flatten)]
    pub info: InfoOutput,
    pub size: u64,
    pub size_formatted: String,
    pub parser: InfoParser,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OperationOutcome {
    Merge(MergeOutcome),
    Split(SplitOutcome),
    Transform(TransformOutcome),
    Info(InfoOutcome),
}

/// Runs operations against the tool, the workspaces and the processed store
pub struct OperationExecutor {
    workspaces: WorkspaceManager,
    invoker: ToolInvoker,
    planner: SplitPlanner,
}

impl OperationExecutor {
    /// Executor using the tool for splits and qpdf as the fallback
    pub fn new(workspaces: WorkspaceManager, invoker: ToolInvoker, policy: SplitPolicy) -> Self {
        let primary = Arc::new(ToolExtractor::new(invoker.clone()));
        Self::with_extractors(workspaces, invoker, policy, primary, Arc::new(LibraryExtractor))
    }

    pub fn with_extractors(
        workspaces: WorkspaceManager,
        invoker: ToolInvoker,
        policy: SplitPolicy,
        primary: Arc<dyn PageExtractor>,
        fallback: Arc<dyn PageExtractor>,
    ) -> Self {
        let planner = SplitPlanner::new(invoker.clone(), primary, fallback, policy);
        Self {
            workspaces,
            invoker,
            planner,
        }
    }

    /// Executor for the configured data root and tool binary
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let workspaces = WorkspaceManager::new(&config.data_root)?;
        let invoker = ToolInvoker::system(&config.tool_path, config.tool_timeout);
        Ok(Self::new(workspaces, invoker, config.split))
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub async fn execute(&self, request: OperationRequest) -> Result<OperationOutcome> {
        match request {
            OperationRequest::Merge { files } => self.merge(&files).await.map(OperationOutcome::Merge),
            OperationRequest::Split { file, selection } => {
                self.split(&file, &selection).await.map(OperationOutcome::Split)
            }
            OperationRequest::Compress { file, quality } => self
                .compress(&file, quality)
                .await
                .map(OperationOutcome::Transform),
            OperationRequest::Rotate { file, degrees } => self
                .rotate(&file, degrees)
                .await
                .map(OperationOutcome::Transform),
            OperationRequest::Watermark {
                file,
                text,
                opacity,
            } => self
                .watermark(&file, &text, opacity)
                .await
                .map(OperationOutcome::Transform),
            OperationRequest::Protect { file, password } => self
                .protect(&file, &password)
                .await
                .map(OperationOutcome::Transform),
            OperationRequest::Unlock { file, password } => self
                .unlock(&file, &password)
                .await
                .map(OperationOutcome::Transform),
            OperationRequest::Info { file } => self.info(&file).await.map(OperationOutcome::Info),
        }
    }

    /// Concatenate at least two PDFs in upload order.
    pub async fn merge(&self, files: &[UploadedFile]) -> Result<MergeOutcome> {
        if files.is_empty() {
            return Err(Error::NoInputProvided);
        }

        let ws = self.workspaces.new_workspace()?;
        let mut inputs = Vec::with_capacity(files.len());
        let mut original_filenames = Vec::with_capacity(files.len());
        let mut total_input_size = 0u64;

        for file in files {
            if file.data.is_empty() {
                tracing::warn!(filename = %file.filename, "Skipping empty upload");
                continue;
            }
            if !file.has_pdf_suffix() || !file.has_pdf_magic() {
                tracing::warn!(filename = %file.filename, "Skipping non-PDF upload");
                continue;
            }
            let safe = secure_filename(&file.filename);
            let path = ws.save_input(inputs.len(), &safe, &file.data).await?;
            total_input_size += file.data.len() as u64;
            original_filenames.push(safe);
            inputs.push(path);
        }

        if inputs.len() < 2 {
            return Err(Error::NoValidInput {
                reason: format!(
                    "merge needs at least 2 valid PDF files, got {}",
                    inputs.len()
                ),
            });
        }

        let name = ArtifactName::tagged(Operation::Merge.artifact_tag(), "pdf");
        let output = ws.join(name.as_str());
        let mut args = vec!["merge".to_string(), path_arg(&output)?];
        for input in &inputs {
            args.push(path_arg(input)?);
        }

        tracing::info!(inputs = inputs.len(), "Merging PDFs");
        self.invoker.run(args).await?;
        let artifact = self.relocate(output, name).await?;
        close(ws);

        Ok(MergeOutcome {
            artifact,
            merged_count: inputs.len(),
            original_filenames,
            total_input_size,
            total_input_size_formatted: format_file_size(total_input_size),
        })
    }

    /// Split into one artifact per selected page or range.
    pub async fn split(&self, file: &UploadedFile, selection: &SplitSelection) -> Result<SplitOutcome> {
        let safe = file.validate()?;
        let ws = self.workspaces.new_workspace()?;
        let input = ws.save_input(0, &safe, &file.data).await?;

        let result = self
            .planner
            .split(&input, selection, &ws, file_stem(&safe))
            .await?;

        let store = self.workspaces.store().clone();
        let pages = result.pages;
        let (files, bundle) = blocking(move || {
            let files = store_split_pages(&store, &pages)?;
            let bundle = if files.len() > 1 {
                let names: Vec<String> = files.iter().map(|f| f.artifact.name.clone()).collect();
                match store.bundle(&names, ArtifactName::tagged("split", "zip")) {
                    Ok(bundle) => Some(bundle),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to bundle split output");
                        None
                    }
                }
            } else {
                None
            };
            Ok((files, bundle))
        })
        .await?;
        close(ws);

        tracing::info!(
            files = files.len(),
            strategy = ?result.strategy,
            "Split finished"
        );

        Ok(SplitOutcome {
            count: files.len(),
            files,
            strategy: result.strategy,
            page_count: result.page_count,
            bundle,
        })
    }

    pub async fn compress(
        &self,
        file: &UploadedFile,
        quality: CompressionQuality,
    ) -> Result<TransformOutcome> {
        let mut outcome = self
            .transform(Operation::Compress, file, vec![quality.as_str().to_string()])
            .await?;
        outcome.quality = Some(quality);
        outcome.compressed_size = Some(outcome.artifact.size);
        outcome.compression_rate = Some(compression_rate(
            outcome.original_size,
            outcome.artifact.size,
        ));
        Ok(outcome)
    }

    pub async fn rotate(&self, file: &UploadedFile, degrees: i32) -> Result<TransformOutcome> {
        let degrees = validate_rotation(degrees)?;
        let mut outcome = self
            .transform(Operation::Rotate, file, vec![degrees.to_string()])
            .await?;
        outcome.degrees = Some(degrees);
        Ok(outcome)
    }

    pub async fn watermark(
        &self,
        file: &UploadedFile,
        text: &str,
        opacity: f64,
    ) -> Result<TransformOutcome> {
        if text.trim().is_empty() {
            return Err(Error::InvalidParameter {
                name: "text".to_string(),
                reason: "watermark text must not be empty".to_string(),
            });
        }
        let opacity = if opacity.is_finite() && (0.0..=1.0).contains(&opacity) {
            opacity
        } else {
            DEFAULT_OPACITY
        };

        let mut outcome = self
            .transform(
                Operation::Watermark,
                file,
                vec![text.to_string(), opacity.to_string()],
            )
            .await?;
        outcome.watermark_text = Some(text.to_string());
        outcome.watermark_opacity = Some(opacity);
        Ok(outcome)
    }

    pub async fn protect(&self, file: &UploadedFile, password: &str) -> Result<TransformOutcome> {
        require_password(password)?;
        self.transform(Operation::Protect, file, vec![password.to_string()])
            .await
    }

    pub async fn unlock(&self, file: &UploadedFile, password: &str) -> Result<TransformOutcome> {
        require_password(password)?;
        self.transform(Operation::Unlock, file, vec![password.to_string()])
            .await
    }

    /// Document metadata; plain-text tool output is scanned for a page count.
    pub async fn info(&self, file: &UploadedFile) -> Result<InfoOutcome> {
        let safe = file.validate()?;
        let ws = self.workspaces.new_workspace()?;
        let input = ws.save_input(0, &safe, &file.data).await?;

        let output = self
            .invoker
            .run(vec!["info".to_string(), path_arg(&input)?])
            .await?;
        let (mut info, parser) = parse_info(&output.stdout)?;
        close(ws);

        if info.file_name.is_none() {
            info.file_name = Some(safe);
        }
        let size = file.data.len() as u64;

        Ok(InfoOutcome {
            info,
            size,
            size_formatted: format_file_size(size),
            parser,
        })
    }

    /// `<op> <in> <out> [extra...]` with one input and one output
    async fn transform(
        &self,
        operation: Operation,
        file: &UploadedFile,
        extra: Vec<String>,
    ) -> Result<TransformOutcome> {
        let safe = file.validate()?;
        let ws = self.workspaces.new_workspace()?;
        let input = ws.save_input(0, &safe, &file.data).await?;

        let name = ArtifactName::tagged(operation.artifact_tag(), "pdf");
        let output = ws.join(name.as_str());
        let mut args = vec![
            operation.subcommand().to_string(),
            path_arg(&input)?,
            path_arg(&output)?,
        ];
        args.extend(extra);

        self.invoker.run(args).await?;
        let artifact = self.relocate(output, name).await?;
        close(ws);

        let original_size = file.data.len() as u64;
        tracing::info!(
            operation = operation.subcommand(),
            artifact = %artifact.name,
            size = artifact.size,
            "Operation finished"
        );

        Ok(TransformOutcome {
            operation,
            artifact,
            original_size,
            original_size_formatted: format_file_size(original_size),
            quality: None,
            compressed_size: None,
            compression_rate: None,
            degrees: None,
            watermark_text: None,
            watermark_opacity: None,
        })
    }

    /// Move a workspace output into the store off the async workers.
    async fn relocate(&self, output: PathBuf, name: ArtifactName) -> Result<StoredArtifact> {
        let store = self.workspaces.store().clone();
        blocking(move || store.relocate(&output, name)).await
    }
}

/// Relocate every page, or none: on failure the pages already stored are
/// removed again.
fn store_split_pages(store: &ProcessedStore, pages: &[ExtractedPage]) -> Result<Vec<SplitArtifact>> {
    let mut files: Vec<SplitArtifact> = Vec::with_capacity(pages.len());
    for page in pages {
        match store.relocate(&page.path, ArtifactName::prefixed(&page.name)) {
            Ok(artifact) => files.push(SplitArtifact {
                artifact,
                page_number: page.page_number,
            }),
            Err(e) => {
                for stored in &files {
                    let removed = ArtifactName::parse(&stored.artifact.name)
                        .and_then(|name| store.remove(&name));
                    if let Err(remove_err) = removed {
                        tracing::warn!(
                            artifact = %stored.artifact.name,
                            error = %remove_err,
                            "Failed to discard partial split output"
                        );
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(files)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal {
            reason: format!("Task join error: {}", e),
        })?
}

fn close(ws: Workspace) {
    let path = ws.path().to_path_buf();
    if let Err(e) = ws.close() {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove workspace");
    }
}

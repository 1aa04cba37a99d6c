//! Error types for the PDF workbench

use thiserror::Error;

/// Result type alias for the PDF workbench
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the PDF workbench
#[derive(Error, Debug)]
pub enum Error {
    /// No upload was supplied at all, or the upload was empty
    #[error("No input provided")]
    NoInputProvided,

    /// Every uploaded file was rejected (empty or not a PDF)
    #[error("No valid PDF input: {reason}")]
    NoValidInput { reason: String },

    /// Upload is not a PDF (wrong suffix or missing PDF magic)
    #[error("Invalid file type: {filename}")]
    InvalidFileType { filename: String },

    /// Argument rejected by the sanitizer before any process was spawned
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Operation parameter outside its accepted domain
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Invalid page range
    #[error("Invalid page range: {range}")]
    InvalidPageRange { range: String },

    /// Page out of bounds
    #[error("Page {page} out of bounds (total: {total})")]
    PageOutOfBounds { page: u32, total: u32 },

    /// Tool binary missing or not executable
    #[error("Failed to start PDF tool: {reason}")]
    ToolSpawn { reason: String },

    /// Tool killed after exceeding its wall-clock budget
    #[error("PDF tool timed out after {seconds}s")]
    ToolTimeout { seconds: u64 },

    /// Tool exited with a nonzero status
    #[error("PDF tool failed (exit code {exit_code}): {stderr}")]
    ToolExecution { exit_code: i32, stderr: String },

    /// Tool stdout could not be interpreted
    #[error("Malformed tool output: {reason}")]
    MalformedToolOutput { reason: String },

    /// Tool reported success but the declared output is missing
    #[error("Output not produced: {path}")]
    OutputNotProduced { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// Artifact missing from the processed store
    #[error("Artifact not found: {name}")]
    ArtifactNotFound { name: String },

    /// Client exceeded its request budget
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Internal failure (task join, poisoned state)
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// ZIP archive error
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors) are omitted, except the
    /// tool's stderr which is the diagnostic the caller needs.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::NoInputProvided => "No file provided".to_string(),
            Error::NoValidInput { .. } => "No valid PDF file provided".to_string(),
            Error::InvalidFileType { .. } => {
                "Invalid file type. Please upload a PDF.".to_string()
            }
            Error::InvalidArgument { reason } => format!("Invalid argument: {}", reason),
            Error::InvalidParameter { name, reason } => {
                format!("Invalid {}: {}", name, reason)
            }
            Error::InvalidPageRange { range } => format!("Invalid page range: {}", range),
            Error::PageOutOfBounds { page, total } => {
                format!("Page {} out of bounds (total: {})", page, total)
            }
            Error::ToolSpawn { .. } => "PDF tool is not available".to_string(),
            Error::ToolTimeout { seconds } => {
                format!("Processing timed out after {}s, please try again", seconds)
            }
            Error::ToolExecution { stderr, .. } => {
                format!("PDF processing failed: {}", stderr.trim())
            }
            Error::MalformedToolOutput { .. } => "PDF tool returned unexpected output".to_string(),
            Error::OutputNotProduced { .. } => "Output file was not created".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::QpdfError { .. } => "PDF processing error".to_string(),
            Error::ArtifactNotFound { .. } => "File not found".to_string(),
            Error::RateLimited { retry_after_secs } => {
                format!("Too many requests, retry in {}s", retry_after_secs)
            }
            Error::Config { .. } => "Server configuration error".to_string(),
            Error::Internal { .. } => "Internal error".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::Zip(_) => "Archive error".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    /// Nothing is retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ToolTimeout { .. } | Error::RateLimited { .. })
    }

    /// Stable machine-readable code for adapters
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoInputProvided => "NO_INPUT_PROVIDED",
            Error::NoValidInput { .. } => "NO_VALID_INPUT",
            Error::InvalidFileType { .. } => "INVALID_FILE_TYPE",
            Error::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Error::InvalidParameter { .. } => "INVALID_PARAMETER",
            Error::InvalidPageRange { .. } => "INVALID_PAGE_RANGE",
            Error::PageOutOfBounds { .. } => "PAGE_OUT_OF_BOUNDS",
            Error::ToolSpawn { .. } => "TOOL_SPAWN_ERROR",
            Error::ToolTimeout { .. } => "TOOL_TIMEOUT",
            Error::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            Error::MalformedToolOutput { .. } => "MALFORMED_TOOL_OUTPUT",
            Error::OutputNotProduced { .. } => "OUTPUT_NOT_PRODUCED",
            Error::InvalidPdf { .. } => "INVALID_PDF",
            Error::QpdfError { .. } => "PDF_LIBRARY_ERROR",
            Error::ArtifactNotFound { .. } => "ARTIFACT_NOT_FOUND",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Config { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Zip(_) => "ARCHIVE_ERROR",
            Error::Base64Decode(_) => "BASE64_ERROR",
        }
    }
}

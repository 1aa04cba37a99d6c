//! qpdf FFI wrapper
//!
//! The library path used when the external tool cannot handle a document:
//! page counting, copying a page window into a standalone document and
//! writing single-page documents. All calls are blocking; run them on
//! `spawn_blocking` from async code.

use crate::error::{Error, Result};
use qpdf::QPdf;

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

fn open_qpdf(data: &[u8]) -> Result<QPdf> {
    QPdf::read_from_memory(data).map_err(map_qpdf_error)
}

fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    match e.error_code() {
        qpdf::QPdfErrorCode::InvalidPassword => Error::InvalidPdf {
            reason: "document is password protected".to_string(),
        },
        _ => Error::QpdfError {
            reason: e.to_string(),
        },
    }
}

/// Build a new document from the given 0-indexed pages of `source`.
fn copy_pages(source: &QPdf, indices: &[u32], total: u32) -> Result<Vec<u8>> {
    let dest = QPdf::empty();

    for &idx in indices {
        let page = source.get_page(idx).ok_or(Error::PageOutOfBounds {
            page: idx + 1,
            total,
        })?;
        let copied = dest.copy_from_foreign(&page);
        dest.add_page(&copied, false).map_err(map_qpdf_error)?;
    }

    let mut writer = dest.writer();
    writer.preserve_encryption(false);
    writer.write_to_memory().map_err(map_qpdf_error)
}

impl QpdfWrapper {
    /// Number of pages in the document
    pub fn page_count(input_data: &[u8]) -> Result<u32> {
        let qpdf = open_qpdf(input_data)?;
        qpdf.get_num_pages().map_err(map_qpdf_error)
    }

    /// Copy the inclusive 1-based page window `start..=end` into a new document.
    pub fn extract_window(input_data: &[u8], start: u32, end: u32) -> Result<Vec<u8>> {
        let source = open_qpdf(input_data)?;
        let total = source.get_num_pages().map_err(map_qpdf_error)?;

        if start == 0 || start > end {
            return Err(Error::InvalidPageRange {
                range: format!("{}-{}", start, end),
            });
        }
        if end > total {
            return Err(Error::PageOutOfBounds { page: end, total });
        }

        let indices: Vec<u32> = (start - 1..end).collect();
        copy_pages(&source, &indices, total)
    }

    /// One standalone document per page, in page order.
    ///
    /// Fails if the document cannot be opened or has no pages.
    pub fn single_pages(input_data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let source = open_qpdf(input_data)?;
        let total = source.get_num_pages().map_err(map_qpdf_error)?;
        if total == 0 {
            return Err(Error::InvalidPdf {
                reason: "PDF has no pages".to_string(),
            });
        }

        (0..total)
            .map(|idx| copy_pages(&source, &[idx], total))
            .collect()
    }

    /// Concatenate documents in order.
    pub fn merge(inputs: &[&[u8]]) -> Result<Vec<u8>> {
        if inputs.is_empty() {
            return Err(Error::NoInputProvided);
        }

        let dest = QPdf::empty();

        for (i, input_data) in inputs.iter().enumerate() {
            let source = QPdf::read_from_memory(input_data).map_err(|e| Error::QpdfError {
                reason: format!("Failed to read input PDF {}: {}", i, e),
            })?;

            let pages = source.get_pages().map_err(|e| Error::QpdfError {
                reason: format!("Failed to get pages from input PDF {}: {}", i, e),
            })?;

            for page in &pages {
                let copied = dest.copy_from_foreign(page);
                dest.add_page(&copied, false).map_err(map_qpdf_error)?;
            }
        }

        dest.writer().write_to_memory().map_err(map_qpdf_error)
    }
}

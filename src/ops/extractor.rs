//! Page extraction backends
//!
//! Both the external tool and the qpdf library can turn a source document
//! plus a page selection into single-file outputs. The split planner picks
//! one through the [`PageExtractor`] trait.

use crate::error::{Error, Result};
use crate::pdf::{parse_page_range, QpdfWrapper};
use crate::tool::output::parse_split;
use crate::tool::{path_arg, ToolInvoker};
use crate::workspace::Workspace;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One output document written into a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedPage {
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub page_number: Option<u32>,
}

#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &'static str;

    /// Write one output per token of `range` (every page when `None`) into
    /// `workspace`, naming files after `prefix`.
    async fn extract(
        &self,
        source: &Path,
        range: Option<&str>,
        workspace: &Workspace,
        prefix: &str,
    ) -> Result<Vec<ExtractedPage>>;
}

/// Delegates to the tool's `split` sub-command
#[derive(Clone)]
pub struct ToolExtractor {
    invoker: ToolInvoker,
}

impl ToolExtractor {
    pub fn new(invoker: ToolInvoker) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl PageExtractor for ToolExtractor {
    fn name(&self) -> &'static str {
        "tool"
    }

    async fn extract(
        &self,
        source: &Path,
        range: Option<&str>,
        workspace: &Workspace,
        prefix: &str,
    ) -> Result<Vec<ExtractedPage>> {
        let mut args = vec![
            "split".to_string(),
            path_arg(source)?,
            path_arg(&workspace.join(prefix))?,
        ];
        if let Some(range) = range {
            args.push(range.to_string());
        }

        let output = self.invoker.run(args).await?;
        let parsed = parse_split(&output.stdout)?;

        let mut pages = Vec::with_capacity(parsed.files.len());
        for file in parsed.files {
            let path = if file.path.is_relative() {
                workspace.join(&file.path)
            } else {
                file.path.clone()
            };

            if !workspace.contains(&path) {
                if path.exists() {
                    tracing::warn!(
                        path = %path.display(),
                        "Ignoring split output outside the workspace"
                    );
                    continue;
                }
                return Err(Error::OutputNotProduced {
                    path: path.display().to_string(),
                });
            }

            let size = tokio::fs::metadata(&path).await?.len();
            pages.push(ExtractedPage {
                name: file.display_name(),
                path,
                size,
                page_number: file.page_number,
            });
        }

        Ok(pages)
    }
}

/// Writes outputs with qpdf, without the external tool
#[derive(Debug, Clone, Copy, Default)]
pub struct LibraryExtractor;

#[async_trait]
impl PageExtractor for LibraryExtractor {
    fn name(&self) -> &'static str {
        "library"
    }

    async fn extract(
        &self,
        source: &Path,
        range: Option<&str>,
        workspace: &Workspace,
        prefix: &str,
    ) -> Result<Vec<ExtractedPage>> {
        let data = tokio::fs::read(source).await?;
        let range = range.map(str::to_string);

        let documents = tokio::task::spawn_blocking(move || -> Result<Vec<(u32, Vec<u8>)>> {
            match range {
                None => Ok(QpdfWrapper::single_pages(&data)?
                    .into_iter()
                    .zip(1u32..)
                    .map(|(doc, page)| (page, doc))
                    .collect()),
                Some(expr) => {
                    let total = QpdfWrapper::page_count(&data)?;
                    parse_page_range(&expr, total)?
                        .into_iter()
                        .map(|token| {
                            QpdfWrapper::extract_window(&data, token.start, token.end)
                                .map(|doc| (token.start, doc))
                        })
                        .collect()
                }
            }
        })
        .await
        .map_err(|e| Error::Internal {
            reason: format!("Task join error: {}", e),
        })??;

        let mut pages = Vec::with_capacity(documents.len());
        for (page_number, doc) in documents {
            let name = format!("{}_page_{}.pdf", prefix, page_number);
            let path = workspace.join(&name);
            tokio::fs::write(&path, &doc).await?;
            pages.push(ExtractedPage {
                name,
                path,
                size: doc.len() as u64,
                page_number: Some(page_number),
            });
        }

        tracing::debug!(pages = pages.len(), "Library extraction finished");
        Ok(pages)
    }
}

//! Split strategy planning
//!
//! A split is carried out in one of three ways:
//! - `Direct`: one tool call with the full page-range expression
//! - `Batched`: the document is cut into page windows with the library, each
//!   window is split by the tool and page numbers are shifted back
//! - `Fallback`: the library writes one document per page, no tool involved
//!
//! Batching keeps the range argument short; the offset remap is what keeps
//! page numbers absolute across windows.

use crate::config::SplitPolicy;
use crate::error::{Error, Result};
use crate::ops::extractor::{ExtractedPage, PageExtractor};
use crate::pdf::{expand_all, parse_page_range, per_file, to_expr, PageRange, PageToken, QpdfWrapper};
use crate::tool::output::parse_info;
use crate::tool::sanitize::MAX_ARG_CHARS;
use crate::tool::{path_arg, ToolInvoker};
use crate::workspace::Workspace;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Which pages to split out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitSelection {
    /// Every page into its own file
    All,
    /// Explicit expression; one file per comma token
    Range(String),
    /// Consecutive chunks of this many pages
    PagesPerFile(u32),
}

impl SplitSelection {
    /// Accepts nothing / `all`, `count:<k>`, or a page-range expression.
    pub fn parse(input: Option<&str>) -> Result<Self> {
        let input = match input.map(str::trim) {
            None | Some("") => return Ok(Self::All),
            Some(s) => s,
        };

        if let Some(k) = input.strip_prefix("count:") {
            let k: u32 = k.trim().parse().map_err(|_| Error::InvalidParameter {
                name: "page_range".to_string(),
                reason: format!("invalid page count {:?}", k),
            })?;
            if k == 0 {
                return Err(Error::InvalidParameter {
                    name: "page_range".to_string(),
                    reason: "pages per file must be at least 1".to_string(),
                });
            }
            return Ok(Self::PagesPerFile(k));
        }

        match PageRange::parse(input)? {
            PageRange::All => Ok(Self::All),
            PageRange::Tokens(_) => Ok(Self::Range(input.to_string())),
        }
    }
}

/// How a split was actually carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SplitStrategy {
    Direct,
    Batched { batches: usize, failed: usize },
    Fallback,
}

/// One page window processed as a standalone document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub window_start: u32,
    pub window_end: u32,
    pub tokens: Vec<PageToken>,
}

impl Batch {
    /// Added to window-local page numbers to get absolute ones
    pub fn offset(&self) -> u32 {
        self.window_start - 1
    }

    /// The batch's tokens relative to the window document
    pub fn local_expr(&self) -> String {
        let local: Vec<PageToken> = self
            .tokens
            .iter()
            .map(|t| t.shifted_down(self.offset()))
            .collect();
        to_expr(&local)
    }
}

/// Group sorted tokens into windows spanning at most `batch_size` pages.
/// A token longer than `batch_size` gets a window of its own.
pub fn plan_batches(tokens: &[PageToken], batch_size: u32) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches: Vec<Batch> = Vec::new();

    for &token in tokens {
        if let Some(current) = batches.last_mut() {
            let end = current.window_end.max(token.end);
            if token.start >= current.window_start && end - current.window_start < batch_size {
                current.window_end = end;
                current.tokens.push(token);
                continue;
            }
        }

        batches.push(Batch {
            index: batches.len() + 1,
            window_start: token.start,
            window_end: token.end,
            tokens: vec![token],
        });
    }

    batches
}

/// Shift window-local results back to absolute page numbers and rename
/// them so names stay unique across windows.
pub fn remap_batch_pages(pages: &mut [ExtractedPage], batch: &Batch, stem: &str) {
    let offset = batch.offset();
    for page in pages.iter_mut() {
        if let Some(local) = page.page_number {
            let absolute = local + offset;
            page.page_number = Some(absolute);
            page.name = format!("{}_page_{}.pdf", stem, absolute);
        }
    }
}

/// Ascending by page number, unnumbered entries last
pub fn sort_pages(pages: &mut [ExtractedPage]) {
    pages.sort_by_key(|p| (p.page_number.is_none(), p.page_number));
}

/// Result of a planned split
#[derive(Debug, Clone)]
pub struct SplitResult {
    pub pages: Vec<ExtractedPage>,
    pub strategy: SplitStrategy,
    /// Page count reported by the tool, if it could be queried
    pub page_count: Option<u32>,
}

pub struct SplitPlanner {
    invoker: ToolInvoker,
    primary: Arc<dyn PageExtractor>,
    fallback: Arc<dyn PageExtractor>,
    policy: SplitPolicy,
}

impl SplitPlanner {
    pub fn new(
        invoker: ToolInvoker,
        primary: Arc<dyn PageExtractor>,
        fallback: Arc<dyn PageExtractor>,
        policy: SplitPolicy,
    ) -> Self {
        Self {
            invoker,
            primary,
            fallback,
            policy,
        }
    }

    pub fn policy(&self) -> &SplitPolicy {
        &self.policy
    }

    /// Longest range expression sent in one call; never above what the
    /// sanitizer accepts
    pub fn range_budget(&self) -> usize {
        self.policy.max_range_arg_len.min(MAX_ARG_CHARS)
    }

    async fn page_count(&self, source: &Path) -> Result<u32> {
        let output = self
            .invoker
            .run(vec!["info".to_string(), path_arg(source)?])
            .await?;
        let (info, _) = parse_info(&output.stdout)?;
        if info.page_count == 0 {
            return Err(Error::MalformedToolOutput {
                reason: "tool reported zero pages".to_string(),
            });
        }
        Ok(info.page_count)
    }

    /// Split `source` into documents inside `workspace`, named after `stem`.
    pub async fn split(
        &self,
        source: &Path,
        selection: &SplitSelection,
        workspace: &Workspace,
        stem: &str,
    ) -> Result<SplitResult> {
        let page_count = match self.page_count(source).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Page count query failed, using library extraction");
                return self.fallback(source, workspace, stem, None).await;
            }
        };

        let (tokens, force_batch) = match selection {
            SplitSelection::All => (
                expand_all(page_count),
                page_count > self.policy.large_document_threshold,
            ),
            SplitSelection::Range(expr) => (parse_page_range(expr, page_count)?, false),
            SplitSelection::PagesPerFile(k) => (per_file(page_count, *k)?, false),
        };

        let expr = to_expr(&tokens);
        let batched = force_batch || expr.len() > self.range_budget();
        tracing::info!(
            page_count,
            outputs = tokens.len(),
            range_len = expr.len(),
            batched,
            "Planning split"
        );

        if batched {
            return self
                .batched(source, &tokens, workspace, stem, page_count)
                .await;
        }

        match self
            .primary
            .extract(source, Some(&expr), workspace, stem)
            .await
        {
            Ok(mut pages) if !pages.is_empty() => {
                sort_pages(&mut pages);
                Ok(SplitResult {
                    pages,
                    strategy: SplitStrategy::Direct,
                    page_count: Some(page_count),
                })
            }
            Ok(_) => {
                tracing::warn!(extractor = self.primary.name(), "Split produced no pages");
                self.fallback(source, workspace, stem, Some(page_count)).await
            }
            Err(e) => {
                tracing::warn!(extractor = self.primary.name(), error = %e, "Split failed");
                self.fallback(source, workspace, stem, Some(page_count)).await
            }
        }
    }

    async fn batched(
        &self,
        source: &Path,
        tokens: &[PageToken],
        workspace: &Workspace,
        stem: &str,
        page_count: u32,
    ) -> Result<SplitResult> {
        let batches = plan_batches(tokens, self.policy.batch_size);
        let data = Arc::new(tokio::fs::read(source).await?);
        let mut pages = Vec::new();
        let mut failed = 0;

        for batch in &batches {
            match self.run_batch(&data, batch, workspace, stem).await {
                Ok(batch_pages) => pages.extend(batch_pages),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        batch = batch.index,
                        window_start = batch.window_start,
                        window_end = batch.window_end,
                        error = %e,
                        "Batch failed, skipping"
                    );
                }
            }
        }

        if pages.is_empty() {
            tracing::warn!(batches = batches.len(), "No batch produced pages");
            return self.fallback(source, workspace, stem, Some(page_count)).await;
        }

        sort_pages(&mut pages);
        Ok(SplitResult {
            pages,
            strategy: SplitStrategy::Batched {
                batches: batches.len(),
                failed,
            },
            page_count: Some(page_count),
        })
    }

    async fn run_batch(
        &self,
        data: &Arc<Vec<u8>>,
        batch: &Batch,
        workspace: &Workspace,
        stem: &str,
    ) -> Result<Vec<ExtractedPage>> {
        let (start, end) = (batch.window_start, batch.window_end);
        let data = Arc::clone(data);
        let window = tokio::task::spawn_blocking(move || QpdfWrapper::extract_window(&data, start, end))
            .await
            .map_err(|e| Error::Internal {
                reason: format!("Task join error: {}", e),
            })??;

        let window_path = workspace.join(format!("batch_{}.pdf", batch.index));
        tokio::fs::write(&window_path, &window).await?;

        let prefix = format!("batch_{}", batch.index);
        let mut pages = self
            .primary
            .extract(&window_path, Some(&batch.local_expr()), workspace, &prefix)
            .await?;
        remap_batch_pages(&mut pages, batch, stem);

        tracing::debug!(batch = batch.index, pages = pages.len(), "Batch finished");
        Ok(pages)
    }

    async fn fallback(
        &self,
        source: &Path,
        workspace: &Workspace,
        stem: &str,
        page_count: Option<u32>,
    ) -> Result<SplitResult> {
        let mut pages = self.fallback.extract(source, None, workspace, stem).await?;
        sort_pages(&mut pages);
        tracing::info!(
            extractor = self.fallback.name(),
            pages = pages.len(),
            "Fallback extraction finished"
        );
        Ok(SplitResult {
            pages,
            strategy: SplitStrategy::Fallback,
            page_count,
        })
    }
}

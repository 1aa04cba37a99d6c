//! Page range expressions
//!
//! Grammar: the literal `all`, or comma-separated tokens where each token is
//! a 1-based page `N` or an inclusive range `N-M`. Each token describes one
//! output document.

use crate::error::{Error, Result};
use std::fmt;

/// One comma token: an inclusive, 1-based page span
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageToken {
    pub start: u32,
    pub end: u32,
}

impl PageToken {
    pub fn single(page: u32) -> Self {
        Self {
            start: page,
            end: page,
        }
    }

    pub fn span(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of pages covered
    pub fn page_count(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Same span expressed relative to a window starting after `offset`
    pub fn shifted_down(&self, offset: u32) -> Self {
        Self {
            start: self.start - offset,
            end: self.end - offset,
        }
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A parsed but not yet bounds-checked expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRange {
    All,
    Tokens(Vec<PageToken>),
}

impl PageRange {
    /// Parse the textual grammar. Bounds are checked by [`PageRange::resolve`].
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() || expr.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let invalid = || Error::InvalidPageRange {
            range: expr.to_string(),
        };

        let mut tokens = Vec::new();
        for part in expr.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let token = match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_page(start).ok_or_else(invalid)?;
                    let end = parse_page(end).ok_or_else(invalid)?;
                    if start > end {
                        return Err(invalid());
                    }
                    PageToken::span(start, end)
                }
                None => PageToken::single(parse_page(part).ok_or_else(invalid)?),
            };
            tokens.push(token);
        }

        if tokens.is_empty() {
            return Err(invalid());
        }
        Ok(Self::Tokens(tokens))
    }

    /// Check every page against `page_count` and normalise: `All` becomes one
    /// token per page, explicit tokens are deduplicated and sorted.
    pub fn resolve(&self, page_count: u32) -> Result<Vec<PageToken>> {
        match self {
            Self::All => Ok(expand_all(page_count)),
            Self::Tokens(tokens) => {
                for token in tokens {
                    if token.end > page_count {
                        return Err(Error::PageOutOfBounds {
                            page: token.end,
                            total: page_count,
                        });
                    }
                }
                let mut tokens = tokens.clone();
                tokens.sort();
                tokens.dedup();
                Ok(tokens)
            }
        }
    }
}

fn parse_page(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok().filter(|&n| n >= 1)
}

/// Parse and resolve in one step.
pub fn parse_page_range(expr: &str, page_count: u32) -> Result<Vec<PageToken>> {
    PageRange::parse(expr)?.resolve(page_count)
}

/// `1,2,...,N`: one token per page
pub fn expand_all(page_count: u32) -> Vec<PageToken> {
    (1..=page_count).map(PageToken::single).collect()
}

/// `1-k,k+1-2k,...`, the last span clipped to the page count
pub fn per_file(page_count: u32, pages_per_file: u32) -> Result<Vec<PageToken>> {
    if pages_per_file == 0 {
        return Err(Error::InvalidParameter {
            name: "pages_per_file".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let mut tokens = Vec::new();
    let mut start = 1u32;
    while start <= page_count {
        let end = start.saturating_add(pages_per_file - 1).min(page_count);
        tokens.push(PageToken::span(start, end));
        start = end + 1;
    }
    Ok(tokens)
}

/// Render tokens back into the textual grammar.
pub fn to_expr(tokens: &[PageToken]) -> String {
    tokens
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

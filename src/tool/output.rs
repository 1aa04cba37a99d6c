//! Parsing of the processing tool's stdout
//!
//! The tool prints one JSON object per call. Only a narrow set of fields is
//! relied upon; everything else is optional and unknown fields are ignored.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-page metadata reported by `info`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    #[serde(alias = "page_number")]
    pub page_number: u32,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub rotation: Option<i32>,
}

/// Document metadata reported by `info`. Only `pageCount` is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(alias = "page_count")]
    pub page_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageMetadata>,
}

/// Which parser produced an [`InfoOutput`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoParser {
    Json,
    RawText,
}

/// One file reported by `split`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SplitFile {
    pub path: PathBuf,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "pageNumber")]
    pub page_number: Option<u32>,
}

impl SplitFile {
    /// Reported name, or the file name of the path
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SplitOutput {
    pub files: Vec<SplitFile>,
}

static PAGE_COUNT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:number\s+of\s+pages|page\s*count|pages)\s*:\s*(\d+)\s*$")
        .expect("valid page count pattern")
});

/// Deserialize a JSON object from stdout, tolerating noise around it.
fn parse_json_object<T: DeserializeOwned>(stdout: &str) -> Result<T> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(Error::MalformedToolOutput {
            reason: "empty output".to_string(),
        });
    }

    let first_err = match serde_json::from_str::<T>(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(Error::MalformedToolOutput {
        reason: first_err.to_string(),
    })
}

/// Parse `info` output as JSON.
pub fn parse_info_json(stdout: &str) -> Result<InfoOutput> {
    parse_json_object(stdout)
}

/// Scan plain-text `info` output for a page-count line.
pub fn parse_info_raw(stdout: &str) -> Result<InfoOutput> {
    let page_count = PAGE_COUNT_LINE
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or_else(|| Error::MalformedToolOutput {
            reason: "no page count in tool output".to_string(),
        })?;

    Ok(InfoOutput {
        page_count,
        ..Default::default()
    })
}

/// Parse `info` output, falling back to the raw-text scan.
pub fn parse_info(stdout: &str) -> Result<(InfoOutput, InfoParser)> {
    match parse_info_json(stdout) {
        Ok(info) => Ok((info, InfoParser::Json)),
        Err(json_err) => {
            tracing::warn!(error = %json_err, "info output is not JSON, scanning raw text");
            parse_info_raw(stdout).map(|info| (info, InfoParser::RawText))
        }
    }
}

/// Parse `split` output. Malformed output is reported, not recovered here.
pub fn parse_split(stdout: &str) -> Result<SplitOutput> {
    parse_json_object(stdout)
}

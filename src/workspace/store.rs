//! Processed store: the shared, flat directory of downloadable artifacts

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Prefix of every download URL
pub const DOWNLOAD_ROUTE: &str = "/api/download";

/// Unique name of an artifact in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName(String);

impl ArtifactName {
    /// `<tag>_<uuid>.<ext>`, e.g. `merged_<uuid>.pdf`
    pub fn tagged(tag: &str, ext: &str) -> Self {
        Self(format!("{}_{}.{}", tag, Uuid::new_v4(), ext))
    }

    /// `<uuid-hex>_<display>`, keeping a human-readable suffix
    pub fn prefixed(display: &str) -> Self {
        Self(format!("{}_{}", Uuid::new_v4().simple(), display))
    }

    /// Validate a caller-supplied name. Names are flat: no separators, no
    /// parent references.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0');
        if invalid {
            return Err(Error::ArtifactNotFound {
                name: name.to_string(),
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name offered to the client: the leading `<id>_` segment is dropped.
    pub fn display_name(&self) -> &str {
        display_name(&self.0)
    }
}

impl std::fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip a leading `<uuid>_` from a stored name.
pub fn display_name(name: &str) -> &str {
    match name.split_once('_') {
        Some((prefix, rest)) if !rest.is_empty() && Uuid::try_parse(prefix).is_ok() => rest,
        _ => name,
    }
}

/// Metadata of an artifact in the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredArtifact {
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub size_formatted: String,
    pub download_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

/// Bytes read back from the store
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub name: String,
    pub download_name: String,
    pub data: Vec<u8>,
}

/// Human-readable size with one decimal above bytes
pub fn format_file_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size < KB {
        format!("{} B", size)
    } else if size < MB {
        format!("{:.1} KB", size as f64 / KB as f64)
    } else if size < GB {
        format!("{:.1} MB", size as f64 / MB as f64)
    } else {
        format!("{:.1} GB", size as f64 / GB as f64)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedStore {
    dir: PathBuf,
}

impl ProcessedStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &ArtifactName) -> PathBuf {
        self.dir.join(name.as_str())
    }

    /// Move a finished workspace output into the store under `name`.
    pub fn relocate(&self, source: &Path, name: ArtifactName) -> Result<StoredArtifact> {
        if !source.is_file() {
            return Err(Error::OutputNotProduced {
                path: source.display().to_string(),
            });
        }

        let target = self.path_of(&name);
        if let Err(rename_err) = fs::rename(source, &target) {
            // Different filesystem: copy then remove
            tracing::debug!(error = %rename_err, "rename failed, copying artifact");
            fs::copy(source, &target)?;
            if let Err(e) = fs::remove_file(source) {
                tracing::warn!(path = %source.display(), error = %e, "Failed to remove relocated source");
            }
        }

        tracing::info!(artifact = %name, "Stored artifact");
        self.describe(&name)
    }

    /// Metadata for an existing artifact.
    pub fn describe(&self, name: &ArtifactName) -> Result<StoredArtifact> {
        let path = self.path_of(name);
        let metadata = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return Err(Error::ArtifactNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ArtifactNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let size = metadata.len();
        let modified = metadata
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

        Ok(StoredArtifact {
            name: name.to_string(),
            path,
            size,
            size_formatted: format_file_size(size),
            download_url: format!("{}/{}", DOWNLOAD_ROUTE, name),
            modified,
        })
    }

    /// Read an artifact; with `cleanup` it is deleted once read.
    pub fn fetch(&self, name: &str, cleanup: bool) -> Result<FetchedArtifact> {
        let name = ArtifactName::parse(name)?;
        let path = self.path_of(&name);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(artifact = %name, "Artifact not found");
                return Err(Error::ArtifactNotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if cleanup {
            self.remove(&name)?;
            tracing::info!(artifact = %name, "Artifact removed after download");
        }

        Ok(FetchedArtifact {
            download_name: name.display_name().to_string(),
            name: name.to_string(),
            data,
        })
    }

    /// Delete an artifact. Returns false if it was already gone.
    pub fn remove(&self, name: &ArtifactName) -> Result<bool> {
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Zip existing artifacts into a new one. Missing names are skipped;
    /// if none exist the bundle is not created.
    pub fn bundle(&self, names: &[String], bundle: ArtifactName) -> Result<StoredArtifact> {
        let target = self.path_of(&bundle);
        let file = fs::File::create(&target)?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let finished = self
            .write_entries(&mut zip, names, options)
            .and_then(|added| {
                zip.finish()?;
                Ok(added)
            });
        let added = match finished {
            Ok(added) => added,
            Err(e) => {
                let _ = fs::remove_file(&target);
                return Err(e);
            }
        };

        if added == 0 {
            let _ = fs::remove_file(&target);
            return Err(Error::ArtifactNotFound {
                name: names.join(","),
            });
        }

        tracing::info!(artifact = %bundle, entries = added, "Created bundle");
        self.describe(&bundle)
    }

    fn write_entries(
        &self,
        zip: &mut ZipWriter<fs::File>,
        names: &[String],
        options: SimpleFileOptions,
    ) -> Result<usize> {
        let mut used = HashSet::new();
        let mut added = 0;

        for raw in names {
            let Ok(name) = ArtifactName::parse(raw) else {
                continue;
            };
            let data = match fs::read(self.path_of(&name)) {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!(artifact = %name, "Skipping missing artifact in bundle");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let entry = unique_entry_name(name.display_name(), &mut used);
            zip.start_file(entry, options)?;
            zip.write_all(&data)?;
            added += 1;
        }

        Ok(added)
    }
}

/// `a.pdf`, then `a_1.pdf`, `a_2.pdf`, ...
fn unique_entry_name(name: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = name.to_string();
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };

    let mut counter = 1;
    while used.contains(&candidate) {
        candidate = format!("{}_{}{}", stem, counter, ext);
        counter += 1;
    }
    used.insert(candidate.clone());
    candidate
}

//! Checklist document extraction from downloaded ZIP archives
//!
//! Most archives carry the manual XCCDF document directly. A few platform
//! families wrap it in a second ZIP inside the outer one; those are picked by
//! [`ExtractionStrategy::for_archive`] from the archive's file name alone, and
//! the nested path never touches the direct one.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use zip::ZipArchive;

use crate::config::ExtractConfig;
use crate::error::{Result, StigError};

static NESTED_ARCHIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.zip$").expect("nested archive pattern is valid"));

/// How the checklist document is laid out inside an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// The document is an entry of the archive itself
    Direct,
    /// The document is inside a ZIP entry of the archive
    Nested,
}

impl ExtractionStrategy {
    /// Select the strategy from the archive's file name.
    pub fn for_archive(archive: &Path, nested_families: &[String]) -> Self {
        let name = archive
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if nested_families
            .iter()
            .any(|family| name.contains(&family.to_lowercase()))
        {
            ExtractionStrategy::Nested
        } else {
            ExtractionStrategy::Direct
        }
    }
}

pub struct Extractor {
    document_pattern: Regex,
    nested_families: Vec<String>,
}

impl Extractor {
    pub fn new(config: &ExtractConfig) -> Result<Self> {
        let document_pattern = Regex::new(&config.document_pattern).map_err(|e| {
            StigError::Config(format!(
                "invalid document pattern '{}': {}",
                config.document_pattern, e
            ))
        })?;

        Ok(Self {
            document_pattern,
            nested_families: config.nested_archive_families.clone(),
        })
    }

    pub fn strategy(&self, archive: &Path) -> ExtractionStrategy {
        ExtractionStrategy::for_archive(archive, &self.nested_families)
    }

    /// Extract the checklist document from `archive` into `target`.
    ///
    /// On failure no file is left at `target`, and for nested archives the
    /// intermediate archive is always removed.
    pub async fn extract(&self, archive: &Path, target: &Path) -> Result<PathBuf> {
        let strategy = self.strategy(archive);
        debug!(archive = %archive.display(), ?strategy, "extracting checklist document");

        let pattern = self.document_pattern.clone();
        let archive = archive.to_path_buf();
        let target_path = target.to_path_buf();

        tokio::task::spawn_blocking(move || match strategy {
            ExtractionStrategy::Direct => extract_matching(&archive, &pattern, &target_path),
            ExtractionStrategy::Nested => extract_nested(&archive, &pattern, &target_path),
        })
        .await??;

        Ok(target.to_path_buf())
    }
}

fn extract_nested(archive: &Path, pattern: &Regex, target: &Path) -> Result<()> {
    let intermediate = target.with_extension("nested.zip");
    let outcome = extract_matching(archive, &NESTED_ARCHIVE_RE, &intermediate)
        .and_then(|()| extract_matching(&intermediate, pattern, target));

    if intermediate.exists() {
        let _ = fs::remove_file(&intermediate);
    }
    outcome
}

/// Stream the first file entry whose name matches `pattern` into `target`.
fn extract_matching(archive: &Path, pattern: &Regex, target: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| archive_error(archive, e))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| archive_error(archive, e))?;
        if entry.is_dir() || !pattern.is_match(entry.name()) {
            continue;
        }

        debug!(entry = entry.name(), target = %target.display(), "streaming archive entry");
        return match write_entry(&mut entry, target) {
            Ok(bytes) => {
                debug!(bytes, "archive entry written");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(target);
                Err(e.into())
            }
        };
    }

    Err(StigError::ExtractionNotFound {
        archive: archive.to_path_buf(),
        pattern: pattern.as_str().to_string(),
    })
}

fn write_entry(entry: &mut impl Read, target: &Path) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut output = File::create(target)?;
    let bytes = io::copy(entry, &mut output)?;
    output.flush()?;
    Ok(bytes)
}

fn archive_error(archive: &Path, error: zip::result::ZipError) -> StigError {
    StigError::Archive {
        archive: archive.to_path_buf(),
        details: error.to_string(),
    }
}

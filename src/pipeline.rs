//! End-to-end ingestion: fetch → extract → sanitize → parse → normalize → store
//!
//! One run handles one catalog entry and is all-or-nothing: either the
//! benchmark and every rule reach the store, or nothing does. Each run works
//! in its own uuid-named scratch file, which is removed whatever the outcome.
//! [`Pipeline::ingest_all`] runs entries concurrently and collects per-entry
//! failures instead of stopping at the first one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, ConfigError};
use crate::error::{Result, StigError};
use crate::extractor::Extractor;
use crate::fetcher::ArchiveFetcher;
use crate::normalizer::{NormalizedBenchmark, normalize_document};
use crate::parser::parse;
use crate::sanitizer::sanitize;
use crate::store::Store;

/// One archive to ingest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub url: String,
    /// Human label used in logs and reports
    #[serde(default)]
    pub title: Option<String>,
}

impl CatalogEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }

    fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// List of archives, read from a TOML or JSON file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub benchmarks: Vec<CatalogEntry>,
}

impl Catalog {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        let catalog: Catalog = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(ConfigError::from)?,
            Some("json") => serde_json::from_str(&content).map_err(ConfigError::from)?,
            Some(ext) => return Err(ConfigError::UnsupportedFormat(ext.to_string()).into()),
            None => match toml::from_str(&content) {
                Ok(catalog) => catalog,
                Err(_) => serde_json::from_str(&content).map_err(ConfigError::from)?,
            },
        };

        debug!(path = %path.display(), entries = catalog.benchmarks.len(), "catalog loaded");
        Ok(catalog)
    }
}

/// Where archives come from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Make the archive for `url` available under `cache_dir` and return its path.
    async fn fetch_archive(&self, url: &str, cache_dir: &Path) -> Result<PathBuf>;
}

#[derive(Debug)]
pub struct IngestFailure {
    pub entry: CatalogEntry,
    pub error: StigError,
}

/// Outcome of a batch of ingestion runs
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Store ids of the ingested benchmarks, ascending
    pub ingested: Vec<u64>,
    /// Failed entries, in catalog order
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Pipeline {
    source: Arc<dyn ArchiveSource>,
    extractor: Extractor,
    store: Arc<Store>,
    cache_dir: PathBuf,
    work_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        extractor: Extractor,
        store: Arc<Store>,
        cache_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            extractor,
            store,
            cache_dir: cache_dir.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Pipeline that downloads over HTTP with the configured cache and scratch directories
    pub fn from_config(config: &Config, store: Arc<Store>) -> Result<Self> {
        Ok(Self::new(
            Arc::new(ArchiveFetcher::new(&config.network)?),
            Extractor::new(&config.extract)?,
            store,
            config.cache.directory.clone(),
            config.ingest.work_dir.clone(),
        ))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Ingest one archive and return the new benchmark id.
    pub async fn ingest(&self, entry: &CatalogEntry) -> Result<u64> {
        debug!(entry = entry.label(), "ingestion started");
        let archive = self.source.fetch_archive(&entry.url, &self.cache_dir).await?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let document = self.work_dir.join(format!("{}.xml", Uuid::new_v4()));
        let outcome = self.process(&archive, &document).await;

        if let Err(e) = tokio::fs::remove_file(&document).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %document.display(), error = %e, "failed to remove extracted document");
            }
        }

        let NormalizedBenchmark { benchmark, rules } = outcome?;
        let title = benchmark.title.clone();
        let rule_count = rules.len();
        let id = self.store.insert_ingested(benchmark, rules).await;

        info!(id, title = %title, rules = rule_count, "benchmark ingested");
        Ok(id)
    }

    async fn process(&self, archive: &Path, document: &Path) -> Result<NormalizedBenchmark> {
        self.extractor.extract(archive, document).await?;
        let raw = tokio::fs::read(document).await?;

        tokio::task::spawn_blocking(move || {
            let repaired = sanitize(&raw)?;
            let tree = parse(&repaired)?;
            normalize_document(&tree)
        })
        .await?
    }

    /// Ingest every entry with at most `concurrency` runs in flight.
    pub async fn ingest_all(&self, entries: &[CatalogEntry], concurrency: usize) -> IngestReport {
        let semaphore = &Semaphore::new(concurrency.max(1));
        let runs = entries.iter().map(|entry| async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| StigError::Task(format!("ingest permit: {}", e)))?;
            self.ingest(entry).await
        });
        let outcomes = join_all(runs).await;

        let mut report = IngestReport::default();
        for (entry, outcome) in entries.iter().zip(outcomes) {
            match outcome {
                Ok(id) => report.ingested.push(id),
                Err(error) => {
                    warn!(entry = entry.label(), error = %error, "ingestion failed");
                    report.failures.push(IngestFailure {
                        entry: entry.clone(),
                        error,
                    });
                }
            }
        }
        report.ingested.sort_unstable();

        info!(
            ingested = report.ingested.len(),
            failed = report.failures.len(),
            "ingestion finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Benchmark id="Sample">
  <status date="2019-07-26">accepted</status>
  <title>Sample Benchmark</title>
  <description>Sample &amp; test</description>
  <plain-text id="release-info">Release: 3 Benchmark Date: 26 Jul 2019</plain-text>
  <version>2</version>
  <Group id="V-100">
    <title>SRG-APP-000001</title>
    <Rule id="SV-100r1_rule" severity="high">
      <version>SAMPLE-00-000001</version>
      <title>Rule one</title>
      <description>&lt;VulnDiscussion&gt;First discussion&lt;/VulnDiscussion&gt;</description>
      <fixtext fixref="F-1">Fix it</fixtext>
      <check system="C-1"><check-content>Check it</check-content></check>
    </Rule>
  </Group>
</Benchmark>
"#;

    fn write_archive(dir: &Path, name: &str, document: &str) -> PathBuf {
        let path = dir.join(name);
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        writer
            .start_file("U_Sample_Manual-xccdf.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document.as_bytes()).unwrap();
        writer.finish().unwrap();
        path
    }

    fn pipeline(source: MockArchiveSource, temp_dir: &TempDir) -> Pipeline {
        Pipeline::new(
            Arc::new(source),
            Extractor::new(&ExtractConfig::default()).unwrap(),
            Arc::new(Store::in_memory(0)),
            temp_dir.path().join("cache"),
            temp_dir.path().join("work"),
        )
    }

    fn work_dir_is_empty(temp_dir: &TempDir) -> bool {
        std::fs::read_dir(temp_dir.path().join("work"))
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[tokio::test]
    async fn test_ingest_stores_benchmark_and_rules() {
        let temp_dir = TempDir::new().unwrap();
        let archive = write_archive(temp_dir.path(), "U_Sample_STIG.zip", DOCUMENT);

        let mut source = MockArchiveSource::new();
        source
            .expect_fetch_archive()
            .times(1)
            .returning(move |_, _| Ok(archive.clone()));

        let pipeline = pipeline(source, &temp_dir);
        let id = pipeline
            .ingest(&CatalogEntry::new("https://example.com/U_Sample_STIG.zip"))
            .await
            .unwrap();

        assert_eq!(id, 0);
        let benchmark = pipeline
            .store()
            .find_one_benchmark(|b| b.id == id)
            .await
            .unwrap();
        assert_eq!(benchmark.title, "Sample Benchmark");
        assert_eq!(benchmark.release, 3);
        assert_eq!(benchmark.version, 2);

        let rules = pipeline.store().find_rules(|r| r.benchmark_id == id).await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].description, "First discussion");
        assert!(work_dir_is_empty(&temp_dir));
    }

    #[tokio::test]
    async fn test_fetch_failure_stores_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = MockArchiveSource::new();
        source.expect_fetch_archive().returning(|url, _| {
            Err(StigError::Network {
                url: url.to_string(),
                details: "HTTP 404: Not Found".to_string(),
            })
        });

        let pipeline = pipeline(source, &temp_dir);
        let err = pipeline
            .ingest(&CatalogEntry::new("https://example.com/missing.zip"))
            .await
            .unwrap_err();

        assert!(matches!(err, StigError::Network { .. }));
        assert!(pipeline.store().find_benchmarks(|_| true).await.is_empty());
    }

    #[tokio::test]
    async fn test_normalization_failure_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let broken = DOCUMENT.replace("severity=\"high\"", "severity=\"critical\"");
        let archive = write_archive(temp_dir.path(), "U_Broken_STIG.zip", &broken);

        let mut source = MockArchiveSource::new();
        source
            .expect_fetch_archive()
            .returning(move |_, _| Ok(archive.clone()));

        let pipeline = pipeline(source, &temp_dir);
        let err = pipeline
            .ingest(&CatalogEntry::new("https://example.com/U_Broken_STIG.zip"))
            .await
            .unwrap_err();

        assert!(matches!(err, StigError::Normalization { .. }));
        assert!(pipeline.store().find_benchmarks(|_| true).await.is_empty());
        assert!(pipeline.store().find_rules(|_| true).await.is_empty());
        assert!(work_dir_is_empty(&temp_dir));
    }

    #[tokio::test]
    async fn test_unrepairable_document_stores_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let truncated = format!("{}<!-- cut off", &DOCUMENT[..DOCUMENT.find("<Group").unwrap()]);
        let archive = write_archive(temp_dir.path(), "U_Truncated_STIG.zip", &truncated);

        let mut source = MockArchiveSource::new();
        source
            .expect_fetch_archive()
            .returning(move |_, _| Ok(archive.clone()));

        let pipeline = pipeline(source, &temp_dir);
        let err = pipeline
            .ingest(&CatalogEntry::new("https://example.com/U_Truncated_STIG.zip"))
            .await
            .unwrap_err();

        assert!(matches!(err, StigError::Sanitize { .. }));
        assert!(pipeline.store().find_benchmarks(|_| true).await.is_empty());
        assert!(pipeline.store().find_rules(|_| true).await.is_empty());
        assert!(work_dir_is_empty(&temp_dir));
    }

    #[tokio::test]
    async fn test_ingest_all_isolates_failures() {
        let temp_dir = TempDir::new().unwrap();
        let good = write_archive(temp_dir.path(), "U_Good_STIG.zip", DOCUMENT);

        let mut source = MockArchiveSource::new();
        source.expect_fetch_archive().returning(move |url, _| {
            if url.ends_with("bad.zip") {
                Err(StigError::Network {
                    url: url.to_string(),
                    details: "connection reset".to_string(),
                })
            } else {
                Ok(good.clone())
            }
        });

        let entries = vec![
            CatalogEntry::new("https://example.com/one.zip"),
            CatalogEntry {
                url: "https://example.com/bad.zip".to_string(),
                title: Some("Bad".to_string()),
            },
            CatalogEntry::new("https://example.com/two.zip"),
        ];

        let pipeline = pipeline(source, &temp_dir);
        let report = pipeline.ingest_all(&entries, 2).await;

        assert!(!report.is_success());
        assert_eq!(report.ingested, vec![0, 1]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entry.title.as_deref(), Some("Bad"));
    }

    #[tokio::test]
    async fn test_catalog_load_toml_and_json() {
        let temp_dir = TempDir::new().unwrap();

        let toml_path = temp_dir.path().join("catalog.toml");
        std::fs::write(
            &toml_path,
            r#"
[[benchmarks]]
url = "https://example.com/U_A_STIG.zip"
title = "A"

[[benchmarks]]
url = "https://example.com/U_B_STIG.zip"
"#,
        )
        .unwrap();
        let catalog = Catalog::load(&toml_path).await.unwrap();
        assert_eq!(catalog.benchmarks.len(), 2);
        assert_eq!(catalog.benchmarks[0].title.as_deref(), Some("A"));
        assert_eq!(catalog.benchmarks[1].title, None);

        let json_path = temp_dir.path().join("catalog.json");
        std::fs::write(
            &json_path,
            r#"{"benchmarks": [{"url": "https://example.com/U_C_STIG.zip"}]}"#,
        )
        .unwrap();
        let catalog = Catalog::load(&json_path).await.unwrap();
        assert_eq!(catalog.benchmarks, vec![CatalogEntry::new("https://example.com/U_C_STIG.zip")]);

        let yaml_path = temp_dir.path().join("catalog.yaml");
        std::fs::write(&yaml_path, "benchmarks: []").unwrap();
        assert!(matches!(
            Catalog::load(&yaml_path).await,
            Err(StigError::Config(_))
        ));
    }
}

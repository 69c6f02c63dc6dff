//! # stig-ingest Library
//!
//! Ingests security benchmark (STIG) checklists shipped as ZIP archives,
//! normalizes their loosely structured XCCDF documents into stable records,
//! and answers lookup and severity-filter queries over the result.
//!
//! The pipeline runs fetch → extract → sanitize → parse → normalize → store;
//! [`QueryEngine`] reads the store.

pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod models;
pub mod normalizer;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod sanitizer;
pub mod store;

pub use cli::Cli;
pub use config::{Config, ConfigError, ConfigManager};
pub use error::{Result, RuleIdentity, StigError};
pub use extractor::{ExtractionStrategy, Extractor};
pub use fetcher::ArchiveFetcher;
pub use models::{Benchmark, NewBenchmark, NewRule, Rule, Severity};
pub use normalizer::{
    NormalizedBenchmark, extract_benchmark, extract_rule, normalize_document,
    normalize_line_breaks,
};
pub use output::Output;
pub use parser::{Occurrence, XmlNode, parse};
pub use pipeline::{ArchiveSource, Catalog, CatalogEntry, IngestFailure, IngestReport, Pipeline};
pub use query::{BenchmarkQuery, QueryEngine, RuleQuery};
pub use sanitizer::sanitize;
pub use store::Store;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::models::Severity;
use crate::query::{BenchmarkQuery, RuleQuery};

/// Ingest DISA STIG benchmarks and query their rules
#[derive(Parser, Debug, Clone)]
#[command(name = "stig")]
#[command(about = "Ingest security benchmark archives and query their rules")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'C', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Directory for downloaded archives
    #[arg(long = "cache-dir", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Store snapshot file
    #[arg(long = "store", global = true)]
    pub store: Option<PathBuf>,

    /// Download timeout in seconds
    #[arg(long = "timeout", global = true)]
    pub timeout: Option<u64>,

    /// Number of archives ingested at once
    #[arg(short = 'j', long = "concurrency", global = true)]
    pub concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Download and ingest every benchmark listed in a catalog
    Init {
        /// Catalog of archive URLs (TOML or JSON)
        #[arg(long = "catalog")]
        catalog: PathBuf,
    },

    /// List benchmarks, or the rules of one benchmark
    Ls {
        /// Benchmark index or title; lists all benchmarks when omitted
        benchmark: Option<String>,

        /// Rule categories to show
        #[arg(
            short = 'c',
            long = "cats",
            value_enum,
            value_delimiter = ',',
            action = clap::ArgAction::Append,
            default_value = "all"
        )]
        cats: Vec<Category>,

        /// Print JSON instead of a table
        #[arg(long = "json")]
        json: bool,
    },

    /// Show a single rule
    Rule {
        /// STIG (group) id, e.g. V-67957
        #[arg(long = "stig-id", conflicts_with = "rule_id", required_unless_present = "rule_id")]
        stig_id: Option<String>,

        /// Rule id, e.g. SV-82447r1_rule
        #[arg(long = "rule-id")]
        rule_id: Option<String>,

        /// Only look inside the benchmark with this index
        #[arg(long = "benchmark")]
        benchmark: Option<u64>,

        /// Print JSON instead of a detail view
        #[arg(long = "json")]
        json: bool,
    },
}

/// Severity filter accepted by `ls -c`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    High,
    Medium,
    Low,
    All,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// A numeric argument selects by index, anything else by title.
pub fn benchmark_query(selector: &str) -> BenchmarkQuery {
    match selector.trim().parse::<u64>() {
        Ok(index) => BenchmarkQuery::by_index(index),
        Err(_) => BenchmarkQuery::by_title(selector),
    }
}

/// Severities named by `-c`; `all` expands to every severity.
pub fn severities(cats: &[Category]) -> Vec<Severity> {
    if cats.is_empty() || cats.contains(&Category::All) {
        return Severity::ALL.to_vec();
    }

    Severity::ALL
        .into_iter()
        .filter(|severity| {
            cats.contains(&match severity {
                Severity::High => Category::High,
                Severity::Medium => Category::Medium,
                Severity::Low => Category::Low,
            })
        })
        .collect()
}

pub fn rule_query(
    stig_id: Option<String>,
    rule_id: Option<String>,
    benchmark: Option<u64>,
) -> RuleQuery {
    RuleQuery {
        stig_id,
        rule_id,
        benchmark_index: benchmark,
    }
}

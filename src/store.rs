//! Append-only record store
//!
//! Benchmarks and rules live in a single arena behind one async `RwLock`; the
//! id sequence sits inside the lock, so ids stay unique and contiguous however
//! many ingestion runs insert at once. Records are never updated or removed.
//!
//! A store may be backed by a JSON snapshot (`open`/`save`); the snapshot is
//! replaced atomically by writing a temporary file and renaming it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StigError};
use crate::models::{Benchmark, NewBenchmark, NewRule, Rule};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Arena {
    origin: u64,
    next_id: u64,
    benchmarks: Vec<Benchmark>,
    rules: Vec<Rule>,
}

impl Arena {
    fn empty(origin: u64) -> Self {
        Self {
            origin,
            next_id: origin,
            ..Self::default()
        }
    }

    fn push_benchmark(&mut self, new: NewBenchmark) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.benchmarks.push(Benchmark::from_new(id, new));
        id
    }

    fn push_rules(&mut self, benchmark_id: u64, rules: Vec<NewRule>) -> usize {
        let count = rules.len();
        self.rules
            .extend(rules.into_iter().map(|rule| Rule::from_new(benchmark_id, rule)));
        count
    }

    fn contains_benchmark(&self, id: u64) -> bool {
        self.benchmarks.iter().any(|benchmark| benchmark.id == id)
    }

    fn check(&self) -> Result<()> {
        for (offset, benchmark) in self.benchmarks.iter().enumerate() {
            if benchmark.id != self.origin + offset as u64 {
                return Err(StigError::Store(format!(
                    "benchmark id {} breaks the sequence starting at {}",
                    benchmark.id, self.origin
                )));
            }
        }
        if self.next_id != self.origin + self.benchmarks.len() as u64 {
            return Err(StigError::Store(format!(
                "next id {} does not follow the last benchmark",
                self.next_id
            )));
        }
        if let Some(orphan) = self
            .rules
            .iter()
            .find(|rule| !self.contains_benchmark(rule.benchmark_id))
        {
            return Err(StigError::Store(format!(
                "rule {} references missing benchmark {}",
                orphan.rule_id, orphan.benchmark_id
            )));
        }
        Ok(())
    }
}

pub struct Store {
    arena: RwLock<Arena>,
    path: Option<PathBuf>,
}

impl Store {
    /// Fresh store with no backing file; ids start at `origin`.
    pub fn in_memory(origin: u64) -> Self {
        Self {
            arena: RwLock::new(Arena::empty(origin)),
            path: None,
        }
    }

    /// Open the snapshot at `path`, or start an empty store there when the file
    /// does not exist yet. An existing snapshot keeps its own origin.
    pub async fn open(path: impl Into<PathBuf>, origin: u64) -> Result<Self> {
        let path = path.into();

        let arena = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read(&path).await?;
            let arena: Arena = serde_json::from_slice(&content).map_err(|e| {
                StigError::Store(format!("invalid snapshot {}: {}", path.display(), e))
            })?;
            arena.check()?;
            debug!(
                path = %path.display(),
                benchmarks = arena.benchmarks.len(),
                rules = arena.rules.len(),
                "loaded store snapshot"
            );
            arena
        } else {
            debug!(path = %path.display(), origin, "starting empty store");
            Arena::empty(origin)
        };

        Ok(Self {
            arena: RwLock::new(arena),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the snapshot. A store without a backing file has nothing to save.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = {
            let arena = self.arena.read().await;
            serde_json::to_vec_pretty(&*arena)
                .map_err(|e| StigError::Store(format!("failed to encode snapshot: {}", e)))?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&temp, &content).await?;
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        info!(path = %path.display(), bytes = content.len(), "store saved");
        Ok(())
    }

    pub async fn insert_benchmark(&self, new: NewBenchmark) -> u64 {
        self.arena.write().await.push_benchmark(new)
    }

    /// Attach rules to an existing benchmark. Either every rule is stored or,
    /// when the benchmark is unknown, none is.
    pub async fn insert_rules(&self, benchmark_id: u64, rules: Vec<NewRule>) -> Result<usize> {
        let mut arena = self.arena.write().await;
        if !arena.contains_benchmark(benchmark_id) {
            return Err(StigError::BenchmarkNotFound {
                selector: format!("id {}", benchmark_id),
            });
        }
        Ok(arena.push_rules(benchmark_id, rules))
    }

    /// Store a benchmark together with its rules in one critical section.
    pub async fn insert_ingested(&self, benchmark: NewBenchmark, rules: Vec<NewRule>) -> u64 {
        let mut arena = self.arena.write().await;
        let id = arena.push_benchmark(benchmark);
        arena.push_rules(id, rules);
        id
    }

    pub async fn find_benchmarks<P>(&self, predicate: P) -> Vec<Benchmark>
    where
        P: Fn(&Benchmark) -> bool,
    {
        let arena = self.arena.read().await;
        arena
            .benchmarks
            .iter()
            .filter(|benchmark| predicate(benchmark))
            .cloned()
            .collect()
    }

    pub async fn find_one_benchmark<P>(&self, predicate: P) -> Option<Benchmark>
    where
        P: Fn(&Benchmark) -> bool,
    {
        let arena = self.arena.read().await;
        arena
            .benchmarks
            .iter()
            .find(|benchmark| predicate(benchmark))
            .cloned()
    }

    pub async fn find_rules<P>(&self, predicate: P) -> Vec<Rule>
    where
        P: Fn(&Rule) -> bool,
    {
        let arena = self.arena.read().await;
        arena
            .rules
            .iter()
            .filter(|rule| predicate(rule))
            .cloned()
            .collect()
    }

    pub async fn find_one_rule<P>(&self, predicate: P) -> Option<Rule>
    where
        P: Fn(&Rule) -> bool,
    {
        let arena = self.arena.read().await;
        arena.rules.iter().find(|rule| predicate(rule)).cloned()
    }
}

//! Read-only lookups over the record store
//!
//! Every operation validates its selectors before touching the store. A
//! missing or conflicting selector is a [`StigError::QueryValidation`]; a valid
//! query without a match is `Ok(None)`.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, StigError};
use crate::models::{Benchmark, Rule, Severity};
use crate::store::Store;

/// Selects one benchmark, by title or by store index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BenchmarkQuery {
    pub title: Option<String>,
    pub index: Option<u64>,
}

impl BenchmarkQuery {
    pub fn by_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            index: None,
        }
    }

    pub fn by_index(index: u64) -> Self {
        Self {
            title: None,
            index: Some(index),
        }
    }

    fn selector(&self) -> Result<BenchmarkSelector<'_>> {
        let title = self.title.as_deref().filter(|title| !title.is_empty());
        match (title, self.index) {
            (Some(title), None) => Ok(BenchmarkSelector::Title(title)),
            (None, Some(index)) => Ok(BenchmarkSelector::Index(index)),
            (Some(_), Some(_)) => Err(StigError::QueryValidation(
                "title and index supplied, only one is allowed".to_string(),
            )),
            (None, None) => Err(StigError::QueryValidation(
                "either a benchmark title or index is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BenchmarkSelector<'a> {
    Title(&'a str),
    Index(u64),
}

impl BenchmarkSelector<'_> {
    fn matches(&self, benchmark: &Benchmark) -> bool {
        match self {
            BenchmarkSelector::Title(title) => benchmark.title == *title,
            BenchmarkSelector::Index(index) => benchmark.id == *index,
        }
    }
}

impl fmt::Display for BenchmarkSelector<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchmarkSelector::Title(title) => write!(f, "title '{}'", title),
            BenchmarkSelector::Index(index) => write!(f, "index {}", index),
        }
    }
}

/// Selects one rule by STIG id or rule id, optionally inside one benchmark
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleQuery {
    pub stig_id: Option<String>,
    pub rule_id: Option<String>,
    pub benchmark_index: Option<u64>,
}

impl RuleQuery {
    pub fn by_stig_id(stig_id: impl Into<String>) -> Self {
        Self {
            stig_id: Some(stig_id.into()),
            ..Self::default()
        }
    }

    pub fn by_rule_id(rule_id: impl Into<String>) -> Self {
        Self {
            rule_id: Some(rule_id.into()),
            ..Self::default()
        }
    }

    pub fn in_benchmark(mut self, index: u64) -> Self {
        self.benchmark_index = Some(index);
        self
    }

    fn validate(&self) -> Result<()> {
        let stig_id = self.stig_id.as_deref().is_some_and(|id| !id.is_empty());
        let rule_id = self.rule_id.as_deref().is_some_and(|id| !id.is_empty());
        match (stig_id, rule_id) {
            (true, false) | (false, true) => Ok(()),
            (true, true) => Err(StigError::QueryValidation(
                "stig id and rule id supplied, only one is allowed".to_string(),
            )),
            (false, false) => Err(StigError::QueryValidation(
                "either a stig id or a rule id is required".to_string(),
            )),
        }
    }

    fn matches(&self, rule: &Rule) -> bool {
        let id_matches = match (&self.stig_id, &self.rule_id) {
            (Some(stig_id), _) if !stig_id.is_empty() => rule.stig_id == *stig_id,
            (_, Some(rule_id)) => rule.rule_id == *rule_id,
            _ => false,
        };
        id_matches
            && self
                .benchmark_index
                .is_none_or(|index| rule.benchmark_id == index)
    }
}

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<Store>,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// All benchmarks in store order
    pub async fn list_benchmarks(&self) -> Vec<Benchmark> {
        self.store.find_benchmarks(|_| true).await
    }

    pub async fn get_benchmark(&self, query: &BenchmarkQuery) -> Result<Option<Benchmark>> {
        let selector = query.selector()?;
        debug!(%selector, "looking up benchmark");
        Ok(self
            .store
            .find_one_benchmark(|benchmark| selector.matches(benchmark))
            .await)
    }

    /// Rules of the selected benchmark in store order, optionally limited to
    /// the given severities.
    pub async fn list_rules(
        &self,
        query: &BenchmarkQuery,
        severities: Option<&[Severity]>,
    ) -> Result<Vec<Rule>> {
        let selector = query.selector()?;
        let benchmark = self
            .store
            .find_one_benchmark(|benchmark| selector.matches(benchmark))
            .await
            .ok_or_else(|| StigError::BenchmarkNotFound {
                selector: selector.to_string(),
            })?;

        debug!(benchmark_id = benchmark.id, ?severities, "listing rules");
        Ok(self
            .store
            .find_rules(|rule| {
                rule.benchmark_id == benchmark.id
                    && severities.is_none_or(|wanted| wanted.contains(&rule.severity))
            })
            .await)
    }

    pub async fn get_rule(&self, query: &RuleQuery) -> Result<Option<Rule>> {
        query.validate()?;
        Ok(self.store.find_one_rule(|rule| query.matches(rule)).await)
    }
}

//! Mapping of parsed XCCDF trees onto [`NewBenchmark`] and [`NewRule`] records
//!
//! Benchmark normalization is all-or-nothing: the first rule that cannot be
//! normalized aborts the whole benchmark, and the returned error names both
//! the benchmark and the rule.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Result, RuleIdentity, StigError};
use crate::models::{NewBenchmark, NewRule, Severity};
use crate::parser::{XmlNode, parse};
use crate::sanitizer::sanitize;

static RELEASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\D+(\d+)").expect("release pattern is valid"));

static LINE_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\n|\n|\r").expect("line break pattern is valid"));

const RELEASE_INFO_ID: &str = "release-info";
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d %b %Y", "%d %B %Y"];

/// A benchmark and its rules, ready to be stored together
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBenchmark {
    pub benchmark: NewBenchmark,
    pub rules: Vec<NewRule>,
}

/// Collapse every line break into a single space.
pub fn normalize_line_breaks(text: &str) -> String {
    LINE_BREAK_RE.replace_all(text, " ").into_owned()
}

/// Normalize a parsed checklist document rooted at a `Benchmark` element.
pub fn normalize_document(document: &XmlNode) -> Result<NormalizedBenchmark> {
    let root = document
        .first_child("Benchmark")
        .ok_or_else(|| StigError::Normalization {
            benchmark: "<unknown>".to_string(),
            rule: None,
            reason: "document has no Benchmark element".to_string(),
        })?;

    let benchmark = extract_benchmark(root)?;
    let rules = match root.child("Group") {
        Some(groups) => groups
            .iter()
            .map(|group| extract_rule(group).map_err(|e| e.in_benchmark(&benchmark.title)))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    debug!(title = %benchmark.title, rules = rules.len(), "normalized benchmark");
    Ok(NormalizedBenchmark { benchmark, rules })
}

/// Read benchmark metadata from the `Benchmark` element.
pub fn extract_benchmark(node: &XmlNode) -> Result<NewBenchmark> {
    let title = node.child_text("title").map(normalize_line_breaks);
    let label = title.clone().unwrap_or_else(|| "<untitled>".to_string());
    let fail = |reason: String| StigError::Normalization {
        benchmark: label.clone(),
        rule: None,
        reason,
    };

    let title = title.ok_or_else(|| fail("missing title".to_string()))?;

    let description = node.child_text("description").map(normalize_line_breaks);
    if description.is_none() {
        warn!(title = %title, "benchmark has no description");
    }

    let raw_version = node
        .child_text("version")
        .ok_or_else(|| fail("missing version".to_string()))?;
    let version = raw_version
        .trim()
        .parse::<i64>()
        .map_err(|_| fail(format!("version '{}' is not an integer", raw_version)))?;

    let raw_date = node
        .first_child("status")
        .and_then(|status| status.attribute("date"))
        .ok_or_else(|| fail("missing status date".to_string()))?;
    let date = parse_date(raw_date).ok_or_else(|| fail(format!("unparseable date '{}'", raw_date)))?;

    let statement = release_statement(node)
        .map(normalize_line_breaks)
        .ok_or_else(|| fail("missing release statement".to_string()))?;
    let release = parse_release(&statement)
        .ok_or_else(|| fail(format!("no release number in '{}'", statement)))?;

    Ok(NewBenchmark {
        title,
        description,
        version,
        release,
        date,
    })
}

/// Read one rule from a `Group` element.
///
/// The error leaves the benchmark title empty; [`normalize_document`] fills
/// it in.
pub fn extract_rule(group: &XmlNode) -> Result<NewRule> {
    let mut identity = RuleIdentity {
        stig_id: group.attribute("id").map(str::to_string),
        rule_id: None,
    };

    // Some documents repeat the Rule element inside one group; the first wins.
    let rule = group
        .first_child("Rule")
        .ok_or_else(|| rule_error(&identity, "group has no Rule element"))?;
    identity.rule_id = rule.attribute("id").map(str::to_string);

    let stig_id = identity
        .stig_id
        .clone()
        .ok_or_else(|| rule_error(&identity, "group has no id"))?;
    let rule_id = identity
        .rule_id
        .clone()
        .ok_or_else(|| rule_error(&identity, "rule has no id"))?;

    let severity = rule
        .attribute("severity")
        .ok_or_else(|| rule_error(&identity, "rule has no severity"))?
        .parse::<Severity>()
        .map_err(|reason| rule_error(&identity, &reason))?;

    let title = rule
        .child_text("title")
        .map(normalize_line_breaks)
        .ok_or_else(|| rule_error(&identity, "rule has no title"))?;

    let raw_description = rule
        .child_text("description")
        .ok_or_else(|| rule_error(&identity, "rule has no description"))?;
    let description =
        resolve_discussion(raw_description).map_err(|reason| rule_error(&identity, &reason))?;

    let fix_text = rule
        .child_text("fixtext")
        .map(normalize_line_breaks)
        .unwrap_or_default();
    let check_text = rule
        .first_child("check")
        .and_then(|check| check.child_text("check-content"))
        .map(normalize_line_breaks)
        .unwrap_or_default();

    Ok(NewRule {
        stig_id,
        rule_id,
        severity,
        version: rule.child_text("version").map(|v| v.trim().to_string()),
        title,
        description,
        fix_text,
        check_text,
    })
}

fn rule_error(identity: &RuleIdentity, reason: &str) -> StigError {
    StigError::Normalization {
        benchmark: String::new(),
        rule: Some(identity.clone()),
        reason: reason.to_string(),
    }
}

/// Shapes the embedded `VulnDiscussion` element takes across documents
#[derive(Debug, PartialEq)]
enum Discussion<'a> {
    DiagnosticDestination(&'a str),
    Text {
        text: &'a str,
        subject: Option<&'a str>,
    },
}

impl<'a> Discussion<'a> {
    fn classify(node: &'a XmlNode) -> Option<Self> {
        if let Some(destination) = node.child_text("DIAGNOSTIC_DEST") {
            return Some(Discussion::DiagnosticDestination(destination));
        }
        node.text().map(|text| Discussion::Text {
            text,
            subject: node.child_text("Subject"),
        })
    }

    fn render(&self) -> String {
        match self {
            Discussion::DiagnosticDestination(destination) => destination.to_string(),
            Discussion::Text { text, subject } => format!("{}{}", text, subject.unwrap_or("")),
        }
    }
}

/// Repair the decoded description blob and pick its discussion text.
fn resolve_discussion(raw: &str) -> std::result::Result<String, String> {
    let repaired = sanitize(raw.as_bytes())
        .map_err(|e| format!("description cannot be repaired: {}", e))?;
    let embedded = parse(&repaired).map_err(|e| format!("description is not a document: {}", e))?;
    let discussion = embedded
        .first_child("VulnDiscussion")
        .ok_or_else(|| "description has no VulnDiscussion element".to_string())?;

    Discussion::classify(discussion)
        .map(|d| normalize_line_breaks(&d.render()))
        .ok_or_else(|| "VulnDiscussion has neither DIAGNOSTIC_DEST nor text".to_string())
}

fn release_statement(node: &XmlNode) -> Option<&str> {
    let statements = node.child("plain-text")?;
    statements
        .iter()
        .find(|statement| statement.attribute("id") == Some(RELEASE_INFO_ID))
        .unwrap_or_else(|| statements.first())
        .text()
}

fn parse_release(statement: &str) -> Option<i64> {
    RELEASE_RE
        .captures(statement)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

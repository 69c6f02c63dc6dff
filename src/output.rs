//! Rendering of query results
//!
//! Tables are borderless so they stay easy to process from shell scripts;
//! JSON output wraps the records as `{"data": ...}`.

use serde::Serialize;

use crate::error::{Result, StigError};
use crate::models::{Benchmark, Rule, Severity};
use crate::pipeline::IngestReport;

const TITLE_WIDTH: usize = 55;
const COLUMN_GAP: &str = "  ";

/// Output formatter for human-readable and JSON results
pub struct Output {
    show_colors: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    pub fn new() -> Self {
        Self {
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_colors(show_colors: bool) -> Self {
        Self { show_colors }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_benchmarks(&self, benchmarks: &[Benchmark]) -> String {
        let rows = benchmarks
            .iter()
            .map(|benchmark| {
                vec![
                    benchmark.id.to_string(),
                    benchmark.title.clone(),
                    benchmark.version.to_string(),
                    benchmark.release.to_string(),
                    format_date(benchmark),
                ]
            })
            .collect::<Vec<_>>();

        self.format_table(&["ID", "Title", "Ver.", "Rel.", "Date"], 1, &rows)
    }

    pub fn format_rules(&self, rules: &[Rule]) -> String {
        let rows = rules
            .iter()
            .map(|rule| {
                vec![
                    rule.stig_id.clone(),
                    rule.rule_id.clone(),
                    rule.title.clone(),
                    self.format_severity(rule.severity),
                ]
            })
            .collect::<Vec<_>>();

        self.format_table(&["STIG ID", "Rule ID", "Title", "Severity"], 2, &rows)
    }

    pub fn format_rule(&self, rule: &Rule) -> String {
        let mut output = String::new();
        output.push_str(&self.colorize(&rule.title, "1"));
        output.push('\n');
        output.push_str(&format!(
            "{} {}\n",
            self.colorize("Severity:", "31"),
            self.format_severity(rule.severity)
        ));
        output.push_str(&format!("{} {}\n", self.colorize("STIG ID:", "31"), rule.stig_id));
        output.push_str(&format!("{} {}\n", self.colorize("Rule ID:", "31"), rule.rule_id));
        if let Some(version) = &rule.version {
            output.push_str(&format!("{} {}\n", self.colorize("Version:", "31"), version));
        }

        for (heading, body) in [
            ("Description", &rule.description),
            ("Fix", &rule.fix_text),
            ("Check", &rule.check_text),
        ] {
            if body.is_empty() {
                continue;
            }
            output.push('\n');
            output.push_str(&self.colorize(heading, "31"));
            output.push('\n');
            for line in wrap(body, 80) {
                output.push_str(&line);
                output.push('\n');
            }
        }

        output
    }

    pub fn format_report(&self, report: &IngestReport) -> String {
        let mut output = format!(
            "{} {}\n",
            self.colorize("Ingested:", "32"),
            report.ingested.len()
        );
        if !report.failures.is_empty() {
            output.push_str(&format!(
                "{} {}\n",
                self.colorize("Failed:", "31"),
                report.failures.len()
            ));
            for failure in &report.failures {
                output.push_str(&format!("  {} - {}\n", failure.entry.url, failure.error));
            }
        }
        output
    }

    fn format_severity(&self, severity: Severity) -> String {
        match severity {
            Severity::High => self.colorize(severity.as_str(), "31"),
            Severity::Medium => self.colorize(severity.as_str(), "33"),
            Severity::Low => self.colorize(severity.as_str(), "36"),
        }
    }

    /// Lay out rows under a red header, wrapping the column at `wrap_column`.
    fn format_table(&self, header: &[&str], wrap_column: usize, rows: &[Vec<String>]) -> String {
        let wrapped: Vec<Vec<Vec<String>>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(column, cell)| {
                        if column == wrap_column {
                            wrap(cell, TITLE_WIDTH)
                        } else {
                            vec![cell.clone()]
                        }
                    })
                    .collect()
            })
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|title| title.chars().count()).collect();
        for row in &wrapped {
            for (column, lines) in row.iter().enumerate() {
                for line in lines {
                    widths[column] = widths[column].max(visible_width(line));
                }
            }
        }

        let mut output = String::new();
        let header_cells: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(column, title)| self.colorize(&pad(title, widths[column]), "31"))
            .collect();
        output.push_str(header_cells.join(COLUMN_GAP).trim_end());
        output.push('\n');

        for row in &wrapped {
            let height = row.iter().map(Vec::len).max().unwrap_or(1);
            for line_index in 0..height {
                let cells: Vec<String> = row
                    .iter()
                    .enumerate()
                    .map(|(column, lines)| {
                        let line = lines.get(line_index).map(String::as_str).unwrap_or("");
                        pad(line, widths[column])
                    })
                    .collect();
                output.push_str(cells.join(COLUMN_GAP).trim_end());
                output.push('\n');
            }
        }

        output
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: ?Sized> {
    data: &'a T,
}

/// Serialize records as `{"data": ...}`
pub fn format_json<T: Serialize + ?Sized>(data: &T) -> Result<String> {
    serde_json::to_string_pretty(&Envelope { data })
        .map_err(StigError::Render)
}

fn format_date(benchmark: &Benchmark) -> String {
    benchmark.date.format("%b %-d, %Y").to_string()
}

fn pad(text: &str, width: usize) -> String {
    let padding = width.saturating_sub(visible_width(text));
    format!("{}{}", text, " ".repeat(padding))
}

/// Character count ignoring ANSI color sequences
fn visible_width(text: &str) -> usize {
    let mut width = 0;
    let mut in_escape = false;
    for c in text.chars() {
        match (in_escape, c) {
            (false, '\x1b') => in_escape = true,
            (true, 'm') => in_escape = false,
            (true, _) => {}
            (false, _) => width += 1,
        }
    }
    width
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

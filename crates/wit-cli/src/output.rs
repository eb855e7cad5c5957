//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;
use serde_json::Value;

use wit_core::catalog::Iteration;
use wit_core::field::{markup_content, system};
use wit_core::store::{IterationCounts, Revision};
use wit_core::{WorkItem, WorkItemType};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a single work item with all its fields
    pub fn print_item(&self, item: &WorkItem) {
        match self.format {
            OutputFormat::Human => {
                println!("#{} {}", item.number, item.title().unwrap_or("(untitled)"));
                println!("ID:      {}", item.id);
                println!("Type:    {}", item.type_id);
                println!("Version: {}", item.version);
                for (name, value) in &item.fields {
                    if name == system::TITLE {
                        continue;
                    }
                    println!("  {:<22} {}", name, render_value(name, value));
                }
            }
            OutputFormat::Json => print_json(item),
            OutputFormat::Quiet => println!("{}", item.id),
        }
    }

    /// Print a page of work items with the total number of matches
    pub fn print_items(&self, items: &[WorkItem], total: usize) {
        match self.format {
            OutputFormat::Human => {
                if items.is_empty() {
                    println!("No work items found.");
                    return;
                }
                for item in items {
                    let state = item
                        .field(system::STATE)
                        .and_then(Value::as_str)
                        .unwrap_or("-");
                    println!(
                        "{:>5} | {:<12} | {}",
                        item.number,
                        truncate(state, 12),
                        truncate(item.title().unwrap_or("(untitled)"), 60)
                    );
                }
                println!("\n{} of {} work item(s)", items.len(), total);
            }
            OutputFormat::Json => {
                print_json(&serde_json::json!({ "items": items, "total": total }));
            }
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.number);
                }
            }
        }
    }

    pub fn print_count(&self, count: usize) {
        match self.format {
            OutputFormat::Json => print_json(&serde_json::json!({ "count": count })),
            _ => println!("{}", count),
        }
    }

    /// Print the revision history of an item, oldest first
    pub fn print_revisions(&self, revisions: &[Revision]) {
        match self.format {
            OutputFormat::Human => {
                for revision in revisions {
                    println!(
                        "{} | v{:<3} | {:<6} | {}",
                        revision.time.format("%Y-%m-%d %H:%M:%S"),
                        revision.work_item_version,
                        revision.revision_type,
                        revision.modifier_id
                    );
                }
                println!("\n{} revision(s)", revisions.len());
            }
            OutputFormat::Json => print_json(&revisions),
            OutputFormat::Quiet => {
                for revision in revisions {
                    println!("{}", revision.id);
                }
            }
        }
    }

    /// Print iterations with their rollup counts
    pub fn print_iteration_counts(&self, rows: &[(Iteration, IterationCounts)]) {
        match self.format {
            OutputFormat::Human => {
                if rows.is_empty() {
                    println!("No iterations found.");
                    return;
                }
                for (iteration, counts) in rows {
                    let depth = iteration.node.path.matches('/').count().saturating_sub(1);
                    println!(
                        "{}{} | {} closed / {} total | {}",
                        "  ".repeat(depth),
                        iteration.node.name,
                        counts.closed,
                        counts.total,
                        iteration.id()
                    );
                }
            }
            OutputFormat::Json => {
                let json: Vec<_> = rows
                    .iter()
                    .map(|(iteration, counts)| {
                        serde_json::json!({
                            "id": iteration.id(),
                            "name": iteration.node.name,
                            "path": iteration.node.path,
                            "total": counts.total,
                            "closed": counts.closed,
                        })
                    })
                    .collect();
                print_json(&json);
            }
            OutputFormat::Quiet => {
                for (iteration, _) in rows {
                    println!("{}", iteration.id());
                }
            }
        }
    }

    /// Print work item types with their fields
    pub fn print_types(&self, types: &[WorkItemType]) {
        match self.format {
            OutputFormat::Human => {
                for wit in types {
                    let marker = if wit.can_construct { "" } else { " (abstract)" };
                    println!("{}{} | {}", wit.name, marker, wit.id);
                    for (name, definition) in &wit.fields {
                        println!(
                            "  {:<22} {:<20} {}",
                            name,
                            definition.field_type.describe(),
                            definition.label
                        );
                    }
                }
            }
            OutputFormat::Json => print_json(&types),
            OutputFormat::Quiet => {
                for wit in types {
                    println!("{}", wit.id);
                }
            }
        }
    }

    /// Print the id of something just created
    pub fn created(&self, what: &str, id: impl std::fmt::Display) {
        match self.format {
            OutputFormat::Human => println!("✓ Created {}: {}", what, id),
            OutputFormat::Json => {
                print_json(&serde_json::json!({ "status": "created", "kind": what, "id": id.to_string() }));
            }
            OutputFormat::Quiet => println!("{}", id),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// Render a field value on one line
fn render_value(name: &str, value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) if name == system::DESCRIPTION => truncate_line(&markup_content(value), 60),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ääääääääääää", 5), "ää...");
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value("system.title", &json!("x")), "x");
        assert_eq!(render_value("system.labels", &json!(["a", "b"])), "a, b");
        assert_eq!(
            render_value(
                system::DESCRIPTION,
                &json!({"content": "first\nsecond", "markup": "PlainText"})
            ),
            "first"
        );
        assert_eq!(render_value("estimate", &json!(3)), "3");
    }
}

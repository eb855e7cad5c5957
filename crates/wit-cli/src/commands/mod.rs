//! Command handlers

pub mod config;
pub mod item;
pub mod iteration;
pub mod setup;

use anyhow::{bail, Result};
use serde_json::Value;

use wit_core::{CancelToken, Database, Fields, WorkItemRepository};

use crate::output::Output;

/// What every command that touches the database needs
pub struct Session<'a> {
    pub db: &'a mut Database,
    pub repo: &'a WorkItemRepository,
    pub ctx: &'a CancelToken,
    pub output: &'a Output,
}

/// Parse `name=value` pairs into fields
///
/// A value that parses as JSON is used as is, anything else is taken as a
/// plain string.
pub fn parse_assignments(assignments: &[String]) -> Result<Fields> {
    let mut fields = Fields::new();
    for assignment in assignments {
        let Some((name, raw)) = assignment.split_once('=') else {
            bail!("Invalid field assignment '{}', expected NAME=VALUE", assignment);
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("Missing field name in '{}'", assignment);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        fields.insert(name.to_string(), value);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assignments() {
        let fields = parse_assignments(&[
            "system.title=Fix the login page".to_string(),
            "estimate=3".to_string(),
            "system.assignees=[\"a\"]".to_string(),
            "system.state=\"open\"".to_string(),
        ])
        .unwrap();

        assert_eq!(fields["system.title"], json!("Fix the login page"));
        assert_eq!(fields["estimate"], json!(3));
        assert_eq!(fields["system.assignees"], json!(["a"]));
        assert_eq!(fields["system.state"], json!("open"));
    }

    #[test]
    fn test_parse_assignments_rejects_malformed() {
        assert!(parse_assignments(&["system.title".to_string()]).is_err());
        assert!(parse_assignments(&["=x".to_string()]).is_err());
    }
}

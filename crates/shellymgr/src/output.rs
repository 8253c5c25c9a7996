// Output rendering: tables for humans, JSON/YAML for pipes.

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::cli::OutputFormat;

/// Render a list either as a table or as serialised rows.
pub fn render_list<T, R>(format: OutputFormat, items: &[T], row: impl Fn(&T) -> R) -> String
where
    T: Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                return "no results".dimmed().to_string();
            }
            let rows: Vec<R> = items.iter().map(row).collect();
            Table::new(rows).with(Style::sharp()).to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(items).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(items).unwrap_or_default(),
    }
}

/// Render a single value; tables fall back to YAML for detail views.
pub fn render_one<T: Serialize>(format: OutputFormat, value: &T) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).unwrap_or_default(),
        OutputFormat::Table | OutputFormat::Yaml => {
            serde_yaml::to_string(value).unwrap_or_default()
        }
    }
}

pub fn success(message: &str) -> String {
    format!("{} {message}", "✓".green())
}

pub fn failure(message: &str) -> String {
    format!("{} {message}", "✗".red())
}

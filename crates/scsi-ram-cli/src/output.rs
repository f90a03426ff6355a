//! Output formatting for CLI.

use clap::ValueEnum;
use serde::Serialize;

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output.
    Json,
    /// Space-separated values (for scripting).
    Raw,
}

/// A report that can be printed in every [`OutputFormat`].
pub trait Report: Serialize {
    /// `(label, value)` rows for table output.
    fn rows(&self) -> Vec<(&'static str, String)>;

    /// Print in the requested format.
    fn print(&self, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Table => {
                let rows = self.rows();
                let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
                for (label, value) in rows {
                    println!("{label:<width$}  {value}");
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(self)?),
            OutputFormat::Raw => {
                let values: Vec<String> = self.rows().into_iter().map(|(_, v)| v).collect();
                println!("{}", values.join(" "));
            }
        }
        Ok(())
    }
}

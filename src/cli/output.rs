//! Output formatting module for Stackform
//!
//! Human output is colored text on stdout with messages on stderr; the JSON
//! and YAML modes print one document per command for scripting.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};
use std::time::Instant;

use super::OutputFormat;

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// Output format
    format: OutputFormat,
    /// Verbosity level
    verbosity: u8,
    /// Start time for duration calculations
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, format: OutputFormat, verbosity: u8) -> Self {
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        colored::control::set_override(use_color);

        Self {
            use_color,
            format,
            verbosity,
            start_time: Instant::now(),
        }
    }

    /// Whether colors are enabled
    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Whether a structured format was requested
    pub fn is_structured(&self) -> bool {
        !matches!(self.format, OutputFormat::Human)
    }

    /// Print a serializable document in the selected structured format
    ///
    /// Does nothing in human mode; commands print their own text there.
    pub fn emit<T: Serialize>(&self, value: &T) -> Result<()> {
        match self.format {
            OutputFormat::Human => {}
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        }
        Ok(())
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        if self.is_structured() {
            return;
        }

        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("\n{}", line.bright_blue());
            println!("{}", format!("  {title}  ").bright_blue().bold());
            println!("{}\n", line.bright_blue());
        } else {
            println!("\n{line}");
            println!("  {title}  ");
            println!("{line}\n");
        }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.is_structured() {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{title}");
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print plain text (human mode only)
    pub fn plain(&self, message: &str) {
        if !self.is_structured() {
            println!("{message}");
        }
    }

    /// Print a success line
    pub fn success(&self, message: &str) {
        if self.is_structured() {
            return;
        }

        if self.use_color {
            println!("{} {}", "✓".green().bold(), message);
        } else {
            println!("OK: {message}");
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        self.message("error", "ERROR:", message, |s| s.red().bold().to_string());
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        self.message("warning", "WARNING:", message, |s| {
            s.yellow().bold().to_string()
        });
    }

    /// Print a hint message
    pub fn hint(&self, message: &str) {
        self.message("hint", "HINT:", message, |s| s.cyan().bold().to_string());
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity >= 1 {
            self.message("info", "INFO:", message, |s| s.blue().to_string());
        }
    }

    /// Print a debug message (requires higher verbosity)
    pub fn debug(&self, message: &str) {
        if self.verbosity >= 2 {
            self.message("debug", "DEBUG:", message, |s| s.magenta().to_string());
        }
    }

    fn message(&self, kind: &str, prefix: &str, message: &str, paint: impl Fn(&str) -> String) {
        if self.is_structured() {
            let line = serde_json::json!({ "type": kind, "message": message });
            eprintln!("{line}");
        } else if self.use_color {
            eprintln!("{} {}", paint(prefix), message);
        } else {
            eprintln!("{prefix} {message}");
        }
    }

    /// Print a list of items
    pub fn list(&self, title: &str, items: &[String]) {
        if self.is_structured() {
            return;
        }

        if self.use_color {
            println!("\n{}:", title.bright_white().bold());
        } else {
            println!("\n{title}:");
        }

        for item in items {
            if self.use_color {
                println!("  {} {}", "-".bright_black(), item);
            } else {
                println!("  - {item}");
            }
        }
    }

    /// Print a table
    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        if self.is_structured() {
            return;
        }

        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }

        let header_line = join_cells(headers.iter().copied(), &widths);
        if self.use_color {
            println!("{}", header_line.bright_white().bold());
        } else {
            println!("{header_line}");
        }

        let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        if self.use_color {
            println!("{}", sep.join("-+-").bright_black());
        } else {
            println!("{}", sep.join("-+-"));
        }

        for row in rows {
            println!("{}", join_cells(row.iter().map(String::as_str), &widths));
        }
    }

    /// Print the elapsed time since the formatter was created
    pub fn elapsed(&self, what: &str) {
        if self.is_structured() {
            return;
        }
        let secs = self.start_time.elapsed().as_secs_f64();
        if self.use_color {
            println!("\n{} {}", format!("{what} in").bright_black(), format!("{secs:.2}s").bright_black());
        } else {
            println!("\n{what} in {secs:.2}s");
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

fn join_cells<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, width)| format!("{cell:width$}"))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_modes() {
        assert!(!OutputFormatter::new(false, OutputFormat::Human, 0).is_structured());
        assert!(OutputFormatter::new(false, OutputFormat::Json, 0).is_structured());
        assert!(OutputFormatter::new(false, OutputFormat::Yaml, 0).is_structured());
    }

    #[test]
    fn test_join_cells_pads_to_width() {
        let line = join_cells(["a", "bb"].into_iter(), &[3, 2]);
        assert_eq!(line, "a   | bb");
    }

    #[test]
    fn test_color_disabled_when_requested() {
        let formatter = OutputFormatter::new(false, OutputFormat::Human, 0);
        assert!(!formatter.use_color());
    }
}

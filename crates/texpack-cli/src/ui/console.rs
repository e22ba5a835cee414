//! Console reporter.
//!
//! Section headers and results go to stdout, recovered errors to stderr in
//! red. Lines are written whole, so output from concurrently finishing
//! compressor runs never interleaves mid-line.

use std::io::Write;

use crossterm::style::{Color, Stylize};
use texpack_core::Reporter;

/// Status icons.
#[derive(Debug, Clone)]
pub struct Icons {
    pub success: &'static str,
    pub error: &'static str,
    pub warning: &'static str,
    pub info: &'static str,
}

impl Default for Icons {
    fn default() -> Self {
        Self {
            success: "✓",
            error: "✗",
            warning: "⚠",
            info: "ℹ",
        }
    }
}

/// Prints pipeline progress to the terminal.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter {
    icons: Icons,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One-line run summary.
pub fn summary_line(invocations: usize, issues: usize, elapsed_secs: f64) -> String {
    format!(
        "Processing time: {elapsed_secs:.1}s ({invocations} compressor run{}, {issues} issue{})",
        if invocations == 1 { "" } else { "s" },
        if issues == 1 { "" } else { "s" },
    )
}

fn print_line(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
}

fn eprint_line(line: &str) {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{line}");
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        print_line(&format!("{}", title.bold()));
    }

    fn info(&self, msg: &str) {
        print_line(&format!("  {} {msg}", self.icons.info.with(Color::DarkGrey)));
    }

    fn success(&self, msg: &str) {
        print_line(&format!("{} {}", self.icons.success.green(), msg.green()));
    }

    fn warning(&self, msg: &str) {
        eprint_line(&format!("{} {}", self.icons.warning.yellow(), msg.yellow()));
    }

    fn error(&self, msg: &str) {
        eprint_line(&format!("{} {}", self.icons.error.red(), msg.red()));
    }

    fn summary(&self, invocations: usize, issues: usize, elapsed_secs: f64) {
        println!();
        let line = summary_line(invocations, issues, elapsed_secs);
        if issues == 0 {
            self.success(&line);
        } else {
            self.warning(&line);
        }
    }
}

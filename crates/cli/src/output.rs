//! Output formatting utilities

use std::time::Duration;

use colored::Colorize;
use coverkube_lib::{Error, ProgressReporter, Step};

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a duration rounded to whole seconds, e.g. `3s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = (elapsed.as_millis() + 500) / 1000;
    if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Prints one line per workflow step
pub struct TerminalProgress;

impl ProgressReporter for TerminalProgress {
    fn step_started(&self, step: Step) {
        println!("  {}", format!("{}...", step.in_progress()).dimmed());
    }

    fn step_finished(&self, step: Step, elapsed: Duration) {
        print_success(&format!("{} [{}]", step.done(), format_elapsed(elapsed)));
    }

    fn step_failed(&self, step: Step, _error: &Error) {
        print_error(&format!("{} failed", step.in_progress()));
    }
}

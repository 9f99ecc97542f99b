//! Terminal output utilities

use console::style;

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a header
pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print a dimmed secondary line
pub fn dim(msg: &str) {
    println!("  {}", style(msg).dim());
}

/// Print one extension row: identifier, ledger version, flags
pub fn extension_row(identifier: &str, version: &str, flags: &[String]) {
    let state = if flags.is_empty() {
        style("enabled".to_string()).green()
    } else {
        style(flags.join(", ")).yellow()
    };
    let version = if version == "0" {
        style("-".to_string()).dim()
    } else {
        style(version.to_string())
    };
    println!("  {:<32} {:<10} {}", identifier, version, state);
}

/// Print a failed extension with its error
pub fn failure(identifier: &str, err: &dyn std::fmt::Display) {
    eprintln!("{} {}: {}", style("✗").red().bold(), style(identifier).bold(), err);
}

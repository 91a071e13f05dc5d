use bibscout_core::RunStats;
use owo_colors::OwoColorize;

/// Whether to colorize human-readable output.
#[derive(Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

pub fn print_file_header(color: ColorMode, name: &str) {
    if color.enabled() {
        println!("{} {}", "Processing:".bold().blue(), name.bold());
    } else {
        println!("Processing: {name}");
    }
}

pub fn print_note(color: ColorMode, message: &str) {
    if color.enabled() {
        println!("  {} {}", "✓".green(), message);
    } else {
        println!("  {message}");
    }
}

pub fn print_file_error(color: ColorMode, message: &str) {
    if color.enabled() {
        eprintln!("  {} {}", "error:".bold().red(), message);
    } else {
        eprintln!("  error: {message}");
    }
}

pub fn print_file_result(color: ColorMode, stats: &RunStats) {
    let line = format!(
        "{} resolved, {} unresolved, {} errors",
        stats.resolved, stats.unresolved, stats.errors
    );
    if color.enabled() {
        println!("  {}", line.dimmed());
    } else {
        println!("  {line}");
    }
}

pub fn print_summary(color: ColorMode, ok_files: usize, total_files: usize, totals: &RunStats) {
    println!();
    let headline = format!("Completed: {ok_files}/{total_files} files");
    let detail = format!(
        "{} resolved, {} unresolved, {} errors",
        totals.resolved, totals.unresolved, totals.errors
    );
    if color.enabled() {
        if ok_files == total_files {
            println!("{} ({})", headline.bold().green(), detail);
        } else {
            println!("{} ({})", headline.bold().yellow(), detail);
        }
    } else {
        println!("{headline} ({detail})");
    }
}

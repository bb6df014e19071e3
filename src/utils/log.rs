// src/utils/log.rs

//! Section-style log helpers on top of the `log` facade.
//!
//! The facade macros are re-exported, so `use crate::utils::log;` gives both
//! `log::info!(..)` and `log::header(..)`.

pub use ::log::{debug, error, info, warn};

const RULE_WIDTH: usize = 60;

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(RULE_WIDTH);
    ::log::info!("{}", border);
    ::log::info!("  {}", title);
    ::log::info!("{}", border);
}

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    ::log::info!("[STEP {}/{}] {}", step_num, total, message);
}

/// Log a separator line
pub fn separator() {
    ::log::info!("{}", "─".repeat(RULE_WIDTH));
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    ::log::info!("    {}", message);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    ::log::info!("[SUMMARY] {}", title);
    for line in summary_lines(items) {
        ::log::info!("    {}", line);
    }
}

/// Render summary lines without logging them.
pub fn summary_lines(items: &[(&str, String)]) -> Vec<String> {
    items
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect()
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Terminal color handling

use colored::Colorize;
use std::io::IsTerminal;

/// Whether output should be colored
///
/// `NO_COLOR` wins; otherwise color only when stdout is a terminal.
pub fn should_use_colors() -> bool {
    colors_wanted(std::env::var_os("NO_COLOR").is_some(), std::io::stdout().is_terminal())
}

fn colors_wanted(no_color: bool, is_terminal: bool) -> bool {
    !no_color && is_terminal
}

/// Apply [`should_use_colors`] to every `colored` string
pub fn configure_colors() {
    if !should_use_colors() {
        colored::control::set_override(false);
    }
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.chars().count().max(50)));
}

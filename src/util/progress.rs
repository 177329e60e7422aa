//! Progress indicators for sync runs.
//!
//! Bars are drawn only when stderr is an interactive terminal; otherwise a
//! hidden bar is returned so callers never branch on visibility.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, stderr};
use std::time::Duration;

/// Progress is shown only if stderr is an interactive terminal.
#[must_use]
pub fn should_show_progress() -> bool {
    stderr().is_terminal()
}

/// A per-repository bar; the length is set once targets are known.
#[must_use]
pub fn create_progress_bar(total: u64, message: &str, show: bool) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if !show {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return pb;
    }

    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// A spinner for the remote repository listing.
#[must_use]
pub fn create_spinner(message: &str, show: bool) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if !show {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return pb;
    }

    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_bar_counts() {
        let pb = create_progress_bar(3, "Syncing", false);
        pb.inc(2);
        assert_eq!(pb.position(), 2);
        pb.finish_and_clear();
    }

    #[test]
    fn test_hidden_spinner() {
        let spinner = create_spinner("Listing repositories", false);
        spinner.finish_and_clear();
        assert!(spinner.is_finished());
    }
}

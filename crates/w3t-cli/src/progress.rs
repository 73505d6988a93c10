//! Probe progress spinner.

use indicatif::{ProgressBar, ProgressStyle};
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

/// Whether the spinner can share stderr with the log output: only when logs
/// are at warn or quieter
#[must_use]
pub fn spinner_visible(json: bool, log_level: &str) -> bool {
    !json
        && LevelFilter::from_str(log_level)
            .is_ok_and(|level| level <= LevelFilter::WARN)
}

/// Spinner shown while a test suite is probing
pub struct ProbeProgress {
    bar: ProgressBar,
}

impl ProbeProgress {
    /// Create a spinner on stderr, or a hidden one when `visible` is false
    #[must_use]
    pub fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Show which suite is running
    pub fn start_suite(&self, name: &str) {
        self.bar.set_message(format!("Probing NAT {name} behavior"));
    }

    /// Remove the spinner
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

//! Progress bar and summary reporting for CLI transfers.

use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};

use crate::{FileStats, TransferEvents};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates a progress bar for a single transfer; the length is set on start.
pub fn make_progress_bar(name: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec} - {msg}",
        )
        .map_or_else(|_| ProgressStyle::default_bar(), |style| style.progress_chars("━━╌")),
    );
    bar.set_message(name.to_string());
    bar
}

/// Drives an indicatif bar from transfer events.
pub struct BarEvents {
    bar: ProgressBar,
}

impl BarEvents {
    pub const fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }
}

impl TransferEvents for BarEvents {
    fn on_start(&self, total: u64) {
        if total > 0 {
            self.bar.set_length(total);
        }
        self.bar.reset();
    }

    fn on_progress(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn on_error(&self, message: &str) {
        self.bar
            .abandon_with_message(format!("{}", console::style(message).red()));
    }

    fn on_cancel(&self) {
        self.bar
            .abandon_with_message(format!("{}", console::style("cancelled").yellow()));
    }

    fn on_complete(&self, _stats: &FileStats) {
        self.bar.finish_and_clear();
    }
}

/// Prints a summary of a finished transfer.
pub fn print_summary(action: &str, name: &str, stats: &FileStats) {
    println!("\n{SEPARATOR}");
    println!("{} {name}", console::style(action).green().bold());
    println!("{SEPARATOR}");
    println!("  Size:              {}", HumanBytes(stats.size));
    if stats.was_resumed() {
        println!("  Resumed from:      {}", HumanBytes(stats.resumed_from));
    }
    println!("  Transferred:       {}", HumanBytes(stats.transferred));
    println!("  Time:              {}", HumanDuration(stats.elapsed));
    println!("  Average speed:     {}/s", HumanBytes(stats.average_speed));
    println!("  Peak speed:        {}/s", HumanBytes(stats.peak_speed));
    println!("{SEPARATOR}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_follows_events() {
        let events = BarEvents::new(ProgressBar::hidden());
        events.on_start(100);
        events.on_progress(30);
        events.on_progress(20);
        assert_eq!(events.bar.length(), Some(100));
        assert_eq!(events.bar.position(), 50);

        events.on_complete(&FileStats::default());
        assert!(events.bar.is_finished());
    }

    #[test]
    fn cancel_abandons_bar() {
        let events = BarEvents::new(ProgressBar::hidden());
        events.on_start(10);
        events.on_cancel();
        assert!(events.bar.is_finished());
    }
}

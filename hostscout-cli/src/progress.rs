use colored::Colorize;
use hostscout::{Notice, ProgressSink, ProgressUpdate};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Terminal progress bar for a scan; hidden when stderr is not a terminal
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(total: usize, enabled: bool) -> Self {
        let target = if enabled {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total as u64), target);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:30.cyan/blue} {pos:>5}/{len:5} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        // Whole seconds keep the column from jittering
        Some(eta) => format!(
            "eta {}",
            humantime::format_duration(Duration::from_secs(eta.as_secs()))
        ),
        None => "eta -".to_string(),
    }
}

impl ProgressSink for BarProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.bar
            .set_position((update.completed + update.cancelled) as u64);
        self.bar.set_message(format!(
            "{}  {} running  {}",
            update.label,
            update.in_flight,
            format_eta(update.estimated_remaining)
        ));
    }

    fn on_notice(&self, notice: &Notice) {
        let line = match notice {
            Notice::Interrupted { .. } => format!(
                "{} (press Ctrl-C again to stop running units)",
                notice
            )
            .yellow(),
            Notice::Terminated { .. } => notice.to_string().red(),
        };
        if self.bar.is_hidden() {
            eprintln!("{}", line);
        } else {
            self.bar.println(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "eta -");
        assert_eq!(format_eta(Some(Duration::from_millis(61_500))), "eta 1m 1s");
    }
}

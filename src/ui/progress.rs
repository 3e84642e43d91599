use indicatif::{HumanDuration, ProgressBar};
use std::time::Duration;

/// Spinner shown while a run is in flight; hidden when stdout is not a terminal.
pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = if console::Term::stdout().is_term() {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish_and_clear(&self) {
        self.pb.finish_and_clear();
    }
}

pub fn human_duration(duration: Duration) -> String {
    HumanDuration(duration).to_string()
}

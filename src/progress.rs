use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how a long-running command is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinner on the terminal for long commands.
    Normal,
    /// No spinner: piped output or `--verbose`, where log lines go to stderr.
    Plain,
}

impl OutputMode {
    pub fn detect(verbose: bool, is_terminal: bool) -> Self {
        if verbose || !is_terminal {
            OutputMode::Plain
        } else {
            OutputMode::Normal
        }
    }

    /// Whether a command with or without a spinner label gets one drawn.
    /// Stderr tracing is silenced only then.
    pub fn draws_spinner(self, has_label: bool) -> bool {
        self == OutputMode::Normal && has_label
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Run `task` behind a spinner labelled `label`. The spinner is cleared when
/// the task finishes, whatever its result; the caller prints the outcome.
pub async fn with_spinner<F, T>(label: &str, mode: OutputMode, task: F) -> T
where
    F: Future<Output = T>,
{
    let bar = match mode {
        OutputMode::Normal => ProgressBar::new_spinner(),
        OutputMode::Plain => ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden()),
    };
    bar.set_style(spinner_style());
    bar.set_message(format!("{label}..."));
    bar.enable_steady_tick(Duration::from_millis(80));

    let result = task.await;

    bar.finish_and_clear();
    result
}

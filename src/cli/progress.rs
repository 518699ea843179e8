//! Progress rendering for background dispatch using indicatif.

use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::services::DispatchEvent;

const PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner:.green} {msg}";
const PROGRESS_CHARS: &str = "█▓▒░ ";

/// Progress bar for a batch of known size.
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
        pb.set_style(style.progress_chars(PROGRESS_CHARS));
    }
    pb
}

/// Spinner for work of unknown length.
pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
        pb.set_style(style);
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Render dispatch events until the sender side is dropped.
///
/// In JSON mode nothing is drawn; events are still drained so the
/// orchestrator never blocks on them.
pub fn render_events(
    mut rx: mpsc::UnboundedReceiver<DispatchEvent>,
    json_mode: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let multi = MultiProgress::new();
        if json_mode {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        let spinner = multi.add(create_spinner("starting"));
        let mut batch: Option<ProgressBar> = None;

        while let Some(event) = rx.recv().await {
            match event {
                DispatchEvent::Started { task_id, kind, attempt } => {
                    spinner.set_message(format!("{kind} {task_id} (attempt {attempt})"));
                }
                DispatchEvent::Retrying {
                    task_id,
                    attempt,
                    max_attempts,
                    ..
                } => {
                    spinner.set_message(format!("retrying {task_id} ({attempt}/{max_attempts})"));
                }
                DispatchEvent::Finished { task_id, state, attempts } => {
                    let line = format!("{task_id}: {} after {attempts} attempt(s)", state.as_str());
                    if !json_mode && multi.println(line).is_err() {
                        tracing::debug!("progress output closed");
                    }
                }
                DispatchEvent::Progress {
                    completed,
                    total,
                    failed,
                } => {
                    let pb = batch.get_or_insert_with(|| multi.add(create_progress_bar(total as u64)));
                    pb.set_length(total as u64);
                    pb.set_position(completed as u64);
                    pb.set_message(format!("failed: {failed}"));
                    if completed >= total {
                        pb.finish();
                        batch = None;
                    }
                }
                DispatchEvent::Discarded { .. } | DispatchEvent::Rejected { .. } => {}
            }
        }
        spinner.finish_and_clear();
    })
}

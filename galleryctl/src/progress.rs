use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use gallery_core::{format_duration, EncoderEvent, ProgressObserver};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// One terminal bar per file currently being encoded.
pub struct BarObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos:>3}% {prefix} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
    }
}

impl Default for BarObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarObserver {
    fn on_event(&self, relative_path: &str, event: &EncoderEvent) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        match event {
            EncoderEvent::Started { .. } => {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(Self::style());
                bar.set_prefix(relative_path.to_string());
                bar.enable_steady_tick(Duration::from_millis(200));
                bars.insert(relative_path.to_string(), bar);
            }
            EncoderEvent::Progress(progress) => {
                if let Some(bar) = bars.get(relative_path) {
                    if let Some(percent) = progress.percent {
                        bar.set_position(percent.clamp(0.0, 100.0).round() as u64);
                    }
                    bar.set_message(format!(
                        "frames {} at {}",
                        progress.frames, progress.timemark
                    ));
                }
            }
            EncoderEvent::Finished { elapsed } => {
                if let Some(bar) = bars.remove(relative_path) {
                    bar.set_position(100);
                    bar.finish_with_message(format!("done in {}", format_duration(*elapsed)));
                }
            }
            EncoderEvent::Failed { error } => {
                if let Some(bar) = bars.remove(relative_path) {
                    let first_line = error.lines().next().unwrap_or_default();
                    bar.abandon_with_message(format!("failed: {first_line}"));
                }
            }
        }
    }
}

use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::pipeline::{ConversionResult, EncoderEvent, Outcome};

/// Receives encoder events for one file while it is being transcoded.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, relative_path: &str, event: &EncoderEvent);
}

/// Default observer: encoder progress goes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, relative_path: &str, event: &EncoderEvent) {
        match event {
            EncoderEvent::Started { command } => {
                debug!(relative_path, command = %command, "encoder started")
            }
            EncoderEvent::Progress(progress) => debug!(
                relative_path,
                percent = progress.percent.unwrap_or_default(),
                frames = progress.frames,
                timemark = %progress.timemark,
                "encoding"
            ),
            EncoderEvent::Finished { elapsed } => info!(
                relative_path,
                elapsed = %format_duration(*elapsed),
                "encoder finished"
            ),
            EncoderEvent::Failed { error } => {
                debug!(relative_path, error = %error, "encoder failed")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub original_bytes: u64,
    pub converted_bytes: u64,
    pub saved_bytes: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub converted: usize,
    pub skipped_existing: usize,
    pub copied_verbatim: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.converted + self.skipped_existing + self.copied_verbatim + self.failed
    }
}

/// Results of one conversion run, in the order they were produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    results: Vec<ConversionResult>,
    elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<'a> {
    pub results: &'a [ConversionResult],
    pub totals: Totals,
    pub counts: OutcomeCounts,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: ConversionResult) {
        self.results.push(result);
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    pub fn results(&self) -> &[ConversionResult] {
        &self.results
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Sums over entries with a size delta, i.e. converted files.
    pub fn totals(&self) -> Totals {
        self.results
            .iter()
            .filter(|result| result.saved_bytes().is_some())
            .fold(Totals::default(), |mut totals, result| {
                let original = result.original_bytes.unwrap_or_default();
                let converted = result.converted_bytes.unwrap_or_default();
                totals.original_bytes += original;
                totals.converted_bytes += converted;
                totals.saved_bytes += original as i64 - converted as i64;
                totals
            })
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for result in &self.results {
            match result.outcome {
                Outcome::Converted => counts.converted += 1,
                Outcome::SkippedExisting => counts.skipped_existing += 1,
                Outcome::CopiedVerbatim => counts.copied_verbatim += 1,
                Outcome::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.results.iter().filter_map(|result| match &result.outcome {
            Outcome::Failed(error) => Some((result.relative_path.as_str(), error.as_str())),
            _ => None,
        })
    }

    pub fn summary(&self) -> RunSummary<'_> {
        RunSummary {
            results: &self.results,
            totals: self.totals(),
            counts: self.counts(),
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Conversion report:");
        for result in &self.results {
            let Some(saved) = result.saved_bytes() else {
                continue;
            };
            let _ = writeln!(
                out,
                "  {}: {} -> {} (saved {})",
                result.relative_path,
                format_size(result.original_bytes.unwrap_or_default() as i64),
                format_size(result.converted_bytes.unwrap_or_default() as i64),
                format_size(saved)
            );
        }

        let totals = self.totals();
        let counts = self.counts();
        let _ = writeln!(
            out,
            "Total: {} -> {} (saved {})",
            format_size(totals.original_bytes as i64),
            format_size(totals.converted_bytes as i64),
            format_size(totals.saved_bytes)
        );
        let _ = writeln!(
            out,
            "Files: {} converted, {} skipped, {} copied, {} failed",
            counts.converted, counts.skipped_existing, counts.copied_verbatim, counts.failed
        );
        if counts.failed > 0 {
            let _ = writeln!(out, "Failed:");
            for (path, error) in self.failures() {
                let _ = writeln!(out, "  {path}: {error}");
            }
        }
        let _ = write!(out, "Total time: {}", format_duration(self.elapsed));
        out
    }
}

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

/// Human readable byte count: plain bytes below 1 KB, two decimals above.
pub fn format_size(bytes: i64) -> String {
    let sign = if bytes < 0 { "-" } else { "" };
    let magnitude = bytes.unsigned_abs();
    let value = magnitude as f64;
    if value < KB {
        format!("{sign}{magnitude} B")
    } else if value < MB {
        format!("{sign}{:.2} KB", value / KB)
    } else if value < GB {
        format!("{sign}{:.2} MB", value / MB)
    } else {
        format!("{sign}{:.2} GB", value / GB)
    }
}

/// `1h 2m 3s`; runs shorter than a minute also show milliseconds.
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h ");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m ");
    }
    let _ = write!(out, "{seconds}s");
    if total_ms < 60_000 {
        let _ = write!(out, " {millis}ms");
    }
    out
}

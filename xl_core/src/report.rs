//! Batch summary and the consolidated exception report.

use std::time::Duration;

use serde::Serialize;

use crate::job::JobOutcome;

/// One per-item exception, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionRecord {
    pub code: String,
    pub message: String,
    pub item_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub canceled: usize,
    pub exceptions: Vec<ExceptionRecord>,
    /// Pre-flight adjustments, e.g. downscaling switched off.
    pub warnings: Vec<String>,
    pub duration_secs: f64,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Converted => self.converted += 1,
            JobOutcome::Skipped => self.skipped += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Canceled => self.canceled += 1,
        }
    }

    /// Items that reached `Completed`, failures included.
    pub fn processed(&self) -> usize {
        self.converted + self.skipped + self.failed
    }

    pub fn was_canceled(&self) -> bool {
        self.canceled > 0
    }

    pub fn success_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            100.0
        } else {
            (self.converted + self.skipped) as f64 / processed as f64 * 100.0
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0))
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs / 60) % 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

pub fn print_summary_report(report: &BatchReport) {
    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║              Conversion Summary                  ║");
    println!("╠══════════════════════════════════════════════════╣");
    println!("║  Files:          {:>10}                      ║", report.total);
    println!("║  Converted:      {:>10}                      ║", report.converted);
    println!("║  Skipped:        {:>10}                      ║", report.skipped);
    println!("║  Failed:         {:>10}                      ║", report.failed);
    if report.was_canceled() {
        println!("║  Canceled:       {:>10}                      ║", report.canceled);
    }
    println!("║  Success Rate:   {:>9.1}%                      ║", report.success_rate());
    println!("║  Total Time:     {:>10}                      ║", format_duration(report.duration()));
    println!("╚══════════════════════════════════════════════════╝");

    for warning in &report.warnings {
        println!("⚠️  {}", warning);
    }
    print_exception_report(report);
}

pub fn print_exception_report(report: &BatchReport) {
    if report.exceptions.is_empty() {
        return;
    }
    println!();
    println!("❌ Exceptions ({}):", report.exceptions.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for e in &report.exceptions {
        println!("   [{}] {} → {}", e.code, e.item_name, e.message);
    }
}

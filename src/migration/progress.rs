//! Overwritable progress line

use std::io::Write;
use std::time::Instant;

pub struct ProgressReporter {
    step: u64,
    started: Instant,
    show_eta: bool,
}

impl ProgressReporter {
    /// Report every `step` items; `0` only reports when forced
    pub fn new(step: u64) -> Self {
        Self {
            step,
            started: Instant::now(),
            show_eta: false,
        }
    }

    /// Append elapsed and estimated remaining seconds
    pub fn with_eta(mut self) -> Self {
        self.show_eta = true;
        self
    }

    pub fn should_report(&self, processed: u64, force: bool) -> bool {
        force || (self.step > 0 && processed % self.step == 0)
    }

    pub fn render(&self, processed: u64, total: u64, extra: &str) -> String {
        let percent = if total == 0 {
            100.0
        } else {
            processed as f64 * 100.0 / total as f64
        };

        let mut line = format!("{:.2}% ({}/{})", percent, processed, total);
        if !extra.is_empty() {
            line.push_str(" | ");
            line.push_str(extra);
        }

        if self.show_eta {
            let elapsed = self.started.elapsed().as_secs_f64();
            line.push_str(&format!(" | elapsed {:.0}s", elapsed));
            if processed > 0 && processed < total {
                let left = elapsed / processed as f64 * (total - processed) as f64;
                line.push_str(&format!(", ~{:.0}s left", left));
            }
        }

        line
    }

    pub fn report(&self, processed: u64, total: u64, extra: &str, force: bool) {
        if !self.should_report(processed, force) {
            return;
        }
        print!("\r\x1b[2K{}", self.render(processed, total, extra));
        let _ = std::io::stdout().flush();
    }

    /// End the progress line
    pub fn finish(&self) {
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_report_on_step() {
        let reporter = ProgressReporter::new(50);
        assert!(reporter.should_report(50, false));
        assert!(reporter.should_report(100, false));
        assert!(!reporter.should_report(51, false));
        assert!(reporter.should_report(51, true));

        let silent = ProgressReporter::new(0);
        assert!(!silent.should_report(10, false));
        assert!(silent.should_report(10, true));
    }

    #[test]
    fn test_render() {
        let reporter = ProgressReporter::new(1);
        assert_eq!(reporter.render(1, 3, ""), "33.33% (1/3)");
        assert_eq!(reporter.render(0, 0, "done"), "100.00% (0/0) | done");
    }

    #[test]
    fn test_render_with_eta() {
        let reporter = ProgressReporter::new(1).with_eta();
        let line = reporter.render(5, 10, "");
        assert!(line.starts_with("50.00% (5/10) | elapsed"));
        assert!(line.contains("left"));
        assert!(!reporter.render(10, 10, "").contains("left"));
    }
}

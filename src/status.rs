//! Scheduler status reporting.
//!
//! Every state transition, retry and error of the scheduler is reported as a
//! [`StatusEvent`] to a [`StatusSink`]. Sinks turn events into short
//! human-readable lines (console), JSON lines (for other programs) or keep
//! them for inspection (tests).
//!
//! # Example
//!
//! ```ignore
//! use pixelwarden::status::{ConsoleStatus, StatusEvent, StatusSink};
//!
//! let sink = ConsoleStatus::new();
//! sink.report(StatusEvent::Progress { placed: 10, remaining: 90, total: 100 });
//! ```

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use crate::coords::ChunkCoord;
use crate::scheduler::SchedulerState;

/// Events reported by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    /// The scheduler moved to a new state
    StateChanged { state: SchedulerState },
    /// Result of a collection pass
    Progress { placed: usize, remaining: usize, total: usize },
    /// Waiting for charges to replenish
    Waiting {
        #[serde(with = "millis")]
        duration: Duration,
        target: u32,
    },
    /// Time left in the current wait (incremental mode only)
    Countdown {
        #[serde(with = "millis")]
        remaining: Duration,
    },
    /// A batch was accepted
    Submitted { chunk: ChunkCoord, pixels: usize },
    /// A batch was rate limited and will be retried
    RateLimited {
        chunk: ChunkCoord,
        #[serde(with = "millis")]
        backoff: Duration,
    },
    /// The template is fully placed
    Completed,
    /// Protection check found no drift
    Intact,
    /// Protection check found pixels that no longer match
    Drift { remaining: usize, repairing: bool },
    /// A cycle failed
    Error {
        message: String,
        #[serde(with = "millis_opt")]
        retry_in: Option<Duration>,
    },
    /// The scheduler was stopped by the user
    Stopped,
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

mod millis_opt {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }
}

/// Receiver of scheduler status events.
pub trait StatusSink: Send + Sync {
    fn report(&self, event: StatusEvent);
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn report(&self, _event: StatusEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingStatus {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// States entered so far, in order.
    pub fn states(&self) -> Vec<SchedulerState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::StateChanged { state } => Some(state),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingStatus {
    fn report(&self, event: StatusEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Console status writer with optional colors.
pub struct ConsoleStatus {
    use_colors: bool,
    /// Also print per-second countdowns
    verbose: bool,
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ConsoleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleStatus")
            .field("use_colors", &self.use_colors)
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl ConsoleStatus {
    /// Create a console status writer on stderr.
    pub fn new() -> Self {
        Self { use_colors: true, verbose: false, output: Mutex::new(Box::new(std::io::stderr())) }
    }

    /// Create a console status writer on a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self { use_colors: false, verbose: false, output: Mutex::new(Box::new(output)) }
    }

    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn color(&self, text: &str, code: &str) -> String {
        if self.use_colors {
            format!("{}{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn writeln(&self, tag: &str, code: &str, message: &str) {
        let line = format!("{} {}", self.color(tag, code), message);
        if let Ok(mut output) = self.output.lock() {
            let _ = writeln!(output, "{}", line);
        }
    }
}

impl Default for ConsoleStatus {
    fn default() -> Self {
        Self::new()
    }
}

const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";

impl StatusSink for ConsoleStatus {
    fn report(&self, event: StatusEvent) {
        match event {
            StatusEvent::StateChanged { state } => {
                if self.verbose {
                    self.writeln("[state]", CYAN, &state.to_string());
                }
            }
            StatusEvent::Progress { placed, remaining, total } => {
                let percent = if total == 0 { 100.0 } else { placed as f64 * 100.0 / total as f64 };
                self.writeln(
                    "[progress]",
                    CYAN,
                    &format!("{}/{} placed ({:.1}%), {} remaining", placed, total, percent, remaining),
                );
            }
            StatusEvent::Waiting { duration, target } => {
                self.writeln(
                    "[wait]",
                    YELLOW,
                    &format!(
                        "waiting {} for {} charge{}",
                        format_duration(duration),
                        target,
                        if target == 1 { "" } else { "s" }
                    ),
                );
            }
            StatusEvent::Countdown { remaining } => {
                if self.verbose {
                    self.writeln("[wait]", YELLOW, &format!("{} left", format_duration(remaining)));
                }
            }
            StatusEvent::Submitted { chunk, pixels } => {
                self.writeln("[place]", GREEN, &format!("{} pixels in chunk {}", pixels, chunk));
            }
            StatusEvent::RateLimited { chunk, backoff } => {
                self.writeln(
                    "[place]",
                    YELLOW,
                    &format!(
                        "rate limited in chunk {}, retrying in {}",
                        chunk,
                        format_duration(backoff)
                    ),
                );
            }
            StatusEvent::Completed => self.writeln("[done]", GREEN, "template complete"),
            StatusEvent::Intact => self.writeln("[protect]", GREEN, "template intact"),
            StatusEvent::Drift { remaining, repairing } => {
                let action = if repairing { "repairing" } else { "no charges, still watching" };
                self.writeln(
                    "[protect]",
                    YELLOW,
                    &format!("{} pixels changed, {}", remaining, action),
                );
            }
            StatusEvent::Error { message, retry_in } => {
                let retry = match retry_in {
                    Some(d) => format!(" (retrying in {})", format_duration(d)),
                    None => String::new(),
                };
                self.writeln("[error]", RED, &format!("{}{}", message, retry));
            }
            StatusEvent::Stopped => self.writeln("[stop]", YELLOW, "stopped"),
        }
    }
}

/// Writes one JSON object per event.
pub struct JsonStatus {
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStatus").finish()
    }
}

impl JsonStatus {
    pub fn new() -> Self {
        Self { output: Mutex::new(Box::new(std::io::stdout())) }
    }

    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self { output: Mutex::new(Box::new(output)) }
    }
}

impl Default for JsonStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for JsonStatus {
    fn report(&self, event: StatusEvent) {
        let Ok(json) = serde_json::to_string(&event) else { return };
        if let Ok(mut output) = self.output.lock() {
            let _ = writeln!(output, "{}", json);
        }
    }
}

/// Format a duration as a short human-readable string.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis() as u64;
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let minutes = ms / 60_000;
        let seconds = (ms % 60_000) / 1000;
        format!("{}m {}s", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct TestWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn captured(buf: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8_lossy(&buf.lock().unwrap()).into_owned()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(15_000)), "15.0s");
        assert_eq!(format_duration(Duration::from_millis(135_000)), "2m 15s");
    }

    #[test]
    fn test_console_progress_line() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = ConsoleStatus::with_output(TestWriter(Arc::clone(&buf)));
        sink.report(StatusEvent::Progress { placed: 25, remaining: 75, total: 100 });

        let text = captured(&buf);
        assert!(text.contains("[progress]"));
        assert!(text.contains("25/100 placed (25.0%), 75 remaining"));
    }

    #[test]
    fn test_console_hides_countdown_unless_verbose() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = ConsoleStatus::with_output(TestWriter(Arc::clone(&buf)));
        sink.report(StatusEvent::Countdown { remaining: Duration::from_secs(3) });
        assert!(captured(&buf).is_empty());

        let sink = ConsoleStatus::with_output(TestWriter(Arc::clone(&buf))).with_verbose(true);
        sink.report(StatusEvent::Countdown { remaining: Duration::from_secs(3) });
        assert!(captured(&buf).contains("3.0s left"));
    }

    #[test]
    fn test_console_error_with_retry() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = ConsoleStatus::with_output(TestWriter(Arc::clone(&buf)));
        sink.report(StatusEvent::Error {
            message: "network error: reset".to_string(),
            retry_in: Some(Duration::from_secs(10)),
        });
        let text = captured(&buf);
        assert!(text.contains("[error]"));
        assert!(text.contains("retrying in 10.0s"));
    }

    #[test]
    fn test_json_status_lines() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = JsonStatus::with_output(TestWriter(Arc::clone(&buf)));
        sink.report(StatusEvent::Waiting { duration: Duration::from_millis(15_000), target: 3 });
        sink.report(StatusEvent::StateChanged { state: SchedulerState::Protecting });

        let text = captured(&buf);
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines[0]["event"], "waiting");
        assert_eq!(lines[0]["duration"], 15_000);
        assert_eq!(lines[1]["state"], "protecting");
    }

    #[test]
    fn test_recording_status_states() {
        let sink = RecordingStatus::new();
        sink.report(StatusEvent::StateChanged { state: SchedulerState::Running });
        sink.report(StatusEvent::Completed);
        sink.report(StatusEvent::StateChanged { state: SchedulerState::Idle });
        assert_eq!(sink.states(), vec![SchedulerState::Running, SchedulerState::Idle]);
        assert_eq!(sink.events().len(), 3);
    }
}

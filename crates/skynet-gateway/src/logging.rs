//! Bounded in-memory log ring buffer, exposed over JSON-RPC via `logs.get`.
//!
//! `tracing_subscriber::fmt` already writes formatted lines to stdout; this
//! layer additionally captures the same lines (sans ANSI) into a bounded
//! ring so a connected client can pull recent history without tailing a
//! file on disk.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const RING_CAPACITY: usize = 2000;

pub struct LogRing {
    lines: Mutex<VecDeque<String>>,
}

impl Default for LogRing {
    fn default() -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }
}

impl LogRing {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() >= RING_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Most recent `lines` log lines, oldest first. A negative or zero
    /// `lines` request is clamped to 0 by the caller before reaching here.
    pub fn tail(&self, lines: usize) -> Vec<String> {
        let buf = self.lines.lock().unwrap();
        let skip = buf.len().saturating_sub(lines);
        buf.iter().skip(skip).cloned().collect()
    }
}

struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

/// A `tracing_subscriber::Layer` that formats each event as `LEVEL target: message`
/// and appends it to a shared [`LogRing`].
pub struct RingLayer {
    ring: std::sync::Arc<LogRing>,
}

impl RingLayer {
    pub fn new(ring: std::sync::Arc<LogRing>) -> Self {
        Self { ring }
    }
}

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor { message: None };
        event.record(&mut visitor);
        let message = visitor.message.unwrap_or_default();
        let line = format!(
            "{} {} {}: {}",
            chrono::Utc::now().to_rfc3339(),
            event.metadata().level(),
            event.metadata().target(),
            message
        );
        self.ring.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_returns_most_recent_lines_in_order() {
        let ring = LogRing::default();
        for i in 0..5 {
            ring.push(format!("line {i}"));
        }
        assert_eq!(ring.tail(2), vec!["line 3", "line 4"]);
        assert_eq!(ring.tail(0), Vec::<String>::new());
        assert_eq!(ring.tail(100).len(), 5);
    }

    #[test]
    fn ring_drops_oldest_past_capacity() {
        let ring = LogRing::default();
        for i in 0..(RING_CAPACITY + 10) {
            ring.push(format!("line {i}"));
        }
        let tail = ring.tail(RING_CAPACITY);
        assert_eq!(tail.len(), RING_CAPACITY);
        assert_eq!(tail[0], "line 10");
    }
}

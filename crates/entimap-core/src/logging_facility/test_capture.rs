//! In-memory event capture for tests
//!
//! A [`tracing_subscriber::Layer`] that keeps every event with its fields
//! flattened to strings. Tests in one process share a single capture, so
//! assertions should filter by an operation name or entity type unique to
//! the test.

use entimap_core_types::schema::{FIELD_COMPONENT, FIELD_EVENT, FIELD_OP};
use entimap_core_types::Lifecycle;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// One recorded event
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level: Level,
    pub component: Option<String>,
    pub op: Option<String>,
    pub event: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Lifecycle phase, if this is a lifecycle event
    pub fn lifecycle(&self) -> Option<Lifecycle> {
        self.event.as_deref().and_then(Lifecycle::parse)
    }

    fn is(&self, op: &str, phase: Lifecycle) -> bool {
        self.op.as_deref() == Some(op) && self.lifecycle() == Some(phase)
    }
}

#[derive(Default)]
struct Fields(BTreeMap<String, String>);

impl Fields {
    fn put(&mut self, field: &Field, value: String) {
        self.0.insert(field.name().to_string(), value);
    }
}

impl Visit for Fields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.to_string());
    }
}

type Buffer = Arc<Mutex<Vec<CapturedEvent>>>;

struct CaptureLayer {
    buffer: Buffer,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        event.record(&mut fields);
        let fields = fields.0;

        let captured = CapturedEvent {
            level: *event.metadata().level(),
            component: fields.get(FIELD_COMPONENT).cloned(),
            op: fields.get(FIELD_OP).cloned(),
            event: fields.get(FIELD_EVENT).cloned(),
            fields,
        };
        if let Ok(mut events) = self.buffer.lock() {
            events.push(captured);
        }
    }
}

/// Handle onto the captured events
#[derive(Clone)]
pub struct TestCapture {
    buffer: Buffer,
}

impl TestCapture {
    /// Snapshot of everything captured so far
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.buffer.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_for_op(&self, op: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.op.as_deref() == Some(op))
            .collect()
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CapturedEvent) -> bool,
    {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    /// Number of `phase` events for `op`
    pub fn count_phase(&self, op: &str, phase: Lifecycle) -> usize {
        self.count_events(|e| e.is(op, phase))
    }

    /// # Panics
    ///
    /// If no `op` event with the given `event` value was captured.
    pub fn assert_event_exists(&self, op: &str, event: &str) {
        let events = self.events();
        let found = events
            .iter()
            .any(|e| e.op.as_deref() == Some(op) && e.event.as_deref() == Some(event));
        assert!(
            found,
            "Expected event op={} event={} among {} captured",
            op,
            event,
            events.len()
        );
    }

    /// Every `start` of `op` is closed by exactly one `end` or `end_error`
    ///
    /// # Panics
    ///
    /// If `op` was never started, or its starts and closes do not pair up.
    pub fn assert_balanced(&self, op: &str) {
        let starts = self.count_phase(op, Lifecycle::Start);
        let closes = self.count_events(|e| {
            e.op.as_deref() == Some(op) && e.lifecycle().is_some_and(Lifecycle::is_terminal)
        });
        assert!(starts > 0, "op={} was never started", op);
        assert_eq!(starts, closes, "op={} has {} starts and {} closes", op, starts, closes);
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.buffer.lock() {
            events.clear();
        }
    }
}

static CAPTURE: OnceLock<TestCapture> = OnceLock::new();

/// Process-wide capture, installed as the global subscriber on first use
///
/// If another subscriber already owns the process the capture stays empty.
///
/// ```
/// use entimap_core::logging_facility::test_capture::init_test_capture;
/// use entimap_core::log_op_start;
///
/// let capture = init_test_capture();
/// log_op_start!("doc_capture_op");
/// capture.assert_event_exists("doc_capture_op", "start");
/// ```
pub fn init_test_capture() -> TestCapture {
    CAPTURE
        .get_or_init(|| {
            let buffer = Buffer::default();
            let layer = CaptureLayer {
                buffer: Arc::clone(&buffer),
            };
            let _ = tracing_subscriber::registry().with(layer).try_init();
            TestCapture { buffer }
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(op: &str, phase: &str) -> CapturedEvent {
        CapturedEvent {
            level: Level::INFO,
            component: None,
            op: Some(op.to_string()),
            event: Some(phase.to_string()),
            fields: BTreeMap::from([("entity_type".to_string(), "product".to_string())]),
        }
    }

    #[test]
    fn test_lifecycle_of_captured_event() {
        let start = event("repository_read", "start");
        assert_eq!(start.lifecycle(), Some(Lifecycle::Start));
        assert!(start.is("repository_read", Lifecycle::Start));
        assert_eq!(start.field("entity_type"), Some("product"));
        assert_eq!(event("x", "progress").lifecycle(), None);
    }

    #[test]
    fn test_balanced_pairs() {
        let capture = TestCapture {
            buffer: Buffer::default(),
        };
        if let Ok(mut events) = capture.buffer.lock() {
            events.push(event("repository_delete", "start"));
            events.push(event("repository_delete", "end_error"));
        }
        capture.assert_balanced("repository_delete");
        assert_eq!(capture.count_phase("repository_delete", Lifecycle::EndError), 1);
    }
}

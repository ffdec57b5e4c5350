use crate::handler::QueueHandler;
use crate::level::Level;
use crate::record::LogRecord;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate are never fed back into the queue.
const INTERNAL_TARGET: &str = "tracing_log_queue";

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// writes them through a [`QueueHandler`].
///
/// The event target becomes the logger name, the `message` field the
/// template and every other field an extra field. Writing is a
/// non-blocking enqueue, so application threads never wait on a sink.
pub struct QueueLayer {
    handler: QueueHandler,
    min_level: Level,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
}

impl QueueLayer {
    pub fn new(handler: QueueHandler, min_level: Level) -> Self {
        QueueLayer { handler, min_level, total_events: Arc::new(AtomicU64::new(0)) }
    }
}

impl<S> Layer<S> for QueueLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        if meta.target().starts_with(INTERNAL_TARGET) {
            return;
        }
        let level = Level::from(*meta.level());
        if level < self.min_level {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let mut record = LogRecord::new(level, meta.target(), message.unwrap_or_default());
        record.module_path = meta.module_path().map(str::to_string);
        record.file = meta.file().map(str::to_string);
        record.line = meta.line();
        record.fields = fields;

        self.handler.write(record);
    }
}

/// Splits event fields into the `message` template and extra fields.
struct FieldVisitor<'a> {
    fields: &'a mut BTreeMap<String, serde_json::Value>,
    message: &'a mut Option<String>,
}

impl FieldVisitor<'_> {
    fn put(&mut self, field: &Field, value: impl Into<serde_json::Value>) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => *self.message = Some(value.to_string()),
            _ => self.put(field, value),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        match field.name() {
            "message" => *self.message = Some(text),
            _ => self.put(field, text),
        }
    }
}

use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub severity: Severity,
    pub record_id: Option<String>,
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            record_id: None,
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn for_record(mut self, record_id: &str) -> Self {
        self.record_id = Some(record_id.to_string());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

/// Reporting port handed to every pipeline component.
pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);

    fn info(&self, record_id: &str, message: String) {
        self.event(ProgressEvent::new(Severity::Info, message).for_record(record_id));
    }

    fn warn(&self, record_id: &str, message: String) {
        self.event(ProgressEvent::new(Severity::Warn, message).for_record(record_id));
    }

    fn error(&self, record_id: &str, message: String) {
        self.event(ProgressEvent::new(Severity::Error, message).for_record(record_id));
    }
}

/// Forwards events to `tracing` at their severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        let record = event.record_id.as_deref().unwrap_or("-");
        let elapsed_ms = event.elapsed.map(|elapsed| elapsed.as_millis() as u64);
        match event.severity {
            Severity::Debug => tracing::debug!(record, elapsed_ms, "{}", event.message),
            Severity::Info => tracing::info!(record, elapsed_ms, "{}", event.message),
            Severity::Warn => tracing::warn!(record, elapsed_ms, "{}", event.message),
            Severity::Error => tracing::error!(record, elapsed_ms, "{}", event.message),
        }
    }
}

/// Keeps every event in memory; used by tests and dry inspections.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn messages_at(&self, severity: Severity) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.severity == severity)
            .map(|event| event.message)
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

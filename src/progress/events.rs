use serde::{Deserialize, Serialize};

use crate::import_queue::QueueStatus;

/// Stage of an import inside the work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Downloading,
    PostProcessing,
    Finalizing,
}

/// Point-in-time progress of one queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub queue_item_id: i64,
    pub status: QueueStatus,
    /// 0.0 to 100.0
    pub percentage: f64,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ImportPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl ProgressEvent {
    pub fn new(queue_item_id: i64, status: QueueStatus) -> Self {
        Self {
            queue_item_id,
            status,
            percentage: 0.0,
            bytes_done: 0,
            bytes_total: None,
            phase: None,
            message: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = percentage.clamp(0.0, 100.0);
        self
    }

    /// Sets byte counters and derives the percentage when the total is known.
    pub fn with_bytes(mut self, done: u64, total: Option<u64>) -> Self {
        self.bytes_done = done;
        self.bytes_total = total;
        if let Some(total) = total.filter(|t| *t > 0) {
            self.percentage = (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
        }
        self
    }

    pub fn with_phase(mut self, phase: ImportPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Wire envelope for the event stream.
///
/// Serialized as `{"type": "initial", "data": [...]}` or
/// `{"type": "update", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ProgressEnvelope {
    Initial(Vec<ProgressEvent>),
    Update(ProgressEvent),
}

/// One frame of a subscriber stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Message(ProgressEnvelope),
    /// Sent when nothing was published for a heartbeat interval.
    Heartbeat,
}

impl StreamFrame {
    /// Render as a server-sent-events frame.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        match self {
            StreamFrame::Message(envelope) => {
                Ok(format!("data: {}\n\n", serde_json::to_string(envelope)?))
            }
            StreamFrame::Heartbeat => Ok(": heartbeat\n\n".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_format() {
        let event = ProgressEvent {
            timestamp: 1700000000000,
            ..ProgressEvent::new(7, QueueStatus::Processing)
        }
        .with_percentage(42.5)
        .with_phase(ImportPhase::Downloading);

        let json = serde_json::to_value(ProgressEnvelope::Update(event.clone())).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["data"]["queue_item_id"], 7);
        assert_eq!(json["data"]["status"], "processing");
        assert_eq!(json["data"]["phase"], "downloading");
        assert_eq!(json["data"]["percentage"], 42.5);
        assert!(json["data"].get("message").is_none());

        let json = serde_json::to_value(ProgressEnvelope::Initial(vec![event])).unwrap();
        assert_eq!(json["type"], "initial");
        assert!(json["data"].is_array());
    }

    #[test]
    fn test_with_bytes_derives_percentage() {
        let event = ProgressEvent::new(1, QueueStatus::Processing).with_bytes(250, Some(1000));
        assert_eq!(event.percentage, 25.0);

        let event = ProgressEvent::new(1, QueueStatus::Processing)
            .with_percentage(10.0)
            .with_bytes(250, None);
        assert_eq!(event.percentage, 10.0);
        assert_eq!(event.bytes_done, 250);
    }

    #[test]
    fn test_percentage_clamped() {
        let event = ProgressEvent::new(1, QueueStatus::Processing).with_percentage(150.0);
        assert_eq!(event.percentage, 100.0);
    }

    #[test]
    fn test_sse_frames() {
        assert_eq!(StreamFrame::Heartbeat.to_sse().unwrap(), ": heartbeat\n\n");

        let frame = StreamFrame::Message(ProgressEnvelope::Initial(vec![]));
        assert_eq!(
            frame.to_sse().unwrap(),
            "data: {\"type\":\"initial\",\"data\":[]}\n\n"
        );
    }
}

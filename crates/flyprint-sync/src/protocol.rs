//! # Realtime Protocol Messages
//!
//! Message types carried over the realtime channel.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Realtime Messages                                  │
//! │                                                                         │
//! │  INBOUND (cloud → edge)                                                │
//! │  ──────────────────────                                                │
//! │  CLOUD ───► print_job { data: { job_id, printer_name, file_url,        │
//! │                                 name, print_options } }                │
//! │  CLOUD ───► <anything else>        logged and dropped                  │
//! │                                                                         │
//! │  OUTBOUND (edge → cloud)                                               │
//! │  ───────────────────────                                               │
//! │  EDGE  ───► job_update { node_id, timestamp,                           │
//! │                          data: { job_id, status, progress,             │
//! │                                  error_message } }                     │
//! │  EDGE  ───► printer_status { node_id, timestamp,                       │
//! │                              data: { printer_id, status, queue_length, │
//! │                                      error_code, supplies } }          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! JSON objects with a top-level `type` field selecting the schema:
//! ```json
//! { "type": "job_update", "node_id": "...", "timestamp": "2026-01-01T00:00:00Z", "data": { ... } }
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use flyprint_core::{
    CloudPrinterStatus, DeviceStatusSnapshot, JobOutcome, JobResultStatus, PrintJob,
    ValidationError,
};

use crate::error::{SyncError, SyncResult};

/// Timestamp layout used on outbound messages.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current UTC time in [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// Every message the cloud can push to the edge node.
///
/// Dispatch matches on this enum exhaustively; a new message kind has to be
/// added here before anything can route it.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    PrintJob(PrintJobRequest),
    /// Well-formed message of a kind this node does not handle.
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

impl InboundMessage {
    /// Parses one text frame.
    pub fn from_json(text: &str) -> SyncResult<Self> {
        let raw: RawInbound = serde_json::from_str(text)
            .map_err(|e| SyncError::DeserializationFailed(e.to_string()))?;

        let kind = raw
            .kind
            .ok_or_else(|| SyncError::InvalidMessage("missing `type` field".into()))?;

        match kind.as_str() {
            "print_job" => {
                let request = if raw.data.is_null() {
                    PrintJobRequest::default()
                } else {
                    serde_json::from_value(raw.data)
                        .map_err(|e| SyncError::DeserializationFailed(e.to_string()))?
                };
                Ok(InboundMessage::PrintJob(request))
            }
            _ => Ok(InboundMessage::Unknown { kind }),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            InboundMessage::PrintJob(_) => "print_job",
            InboundMessage::Unknown { kind } => kind,
        }
    }
}

/// Payload of a `print_job` message. Every field may be missing on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintJobRequest {
    #[serde(default, deserialize_with = "string_or_number")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub printer_name: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default, alias = "job_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub print_options: Option<serde_json::Map<String, Value>>,
}

impl PrintJobRequest {
    /// Validates the request into a [`PrintJob`].
    ///
    /// Option values are stringified; nulls and empty strings are dropped.
    pub fn into_job(self) -> Result<PrintJob, ValidationError> {
        let options = self
            .print_options
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    Value::Null => return None,
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (!value.is_empty()).then_some((key, value))
            })
            .collect::<BTreeMap<_, _>>();

        PrintJob::from_request(self.job_id, self.printer_name, self.file_url, self.name, options)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// Messages the edge node pushes to the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    JobUpdate {
        node_id: String,
        timestamp: String,
        data: JobUpdate,
    },
    PrinterStatus {
        node_id: String,
        timestamp: String,
        data: PrinterStatusUpdate,
    },
}

/// Result of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: String,
    pub status: JobResultStatus,
    pub progress: u8,
    /// Serialized as `null` on success.
    pub error_message: Option<String>,
}

/// Changed status of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterStatusUpdate {
    pub printer_id: String,
    pub status: CloudPrinterStatus,
    pub queue_length: u32,
    pub error_code: Option<String>,
    #[serde(default)]
    pub supplies: serde_json::Map<String, Value>,
}

impl OutboundMessage {
    pub fn job_update(node_id: &str, job_id: &str, outcome: &JobOutcome) -> Self {
        OutboundMessage::JobUpdate {
            node_id: node_id.to_string(),
            timestamp: timestamp_now(),
            data: JobUpdate {
                job_id: job_id.to_string(),
                status: outcome.status(),
                progress: outcome.progress(),
                error_message: outcome.error_message().map(str::to_string),
            },
        }
    }

    pub fn printer_status(node_id: &str, snapshot: &DeviceStatusSnapshot) -> Self {
        OutboundMessage::PrinterStatus {
            node_id: node_id.to_string(),
            timestamp: timestamp_now(),
            data: PrinterStatusUpdate {
                printer_id: snapshot.device_name.clone(),
                status: snapshot.status,
                queue_length: snapshot.queue_length,
                error_code: snapshot.error_code.clone(),
                supplies: serde_json::Map::new(),
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::JobUpdate { .. } => "job_update",
            OutboundMessage::PrinterStatus { .. } => "printer_status",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_print_job() {
        let msg = InboundMessage::from_json(
            r#"{"type":"print_job","data":{"job_id":"J1","printer_name":"HP1",
                "file_url":"https://x/doc.pdf","name":"Invoice",
                "print_options":{"copies":2,"duplex":"long-edge","color":null}}}"#,
        )
        .unwrap();

        let InboundMessage::PrintJob(request) = msg else {
            panic!("expected print_job");
        };
        let job = request.into_job().unwrap();
        assert_eq!(job.cloud_job_id, "J1");
        assert_eq!(job.display_name, "Invoice");
        assert_eq!(job.options.get("copies").map(String::as_str), Some("2"));
        assert_eq!(job.options.get("duplex").map(String::as_str), Some("long-edge"));
        assert!(!job.options.contains_key("color"));
    }

    #[test]
    fn test_numeric_job_id_and_job_name_alias() {
        let msg = InboundMessage::from_json(
            r#"{"type":"print_job","data":{"job_id":77,"printer_name":"HP1",
                "file_url":"https://x/a.pdf","job_name":"Label"}}"#,
        )
        .unwrap();
        let InboundMessage::PrintJob(request) = msg else {
            panic!("expected print_job");
        };
        assert_eq!(request.job_id.as_deref(), Some("77"));
        assert_eq!(request.name.as_deref(), Some("Label"));
    }

    #[test]
    fn test_missing_data_yields_empty_request() {
        let msg = InboundMessage::from_json(r#"{"type":"print_job"}"#).unwrap();
        assert_eq!(msg, InboundMessage::PrintJob(PrintJobRequest::default()));
    }

    #[test]
    fn test_unknown_and_malformed_frames() {
        let msg = InboundMessage::from_json(r#"{"type":"firmware_push","data":{}}"#).unwrap();
        assert_eq!(msg.type_name(), "firmware_push");

        let err = InboundMessage::from_json(r#"{"data":{}}"#).unwrap_err();
        assert!(err.is_protocol_error());

        let err = InboundMessage::from_json("not json").unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_job_update_wire_shape() {
        let msg = OutboundMessage::job_update("node-1", "J1", &JobOutcome::Completed);
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "job_update");
        assert_eq!(json["node_id"], "node-1");
        assert_eq!(json["data"]["job_id"], "J1");
        assert_eq!(json["data"]["status"], "completed");
        assert_eq!(json["data"]["progress"], 100);
        assert!(json["data"]["error_message"].is_null());
        assert!(json["data"].as_object().unwrap().contains_key("error_message"));

        let ts = json["timestamp"].as_str().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_printer_status_wire_shape() {
        let snapshot = DeviceStatusSnapshot {
            device_name: "HP1".into(),
            status: CloudPrinterStatus::Printing,
            queue_length: 3,
            error_code: None,
        };
        let msg = OutboundMessage::printer_status("node-1", &snapshot);
        assert_eq!(msg.type_name(), "printer_status");

        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "printer_status");
        assert_eq!(json["data"]["printer_id"], "HP1");
        assert_eq!(json["data"]["status"], "printing");
        assert_eq!(json["data"]["queue_length"], 3);
        assert_eq!(json["data"]["supplies"], serde_json::json!({}));
    }
}

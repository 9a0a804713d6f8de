// ── Realtime wire format ──
//
// Inbound text frames are either row-level change messages
// (`{ "eventType": "INSERT", "new": {..}, "old": {..} }`, bare or wrapped in
// `{ "type": "change", "payload": {..} }`) or control frames tagged by `type`.
// Outbound there is exactly one frame: the subscribe request.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::filter::TransportFilter;

/// A row-level change exactly as the server sent it.
///
/// `event_type` stays a string here: unknown types are a per-event problem
/// for the decoder in `rowsync-core`, not a reason to fail the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub event_type: String,

    /// Row image after the change (`INSERT`, `UPDATE`).
    #[serde(default, deserialize_with = "non_empty_object")]
    pub new: Option<Map<String, Value>>,

    /// Row image before the change (`UPDATE`, `DELETE`). Often only the
    /// primary key, depending on the table's replica identity.
    #[serde(default, deserialize_with = "non_empty_object")]
    pub old: Option<Map<String, Value>>,

    /// Server commit time, informational only. Never used for ordering.
    #[serde(default)]
    pub commit_timestamp: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// The server accepted the subscription; changes follow.
    Subscribed,
    /// One row-level change.
    Change(RawChange),
    /// Keep-alive, carries nothing.
    Heartbeat,
    /// The server reported a channel error. The connection is not trusted
    /// after this.
    Error { message: String },
}

#[derive(Debug, Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

/// Outbound subscribe request.
#[derive(Debug, Serialize)]
pub struct SubscribeFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    table: &'a str,
    filter: String,
}

impl<'a> SubscribeFrame<'a> {
    pub fn new(filter: &'a TransportFilter) -> Self {
        Self {
            kind: "subscribe",
            table: filter.table(),
            filter: filter.row_filter(),
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse one inbound text frame.
pub fn parse_frame(text: &str) -> Result<InboundFrame, Error> {
    let value: Value = serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: text.to_owned(),
    })?;

    if value.get("eventType").is_some() {
        return change_from_value(value, text);
    }

    let control: ControlFrame =
        serde_json::from_value(value).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })?;

    match control.kind.as_str() {
        "subscribed" | "ack" => Ok(InboundFrame::Subscribed),
        "heartbeat" => Ok(InboundFrame::Heartbeat),
        "error" => Ok(InboundFrame::Error {
            message: control
                .message
                .unwrap_or_else(|| "unspecified server error".into()),
        }),
        "change" => match control.payload {
            Some(payload) => change_from_value(payload, text),
            None => Err(Error::Protocol {
                message: "change frame without payload".into(),
            }),
        },
        other => Err(Error::Protocol {
            message: format!("unknown frame type '{other}'"),
        }),
    }
}

fn change_from_value(value: Value, body: &str) -> Result<InboundFrame, Error> {
    serde_json::from_value::<RawChange>(value)
        .map(InboundFrame::Change)
        .map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.to_owned(),
        })
}

/// `{}` and `null` both mean "no row image".
fn non_empty_object<'de, D>(deserializer: D) -> Result<Option<Map<String, Value>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = Option::<Map<String, Value>>::deserialize(deserializer)?;
    Ok(map.filter(|m| !m.is_empty()))
}

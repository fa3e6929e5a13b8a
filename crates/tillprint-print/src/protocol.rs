// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// WebSocket wire format.
//
// Every frame is a JSON text message whose `tipo` field names its kind. The
// field names (`tipo`, `datos`, `mensaje`) are fixed by the POS clients
// already deployed against this service.
//
// Inbound:  ticket{id?, datos, token?} | status | ping{id?} | get_printers
// Outbound: info | ack | status | pong | error | result | printers

use serde::{Deserialize, Serialize};

use tillprint_core::types::{JobId, JobOutcome, PrinterRecord, PrinterSummary};

/// Greeting sent once per connection.
pub const WELCOME_MESSAGE: &str = "Tillprint print service ready";

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Raw inbound frame before dispatch on `tipo`.
///
/// Decoding this only fails on malformed JSON; an unrecognised `tipo` is
/// caught in the conversion to [`ClientMessage`] so it can be answered.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub tipo: String,
    pub id: Option<String>,
    pub datos: Option<serde_json::Value>,
    pub token: Option<String>,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A request from a POS client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `ticket`: queue a document for printing.
    SubmitJob {
        id: Option<String>,
        payload: Option<serde_json::Value>,
        token: Option<String>,
    },
    /// `status`: report queue depth.
    QueryStatus,
    /// `ping`: liveness check.
    Ping { id: Option<String> },
    /// `get_printers`: list installed printers.
    ListPrinters,
}

/// Frame with a `tipo` this service does not understand.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type: {kind}")]
pub struct UnknownMessage {
    pub kind: String,
    pub id: Option<String>,
}

impl TryFrom<Envelope> for ClientMessage {
    type Error = UnknownMessage;

    fn try_from(env: Envelope) -> Result<Self, Self::Error> {
        match env.tipo.as_str() {
            "ticket" => Ok(Self::SubmitJob {
                id: env.id,
                payload: env.datos,
                token: env.token,
            }),
            "status" => Ok(Self::QueryStatus),
            "ping" => Ok(Self::Ping { id: env.id }),
            "get_printers" => Ok(Self::ListPrinters),
            _ => Err(UnknownMessage {
                kind: env.tipo,
                id: env.id,
            }),
        }
    }
}

/// Missing, `null` and `""` all count as "no document".
pub fn payload_is_empty(payload: Option<&serde_json::Value>) -> bool {
    match payload {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A message sent to a POS client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Welcome,
    Ack {
        id: JobId,
        current: usize,
        capacity: usize,
    },
    Status {
        current: usize,
        capacity: usize,
    },
    Pong {
        id: Option<String>,
    },
    Error {
        id: Option<String>,
        message: String,
    },
    Result {
        id: JobId,
        outcome: JobOutcome,
        message: String,
    },
    PrinterList {
        printers: Vec<PrinterRecord>,
        summary: PrinterSummary,
    },
}

impl ServerMessage {
    pub fn error(id: Option<&str>, message: impl Into<String>) -> Self {
        Self::Error {
            id: id.map(str::to_string),
            message: message.into(),
        }
    }

    /// Wire name of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome => "info",
            Self::Ack { .. } => "ack",
            Self::Status { .. } => "status",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
            Self::Result { .. } => "result",
            Self::PrinterList { .. } => "printers",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn frame(&self) -> Frame<'_> {
        let mut frame = Frame {
            tipo: self.kind(),
            ..Frame::default()
        };
        match self {
            Self::Welcome => {
                frame.status = Some("connected");
                frame.mensaje = Some(WELCOME_MESSAGE.into());
            }
            Self::Ack {
                id,
                current,
                capacity,
            } => {
                frame.id = Some(id.as_str());
                frame.status = Some("queued");
                frame.mensaje = Some("Job queued for printing".into());
                frame.current = Some(*current);
                frame.capacity = Some(*capacity);
            }
            Self::Status { current, capacity } => {
                frame.status = Some("ok");
                frame.mensaje = Some(format!("Queue: {current}/{capacity}"));
                frame.current = Some(*current);
                frame.capacity = Some(*capacity);
            }
            Self::Pong { id } => {
                frame.id = id.as_deref();
                frame.status = Some("ok");
            }
            Self::Error { id, message } => {
                frame.id = id.as_deref();
                frame.status = Some("error");
                frame.mensaje = Some(message.clone());
            }
            Self::Result {
                id,
                outcome,
                message,
            } => {
                frame.id = Some(id.as_str());
                frame.status = Some(match outcome {
                    JobOutcome::Success => "success",
                    JobOutcome::Error => "error",
                });
                frame.mensaje = Some(message.clone());
            }
            Self::PrinterList { printers, summary } => {
                frame.status = Some("ok");
                frame.printers = Some(printers.as_slice());
                frame.summary = Some(summary);
            }
        }
        frame
    }
}

/// Flat JSON shape shared by every outbound message.
#[derive(Default, Serialize)]
struct Frame<'a> {
    tipo: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mensaje: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    printers: Option<&'a [PrinterRecord]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a PrinterSummary>,
}

impl Serialize for ServerMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.frame().serialize(serializer)
    }
}

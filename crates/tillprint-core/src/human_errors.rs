// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable failure messages for POS clients.
//
// A failed print job produces a long error chain ("error executing document:
// command 3: QR data cannot be empty").  Cashiers see one short line with a
// category tag instead; the full chain only goes to the log.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category tag shown in front of every failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailureCategory {
    /// Payload is not a well-formed document.
    Json,
    /// Document structure or field values are invalid.
    Validation,
    /// Printer missing, unnamed, or unreachable.
    Printer,
    Qr,
    Barcode,
    Table,
    Raw,
    Image,
    /// Unrecognised document command.
    Command,
    /// Any other failure while running the document.
    Execution,
    /// Nothing above matched.
    Error,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Validation => "VALIDATION",
            Self::Printer => "PRINTER",
            Self::Qr => "QR",
            Self::Barcode => "BARCODE",
            Self::Table => "TABLE",
            Self::Raw => "RAW",
            Self::Image => "IMAGE",
            Self::Command => "COMMAND",
            Self::Execution => "EXECUTION",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reduced to what the client is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedFailure {
    pub category: FailureCategory,
    pub detail: String,
}

impl fmt::Display for ClassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.detail)
    }
}

/// Known failure fragments, matched case-insensitively, first match wins.
const KNOWN_FAILURES: &[(&str, FailureCategory, &str)] = &[
    ("version is required", FailureCategory::Validation, "Missing 'version' field"),
    ("profile.model is required", FailureCategory::Validation, "Missing 'profile.model' field"),
    ("at least one command", FailureCategory::Validation, "Document must contain at least one command"),
    ("invalid paper_width", FailureCategory::Validation, "Invalid paper width (use 58 or 80)"),
    ("invalid dpi", FailureCategory::Validation, "Invalid DPI value"),
    ("invalid version format", FailureCategory::Validation, "Invalid version format (use X.Y pattern)"),
    ("error connecting to printer", FailureCategory::Printer, "Cannot connect - check if printer is installed"),
    ("printer name not specified", FailureCategory::Printer, "No printer name specified in profile.model"),
    ("qr data cannot be empty", FailureCategory::Qr, "Data cannot be empty"),
    ("qr data too long", FailureCategory::Qr, "Data exceeds maximum length"),
    ("invalid qr correction level", FailureCategory::Qr, "Invalid correction level (use L, M, Q, or H)"),
    ("barcode symbology is required", FailureCategory::Barcode, "Symbology type is required"),
    ("barcode data is required", FailureCategory::Barcode, "Data is required"),
    ("table overflow", FailureCategory::Table, "Columns exceed paper width"),
    ("raw command cannot be empty", FailureCategory::Raw, "Command hex cannot be empty"),
    ("unsafe command blocked", FailureCategory::Raw, "Blocked by safe_mode - potentially dangerous command"),
    ("failed to load image", FailureCategory::Image, "Invalid or corrupted base64 data"),
    ("unknown command type", FailureCategory::Command, "Unknown command type"),
];

/// Prefixes added by the job pipeline's error wrappers.
const PIPELINE_PREFIXES: &[&str] = &[
    "failed to parse document: ",
    "invalid document: ",
    "error executing document: ",
    "print job aborted: ",
    "print job panicked: ",
];

/// Reduce a failure message (usually the `Display` of the whole error chain)
/// to a category and a short client-facing detail.
pub fn classify_failure(message: &str) -> ClassifiedFailure {
    let lower = message.to_lowercase();

    if let Some((_, category, detail)) = KNOWN_FAILURES
        .iter()
        .find(|(pattern, _, _)| lower.contains(pattern))
    {
        return ClassifiedFailure {
            category: *category,
            detail: (*detail).to_string(),
        };
    }

    if message.contains("invalid document") {
        return ClassifiedFailure {
            category: FailureCategory::Validation,
            detail: innermost(message).to_string(),
        };
    }
    if message.contains("failed to parse document") {
        return ClassifiedFailure {
            category: FailureCategory::Json,
            detail: "Invalid document structure".into(),
        };
    }
    if message.contains("error executing document") {
        return ClassifiedFailure {
            category: FailureCategory::Execution,
            detail: innermost(message).to_string(),
        };
    }

    ClassifiedFailure {
        category: FailureCategory::Error,
        detail: strip_pipeline_prefixes(message).to_string(),
    }
}

/// Shorthand for `classify_failure(message).to_string()`.
pub fn user_message(message: &str) -> String {
    classify_failure(message).to_string()
}

/// Last `": "`-separated segment of an error chain.
fn innermost(message: &str) -> &str {
    message.rsplit(": ").next().unwrap_or(message)
}

fn strip_pipeline_prefixes(message: &str) -> &str {
    let mut rest = message;
    for prefix in PIPELINE_PREFIXES {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    rest
}

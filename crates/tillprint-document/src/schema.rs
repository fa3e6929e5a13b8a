// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print document schema and structural validation.
//
// A document is what POS clients send in the `datos` field of a `ticket`
// message:
//
// ```json
// {
//   "version": "1.0",
//   "profile": { "model": "58mm PT-210", "paper_width": 58 },
//   "commands": [
//     { "type": "text", "data": { "content": "Hello", "align": "center" } },
//     { "type": "cut" }
//   ]
// }
// ```
//
// Fields default when absent so that `{}` decodes and is then rejected by
// `validate` with a precise message rather than a generic parse error.
// Command payloads stay as raw JSON until execution, where each command type
// decodes its own data.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Paper widths (mm) the bundled profiles understand.
pub const SUPPORTED_PAPER_WIDTHS: [u32; 2] = [58, 80];

/// DPI range accepted as a document override.
const DPI_RANGE: std::ops::RangeInclusive<u32> = 100..=600;

/// Structural or semantic problem found by [`Document::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("version is required")]
    VersionRequired,

    #[error("invalid version format: '{0}'")]
    VersionFormat(String),

    #[error("invalid paper_width: {0}")]
    PaperWidth(u32),

    #[error("invalid dpi: {0}")]
    Dpi(u32),

    #[error("document must contain at least one command")]
    NoCommands,

    #[error("command {index}: type is required")]
    CommandType { index: usize },
}

/// Printer selection and capability hints carried by the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Installed printer name; also used to pick a hardware profile.
    pub model: String,
    /// Paper width in millimetres (0 = unspecified).
    pub paper_width: u32,
    /// DPI override (0 = profile default).
    pub dpi: u32,
    /// QR capability override.
    pub has_qr: Option<bool>,
}

/// One entry of the `commands` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A decoded print document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    pub version: String,
    pub profile: ProfileConfig,
    pub commands: Vec<CommandSpec>,
}

impl Document {
    /// Decode a document from the job payload.
    ///
    /// Clients send the document either as a JSON object or as a string
    /// holding serialized JSON; both are accepted.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        match payload {
            serde_json::Value::String(text) => serde_json::from_str(text),
            other => Document::deserialize(other),
        }
    }

    /// Check the rules every document must satisfy before a printer is opened.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let version = self.version.trim();
        if version.is_empty() {
            return Err(ValidationError::VersionRequired);
        }
        if !is_major_minor(version) {
            return Err(ValidationError::VersionFormat(version.to_string()));
        }

        let width = self.profile.paper_width;
        if width != 0 && !SUPPORTED_PAPER_WIDTHS.contains(&width) {
            return Err(ValidationError::PaperWidth(width));
        }

        let dpi = self.profile.dpi;
        if dpi != 0 && !DPI_RANGE.contains(&dpi) {
            return Err(ValidationError::Dpi(dpi));
        }

        if self.commands.is_empty() {
            return Err(ValidationError::NoCommands);
        }
        if let Some(index) = self.commands.iter().position(|c| c.kind.trim().is_empty()) {
            return Err(ValidationError::CommandType { index });
        }

        Ok(())
    }
}

/// `X.Y` where both parts are non-empty runs of ASCII digits.
fn is_major_minor(version: &str) -> bool {
    match version.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

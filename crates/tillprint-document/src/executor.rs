// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document execution: turns validated commands into ESC/POS output.
//
// Supported command types and their `data` fields:
//
//   text       content, align, bold, size, new_line
//   feed       lines
//   cut        mode ("full" | "partial"), feed
//   separator  char, length
//   qr         data, size, correction (L/M/Q/H), align
//   barcode    symbology, data, height, width, hri, align
//   table      columns [{header, width, align}], rows, show_headers
//   raw        hex, safe_mode
//   image      base64, max_width, threshold, align
//
// The first failing command stops execution; nothing reaches the device
// because the service aborts on drop.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::device::PrinterService;
use crate::escpos::{Align, CutMode, HriPosition, QR_MAX_BYTES, QrLevel, Symbology};
use crate::raster::RasterImage;
use crate::schema::{CommandSpec, Document};

/// Failure of a single command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command type: {0}")]
    UnknownType(String),

    #[error("invalid data for '{command}' command: {reason}")]
    InvalidData { command: String, reason: String },

    #[error("QR data cannot be empty")]
    QrEmpty,

    #[error("QR data too long: {0} bytes (max 2953)")]
    QrTooLong(usize),

    #[error("invalid QR correction level: {0}")]
    QrLevel(String),

    #[error("barcode symbology is required")]
    BarcodeSymbologyMissing,

    #[error("barcode data is required")]
    BarcodeDataMissing,

    #[error("table overflow: needs {required} characters, paper fits {available}")]
    TableOverflow { required: usize, available: usize },

    #[error("raw command cannot be empty")]
    RawEmpty,

    #[error("unsafe command blocked: {0}")]
    UnsafeRaw(&'static str),

    #[error("failed to load image: {0}")]
    Image(String),
}

/// Failure while running a document.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("command {index}: {source}")]
    Command {
        index: usize,
        #[source]
        source: CommandError,
    },
}

/// Runs a document against a print service.
pub trait DocumentExecutor: Send + Sync {
    fn execute(&self, document: &Document, service: &mut PrinterService) -> Result<(), ExecutionError>;
}

/// The ESC/POS executor used for every receipt printer.
#[derive(Debug, Clone, Default)]
pub struct EscPosExecutor;

impl DocumentExecutor for EscPosExecutor {
    #[instrument(skip_all, fields(device = service.device_name(), commands = document.commands.len()))]
    fn execute(&self, document: &Document, service: &mut PrinterService) -> Result<(), ExecutionError> {
        for (index, command) in document.commands.iter().enumerate() {
            debug!(index, kind = %command.kind, "Executing command");
            run_command(command, service)
                .map_err(|source| ExecutionError::Command { index, source })?;
        }
        Ok(())
    }
}

// -- Command data -----------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_one() -> u8 {
    1
}

#[derive(Debug, Deserialize)]
struct TextData {
    content: String,
    #[serde(default)]
    align: String,
    #[serde(default)]
    bold: bool,
    #[serde(default = "default_one")]
    size: u8,
    #[serde(default = "default_true")]
    new_line: bool,
}

#[derive(Debug, Deserialize)]
struct FeedData {
    #[serde(default = "default_one")]
    lines: u8,
}

#[derive(Debug, Deserialize)]
struct CutData {
    #[serde(default)]
    mode: String,
    #[serde(default = "default_cut_feed")]
    feed: u8,
}

fn default_cut_feed() -> u8 {
    3
}

#[derive(Debug, Deserialize)]
struct SeparatorData {
    #[serde(default = "default_separator_char")]
    char: String,
    #[serde(default)]
    length: Option<usize>,
}

fn default_separator_char() -> String {
    "-".into()
}

#[derive(Debug, Deserialize)]
struct QrData {
    #[serde(default)]
    data: String,
    #[serde(default = "default_qr_size")]
    size: u8,
    #[serde(default)]
    correction: String,
    #[serde(default = "default_center")]
    align: String,
}

fn default_qr_size() -> u8 {
    6
}

fn default_center() -> String {
    "center".into()
}

#[derive(Debug, Deserialize)]
struct BarcodeData {
    #[serde(default)]
    symbology: String,
    #[serde(default)]
    data: String,
    #[serde(default = "default_barcode_height")]
    height: u8,
    #[serde(default = "default_barcode_width")]
    width: u8,
    #[serde(default)]
    hri: String,
    #[serde(default = "default_center")]
    align: String,
}

fn default_barcode_height() -> u8 {
    80
}

fn default_barcode_width() -> u8 {
    3
}

#[derive(Debug, Deserialize)]
struct TableColumn {
    #[serde(default)]
    header: String,
    width: usize,
    #[serde(default)]
    align: String,
}

#[derive(Debug, Deserialize)]
struct TableData {
    columns: Vec<TableColumn>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
    #[serde(default = "default_true")]
    show_headers: bool,
}

#[derive(Debug, Deserialize)]
struct RawData {
    #[serde(default)]
    hex: String,
    #[serde(default = "default_true")]
    safe_mode: bool,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    base64: String,
    #[serde(default)]
    max_width: u32,
    #[serde(default = "default_threshold")]
    threshold: u8,
    #[serde(default = "default_center")]
    align: String,
}

fn default_threshold() -> u8 {
    128
}

/// Byte sequences refused in safe mode: they rewrite printer NV memory or
/// settings, or power the printer off.
const UNSAFE_SEQUENCES: &[(&[u8], &str)] = &[
    (&[0x1D, 0x28, 0x45], "GS ( E (user setup)"),
    (&[0x1C, 0x71], "FS q (NV bit image)"),
    (&[0x1C, 0x70], "FS p (NV bit image)"),
    (&[0x1D, 0x28, 0x4C], "GS ( L (graphics memory)"),
    (&[0x10, 0x14, 0x02], "DLE DC4 (power off)"),
];

// -- Dispatch ---------------------------------------------------------------

fn decode<T: DeserializeOwned>(command: &CommandSpec) -> Result<T, CommandError> {
    let data = match &command.data {
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(data).map_err(|err| CommandError::InvalidData {
        command: command.kind.clone(),
        reason: err.to_string(),
    })
}

fn parse_align(command: &CommandSpec, value: &str) -> Result<Align, CommandError> {
    value.parse().map_err(|reason| CommandError::InvalidData {
        command: command.kind.clone(),
        reason,
    })
}

fn run_command(command: &CommandSpec, service: &mut PrinterService) -> Result<(), CommandError> {
    match command.kind.trim().to_ascii_lowercase().as_str() {
        "text" => text(command, service),
        "feed" => {
            let data: FeedData = decode(command)?;
            service.encoder().feed(data.lines);
            Ok(())
        }
        "cut" => {
            let data: CutData = decode(command)?;
            let mode = if data.mode.eq_ignore_ascii_case("full") {
                CutMode::Full
            } else {
                CutMode::Partial
            };
            service.encoder().cut(mode, data.feed);
            Ok(())
        }
        "separator" => separator(command, service),
        "qr" => qr(command, service),
        "barcode" => barcode(command, service),
        "table" => table(command, service),
        "raw" => raw(command, service),
        "image" => image(command, service),
        _ => Err(CommandError::UnknownType(command.kind.clone())),
    }
}

fn text(command: &CommandSpec, service: &mut PrinterService) -> Result<(), CommandError> {
    let data: TextData = decode(command)?;
    let align = parse_align(command, &data.align)?;

    let enc = service.encoder();
    enc.align(align).bold(data.bold).size(data.size, data.size);
    if data.new_line {
        enc.line(&data.content);
    } else {
        enc.text(&data.content);
    }
    enc.bold(false).size(1, 1).align(Align::Left);
    Ok(())
}

fn separator(command: &CommandSpec, service: &mut PrinterService) -> Result<(), CommandError> {
    let data: SeparatorData = decode(command)?;
    let width = data
        .length
        .unwrap_or(service.profile().chars_per_line)
        .min(service.profile().chars_per_line);
    let pattern = if data.char.is_empty() { "-" } else { data.char.as_str() };
    let line: String = pattern.chars().cycle().take(width).collect();
    service.encoder().line(&line);
    Ok(())
}

fn qr(command: &CommandSpec, service: &mut PrinterService) -> Result<(), CommandError> {
    let data: QrData = decode(command)?;
    if data.data.is_empty() {
        return Err(CommandError::QrEmpty);
    }
    if data.data.len() > QR_MAX_BYTES {
        return Err(CommandError::QrTooLong(data.data.len()));
    }
    let level: QrLevel = data.correction.parse().map_err(CommandError::QrLevel)?;
    let align = parse_align(command, &data.align)?;
    let has_qr = service.profile().has_qr;

    let enc = service.encoder();
    enc.align(align);
    if has_qr {
        enc.qr(data.data.as_bytes(), data.size, level).raw(b"\n");
    } else {
        debug!("Printer has no QR support, printing QR data as text");
        enc.line(&data.data);
    }
    enc.align(Align::Left);
    Ok(())
}

fn barcode(command: &CommandSpec, service: &mut PrinterService) -> Result<(), CommandError> {
    let data: BarcodeData = decode(command)?;
    if data.symbology.trim().is_empty() {
        return Err(CommandError::BarcodeSymbologyMissing);
    }
    if data.data.is_empty() {
        return Err(CommandError::BarcodeDataMissing);
    }
    let invalid = |reason: String| CommandError::InvalidData {
        command: command.kind.clone(),
        reason,
    };
    let symbology: Symbology = data.symbology.parse().map_err(invalid)?;
    let hri: HriPosition = data.hri.parse().map_err(invalid)?;
    let align = parse_align(command, &data.align)?;

    service
        .encoder()
        .align(align)
        .barcode(symbology, data.data.as_bytes(), data.height, data.width, hri)
        .raw(b"\n")
        .align(Align::Left);
    Ok(())
}

fn table(command: &CommandSpec, service: &mut PrinterService) -> Result<(), CommandError> {
    let data: TableData = decode(command)?;
    if data.columns.is_empty() {
        return Err(CommandError::InvalidData {
            command: command.kind.clone(),
            reason: "at least one column is required".into(),
        });
    }

    let available = service.profile().chars_per_line;
    let required = table_width(&data.columns, available)?;

    let aligns = data
        .columns
        .iter()
        .map(|c| parse_align(command, &c.align))
        .collect::<Result<Vec<_>, _>>()?;

    let render = |cells: &[String]| -> String {
        data.columns
            .iter()
            .zip(&aligns)
            .enumerate()
            .map(|(i, (col, align))| pad(cells.get(i).map(String::as_str).unwrap_or(""), col.width, *align))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let enc = service.encoder();
    if data.show_headers {
        let headers: Vec<String> = data.columns.iter().map(|c| c.header.clone()).collect();
        enc.bold(true).line(&render(&headers)).bold(false);
        enc.line(&"-".repeat(required));
    }
    for row in &data.rows {
        enc.line(&render(row));
    }
    Ok(())
}

/// Total line width of `columns` with one space between them. Widths come
/// from the client, so every step is bounded by `available`.
fn table_width(columns: &[TableColumn], available: usize) -> Result<usize, CommandError> {
    let gaps = columns.len() - 1;
    let mut required = gaps;
    for column in columns {
        if column.width > available {
            return Err(CommandError::TableOverflow {
                required: column.width,
                available,
            });
        }
        required = match required.checked_add(column.width) {
            Some(total) => total,
            None => return Err(CommandError::TableOverflow { required: usize::MAX, available }),
        };
    }
    if required > available {
        return Err(CommandError::TableOverflow { required, available });
    }
    Ok(required)
}

/// Fit `cell` into exactly `width` characters.
fn pad(cell: &str, width: usize, align: Align) -> String {
    let truncated: String = cell.chars().take(width).collect();
    let fill = width - truncated.chars().count();
    match align {
        Align::Left => format!("{truncated}{}", " ".repeat(fill)),
        Align::Right => format!("{}{truncated}", " ".repeat(fill)),
        Align::Center => {
            let left = fill / 2;
            format!("{}{truncated}{}", " ".repeat(left), " ".repeat(fill - left))
        }
    }
}

fn raw(command: &CommandSpec, service: &mut PrinterService) -> Result<(), CommandError> {
    let data: RawData = decode(command)?;
    let cleaned: String = data.hex.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(CommandError::RawEmpty);
    }
    let bytes = hex::decode(&cleaned).map_err(|err| CommandError::InvalidData {
        command: command.kind.clone(),
        reason: err.to_string(),
    })?;

    if data.safe_mode {
        if let Some((_, name)) = UNSAFE_SEQUENCES
            .iter()
            .find(|(seq, _)| bytes.windows(seq.len()).any(|w| w == *seq))
        {
            return Err(CommandError::UnsafeRaw(*name));
        }
    }

    service.encoder().raw(&bytes);
    Ok(())
}

fn image(command: &CommandSpec, service: &mut PrinterService) -> Result<(), CommandError> {
    let data: ImageData = decode(command)?;
    let dots = service.profile().dots_per_line;
    let max_width = match data.max_width {
        0 => dots,
        w => w.min(dots),
    };
    let raster = RasterImage::from_base64(&data.base64, max_width, data.threshold)
        .map_err(|err| CommandError::Image(err.to_string()))?;
    let align = parse_align(command, &data.align)?;

    service
        .encoder()
        .align(align)
        .raster(&raster)
        .align(Align::Left);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CaptureDevice;
    use crate::profile::PrinterProfile;
    use serde_json::json;

    fn run(commands: serde_json::Value, profile: PrinterProfile) -> (Result<(), ExecutionError>, Vec<u8>) {
        let doc = Document::from_payload(&json!({
            "version": "1.0",
            "commands": commands,
        }))
        .expect("decode");
        let device = CaptureDevice::new("mem");
        let mut service = PrinterService::new(profile, Box::new(device.clone()));
        let result = EscPosExecutor.execute(&doc, &mut service);
        if result.is_ok() {
            service.finish().expect("finish");
        }
        (result, device.committed())
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn text_and_cut() {
        let (result, bytes) = run(
            json!([
                { "type": "text", "data": { "content": "Total", "bold": true, "align": "right" } },
                { "type": "cut", "data": { "mode": "full" } }
            ]),
            PrinterProfile::generic_58mm(),
        );
        result.expect("execute");
        assert!(contains(&bytes, &[0x1B, b'a', 2, 0x1B, b'E', 1]));
        assert!(contains(&bytes, b"Total\n"));
        assert!(bytes.ends_with(&[0x1D, b'V', 65, 3]));
    }

    #[test]
    fn commands_without_data_use_defaults() {
        let (result, bytes) = run(json!([{ "type": "feed" }, { "type": "cut" }]), PrinterProfile::generic_58mm());
        result.expect("execute");
        assert!(contains(&bytes, &[0x1B, b'd', 1]));
        assert!(bytes.ends_with(&[0x1D, b'V', 66, 3]));
    }

    #[test]
    fn separator_fills_paper_width() {
        let (result, bytes) = run(json!([{ "type": "separator", "data": { "char": "=" } }]), PrinterProfile::generic_80mm());
        result.expect("execute");
        let line = format!("{}\n", "=".repeat(48));
        assert!(contains(&bytes, line.as_bytes()));
    }

    #[test]
    fn failing_command_reports_index_and_prints_nothing() {
        let (result, bytes) = run(
            json!([{ "type": "text", "data": { "content": "ok" } }, { "type": "qr", "data": { "data": "" } }]),
            PrinterProfile::generic_58mm(),
        );
        let err = result.expect_err("empty qr");
        assert_eq!(err.to_string(), "command 1: QR data cannot be empty");
        assert!(bytes.is_empty());
    }

    #[test]
    fn qr_without_support_prints_text() {
        let mut profile = PrinterProfile::generic_58mm();
        profile.has_qr = false;
        let (result, bytes) = run(json!([{ "type": "qr", "data": { "data": "https://x.y" } }]), profile);
        result.expect("execute");
        assert!(contains(&bytes, b"https://x.y\n"));
        assert!(!contains(&bytes, &[0x1D, b'(', b'k']));
    }

    #[test]
    fn qr_rejects_bad_level_and_long_data() {
        let (result, _) = run(json!([{ "type": "qr", "data": { "data": "a", "correction": "Z" } }]), PrinterProfile::generic_58mm());
        assert!(result.expect_err("level").to_string().contains("invalid QR correction level: Z"));

        let long = "x".repeat(QR_MAX_BYTES + 1);
        let (result, _) = run(json!([{ "type": "qr", "data": { "data": long } }]), PrinterProfile::generic_58mm());
        assert!(result.expect_err("long").to_string().contains("QR data too long"));
    }

    #[test]
    fn barcode_requires_symbology_and_data() {
        let (result, _) = run(json!([{ "type": "barcode", "data": { "data": "123" } }]), PrinterProfile::generic_58mm());
        assert!(result.expect_err("symbology").to_string().ends_with("barcode symbology is required"));

        let (result, _) = run(json!([{ "type": "barcode", "data": { "symbology": "ean13" } }]), PrinterProfile::generic_58mm());
        assert!(result.expect_err("data").to_string().ends_with("barcode data is required"));
    }

    #[test]
    fn table_overflow_is_rejected() {
        let (result, _) = run(
            json!([{ "type": "table", "data": {
                "columns": [{ "header": "Item", "width": 20 }, { "header": "Price", "width": 12 }],
                "rows": [["Coffee", "2.50"]]
            }}]),
            PrinterProfile::generic_58mm(),
        );
        assert!(result.expect_err("overflow").to_string().contains("table overflow"));
    }

    #[test]
    fn table_widths_that_wrap_are_rejected() {
        let huge = 1usize << 40;
        let (result, bytes) = run(
            json!([{ "type": "table", "data": {
                "columns": [
                    { "header": "Item", "width": huge },
                    { "header": "Price", "width": 0usize.wrapping_sub(huge) }
                ],
                "rows": [["Coffee", "2.50"]]
            }}]),
            PrinterProfile::generic_58mm(),
        );
        assert!(result.expect_err("overflow").to_string().contains("table overflow"));
        assert!(bytes.is_empty());

        let widths = [usize::MAX, 5];
        let columns: Vec<TableColumn> = widths
            .iter()
            .map(|&width| serde_json::from_value(json!({ "header": "x", "width": width })).expect("column"))
            .collect();
        assert!(matches!(
            table_width(&columns, usize::MAX),
            Err(CommandError::TableOverflow { .. })
        ));
    }

    #[test]
    fn table_rows_are_padded() {
        let (result, bytes) = run(
            json!([{ "type": "table", "data": {
                "columns": [{ "header": "Item", "width": 10 }, { "header": "Price", "width": 6, "align": "right" }],
                "rows": [["Coffee with milk", "2.50"]],
                "show_headers": false
            }}]),
            PrinterProfile::generic_58mm(),
        );
        result.expect("execute");
        assert!(contains(&bytes, b"Coffee wit   2.50\n"));
    }

    #[test]
    fn raw_safe_mode() {
        let (result, _) = run(json!([{ "type": "raw", "data": { "hex": "1d 28 45 03 00 01 49 4e" } }]), PrinterProfile::generic_58mm());
        assert!(result.expect_err("blocked").to_string().contains("unsafe command blocked"));

        let (result, bytes) = run(
            json!([{ "type": "raw", "data": { "hex": "1d2845", "safe_mode": false } }]),
            PrinterProfile::generic_58mm(),
        );
        result.expect("allowed");
        assert!(contains(&bytes, &[0x1D, 0x28, 0x45]));

        let (result, _) = run(json!([{ "type": "raw", "data": { "hex": "  " } }]), PrinterProfile::generic_58mm());
        assert!(result.expect_err("empty").to_string().contains("raw command cannot be empty"));
    }

    #[test]
    fn image_errors_are_tagged() {
        let (result, _) = run(json!([{ "type": "image", "data": { "base64": "!!!" } }]), PrinterProfile::generic_58mm());
        assert!(result.expect_err("image").to_string().contains("failed to load image"));
    }

    #[test]
    fn unknown_and_malformed_commands() {
        let (result, _) = run(json!([{ "type": "confetti" }]), PrinterProfile::generic_58mm());
        assert_eq!(result.expect_err("unknown").to_string(), "command 0: unknown command type: confetti");

        let (result, _) = run(json!([{ "type": "text", "data": { "content": 5 } }]), PrinterProfile::generic_58mm());
        assert!(result.expect_err("invalid").to_string().contains("invalid data for 'text' command"));
    }
}

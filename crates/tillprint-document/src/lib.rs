// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tillprint-document — Receipt documents for the Tillprint daemon.
//
// Provides the JSON document schema and its validation, printer hardware
// profiles, an ESC/POS encoder (text, QR, barcodes, raster images), and the
// executor that runs a document against an open printer device.

pub mod device;
pub mod escpos;
pub mod executor;
pub mod profile;
pub mod raster;
pub mod schema;

pub use device::{CaptureDevice, Device, PrinterService};
pub use executor::{CommandError, DocumentExecutor, EscPosExecutor, ExecutionError};
pub use profile::PrinterProfile;
pub use schema::{Document, ValidationError};

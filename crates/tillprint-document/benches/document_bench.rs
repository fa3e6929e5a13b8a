// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for tillprint-document.
//
// Covers the per-job hot path: decoding and validating a receipt, then
// encoding it to ESC/POS against an in-memory device.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use tillprint_document::{CaptureDevice, Document, DocumentExecutor, EscPosExecutor, PrinterProfile, PrinterService};

/// A typical 20-line receipt with a table, barcode and QR code.
fn receipt() -> serde_json::Value {
    let rows: Vec<Vec<String>> = (1..=20)
        .map(|i| vec![format!("Artículo {i}"), format!("{i}"), format!("{:.2}", f64::from(i) * 1.25)])
        .collect();
    json!({
        "version": "1.0",
        "profile": { "model": "80mm EC-PM-80250", "paper_width": 80 },
        "commands": [
            { "type": "text", "data": { "content": "TIENDA DEMO", "align": "center", "bold": true, "size": 2 } },
            { "type": "separator" },
            { "type": "table", "data": {
                "columns": [
                    { "header": "Producto", "width": 30 },
                    { "header": "Cant", "width": 6, "align": "right" },
                    { "header": "Importe", "width": 10, "align": "right" }
                ],
                "rows": rows
            }},
            { "type": "separator", "data": { "char": "=" } },
            { "type": "barcode", "data": { "symbology": "code128", "data": "TKT-000123" } },
            { "type": "qr", "data": { "data": "https://example.invalid/t/000123", "correction": "Q" } },
            { "type": "cut" }
        ]
    })
}

fn bench_validate(c: &mut Criterion) {
    let payload = receipt();
    c.bench_function("decode_and_validate", |b| {
        b.iter(|| {
            let doc = Document::from_payload(black_box(&payload)).expect("decode");
            black_box(doc.validate()).expect("valid");
        });
    });
}

fn bench_encode(c: &mut Criterion) {
    let doc = Document::from_payload(&receipt()).expect("decode");
    let profile = PrinterProfile::resolve(&doc.profile);
    c.bench_function("encode_receipt", |b| {
        b.iter(|| {
            let mut service = PrinterService::new(profile.clone(), Box::new(CaptureDevice::new("bench")));
            EscPosExecutor.execute(black_box(&doc), &mut service).expect("execute");
            black_box(service.finish().expect("finish"));
        });
    });
}

criterion_group!(benches, bench_validate, bench_encode);
criterion_main!(benches);

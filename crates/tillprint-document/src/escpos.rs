// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ESC/POS byte encoder.
//
// Builds the command stream for a receipt in memory. Nothing here touches a
// device; `PrinterService` owns the buffer and hands it to the device once the
// whole document has been encoded.

use std::str::FromStr;

use crate::raster::RasterImage;

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;

/// Character table selected at initialisation (PC858, Western Europe + euro).
const CODEPAGE_PC858: u8 = 19;

/// Largest payload a model 2 QR symbol can hold (bytes, level L).
pub const QR_MAX_BYTES: usize = 2953;

/// Horizontal alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

impl FromStr for Align {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "left" => Ok(Self::Left),
            "center" | "centre" => Ok(Self::Center),
            "right" => Ok(Self::Right),
            other => Err(format!("invalid alignment: {other}")),
        }
    }
}

/// Paper cut style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CutMode {
    Full,
    #[default]
    Partial,
}

/// QR error correction level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QrLevel {
    L,
    #[default]
    M,
    Q,
    H,
}

impl QrLevel {
    fn code(self) -> u8 {
        match self {
            Self::L => 48,
            Self::M => 49,
            Self::Q => 50,
            Self::H => 51,
        }
    }
}

impl FromStr for QrLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "M" => Ok(Self::M),
            "L" => Ok(Self::L),
            "Q" => Ok(Self::Q),
            "H" => Ok(Self::H),
            other => Err(other.to_string()),
        }
    }
}

/// One-dimensional barcode symbologies (function B of `GS k`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    UpcA,
    UpcE,
    Ean13,
    Ean8,
    Code39,
    Itf,
    Codabar,
    Code93,
    Code128,
}

impl Symbology {
    fn code(self) -> u8 {
        match self {
            Self::UpcA => 65,
            Self::UpcE => 66,
            Self::Ean13 => 67,
            Self::Ean8 => 68,
            Self::Code39 => 69,
            Self::Itf => 70,
            Self::Codabar => 71,
            Self::Code93 => 72,
            Self::Code128 => 73,
        }
    }
}

impl FromStr for Symbology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_uppercase();
        match key.as_str() {
            "UPCA" => Ok(Self::UpcA),
            "UPCE" => Ok(Self::UpcE),
            "EAN13" | "JAN13" => Ok(Self::Ean13),
            "EAN8" | "JAN8" => Ok(Self::Ean8),
            "CODE39" => Ok(Self::Code39),
            "ITF" => Ok(Self::Itf),
            "CODABAR" | "NW7" => Ok(Self::Codabar),
            "CODE93" => Ok(Self::Code93),
            "CODE128" => Ok(Self::Code128),
            _ => Err(format!("unsupported barcode symbology: {s}")),
        }
    }
}

/// Position of the human readable text under/over a barcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HriPosition {
    None,
    Above,
    #[default]
    Below,
    Both,
}

impl FromStr for HriPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "above" => Ok(Self::Above),
            "" | "below" => Ok(Self::Below),
            "both" => Ok(Self::Both),
            other => Err(format!("invalid hri position: {other}")),
        }
    }
}

/// Accumulates ESC/POS commands.
#[derive(Debug, Default)]
pub struct EscPosEncoder {
    buf: Vec<u8>,
}

impl EscPosEncoder {
    /// Encoder whose stream starts with a printer reset and PC858 selected.
    pub fn new() -> Self {
        let mut encoder = Self::default();
        encoder.initialize();
        encoder
    }

    pub fn initialize(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'@', ESC, b't', CODEPAGE_PC858]);
        self
    }

    pub fn align(&mut self, align: Align) -> &mut Self {
        let n = match align {
            Align::Left => 0,
            Align::Center => 1,
            Align::Right => 2,
        };
        self.buf.extend_from_slice(&[ESC, b'a', n]);
        self
    }

    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'E', u8::from(on)]);
        self
    }

    /// Character magnification, 1..=8 in each direction.
    pub fn size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buf.extend_from_slice(&[GS, b'!', (w << 4) | h]);
        self
    }

    /// Text in the printer code page, without a line feed.
    pub fn text(&mut self, text: &str) -> &mut Self {
        self.buf.extend(text.chars().map(encode_char));
        self
    }

    pub fn line(&mut self, text: &str) -> &mut Self {
        self.text(text);
        self.buf.push(LF);
        self
    }

    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'd', lines]);
        self
    }

    /// Feed `feed` dots then cut.
    pub fn cut(&mut self, mode: CutMode, feed: u8) -> &mut Self {
        let m = match mode {
            CutMode::Full => 65,
            CutMode::Partial => 66,
        };
        self.buf.extend_from_slice(&[GS, b'V', m, feed]);
        self
    }

    /// Model 2 QR symbol. `module_size` is clamped to 1..=16.
    pub fn qr(&mut self, data: &[u8], module_size: u8, level: QrLevel) -> &mut Self {
        // GS ( k pL pH cn fn [params]
        self.buf
            .extend_from_slice(&[GS, b'(', b'k', 4, 0, 49, 65, 50, 0]);
        self.buf
            .extend_from_slice(&[GS, b'(', b'k', 3, 0, 49, 67, module_size.clamp(1, 16)]);
        self.buf
            .extend_from_slice(&[GS, b'(', b'k', 3, 0, 49, 69, level.code()]);

        let stored = data.len() + 3;
        self.buf.extend_from_slice(&[
            GS,
            b'(',
            b'k',
            (stored & 0xFF) as u8,
            (stored >> 8) as u8,
            49,
            80,
            48,
        ]);
        self.buf.extend_from_slice(data);
        self.buf
            .extend_from_slice(&[GS, b'(', b'k', 3, 0, 49, 81, 48]);
        self
    }

    /// One-dimensional barcode. Data longer than 255 bytes is truncated.
    pub fn barcode(
        &mut self,
        symbology: Symbology,
        data: &[u8],
        height: u8,
        module_width: u8,
        hri: HriPosition,
    ) -> &mut Self {
        let hri = match hri {
            HriPosition::None => 0,
            HriPosition::Above => 1,
            HriPosition::Below => 2,
            HriPosition::Both => 3,
        };
        self.buf.extend_from_slice(&[GS, b'H', hri]);
        self.buf.extend_from_slice(&[GS, b'h', height.max(1)]);
        self.buf.extend_from_slice(&[GS, b'w', module_width.clamp(2, 6)]);

        let mut payload = Vec::with_capacity(data.len() + 2);
        if symbology == Symbology::Code128 && !data.starts_with(b"{") {
            payload.extend_from_slice(b"{B");
        }
        payload.extend_from_slice(data);
        payload.truncate(255);

        self.buf
            .extend_from_slice(&[GS, b'k', symbology.code(), payload.len() as u8]);
        self.buf.extend_from_slice(&payload);
        self
    }

    /// Print a 1-bit raster image (`GS v 0`, normal density).
    pub fn raster(&mut self, image: &RasterImage) -> &mut Self {
        let x = image.width_bytes;
        let y = image.height;
        self.buf.extend_from_slice(&[
            GS,
            b'v',
            b'0',
            0,
            (x & 0xFF) as u8,
            (x >> 8) as u8,
            (y & 0xFF) as u8,
            (y >> 8) as u8,
        ]);
        self.buf.extend_from_slice(&image.data);
        self
    }

    /// Bytes passed through unchanged.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the encoded stream, leaving the encoder empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Map a character to PC858. Unmappable characters print as `?`.
fn encode_char(c: char) -> u8 {
    if c.is_ascii() {
        return c as u8;
    }
    match c {
        'á' => 0xA0,
        'é' => 0x82,
        'í' => 0xA1,
        'ó' => 0xA2,
        'ú' => 0xA3,
        'ñ' => 0xA4,
        'Ñ' => 0xA5,
        'ü' => 0x81,
        'Ü' => 0x9A,
        '¿' => 0xA8,
        '¡' => 0xAD,
        'É' => 0x90,
        'Á' => 0xB5,
        'Í' => 0xD6,
        'Ó' => 0xE0,
        'Ú' => 0xE9,
        '€' => 0xD5,
        _ => b'?',
    }
}

//! Shared wire-level types: device ids, scalar values, media format codes.
use std::fmt;

use crate::error::EncodeError;

/// Raw byte width of a device id on the wire.
pub const DEVICE_ID_LEN: usize = 4;
/// Raw byte width of a timestamp on the wire (48-bit milliseconds).
pub const TIMESTAMP_LEN: usize = 6;
/// Largest value a 6-byte timestamp can carry.
pub const MAX_TIMESTAMP: u64 = (1 << 48) - 1;
/// Names at or above this length decode fine but emit a warning.
pub const MAX_NAME_LEN: usize = 32;

/// 4-byte opaque device identifier, rendered as 8 lowercase hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId([u8; DEVICE_ID_LEN]);

impl DeviceId {
    pub fn new(raw: [u8; DEVICE_ID_LEN]) -> Self {
        Self(raw)
    }

    /// Parse the 8-hex-char textual form. Anything else is rejected.
    pub fn from_hex(s: &str) -> Result<Self, EncodeError> {
        if s.len() != DEVICE_ID_LEN * 2 || !s.is_ascii() {
            return Err(EncodeError::BadDeviceId);
        }
        let mut raw = [0u8; DEVICE_ID_LEN];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| EncodeError::BadDeviceId)?;
        }
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> [u8; DEVICE_ID_LEN] {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Scalar payload of a static entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f32),
    Int(i32),
    Text(String),
}

impl Value {
    /// Wire size of the payload, used by cache byte accounting.
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Float(_) | Value::Int(_) => 4,
            Value::Text(s) => s.len(),
        }
    }
}

/// Audio stream encoding, from the 3-byte ASCII code of an AUD-init frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFormat {
    Pcm,
    Mp3,
    Aac,
    Unknown(String),
}

impl AudioFormat {
    /// Map a 3-byte code to a format. Unknown codes are preserved, not errors.
    pub fn from_code(code: &str) -> Self {
        match code {
            "PCM" => AudioFormat::Pcm,
            "MP3" => AudioFormat::Mp3,
            "AAC" => AudioFormat::Aac,
            other => AudioFormat::Unknown(other.to_string()),
        }
    }

    /// The 3-byte code this format travels as.
    pub fn wire_code(&self) -> Result<[u8; 3], EncodeError> {
        let code = match self {
            AudioFormat::Pcm => "PCM",
            AudioFormat::Mp3 => "MP3",
            AudioFormat::Aac => "AAC",
            AudioFormat::Unknown(code) => code.as_str(),
        };
        code_bytes(code)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Pcm => write!(f, "PCM"),
            AudioFormat::Mp3 => write!(f, "MP3"),
            AudioFormat::Aac => write!(f, "AAC"),
            AudioFormat::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}

/// Image pixel layout, from the 3-byte ASCII code of an IMG-init frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb565,
    Rgb888,
    Grayscale8,
    Binary1,
    Unknown(String),
}

impl PixelFormat {
    pub fn from_code(code: &str) -> Self {
        match code {
            "565" => PixelFormat::Rgb565,
            "888" => PixelFormat::Rgb888,
            "GS8" => PixelFormat::Grayscale8,
            "BIN" => PixelFormat::Binary1,
            other => PixelFormat::Unknown(other.to_string()),
        }
    }

    pub fn wire_code(&self) -> Result<[u8; 3], EncodeError> {
        let code = match self {
            PixelFormat::Rgb565 => "565",
            PixelFormat::Rgb888 => "888",
            PixelFormat::Grayscale8 => "GS8",
            PixelFormat::Binary1 => "BIN",
            PixelFormat::Unknown(code) => code.as_str(),
        };
        code_bytes(code)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Rgb565 => write!(f, "RGB565"),
            PixelFormat::Rgb888 => write!(f, "RGB888"),
            PixelFormat::Grayscale8 => write!(f, "Grayscale8"),
            PixelFormat::Binary1 => write!(f, "Binary1"),
            PixelFormat::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}

fn code_bytes(code: &str) -> Result<[u8; 3], EncodeError> {
    let bytes = code.as_bytes();
    if bytes.len() != 3 || !code.is_ascii() {
        return Err(EncodeError::BadFormatCode);
    }
    Ok([bytes[0], bytes[1], bytes[2]])
}

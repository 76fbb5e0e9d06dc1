//! Frame header parsing, decoder dispatch and the decoded-frame envelope.
//!
//! The dispatch table is closed: every known `(channel, port, decode)` triple
//! is enumerated here, and adding a frame type is a code change.
use crate::error::DecodeError;
use crate::packet;
use crate::registry::UidRegistry;
use crate::types::{AudioFormat, DeviceId, PixelFormat, Value};

/// Fixed wire header length: `channel | port | decode | length`, 1 byte each.
pub const HEADER_LEN: usize = 4;

/// The `(channel, port, decode)` triple that selects a decoder.
pub type DispatchKey = (u8, u8, u8);

/// Parsed 4-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: u8,
    pub port: u8,
    pub decode: u8,
    /// Declared payload length; informational only, decoders own their own
    /// length checks.
    pub length: u8,
}

impl FrameHeader {
    /// Parse the leading header. Returns `None` for datagrams shorter than
    /// the header itself.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            channel: data[0],
            port: data[1],
            decode: data[2],
            length: data[3],
        })
    }

    pub fn key(&self) -> DispatchKey {
        (self.channel, self.port, self.decode)
    }
}

/// Which cache operation a decoded frame triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowClass {
    Static,
    Init,
    Stream,
}

/// Every frame type the dispatcher knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Find,
    Heartbeat,
    Stop,
    Sensor,
    Float,
    Int,
    Str,
    TextInit,
    AudioInit,
    ImageInit,
    TextChunk,
    AudioChunk,
    ImageChunk,
}

impl FrameType {
    /// Dispatch table lookup. Unknown triples have no decoder and the caller
    /// drops the datagram.
    pub fn lookup(key: DispatchKey) -> Option<(FrameType, FlowClass)> {
        use FlowClass::*;
        use FrameType::*;
        match key {
            (0x00, 0x00, 0x00) => Some((Find, Static)),
            (0x00, 0x00, 0x01) => Some((Heartbeat, Static)),
            (0x00, 0x00, 0x02) => Some((Stop, Static)),
            (0x00, 0x00, 0x03) => Some((Sensor, Static)),
            (0x01, 0x00, 0x10) => Some((Float, Static)),
            (0x01, 0x00, 0x11) => Some((Int, Static)),
            (0x01, 0x00, 0x12) => Some((Str, Static)),
            (0x01, 0x00, 0x13) => Some((TextInit, Init)),
            (0x01, 0x00, 0x14) => Some((AudioInit, Init)),
            (0x01, 0x00, 0x15) => Some((ImageInit, Init)),
            (0x01, 0x01, 0x13) => Some((TextChunk, Stream)),
            (0x01, 0x01, 0x14) => Some((AudioChunk, Stream)),
            (0x01, 0x01, 0x15) => Some((ImageChunk, Stream)),
            _ => None,
        }
    }
}

/// Type-specific part of a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Control traffic (FIN/HEA/STO/SEN) carries no value payload.
    Control,
    Scalar(Value),
    TextInit {
        stream_length: u32,
    },
    AudioInit {
        format: AudioFormat,
        sample_rate: u32,
        bit_depth: u8,
        channels: u8,
    },
    ImageInit {
        format: PixelFormat,
        width: u16,
        height: u16,
    },
    Chunk {
        chunk_id: u32,
        data: Vec<u8>,
    },
}

/// Uniform envelope every decoder produces: identity, route for the
/// republisher, and the type-specific body.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub id: DeviceId,
    pub uid: Option<u32>,
    pub name: Option<String>,
    pub timestamp: u64,
    pub route: String,
    pub body: Body,
}

/// Run the selected decoder over a payload. SEN is the one decoder with a
/// side effect: it resolves (and if needed assigns) the sensor's uid.
pub fn decode_frame(
    ty: FrameType,
    payload: &[u8],
    registry: &UidRegistry,
) -> Result<Decoded, DecodeError> {
    match ty {
        FrameType::Find => {
            let p = packet::Find::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: None,
                name: Some(p.name),
                timestamp: p.timestamp,
                route: "nar/device/find".to_string(),
                body: Body::Control,
            })
        }
        FrameType::Heartbeat => {
            let p = packet::Heartbeat::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: None,
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/heartbeat", p.id),
                body: Body::Control,
            })
        }
        FrameType::Stop => {
            let p = packet::Stop::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: None,
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/stop", p.id),
                body: Body::Control,
            })
        }
        FrameType::Sensor => {
            let p = packet::Sensor::decode(payload)?;
            let uid = registry.uid_for(p.id, &p.name);
            Ok(Decoded {
                id: p.id,
                uid: Some(uid),
                name: Some(p.name),
                timestamp: p.timestamp,
                route: format!("nar/device/{}/register", p.id),
                body: Body::Control,
            })
        }
        FrameType::Float => {
            let p = packet::FloatValue::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: Some(p.uid),
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/{}/static", p.id, p.uid),
                body: Body::Scalar(Value::Float(p.value)),
            })
        }
        FrameType::Int => {
            let p = packet::IntValue::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: Some(p.uid),
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/{}/static", p.id, p.uid),
                body: Body::Scalar(Value::Int(p.value)),
            })
        }
        FrameType::Str => {
            let p = packet::StrValue::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: Some(p.uid),
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/{}/static", p.id, p.uid),
                body: Body::Scalar(Value::Text(p.value)),
            })
        }
        FrameType::TextInit => {
            let p = packet::TextInit::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: Some(p.uid),
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/{}/streamstr", p.id, p.uid),
                body: Body::TextInit {
                    stream_length: p.stream_length,
                },
            })
        }
        FrameType::AudioInit => {
            let p = packet::AudioInit::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: Some(p.uid),
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/{}/audio", p.id, p.uid),
                body: Body::AudioInit {
                    format: p.format,
                    sample_rate: p.sample_rate,
                    bit_depth: p.bit_depth,
                    channels: p.channels,
                },
            })
        }
        FrameType::ImageInit => {
            let p = packet::ImageInit::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: Some(p.uid),
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/{}/img", p.id, p.uid),
                body: Body::ImageInit {
                    format: p.format,
                    width: p.width,
                    height: p.height,
                },
            })
        }
        FrameType::TextChunk => {
            let p = packet::TextChunk::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: Some(p.uid),
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/{}/streamstr/chunk", p.id, p.uid),
                body: Body::Chunk {
                    chunk_id: p.chunk_index,
                    data: p.value.into_bytes(),
                },
            })
        }
        FrameType::AudioChunk => {
            let p = packet::AudioChunk::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: Some(p.uid),
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/{}/audio/chunk", p.id, p.uid),
                body: Body::Chunk {
                    chunk_id: p.chunk_index,
                    data: p.data,
                },
            })
        }
        FrameType::ImageChunk => {
            let p = packet::ImageChunk::decode(payload)?;
            Ok(Decoded {
                id: p.id,
                uid: Some(p.uid),
                name: None,
                timestamp: p.timestamp,
                route: format!("nar/device/{}/{}/img/chunk", p.id, p.uid),
                body: Body::Chunk {
                    chunk_id: p.chunk_index,
                    data: p.data,
                },
            })
        }
    }
}

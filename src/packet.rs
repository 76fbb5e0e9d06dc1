//! Binary payload codec: one decoder/encoder pair per frame type.
//!
//! All multi-byte fields are big-endian. Decoders consume the payload that
//! follows the 4-byte frame header and fail with [`DecodeError::Truncated`]
//! when any field would read past end-of-buffer; encoders mirror the exact
//! wire layout so `decode(encode(x)) == x` for every well-formed `x`.
use log::warn;

use crate::error::{DecodeError, EncodeError};
use crate::types::{
    AudioFormat, DeviceId, PixelFormat, DEVICE_ID_LEN, MAX_NAME_LEN, MAX_TIMESTAMP, TIMESTAMP_LEN,
};

/// Cursor over a received payload; every read is length-checked.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < self.pos + n {
            return Err(DecodeError::Truncated);
        }
        let segment = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(segment)
    }

    fn device_id(&mut self) -> Result<DeviceId, DecodeError> {
        let raw = self.take(DEVICE_ID_LEN)?;
        Ok(DeviceId::new([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// 6 bytes, zero-extended into a u64 millisecond timestamp.
    fn timestamp(&mut self) -> Result<u64, DecodeError> {
        let raw = self.take(TIMESTAMP_LEN)?;
        Ok(u64::from_be_bytes([
            0, 0, raw[0], raw[1], raw[2], raw[3], raw[4], raw[5],
        ]))
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        let raw = self.take(4)?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        let raw = self.take(4)?;
        Ok(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn str(&mut self, len: usize) -> Result<String, DecodeError> {
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::BadUtf8)
    }

    /// Length-prefixed (1 byte) UTF-8 name. Oversize names only warn.
    fn name(&mut self) -> Result<String, DecodeError> {
        let len = self.u8()? as usize;
        if len >= MAX_NAME_LEN {
            warn!("name length {len} exceeds max expected {MAX_NAME_LEN}");
        }
        self.str(len)
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.take(len)?.to_vec())
    }

    /// 3-byte ASCII format code.
    fn format_code(&mut self) -> Result<String, DecodeError> {
        let raw = self.take(3)?;
        if !raw.is_ascii() {
            return Err(DecodeError::BadFormatCode);
        }
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::BadFormatCode)
    }
}

/// Growing buffer for outbound payloads; writes mirror the reader layouts.
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn device_id(&mut self, id: &DeviceId) {
        self.buf.extend_from_slice(&id.as_bytes());
    }

    fn timestamp(&mut self, ts: u64) -> Result<(), EncodeError> {
        if ts > MAX_TIMESTAMP {
            return Err(EncodeError::TimestampOverflow);
        }
        self.buf.extend_from_slice(&ts.to_be_bytes()[2..8]);
        Ok(())
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// 1-byte length prefix, then UTF-8 bytes.
    fn prefixed_str(&mut self, s: &str) -> Result<(), EncodeError> {
        let len = s.len();
        if len > u8::MAX as usize {
            return Err(EncodeError::LengthOverflow { len, max: u8::MAX as usize });
        }
        self.buf.push(len as u8);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// 4-byte length prefix, then raw bytes.
    fn prefixed_bytes(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        let len = u32::try_from(data.len()).map_err(|_| EncodeError::LengthOverflow {
            len: data.len(),
            max: u32::MAX as usize,
        })?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn format_code(&mut self, code: [u8; 3]) {
        self.buf.extend_from_slice(&code);
    }
}

/// Device announcement (FIN): `id | ts | name_len | name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Find {
    pub id: DeviceId,
    pub timestamp: u64,
    pub name: String,
}

impl Find {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            id: r.device_id()?,
            timestamp: r.timestamp()?,
            name: r.name()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.prefixed_str(&self.name)?;
        Ok(w.into_bytes())
    }
}

/// Heartbeat (HEA): `id | ts`.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub id: DeviceId,
    pub timestamp: u64,
}

impl Heartbeat {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            id: r.device_id()?,
            timestamp: r.timestamp()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        Ok(w.into_bytes())
    }
}

/// Device stop (STO): `id | ts`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: DeviceId,
    pub timestamp: u64,
}

impl Stop {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            id: r.device_id()?,
            timestamp: r.timestamp()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        Ok(w.into_bytes())
    }
}

/// Sensor registration (SEN): `id | ts | name_len | sensor_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub id: DeviceId,
    pub timestamp: u64,
    pub name: String,
}

impl Sensor {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            id: r.device_id()?,
            timestamp: r.timestamp()?,
            name: r.name()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.prefixed_str(&self.name)?;
        Ok(w.into_bytes())
    }
}

/// Float reading (FLO): `id | ts | uid | f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatValue {
    pub id: DeviceId,
    pub timestamp: u64,
    pub uid: u32,
    pub value: f32,
}

impl FloatValue {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            id: r.device_id()?,
            timestamp: r.timestamp()?,
            uid: r.u32()?,
            value: r.f32()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.u32(self.uid);
        w.f32(self.value);
        Ok(w.into_bytes())
    }
}

/// Integer reading (INT): `id | ts | uid | i32`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntValue {
    pub id: DeviceId,
    pub timestamp: u64,
    pub uid: u32,
    pub value: i32,
}

impl IntValue {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            id: r.device_id()?,
            timestamp: r.timestamp()?,
            uid: r.u32()?,
            value: r.i32()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.u32(self.uid);
        w.i32(self.value);
        Ok(w.into_bytes())
    }
}

/// String reading (STR): `id | ts | uid | str_len | str`.
#[derive(Debug, Clone, PartialEq)]
pub struct StrValue {
    pub id: DeviceId,
    pub timestamp: u64,
    pub uid: u32,
    pub value: String,
}

impl StrValue {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let id = r.device_id()?;
        let timestamp = r.timestamp()?;
        let uid = r.u32()?;
        let len = r.u8()? as usize;
        Ok(Self {
            id,
            timestamp,
            uid,
            value: r.str(len)?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.u32(self.uid);
        w.prefixed_str(&self.value)?;
        Ok(w.into_bytes())
    }
}

/// Text stream setup (FLT-init): `id | ts | uid | stream_length`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextInit {
    pub id: DeviceId,
    pub timestamp: u64,
    pub uid: u32,
    pub stream_length: u32,
}

impl TextInit {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            id: r.device_id()?,
            timestamp: r.timestamp()?,
            uid: r.u32()?,
            stream_length: r.u32()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.u32(self.uid);
        w.u32(self.stream_length);
        Ok(w.into_bytes())
    }
}

/// Text stream chunk (FLT): `id | ts | uid | str_len | str | chunk_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub id: DeviceId,
    pub timestamp: u64,
    pub uid: u32,
    pub value: String,
    pub chunk_index: u32,
}

impl TextChunk {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let id = r.device_id()?;
        let timestamp = r.timestamp()?;
        let uid = r.u32()?;
        let len = r.u8()? as usize;
        let value = r.str(len)?;
        Ok(Self {
            id,
            timestamp,
            uid,
            value,
            chunk_index: r.u32()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.u32(self.uid);
        w.prefixed_str(&self.value)?;
        w.u32(self.chunk_index);
        Ok(w.into_bytes())
    }
}

/// Audio stream setup (AUD-init):
/// `id | ts | uid | format | sample_rate | bit_depth | channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInit {
    pub id: DeviceId,
    pub timestamp: u64,
    pub uid: u32,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub bit_depth: u8,
    pub channels: u8,
}

impl AudioInit {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            id: r.device_id()?,
            timestamp: r.timestamp()?,
            uid: r.u32()?,
            format: AudioFormat::from_code(&r.format_code()?),
            sample_rate: r.u32()?,
            bit_depth: r.u8()?,
            channels: r.u8()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.u32(self.uid);
        w.format_code(self.format.wire_code()?);
        w.u32(self.sample_rate);
        w.u8(self.bit_depth);
        w.u8(self.channels);
        Ok(w.into_bytes())
    }
}

/// Audio chunk (AUD): `id | ts | uid | chunk_size | chunk_bytes | chunk_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub id: DeviceId,
    pub timestamp: u64,
    pub uid: u32,
    pub data: Vec<u8>,
    pub chunk_index: u32,
}

impl AudioChunk {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let id = r.device_id()?;
        let timestamp = r.timestamp()?;
        let uid = r.u32()?;
        let size = r.u32()? as usize;
        let data = r.bytes(size)?;
        Ok(Self {
            id,
            timestamp,
            uid,
            data,
            chunk_index: r.u32()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.u32(self.uid);
        w.prefixed_bytes(&self.data)?;
        w.u32(self.chunk_index);
        Ok(w.into_bytes())
    }
}

/// Image stream setup (IMG-init): `id | ts | uid | format | width | height`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInit {
    pub id: DeviceId,
    pub timestamp: u64,
    pub uid: u32,
    pub format: PixelFormat,
    pub width: u16,
    pub height: u16,
}

impl ImageInit {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            id: r.device_id()?,
            timestamp: r.timestamp()?,
            uid: r.u32()?,
            format: PixelFormat::from_code(&r.format_code()?),
            width: r.u16()?,
            height: r.u16()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.u32(self.uid);
        w.format_code(self.format.wire_code()?);
        w.u16(self.width);
        w.u16(self.height);
        Ok(w.into_bytes())
    }
}

/// Image chunk (IMG): `id | ts | uid | chunk_size | chunk_bytes | chunk_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageChunk {
    pub id: DeviceId,
    pub timestamp: u64,
    pub uid: u32,
    pub data: Vec<u8>,
    pub chunk_index: u32,
}

impl ImageChunk {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let id = r.device_id()?;
        let timestamp = r.timestamp()?;
        let uid = r.u32()?;
        let size = r.u32()? as usize;
        let data = r.bytes(size)?;
        Ok(Self {
            id,
            timestamp,
            uid,
            data,
            chunk_index: r.u32()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.device_id(&self.id);
        w.timestamp(self.timestamp)?;
        w.u32(self.uid);
        w.prefixed_bytes(&self.data)?;
        w.u32(self.chunk_index);
        Ok(w.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id() -> DeviceId {
        DeviceId::from_hex("01020304").unwrap()
    }

    #[test]
    fn find_encodes_to_literal_bytes() {
        let frame = Find {
            id: id(),
            timestamp: 1000,
            name: "dev".into(),
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x01, 0x02, 0x03, 0x04, // id
                0x00, 0x00, 0x00, 0x00, 0x03, 0xe8, // ts = 1000
                0x03, // name length
                0x64, 0x65, 0x76, // "dev"
            ]
        );
        assert_eq!(Find::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn round_trips_for_every_type() {
        let find = Find { id: id(), timestamp: 1, name: "a".into() };
        assert_eq!(Find::decode(&find.encode().unwrap()).unwrap(), find);

        let hea = Heartbeat { id: id(), timestamp: MAX_TIMESTAMP };
        assert_eq!(Heartbeat::decode(&hea.encode().unwrap()).unwrap(), hea);

        let sto = Stop { id: id(), timestamp: 0 };
        assert_eq!(Stop::decode(&sto.encode().unwrap()).unwrap(), sto);

        let sen = Sensor { id: id(), timestamp: 7, name: "temp".into() };
        assert_eq!(Sensor::decode(&sen.encode().unwrap()).unwrap(), sen);

        let flo = FloatValue { id: id(), timestamp: 8, uid: 3, value: -2.25 };
        assert_eq!(FloatValue::decode(&flo.encode().unwrap()).unwrap(), flo);

        let int = IntValue { id: id(), timestamp: 8, uid: 3, value: -40 };
        assert_eq!(IntValue::decode(&int.encode().unwrap()).unwrap(), int);

        let sv = StrValue { id: id(), timestamp: 8, uid: 3, value: "ok".into() };
        assert_eq!(StrValue::decode(&sv.encode().unwrap()).unwrap(), sv);

        let ti = TextInit { id: id(), timestamp: 9, uid: 4, stream_length: 12 };
        assert_eq!(TextInit::decode(&ti.encode().unwrap()).unwrap(), ti);

        let tc = TextChunk {
            id: id(),
            timestamp: 9,
            uid: 4,
            value: "chunk".into(),
            chunk_index: 2,
        };
        assert_eq!(TextChunk::decode(&tc.encode().unwrap()).unwrap(), tc);

        let ai = AudioInit {
            id: id(),
            timestamp: 10,
            uid: 5,
            format: AudioFormat::Pcm,
            sample_rate: 16_000,
            bit_depth: 16,
            channels: 2,
        };
        assert_eq!(AudioInit::decode(&ai.encode().unwrap()).unwrap(), ai);

        let ac = AudioChunk {
            id: id(),
            timestamp: 10,
            uid: 5,
            data: vec![0x00, 0xff, 0x7f],
            chunk_index: 6,
        };
        assert_eq!(AudioChunk::decode(&ac.encode().unwrap()).unwrap(), ac);

        let ii = ImageInit {
            id: id(),
            timestamp: 11,
            uid: 6,
            format: PixelFormat::Rgb565,
            width: 320,
            height: 240,
        };
        assert_eq!(ImageInit::decode(&ii.encode().unwrap()).unwrap(), ii);

        let ic = ImageChunk {
            id: id(),
            timestamp: 11,
            uid: 6,
            data: vec![1, 2, 3, 4],
            chunk_index: 0,
        };
        assert_eq!(ImageChunk::decode(&ic.encode().unwrap()).unwrap(), ic);
    }

    #[test]
    fn one_byte_short_is_truncated() {
        let frames: Vec<Vec<u8>> = vec![
            Find { id: id(), timestamp: 1, name: "dev".into() }.encode().unwrap(),
            Heartbeat { id: id(), timestamp: 1 }.encode().unwrap(),
            FloatValue { id: id(), timestamp: 1, uid: 2, value: 0.5 }.encode().unwrap(),
            StrValue { id: id(), timestamp: 1, uid: 2, value: "xy".into() }.encode().unwrap(),
            AudioInit {
                id: id(),
                timestamp: 1,
                uid: 2,
                format: AudioFormat::Aac,
                sample_rate: 8000,
                bit_depth: 8,
                channels: 1,
            }
            .encode()
            .unwrap(),
            ImageChunk { id: id(), timestamp: 1, uid: 2, data: vec![9], chunk_index: 1 }
                .encode()
                .unwrap(),
        ];
        assert_eq!(Find::decode(&frames[0][..frames[0].len() - 1]), Err(DecodeError::Truncated));
        assert_eq!(
            Heartbeat::decode(&frames[1][..frames[1].len() - 1]),
            Err(DecodeError::Truncated)
        );
        assert_eq!(
            FloatValue::decode(&frames[2][..frames[2].len() - 1]),
            Err(DecodeError::Truncated)
        );
        assert_eq!(
            StrValue::decode(&frames[3][..frames[3].len() - 1]),
            Err(DecodeError::Truncated)
        );
        assert_eq!(
            AudioInit::decode(&frames[4][..frames[4].len() - 1]),
            Err(DecodeError::Truncated)
        );
        assert_eq!(
            ImageChunk::decode(&frames[5][..frames[5].len() - 1]),
            Err(DecodeError::Truncated)
        );
    }

    #[test]
    fn empty_payload_is_truncated() {
        assert_eq!(Heartbeat::decode(&[]), Err(DecodeError::Truncated));
    }

    #[test]
    fn name_length_boundaries() {
        for len in [0usize, 32, 255] {
            let frame = Sensor {
                id: id(),
                timestamp: 1,
                name: "n".repeat(len),
            };
            let decoded = Sensor::decode(&frame.encode().unwrap()).unwrap();
            assert_eq!(decoded.name.len(), len);
        }
    }

    #[test]
    fn oversize_name_is_rejected_on_encode() {
        let frame = Sensor {
            id: id(),
            timestamp: 1,
            name: "n".repeat(256),
        };
        assert_eq!(
            frame.encode(),
            Err(EncodeError::LengthOverflow { len: 256, max: 255 })
        );
    }

    #[test]
    fn oversize_timestamp_is_rejected_on_encode() {
        let frame = Heartbeat {
            id: id(),
            timestamp: MAX_TIMESTAMP + 1,
        };
        assert_eq!(frame.encode(), Err(EncodeError::TimestampOverflow));
    }

    #[test]
    fn unknown_format_code_survives_decode() {
        let init = AudioInit {
            id: id(),
            timestamp: 5,
            uid: 1,
            format: AudioFormat::Unknown("OGG".into()),
            sample_rate: 44_100,
            bit_depth: 24,
            channels: 1,
        };
        let decoded = AudioInit::decode(&init.encode().unwrap()).unwrap();
        assert_eq!(decoded.format, AudioFormat::Unknown("OGG".into()));
    }
}

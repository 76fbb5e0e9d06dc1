//! UDP telemetry ingest and cache layer.
//!
//! Devices on the local network announce themselves, heart-beat, emit scalar
//! readings and stream larger payloads (text, audio, images) in ordered
//! chunks over a compact binary framing. This crate owns the ingest side:
//! header parsing, decoder dispatch, per-type codecs, sequenced chunk
//! reassembly and the two bounded caches downstream consumers (an HTTP API,
//! an MQTT republisher) snapshot for the latest device state.
pub mod buffers;
pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod image;
pub mod manager;
pub mod net;
pub mod packet;
pub mod protocol;
pub mod registry;
pub mod types;

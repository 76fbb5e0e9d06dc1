//! End-to-end ingest: real datagrams against a live driver, observed through
//! the manager's read surface.
use std::time::Duration;

use telemetry_hub::config::UdpConfig;
use telemetry_hub::image::decode_image;
use telemetry_hub::manager::{CacheHit, DriverManager};
use telemetry_hub::net::PortPool;
use telemetry_hub::packet;
use telemetry_hub::registry::UidRegistry;
use telemetry_hub::types::{DeviceId, PixelFormat, Value};

fn frame(channel: u8, port: u8, decode: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = vec![channel, port, decode, payload.len() as u8];
    out.extend_from_slice(&payload);
    out
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

fn manager(range: (u16, u16)) -> DriverManager {
    let cfg = UdpConfig {
        listen_ip: "127.0.0.1".to_string(),
        listen_port_range: range,
        ..Default::default()
    };
    DriverManager::new(cfg, PortPool::new(), UidRegistry::new())
}

#[tokio::test(flavor = "multi_thread")]
async fn scalar_and_text_stream_pipeline() {
    let manager = manager((45100, 45110));
    let (driver_id, driver) = manager.create().await.unwrap();
    manager.select(&driver_id).unwrap();

    let sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = format!("127.0.0.1:{}", driver.port);
    let id = DeviceId::from_hex("01020304").unwrap();

    // scalar float reading
    let flo = packet::FloatValue { id, timestamp: 1000, uid: 11, value: 3.5 }
        .encode()
        .unwrap();
    sock.send_to(&frame(0x01, 0x00, 0x10, flo), &target).await.unwrap();

    // text stream: init, then ordered chunks (one at a time, since parallel
    // decode workers may otherwise publish them out of order)
    let init = packet::TextInit { id, timestamp: 1000, uid: 7, stream_length: 3 }
        .encode()
        .unwrap();
    sock.send_to(&frame(0x01, 0x00, 0x13, init), &target).await.unwrap();
    wait_for(|| manager.list_stream().contains_key(&7)).await;

    for (i, text) in ["a", "b", "c"].iter().enumerate() {
        let chunk = packet::TextChunk {
            id,
            timestamp: 1000,
            uid: 7,
            value: (*text).to_string(),
            chunk_index: i as u32,
        }
        .encode()
        .unwrap();
        sock.send_to(&frame(0x01, 0x01, 0x13, chunk), &target).await.unwrap();
        wait_for(|| {
            manager
                .list_stream()
                .get(&7)
                .map(|e| e.buffer.expected_next() as usize == i + 1)
                .unwrap_or(false)
        })
        .await;
    }

    // orphan chunk (no init for uid 9) and a sub-header datagram
    let orphan = packet::TextChunk {
        id,
        timestamp: 1000,
        uid: 9,
        value: "x".to_string(),
        chunk_index: 0,
    }
    .encode()
    .unwrap();
    sock.send_to(&frame(0x01, 0x01, 0x13, orphan), &target).await.unwrap();
    sock.send_to(&[0x01, 0x00], &target).await.unwrap();

    wait_for(|| manager.get_by_uid(11).is_some()).await;
    match manager.get_by_uid(11).unwrap() {
        CacheHit::Static(entry) => {
            assert_eq!(entry.data, Value::Float(3.5));
            assert_eq!(entry.timestamp, 1000);
            assert_eq!(entry.route, "nar/device/01020304/11/static");
        }
        CacheHit::Stream(_) => panic!("uid 11 should resolve to a static entry"),
    }

    let streams = manager.list_stream();
    assert!(streams[&7].buffer.is_done());
    assert_eq!(manager.full_bytes(7), Some(b"abc".to_vec()));
    assert!(!streams.contains_key(&9));

    manager.stop_all().await;
    assert!(manager.list().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn image_stream_reassembles_into_pixels() {
    let manager = manager((45120, 45125));
    let (driver_id, driver) = manager.create().await.unwrap();
    manager.select(&driver_id).unwrap();

    let sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = format!("127.0.0.1:{}", driver.port);
    let id = DeviceId::from_hex("0a0b0c0d").unwrap();

    let init = packet::ImageInit {
        id,
        timestamp: 2000,
        uid: 21,
        format: PixelFormat::Rgb565,
        width: 2,
        height: 1,
    }
    .encode()
    .unwrap();
    sock.send_to(&frame(0x01, 0x00, 0x15, init), &target).await.unwrap();
    wait_for(|| manager.list_stream().contains_key(&21)).await;

    // two pixels: pure red, pure green
    for (i, data) in [vec![0xf8u8, 0x00], vec![0x07u8, 0xe0]].into_iter().enumerate() {
        let chunk = packet::ImageChunk {
            id,
            timestamp: 2000,
            uid: 21,
            data,
            chunk_index: i as u32,
        }
        .encode()
        .unwrap();
        sock.send_to(&frame(0x01, 0x01, 0x15, chunk), &target).await.unwrap();
        wait_for(|| {
            manager
                .list_stream()
                .get(&21)
                .map(|e| e.buffer.expected_next() as usize == i + 1)
                .unwrap_or(false)
        })
        .await;
    }

    let streams = manager.list_stream();
    let img = decode_image(&streams[&21]).unwrap();
    assert_eq!(img.format, "RGB");
    assert_eq!((img.width, img.height), (2, 1));
    assert_eq!(img.data, vec![0xff, 0x00, 0x00, 0x00, 0xff, 0x00]);

    manager.stop_all().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn sensor_registration_assigns_stable_uids() {
    let manager = manager((45130, 45135));
    let (driver_id, driver) = manager.create().await.unwrap();
    manager.select(&driver_id).unwrap();

    let sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = format!("127.0.0.1:{}", driver.port);
    let id = DeviceId::from_hex("01020304").unwrap();

    let sen = packet::Sensor { id, timestamp: 1, name: "imu".to_string() }
        .encode()
        .unwrap();
    sock.send_to(&frame(0x00, 0x00, 0x03, sen.clone()), &target).await.unwrap();
    wait_for(|| !manager.list_static().is_empty()).await;

    let first: Vec<u32> = manager.list_static().keys().copied().collect();
    assert_eq!(first.len(), 1);

    // the same registration again maps to the same uid
    sock.send_to(&frame(0x00, 0x00, 0x03, sen), &target).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second: Vec<u32> = manager.list_static().keys().copied().collect();
    assert_eq!(first, second);

    manager.stop_all().await;
}

//! Exercises the connection driver against a scripted in-memory peer.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use wirecheck::verify::{verify_connection_error, verify_ping_frame};
use wirecheck::{Config, Conn, ErrorC, Event, EventT};
use wirecheck_h2_parse::{
    Frame, FrameType, GoAway, KnownErrorCode, PingFlags, SettingPairs, Setting, SettingsFlags,
    StreamId, WindowUpdate, PREFACE,
};

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        timeout: Duration::from_millis(250),
        ..Default::default()
    })
}

fn conn_pair(config: Arc<Config>) -> (Conn, DuplexStream) {
    let (client_io, server_io) = tokio::io::duplex(65536);
    (Conn::new(config, Box::new(client_io)), server_io)
}

fn frame_bytes(frame: Frame, payload: &[u8]) -> Vec<u8> {
    let mut buf = frame.with_len(payload.len() as u32).to_vec();
    buf.extend_from_slice(payload);
    buf
}

fn ping_bytes(ack: bool, data: [u8; 8]) -> Vec<u8> {
    let flags = if ack {
        PingFlags::Ack.into()
    } else {
        Default::default()
    };
    frame_bytes(
        Frame::new(FrameType::Ping(flags), StreamId::CONNECTION),
        &data,
    )
}

fn goaway_bytes(code: KnownErrorCode) -> Vec<u8> {
    let goaway = GoAway {
        reserved: 0,
        last_stream_id: StreamId(0),
        error_code: code.into(),
        additional_debug_data: Vec::new(),
    };
    frame_bytes(
        Frame::new(FrameType::GoAway, StreamId::CONNECTION),
        &goaway.to_vec(),
    )
}

#[tokio::test]
async fn handshake_sends_preface_then_settings_and_acks_the_peers() {
    let (mut conn, mut server) = conn_pair(test_config());

    let (handshake_res, ()) = tokio::join!(conn.handshake(), async {
        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface[..], PREFACE);

        // the client's own settings come right behind the preface
        let mut header = [0u8; 9];
        server.read_exact(&mut header).await.unwrap();
        assert_eq!(header[3], 0x04, "expected a SETTINGS frame");
        assert_eq!(header[4], 0x00, "client settings must not be an ack");
        let len = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        let mut payload = vec![0u8; len];
        server.read_exact(&mut payload).await.unwrap();

        // server settings advertising a larger frame size
        let pairs = [(Setting::MaxFrameSize, 20000u32)];
        let bytes = frame_bytes(
            Frame::new(FrameType::Settings(Default::default()), StreamId::CONNECTION),
            &SettingPairs(&pairs).to_vec(),
        );
        server.write_all(&bytes).await.unwrap();

        // the driver acks them without the test doing anything
        let mut ack = [0u8; 9];
        server.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack[3], 0x04);
        assert_eq!(ack[4], 0x01, "expected the ack flag");
        assert_eq!(&ack[..3], &[0, 0, 0], "settings ack must be empty");
    });

    handshake_res.unwrap();
    assert_eq!(conn.max_frame_size(), 20000);
}

#[tokio::test]
async fn events_are_delivered_in_arrival_order() {
    let (mut conn, mut server) = conn_pair(test_config());

    let mut script = ping_bytes(false, *b"orders\0\0");
    script.extend(frame_bytes(
        Frame::new(FrameType::Data(Default::default()), StreamId(1)),
        b"hi",
    ));
    script.extend(goaway_bytes(KnownErrorCode::NoError));
    server.write_all(&script).await.unwrap();

    assert!(matches!(conn.wait_event().await, Event::Ping(_)));
    match conn.wait_event().await {
        Event::Data(ev) => assert_eq!(ev.data, b"hi"),
        other => panic!("expected data, got {other}"),
    }
    assert!(matches!(conn.wait_event().await, Event::GoAway(_)));
}

#[tokio::test]
async fn wait_event_by_type_discards_unrelated_events() {
    let (mut conn, mut server) = conn_pair(test_config());

    let mut script = frame_bytes(
        Frame::new(
            FrameType::Settings(SettingsFlags::Ack.into()),
            StreamId::CONNECTION,
        ),
        &[],
    );
    script.extend(frame_bytes(
        Frame::new(FrameType::Data(Default::default()), StreamId(1)),
        b"noise",
    ));
    script.extend(ping_bytes(true, *b"signal\0\0"));
    server.write_all(&script).await.unwrap();

    match conn.wait_event_by_type(EventT::Ping).await {
        Event::Ping(ev) => assert_eq!(&ev.data, b"signal\0\0"),
        other => panic!("expected ping, got {other}"),
    }
}

#[tokio::test]
async fn timeout_is_synthesized_and_not_fatal() {
    let (mut conn, mut server) = conn_pair(test_config());

    assert!(matches!(conn.wait_event().await, Event::Timeout));

    // the connection is still alive afterwards
    server
        .write_all(&ping_bytes(false, *b"stillon\0"))
        .await
        .unwrap();
    assert!(matches!(conn.wait_event().await, Event::Ping(_)));
}

#[tokio::test]
async fn eof_surfaces_as_connection_closed() {
    let (mut conn, server) = conn_pair(test_config());
    drop(server);

    assert!(matches!(conn.wait_event().await, Event::ConnectionClosed));
    assert!(conn.closed);
    // and stays that way
    assert!(matches!(conn.wait_event().await, Event::ConnectionClosed));
}

#[tokio::test]
async fn writes_after_close_are_noops() {
    let (mut conn, mut server) = conn_pair(test_config());

    conn.close().await;
    conn.write_ping(false, *b"ignored\0").await.unwrap();

    let mut buf = Vec::new();
    server.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty(), "nothing may be written after close");
}

#[tokio::test]
async fn stream_zero_window_update_credits_the_send_window() {
    let (mut conn, mut server) = conn_pair(test_config());
    assert_eq!(conn.send_window(), 65535);

    let wu = WindowUpdate {
        reserved: 0,
        increment: 1000,
    };
    server
        .write_all(&frame_bytes(
            Frame::new(FrameType::WindowUpdate, StreamId::CONNECTION),
            &wu.to_vec(),
        ))
        .await
        .unwrap();

    assert!(matches!(conn.wait_event().await, Event::WindowUpdate(_)));
    assert_eq!(conn.send_window(), 65535 + 1000);
}

#[tokio::test]
async fn malformed_payload_surfaces_as_raw_event() {
    let (mut conn, mut server) = conn_pair(test_config());

    // a 6-octet PING is invalid, but the driver must hand it over rather
    // than reject the wire image
    server
        .write_all(b"\x00\x00\x06\x06\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00")
        .await
        .unwrap();

    match conn.wait_event().await {
        Event::Raw(ev) => assert!(ev.reason.contains("8 octets")),
        other => panic!("expected raw event, got {other}"),
    }
}

#[tokio::test]
async fn connection_error_accepts_matching_goaway() {
    let (mut conn, mut server) = conn_pair(test_config());

    server
        .write_all(&goaway_bytes(KnownErrorCode::ProtocolError))
        .await
        .unwrap();

    verify_connection_error(&mut conn, ErrorC::ProtocolError)
        .await
        .unwrap();
}

#[tokio::test]
async fn connection_error_rejects_wrong_goaway_code() {
    let (mut conn, mut server) = conn_pair(test_config());

    server
        .write_all(&goaway_bytes(KnownErrorCode::NoError))
        .await
        .unwrap();

    let err = verify_connection_error(&mut conn, ErrorC::ProtocolError)
        .await
        .unwrap_err();
    let wirecheck::TestError::Mismatch { actual, .. } = err else {
        panic!("expected a mismatch");
    };
    assert!(actual.contains("NoError"), "actual was: {actual}");
}

#[tokio::test]
async fn lenient_mode_accepts_close_without_goaway() {
    let (mut conn, server) = conn_pair(test_config());
    drop(server);

    verify_connection_error(&mut conn, ErrorC::ProtocolError)
        .await
        .unwrap();
}

#[tokio::test]
async fn strict_mode_requires_the_goaway() {
    let config = Arc::new(Config {
        timeout: Duration::from_millis(250),
        strict: true,
        ..Default::default()
    });
    let (mut conn, server) = conn_pair(config);
    drop(server);

    let err = verify_connection_error(&mut conn, ErrorC::ProtocolError)
        .await
        .unwrap_err();
    let wirecheck::TestError::Mismatch { actual, .. } = err else {
        panic!("expected a mismatch");
    };
    assert_eq!(actual, "Connection closed");
}

#[tokio::test]
async fn ping_verification_checks_ack_and_payload() {
    let (mut conn, mut server) = conn_pair(test_config());

    server
        .write_all(&ping_bytes(true, *b"h2spec\0\0"))
        .await
        .unwrap();
    verify_ping_frame(&mut conn, true, *b"h2spec\0\0")
        .await
        .unwrap();

    server
        .write_all(&ping_bytes(false, *b"wrong!\0\0"))
        .await
        .unwrap();
    assert!(verify_ping_frame(&mut conn, true, *b"h2spec\0\0")
        .await
        .is_err());
}

#[tokio::test]
async fn header_helpers_roundtrip_through_the_connection_codecs() {
    let (mut conn, _server) = conn_pair(test_config());

    let headers = conn.common_headers();
    let fragment = conn.encode_headers(&headers).unwrap();
    assert!(!fragment.is_empty());

    // the inbound decoder is independent of the outbound encoder, so
    // decode a block built from static-table indices instead
    let decoded = conn.decode_headers(&[0x82, 0x84]).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].name, b":method");
    assert_eq!(decoded[0].value, b"GET");
}

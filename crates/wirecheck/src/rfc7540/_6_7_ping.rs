//! Section 6.7: PING

use std::sync::Arc;

use crate::events::{Event, EventT};
use crate::suite::{TestCase, TestGroup};
use crate::verify::{verify_connection_error, verify_ping_frame, TestError};
use crate::{Config, Conn, ErrorC};

pub fn group() -> TestGroup {
    let mut tg = TestGroup::new("6.7", "PING");
    tg.add_test_case(TestCase::new(
        "Sends a PING frame",
        "The endpoint MUST send a PING frame with ACK, with an identical payload.",
        sends_ping_frame,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a PING frame with ACK",
        "The endpoint MUST NOT respond to PING frames with ACK.",
        sends_ping_frame_with_ack,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a PING frame with a stream identifier field value other than 0x0",
        "The endpoint MUST respond with a connection error of type PROTOCOL_ERROR.",
        sends_ping_frame_with_nonzero_stream_id,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a PING frame with a length field value other than 8",
        "The endpoint MUST treat this as a connection error of type FRAME_SIZE_ERROR.",
        sends_ping_frame_with_invalid_length,
    ));
    tg
}

/// Receivers of a PING frame that does not include an ACK flag MUST
/// send a PING frame with the ACK flag set in response, with an
/// identical payload.
async fn sends_ping_frame(_config: Arc<Config>, mut conn: Conn) -> Result<(), TestError> {
    conn.handshake().await?;

    let data = *b"h2spec\0\0";
    conn.write_ping(false, data).await?;

    verify_ping_frame(&mut conn, true, data).await
}

/// ACK (0x1): when set, bit 0 indicates that this PING frame is a PING
/// response. An endpoint MUST set this flag in PING responses. An
/// endpoint MUST NOT respond to PING frames containing this flag.
async fn sends_ping_frame_with_ack(_config: Arc<Config>, mut conn: Conn) -> Result<(), TestError> {
    conn.handshake().await?;

    let unexpected_data = *b"invalid\0";
    let expected_data = *b"h2spec\0\0";
    conn.write_ping(true, unexpected_data).await?;
    conn.write_ping(false, expected_data).await?;

    let expected = vec![format!("PING Frame (opaque_data: {expected_data:?})")];
    match conn.wait_event_by_type(EventT::Ping).await {
        Event::Ping(ev) if ev.data == unexpected_data => Err(TestError::mismatch(
            expected,
            format!("PING Frame (opaque_data: {:?})", ev.data),
        )),
        Event::Ping(ev) if ev.is_ack() && ev.data == expected_data => Ok(()),
        Event::Ping(ev) => Err(TestError::mismatch(
            expected,
            format!("PING Frame (opaque_data: {:?})", ev.data),
        )),
        ev => Err(TestError::mismatch(expected, ev)),
    }
}

/// If a PING frame is received with a stream identifier field value
/// other than 0x0, the recipient MUST respond with a connection error
/// (Section 5.4.1) of type PROTOCOL_ERROR.
async fn sends_ping_frame_with_nonzero_stream_id(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    conn.handshake().await?;

    // PING frame:
    // length: 8, flags: 0x0, stream_id: 1
    conn.send(b"\x00\x00\x08\x06\x00\x00\x00\x00\x01").await?;
    conn.send(b"\x00\x00\x00\x00\x00\x00\x00\x00").await?;

    verify_connection_error(&mut conn, ErrorC::ProtocolError).await
}

/// Receipt of a PING frame with a length field value other than 8
/// MUST be treated as a connection error (Section 5.4.1) of type
/// FRAME_SIZE_ERROR.
async fn sends_ping_frame_with_invalid_length(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    conn.handshake().await?;

    // PING frame:
    // length: 6, flags: 0x0, stream_id: 1
    conn.send(b"\x00\x00\x06\x06\x00\x00\x00\x00\x01").await?;
    conn.send(b"\x00\x00\x00\x00\x00\x00").await?;

    verify_connection_error(&mut conn, ErrorC::FrameSizeError).await
}

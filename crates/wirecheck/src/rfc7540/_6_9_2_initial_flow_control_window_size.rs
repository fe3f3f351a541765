//! Section 6.9.2: Initial Flow-Control Window Size

use std::sync::Arc;

use wirecheck_h2_parse::{HeadersFlags, Setting, StreamId};

use crate::events::{Event, EventT};
use crate::suite::{TestCase, TestGroup};
use crate::verify::{verify_connection_error, verify_frame_type, TestError};
use crate::{Config, Conn, ErrorC};

pub fn group() -> TestGroup {
    let mut tg = TestGroup::new("6.9.2", "Initial Flow-Control Window Size");
    tg.add_test_case(TestCase::new(
        "Changes SETTINGS_INITIAL_WINDOW_SIZE after sending HEADERS frame",
        "The endpoint MUST adjust the size of all stream flow-control windows.",
        changes_initial_window_size_after_headers,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a SETTINGS frame for window size to be negative",
        "The endpoint MUST track the negative flow-control window.",
        tracks_negative_flow_control_window,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a SETTINGS_INITIAL_WINDOW_SIZE settings with an exceeded maximum window size value",
        "The endpoint MUST treat this as a connection error of type FLOW_CONTROL_ERROR.",
        initial_window_size_beyond_maximum,
    ));
    tg
}

/// Waits until the first DATA frame of a response and returns its length.
/// Servers that send no body at all make the calling test inconclusive,
/// which surfaces as a skip.
async fn response_body_len(conn: &mut Conn) -> Result<usize, TestError> {
    loop {
        match conn.wait_event().await {
            Event::Data(ev) => return Ok(ev.frame.len as usize),
            Event::Timeout | Event::ConnectionClosed | Event::Error(_) => {
                return Err(TestError::Skipped)
            }
            _ => {}
        }
    }
}

/// Loops over events until a DATA frame of exactly one octet arrives on
/// any stream; everything else observed becomes the mismatch description.
async fn expect_one_octet_data_frame(
    conn: &mut Conn,
    stream_id: StreamId,
) -> Result<(), TestError> {
    let expected = vec![format!(
        "DATA Frame (length:1, flags:0x00, stream_id:{stream_id})"
    )];
    let mut last: Option<String> = None;
    loop {
        match conn.wait_event().await {
            Event::Data(ev) => {
                if ev.frame.len == 1 {
                    return Ok(());
                }
                last = Some(Event::Data(ev).to_string());
            }
            Event::Timeout => {
                return Err(TestError::mismatch(
                    expected,
                    last.unwrap_or_else(|| "Timeout".into()),
                ))
            }
            ev @ (Event::ConnectionClosed | Event::Error(_)) => {
                return Err(TestError::mismatch(expected, ev))
            }
            ev => last = Some(ev.to_string()),
        }
    }
}

/// When the value of SETTINGS_INITIAL_WINDOW_SIZE changes, a receiver
/// MUST adjust the size of all stream flow-control windows that it
/// maintains by the difference between the new value and the old value.
async fn changes_initial_window_size_after_headers(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    let mut stream_id = StreamId(1);

    conn.handshake().await?;

    let headers = conn.common_headers();
    let block_fragment = conn.encode_headers(&headers)?;
    conn.write_headers(
        stream_id,
        HeadersFlags::EndStream | HeadersFlags::EndHeaders,
        block_fragment,
    )
    .await?;

    // Skip this test case when the response has no body.
    let res_len = response_body_len(&mut conn).await?;
    if res_len < 1 {
        return Err(TestError::Skipped);
    }

    // Set SETTINGS_INITIAL_WINDOW_SIZE to 0 to prevent sending DATA
    // frames.
    conn.write_settings(&[(Setting::InitialWindowSize, 0)])
        .await?;
    verify_frame_type(&mut conn, EventT::Settings).await?;

    // Send a HEADERS frame on a fresh stream.
    stream_id = StreamId(stream_id.0 + 2);
    let block_fragment = conn.encode_headers(&headers)?;
    conn.write_headers(
        stream_id,
        HeadersFlags::EndStream | HeadersFlags::EndHeaders,
        block_fragment,
    )
    .await?;

    // Set SETTINGS_INITIAL_WINDOW_SIZE to 1 so that the server can send
    // a single octet of DATA.
    conn.write_settings(&[(Setting::InitialWindowSize, 1)])
        .await?;
    verify_frame_type(&mut conn, EventT::Settings).await?;

    expect_one_octet_data_frame(&mut conn, stream_id).await
}

/// A sender MUST track the negative flow-control window and MUST NOT
/// send new flow-controlled frames until it receives WINDOW_UPDATE
/// frames that cause the flow-control window to become positive.
async fn tracks_negative_flow_control_window(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    let mut stream_id = StreamId(1);

    conn.handshake().await?;

    let headers = conn.common_headers();
    let block_fragment = conn.encode_headers(&headers)?;
    conn.write_headers(
        stream_id,
        HeadersFlags::EndStream | HeadersFlags::EndHeaders,
        block_fragment,
    )
    .await?;

    // Skip this test case when the response body is too short to split.
    let res_len = response_body_len(&mut conn).await?;
    if res_len < 5 {
        return Err(TestError::Skipped);
    }

    // Set SETTINGS_INITIAL_WINDOW_SIZE to 3 to prevent sending all of
    // the DATA.
    conn.write_settings(&[(Setting::InitialWindowSize, 3)])
        .await?;
    verify_frame_type(&mut conn, EventT::Settings).await?;

    stream_id = StreamId(stream_id.0 + 2);
    let block_fragment = conn.encode_headers(&headers)?;
    conn.write_headers(
        stream_id,
        HeadersFlags::EndStream | HeadersFlags::EndHeaders,
        block_fragment,
    )
    .await?;

    // The server sends the first 3 octets.
    verify_frame_type(&mut conn, EventT::Data).await?;

    // Set SETTINGS_INITIAL_WINDOW_SIZE to 2, making the outstanding
    // window -1.
    conn.write_settings(&[(Setting::InitialWindowSize, 2)])
        .await?;
    verify_frame_type(&mut conn, EventT::Settings).await?;

    // Credit the stream with 2 octets: the window becomes 1, so exactly
    // one more octet of DATA may arrive.
    conn.write_window_update(stream_id, 2).await?;

    expect_one_octet_data_frame(&mut conn, stream_id).await
}

/// An endpoint MUST treat a change to SETTINGS_INITIAL_WINDOW_SIZE that
/// causes any flow-control window to exceed the maximum size as a
/// connection error (Section 5.4.1) of type FLOW_CONTROL_ERROR.
async fn initial_window_size_beyond_maximum(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    conn.handshake().await?;

    // SETTINGS frame:
    // SETTINGS_INITIAL_WINDOW_SIZE: 2147483648
    conn.send(b"\x00\x00\x06\x04\x00\x00\x00\x00\x00").await?;
    conn.send(b"\x00\x04\x80\x00\x00\x00").await?;

    verify_connection_error(&mut conn, ErrorC::FlowControlError).await
}

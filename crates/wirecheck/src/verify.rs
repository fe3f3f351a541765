//! The assertion primitives test cases are written against.
//!
//! Each primitive drives the connection's event stream and either returns
//! `Ok(())` or a [TestError::Mismatch] pairing the lines the requirement
//! allowed with a description of what actually happened. Transport
//! failures and timeouts become mismatches too, never panics.

use enumflags2::BitFlags;

use wirecheck_h2_parse::{KnownErrorCode, StreamId};

use crate::{Conn, ErrorC, Event, EventT};

/// How a test case concludes, short of passing.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// The observed event differs from every acceptable one.
    #[error("expected one of {expected:?}, actual: {actual}")]
    Mismatch {
        expected: Vec<String>,
        actual: String,
    },
    /// The test's precondition is not satisfied by this server (e.g. it
    /// serves a zero-length body).
    #[error("skipped")]
    Skipped,
    /// Anything else: connect failures, I/O errors while writing, etc.
    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl TestError {
    pub fn mismatch(expected: Vec<String>, actual: impl ToString) -> Self {
        Self::Mismatch {
            expected,
            actual: actual.to_string(),
        }
    }
}

fn goaway_line(code: ErrorC) -> String {
    format!("GOAWAY Frame (error_code: {:?})", KnownErrorCode::from(code))
}

fn rst_stream_line(code: ErrorC) -> String {
    format!("RST_STREAM Frame (error_code: {:?})", KnownErrorCode::from(code))
}

/// Verifies that the peer reacts with a connection error carrying one of
/// the given codes: a GOAWAY with that code or, in lenient mode, closing
/// the transport without one. GOAWAY(NO_ERROR) counts only when NO_ERROR
/// is among the expected codes.
pub async fn verify_connection_error(
    conn: &mut Conn,
    codes: impl Into<BitFlags<ErrorC>>,
) -> Result<(), TestError> {
    let codes = codes.into();
    let strict = conn.config().strict;

    let mut expected: Vec<String> = codes.iter().map(goaway_line).collect();
    if !strict {
        expected.push("Connection closed".into());
    }

    let mut last: Option<String> = None;
    let actual = loop {
        match conn.wait_event().await {
            Event::GoAway(ev) => {
                if let Ok(known) = KnownErrorCode::try_from(ev.error_code) {
                    if codes.contains(ErrorC::from(known)) {
                        return Ok(());
                    }
                }
                break Event::GoAway(ev).to_string();
            }
            Event::ConnectionClosed | Event::Error(_) if !strict => return Ok(()),
            ev @ (Event::ConnectionClosed | Event::Error(_)) => break ev.to_string(),
            Event::Timeout => break last.unwrap_or_else(|| "Timeout".into()),
            ev => last = Some(ev.to_string()),
        }
    };

    Err(TestError::mismatch(expected, actual))
}

/// Verifies that the peer reacts with a stream error carrying one of the
/// given codes: RST_STREAM with that code, or the stricter reaction of a
/// GOAWAY with that code, or (lenient mode) transport closure.
pub async fn verify_stream_error(
    conn: &mut Conn,
    codes: impl Into<BitFlags<ErrorC>>,
) -> Result<(), TestError> {
    let codes = codes.into();
    let strict = conn.config().strict;

    let mut expected: Vec<String> = codes.iter().map(rst_stream_line).collect();
    expected.extend(codes.iter().map(goaway_line));
    if !strict {
        expected.push("Connection closed".into());
    }

    let mut last: Option<String> = None;
    let actual = loop {
        match conn.wait_event().await {
            Event::RstStream(ev) => {
                if let Ok(known) = KnownErrorCode::try_from(ev.error_code) {
                    if codes.contains(ErrorC::from(known)) {
                        return Ok(());
                    }
                }
                break Event::RstStream(ev).to_string();
            }
            Event::GoAway(ev) => {
                if let Ok(known) = KnownErrorCode::try_from(ev.error_code) {
                    if codes.contains(ErrorC::from(known)) {
                        return Ok(());
                    }
                }
                break Event::GoAway(ev).to_string();
            }
            Event::ConnectionClosed | Event::Error(_) if !strict => return Ok(()),
            ev @ (Event::ConnectionClosed | Event::Error(_)) => break ev.to_string(),
            Event::Timeout => break last.unwrap_or_else(|| "Timeout".into()),
            ev => last = Some(ev.to_string()),
        }
    };

    Err(TestError::mismatch(expected, actual))
}

/// Verifies that the peer closes the transport, whether or not a GOAWAY
/// precedes it.
pub async fn verify_connection_close(conn: &mut Conn) -> Result<(), TestError> {
    let mut last: Option<String> = None;
    let actual = loop {
        match conn.wait_event().await {
            Event::ConnectionClosed | Event::Error(_) => return Ok(()),
            Event::Timeout => break last.unwrap_or_else(|| "Timeout".into()),
            ev => last = Some(ev.to_string()),
        }
    };
    Err(TestError::mismatch(vec!["Connection closed".into()], actual))
}

/// Verifies that a frame of one of the given types arrives, ignoring
/// whatever unrelated frames come first (settings acks in particular).
pub async fn verify_frame_type(
    conn: &mut Conn,
    types: impl Into<BitFlags<EventT>>,
) -> Result<(), TestError> {
    let types = types.into();
    let ev = conn.wait_event_by_type(types).await;
    if types.contains(ev.event_type()) {
        return Ok(());
    }
    let expected = types.iter().map(|t| format!("{t:?} frame")).collect();
    Err(TestError::mismatch(expected, ev))
}

/// Verifies that the next event is of the given variant, with no leeway.
pub async fn verify_event_type(conn: &mut Conn, t: EventT) -> Result<(), TestError> {
    let ev = conn.wait_event().await;
    if ev.event_type() == t {
        return Ok(());
    }
    Err(TestError::mismatch(vec![format!("{t:?}")], ev))
}

/// Verifies that the next PING event has the requested ACK flag and opaque
/// payload.
pub async fn verify_ping_frame(
    conn: &mut Conn,
    ack: bool,
    data: [u8; 8],
) -> Result<(), TestError> {
    let expected = vec![format!(
        "PING Frame (length:8, flags:0x{:02x}, stream_id:0, opaque_data:{:?})",
        u8::from(ack),
        data
    )];

    match conn.wait_event_by_type(EventT::Ping).await {
        Event::Ping(ev) => {
            if ev.is_ack() == ack && ev.data == data {
                Ok(())
            } else {
                Err(TestError::mismatch(
                    expected,
                    format!(
                        "PING Frame (length:8, flags:0x{:02x}, stream_id:{}, opaque_data:{:?})",
                        ev.frame.flags_byte(),
                        ev.frame.stream_id,
                        ev.data
                    ),
                ))
            }
        }
        ev => Err(TestError::mismatch(expected, ev)),
    }
}

/// Verifies that a HEADERS frame arrives on the given stream.
pub async fn verify_headers_frame(conn: &mut Conn, stream_id: StreamId) -> Result<(), TestError> {
    let expected = vec![format!("HEADERS Frame (stream_id:{stream_id})")];
    match conn.wait_event_by_type(EventT::Headers).await {
        Event::Headers(ev) if ev.frame.stream_id == stream_id => Ok(()),
        ev => Err(TestError::mismatch(expected, ev)),
    }
}

/// Verifies that the peer finishes the given stream normally: a DATA or
/// HEADERS frame carrying END_STREAM on that stream, or RST_STREAM with
/// NO_ERROR. Transport closure counts as acceptance too.
pub async fn verify_stream_close(conn: &mut Conn, stream_id: StreamId) -> Result<(), TestError> {
    let expected = vec![
        format!("DATA Frame with END_STREAM (stream_id:{stream_id})"),
        format!("HEADERS Frame with END_STREAM (stream_id:{stream_id})"),
        format!("RST_STREAM Frame (error_code: NoError, stream_id:{stream_id})"),
    ];

    let mut last: Option<String> = None;
    let actual = loop {
        match conn.wait_event().await {
            Event::Data(ev) if ev.end_stream() => {
                if ev.frame.stream_id == stream_id {
                    return Ok(());
                }
                break Event::Data(ev).to_string();
            }
            Event::Headers(ev) if ev.end_stream() => {
                if ev.frame.stream_id == stream_id {
                    return Ok(());
                }
                break Event::Headers(ev).to_string();
            }
            Event::RstStream(ev) => {
                let no_error = matches!(
                    KnownErrorCode::try_from(ev.error_code),
                    Ok(KnownErrorCode::NoError)
                );
                if no_error && ev.frame.stream_id == stream_id {
                    return Ok(());
                }
                break Event::RstStream(ev).to_string();
            }
            Event::ConnectionClosed | Event::Error(_) => return Ok(()),
            Event::Timeout => break last.unwrap_or_else(|| "Timeout".into()),
            ev => last = Some(ev.to_string()),
        }
    };

    Err(TestError::mismatch(expected, actual))
}

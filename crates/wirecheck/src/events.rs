//! The typed events the connection driver surfaces to tests.
//!
//! Every inbound frame becomes one event, in arrival order. Frames whose
//! payload doesn't match their declared shape are not rejected: they come
//! out as [Event::Raw] with a reason, because tests routinely provoke
//! malformed traffic and still need to observe what follows.

use std::fmt;

use enumflags2::bitflags;

use wirecheck_h2_parse::{
    nom::Finish, split_priority, split_promised_stream_id, strip_padding, ContinuationFlags,
    DataFlags, ErrorCode, Frame, FrameType, GoAway, HeadersFlags, PrioritySpec, PushPromiseFlags,
    RstStream, SettingsFlags, StreamId, WindowUpdate,
};

/// A "hollow" variant of [Event], with no associated data. Useful to wait
/// for certain event kinds.
#[bitflags]
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventT {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Raw,
    ConnectionClosed,
    Timeout,
    Error,
}

#[derive(Debug, Clone)]
pub struct DataEvent {
    pub frame: Frame,
    /// payload with any padding removed
    pub data: Vec<u8>,
}

impl DataEvent {
    pub fn end_stream(&self) -> bool {
        self.frame.is_end_stream()
    }
}

#[derive(Debug, Clone)]
pub struct HeadersEvent {
    pub frame: Frame,
    pub priority: Option<PrioritySpec>,
    /// header block fragment, padding and priority block removed
    pub fragment: Vec<u8>,
}

impl HeadersEvent {
    pub fn end_headers(&self) -> bool {
        matches!(self.frame.frame_type, FrameType::Headers(flags) if flags.contains(HeadersFlags::EndHeaders))
    }

    pub fn end_stream(&self) -> bool {
        self.frame.is_end_stream()
    }
}

#[derive(Debug, Clone)]
pub struct PriorityEvent {
    pub frame: Frame,
    pub priority: PrioritySpec,
}

#[derive(Debug, Clone)]
pub struct RstStreamEvent {
    pub frame: Frame,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone)]
pub struct SettingsEvent {
    pub frame: Frame,
    pub pairs: Vec<(u16, u32)>,
}

impl SettingsEvent {
    pub fn is_ack(&self) -> bool {
        self.frame.is_ack()
    }
}

#[derive(Debug, Clone)]
pub struct PushPromiseEvent {
    pub frame: Frame,
    pub promised_stream_id: StreamId,
    pub fragment: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PingEvent {
    pub frame: Frame,
    pub data: [u8; 8],
}

impl PingEvent {
    pub fn is_ack(&self) -> bool {
        self.frame.is_ack()
    }
}

#[derive(Debug, Clone)]
pub struct GoAwayEvent {
    pub frame: Frame,
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
    pub debug_data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct WindowUpdateEvent {
    pub frame: Frame,
    pub increment: u32,
}

impl WindowUpdateEvent {
    pub fn stream_id(&self) -> StreamId {
        self.frame.stream_id
    }
}

#[derive(Debug, Clone)]
pub struct ContinuationEvent {
    pub frame: Frame,
    pub fragment: Vec<u8>,
}

impl ContinuationEvent {
    pub fn end_headers(&self) -> bool {
        matches!(self.frame.frame_type, FrameType::Continuation(flags) if flags.contains(ContinuationFlags::EndHeaders))
    }
}

/// A frame the driver could not interpret: unknown type, or a payload that
/// doesn't match the declared shape. Carried verbatim, with the reason.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub frame: Frame,
    pub payload: Vec<u8>,
    pub reason: String,
}

/// A single observation surfaced to tests: a parsed frame, or one of the
/// terminal/synthesized conditions.
#[derive(Debug, Clone)]
pub enum Event {
    Data(DataEvent),
    Headers(HeadersEvent),
    Priority(PriorityEvent),
    RstStream(RstStreamEvent),
    Settings(SettingsEvent),
    PushPromise(PushPromiseEvent),
    Ping(PingEvent),
    GoAway(GoAwayEvent),
    WindowUpdate(WindowUpdateEvent),
    Continuation(ContinuationEvent),
    Raw(RawEvent),
    /// The transport observed EOF or was shut down locally.
    ConnectionClosed,
    /// No event arrived within the per-operation deadline.
    Timeout,
    /// The transport failed with the given error.
    Error(String),
}

impl Event {
    pub fn event_type(&self) -> EventT {
        match self {
            Event::Data(_) => EventT::Data,
            Event::Headers(_) => EventT::Headers,
            Event::Priority(_) => EventT::Priority,
            Event::RstStream(_) => EventT::RstStream,
            Event::Settings(_) => EventT::Settings,
            Event::PushPromise(_) => EventT::PushPromise,
            Event::Ping(_) => EventT::Ping,
            Event::GoAway(_) => EventT::GoAway,
            Event::WindowUpdate(_) => EventT::WindowUpdate,
            Event::Continuation(_) => EventT::Continuation,
            Event::Raw(_) => EventT::Raw,
            Event::ConnectionClosed => EventT::ConnectionClosed,
            Event::Timeout => EventT::Timeout,
            Event::Error(_) => EventT::Error,
        }
    }

    /// The frame header, for frame-backed events.
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Event::Data(ev) => Some(&ev.frame),
            Event::Headers(ev) => Some(&ev.frame),
            Event::Priority(ev) => Some(&ev.frame),
            Event::RstStream(ev) => Some(&ev.frame),
            Event::Settings(ev) => Some(&ev.frame),
            Event::PushPromise(ev) => Some(&ev.frame),
            Event::Ping(ev) => Some(&ev.frame),
            Event::GoAway(ev) => Some(&ev.frame),
            Event::WindowUpdate(ev) => Some(&ev.frame),
            Event::Continuation(ev) => Some(&ev.frame),
            Event::Raw(ev) => Some(&ev.frame),
            _ => None,
        }
    }

    /// Maps a parsed frame header plus its payload bytes to an event.
    /// Structural problems in the payload degrade to [Event::Raw].
    pub fn from_frame(frame: Frame, payload: &[u8]) -> Event {
        let raw = |reason: String| {
            Event::Raw(RawEvent {
                frame,
                payload: payload.to_vec(),
                reason,
            })
        };

        match frame.frame_type {
            FrameType::Data(flags) => {
                match strip_padding(flags.contains(DataFlags::Padded), payload) {
                    Ok(data) => Event::Data(DataEvent {
                        frame,
                        data: data.to_vec(),
                    }),
                    Err(e) => raw(e.to_string()),
                }
            }
            FrameType::Headers(flags) => {
                let body = match strip_padding(flags.contains(HeadersFlags::Padded), payload) {
                    Ok(body) => body,
                    Err(e) => return raw(e.to_string()),
                };
                match split_priority(flags.contains(HeadersFlags::Priority), body) {
                    Ok((priority, fragment)) => Event::Headers(HeadersEvent {
                        frame,
                        priority,
                        fragment: fragment.to_vec(),
                    }),
                    Err(e) => raw(e.to_string()),
                }
            }
            FrameType::Priority => match PrioritySpec::parse(payload).finish() {
                Ok((rest, priority)) if rest.is_empty() => {
                    Event::Priority(PriorityEvent { frame, priority })
                }
                _ => raw("PRIORITY payload must be 5 octets".into()),
            },
            FrameType::RstStream => match RstStream::parse(payload).finish() {
                Ok((rest, rst)) if rest.is_empty() => Event::RstStream(RstStreamEvent {
                    frame,
                    error_code: rst.error_code,
                }),
                _ => raw("RST_STREAM payload must be 4 octets".into()),
            },
            FrameType::Settings(flags) => {
                if flags.contains(SettingsFlags::Ack) && !payload.is_empty() {
                    return raw("SETTINGS ack must have an empty payload".into());
                }
                match wirecheck_h2_parse::parse_setting_pairs(payload).finish() {
                    Ok((_, pairs)) => Event::Settings(SettingsEvent { frame, pairs }),
                    Err(_) => raw("SETTINGS payload must be a multiple of 6 octets".into()),
                }
            }
            FrameType::PushPromise(flags) => {
                let body = match strip_padding(flags.contains(PushPromiseFlags::Padded), payload) {
                    Ok(body) => body,
                    Err(e) => return raw(e.to_string()),
                };
                match split_promised_stream_id(body) {
                    Ok((promised_stream_id, fragment)) => Event::PushPromise(PushPromiseEvent {
                        frame,
                        promised_stream_id,
                        fragment: fragment.to_vec(),
                    }),
                    Err(e) => raw(e.to_string()),
                }
            }
            FrameType::Ping(_) => match <[u8; 8]>::try_from(payload) {
                Ok(data) => Event::Ping(PingEvent { frame, data }),
                Err(_) => raw("PING payload must be 8 octets".into()),
            },
            FrameType::GoAway => match GoAway::parse(payload).finish() {
                Ok((_, goaway)) => Event::GoAway(GoAwayEvent {
                    frame,
                    last_stream_id: goaway.last_stream_id,
                    error_code: goaway.error_code,
                    debug_data: goaway.additional_debug_data,
                }),
                Err(_) => raw("GOAWAY payload must be at least 8 octets".into()),
            },
            FrameType::WindowUpdate => match WindowUpdate::parse(payload).finish() {
                Ok((rest, wu)) if rest.is_empty() => Event::WindowUpdate(WindowUpdateEvent {
                    frame,
                    increment: wu.increment,
                }),
                _ => raw("WINDOW_UPDATE payload must be 4 octets".into()),
            },
            FrameType::Continuation(_) => Event::Continuation(ContinuationEvent {
                frame,
                fragment: payload.to_vec(),
            }),
            FrameType::Unknown(_) => raw("unknown frame type".into()),
        }
    }
}

fn fmt_frame(f: &mut fmt::Formatter<'_>, name: &str, frame: &Frame) -> fmt::Result {
    write!(
        f,
        "{} Frame (length:{}, flags:0x{:02x}, stream_id:{})",
        name,
        frame.len,
        frame.flags_byte(),
        frame.stream_id
    )
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Data(ev) => fmt_frame(f, "DATA", &ev.frame),
            Event::Headers(ev) => fmt_frame(f, "HEADERS", &ev.frame),
            Event::Priority(ev) => fmt_frame(f, "PRIORITY", &ev.frame),
            Event::RstStream(ev) => {
                fmt_frame(f, "RST_STREAM", &ev.frame)?;
                write!(f, " (error_code: {:?})", ev.error_code)
            }
            Event::Settings(ev) => fmt_frame(f, "SETTINGS", &ev.frame),
            Event::PushPromise(ev) => fmt_frame(f, "PUSH_PROMISE", &ev.frame),
            Event::Ping(ev) => fmt_frame(f, "PING", &ev.frame),
            Event::GoAway(ev) => {
                fmt_frame(f, "GOAWAY", &ev.frame)?;
                write!(f, " (error_code: {:?})", ev.error_code)
            }
            Event::WindowUpdate(ev) => fmt_frame(f, "WINDOW_UPDATE", &ev.frame),
            Event::Continuation(ev) => fmt_frame(f, "CONTINUATION", &ev.frame),
            Event::Raw(ev) => write!(
                f,
                "RAW Frame (type:0x{:02x}, length:{}, stream_id:{}: {})",
                ev.frame.type_byte(),
                ev.frame.len,
                ev.frame.stream_id,
                ev.reason
            ),
            Event::ConnectionClosed => write!(f, "Connection closed"),
            Event::Timeout => write!(f, "Timeout"),
            Event::Error(error) => write!(f, "Error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirecheck_h2_parse::{EncodedFrameType, KnownErrorCode, PingFlags};

    #[test]
    fn test_padded_data_frame() {
        let payload = b"\x02hi\x00\x00";
        let frame =
            Frame::new(FrameType::Data(DataFlags::Padded.into()), StreamId(1)).with_len(5);
        match Event::from_frame(frame, payload) {
            Event::Data(ev) => assert_eq!(ev.data, b"hi"),
            other => panic!("expected data event, got {other}"),
        }
    }

    #[test]
    fn test_overlong_padding_degrades_to_raw() {
        let payload = b"\x06Test!";
        let frame =
            Frame::new(FrameType::Data(DataFlags::Padded.into()), StreamId(1)).with_len(6);
        match Event::from_frame(frame, payload) {
            Event::Raw(ev) => assert!(ev.reason.contains("pad length")),
            other => panic!("expected raw event, got {other}"),
        }
    }

    #[test]
    fn test_ping_event() {
        let frame = Frame::new(
            FrameType::Ping(PingFlags::Ack.into()),
            StreamId::CONNECTION,
        )
        .with_len(8);
        match Event::from_frame(frame, b"h2\x00\x00\x00\x00\x00\x00") {
            Event::Ping(ev) => {
                assert!(ev.is_ack());
                assert_eq!(&ev.data, b"h2\x00\x00\x00\x00\x00\x00");
            }
            other => panic!("expected ping event, got {other}"),
        }
    }

    #[test]
    fn test_short_ping_degrades_to_raw() {
        let frame = Frame::new(FrameType::Ping(Default::default()), StreamId::CONNECTION)
            .with_len(6);
        match Event::from_frame(frame, b"\x00\x00\x00\x00\x00\x00") {
            Event::Raw(ev) => assert!(ev.reason.contains("8 octets")),
            other => panic!("expected raw event, got {other}"),
        }
    }

    #[test]
    fn test_goaway_event() {
        let goaway = GoAway {
            reserved: 0,
            last_stream_id: StreamId(5),
            error_code: KnownErrorCode::ProtocolError.into(),
            additional_debug_data: b"bye".to_vec(),
        };
        let payload = goaway.to_vec();
        let frame = Frame::new(FrameType::GoAway, StreamId::CONNECTION)
            .with_len(payload.len() as u32);
        match Event::from_frame(frame, &payload) {
            Event::GoAway(ev) => {
                assert_eq!(ev.last_stream_id, StreamId(5));
                assert_eq!(
                    KnownErrorCode::try_from(ev.error_code),
                    Ok(KnownErrorCode::ProtocolError)
                );
                assert_eq!(ev.debug_data, b"bye");
            }
            other => panic!("expected goaway event, got {other}"),
        }
    }

    #[test]
    fn test_unknown_frame_type_is_raw() {
        let frame = Frame::new(
            FrameType::Unknown(EncodedFrameType { ty: 0x42, flags: 0 }),
            StreamId(1),
        )
        .with_len(2);
        assert!(matches!(
            Event::from_frame(frame, b"ok"),
            Event::Raw(_)
        ));
    }

    #[test]
    fn test_display_matches_reporting_format() {
        let frame = Frame::new(
            FrameType::Data(DataFlags::EndStream.into()),
            StreamId(3),
        )
        .with_len(1);
        let ev = Event::from_frame(frame, b"x");
        assert_eq!(
            ev.to_string(),
            "DATA Frame (length:1, flags:0x01, stream_id:3)"
        );
        assert_eq!(Event::Timeout.to_string(), "Timeout");
        assert_eq!(Event::ConnectionClosed.to_string(), "Connection closed");
    }
}

//! HTTP/2 frame parsing and serialization.
//!
//! HTTP/2 <https://httpwg.org/specs/rfc7540.html>
//!
//! This crate is deliberately permissive: it round-trips what's on the
//! wire without enforcing protocol rules, so a test harness can emit
//! deliberately malformed frames and still read whatever comes back.

use std::{fmt, ops::RangeInclusive};

use enum_repr::EnumRepr;
pub use enumflags2::{bitflags, BitFlags};
pub use nom;

use nom::{
    combinator::map,
    number::streaming::{be_u16, be_u24, be_u32, be_u8},
    sequence::tuple,
    IResult,
};

/// This is sent by h2 clients after negotiating over ALPN, or when doing h2c.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub fn preface(i: &[u8]) -> IResult<&[u8], ()> {
    let (i, _) = nom::bytes::streaming::tag(PREFACE)(i)?;
    Ok((i, ()))
}

/// See <https://httpwg.org/specs/rfc7540.html#FrameTypes>
#[EnumRepr(type = "u8")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFrameType {
    Data = 0x00,
    Headers = 0x01,
    Priority = 0x02,
    RstStream = 0x03,
    Settings = 0x04,
    PushPromise = 0x05,
    Ping = 0x06,
    GoAway = 0x07,
    WindowUpdate = 0x08,
    Continuation = 0x09,
}

/// Typed flags for various frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data(BitFlags<DataFlags>),
    Headers(BitFlags<HeadersFlags>),
    Priority,
    RstStream,
    Settings(BitFlags<SettingsFlags>),
    PushPromise(BitFlags<PushPromiseFlags>),
    Ping(BitFlags<PingFlags>),
    GoAway,
    WindowUpdate,
    Continuation(BitFlags<ContinuationFlags>),
    Unknown(EncodedFrameType),
}

/// See <https://httpwg.org/specs/rfc7540.html#DATA>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataFlags {
    Padded = 0x08,
    EndStream = 0x01,
}

/// See <https://httpwg.org/specs/rfc7540.html#HEADERS>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeadersFlags {
    Priority = 0x20,
    Padded = 0x08,
    EndHeaders = 0x04,
    EndStream = 0x01,
}

/// See <https://httpwg.org/specs/rfc7540.html#SETTINGS>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingsFlags {
    Ack = 0x01,
}

/// See <https://httpwg.org/specs/rfc7540.html#PUSH_PROMISE>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PushPromiseFlags {
    Padded = 0x08,
    EndHeaders = 0x04,
}

/// See <https://httpwg.org/specs/rfc7540.html#PING>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PingFlags {
    Ack = 0x01,
}

/// See <https://httpwg.org/specs/rfc7540.html#CONTINUATION>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContinuationFlags {
    EndHeaders = 0x04,
}

/// A frame type and flag byte as they appear on the wire, before any
/// interpretation. Unknown frame types stay in this form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFrameType {
    pub ty: u8,
    pub flags: u8,
}

impl EncodedFrameType {
    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (ty, flags)) = tuple((be_u8, be_u8))(i)?;
        Ok((i, Self { ty, flags }))
    }
}

impl From<(RawFrameType, u8)> for EncodedFrameType {
    fn from((ty, flags): (RawFrameType, u8)) -> Self {
        Self {
            ty: ty.repr(),
            flags,
        }
    }
}

impl FrameType {
    pub(crate) fn encode(self) -> EncodedFrameType {
        match self {
            FrameType::Data(f) => (RawFrameType::Data, f.bits()).into(),
            FrameType::Headers(f) => (RawFrameType::Headers, f.bits()).into(),
            FrameType::Priority => (RawFrameType::Priority, 0).into(),
            FrameType::RstStream => (RawFrameType::RstStream, 0).into(),
            FrameType::Settings(f) => (RawFrameType::Settings, f.bits()).into(),
            FrameType::PushPromise(f) => (RawFrameType::PushPromise, f.bits()).into(),
            FrameType::Ping(f) => (RawFrameType::Ping, f.bits()).into(),
            FrameType::GoAway => (RawFrameType::GoAway, 0).into(),
            FrameType::WindowUpdate => (RawFrameType::WindowUpdate, 0).into(),
            FrameType::Continuation(f) => (RawFrameType::Continuation, f.bits()).into(),
            FrameType::Unknown(ft) => ft,
        }
    }

    fn decode(ft: EncodedFrameType) -> Self {
        match RawFrameType::from_repr(ft.ty) {
            Some(ty) => match ty {
                RawFrameType::Data => {
                    FrameType::Data(BitFlags::<DataFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::Headers => {
                    FrameType::Headers(BitFlags::<HeadersFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::Priority => FrameType::Priority,
                RawFrameType::RstStream => FrameType::RstStream,
                RawFrameType::Settings => {
                    FrameType::Settings(BitFlags::<SettingsFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::PushPromise => FrameType::PushPromise(
                    BitFlags::<PushPromiseFlags>::from_bits_truncate(ft.flags),
                ),
                RawFrameType::Ping => {
                    FrameType::Ping(BitFlags::<PingFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::GoAway => FrameType::GoAway,
                RawFrameType::WindowUpdate => FrameType::WindowUpdate,
                RawFrameType::Continuation => FrameType::Continuation(
                    BitFlags::<ContinuationFlags>::from_bits_truncate(ft.flags),
                ),
            },
            None => FrameType::Unknown(ft),
        }
    }

    /// Wrap this type into a zero-length frame on the given stream.
    pub fn into_frame(self, stream_id: StreamId) -> Frame {
        Frame::new(self, stream_id)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Stream ID used for connection control frames
    pub const CONNECTION: Self = Self(0);

    /// Server-initiated streams have even IDs
    pub fn is_server_initiated(&self) -> bool {
        self.0 % 2 == 0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid stream id: {0}")]
pub struct StreamIdOutOfRange(u32);

impl TryFrom<u32> for StreamId {
    type Error = StreamIdOutOfRange;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value & 0x8000_0000 != 0 {
            Err(StreamIdOutOfRange(value))
        } else {
            Ok(Self(value))
        }
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// See <https://httpwg.org/specs/rfc7540.html#FrameHeader>
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub reserved: u8,
    pub stream_id: StreamId,
    pub len: u32,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stream_id.0 == 0 {
            write!(f, "Conn:")?;
        } else {
            write!(f, "#{}:", self.stream_id.0)?;
        }

        let name = match &self.frame_type {
            FrameType::Data(_) => "Data",
            FrameType::Headers(_) => "Headers",
            FrameType::Priority => "Priority",
            FrameType::RstStream => "RstStream",
            FrameType::Settings(_) => "Settings",
            FrameType::PushPromise(_) => "PushPromise",
            FrameType::Ping(_) => "Ping",
            FrameType::GoAway => "GoAway",
            FrameType::WindowUpdate => "WindowUpdate",
            FrameType::Continuation(_) => "Continuation",
            FrameType::Unknown(EncodedFrameType { ty, flags }) => {
                return write!(f, "UnknownFrame({:#x}, {:#x})", ty, flags)
            }
        };
        let mut s = f.debug_struct(name);

        if self.reserved != 0 {
            s.field("reserved", &self.reserved);
        }
        if self.len > 0 {
            s.field("len", &self.len);
        }

        struct DisplayDebug<'a, D: fmt::Display>(&'a D);
        impl<D: fmt::Display> fmt::Debug for DisplayDebug<'_, D> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self.0, f)
            }
        }

        match &self.frame_type {
            FrameType::Data(flags) => {
                if !flags.is_empty() {
                    s.field("flags", &DisplayDebug(flags));
                }
            }
            FrameType::Headers(flags) => {
                if !flags.is_empty() {
                    s.field("flags", &DisplayDebug(flags));
                }
            }
            FrameType::Settings(flags) => {
                if !flags.is_empty() {
                    s.field("flags", &DisplayDebug(flags));
                }
            }
            FrameType::PushPromise(flags) => {
                if !flags.is_empty() {
                    s.field("flags", &DisplayDebug(flags));
                }
            }
            FrameType::Ping(flags) => {
                if !flags.is_empty() {
                    s.field("flags", &DisplayDebug(flags));
                }
            }
            FrameType::Continuation(flags) => {
                if !flags.is_empty() {
                    s.field("flags", &DisplayDebug(flags));
                }
            }
            _ => {
                // no flags defined for these
            }
        }

        s.finish()
    }
}

impl Frame {
    /// Create a new frame with the given type and stream ID.
    pub fn new(frame_type: FrameType, stream_id: StreamId) -> Self {
        Self {
            frame_type,
            reserved: 0,
            stream_id,
            len: 0,
        }
    }

    /// Set the frame's length.
    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }

    /// The raw flag byte as it appears on the wire.
    pub fn flags_byte(&self) -> u8 {
        self.frame_type.encode().flags
    }

    /// The raw type byte as it appears on the wire.
    pub fn type_byte(&self) -> u8 {
        self.frame_type.encode().ty
    }

    /// Returns true if this frame carries the ACK flag (SETTINGS or PING).
    pub fn is_ack(&self) -> bool {
        match self.frame_type {
            FrameType::Settings(flags) => flags.contains(SettingsFlags::Ack),
            FrameType::Ping(flags) => flags.contains(PingFlags::Ack),
            _ => false,
        }
    }

    /// Returns true if this frame carries the END_STREAM flag.
    pub fn is_end_stream(&self) -> bool {
        match self.frame_type {
            FrameType::Data(flags) => flags.contains(DataFlags::EndStream),
            FrameType::Headers(flags) => flags.contains(HeadersFlags::EndStream),
            _ => false,
        }
    }

    /// Parse a 9-octet frame header from the given input.
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (len, frame_type, (reserved, stream_id))) = tuple((
            be_u24,
            EncodedFrameType::parse,
            parse_reserved_and_stream_id,
        ))(i)?;

        let frame = Frame {
            frame_type: FrameType::decode(frame_type),
            reserved,
            stream_id,
            len,
        };
        Ok((i, frame))
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        use byteorder::{BigEndian, WriteBytesExt};
        w.write_u24::<BigEndian>(self.len as _)?;
        let ft = self.frame_type.encode();
        w.write_u8(ft.ty)?;
        w.write_u8(ft.flags)?;
        w.write_u32::<BigEndian>(self.stream_id.0 & 0x7fff_ffff)?;

        Ok(())
    }

    /// Serialize the 9-octet frame header.
    pub fn to_vec(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9);
        self.write_into(&mut buf).unwrap();
        buf
    }
}

/// See <https://httpwg.org/specs/rfc7540.html#FrameHeader> - the first bit
/// is reserved, and the rest is a 31-bit stream id
pub fn parse_reserved_and_u31(i: &[u8]) -> IResult<&[u8], (u8, u32)> {
    fn reserved(i: (&[u8], usize)) -> IResult<(&[u8], usize), u8> {
        nom::bits::streaming::take(1_usize)(i)
    }

    fn stream_id(i: (&[u8], usize)) -> IResult<(&[u8], usize), u32> {
        nom::bits::streaming::take(31_usize)(i)
    }

    nom::bits::bits(tuple((reserved, stream_id)))(i)
}

fn parse_reserved_and_stream_id(i: &[u8]) -> IResult<&[u8], (u8, StreamId)> {
    parse_reserved_and_u31(i).map(|(i, (reserved, stream_id))| (i, (reserved, StreamId(stream_id))))
}

fn write_reserved_and_u31(mut w: impl std::io::Write, value: u32) -> std::io::Result<()> {
    use byteorder::{BigEndian, WriteBytesExt};
    w.write_u32::<BigEndian>(value & 0x7fff_ffff)
}

// cf. https://httpwg.org/specs/rfc7540.html#HEADERS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub exclusive: bool,
    pub stream_dependency: StreamId,
    // 0-255 => 1-256
    pub weight: u8,
}

impl PrioritySpec {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(
            tuple((parse_reserved_and_stream_id, be_u8)),
            |((exclusive, stream_dependency), weight)| Self {
                exclusive: exclusive != 0,
                stream_dependency,
                weight,
            },
        )(i)
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        use byteorder::WriteBytesExt;
        let dep = self.stream_dependency.0 | if self.exclusive { 0x8000_0000 } else { 0 };
        w.write_all(&dep.to_be_bytes())?;
        w.write_u8(self.weight)?;
        Ok(())
    }

    pub fn to_vec(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5);
        self.write_into(&mut buf).unwrap();
        buf
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub fn as_repr(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KnownErrorCode::from_repr(self.0) {
            Some(e) => fmt::Debug::fmt(&e, f),
            None => write!(f, "ErrorCode(0x{:02x})", self.0),
        }
    }
}

impl From<KnownErrorCode> for ErrorCode {
    fn from(e: KnownErrorCode) -> Self {
        Self(e as u32)
    }
}

/// cf. <https://httpwg.org/specs/rfc7540.html#ErrorCodes>
#[EnumRepr(type = "u32")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownErrorCode {
    /// The associated condition is not a result of an error. For example, a
    /// GOAWAY might include this code to indicate graceful shutdown of a
    /// connection.
    NoError = 0x00,

    /// The endpoint detected an unspecific protocol error. This error is for
    /// use when a more specific error code is not available.
    ProtocolError = 0x01,

    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x02,

    /// The endpoint detected that its peer violated the flow-control protocol.
    FlowControlError = 0x03,

    /// The endpoint sent a SETTINGS frame but did not receive a response in a
    /// timely manner.
    SettingsTimeout = 0x04,

    /// The endpoint received a frame after a stream was half-closed.
    StreamClosed = 0x05,

    /// The endpoint received a frame with an invalid size.
    FrameSizeError = 0x06,

    /// The endpoint refused the stream prior to performing any application
    /// processing.
    RefusedStream = 0x07,

    /// The endpoint uses this error code to indicate that the stream is no
    /// longer needed.
    Cancel = 0x08,

    /// The endpoint is unable to maintain the header compression context
    /// for the connection.
    CompressionError = 0x09,

    /// The connection established in response to a CONNECT request was reset
    /// or abnormally closed.
    ConnectError = 0x0a,

    /// The endpoint detected that its peer is exhibiting a behavior that might
    /// be generating excessive load.
    EnhanceYourCalm = 0x0b,

    /// The underlying transport has properties that do not meet minimum
    /// security requirements.
    InadequateSecurity = 0x0c,

    /// The endpoint requires that HTTP/1.1 be used instead of HTTP/2.
    Http1_1Required = 0x0d,
}

impl TryFrom<ErrorCode> for KnownErrorCode {
    type Error = ();

    fn try_from(e: ErrorCode) -> Result<Self, Self::Error> {
        KnownErrorCode::from_repr(e.0).ok_or(())
    }
}

/// cf. <https://httpwg.org/specs/rfc7540.html#RST_STREAM>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStream {
    pub error_code: ErrorCode,
}

impl RstStream {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(be_u32, |error_code| Self {
            error_code: ErrorCode(error_code),
        })(i)
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        w.write_all(&self.error_code.0.to_be_bytes())
    }

    pub fn to_vec(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        self.write_into(&mut buf).unwrap();
        buf
    }
}

/// cf. <https://httpwg.org/specs/rfc7540.html#GOAWAY>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoAway {
    pub reserved: u8,
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
    pub additional_debug_data: Vec<u8>,
}

impl GoAway {
    /// Parses the whole payload: the remaining input is taken as debug data.
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, ((reserved, last_stream_id), error_code)) =
            tuple((parse_reserved_and_stream_id, be_u32))(i)?;
        Ok((
            &[][..],
            Self {
                reserved,
                last_stream_id,
                error_code: ErrorCode(error_code),
                additional_debug_data: i.to_vec(),
            },
        ))
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        write_reserved_and_u31(&mut w, self.last_stream_id.0)?;
        w.write_all(&self.error_code.0.to_be_bytes())?;
        w.write_all(&self.additional_debug_data)
    }

    pub fn to_vec(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.additional_debug_data.len());
        self.write_into(&mut buf).unwrap();
        buf
    }
}

/// cf. <https://httpwg.org/specs/rfc7540.html#WINDOW_UPDATE>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    pub reserved: u8,
    pub increment: u32,
}

impl WindowUpdate {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(parse_reserved_and_u31, |(reserved, increment)| Self {
            reserved,
            increment,
        })(i)
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        write_reserved_and_u31(&mut w, self.increment)
    }

    pub fn to_vec(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        self.write_into(&mut buf).unwrap();
        buf
    }
}

/// cf. <https://httpwg.org/specs/rfc7540.html#SettingValues>
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Maximum size of the compression table used to decode header blocks,
    /// in octets. The initial value is 4,096 octets.
    pub header_table_size: u32,

    /// Whether server push is enabled. Any value other than 0 or 1 MUST be
    /// treated as a connection error of type PROTOCOL_ERROR.
    pub enable_push: bool,

    /// Maximum number of concurrent streams that the sender will allow.
    pub max_concurrent_streams: u32,

    /// The sender's initial window size (in octets) for stream-level flow
    /// control. The initial value is 2^16-1 (65,535) octets. Values above
    /// 2^31-1 MUST be treated as a connection error of type
    /// FLOW_CONTROL_ERROR.
    pub initial_window_size: u32,

    /// Size of the largest frame payload that the sender is willing to
    /// receive. The initial value is 2^14 (16,384); values outside
    /// 16,384..=16,777,215 MUST be treated as a connection error of type
    /// PROTOCOL_ERROR.
    pub max_frame_size: u32,

    /// Advisory maximum field section size the sender is prepared to
    /// accept, in octets. Zero stands in for "unlimited" here.
    pub max_header_list_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        // cf. https://httpwg.org/specs/rfc7540.html#SettingValues
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: u32::MAX,
            initial_window_size: (1 << 16) - 1,
            max_frame_size: 1 << 14,
            max_header_list_size: 0,
        }
    }
}

/// Recognized setting identifiers.
#[EnumRepr(type = "u16")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    HeaderTableSize = 0x01,
    EnablePush = 0x02,
    MaxConcurrentStreams = 0x03,
    InitialWindowSize = 0x04,
    MaxFrameSize = 0x05,
    MaxHeaderListSize = 0x06,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("ENABLE_PUSH must be 0 or 1, got {0}")]
    InvalidEnablePush(u32),
    #[error("INITIAL_WINDOW_SIZE above 2^31-1: {0}")]
    InitialWindowSizeTooLarge(u32),
    #[error("MAX_FRAME_SIZE out of range: {0}")]
    MaxFrameSizeOutOfRange(u32),
}

impl Settings {
    pub const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;
    pub const MAX_FRAME_SIZE_ALLOWED_RANGE: RangeInclusive<u32> = (1 << 14)..=((1 << 24) - 1);

    /// Applies a single id/value pair. Unknown identifiers are ignored, as
    /// required by RFC 7540 section 6.5.2.
    pub fn apply(&mut self, id: u16, value: u32) -> Result<(), SettingsError> {
        let Some(id) = Setting::from_repr(id) else {
            return Ok(());
        };
        match id {
            Setting::HeaderTableSize => self.header_table_size = value,
            Setting::EnablePush => {
                self.enable_push = match value {
                    0 => false,
                    1 => true,
                    other => return Err(SettingsError::InvalidEnablePush(other)),
                }
            }
            Setting::MaxConcurrentStreams => self.max_concurrent_streams = value,
            Setting::InitialWindowSize => {
                if value > Self::MAX_INITIAL_WINDOW_SIZE {
                    return Err(SettingsError::InitialWindowSizeTooLarge(value));
                }
                self.initial_window_size = value;
            }
            Setting::MaxFrameSize => {
                if !Self::MAX_FRAME_SIZE_ALLOWED_RANGE.contains(&value) {
                    return Err(SettingsError::MaxFrameSizeOutOfRange(value));
                }
                self.max_frame_size = value;
            }
            Setting::MaxHeaderListSize => self.max_header_list_size = value,
        }
        Ok(())
    }
}

/// Parses a SETTINGS payload into raw id/value pairs, unknown ids included.
pub fn parse_setting_pairs(mut i: &[u8]) -> IResult<&[u8], Vec<(u16, u32)>> {
    let mut pairs = Vec::with_capacity(i.len() / 6);
    while !i.is_empty() {
        let (rest, pair) = tuple((be_u16, be_u32))(i)?;
        tracing::trace!(id = %pair.0, value = %pair.1, "got setting pair");
        pairs.push(pair);
        i = rest;
    }
    Ok((i, pairs))
}

/// An explicit list of settings to write, in order. Unlike [Settings] this
/// lets tests send exactly the pairs they mean to, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingPairs<'a>(pub &'a [(Setting, u32)]);

impl<'a> From<&'a [(Setting, u32)]> for SettingPairs<'a> {
    fn from(value: &'a [(Setting, u32)]) -> Self {
        Self(value)
    }
}

impl SettingPairs<'_> {
    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        use byteorder::{BigEndian, WriteBytesExt};
        for (id, value) in self.0.iter() {
            w.write_u16::<BigEndian>(id.repr())?;
            w.write_u32::<BigEndian>(*value)?;
        }
        Ok(())
    }

    pub fn to_vec(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.0.len() * 6);
        self.write_into(&mut buf).unwrap();
        buf
    }
}

/// Errors from interpreting a frame payload's padding/priority envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("pad length {pad} does not fit payload of {len} octets")]
    PaddingTooLong { pad: usize, len: usize },
    #[error("payload truncated: needed {needed} octets, got {len}")]
    Truncated { needed: usize, len: usize },
}

/// Strips the optional pad-length envelope from a DATA/HEADERS/PUSH_PROMISE
/// payload. The pad length octet counts trailing padding only.
pub fn strip_padding(padded: bool, payload: &[u8]) -> Result<&[u8], PayloadError> {
    if !padded {
        return Ok(payload);
    }
    let Some((&pad, rest)) = payload.split_first() else {
        return Err(PayloadError::Truncated {
            needed: 1,
            len: 0,
        });
    };
    let pad = pad as usize;
    if pad >= payload.len() {
        return Err(PayloadError::PaddingTooLong {
            pad,
            len: payload.len(),
        });
    }
    Ok(&rest[..rest.len() - pad])
}

/// Splits the optional 5-octet priority block off a HEADERS body (after
/// padding removal).
pub fn split_priority(
    has_priority: bool,
    body: &[u8],
) -> Result<(Option<PrioritySpec>, &[u8]), PayloadError> {
    if !has_priority {
        return Ok((None, body));
    }
    if body.len() < 5 {
        return Err(PayloadError::Truncated {
            needed: 5,
            len: body.len(),
        });
    }
    let (rest, spec) = PrioritySpec::parse(body).map_err(|_| PayloadError::Truncated {
        needed: 5,
        len: body.len(),
    })?;
    Ok((Some(spec), rest))
}

/// Splits the 4-octet promised stream id off a PUSH_PROMISE body (after
/// padding removal).
pub fn split_promised_stream_id(body: &[u8]) -> Result<(StreamId, &[u8]), PayloadError> {
    if body.len() < 4 {
        return Err(PayloadError::Truncated {
            needed: 4,
            len: body.len(),
        });
    }
    let (rest, (_, promised)) =
        parse_reserved_and_stream_id(body).map_err(|_| PayloadError::Truncated {
            needed: 4,
            len: body.len(),
        })?;
    Ok((promised, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::Finish;

    fn roundtrip_header(frame: Frame) {
        let encoded = frame.to_vec();
        assert_eq!(encoded.len(), 9, "frame header must be 9 octets");

        // 24-bit length prefix
        let len = u32::from_be_bytes([0, encoded[0], encoded[1], encoded[2]]);
        assert_eq!(len, frame.len);
        let ft = frame.frame_type.encode();
        assert_eq!(encoded[3], ft.ty);
        assert_eq!(encoded[4], ft.flags);
        assert_eq!(encoded[5] & 0x80, 0, "reserved bit must be zero");

        let (rest, parsed) = Frame::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_frame_header_roundtrip() {
        roundtrip_header(
            Frame::new(
                FrameType::Data(DataFlags::EndStream | DataFlags::Padded),
                StreamId(1),
            )
            .with_len(42),
        );
        roundtrip_header(
            Frame::new(
                FrameType::Headers(HeadersFlags::EndHeaders | HeadersFlags::Priority),
                StreamId(3),
            )
            .with_len(117),
        );
        roundtrip_header(Frame::new(FrameType::Priority, StreamId(5)).with_len(5));
        roundtrip_header(Frame::new(FrameType::RstStream, StreamId(7)).with_len(4));
        roundtrip_header(Frame::new(
            FrameType::Settings(SettingsFlags::Ack.into()),
            StreamId::CONNECTION,
        ));
        roundtrip_header(
            Frame::new(
                FrameType::PushPromise(PushPromiseFlags::EndHeaders.into()),
                StreamId(9),
            )
            .with_len(12),
        );
        roundtrip_header(
            Frame::new(FrameType::Ping(PingFlags::Ack.into()), StreamId::CONNECTION).with_len(8),
        );
        roundtrip_header(Frame::new(FrameType::GoAway, StreamId::CONNECTION).with_len(16));
        roundtrip_header(Frame::new(FrameType::WindowUpdate, StreamId(11)).with_len(4));
        roundtrip_header(
            Frame::new(
                FrameType::Continuation(ContinuationFlags::EndHeaders.into()),
                StreamId(13),
            )
            .with_len(6),
        );
    }

    #[test]
    fn test_unknown_frame_type_survives() {
        let frame = Frame::new(
            FrameType::Unknown(EncodedFrameType { ty: 0xbe, flags: 0xef }),
            StreamId(21),
        )
        .with_len(3);
        let encoded = frame.to_vec();
        let (_, parsed) = Frame::parse(&encoded).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_incomplete_header_is_incomplete() {
        let frame = Frame::new(FrameType::Priority, StreamId(1)).with_len(5);
        let encoded = frame.to_vec();
        assert!(matches!(
            Frame::parse(&encoded[..4]),
            Err(nom::Err::Incomplete(_))
        ));
    }

    #[test]
    fn test_priority_spec_roundtrip() {
        for spec in [
            PrioritySpec {
                exclusive: false,
                stream_dependency: StreamId(0),
                weight: 0,
            },
            PrioritySpec {
                exclusive: true,
                stream_dependency: StreamId(31),
                weight: 255,
            },
        ] {
            let encoded = spec.to_vec();
            assert_eq!(encoded.len(), 5);
            let (rest, parsed) = PrioritySpec::parse(&encoded).finish().unwrap();
            assert!(rest.is_empty());
            assert_eq!(parsed, spec);
        }
    }

    #[test]
    fn test_goaway_roundtrip() {
        let goaway = GoAway {
            reserved: 0,
            last_stream_id: StreamId(7),
            error_code: KnownErrorCode::EnhanceYourCalm.into(),
            additional_debug_data: b"calm down".to_vec(),
        };
        let encoded = goaway.clone().to_vec();
        let (rest, parsed) = GoAway::parse(&encoded).finish().unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, goaway);
    }

    #[test]
    fn test_window_update_strips_reserved_bit() {
        let encoded = 0x8000_0001u32.to_be_bytes();
        let (_, parsed) = WindowUpdate::parse(&encoded).finish().unwrap();
        assert_eq!(parsed.reserved, 1);
        assert_eq!(parsed.increment, 1);
    }

    #[test]
    fn test_settings_apply_ignores_unknown_ids() {
        let mut settings = Settings::default();
        settings.apply(0x4242, 17).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_settings_apply_validates() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.apply(Setting::EnablePush.repr(), 2),
            Err(SettingsError::InvalidEnablePush(2))
        );
        assert_eq!(
            settings.apply(Setting::InitialWindowSize.repr(), 1 << 31),
            Err(SettingsError::InitialWindowSizeTooLarge(1 << 31))
        );
        assert_eq!(
            settings.apply(Setting::MaxFrameSize.repr(), 16383),
            Err(SettingsError::MaxFrameSizeOutOfRange(16383))
        );
        settings.apply(Setting::MaxFrameSize.repr(), 16384).unwrap();
        assert_eq!(settings.max_frame_size, 16384);
    }

    #[test]
    fn test_setting_pairs_roundtrip() {
        let pairs = [
            (Setting::InitialWindowSize, 65535),
            (Setting::MaxFrameSize, 16384),
        ];
        let encoded = SettingPairs::from(pairs.as_ref()).to_vec();
        assert_eq!(encoded.len(), 12);
        let (_, parsed) = parse_setting_pairs(&encoded).finish().unwrap();
        assert_eq!(parsed, vec![(0x04, 65535), (0x05, 16384)]);
    }

    #[test]
    fn test_strip_padding() {
        assert_eq!(strip_padding(false, b"abcd").unwrap(), b"abcd");
        // 2 octets of padding after the body
        assert_eq!(strip_padding(true, b"\x02abcd\x00\x00").unwrap(), b"abcd");
        // pad length equal to the payload length is an error
        assert_eq!(
            strip_padding(true, b"\x06Test!"),
            Err(PayloadError::PaddingTooLong { pad: 6, len: 6 })
        );
    }

    #[test]
    fn test_split_priority() {
        let spec = PrioritySpec {
            exclusive: true,
            stream_dependency: StreamId(3),
            weight: 16,
        };
        let mut body = spec.to_vec();
        body.extend_from_slice(b"fragment");
        let (parsed, rest) = split_priority(true, &body).unwrap();
        assert_eq!(parsed, Some(spec));
        assert_eq!(rest, b"fragment");

        assert_eq!(
            split_priority(true, b"\x00\x00"),
            Err(PayloadError::Truncated { needed: 5, len: 2 })
        );
    }
}

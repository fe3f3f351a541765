//! Conformance test harness for HTTP/2 servers.
//!
//! The harness acts as a client: it opens a connection to the server under
//! test, drives it through a scripted sequence of frames (including
//! deliberately malformed ones) and checks the server's reaction against
//! the requirement each test case encodes.
//!
//! [`Conn`] is the connection driver every test case receives; the
//! [`verify`] module holds the assertion primitives and [`suite`] the
//! test-case/group scaffolding plus the runner.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use enumflags2::{bitflags, BitFlags};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use wirecheck_h2_parse::{
    nom, ContinuationFlags, DataFlags, ErrorCode, Frame, FrameType, HeadersFlags, KnownErrorCode,
    PingFlags, PrioritySpec, RstStream, Setting, SettingPairs, Settings, SettingsFlags, StreamId,
    PREFACE,
};

pub mod events;
pub mod suite;
pub mod transport;
pub mod verify;

pub mod generic;
pub mod rfc7540;
pub mod rfc7541;

pub use events::{Event, EventT};
pub use verify::TestError;

use transport::BoxedTransport;

/// The window size and frame size this endpoint advertises in its
/// handshake SETTINGS.
pub const DEFAULT_WINDOW_SIZE: u32 = 65536;
pub const DEFAULT_FRAME_SIZE: u32 = 16384;

/// How many parsed events may pile up before the reader applies
/// backpressure to the peer.
const EVENT_QUEUE_DEPTH: usize = 64;

/// A single header field, in the order the test supplied it. Sensitive
/// fields are encoded as never-indexed literals and kept out of the HPACK
/// tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub sensitive: bool,
}

/// An ordered header sequence. Ordering matters: HPACK round-trips must
/// preserve it.
pub type Headers = Vec<HeaderField>;

/// Shorthand for building a non-sensitive [HeaderField].
pub fn header(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> HeaderField {
    HeaderField {
        name: name.into(),
        value: value.into(),
        sensitive: false,
    }
}

// A hollow variant of [KnownErrorCode]
#[bitflags]
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorC {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http1_1Required,
}

impl From<ErrorC> for ErrorCode {
    fn from(value: ErrorC) -> Self {
        KnownErrorCode::from(value).into()
    }
}

impl From<ErrorC> for KnownErrorCode {
    fn from(value: ErrorC) -> Self {
        match value {
            ErrorC::NoError => Self::NoError,
            ErrorC::ProtocolError => Self::ProtocolError,
            ErrorC::InternalError => Self::InternalError,
            ErrorC::FlowControlError => Self::FlowControlError,
            ErrorC::SettingsTimeout => Self::SettingsTimeout,
            ErrorC::StreamClosed => Self::StreamClosed,
            ErrorC::FrameSizeError => Self::FrameSizeError,
            ErrorC::RefusedStream => Self::RefusedStream,
            ErrorC::Cancel => Self::Cancel,
            ErrorC::CompressionError => Self::CompressionError,
            ErrorC::ConnectError => Self::ConnectError,
            ErrorC::EnhanceYourCalm => Self::EnhanceYourCalm,
            ErrorC::InadequateSecurity => Self::InadequateSecurity,
            ErrorC::Http1_1Required => Self::Http1_1Required,
        }
    }
}

impl From<KnownErrorCode> for ErrorC {
    fn from(value: KnownErrorCode) -> Self {
        match value {
            KnownErrorCode::NoError => Self::NoError,
            KnownErrorCode::ProtocolError => Self::ProtocolError,
            KnownErrorCode::InternalError => Self::InternalError,
            KnownErrorCode::FlowControlError => Self::FlowControlError,
            KnownErrorCode::SettingsTimeout => Self::SettingsTimeout,
            KnownErrorCode::StreamClosed => Self::StreamClosed,
            KnownErrorCode::FrameSizeError => Self::FrameSizeError,
            KnownErrorCode::RefusedStream => Self::RefusedStream,
            KnownErrorCode::Cancel => Self::Cancel,
            KnownErrorCode::CompressionError => Self::CompressionError,
            KnownErrorCode::ConnectError => Self::ConnectError,
            KnownErrorCode::EnhanceYourCalm => Self::EnhanceYourCalm,
            KnownErrorCode::InadequateSecurity => Self::InadequateSecurity,
            KnownErrorCode::Http1_1Required => Self::Http1_1Required,
        }
    }
}

/// Parameters for tests
#[derive(Debug, Clone)]
pub struct Config {
    /// which host to connect to
    pub host: String,

    /// which port to connect to
    pub port: u16,

    /// which path to request
    pub path: String,

    /// which method requests use
    pub method: String,

    /// scheme override; derived from `tls` when unset
    pub scheme: Option<String>,

    /// whether to use TLS (ALPN must negotiate h2)
    pub tls: bool,

    /// whether to skip TLS certificate verification
    pub insecure: bool,

    /// how long to wait for a single event
    pub timeout: Duration,

    /// length of the value of each generated dummy header
    pub max_header_len: usize,

    /// SETTINGS_MAX_HEADER_LIST_SIZE to advertise in the handshake
    pub max_header_list_size: Option<u32>,

    /// list tests without opening connections
    pub dry_run: bool,

    /// in strict mode, connection close without a GOAWAY does not count
    /// as a connection error reaction
    pub strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 80,
            path: "/".into(),
            method: "GET".into(),
            scheme: None,
            tls: false,
            insecure: false,
            timeout: Duration::from_secs(1),
            max_header_len: 4000,
            max_header_list_size: None,
            dry_run: false,
            strict: false,
        }
    }
}

impl Config {
    pub fn scheme(&self) -> &str {
        match &self.scheme {
            Some(scheme) => scheme,
            None if self.tls => "https",
            None => "http",
        }
    }

    fn authority(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// The connection driver handed to each test case.
///
/// It owns the transport for the duration of one test: writers go straight
/// to the socket (no protocol enforcement, tests depend on being able to
/// emit illegal frames), while a background task parses inbound bytes into
/// [Event]s and queues them in arrival order.
pub struct Conn {
    w: Arc<tokio::sync::Mutex<WriteHalf<BoxedTransport>>>,
    ev_rx: mpsc::Receiver<Event>,
    config: Arc<Config>,
    hpack_enc: wirecheck_hpack::Encoder<'static>,
    hpack_dec: wirecheck_hpack::Decoder<'static>,
    peer_settings: Arc<StdMutex<Settings>>,
    /// connection-level send window; stream-0 WINDOW_UPDATEs credit it
    send_window: Arc<AtomicI32>,
    /// set once the transport observed EOF, a local shutdown, or an
    /// unrecoverable read error
    pub closed: bool,
}

impl Conn {
    pub fn new(config: Arc<Config>, io: BoxedTransport) -> Self {
        let (r, w) = tokio::io::split(io);
        let w = Arc::new(tokio::sync::Mutex::new(w));
        let peer_settings = Arc::new(StdMutex::new(Settings::default()));
        let send_window = Arc::new(AtomicI32::new(65535));

        let (ev_tx, ev_rx) = mpsc::channel::<Event>(EVENT_QUEUE_DEPTH);
        tokio::spawn(read_loop(
            r,
            w.clone(),
            peer_settings.clone(),
            send_window.clone(),
            ev_tx,
        ));

        let mut hpack_dec = wirecheck_hpack::Decoder::new();
        // we never advertise SETTINGS_HEADER_TABLE_SIZE, so the peer's
        // encoder is bound by the 4096-octet default
        hpack_dec.set_max_allowed_table_size(4096);

        Self {
            w,
            ev_rx,
            config,
            hpack_enc: wirecheck_hpack::Encoder::new(),
            hpack_dec,
            peer_settings,
            send_window,
            closed: false,
        }
    }

    /// The settings this endpoint sends right after the preface.
    fn local_settings(&self) -> Vec<(Setting, u32)> {
        let mut settings = vec![
            (Setting::InitialWindowSize, DEFAULT_WINDOW_SIZE),
            (Setting::MaxFrameSize, DEFAULT_FRAME_SIZE),
        ];
        if let Some(size) = self.config.max_header_list_size {
            settings.push((Setting::MaxHeaderListSize, size));
        }
        settings
    }

    /// Performs the client half of the HTTP/2 handshake: the 24-octet
    /// preface, this endpoint's SETTINGS, then waits for the server's
    /// SETTINGS (which the background reader acks automatically).
    pub async fn handshake(&mut self) -> eyre::Result<()> {
        self.send(PREFACE).await?;
        let local_settings = self.local_settings();
        self.write_settings(&local_settings).await?;

        loop {
            match self.wait_event_by_type(EventT::Settings).await {
                Event::Settings(ev) if !ev.is_ack() => break,
                // the ack of our own settings may arrive first
                Event::Settings(_) => continue,
                other => eyre::bail!("handshake failed, got: {other}"),
            }
        }

        // the peer's HEADER_TABLE_SIZE bounds our encoder's table
        let header_table_size = self.peer_settings().header_table_size as usize;
        if header_table_size < 4096 {
            self.hpack_enc.set_max_table_size(header_table_size);
        }

        Ok(())
    }

    /// A snapshot of the settings the peer has advertised so far.
    pub fn peer_settings(&self) -> Settings {
        *self.peer_settings.lock().unwrap()
    }

    /// The largest frame payload the peer accepts.
    pub fn max_frame_size(&self) -> usize {
        self.peer_settings().max_frame_size as usize
    }

    /// The connection-level flow-control window left for this endpoint.
    pub fn send_window(&self) -> i32 {
        self.send_window.load(Ordering::SeqCst)
    }

    /// Returns the next queued event, in the order the peer emitted the
    /// frames. Waits up to the per-operation timeout and synthesizes a
    /// [Event::Timeout] after it; the connection itself stays usable.
    pub async fn wait_event(&mut self) -> Event {
        let deadline = tokio::time::Instant::now() + self.config.timeout;
        self.wait_event_with_deadline(deadline).await
    }

    async fn wait_event_with_deadline(&mut self, deadline: tokio::time::Instant) -> Event {
        if self.closed {
            return Event::ConnectionClosed;
        }
        match tokio::time::timeout_at(deadline, self.ev_rx.recv()).await {
            Err(_) => Event::Timeout,
            Ok(None) => {
                self.closed = true;
                Event::ConnectionClosed
            }
            Ok(Some(ev)) => {
                if matches!(ev, Event::ConnectionClosed | Event::Error(_)) {
                    self.closed = true;
                }
                ev
            }
        }
    }

    /// Drains events until one of the given types appears, a non-matching
    /// terminal event intervenes, or the per-operation deadline passes.
    /// Non-matching intermediate events are consumed and discarded.
    pub async fn wait_event_by_type(&mut self, types: impl Into<BitFlags<EventT>>) -> Event {
        let types = types.into();
        let deadline = tokio::time::Instant::now() + self.config.timeout;
        loop {
            let ev = self.wait_event_with_deadline(deadline).await;
            if types.contains(ev.event_type()) {
                return ev;
            }
            match ev {
                Event::ConnectionClosed | Event::Timeout | Event::Error(_) => return ev,
                other => trace!("discarding {other}"),
            }
        }
    }

    /// Writes raw bytes to the transport, bypassing all framing. After an
    /// explicit [Conn::close] this is a no-op.
    pub async fn send(&mut self, buf: impl AsRef<[u8]>) -> eyre::Result<()> {
        if self.closed {
            return Ok(());
        }
        let mut w = self.w.lock().await;
        w.write_all(buf.as_ref()).await?;
        w.flush().await?;
        Ok(())
    }

    /// Writes a frame with the given payload; the frame's length field is
    /// set to the payload length. Nothing is validated.
    pub async fn write_frame(&mut self, frame: Frame, payload: impl AsRef<[u8]>) -> eyre::Result<()> {
        let payload = payload.as_ref();
        let frame = frame.with_len(payload.len() as u32);
        debug!("> {frame:?}");
        let mut buf = frame.to_vec();
        buf.extend_from_slice(payload);
        self.send(buf).await
    }

    pub async fn write_headers(
        &mut self,
        stream_id: StreamId,
        flags: impl Into<BitFlags<HeadersFlags>>,
        block_fragment: impl AsRef<[u8]>,
    ) -> eyre::Result<()> {
        let frame = Frame::new(FrameType::Headers(flags.into()), stream_id);
        self.write_frame(frame, block_fragment).await
    }

    pub async fn write_headers_with_priority(
        &mut self,
        stream_id: StreamId,
        flags: impl Into<BitFlags<HeadersFlags>>,
        priority_spec: PrioritySpec,
        block_fragment: impl AsRef<[u8]>,
    ) -> eyre::Result<()> {
        let flags = flags.into() | HeadersFlags::Priority;
        let frame = Frame::new(FrameType::Headers(flags), stream_id);

        let mut payload = priority_spec.to_vec();
        payload.extend_from_slice(block_fragment.as_ref());
        self.write_frame(frame, payload).await
    }

    pub async fn write_priority(
        &mut self,
        stream_id: StreamId,
        priority_spec: PrioritySpec,
    ) -> eyre::Result<()> {
        self.write_frame(
            FrameType::Priority.into_frame(stream_id),
            priority_spec.to_vec(),
        )
        .await
    }

    pub async fn write_rst_stream(
        &mut self,
        stream_id: StreamId,
        error_code: impl Into<ErrorCode>,
    ) -> eyre::Result<()> {
        let rst_stream = RstStream {
            error_code: error_code.into(),
        };
        self.write_frame(FrameType::RstStream.into_frame(stream_id), rst_stream.to_vec())
            .await
    }

    pub async fn write_settings(&mut self, settings: &[(Setting, u32)]) -> eyre::Result<()> {
        self.write_frame(
            FrameType::Settings(Default::default()).into_frame(StreamId::CONNECTION),
            SettingPairs(settings).to_vec(),
        )
        .await
    }

    pub async fn write_settings_ack(&mut self) -> eyre::Result<()> {
        self.write_frame(
            FrameType::Settings(SettingsFlags::Ack.into()).into_frame(StreamId::CONNECTION),
            [],
        )
        .await
    }

    pub async fn write_ping(&mut self, ack: bool, payload: impl AsRef<[u8]>) -> eyre::Result<()> {
        self.write_frame(
            FrameType::Ping(if ack {
                PingFlags::Ack.into()
            } else {
                Default::default()
            })
            .into_frame(StreamId::CONNECTION),
            payload,
        )
        .await
    }

    pub async fn write_window_update(
        &mut self,
        stream_id: StreamId,
        increment: u32,
    ) -> eyre::Result<()> {
        let window_update = wirecheck_h2_parse::WindowUpdate {
            reserved: 0,
            increment,
        };
        self.write_frame(
            FrameType::WindowUpdate.into_frame(stream_id),
            window_update.to_vec(),
        )
        .await
    }

    pub async fn write_continuation(
        &mut self,
        stream_id: StreamId,
        flags: impl Into<BitFlags<ContinuationFlags>>,
        block_fragment: impl AsRef<[u8]>,
    ) -> eyre::Result<()> {
        let frame = Frame::new(FrameType::Continuation(flags.into()), stream_id);
        self.write_frame(frame, block_fragment).await
    }

    pub async fn write_data(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        data: impl AsRef<[u8]>,
    ) -> eyre::Result<()> {
        let frame = Frame::new(
            FrameType::Data(if end_stream {
                DataFlags::EndStream.into()
            } else {
                Default::default()
            }),
            stream_id,
        );
        self.write_frame(frame, data).await
    }

    /// Shuts the transport down. Subsequent writes are no-ops and
    /// subsequent waits return [Event::ConnectionClosed].
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut w = self.w.lock().await;
        _ = w.shutdown().await;
    }

    /// Encodes a header sequence with this connection's outbound HPACK
    /// encoder.
    pub fn encode_headers(&mut self, headers: &Headers) -> eyre::Result<Vec<u8>> {
        let mut fragment = Vec::new();
        for field in headers {
            if field.sensitive {
                self.hpack_enc.encode_sensitive_header_into(
                    (&field.name, &field.value),
                    &mut fragment,
                )?;
            } else {
                self.hpack_enc
                    .encode_header_into((&field.name, &field.value), &mut fragment)?;
            }
        }
        Ok(fragment)
    }

    /// Decodes a header block with this connection's inbound HPACK decoder.
    ///
    /// The buffer should hold the entire block: continuation fragments need
    /// to be concatenated before decoding.
    pub fn decode_headers(&mut self, fragment: &[u8]) -> eyre::Result<Headers> {
        let res = self
            .hpack_dec
            .decode(fragment)
            .map_err(|e| eyre::eyre!("hpack decoder error: {e}"))?;
        Ok(res
            .into_iter()
            .map(|(name, value)| HeaderField {
                name,
                value,
                sensitive: false,
            })
            .collect())
    }

    /// The header sequence of an ordinary request against the configured
    /// target.
    pub fn common_headers(&self) -> Headers {
        let config = &self.config;
        let authority = config.authority();
        vec![
            header(":method", config.method.clone()),
            header(":scheme", config.scheme()),
            header(":path", config.path.clone()),
            header(":authority", authority.clone()),
            header("host", authority),
        ]
    }

    /// `len` filler headers, each with a value of the configured dummy
    /// length. Useful to inflate header blocks past frame-size limits.
    pub fn dummy_headers(&self, len: usize) -> Headers {
        let dummy = dummy_bytes(self.config.max_header_len);
        (0..len)
            .map(|i| header(format!("x-dummy{i}"), dummy.clone()))
            .collect()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }
}

/// The background read half: parses inbound bytes into events and forwards
/// them in arrival order. Also owns the two automatic driver behaviors:
/// acking the peer's SETTINGS and crediting the connection send window on
/// stream-0 WINDOW_UPDATE.
async fn read_loop(
    mut r: ReadHalf<BoxedTransport>,
    w: Arc<tokio::sync::Mutex<WriteHalf<BoxedTransport>>>,
    peer_settings: Arc<StdMutex<Settings>>,
    send_window: Arc<AtomicI32>,
    ev_tx: mpsc::Sender<Event>,
) {
    let mut buf = BytesMut::with_capacity(16384);
    let mut eof = false;

    'read: loop {
        // frame header
        let frame = loop {
            match Frame::parse(&buf[..]) {
                Ok((rest, frame)) => {
                    let consumed = buf.len() - rest.len();
                    buf.advance(consumed);
                    break frame;
                }
                Err(nom::Err::Incomplete(_)) => {
                    if eof {
                        if !buf.is_empty() {
                            debug!(
                                "peer sent incomplete frame header then hung up (buf len: {})",
                                buf.len()
                            );
                        }
                        break 'read;
                    }
                    match r.read_buf(&mut buf).await {
                        Ok(0) => {
                            debug!("reached EOF");
                            eof = true;
                            if buf.is_empty() {
                                break 'read;
                            }
                        }
                        Ok(n) => trace!(%n, "read bytes (reading frame header)"),
                        Err(error) => {
                            _ = ev_tx.send(Event::Error(error.to_string())).await;
                            return;
                        }
                    }
                }
                Err(_) => {
                    _ = ev_tx
                        .send(Event::Error("unparseable frame header".into()))
                        .await;
                    return;
                }
            }
        };

        // frame payload
        let frame_len = frame.len as usize;
        while buf.len() < frame_len {
            if eof {
                debug!("peer sent frame header, then incomplete payload, then hung up");
                break 'read;
            }
            match r.read_buf(&mut buf).await {
                Ok(0) => eof = true,
                Ok(n) => trace!(%n, len = %buf.len(), "read bytes (reading frame payload)"),
                Err(error) => {
                    _ = ev_tx.send(Event::Error(error.to_string())).await;
                    return;
                }
            }
        }
        let payload = buf.split_to(frame_len).freeze();
        debug!("< {frame:?}");

        let ev = Event::from_frame(frame, &payload);

        match &ev {
            Event::Settings(settings_ev) if !settings_ev.is_ack() => {
                {
                    let mut settings = peer_settings.lock().unwrap();
                    for (id, value) in &settings_ev.pairs {
                        if let Err(error) = settings.apply(*id, *value) {
                            warn!(%error, "peer sent an invalid setting");
                        }
                    }
                }
                let ack = Frame::new(
                    FrameType::Settings(SettingsFlags::Ack.into()),
                    StreamId::CONNECTION,
                );
                let mut w = w.lock().await;
                if let Err(error) = w.write_all(&ack.to_vec()).await {
                    debug!(%error, "could not ack settings");
                } else {
                    _ = w.flush().await;
                }
            }
            Event::WindowUpdate(wu) if wu.stream_id() == StreamId::CONNECTION => {
                send_window.fetch_add(wu.increment as i32, Ordering::SeqCst);
            }
            _ => {}
        }

        if ev_tx.send(ev).await.is_err() {
            // the test is done with this connection
            return;
        }
    }

    _ = ev_tx.send(Event::ConnectionClosed).await;
}

// DummyString returns a dummy string with specified length.
pub fn dummy_string(len: usize) -> String {
    "x".repeat(len)
}

// DummyBytes returns an array of bytes with specified length.
pub fn dummy_bytes(len: usize) -> Vec<u8> {
    vec![b'x'; len]
}

/// The full catalog: the three top-level groups a runner iterates.
pub fn catalog() -> Vec<suite::TestGroup> {
    vec![generic::group(), rfc7540::group(), rfc7541::group()]
}

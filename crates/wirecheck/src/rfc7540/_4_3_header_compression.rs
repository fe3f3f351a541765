//! Section 4.3: Header Compression and Decompression

use std::sync::Arc;

use enumflags2::BitFlags;
use wirecheck_h2_parse::{ContinuationFlags, HeadersFlags, PrioritySpec, StreamId};

use crate::suite::{TestCase, TestGroup};
use crate::verify::{verify_connection_error, TestError};
use crate::{Config, Conn, ErrorC};

pub fn group() -> TestGroup {
    let mut tg = TestGroup::new("4.3", "Header Compression and Decompression");
    tg.add_test_case(TestCase::new(
        "Sends invalid header block fragment",
        "The endpoint MUST terminate the connection with a connection error of type COMPRESSION_ERROR.",
        invalid_header_block_fragment,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a PRIORITY frame while sending the header blocks",
        "The endpoint MUST terminate the connection with a connection error of type PROTOCOL_ERROR.",
        priority_frame_while_sending_headers,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a HEADERS frame to another stream while sending the header blocks",
        "The endpoint MUST terminate the connection with a connection error of type PROTOCOL_ERROR.",
        headers_frame_to_another_stream,
    ));
    tg
}

/// A decoding error in a header block MUST be treated as a connection
/// error (Section 5.4.1) of type COMPRESSION_ERROR.
async fn invalid_header_block_fragment(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    conn.handshake().await?;

    // Literal Header Field with Incremental Indexing without
    // Length and String segment.
    conn.send(b"\x00\x00\x01\x01\x05\x00\x00\x00\x01\x40")
        .await?;

    verify_connection_error(&mut conn, ErrorC::CompressionError).await
}

/// Each header block is processed as a discrete unit. Header blocks
/// MUST be transmitted as a contiguous sequence of frames, with no
/// interleaved frames of any other type or from any other stream.
async fn priority_frame_while_sending_headers(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    let stream_id = StreamId(1);

    conn.handshake().await?;

    let headers = conn.common_headers();
    let block_fragment = conn.encode_headers(&headers)?;

    conn.write_headers(stream_id, BitFlags::default(), block_fragment)
        .await?;

    // this priority frame doesn't belong here, the peer should send
    // us a protocol error.
    conn.write_priority(
        stream_id,
        PrioritySpec {
            stream_dependency: StreamId(0),
            exclusive: false,
            weight: 255,
        },
    )
    .await?;

    let dummy_headers = conn.dummy_headers(1);
    let continuation_fragment = conn.encode_headers(&dummy_headers)?;

    // this may fail (we broke the protocol)
    _ = conn
        .write_continuation(
            stream_id,
            ContinuationFlags::EndHeaders,
            continuation_fragment,
        )
        .await;

    verify_connection_error(&mut conn, ErrorC::ProtocolError).await
}

/// Each header block is processed as a discrete unit. Header blocks
/// MUST be transmitted as a contiguous sequence of frames, with no
/// interleaved frames of any other type or from any other stream.
async fn headers_frame_to_another_stream(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    let stream_id = StreamId(1);

    conn.handshake().await?;

    let headers = conn.common_headers();
    let block_fragment = conn.encode_headers(&headers)?;

    conn.write_headers(stream_id, BitFlags::default(), block_fragment)
        .await?;

    // interleave a HEADERS frame for another stream
    let headers_fragment_2 = conn.encode_headers(&headers)?;
    conn.write_headers(
        StreamId(stream_id.0 + 2),
        HeadersFlags::EndHeaders,
        headers_fragment_2,
    )
    .await?;

    let dummy_headers = conn.dummy_headers(1);
    let continuation_fragment = conn.encode_headers(&dummy_headers)?;

    // this may fail (we broke the protocol)
    _ = conn
        .write_continuation(
            stream_id,
            ContinuationFlags::EndHeaders,
            continuation_fragment,
        )
        .await;

    verify_connection_error(&mut conn, ErrorC::ProtocolError).await
}

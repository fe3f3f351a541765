//! Section 4.2: Maximum Table Size

use std::sync::Arc;

use wirecheck_h2_parse::{HeadersFlags, StreamId};

use crate::suite::{TestCase, TestGroup};
use crate::verify::{verify_connection_error, verify_stream_close, TestError};
use crate::{header, Config, Conn, ErrorC};

pub fn group() -> TestGroup {
    let mut tg = TestGroup::new("4.2", "Maximum Table Size");
    tg.add_test_case(TestCase::new(
        "Sends dynamic table size updates at the beginning of a header block",
        "The endpoint MUST accept dynamic table size updates at the beginning of a header block.",
        size_updates_at_block_start,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a dynamic table size update after the first header field",
        "The endpoint MUST treat this as a connection error of type COMPRESSION_ERROR.",
        size_update_after_first_field,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a dynamic table size update larger than the advertised maximum",
        "The endpoint MUST treat this as a connection error of type COMPRESSION_ERROR.",
        size_update_beyond_advertised_maximum,
    ));
    tg
}

/// Encodes a dynamic table size update (prefix 0b001, 5-bit integer).
fn size_update(value: usize) -> Vec<u8> {
    if value < 31 {
        return vec![0x20 | value as u8];
    }
    let mut buf = vec![0x3f];
    let mut value = value - 31;
    while value >= 128 {
        buf.push((value % 128 + 128) as u8);
        value /= 128;
    }
    buf.push(value as u8);
    buf
}

/// A change in the maximum size of the dynamic table is signaled via a
/// dynamic table size update. Updates at the beginning of a header
/// block are legal, two in a row included (an intermediate shrink of
/// the table), and the request must still get an ordinary response.
async fn size_updates_at_block_start(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    let stream_id = StreamId(1);

    conn.handshake().await?;

    let headers = conn.common_headers();
    // shrink the table to nothing, then back to the default
    let mut block_fragment = size_update(0);
    block_fragment.extend_from_slice(&size_update(4096));
    block_fragment.extend_from_slice(&conn.encode_headers(&headers)?);

    conn.write_headers(
        stream_id,
        HeadersFlags::EndStream | HeadersFlags::EndHeaders,
        block_fragment,
    )
    .await?;

    verify_stream_close(&mut conn, stream_id).await
}

/// A change in the maximum size of the dynamic table is signaled via a
/// dynamic table size update. This MUST occur at the beginning of the
/// first header block following the change.
async fn size_update_after_first_field(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    conn.handshake().await?;

    let headers = conn.common_headers();
    let mut block_fragment = conn.encode_headers(&headers)?;
    // a size update in the middle of the block, then one more field
    block_fragment.extend_from_slice(&size_update(0));
    let trailing = vec![header("x-test", "1")];
    block_fragment.extend_from_slice(&conn.encode_headers(&trailing)?);

    conn.write_headers(
        StreamId(1),
        HeadersFlags::EndStream | HeadersFlags::EndHeaders,
        block_fragment,
    )
    .await?;

    verify_connection_error(&mut conn, ErrorC::CompressionError).await
}

/// The new maximum size MUST be lower than or equal to the limit
/// determined by the protocol using HPACK, i.e. the value of the
/// SETTINGS_HEADER_TABLE_SIZE parameter the decoder advertised.
async fn size_update_beyond_advertised_maximum(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    conn.handshake().await?;

    // the server never saw us lower SETTINGS_HEADER_TABLE_SIZE, so its
    // limit is whatever it advertised itself (4096 by default)
    let limit = conn.peer_settings().header_table_size as usize;

    let headers = conn.common_headers();
    let mut block_fragment = size_update(limit + 1);
    block_fragment.extend_from_slice(&conn.encode_headers(&headers)?);

    conn.write_headers(
        StreamId(1),
        HeadersFlags::EndStream | HeadersFlags::EndHeaders,
        block_fragment,
    )
    .await?;

    verify_connection_error(&mut conn, ErrorC::CompressionError).await
}

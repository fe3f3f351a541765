//! Section 3.3: PRIORITY

use std::sync::Arc;

use wirecheck_h2_parse::{HeadersFlags, PrioritySpec, StreamId};

use crate::suite::{TestCase, TestGroup};
use crate::verify::{verify_headers_frame, TestError};
use crate::{Config, Conn};

pub fn group() -> TestGroup {
    let mut tg = TestGroup::new("3.3", "PRIORITY");
    tg.add_test_case(TestCase::new(
        "Sends a PRIORITY frame with priority 1",
        "The endpoint MUST accept PRIORITY frame with priority 1.",
        priority_frame_with_priority_one,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a PRIORITY frame with priority 256",
        "The endpoint MUST accept PRIORITY frame with priority 256.",
        priority_frame_with_priority_256,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a PRIORITY frame with stream dependency",
        "The endpoint MUST accept PRIORITY frame with stream dependency.",
        priority_frame_with_stream_dependency,
    ));
    tg.add_test_case(TestCase::new(
        "Sends a PRIORITY frame with exclusive",
        "The endpoint MUST accept PRIORITY frame with exclusive.",
        priority_frame_with_exclusive,
    ));
    tg
}

/// The PRIORITY frame (type=0x2) specifies the sender-advised priority
/// of a stream (Section 5.3). It can be sent in any stream state,
/// including idle or closed streams.
async fn priority_frame_with_priority_one(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    let stream_id = StreamId(1);

    conn.handshake().await?;

    conn.write_priority(
        stream_id,
        PrioritySpec {
            stream_dependency: StreamId(0),
            exclusive: false,
            weight: 0,
        },
    )
    .await?;

    request_and_expect_headers(&mut conn, stream_id).await
}

/// The PRIORITY frame (type=0x2) specifies the sender-advised priority
/// of a stream (Section 5.3). It can be sent in any stream state,
/// including idle or closed streams.
async fn priority_frame_with_priority_256(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    let stream_id = StreamId(1);

    conn.handshake().await?;

    conn.write_priority(
        stream_id,
        PrioritySpec {
            stream_dependency: StreamId(0),
            exclusive: false,
            weight: 255,
        },
    )
    .await?;

    request_and_expect_headers(&mut conn, stream_id).await
}

/// Stream Dependency: a 31-bit stream identifier for the stream that
/// this stream depends on (see Section 5.3).
async fn priority_frame_with_stream_dependency(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    let stream_id = StreamId(1);

    conn.handshake().await?;

    conn.write_priority(
        StreamId(stream_id.0 + 2),
        PrioritySpec {
            stream_dependency: stream_id,
            exclusive: false,
            weight: 0,
        },
    )
    .await?;

    request_and_expect_headers(&mut conn, stream_id).await
}

/// E: a single-bit flag indicating that the stream dependency is
/// exclusive (see Section 5.3).
async fn priority_frame_with_exclusive(
    _config: Arc<Config>,
    mut conn: Conn,
) -> Result<(), TestError> {
    let stream_id = StreamId(1);

    conn.handshake().await?;

    conn.write_priority(
        stream_id,
        PrioritySpec {
            stream_dependency: StreamId(0),
            exclusive: true,
            weight: 0,
        },
    )
    .await?;

    request_and_expect_headers(&mut conn, stream_id).await
}

async fn request_and_expect_headers(conn: &mut Conn, stream_id: StreamId) -> Result<(), TestError> {
    let headers = conn.common_headers();
    let block_fragment = conn.encode_headers(&headers)?;

    conn.write_headers(
        stream_id,
        HeadersFlags::EndStream | HeadersFlags::EndHeaders,
        block_fragment,
    )
    .await?;

    verify_headers_frame(conn, stream_id).await
}

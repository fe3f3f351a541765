//! Tests for RFC 7540: Hypertext Transfer Protocol Version 2 (HTTP/2).
//!
//! cf. <https://httpwg.org/specs/rfc7540.html>

use crate::suite::TestGroup;

pub mod _4_3_header_compression;
pub mod _6_7_ping;
pub mod _6_9_2_initial_flow_control_window_size;

pub fn group() -> TestGroup {
    let mut tg = TestGroup::new("http2", "Hypertext Transfer Protocol Version 2 (HTTP/2)");
    tg.add_group(_4_3_header_compression::group());
    tg.add_group(_6_7_ping::group());

    let mut window_update = TestGroup::new("6.9", "WINDOW_UPDATE");
    window_update.add_group(_6_9_2_initial_flow_control_window_size::group());
    tg.add_group(window_update);

    tg
}

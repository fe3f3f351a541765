//! Tests for RFC 7541: HPACK, Header Compression for HTTP/2.
//!
//! cf. <https://httpwg.org/specs/rfc7541.html>

use crate::suite::TestGroup;

pub mod _4_2_dynamic_table_size_update;

pub fn group() -> TestGroup {
    let mut tg = TestGroup::new("hpack", "HPACK: Header Compression for HTTP/2");
    tg.add_group(_4_2_dynamic_table_size_update::group());
    tg
}

//! Generic tests: well-formed exchanges every HTTP/2 server should
//! accept, regardless of which MUSTs it takes seriously.

use crate::suite::TestGroup;

pub mod _3_3_priority;

pub fn group() -> TestGroup {
    let mut tg = TestGroup::new("generic", "Generic tests for HTTP/2 server");
    tg.add_group(_3_3_priority::group());
    tg
}

//! An implementation of HPACK (RFC 7541), the header compression format
//! used by HTTP/2.
//!
//! Both halves share the indexing tables defined here: the fixed static
//! table from RFC 7541 Appendix A and a bounded dynamic table where the
//! most recent insertion gets the lowest dynamic index.
//!
//! The [`Decoder`] and [`Encoder`] each own their own [`HeaderTable`], one
//! per direction of a connection.

use std::collections::VecDeque;

pub mod decoder;
pub mod encoder;
pub mod huffman;

pub use decoder::Decoder;
pub use encoder::Encoder;

/// An entry in the static header table: name and value as opaque octets.
pub type StaticTable<'a> = &'a [(&'a [u8], &'a [u8])];

/// The static table defined by RFC 7541 Appendix A. Index 1 is the first
/// element.
pub static STATIC_TABLE: StaticTable<'static> = &[
    (b":authority", b""),
    (b":method", b"GET"),
    (b":method", b"POST"),
    (b":path", b"/"),
    (b":path", b"/index.html"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"200"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"304"),
    (b":status", b"400"),
    (b":status", b"404"),
    (b":status", b"500"),
    (b"accept-charset", b""),
    (b"accept-encoding", b"gzip, deflate"),
    (b"accept-language", b""),
    (b"accept-ranges", b""),
    (b"accept", b""),
    (b"access-control-allow-origin", b""),
    (b"age", b""),
    (b"allow", b""),
    (b"authorization", b""),
    (b"cache-control", b""),
    (b"content-disposition", b""),
    (b"content-encoding", b""),
    (b"content-language", b""),
    (b"content-length", b""),
    (b"content-location", b""),
    (b"content-range", b""),
    (b"content-type", b""),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"expect", b""),
    (b"expires", b""),
    (b"from", b""),
    (b"host", b""),
    (b"if-match", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"if-range", b""),
    (b"if-unmodified-since", b""),
    (b"last-modified", b""),
    (b"link", b""),
    (b"location", b""),
    (b"max-forwards", b""),
    (b"proxy-authenticate", b""),
    (b"proxy-authorization", b""),
    (b"range", b""),
    (b"referer", b""),
    (b"refresh", b""),
    (b"retry-after", b""),
    (b"server", b""),
    (b"set-cookie", b""),
    (b"strict-transport-security", b""),
    (b"transfer-encoding", b""),
    (b"user-agent", b""),
    (b"vary", b""),
    (b"via", b""),
    (b"www-authenticate", b""),
];

/// Per RFC 7541 section 4.1, each entry costs its name length plus its
/// value length plus 32 octets of overhead.
const ENTRY_OVERHEAD: usize = 32;

fn entry_size(name: &[u8], value: &[u8]) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

/// The dynamic table of an HPACK codec: a FIFO of owned header pairs,
/// newest first, whose total size never exceeds its capacity.
pub struct DynamicTable {
    table: VecDeque<(Vec<u8>, Vec<u8>)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new() -> DynamicTable {
        // 4096 is the table capacity both peers start from
        DynamicTable {
            table: VecDeque::new(),
            size: 0,
            max_size: 4096,
        }
    }

    /// Current size of the table, per the RFC 7541 section 4.1 accounting.
    pub fn get_size(&self) -> usize {
        self.size
    }

    pub fn get_max_table_size(&self) -> usize {
        self.max_size
    }

    /// Sets a new capacity, evicting from the oldest end as needed.
    pub fn set_max_table_size(&mut self, new_max_size: usize) {
        self.max_size = new_max_size;
        self.consolidate_table();
    }

    /// Inserts at the front of the table. An entry larger than the whole
    /// capacity leaves the table empty, as the RFC requires.
    fn add_header(&mut self, name: Vec<u8>, value: Vec<u8>) {
        self.size += entry_size(&name, &value);
        self.table.push_front((name, value));
        self.consolidate_table();
    }

    fn get(&self, index: usize) -> Option<&(Vec<u8>, Vec<u8>)> {
        self.table.get(index)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn consolidate_table(&mut self) {
        while self.size > self.max_size {
            let (name, value) = self
                .table
                .pop_back()
                .expect("size is non-zero, table cannot be empty");
            self.size -= entry_size(&name, &value);
        }
    }
}

/// The unified address space over the static and dynamic tables, 1-indexed:
/// indices 1..=61 are static, 62.. address the dynamic table newest-first.
pub struct HeaderTable<'a> {
    static_table: StaticTable<'a>,
    pub dynamic_table: DynamicTable,
}

impl<'a> HeaderTable<'a> {
    pub fn with_static_table(static_table: StaticTable<'a>) -> HeaderTable<'a> {
        HeaderTable {
            static_table,
            dynamic_table: DynamicTable::new(),
        }
    }

    pub fn add_header(&mut self, name: Vec<u8>, value: Vec<u8>) {
        self.dynamic_table.add_header(name, value);
    }

    /// Looks up the entry at the given (1-based) index.
    pub fn get_from_table(&self, index: usize) -> Option<(&[u8], &[u8])> {
        if index == 0 {
            return None;
        }
        let index = index - 1;
        if index < self.static_table.len() {
            let (name, value) = self.static_table[index];
            Some((name, value))
        } else {
            self.dynamic_table
                .get(index - self.static_table.len())
                .map(|(name, value)| (name.as_slice(), value.as_slice()))
        }
    }

    /// Finds the best index for the given header: returns the index and
    /// whether the value matched too. Exact matches win over name-only
    /// matches; static entries win over dynamic ones at equal quality.
    pub fn find_header(&self, header: (&[u8], &[u8])) -> Option<(usize, bool)> {
        let mut name_only = None;
        for (i, (name, value)) in self.static_table.iter().enumerate() {
            if *name == header.0 {
                if *value == header.1 {
                    return Some((i + 1, true));
                }
                name_only.get_or_insert(i + 1);
            }
        }
        for (i, (name, value)) in self.dynamic_table.table.iter().enumerate() {
            if name == header.0 {
                if value == header.1 {
                    return Some((i + self.static_table.len() + 1, true));
                }
                name_only.get_or_insert(i + self.static_table.len() + 1);
            }
        }
        name_only.map(|i| (i, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_table_lookup() {
        let table = HeaderTable::with_static_table(STATIC_TABLE);
        assert_eq!(table.get_from_table(2), Some((&b":method"[..], &b"GET"[..])));
        assert_eq!(table.get_from_table(61), Some((&b"www-authenticate"[..], &b""[..])));
        assert_eq!(table.get_from_table(0), None);
        assert_eq!(table.get_from_table(62), None);
    }

    #[test]
    fn test_dynamic_entries_are_newest_first() {
        let mut table = HeaderTable::with_static_table(STATIC_TABLE);
        table.add_header(b"x-first".to_vec(), b"1".to_vec());
        table.add_header(b"x-second".to_vec(), b"2".to_vec());
        assert_eq!(table.get_from_table(62), Some((&b"x-second"[..], &b"2"[..])));
        assert_eq!(table.get_from_table(63), Some((&b"x-first"[..], &b"1"[..])));
    }

    #[test]
    fn test_eviction_keeps_most_recent_suffix() {
        let mut table = HeaderTable::with_static_table(STATIC_TABLE);
        // each entry costs 1 + 1 + 32 = 34 octets; cap the table at two
        table.dynamic_table.set_max_table_size(68);
        for pair in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
            table.add_header(pair.0.to_vec(), pair.1.to_vec());
        }
        assert_eq!(table.dynamic_table.len(), 2);
        assert!(table.dynamic_table.get_size() <= 68);
        assert_eq!(table.get_from_table(62), Some((&b"c"[..], &b"3"[..])));
        assert_eq!(table.get_from_table(63), Some((&b"b"[..], &b"2"[..])));
    }

    #[test]
    fn test_oversized_entry_clears_table() {
        let mut table = HeaderTable::with_static_table(STATIC_TABLE);
        table.dynamic_table.set_max_table_size(40);
        table.add_header(b"x-oversized".to_vec(), vec![b'v'; 64]);
        assert!(table.dynamic_table.is_empty());
        assert_eq!(table.dynamic_table.get_size(), 0);
    }

    #[test]
    fn test_shrinking_capacity_evicts() {
        let mut table = HeaderTable::with_static_table(STATIC_TABLE);
        table.add_header(b"a".to_vec(), b"1".to_vec());
        table.add_header(b"b".to_vec(), b"2".to_vec());
        table.dynamic_table.set_max_table_size(34);
        assert_eq!(table.dynamic_table.len(), 1);
        assert_eq!(table.get_from_table(62), Some((&b"b"[..], &b"2"[..])));
    }

    #[test]
    fn test_find_header_prefers_exact_match() {
        let mut table = HeaderTable::with_static_table(STATIC_TABLE);
        assert_eq!(table.find_header((b":method", b"GET")), Some((2, true)));
        assert_eq!(table.find_header((b":method", b"PATCH")), Some((2, false)));
        assert_eq!(table.find_header((b"x-custom", b"yes")), None);

        table.add_header(b"x-custom".to_vec(), b"yes".to_vec());
        assert_eq!(table.find_header((b"x-custom", b"yes")), Some((62, true)));
        assert_eq!(table.find_header((b"x-custom", b"no")), Some((62, false)));
    }
}

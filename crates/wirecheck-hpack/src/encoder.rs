//! Implements an HPACK encoder over the shared [`HeaderTable`].
//!
//! The strategy mirrors what the decoder expects: a header that matches a
//! table entry exactly is sent as an indexed representation; a name-only
//! match becomes a literal with incremental indexing referencing the name;
//! everything else is a literal with incremental indexing carrying both
//! strings. Callers mark sensitive headers explicitly, which forces the
//! never-indexed literal representation and keeps them out of the table.

use std::io;

use super::huffman::{huffman_encode, huffman_encoded_len};
use super::{HeaderTable, STATIC_TABLE};

/// Encodes an integer with the given prefix size (in bits), OR-ing the
/// given representation bits into the first octet.
fn encode_integer_into(
    mut value: usize,
    prefix_size: u8,
    leading_bits: u8,
    writer: &mut impl io::Write,
) -> io::Result<()> {
    debug_assert!((1..=8).contains(&prefix_size));
    // make sure the leading bits don't spill into the prefix
    let leading_bits = if prefix_size == 8 {
        0
    } else {
        leading_bits & !((1 << prefix_size) - 1)
    };
    let mask: usize = if prefix_size == 8 {
        0xff
    } else {
        (1usize << prefix_size) - 1
    };

    if value < mask {
        writer.write_all(&[leading_bits | value as u8])?;
        return Ok(());
    }

    writer.write_all(&[leading_bits | mask as u8])?;
    value -= mask;
    while value >= 128 {
        writer.write_all(&[((value % 128) + 128) as u8])?;
        value /= 128;
    }
    writer.write_all(&[value as u8])?;
    Ok(())
}

/// Encodes an integer with zeroed representation bits. The decoder's tests
/// use this to cross-check the two primitives.
pub(crate) fn encode_integer(value: usize, prefix_size: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_integer_into(value, prefix_size, 0, &mut buf).unwrap();
    buf
}

/// Encodes a string literal, choosing the Huffman form whenever it is
/// shorter than the raw octets.
fn encode_string_into(s: &[u8], writer: &mut impl io::Write) -> io::Result<()> {
    if huffman_encoded_len(s) < s.len() {
        let encoded = huffman_encode(s);
        encode_integer_into(encoded.len(), 7, 0x80, writer)?;
        writer.write_all(&encoded)
    } else {
        encode_integer_into(s.len(), 7, 0, writer)?;
        writer.write_all(s)
    }
}

/// Represents an HPACK encoder. Allows clients to encode arbitrary header
/// sets and tracks the encoding context (the dynamic table) between blocks.
pub struct Encoder<'a> {
    header_table: HeaderTable<'a>,
    /// A capacity change that still needs to be signaled at the start of
    /// the next header block.
    pending_size_update: Option<usize>,
}

impl Default for Encoder<'_> {
    fn default() -> Encoder<'static> {
        Encoder::new()
    }
}

impl Encoder<'static> {
    /// Creates a new `Encoder` with a default static table, as defined by
    /// the HPACK spec (Appendix A).
    pub fn new() -> Encoder<'static> {
        Encoder {
            header_table: HeaderTable::with_static_table(STATIC_TABLE),
            pending_size_update: None,
        }
    }
}

impl Encoder<'_> {
    /// Sets a new maximum dynamic table size, evicting entries as needed.
    /// The change is signaled to the peer at the start of the next encoded
    /// header block.
    pub fn set_max_table_size(&mut self, new_max_size: usize) {
        self.header_table
            .dynamic_table
            .set_max_table_size(new_max_size);
        self.pending_size_update = Some(new_max_size);
    }

    /// Current size of the dynamic table, for diagnostics.
    pub fn table_size(&self) -> usize {
        self.header_table.dynamic_table.get_size()
    }

    /// Encodes the given headers into a newly allocated buffer.
    ///
    /// The encoder so far supports only a single, extremely simple
    /// strategy, whereby each header is represented to best effort from
    /// the current table contents (see the module docs).
    pub fn encode<'b>(
        &mut self,
        headers: impl IntoIterator<Item = (&'b [u8], &'b [u8])>,
    ) -> Vec<u8> {
        let mut encoded = Vec::new();
        self.encode_into(headers, &mut encoded)
            .expect("writing to a Vec is infallible");
        encoded
    }

    /// Encodes the given headers into the given writer.
    pub fn encode_into<'b>(
        &mut self,
        headers: impl IntoIterator<Item = (&'b [u8], &'b [u8])>,
        writer: &mut impl io::Write,
    ) -> io::Result<()> {
        for header in headers {
            self.encode_header_into(header, writer)?;
        }
        Ok(())
    }

    /// Encodes a single header into the given writer.
    pub fn encode_header_into(
        &mut self,
        header: (&[u8], &[u8]),
        writer: &mut impl io::Write,
    ) -> io::Result<()> {
        self.flush_pending_size_update(writer)?;

        match self.header_table.find_header(header) {
            Some((index, true)) => {
                // exact match: indexed representation
                encode_integer_into(index, 7, 0x80, writer)?;
            }
            Some((index, false)) => {
                // name is known: literal with incremental indexing,
                // indexed name
                encode_integer_into(index, 6, 0x40, writer)?;
                encode_string_into(header.1, writer)?;
                self.header_table
                    .add_header(header.0.to_vec(), header.1.to_vec());
            }
            None => {
                // fresh name: literal with incremental indexing, both
                // strings spelled out
                encode_integer_into(0, 6, 0x40, writer)?;
                encode_string_into(header.0, writer)?;
                encode_string_into(header.1, writer)?;
                self.header_table
                    .add_header(header.0.to_vec(), header.1.to_vec());
            }
        }
        Ok(())
    }

    /// Encodes a single sensitive header as a never-indexed literal. The
    /// header is kept out of the dynamic table; intermediaries are told to
    /// do the same.
    pub fn encode_sensitive_header_into(
        &mut self,
        header: (&[u8], &[u8]),
        writer: &mut impl io::Write,
    ) -> io::Result<()> {
        self.flush_pending_size_update(writer)?;

        let name_index = match self.header_table.find_header(header) {
            Some((index, _)) => index,
            None => 0,
        };
        encode_integer_into(name_index, 4, 0x10, writer)?;
        if name_index == 0 {
            encode_string_into(header.0, writer)?;
        }
        encode_string_into(header.1, writer)
    }

    fn flush_pending_size_update(&mut self, writer: &mut impl io::Write) -> io::Result<()> {
        if let Some(new_size) = self.pending_size_update.take() {
            encode_integer_into(new_size, 5, 0x20, writer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Decoder;
    use super::*;

    /// RFC 7541 Appendix C.1 integer examples.
    #[test]
    fn test_encode_integer_known_vectors() {
        assert_eq!(encode_integer(10, 5), [0x0a]);
        assert_eq!(encode_integer(1337, 5), [0x1f, 0x9a, 0x0a]);
        assert_eq!(encode_integer(42, 8), [0x2a]);
    }

    #[test]
    fn test_exact_static_match_is_indexed() {
        let mut encoder = Encoder::new();
        let encoded = encoder.encode([(&b":method"[..], &b"GET"[..])]);
        assert_eq!(encoded, [0x82]);
    }

    #[test]
    fn test_name_match_uses_indexed_name() {
        let mut encoder = Encoder::new();
        let encoded = encoder.encode([(&b":method"[..], &b"PATCH"[..])]);
        // literal with incremental indexing, name index 2
        assert_eq!(encoded[0], 0x42);
        // and the entry is now in the dynamic table: the same header again
        // is a plain indexed representation
        let encoded = encoder.encode([(&b":method"[..], &b"PATCH"[..])]);
        assert_eq!(encoded, [0x80 | 62]);
    }

    #[test]
    fn test_fresh_name_is_spelled_out_then_indexed() {
        let mut encoder = Encoder::new();
        let first = encoder.encode([(&b"x-request-id"[..], &b"77"[..])]);
        assert_eq!(first[0], 0x40);
        let second = encoder.encode([(&b"x-request-id"[..], &b"77"[..])]);
        assert_eq!(second, [0x80 | 62]);
    }

    #[test]
    fn test_sensitive_header_is_never_indexed() {
        let mut encoder = Encoder::new();
        let mut encoded = Vec::new();
        encoder
            .encode_sensitive_header_into((b"authorization", b"Basic aGk="), &mut encoded)
            .unwrap();
        // never-indexed literal with the static name index for
        // authorization (23), which overflows the 4-bit prefix
        assert_eq!(&encoded[..2], &[0x1f, 0x08]);

        // nothing was added to the dynamic table
        assert_eq!(encoder.table_size(), 0);
    }

    #[test]
    fn test_size_update_emitted_at_next_block_start() {
        let mut encoder = Encoder::new();
        encoder.set_max_table_size(0);
        let encoded = encoder.encode([(&b":method"[..], &b"GET"[..])]);
        // 0b001 size update to zero, then the indexed field
        assert_eq!(encoded, [0x20, 0x82]);
    }

    #[test]
    fn test_roundtrip_through_decoder() {
        let headers: Vec<(&[u8], &[u8])> = vec![
            (b":method", b"POST"),
            (b":scheme", b"https"),
            (b":path", b"/submit"),
            (b":authority", b"example.org:8443"),
            (b"x-loop", b"first"),
            (b"x-loop", b"second"),
        ];

        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new();
        // two blocks over the same connection, exercising the dynamic table
        for _ in 0..2 {
            let encoded = encoder.encode(headers.iter().copied());
            let decoded = decoder.decode(&encoded).unwrap();
            let expected: Vec<(Vec<u8>, Vec<u8>)> = headers
                .iter()
                .map(|(n, v)| (n.to_vec(), v.to_vec()))
                .collect();
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn test_roundtrip_with_shrunken_tables() {
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new();
        // capacity 64 only fits a single small entry at a time
        encoder.set_max_table_size(64);
        decoder.set_max_table_size(64);

        let headers: Vec<(&[u8], &[u8])> =
            vec![(b"x-one", b"1"), (b"x-two", b"2"), (b"x-three", b"3")];
        for _ in 0..3 {
            let encoded = encoder.encode(headers.iter().copied());
            let decoded = decoder.decode(&encoded).unwrap();
            let expected: Vec<(Vec<u8>, Vec<u8>)> = headers
                .iter()
                .map(|(n, v)| (n.to_vec(), v.to_vec()))
                .collect();
            assert_eq!(decoded, expected);
        }
    }
}

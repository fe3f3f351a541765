//! HPACK header-block decoding.
//!
//! [`Decoder::decode`] turns one complete header block into a list of
//! name/value pairs. Names and values are opaque octets here; nothing
//! HTTP-level is checked. The decoder keeps its dynamic table across
//! blocks, so one instance must see every block of a connection, in
//! order, and each block must be handed over whole (continuation
//! fragments concatenated first).

use std::borrow::Cow;

use tracing::trace;

use super::huffman::{HuffmanDecoder, HuffmanDecoderError};
use super::{HeaderTable, STATIC_TABLE};

/// Everything that can go wrong while decoding a header block. At the
/// connection layer each of these maps to a COMPRESSION_ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecoderError {
    /// The block ended in the middle of an integer, string or field.
    #[error("header block is truncated")]
    UnexpectedEnd,
    /// An integer ran past the continuation-octet bound (RFC 7541,
    /// section 5.1 calls for a limit on excessively long encodings).
    #[error("integer encoding too long")]
    IntegerOverflow,
    /// An index pointed at nothing: zero, or past the end of the
    /// static + dynamic address space.
    #[error("table index {0} is not occupied")]
    BadIndex(usize),
    #[error("huffman string: {0}")]
    Huffman(#[from] HuffmanDecoderError),
    /// A size update tried to raise the table capacity over the bound
    /// this endpoint advertised.
    #[error("size update to {0} octets exceeds the advertised bound")]
    SizeUpdateTooLarge(usize),
    /// A size update appeared after the first field of the block
    /// (RFC 7541, section 4.2 wants them at the beginning).
    #[error("dynamic table size update after the first header field")]
    SizeUpdateNotAtBeginning,
    /// The block ended on a size update.
    #[error("dynamic table size update at the end of a header block")]
    SizeUpdateAtEnd,
}

/// The result of decoding a whole block: owned name/value pairs, in
/// block order.
pub type DecoderResult = Result<Vec<(Vec<u8>, Vec<u8>)>, DecoderError>;

/// Reads the HPACK primitives off the front of a header block.
struct Cursor<'b> {
    rest: &'b [u8],
}

impl<'b> Cursor<'b> {
    fn new(block: &'b [u8]) -> Self {
        Self { rest: block }
    }

    /// The tag octet of the next field, if any.
    fn peek(&self) -> Option<u8> {
        self.rest.first().copied()
    }

    fn next_octet(&mut self) -> Result<u8, DecoderError> {
        let (&octet, rest) = self.rest.split_first().ok_or(DecoderError::UnexpectedEnd)?;
        self.rest = rest;
        Ok(octet)
    }

    fn take(&mut self, n: usize) -> Result<&'b [u8], DecoderError> {
        if n > self.rest.len() {
            return Err(DecoderError::UnexpectedEnd);
        }
        let (taken, rest) = self.rest.split_at(n);
        self.rest = rest;
        Ok(taken)
    }

    /// An integer with an `prefix_bits`-bit prefix (RFC 7541, section
    /// 5.1). Capped at four continuation octets, which is plenty for
    /// anything a header block legitimately encodes.
    fn read_int(&mut self, prefix_bits: u8) -> Result<usize, DecoderError> {
        debug_assert!((1..=8).contains(&prefix_bits));
        let mask = ((1u16 << prefix_bits) - 1) as usize;

        let prefix = self.next_octet()? as usize & mask;
        if prefix < mask {
            return Ok(prefix);
        }

        let mut value = mask;
        let mut shift = 0u32;
        for _ in 0..4 {
            let octet = self.next_octet()?;
            value += ((octet & 0x7f) as usize) << shift;
            shift += 7;
            if octet & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecoderError::IntegerOverflow)
    }

    /// A string literal (RFC 7541, section 5.2): length-prefixed, raw
    /// or Huffman-coded.
    fn read_string(&mut self) -> Result<Cow<'b, [u8]>, DecoderError> {
        let huffman = matches!(self.peek(), Some(octet) if octet & 0x80 != 0);
        let len = self.read_int(7)?;
        let raw = self.take(len)?;
        if huffman {
            trace!(%len, "decoding huffman string");
            Ok(Cow::Owned(HuffmanDecoder::new().decode(raw)?))
        } else {
            Ok(Cow::Borrowed(raw))
        }
    }

    /// A literal field (RFC 7541, section 6.2): a name index or name
    /// string, then a value string. `prefix_bits` is 6 for the
    /// incremental-indexing form and 4 for the plain and never-indexed
    /// forms.
    fn read_literal<'t>(
        &mut self,
        table: &'t HeaderTable<'_>,
        prefix_bits: u8,
    ) -> Result<(Cow<'t, [u8]>, Cow<'t, [u8]>), DecoderError>
    where
        'b: 't,
    {
        let name_index = self.read_int(prefix_bits)?;
        let name = if name_index == 0 {
            self.read_string()?
        } else {
            let (name, _) = table
                .get_from_table(name_index)
                .ok_or(DecoderError::BadIndex(name_index))?;
            Cow::Borrowed(name)
        };
        let value = self.read_string()?;
        Ok((name, value))
    }
}

/// Decodes HPACK header blocks, one per call, against a persistent
/// dynamic table.
pub struct Decoder<'a> {
    table: HeaderTable<'a>,
    /// The ceiling size updates may set, i.e. the
    /// SETTINGS_HEADER_TABLE_SIZE this endpoint advertised. Unlimited
    /// until told otherwise.
    size_bound: Option<usize>,
}

impl Default for Decoder<'_> {
    fn default() -> Decoder<'static> {
        Decoder::new()
    }
}

impl Decoder<'static> {
    /// A decoder over the RFC 7541 Appendix A static table and an empty
    /// dynamic table.
    pub fn new() -> Decoder<'static> {
        Decoder {
            table: HeaderTable::with_static_table(STATIC_TABLE),
            size_bound: None,
        }
    }
}

impl Decoder<'_> {
    /// Resizes the dynamic table directly, outside the wire protocol.
    /// For capacity changes driven by configuration rather than by a
    /// size update inside a block.
    pub fn set_max_table_size(&mut self, new_max_size: usize) {
        self.table.dynamic_table.set_max_table_size(new_max_size);
    }

    /// Caps future size updates: any update above `max_allowed_size`
    /// fails the block with [DecoderError::SizeUpdateTooLarge].
    pub fn set_max_allowed_table_size(&mut self, max_allowed_size: usize) {
        self.size_bound = Some(max_allowed_size);
    }

    /// Current size of the dynamic table, for diagnostics.
    pub fn table_size(&self) -> usize {
        self.table.dynamic_table.get_size()
    }

    /// Decodes one whole header block into owned pairs.
    pub fn decode(&mut self, block: &[u8]) -> DecoderResult {
        let mut fields = Vec::new();
        self.decode_with_cb(block, |name, value| {
            fields.push((name.into_owned(), value.into_owned()))
        })?;
        Ok(fields)
    }

    /// Decodes one whole header block, handing each field to `cb` as it
    /// is produced.
    ///
    /// The borrows passed to the callback may point into the dynamic
    /// table and are only good for the duration of the call: decoding
    /// the next field can evict them.
    pub fn decode_with_cb(
        &mut self,
        block: &[u8],
        mut cb: impl FnMut(Cow<[u8]>, Cow<[u8]>),
    ) -> Result<(), DecoderError> {
        let mut cur = Cursor::new(block);
        let mut seen_field = false;
        let mut ends_with_update = false;

        while let Some(tag) = cur.peek() {
            if tag & 0x80 != 0 {
                // indexed field (section 6.1)
                let index = cur.read_int(7)?;
                let (name, value) = self
                    .table
                    .get_from_table(index)
                    .ok_or(DecoderError::BadIndex(index))?;
                cb(Cow::Borrowed(name), Cow::Borrowed(value));
            } else if tag & 0x40 != 0 {
                // literal, entered into the dynamic table (section 6.2.1)
                let (name, value) = cur.read_literal(&self.table, 6)?;
                cb(Cow::Borrowed(&name), Cow::Borrowed(&value));
                let (name, value) = (name.into_owned(), value.into_owned());
                self.table.add_header(name, value);
            } else if tag & 0x20 != 0 {
                // dynamic table size update (section 6.3)
                if seen_field {
                    return Err(DecoderError::SizeUpdateNotAtBeginning);
                }
                let new_size = cur.read_int(5)?;
                if let Some(bound) = self.size_bound {
                    if new_size > bound {
                        return Err(DecoderError::SizeUpdateTooLarge(new_size));
                    }
                }
                trace!(%new_size, "dynamic table size update");
                self.table.dynamic_table.set_max_table_size(new_size);
                ends_with_update = true;
                continue;
            } else {
                // literal kept out of the table, whether plain (section
                // 6.2.2) or never-indexed (section 6.2.3); we are not a
                // proxy, so the two decode alike
                let (name, value) = cur.read_literal(&self.table, 4)?;
                cb(name, value);
            }
            seen_field = true;
            ends_with_update = false;
        }

        if ends_with_update {
            return Err(DecoderError::SizeUpdateAtEnd);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::super::encoder::encode_integer;
    use super::super::huffman::HuffmanDecoderError;
    use super::{Cursor, Decoder, DecoderError};

    fn read_int(bytes: &[u8], prefix_bits: u8) -> Result<(usize, usize), DecoderError> {
        let mut cur = Cursor::new(bytes);
        let value = cur.read_int(prefix_bits)?;
        Ok((value, bytes.len() - cur.rest.len()))
    }

    #[test]
    fn test_read_int() {
        // RFC 7541 Appendix C.1 and friends
        assert_eq!(read_int(&[10], 5).unwrap(), (10, 1));
        assert_eq!(read_int(&[31, 154, 10], 5).unwrap(), (1337, 3));
        assert_eq!(read_int(&[31 + 32, 154, 10], 5).unwrap(), (1337, 3));
        assert_eq!(read_int(&[31 + 64, 154, 10], 5).unwrap(), (1337, 3));
        // trailing octets are left alone
        assert_eq!(read_int(&[31, 154, 10, 111, 22], 5).unwrap(), (1337, 3));

        assert_eq!(read_int(&[127, 0], 7).unwrap(), (127, 2));
        assert_eq!(read_int(&[255, 0], 7).unwrap(), (127, 2));
        assert_eq!(read_int(&[127, 128, 1], 7).unwrap(), (255, 3));
        assert_eq!(read_int(&[255, 0], 8).unwrap(), (255, 2));
        assert_eq!(read_int(&[254], 8).unwrap(), (254, 1));
        assert_eq!(read_int(&[1], 8).unwrap(), (1, 1));
        assert_eq!(read_int(&[0], 8).unwrap(), (0, 1));
        // the largest encoding the continuation bound admits
        assert_eq!(
            read_int(&[0xff, 0xff, 0xff, 0xff, 0x7f], 8).unwrap(),
            (268_435_710, 5)
        );
    }

    #[test]
    fn test_read_int_errors() {
        assert_eq!(read_int(&[], 5).unwrap_err(), DecoderError::UnexpectedEnd);
        assert_eq!(
            read_int(&[0xff, 0xff], 5).unwrap_err(),
            DecoderError::UnexpectedEnd
        );
        // a fifth continuation octet is over the line
        assert_eq!(
            read_int(&[0xff, 0x80, 0x80, 0x80, 0x80, 0x01], 8).unwrap_err(),
            DecoderError::IntegerOverflow
        );
    }

    /// The integer reader and the encoder's writer must agree.
    #[test]
    fn test_int_roundtrip_with_encoder() {
        for value in [0usize, 1, 30, 31, 127, 128, 255, 1337, 268_435_454] {
            for prefix_bits in 1u8..=8 {
                let encoded = encode_integer(value, prefix_bits);
                assert_eq!(
                    read_int(&encoded, prefix_bits).unwrap(),
                    (value, encoded.len())
                );
            }
        }
    }

    #[test]
    fn test_read_string() {
        let mut cur = Cursor::new(&[3, 1, 2, 3, 9]);
        assert_eq!(cur.read_string().unwrap(), Cow::Borrowed(&[1u8, 2, 3][..]));
        assert_eq!(cur.rest, &[9]);

        let mut cur = Cursor::new(&[0]);
        assert_eq!(cur.read_string().unwrap(), Cow::Borrowed(&[][..]));

        // advertised length runs past the block
        let mut cur = Cursor::new(&[3, 1, 2]);
        assert_eq!(cur.read_string().unwrap_err(), DecoderError::UnexpectedEnd);
    }

    #[test]
    fn test_decode_fully_in_static_table() {
        let mut decoder = Decoder::new();

        let header_list = decoder.decode(&[0x82, 0x84]).unwrap();

        assert_eq!(
            header_list,
            [
                (b":method".to_vec(), b"GET".to_vec()),
                (b":path".to_vec(), b"/".to_vec()),
            ]
        );
    }

    /// An incremental literal becomes addressable at index 62.
    #[test]
    fn test_decode_literal_gets_indexed() {
        let mut decoder = Decoder::new();

        let mut block = vec![0x40, 0x06];
        block.extend_from_slice(b"x-test");
        block.push(0x02);
        block.extend_from_slice(b"ok");
        block.push(0x80 | 62);

        let header_list = decoder.decode(&block).unwrap();

        assert_eq!(
            header_list,
            [
                (b"x-test".to_vec(), b"ok".to_vec()),
                (b"x-test".to_vec(), b"ok".to_vec()),
            ]
        );
    }

    #[test]
    fn test_decode_literal_with_indexed_name() {
        let mut decoder = Decoder::new();

        // plain literal, name from static index 4 (:path)
        let mut block = vec![0x04, 0x05];
        block.extend_from_slice(b"/test");

        let header_list = decoder.decode(&block).unwrap();

        assert_eq!(header_list, [(b":path".to_vec(), b"/test".to_vec())]);
    }

    #[test]
    fn test_index_zero_is_an_error() {
        let mut decoder = Decoder::new();
        assert_eq!(
            decoder.decode(&[0x80]).unwrap_err(),
            DecoderError::BadIndex(0)
        );
    }

    #[test]
    fn test_index_out_of_bounds_is_an_error() {
        let mut decoder = Decoder::new();
        assert_eq!(
            decoder.decode(&[0x80 | 62]).unwrap_err(),
            DecoderError::BadIndex(62)
        );
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let mut decoder = Decoder::new();
        // incremental literal tag with nothing behind it
        assert_eq!(
            decoder.decode(&[0x40]).unwrap_err(),
            DecoderError::UnexpectedEnd
        );
    }

    /// Size updates ahead of the first field are applied, evictions
    /// included; two in a row are legal.
    #[test]
    fn test_size_updates_at_block_start() {
        let mut decoder = Decoder::new();

        let mut block = vec![0x40, 0x01];
        block.push(b'a');
        block.push(0x01);
        block.push(b'b');
        decoder.decode(&block).unwrap();
        assert_eq!(decoder.table_size(), 34);

        // shrink to zero, restore the default, then a field
        let header_list = decoder.decode(&[0x20, 0x3f, 0xe1, 0x1f, 0x82]).unwrap();
        assert_eq!(header_list, [(b":method".to_vec(), b"GET".to_vec())]);
        assert_eq!(decoder.table_size(), 0);
    }

    #[test]
    fn test_size_update_after_field_is_an_error() {
        let mut decoder = Decoder::new();
        assert_eq!(
            decoder.decode(&[0x82, 0x3f, 0xe1, 0x1f]).unwrap_err(),
            DecoderError::SizeUpdateNotAtBeginning
        );
    }

    #[test]
    fn test_trailing_size_update_is_an_error() {
        let mut decoder = Decoder::new();
        assert_eq!(
            decoder.decode(&[0x20]).unwrap_err(),
            DecoderError::SizeUpdateAtEnd
        );
    }

    #[test]
    fn test_size_update_beyond_allowed_is_an_error() {
        let mut decoder = Decoder::new();
        decoder.set_max_allowed_table_size(4096);

        // size update to 4097, then an indexed field
        assert_eq!(
            decoder.decode(&[0x3f, 0xe2, 0x1f, 0x82]).unwrap_err(),
            DecoderError::SizeUpdateTooLarge(4097)
        );
    }

    #[test]
    fn test_decode_huffman_literal() {
        let mut decoder = Decoder::new();

        // plain literal, name from static index 1 (:authority), value
        // "www.example.com" Huffman-coded (RFC 7541, C.4.1)
        let mut block = vec![0x01, 0x80 | 0x0c];
        block.extend_from_slice(&[
            0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ]);

        let header_list = decoder.decode(&block).unwrap();

        assert_eq!(
            header_list,
            [(b":authority".to_vec(), b"www.example.com".to_vec())]
        );
    }

    #[test]
    fn test_invalid_huffman_is_an_error() {
        let mut decoder = Decoder::new();

        // claims to be Huffman, but decodes to a lone '0' code followed
        // by padding that is not a prefix of EOS
        let block = vec![0x01, 0x80 | 0x01, 0x00];
        assert_eq!(
            decoder.decode(&block).unwrap_err(),
            DecoderError::Huffman(HuffmanDecoderError::InvalidPadding)
        );
    }
}

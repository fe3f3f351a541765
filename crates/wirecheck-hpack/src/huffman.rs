//! A decoder for the Huffman code defined by RFC 7541 Appendix B.
//!
//! The code is canonical and static, so the decoder builds its lookup tree
//! once from the `(code, bit length)` table below and walks it bit by bit.

/// The code for each symbol 0..=255, plus EOS at index 256.
/// Each entry is the code value (right-aligned) and its length in bits.
pub(crate) static HUFFMAN_CODE_TABLE: &[(u32, u8)] = &[
    (0x1ff8, 13),
    (0x7fffd8, 23),
    (0xfffffe2, 28),
    (0xfffffe3, 28),
    (0xfffffe4, 28),
    (0xfffffe5, 28),
    (0xfffffe6, 28),
    (0xfffffe7, 28),
    (0xfffffe8, 28),
    (0xffffea, 24),
    (0x3ffffffc, 30),
    (0xfffffe9, 28),
    (0xfffffea, 28),
    (0x3ffffffd, 30),
    (0xfffffeb, 28),
    (0xfffffec, 28),
    (0xfffffed, 28),
    (0xfffffee, 28),
    (0xfffffef, 28),
    (0xffffff0, 28),
    (0xffffff1, 28),
    (0xffffff2, 28),
    (0x3ffffffe, 30),
    (0xffffff3, 28),
    (0xffffff4, 28),
    (0xffffff5, 28),
    (0xffffff6, 28),
    (0xffffff7, 28),
    (0xffffff8, 28),
    (0xffffff9, 28),
    (0xffffffa, 28),
    (0xffffffb, 28),
    (0x14, 6),
    (0x3f8, 10),
    (0x3f9, 10),
    (0xffa, 12),
    (0x1ff9, 13),
    (0x15, 6),
    (0xf8, 8),
    (0x7fa, 11),
    (0x3fa, 10),
    (0x3fb, 10),
    (0xf9, 8),
    (0x7fb, 11),
    (0xfa, 8),
    (0x16, 6),
    (0x17, 6),
    (0x18, 6),
    (0x0, 5),
    (0x1, 5),
    (0x2, 5),
    (0x19, 6),
    (0x1a, 6),
    (0x1b, 6),
    (0x1c, 6),
    (0x1d, 6),
    (0x1e, 6),
    (0x1f, 6),
    (0x5c, 7),
    (0xfb, 8),
    (0x7ffc, 15),
    (0x20, 6),
    (0xffb, 12),
    (0x3fc, 10),
    (0x1ffa, 13),
    (0x21, 6),
    (0x5d, 7),
    (0x5e, 7),
    (0x5f, 7),
    (0x60, 7),
    (0x61, 7),
    (0x62, 7),
    (0x63, 7),
    (0x64, 7),
    (0x65, 7),
    (0x66, 7),
    (0x67, 7),
    (0x68, 7),
    (0x69, 7),
    (0x6a, 7),
    (0x6b, 7),
    (0x6c, 7),
    (0x6d, 7),
    (0x6e, 7),
    (0x6f, 7),
    (0x70, 7),
    (0x71, 7),
    (0x72, 7),
    (0xfc, 8),
    (0x73, 7),
    (0xfd, 8),
    (0x1ffb, 13),
    (0x7fff0, 19),
    (0x1ffc, 13),
    (0x3ffc, 14),
    (0x22, 6),
    (0x7ffd, 15),
    (0x3, 5),
    (0x23, 6),
    (0x4, 5),
    (0x24, 6),
    (0x5, 5),
    (0x25, 6),
    (0x26, 6),
    (0x27, 6),
    (0x6, 5),
    (0x74, 7),
    (0x75, 7),
    (0x28, 6),
    (0x29, 6),
    (0x2a, 6),
    (0x7, 5),
    (0x2b, 6),
    (0x76, 7),
    (0x2c, 6),
    (0x8, 5),
    (0x9, 5),
    (0x2d, 6),
    (0x77, 7),
    (0x78, 7),
    (0x79, 7),
    (0x7a, 7),
    (0x7b, 7),
    (0x7ffe, 15),
    (0x7fc, 11),
    (0x3ffd, 14),
    (0x1ffd, 13),
    (0xffffffc, 28),
    (0xfffe6, 20),
    (0x3fffd2, 22),
    (0xfffe7, 20),
    (0xfffe8, 20),
    (0x3fffd3, 22),
    (0x3fffd4, 22),
    (0x3fffd5, 22),
    (0x7fffd9, 23),
    (0x3fffd6, 22),
    (0x7fffda, 23),
    (0x7fffdb, 23),
    (0x7fffdc, 23),
    (0x7fffdd, 23),
    (0x7fffde, 23),
    (0xffffeb, 24),
    (0x7fffdf, 23),
    (0xffffec, 24),
    (0xffffed, 24),
    (0x3fffd7, 22),
    (0x7fffe0, 23),
    (0xffffee, 24),
    (0x7fffe1, 23),
    (0x7fffe2, 23),
    (0x7fffe3, 23),
    (0x7fffe4, 23),
    (0x1fffdc, 21),
    (0x3fffd8, 22),
    (0x7fffe5, 23),
    (0x3fffd9, 22),
    (0x7fffe6, 23),
    (0x7fffe7, 23),
    (0xffffef, 24),
    (0x3fffda, 22),
    (0x1fffdd, 21),
    (0xfffe9, 20),
    (0x3fffdb, 22),
    (0x3fffdc, 22),
    (0x7fffe8, 23),
    (0x7fffe9, 23),
    (0x1fffde, 21),
    (0x7fffea, 23),
    (0x3fffdd, 22),
    (0x3fffde, 22),
    (0xfffff0, 24),
    (0x1fffdf, 21),
    (0x3fffdf, 22),
    (0x7fffeb, 23),
    (0x7fffec, 23),
    (0x1fffe0, 21),
    (0x1fffe1, 21),
    (0x3fffe0, 22),
    (0x1fffe2, 21),
    (0x7fffed, 23),
    (0x3fffe1, 22),
    (0x7fffee, 23),
    (0x7fffef, 23),
    (0xfffea, 20),
    (0x3fffe2, 22),
    (0x3fffe3, 22),
    (0x3fffe4, 22),
    (0x7ffff0, 23),
    (0x3fffe5, 22),
    (0x3fffe6, 22),
    (0x7ffff1, 23),
    (0x3ffffe0, 26),
    (0x3ffffe1, 26),
    (0xfffeb, 20),
    (0x7fff1, 19),
    (0x3fffe7, 22),
    (0x7ffff2, 23),
    (0x3fffe8, 22),
    (0x1ffffec, 25),
    (0x3ffffe2, 26),
    (0x3ffffe3, 26),
    (0x3ffffe4, 26),
    (0x7ffffde, 27),
    (0x7ffffdf, 27),
    (0x3ffffe5, 26),
    (0xfffff1, 24),
    (0x1ffffed, 25),
    (0x7fff2, 19),
    (0x1fffe3, 21),
    (0x3ffffe6, 26),
    (0x7ffffe0, 27),
    (0x7ffffe1, 27),
    (0x3ffffe7, 26),
    (0x7ffffe2, 27),
    (0xfffff2, 24),
    (0x1fffe4, 21),
    (0x1fffe5, 21),
    (0x3ffffe8, 26),
    (0x3ffffe9, 26),
    (0xffffffd, 28),
    (0x7ffffe3, 27),
    (0x7ffffe4, 27),
    (0x7ffffe5, 27),
    (0xfffec, 20),
    (0xfffff3, 24),
    (0xfffed, 20),
    (0x1fffe6, 21),
    (0x3fffe9, 22),
    (0x1fffe7, 21),
    (0x1fffe8, 21),
    (0x7ffff3, 23),
    (0x3fffea, 22),
    (0x3fffeb, 22),
    (0x1ffffee, 25),
    (0x1ffffef, 25),
    (0xfffff4, 24),
    (0xfffff5, 24),
    (0x3ffffea, 26),
    (0x7ffff4, 23),
    (0x3ffffeb, 26),
    (0x7ffffe6, 27),
    (0x3ffffec, 26),
    (0x3ffffed, 26),
    (0x7ffffe7, 27),
    (0x7ffffe8, 27),
    (0x7ffffe9, 27),
    (0x7ffffea, 27),
    (0x7ffffeb, 27),
    (0xffffffe, 28),
    (0x7ffffec, 27),
    (0x7ffffed, 27),
    (0x7ffffee, 27),
    (0x7ffffef, 27),
    (0x7fffff0, 27),
    (0x3ffffee, 26),
    (0x3fffffff, 30),
];

/// The end-of-string symbol's position in the code table.
const EOS_SYMBOL: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum HuffmanDecoderError {
    /// The padding of the string was longer than 7 bits.
    #[error("padding longer than 7 bits")]
    PaddingTooLarge,
    /// The padding was not the most significant bits of the EOS code
    /// (i.e. not all ones).
    #[error("invalid padding")]
    InvalidPadding,
    /// The EOS symbol itself appeared within the string.
    #[error("EOS symbol found in the string")]
    EOSInString,
}

enum Node {
    Leaf(u16),
    Branch(Box<[Option<Node>; 2]>),
}

/// A decoder for the HPACK Huffman code.
pub struct HuffmanDecoder {
    root: Node,
}

impl Default for HuffmanDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HuffmanDecoder {
    /// Builds the decode tree from the Appendix B code table.
    pub fn new() -> HuffmanDecoder {
        let mut root = Node::Branch(Box::new([None, None]));
        for (symbol, &(code, nbits)) in HUFFMAN_CODE_TABLE.iter().enumerate() {
            let mut node = &mut root;
            for i in (0..nbits).rev() {
                let bit = ((code >> i) & 1) as usize;
                let Node::Branch(children) = node else {
                    unreachable!("prefix codes never pass through a leaf");
                };
                let slot = &mut children[bit];
                if i == 0 {
                    *slot = Some(Node::Leaf(symbol as u16));
                } else if slot.is_none() {
                    *slot = Some(Node::Branch(Box::new([None, None])));
                }
                node = slot.as_mut().unwrap();
            }
        }
        HuffmanDecoder { root }
    }

    /// Decodes a Huffman-coded octet string.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Vec<u8>, HuffmanDecoderError> {
        let mut out = Vec::with_capacity(buf.len() * 2);
        let mut node = &self.root;
        // bits consumed since the last emitted symbol, and whether they
        // were all ones (valid padding is a prefix of the EOS code)
        let mut pending_bits = 0u8;
        let mut pending_all_ones = true;

        for &octet in buf {
            for i in (0..8).rev() {
                let bit = ((octet >> i) & 1) as usize;
                let Node::Branch(children) = node else {
                    unreachable!("walk always restarts at the root after a leaf");
                };
                // the tree is complete: every branch slot is populated
                node = children[bit]
                    .as_ref()
                    .expect("huffman code table covers all prefixes");
                pending_bits += 1;
                pending_all_ones &= bit == 1;
                if let Node::Leaf(symbol) = node {
                    if *symbol == EOS_SYMBOL {
                        return Err(HuffmanDecoderError::EOSInString);
                    }
                    out.push(*symbol as u8);
                    node = &self.root;
                    pending_bits = 0;
                    pending_all_ones = true;
                }
            }
        }

        if pending_bits > 7 {
            return Err(HuffmanDecoderError::PaddingTooLarge);
        }
        if !pending_all_ones {
            return Err(HuffmanDecoderError::InvalidPadding);
        }
        Ok(out)
    }
}

/// Encodes an octet string with the Appendix B code, padding the final
/// octet with ones.
pub fn huffman_encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut acc: u64 = 0;
    let mut acc_bits: u8 = 0;
    for &octet in input {
        let (code, nbits) = HUFFMAN_CODE_TABLE[octet as usize];
        acc = (acc << nbits) | code as u64;
        acc_bits += nbits;
        while acc_bits >= 8 {
            acc_bits -= 8;
            out.push((acc >> acc_bits) as u8);
        }
    }
    if acc_bits > 0 {
        // pad with the most significant bits of EOS (all ones)
        out.push(((acc << (8 - acc_bits)) as u8) | (0xff >> acc_bits));
    }
    out
}

/// The encoded length of an octet string under the Appendix B code.
pub fn huffman_encoded_len(input: &[u8]) -> usize {
    let bits: usize = input
        .iter()
        .map(|&octet| HUFFMAN_CODE_TABLE[octet as usize].1 as usize)
        .sum();
    bits.div_ceil(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 7541 Appendix C.4.1: "www.example.com"
    #[test]
    fn test_decode_appendix_c_4_1() {
        let encoded = [
            0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ];
        let mut decoder = HuffmanDecoder::new();
        assert_eq!(decoder.decode(&encoded).unwrap(), b"www.example.com");
    }

    /// RFC 7541 Appendix C.4.2: "no-cache"
    #[test]
    fn test_decode_appendix_c_4_2() {
        let encoded = [0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf];
        let mut decoder = HuffmanDecoder::new();
        assert_eq!(decoder.decode(&encoded).unwrap(), b"no-cache");
    }

    /// RFC 7541 Appendix C.6.1: "302" and "private"
    #[test]
    fn test_decode_appendix_c_6_1() {
        let mut decoder = HuffmanDecoder::new();
        assert_eq!(decoder.decode(&[0x64, 0x02]).unwrap(), b"302");
        assert_eq!(
            decoder
                .decode(&[0xae, 0xc3, 0x77, 0x1a, 0x4b])
                .unwrap(),
            b"private"
        );
    }

    #[test]
    fn test_encode_matches_known_vectors() {
        assert_eq!(
            huffman_encode(b"www.example.com"),
            [0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff]
        );
        assert_eq!(huffman_encode(b"no-cache"), [0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf]);
        assert_eq!(huffman_encoded_len(b"www.example.com"), 12);
    }

    #[test]
    fn test_roundtrip_all_symbols() {
        let input: Vec<u8> = (0..=255).collect();
        let mut decoder = HuffmanDecoder::new();
        assert_eq!(decoder.decode(&huffman_encode(&input)).unwrap(), input);
    }

    #[test]
    fn test_invalid_padding_detected() {
        // a single zero byte is the code for '0' (00000) plus 000 padding,
        // which is not a prefix of EOS
        let mut decoder = HuffmanDecoder::new();
        assert_eq!(
            decoder.decode(&[0x00]),
            Err(HuffmanDecoderError::InvalidPadding)
        );
    }

    #[test]
    fn test_eos_in_string_detected() {
        // EOS is 30 one bits; four 0xff octets get there with room to spare
        let mut decoder = HuffmanDecoder::new();
        assert_eq!(
            decoder.decode(&[0xff, 0xff, 0xff, 0xff]),
            Err(HuffmanDecoderError::EOSInString)
        );
    }
}

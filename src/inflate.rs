use anyhow::{Result, bail, ensure};
use log::{debug, trace};

// Most of the following code is adapted from madler/zlib
// Available at: https://github.com/madler/zlib/blob/master/contrib/puff/puff.c

const MAX_BITS: usize = 15;
const MAX_LCODES: usize = 286;
const MAX_DCODES: usize = 30;
const FIXED_LCODES: usize = 288;
const FIXED_DCODES: usize = 32;
const END_OF_BLOCK: u16 = 256;

const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Size base for length codes 257..285.
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
/// Extra bits for length codes 257..285.
const LENGTH_EXTRA: [u32; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
/// Offset base for distance codes 0..29.
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
/// Extra bits for distance codes 0..29.
const DIST_EXTRA: [u32; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Decodes a raw DEFLATE stream (RFC 1951) held entirely in memory.
pub fn inflate(input: &[u8]) -> Result<Vec<u8>> {
    Inflater::new(input).inflate()
}

#[derive(Debug)]
pub struct Inflater<'a> {
    bitstream: BitStream<'a>,
    output: Vec<u8>,
    finished: bool,
}

impl<'a> Inflater<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            bitstream: BitStream::new(input),
            output: Vec::new(),
            finished: false,
        }
    }

    /// Decodes blocks up to and including the one flagged final.
    pub fn inflate(&mut self) -> Result<Vec<u8>> {
        ensure!(!self.finished, "deflate stream already inflated");

        let mut blocks = 0usize;
        loop {
            let is_final = self.bitstream.read(1)? == 1;
            let block_type = self.bitstream.read(2)?;
            trace!(
                "block {}: type {} final {} at byte {}",
                blocks, block_type, is_final, self.bitstream.byte_pos
            );

            match block_type {
                0 => self.stored()?,
                1 => self.huff_fixed()?,
                2 => self.huff_dynamic()?,
                _ => bail!("reserved block type"),
            };
            blocks += 1;

            if is_final {
                break;
            }
        }

        self.finished = true;
        debug!(
            "inflated {} blocks: {} bytes in, {} bytes out",
            blocks,
            self.consumed(),
            self.output.len()
        );

        Ok(std::mem::take(&mut self.output))
    }

    /// Number of input bytes read so far, counting a partially used final byte.
    pub fn consumed(&self) -> usize {
        self.bitstream.byte_pos
    }

    fn stored(&mut self) -> Result<()> {
        self.bitstream.discard();

        let lencom = self.bitstream.get_bytes(4)?;
        let len = u16::from_le_bytes([lencom[0], lencom[1]]);
        let com = u16::from_le_bytes([lencom[2], lencom[3]]);

        ensure!(com == !len, "stored block length does not match its complement");

        let data = self.bitstream.get_bytes(len as usize)?;
        self.output.extend_from_slice(data);

        Ok(())
    }

    fn huff_fixed(&mut self) -> Result<()> {
        let mut lengths = [0u8; FIXED_LCODES];
        lengths[..=143].fill(8);
        lengths[144..=255].fill(9);
        lengths[256..=279].fill(7);
        lengths[280..].fill(8);

        let distances = [5u8; FIXED_DCODES];

        let len_huff = Huffman::new(&lengths)?;
        let dist_huff = Huffman::new(&distances)?;

        self.codes(&len_huff, &dist_huff)
    }

    fn huff_dynamic(&mut self) -> Result<()> {
        let hlit = self.bitstream.read(5)? as usize + 257;
        let hdist = self.bitstream.read(5)? as usize + 1;
        let hclen = self.bitstream.read(4)? as usize + 4;
        ensure!(
            hlit <= MAX_LCODES && hdist <= MAX_DCODES,
            "too many length or distance codes: {} / {}",
            hlit,
            hdist
        );

        let mut lengths = [0u8; MAX_LCODES + MAX_DCODES];
        for &index in &CODE_LENGTH_ORDER[..hclen] {
            lengths[index] = self.bitstream.read(3)? as u8;
        }

        let lencode = Huffman::new(&lengths[..CODE_LENGTH_ORDER.len()])?;
        ensure!(lencode.is_complete(), "incomplete code length code");

        let mut index = 0;
        while index < hlit + hdist {
            let symbol = self.bitstream.decode(&lencode)?;
            if symbol < 16 {
                lengths[index] = symbol as u8;
                index += 1;
                continue;
            }

            let (len, repeat) = match symbol {
                16 => {
                    ensure!(index > 0, "repeat of previous length with no previous length");
                    (lengths[index - 1], 3 + self.bitstream.read(2)? as usize)
                }
                17 => (0, 3 + self.bitstream.read(3)? as usize),
                _ => (0, 11 + self.bitstream.read(7)? as usize),
            };
            ensure!(
                index + repeat <= hlit + hdist,
                "code length repeat runs past the end of the table"
            );
            lengths[index..index + repeat].fill(len);
            index += repeat;
        }

        ensure!(
            lengths[END_OF_BLOCK as usize] != 0,
            "missing end-of-block code"
        );

        let len_huff = Huffman::new(&lengths[..hlit])?;
        ensure!(
            len_huff.is_complete() || len_huff.single_code(),
            "incomplete literal/length code"
        );

        let dist_huff = Huffman::new(&lengths[hlit..hlit + hdist])?;
        ensure!(
            dist_huff.is_complete() || dist_huff.single_code(),
            "incomplete distance code"
        );

        self.codes(&len_huff, &dist_huff)
    }

    fn codes(&mut self, len_huff: &Huffman, dist_huff: &Huffman) -> Result<()> {
        loop {
            let symbol = self.bitstream.decode(len_huff)?;
            match symbol {
                0..=255 => self.output.push(symbol as u8),
                END_OF_BLOCK => break,
                257..=285 => {
                    let symbol = (symbol - 257) as usize;
                    let len = LENGTH_BASE[symbol] as usize
                        + self.bitstream.read(LENGTH_EXTRA[symbol])? as usize;

                    let symbol = self.bitstream.decode(dist_huff)? as usize;
                    ensure!(symbol < DIST_BASE.len(), "invalid distance symbol {}", symbol);
                    let dist = DIST_BASE[symbol] as usize
                        + self.bitstream.read(DIST_EXTRA[symbol])? as usize;
                    ensure!(
                        dist <= self.output.len(),
                        "distance too far back: {} with {} bytes of output",
                        dist,
                        self.output.len()
                    );

                    let start = self.output.len() - dist;
                    for i in 0..len {
                        let literal = self.output[start + i];
                        self.output.push(literal);
                    }
                }
                _ => bail!("invalid literal/length symbol {}", symbol),
            }
        }

        Ok(())
    }
}

/// Canonical Huffman code: number of codes per bit length and the symbols
/// ordered by code.
#[derive(Debug)]
struct Huffman {
    count: [u16; MAX_BITS + 1],
    symbols: Vec<u16>,
    left: i32,
}

impl Huffman {
    fn new(code_lengths: &[u8]) -> Result<Self> {
        let mut count = [0u16; MAX_BITS + 1];
        for &len in code_lengths {
            count[len as usize] += 1;
        }

        let mut left: i32 = 1;
        if count[0] as usize != code_lengths.len() {
            for len in 1..=MAX_BITS {
                left <<= 1;
                left -= count[len] as i32;
                ensure!(left >= 0, "over-subscribed huffman code lengths");
            }
        } else {
            left = 0;
        }

        let mut offsets = [0u16; MAX_BITS + 1];
        for len in 1..MAX_BITS {
            offsets[len + 1] = offsets[len] + count[len];
        }

        let mut symbols = vec![0u16; code_lengths.len()];
        for (symbol, &len) in code_lengths.iter().enumerate() {
            if len != 0 {
                let offset = &mut offsets[len as usize];
                symbols[*offset as usize] = symbol as u16;
                *offset += 1;
            }
        }

        Ok(Self {
            count,
            symbols,
            left,
        })
    }

    fn is_complete(&self) -> bool {
        self.left == 0
    }

    // A lone one-bit code is the only incomplete code allowed.
    fn single_code(&self) -> bool {
        self.count[1] == 1 && self.count[2..].iter().all(|&c| c == 0)
    }
}

#[derive(Debug)]
struct BitStream<'a> {
    bytes: &'a [u8],
    byte_pos: usize,
    buf: u32,
    bits_in_buf: u32,
}

impl<'a> BitStream<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            byte_pos: 0,
            buf: 0,
            bits_in_buf: 0,
        }
    }

    fn read(&mut self, need: u32) -> Result<u32> {
        let mut val = self.buf;

        while self.bits_in_buf < need {
            ensure!(
                self.byte_pos < self.bytes.len(),
                "unexpected end of input: total bytes - {}, need - {} bits",
                self.bytes.len(),
                need
            );
            val |= (self.bytes[self.byte_pos] as u32) << self.bits_in_buf;
            self.byte_pos += 1;
            self.bits_in_buf += 8;
        }

        self.buf = val >> need;
        self.bits_in_buf -= need;

        Ok(val & ((1 << need) - 1))
    }

    fn get_bytes(&mut self, need: usize) -> Result<&'a [u8]> {
        ensure!(
            self.byte_pos + need <= self.bytes.len(),
            "unexpected end of input: stored block wants {} bytes, {} left",
            need,
            self.bytes.len() - self.byte_pos
        );

        let bytes = self.bytes;
        let s = &bytes[self.byte_pos..self.byte_pos + need];
        self.byte_pos += need;

        Ok(s)
    }

    fn discard(&mut self) {
        self.buf = 0;
        self.bits_in_buf = 0;
    }

    fn decode(&mut self, huff: &Huffman) -> Result<u16> {
        let mut code: u32 = 0;
        let mut first: u32 = 0;
        let mut index: u32 = 0;

        for len in 1..=MAX_BITS {
            code |= self.read(1)?;

            let count = huff.count[len] as u32;
            if code - first < count {
                return Ok(huff.symbols[(index + (code - first)) as usize]);
            }

            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }

        bail!("invalid huffman code")
    }
}

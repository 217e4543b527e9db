use std::fmt;

use anyhow::{self, Result, ensure};
use log::debug;

use crate::adler32::adler32;
use crate::inflate::Inflater;

const COMPRESSION_METHOD: u8 = 8;
const MAX_CINFO: u8 = 7;
const FDICT: u8 = 1 << 5;
const TRAILER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Fastest,
    Fast,
    #[default]
    Default,
    Maximum,
}

impl From<u8> for CompressionLevel {
    fn from(flevel: u8) -> Self {
        match flevel & 0b11 {
            0 => Self::Fastest,
            1 => Self::Fast,
            2 => Self::Default,
            _ => Self::Maximum,
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fastest => "fastest",
            Self::Fast => "fast",
            Self::Default => "default",
            Self::Maximum => "maximum",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub method: u8,
    /// LZ77 window size in bytes, `1 << (CINFO + 8)`.
    pub window_size: usize,
    pub preset_dictionary: bool,
    pub level: CompressionLevel,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            method: COMPRESSION_METHOD,
            window_size: 1 << 15,
            preset_dictionary: false,
            level: CompressionLevel::Default,
        }
    }
}

#[derive(Debug)]
pub struct Decoder<'a> {
    pub header: Header,
    pub pos: usize,
    pub input_stream: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            header: Header::default(),
            input_stream: input,
            pos: 0,
        }
    }

    pub fn parse_header(&mut self) -> Result<()> {
        if self.pos != 0 {
            anyhow::bail!("Header already parsed");
        }

        ensure!(
            self.input_stream.len() >= 2,
            "Input too short for zlib header: {} bytes",
            self.input_stream.len()
        );

        let cmf = self.read_byte()?;
        let flg = self.read_byte()?;

        ensure!(
            u16::from_be_bytes([cmf, flg]) % 31 == 0,
            "Invalid zlib header: header check failed for {:#04x} {:#04x}",
            cmf,
            flg
        );

        let method = cmf & 0x0f;
        ensure!(
            method == COMPRESSION_METHOD,
            "Unsupported compression method: {}",
            method
        );

        let cinfo = cmf >> 4;
        ensure!(cinfo <= MAX_CINFO, "Invalid window size: CINFO = {}", cinfo);

        let preset_dictionary = flg & FDICT != 0;
        ensure!(
            !preset_dictionary,
            "Stream requires a preset dictionary, which is not supported"
        );

        self.header = Header {
            method,
            window_size: 1 << (cinfo as usize + 8),
            preset_dictionary,
            level: CompressionLevel::from(flg >> 6),
        };
        debug!(
            "zlib header: window {} bytes, level {}",
            self.header.window_size, self.header.level
        );

        Ok(())
    }

    pub fn decode(&mut self) -> Result<Vec<u8>> {
        self.parse_header()?;

        let mut inflater = Inflater::new(&self.input_stream[self.pos..]);
        let output = inflater.inflate()?;
        self.pos += inflater.consumed();

        let trailer = self
            .read_bytes(TRAILER_LEN)
            .map_err(|_| anyhow::anyhow!("Truncated stream: missing Adler-32 trailer"))?;
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let got = adler32(&output);
        ensure!(
            expected == got,
            "Checksum mismatch: expected {:#010x}, got {:#010x}",
            expected,
            got
        );

        let trailing = self.input_stream.len() - self.pos;
        if trailing > 0 {
            debug!("ignoring {} bytes after zlib stream", trailing);
        }

        Ok(output)
    }

    fn read_byte(&mut self) -> Result<u8> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    fn read_bytes(&mut self, count: usize) -> Result<&[u8]> {
        ensure!(
            self.pos + count <= self.input_stream.len(),
            "Unexpected EOF"
        );
        let bytes = &self.input_stream[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }
}

/// Decompresses one complete zlib stream.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    Decoder::new(input).decode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::ZlibEncoder};
    use std::io::Write;

    const EMPTY_STREAM: [u8; 8] = [0x78, 0x9c, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01];

    fn compress(data: &[u8], level: u32) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(level));
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn empty_stream() {
        assert!(decompress(&EMPTY_STREAM).unwrap().is_empty());
    }

    #[test]
    fn header_fields() {
        let compressed = compress(b"abc", 9);
        let mut decoder = Decoder::new(&compressed);
        assert_eq!(decoder.decode().unwrap(), b"abc");
        assert_eq!(decoder.header.method, 8);
        assert_eq!(decoder.header.window_size, 32 * 1024);
        assert_eq!(decoder.header.level, CompressionLevel::Maximum);
        assert!(!decoder.header.preset_dictionary);
        assert_eq!(decoder.pos, compressed.len());
    }

    #[test]
    fn header_parsed_twice() {
        let mut decoder = Decoder::new(&EMPTY_STREAM);
        decoder.parse_header().unwrap();
        assert!(decoder.parse_header().is_err());
    }

    #[test]
    fn round_trip_levels() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8 ^ (i / 1000) as u8).collect();
        for level in [0, 1, 6, 9] {
            assert_eq!(decompress(&compress(&data, level)).unwrap(), data, "level {level}");
        }
    }

    #[test]
    fn too_short_for_header() {
        let err = decompress(&[0x78]).unwrap_err();
        assert!(err.to_string().contains("too short"), "{err}");
    }

    #[test]
    fn bad_header_check() {
        let err = decompress(&[0x78, 0x9d, 0x03, 0x00]).unwrap_err();
        assert!(err.to_string().contains("header check failed"), "{err}");
    }

    #[test]
    fn unsupported_method() {
        // CM = 7, FCHECK adjusted so the header check passes
        let err = decompress(&[0x77, 0x09, 0x03, 0x00]).unwrap_err();
        assert!(err.to_string().contains("compression method"), "{err}");
    }

    #[test]
    fn window_too_large() {
        // CINFO = 8
        let err = decompress(&[0x88, 0x1c, 0x03, 0x00]).unwrap_err();
        assert!(err.to_string().contains("window size"), "{err}");
    }

    #[test]
    fn preset_dictionary_rejected() {
        // FDICT set
        let err = decompress(&[0x78, 0xbb, 0x00, 0x00, 0x00, 0x01]).unwrap_err();
        assert!(err.to_string().contains("preset dictionary"), "{err}");
    }

    #[test]
    fn checksum_mismatch() {
        let mut compressed = compress(b"hello, world", 6);
        let last = compressed.len() - 1;
        compressed[last] ^= 0xff;
        let err = decompress(&compressed).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"), "{err}");
    }

    #[test]
    fn missing_trailer() {
        let compressed = compress(b"hello, world", 6);
        let err = decompress(&compressed[..compressed.len() - 2]).unwrap_err();
        assert!(err.to_string().contains("trailer"), "{err}");
    }

    #[test]
    fn trailing_bytes_ignored() {
        let mut compressed = compress(b"payload", 6);
        compressed.extend_from_slice(b"garbage");
        assert_eq!(decompress(&compressed).unwrap(), b"payload");
    }
}

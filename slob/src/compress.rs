//! Named decompressors for store bins.
//!
//! The header names the compression applied to every bin in the archive;
//! the name selects one of the implementations here.

use std::io::Read;

use flate2::read::ZlibDecoder;
use tracing::trace;
use xz2::stream::{Filters, LzmaOptions, Stream};

use crate::{Error, Result};

/// Decompressor selected by the compression name in an archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decompressor {
    /// Raw LZMA2 stream (no xz container).
    Lzma2,
    /// zlib-wrapped DEFLATE stream.
    Zlib,
}

impl Decompressor {
    /// Resolve a decompressor from the name written in a header.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "lzma2" => Ok(Decompressor::Lzma2),
            "zlib" => Ok(Decompressor::Zlib),
            other => Err(Error::UnknownCompression(other.to_string())),
        }
    }

    /// The name this decompressor is registered under.
    pub fn name(self) -> &'static str {
        match self {
            Decompressor::Lzma2 => "lzma2",
            Decompressor::Zlib => "zlib",
        }
    }

    /// Decompress a whole bin payload.
    pub fn decompress(self, input: &[u8]) -> Result<Vec<u8>> {
        trace!("{} decompression of {} bytes", self.name(), input.len());
        match self {
            Decompressor::Lzma2 => decompress_lzma2(input),
            Decompressor::Zlib => decompress_zlib(input),
        }
    }
}

fn decompress_zlib(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 4);
    ZlibDecoder::new(input)
        .read_to_end(&mut out)
        .map_err(Error::Io)?;
    Ok(out)
}

fn decompress_lzma2(input: &[u8]) -> Result<Vec<u8>> {
    // Writers use up to a 64 MiB dictionary; a decoder configured for the
    // largest window decodes streams written with any smaller one.
    let opts = LzmaOptions::new_preset(9).map_err(stream_error)?;
    let mut filters = Filters::new();
    filters.lzma2(&opts);
    let stream = Stream::new_raw_decoder(&filters).map_err(stream_error)?;

    let mut out = Vec::with_capacity(input.len() * 8);
    xz2::read::XzDecoder::new_stream(input, stream)
        .read_to_end(&mut out)
        .map_err(Error::Io)?;
    Ok(out)
}

fn stream_error(e: xz2::stream::Error) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_name() {
        assert_eq!(Decompressor::from_name("lzma2").unwrap(), Decompressor::Lzma2);
        assert_eq!(Decompressor::from_name("zlib").unwrap(), Decompressor::Zlib);
        assert!(matches!(
            Decompressor::from_name("bzip2"),
            Err(Error::UnknownCompression(_))
        ));
    }

    #[test]
    fn test_zlib_roundtrip() {
        let data = b"Hello, Earth! Hello, Earth! Hello, Earth!";
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();

        let decompressed = Decompressor::Zlib.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_lzma2_roundtrip() {
        let data = b"Hello, Mars! Hello, Mars! Hello, Mars! Hello, Mars!";

        let opts = LzmaOptions::new_preset(6).unwrap();
        let mut filters = Filters::new();
        filters.lzma2(&opts);
        let stream = Stream::new_raw_encoder(&filters).unwrap();
        let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();

        let decompressed = Decompressor::Lzma2.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_malformed_zlib_input() {
        let err = Decompressor::Zlib.decompress(b"not zlib data").unwrap_err();
        assert!(matches!(err, Error::Io(_)), "actual error: {err:?}");
    }
}

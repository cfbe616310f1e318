//! Archive header parsing.
//!
//! The header is self-describing: it carries the archive's identity, the
//! text encoding and compression used by the rest of the file, free-form
//! tags, the content-type table, and the offsets of the two item lists.

use std::collections::HashMap;
use std::io::{Read, Seek};

use byteorder::{BigEndian, ReadBytesExt};
use uuid::Uuid;

use crate::ioutils::{ReadSlobExt, TextEncoding};
use crate::{Error, Result, MAGIC};

/// Parsed archive header.
#[derive(Debug, Clone)]
pub struct Header {
    /// Content id of the archive.
    pub uuid: Uuid,
    /// Declared text encoding, as written.
    pub encoding: String,
    /// Compression name for store bins, e.g. `"lzma2"` or `"zlib"`.
    pub compression: String,
    /// Free-form tag map. `"uri"` and `"label"` have conventional meaning.
    pub tags: HashMap<String, String>,
    /// Content types referenced by store items, in declaration order.
    pub content_types: Vec<String>,
    /// Advisory total of individual content items across all bins.
    pub blob_count: u32,
    /// Absolute offset of the store item list.
    pub store_offset: u64,
    /// Absolute offset of the reference item list (right after the header).
    pub refs_offset: u64,
    /// Declared size of the whole file.
    pub size: u64,

    pub(crate) text_encoding: TextEncoding,
}

impl Header {
    /// Parse a header from the start of an archive.
    ///
    /// The reader must be positioned at offset 0; afterwards it sits at the
    /// first byte of the reference list.
    pub(crate) fn parse<R: Read + Seek>(f: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        f.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::UnknownFileFormat);
        }

        let uuid = f.read_uuid()?;

        // The encoding name itself is always UTF-8; everything after it is
        // decoded in the declared encoding.
        let encoding = f.read_tiny_text(TextEncoding::Utf8)?;
        let text_encoding = TextEncoding::from_name(&encoding)?;

        let compression = f.read_tiny_text(text_encoding)?;

        let tag_count = f.read_u8()?;
        let mut tags = HashMap::with_capacity(tag_count as usize);
        for _ in 0..tag_count {
            let key = f.read_tiny_text(text_encoding)?;
            let value = f.read_tiny_text(text_encoding)?;
            tags.insert(key, value);
        }

        let content_type_count = f.read_u8()?;
        let mut content_types = Vec::with_capacity(content_type_count as usize);
        for _ in 0..content_type_count {
            content_types.push(f.read_text(text_encoding)?);
        }

        let blob_count = f.read_u32::<BigEndian>()?;
        let store_offset = u64::try_from(f.read_i64::<BigEndian>()?)
            .map_err(|_| Error::UnknownFileFormat)?;
        let size =
            u64::try_from(f.read_i64::<BigEndian>()?).map_err(|_| Error::TruncatedFile)?;
        let refs_offset = f.stream_position()?;

        Ok(Header {
            uuid,
            encoding,
            compression,
            tags,
            content_types,
            blob_count,
            store_offset,
            refs_offset,
            size,
            text_encoding,
        })
    }
}

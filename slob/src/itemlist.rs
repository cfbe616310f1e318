//! Random-access readers for the archive's on-disk item lists.
//!
//! The reference list and the store share one shape: a count, a table of
//! positions, and a data region holding one variable-length record per
//! item. [`ItemList`] owns that skeleton; decoding a record is delegated
//! to an [`ItemDecoder`], and decoded items are kept in a bounded LRU.

use std::num::NonZeroUsize;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use lru::LruCache;
use parking_lot::Mutex;

use crate::ioutils::{ByteSource, ReadSlobExt, SourceReader, TextEncoding};
use crate::{Error, Result};

/// Width of the entries in an item list's position table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PosSize {
    /// 32-bit entries, used by the table inside a decompressed bin.
    U32,
    /// 64-bit entries, used by the file-level lists.
    U64,
}

impl PosSize {
    pub(crate) fn byte_size(self) -> u64 {
        match self {
            PosSize::U32 => 4,
            PosSize::U64 => 8,
        }
    }

    fn read(self, r: &mut SourceReader<'_>) -> Result<u64> {
        match self {
            PosSize::U32 => Ok(r.read_u32::<BigEndian>()?.into()),
            PosSize::U64 => Ok(r.read_u64::<BigEndian>()?),
        }
    }
}

/// Location of one item list within the archive.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ItemListInfo {
    pub(crate) count: u32,
    pub(crate) pos_offset: u64,
    pub(crate) data_offset: u64,
    pub(crate) pos_size: PosSize,
}

impl ItemListInfo {
    pub(crate) fn read(source: &ByteSource, offset: u64, pos_size: PosSize) -> Result<Self> {
        let mut r = SourceReader::new(source, offset);
        let count = r.read_u32::<BigEndian>()?;
        let pos_offset = r.position();
        let data_offset = pos_offset + pos_size.byte_size() * u64::from(count);
        Ok(Self {
            count,
            pos_offset,
            data_offset,
            pos_size,
        })
    }
}

/// Decodes one record out of an item list's data region.
pub(crate) trait ItemDecoder {
    type Item;

    fn read_item(&self, r: &mut SourceReader<'_>) -> Result<Self::Item>;
}

pub(crate) struct ItemList<D: ItemDecoder> {
    source: Arc<ByteSource>,
    info: ItemListInfo,
    decoder: D,
    cache: Mutex<LruCache<u32, Arc<D::Item>>>,
}

impl<D: ItemDecoder> ItemList<D> {
    pub(crate) fn new(
        source: Arc<ByteSource>,
        info: ItemListInfo,
        decoder: D,
        cache_capacity: NonZeroUsize,
    ) -> Self {
        Self {
            source,
            info,
            decoder,
            cache: Mutex::new(LruCache::new(cache_capacity)),
        }
    }

    pub(crate) fn count(&self) -> u32 {
        self.info.count
    }

    pub(crate) fn get(&self, i: u32) -> Result<Arc<D::Item>> {
        if i >= self.info.count {
            return Err(Error::IndexOutOfRange {
                index: u64::from(i),
                count: u64::from(self.info.count),
            });
        }
        if let Some(item) = self.cache.lock().get(&i) {
            return Ok(item.clone());
        }

        let pos_entry = self.info.pos_offset + u64::from(i) * self.info.pos_size.byte_size();
        let mut r = SourceReader::new(&self.source, pos_entry);
        let pointer = self.info.pos_size.read(&mut r)?;

        let mut r = SourceReader::new(&self.source, self.info.data_offset + pointer);
        let item = Arc::new(self.decoder.read_item(&mut r)?);

        self.cache.lock().put(i, item.clone());
        Ok(item)
    }
}

/// A reference list entry: a sorted lookup key and the location of the
/// content it points at.
#[derive(Debug, Clone)]
pub(crate) struct Ref {
    pub(crate) key: String,
    pub(crate) bin_index: u32,
    pub(crate) item_index: u16,
    pub(crate) fragment: String,
}

/// Key-only projection of a reference, used by binary search.
#[derive(Debug, Clone)]
pub(crate) struct Keyed {
    pub(crate) key: String,
}

pub(crate) struct RefDecoder {
    pub(crate) encoding: TextEncoding,
}

impl ItemDecoder for RefDecoder {
    type Item = Ref;

    fn read_item(&self, r: &mut SourceReader<'_>) -> Result<Ref> {
        let key = r.read_text(self.encoding)?;
        let bin_index = r.read_u32::<BigEndian>()?;
        let item_index = r.read_u16::<BigEndian>()?;
        let fragment = r.read_tiny_text(self.encoding)?;
        Ok(Ref {
            key,
            bin_index,
            item_index,
            fragment,
        })
    }
}

/// Reads only the key of a reference, leaving the rest of the record alone.
/// Keeps the working set of a binary search small.
pub(crate) struct KeyDecoder {
    pub(crate) encoding: TextEncoding,
}

impl ItemDecoder for KeyDecoder {
    type Item = Keyed;

    fn read_item(&self, r: &mut SourceReader<'_>) -> Result<Keyed> {
        Ok(Keyed {
            key: r.read_text(self.encoding)?,
        })
    }
}

pub(crate) type RefList = ItemList<RefDecoder>;
pub(crate) type KeyList = ItemList<KeyDecoder>;

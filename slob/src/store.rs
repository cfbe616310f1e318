//! The compressed content store.
//!
//! Store items hold a bin of content blobs compressed as one unit. The
//! compressed payload is carried around until content is first requested,
//! then decompressed once and replaced by the decoded bin; the store's
//! small LRU bounds how many decoded bins stay resident.

use std::io::Read;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::compress::Decompressor;
use crate::ioutils::{ByteSource, SourceReader};
use crate::itemlist::{ItemDecoder, ItemList, ItemListInfo};
use crate::{Error, Result};

/// A decompressed bin: a 32-bit position table followed by a data region of
/// length-prefixed content blobs.
pub(crate) struct Bin {
    bytes: Bytes,
    count: u32,
    data_offset: usize,
}

impl Bin {
    fn new(bytes: Bytes, count: u32) -> Self {
        Self {
            bytes,
            count,
            data_offset: count as usize * 4,
        }
    }

    fn read_u32_at(&self, pos: usize) -> Result<u32> {
        let bytes = self
            .bytes
            .get(pos..pos + 4)
            .ok_or(Error::TruncatedFile)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Zero-copy view of the `i`-th content blob. The returned `Bytes`
    /// shares the bin's backing allocation.
    fn item(&self, i: u16) -> Result<Bytes> {
        if u32::from(i) >= self.count {
            return Err(Error::IndexOutOfRange {
                index: u64::from(i),
                count: u64::from(self.count),
            });
        }
        let pointer = self.read_u32_at(i as usize * 4)? as usize;
        let start = self.data_offset + pointer;
        let length = self.read_u32_at(start)? as usize;
        let end = start + 4 + length;
        if end > self.bytes.len() {
            return Err(Error::TruncatedFile);
        }
        Ok(self.bytes.slice(start + 4..end))
    }
}

enum BinState {
    Compressed(Vec<u8>),
    Decoded(Bin),
}

/// One store record: the content-type ids of the items in its bin, plus the
/// bin itself, decompressed on first access.
pub(crate) struct StoreItem {
    content_type_ids: Vec<u8>,
    state: Mutex<BinState>,
}

impl StoreItem {
    fn new(content_type_ids: Vec<u8>, compressed: Vec<u8>) -> Self {
        Self {
            content_type_ids,
            state: Mutex::new(BinState::Compressed(compressed)),
        }
    }

    pub(crate) fn item_count(&self) -> u32 {
        self.content_type_ids.len() as u32
    }

    fn bin_item(&self, item_index: u16, decompressor: Decompressor) -> Result<Bytes> {
        let mut state = self.state.lock();
        if let BinState::Compressed(payload) = &*state {
            let t0 = Instant::now();
            let decompressed = decompressor.decompress(payload)?;
            debug!(
                "decompressed {} bytes to {} in {:?}",
                payload.len(),
                decompressed.len(),
                t0.elapsed()
            );
            // Dropping the compressed payload here keeps only one copy of
            // the bin alive.
            *state = BinState::Decoded(Bin::new(Bytes::from(decompressed), self.item_count()));
        }
        match &*state {
            BinState::Decoded(bin) => bin.item(item_index),
            BinState::Compressed(_) => unreachable!("bin decoded above"),
        }
    }
}

pub(crate) struct StoreDecoder;

impl ItemDecoder for StoreDecoder {
    type Item = StoreItem;

    fn read_item(&self, r: &mut SourceReader<'_>) -> Result<StoreItem> {
        let bin_item_count = r.read_u32::<BigEndian>()?;
        let mut content_type_ids = vec![0u8; bin_item_count as usize];
        r.read_exact(&mut content_type_ids)?;

        let compressed_length = r.read_u32::<BigEndian>()?;
        let mut compressed = vec![0u8; compressed_length as usize];
        r.read_exact(&mut compressed)?;

        Ok(StoreItem::new(content_type_ids, compressed))
    }
}

/// The archive's content store: an item list of compressed bins plus the
/// table resolving content-type ids to their names.
pub(crate) struct Store {
    items: ItemList<StoreDecoder>,
    decompressor: Decompressor,
    content_types: Vec<String>,
}

impl Store {
    pub(crate) fn new(
        source: Arc<ByteSource>,
        info: ItemListInfo,
        decompressor: Decompressor,
        content_types: Vec<String>,
        cache_capacity: NonZeroUsize,
    ) -> Self {
        Self {
            items: ItemList::new(source, info, StoreDecoder, cache_capacity),
            decompressor,
            content_types,
        }
    }

    pub(crate) fn content_type(&self, bin_index: u32, item_index: u16) -> Result<String> {
        let item = self.items.get(bin_index)?;
        let id = *item
            .content_type_ids
            .get(item_index as usize)
            .ok_or(Error::IndexOutOfRange {
                index: u64::from(item_index),
                count: u64::from(item.item_count()),
            })?;
        self.content_types
            .get(id as usize)
            .cloned()
            .ok_or(Error::IndexOutOfRange {
                index: u64::from(id),
                count: self.content_types.len() as u64,
            })
    }

    pub(crate) fn content_data(&self, bin_index: u32, item_index: u16) -> Result<Bytes> {
        self.items
            .get(bin_index)?
            .bin_item(item_index, self.decompressor)
    }
}

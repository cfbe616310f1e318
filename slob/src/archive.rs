//! The archive handle and single-archive lookup.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collate::Strength;
use crate::compress::Decompressor;
use crate::header::Header;
use crate::ioutils::{ByteSource, SourceReader};
use crate::itemlist::{ItemListInfo, KeyDecoder, KeyList, PosSize, Ref, RefDecoder, RefList};
use crate::store::Store;
use crate::{Error, Result};

const REF_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(256).unwrap();
const KEY_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(256).unwrap();
const STORE_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(4).unwrap();

/// Options for opening an archive.
#[derive(Debug, Clone)]
pub struct SlobOptions {
    /// Memory-map the file when possible; a seekable handle is used as the
    /// fallback (and always when this is off).
    pub memory_map: bool,
}

impl Default for SlobOptions {
    fn default() -> Self {
        Self { memory_map: true }
    }
}

struct SlobInner {
    source: Arc<ByteSource>,
    header: Header,
    store: Store,
    ref_list: RefList,
    key_list: KeyList,
}

/// An open slob archive.
///
/// The handle is cheap to clone; clones share the underlying file and
/// caches. [`close`](Slob::close) releases the file for every clone.
#[derive(Clone)]
pub struct Slob {
    inner: Arc<SlobInner>,
}

impl Slob {
    /// Open an archive with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Slob> {
        Self::open_with(path, SlobOptions::default())
    }

    /// Open an archive.
    ///
    /// Parses and validates the header; fails with
    /// [`Error::UnknownFileFormat`] when the magic does not match and
    /// [`Error::TruncatedFile`] when the declared size differs from the
    /// file's actual length.
    pub fn open_with(path: impl AsRef<Path>, options: SlobOptions) -> Result<Slob> {
        let path = path.as_ref();
        let source = Arc::new(ByteSource::open(path, options.memory_map)?);

        let mut r = SourceReader::new(&source, 0);
        let header = Header::parse(&mut r)?;
        if header.size != source.len() {
            return Err(Error::TruncatedFile);
        }
        let decompressor = Decompressor::from_name(&header.compression)?;

        let ref_info = ItemListInfo::read(&source, header.refs_offset, PosSize::U64)?;
        let store_info = ItemListInfo::read(&source, header.store_offset, PosSize::U64)?;
        let encoding = header.text_encoding;

        let store = Store::new(
            source.clone(),
            store_info,
            decompressor,
            header.content_types.clone(),
            STORE_CACHE_CAPACITY,
        );
        let ref_list = RefList::new(
            source.clone(),
            ref_info,
            RefDecoder { encoding },
            REF_CACHE_CAPACITY,
        );
        let key_list = KeyList::new(
            source.clone(),
            ref_info,
            KeyDecoder { encoding },
            KEY_CACHE_CAPACITY,
        );

        debug!("opened archive {} from {}", header.uuid, path.display());
        Ok(Slob {
            inner: Arc::new(SlobInner {
                source,
                header,
                store,
                ref_list,
                key_list,
            }),
        })
    }

    /// The archive's content id.
    pub fn id(&self) -> Uuid {
        self.inner.header.uuid
    }

    /// The parsed header.
    pub fn header(&self) -> &Header {
        &self.inner.header
    }

    /// The archive's tag map.
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.inner.header.tags
    }

    /// The archive's URI: the `"uri"` tag, or `slob:<uuid>` when absent.
    pub fn uri(&self) -> String {
        match self.inner.header.tags.get("uri") {
            Some(uri) => uri.clone(),
            None => format!("slob:{}", self.id()),
        }
    }

    /// Advisory number of content items across all bins.
    pub fn blob_count(&self) -> u32 {
        self.inner.header.blob_count
    }

    /// Number of references (distinct key to content entries).
    pub fn size(&self) -> u32 {
        self.inner.ref_list.count()
    }

    /// The `i`-th reference as a [`Blob`], in collation order.
    pub fn get(&self, i: u32) -> Result<Blob> {
        let r = self.inner.ref_list.get(i)?;
        Ok(Blob::from_ref(self.clone(), &r))
    }

    /// Iterate over all references in collation order.
    pub fn iter(&self) -> BlobIter {
        BlobIter {
            slob: self.clone(),
            index: 0,
        }
    }

    /// Content of the blob with the given `"<bin>-<item>"` id.
    pub fn content(&self, blob_id: &str) -> Result<Content> {
        let (bin_index, item_index) = split_blob_id(blob_id)?;
        self.content_at(bin_index, item_index)
    }

    /// Content type of the blob with the given `"<bin>-<item>"` id.
    pub fn content_type(&self, blob_id: &str) -> Result<String> {
        let (bin_index, item_index) = split_blob_id(blob_id)?;
        self.inner.store.content_type(bin_index, item_index)
    }

    fn content_at(&self, bin_index: u32, item_index: u16) -> Result<Content> {
        let data = self.inner.store.content_data(bin_index, item_index)?;
        let content_type = self.inner.store.content_type(bin_index, item_index)?;
        Ok(Content { content_type, data })
    }

    /// Look up `key` in this archive at the given strength.
    ///
    /// Returns a lazy iterator over matching references in collation order:
    /// a binary search finds the first candidate, then the scan continues
    /// while the strength's match comparison holds.
    pub fn find(&self, key: &str, strength: Strength) -> Result<FindIter> {
        let t0 = Instant::now();
        let key_list = &self.inner.key_list;
        let start = lower_bound(key_list.count(), |i| {
            let entry = key_list.get(i)?;
            strength.compare(&entry.key, key)
        })?;
        debug!(
            "{}: binary search for {key:?} at {strength:?} took {:?}",
            self.label(),
            t0.elapsed()
        );
        Ok(FindIter {
            slob: self.clone(),
            key: key.to_string(),
            strength,
            index: start,
        })
    }

    /// Release the file handle. Operations needing it fail with
    /// [`Error::Closed`] afterwards; already-decoded cached bins stay
    /// readable.
    pub fn close(&self) {
        self.inner.source.close();
    }

    fn label(&self) -> &str {
        self.inner
            .header
            .tags
            .get("label")
            .map(String::as_str)
            .unwrap_or("")
    }
}

impl PartialEq for Slob {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Slob {}

impl fmt::Debug for Slob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slob").field("id", &self.id()).finish()
    }
}

fn split_blob_id(blob_id: &str) -> Result<(u32, u16)> {
    let malformed = || Error::BlobIdMalformed(blob_id.to_string());
    let (bin, item) = blob_id.split_once('-').ok_or_else(malformed)?;
    let bin_index = bin.parse().map_err(|_| malformed())?;
    let item_index = item.parse().map_err(|_| malformed())?;
    Ok((bin_index, item_index))
}

/// Smallest index whose entry compares greater than or equal to the target,
/// with `compare_at(i)` reporting how entry `i` compares against it.
pub(crate) fn lower_bound<F>(count: u32, mut compare_at: F) -> Result<u32>
where
    F: FnMut(u32) -> Result<Ordering>,
{
    let mut lo = 0;
    let mut hi = count;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match compare_at(mid)? {
            Ordering::Less => lo = mid + 1,
            _ => hi = mid,
        }
    }
    Ok(lo)
}

/// A handle for one content item of an archive.
///
/// Holds the lookup key and fragment of the reference it was reached
/// through; the content itself is fetched on demand from the owner.
#[derive(Clone)]
pub struct Blob {
    owner: Slob,
    id: String,
    key: String,
    fragment: String,
    bin_index: u32,
    item_index: u16,
}

impl Blob {
    fn from_ref(owner: Slob, r: &Ref) -> Self {
        Self {
            owner,
            id: format!("{}-{}", r.bin_index, r.item_index),
            key: r.key.clone(),
            fragment: r.fragment.clone(),
            bin_index: r.bin_index,
            item_index: r.item_index,
        }
    }

    /// The archive this blob belongs to.
    pub fn owner(&self) -> &Slob {
        &self.owner
    }

    /// Stable id of the content item, `"<bin>-<item>"`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The lookup key of the reference this blob was reached through.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Optional in-content anchor; empty when the reference has none.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Fetch the blob's typed content.
    pub fn content(&self) -> Result<Content> {
        self.owner.content_at(self.bin_index, self.item_index)
    }

    /// Fetch only the blob's content type.
    pub fn content_type(&self) -> Result<String> {
        self.owner
            .inner
            .store
            .content_type(self.bin_index, self.item_index)
    }

    /// Identity used to suppress duplicate results across archives.
    pub(crate) fn dedup_key(&self) -> String {
        format!("{}:{}#{}", self.owner.id(), self.id, self.fragment)
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
            && self.id == other.id
            && self.key == other.key
            && self.fragment == other.fragment
    }
}

impl Eq for Blob {}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob<{}> ({}#{})", self.id, self.key, self.fragment)
    }
}

/// One content item: its declared type and a view of its bytes.
///
/// The byte view shares the decoded bin's allocation, so it stays valid
/// independently of the store cache.
pub struct Content {
    /// Content type resolved through the archive's content-type table.
    pub content_type: String,
    /// The content bytes.
    pub data: Bytes,
}

/// Iterator over the matches of one lookup in one archive.
///
/// Single-pass: reads references on demand and ends at the first
/// non-matching key. A read failure mid-scan is logged and ends the
/// iteration; the archive stays usable.
pub struct FindIter {
    slob: Slob,
    key: String,
    strength: Strength,
    index: u32,
}

impl FindIter {
    pub(crate) fn empty(slob: Slob, strength: Strength) -> Self {
        Self {
            slob,
            key: String::new(),
            strength,
            index: u32::MAX,
        }
    }
}

impl Iterator for FindIter {
    type Item = Blob;

    fn next(&mut self) -> Option<Blob> {
        let count = self.slob.size();
        if self.index >= count {
            return None;
        }
        let i = self.index;
        let r = match self.slob.inner.ref_list.get(i) {
            Ok(r) => r,
            Err(e) => {
                warn!("reading reference {i} of {} failed: {e}", self.slob.id());
                self.index = u32::MAX;
                return None;
            }
        };
        let matched = match self.strength.stop_compare(&r.key, &self.key) {
            Ok(ordering) => ordering == Ordering::Equal,
            Err(e) => {
                warn!("comparing reference {i} of {} failed: {e}", self.slob.id());
                false
            }
        };
        if !matched {
            self.index = u32::MAX;
            return None;
        }
        self.index += 1;
        Some(Blob::from_ref(self.slob.clone(), &r))
    }
}

/// Iterator over every reference of an archive, in collation order.
pub struct BlobIter {
    slob: Slob,
    index: u32,
}

impl Iterator for BlobIter {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Result<Blob>> {
        if self.index >= self.slob.size() {
            return None;
        }
        let blob = self.slob.get(self.index);
        self.index += 1;
        Some(blob)
    }
}

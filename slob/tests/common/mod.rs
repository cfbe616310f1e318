//! Test-only writer producing small slob archives.
//!
//! Builds just enough of the format for the read path under test: bins of
//! one or more content items, refs sorted the way the reader expects them.

use std::io::Write;
use std::path::Path;

use slob::{Strength, MAGIC};

pub const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

struct RefSpec {
    key: String,
    bin_index: u32,
    item_index: u16,
    fragment: String,
}

pub struct ArchiveBuilder {
    uuid: [u8; 16],
    compression: String,
    tags: Vec<(String, String)>,
    content_types: Vec<String>,
    /// Bins of (content type id, payload) items
    bins: Vec<Vec<(u8, Vec<u8>)>>,
    refs: Vec<RefSpec>,
}

impl ArchiveBuilder {
    pub fn new(uuid_seed: u8) -> Self {
        Self {
            uuid: [uuid_seed; 16],
            compression: "zlib".to_string(),
            tags: Vec::new(),
            content_types: Vec::new(),
            bins: Vec::new(),
            refs: Vec::new(),
        }
    }

    pub fn compression(mut self, name: &str) -> Self {
        self.compression = name.to_string();
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    /// Add one content item reachable under each of `keys`.
    pub fn add(mut self, data: &[u8], content_type: &str, keys: &[&str]) -> Self {
        let id = self.store(data, content_type);
        for key in keys {
            self = self.alias(key, &id);
        }
        self
    }

    /// Store a content item in a bin of its own and return its blob id.
    pub fn store(&mut self, data: &[u8], content_type: &str) -> String {
        self.store_many(&[(content_type, data)]).remove(0)
    }

    /// Store several content items together in one bin and return their
    /// blob ids.
    pub fn store_many(&mut self, items: &[(&str, &[u8])]) -> Vec<String> {
        let bin_index = self.bins.len() as u32;
        let mut bin = Vec::new();
        let mut ids = Vec::new();
        for (item_index, (content_type, data)) in items.iter().enumerate() {
            let type_id = self.content_type_id(content_type);
            bin.push((type_id, data.to_vec()));
            ids.push(format!("{bin_index}-{item_index}"));
        }
        self.bins.push(bin);
        ids
    }

    fn content_type_id(&mut self, content_type: &str) -> u8 {
        match self.content_types.iter().position(|t| t == content_type) {
            Some(i) => i as u8,
            None => {
                self.content_types.push(content_type.to_string());
                (self.content_types.len() - 1) as u8
            }
        }
    }

    /// Add a ref for `key` pointing at an existing blob id.
    pub fn alias(self, key: &str, blob_id: &str) -> Self {
        self.alias_with_fragment(key, "", blob_id)
    }

    pub fn alias_with_fragment(mut self, key: &str, fragment: &str, blob_id: &str) -> Self {
        let (bin, item) = blob_id.split_once('-').unwrap();
        self.refs.push(RefSpec {
            key: key.to_string(),
            bin_index: bin.parse().unwrap(),
            item_index: item.parse().unwrap(),
            fragment: fragment.to_string(),
        });
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        // The reader trusts the ref list to be sorted by key
        self.refs.sort_by(|a, b| {
            Strength::Quaternary
                .compare(&a.key, &b.key)
                .unwrap()
                .then_with(|| a.key.cmp(&b.key))
        });

        let refs_block = item_list(self.refs.iter().map(ref_record).collect());
        let store_block = item_list(
            self.bins
                .iter()
                .map(|bin| store_record(bin, &self.compression))
                .collect(),
        );
        let blob_count: u32 = self.bins.iter().map(|bin| bin.len() as u32).sum();

        let mut header = Vec::new();
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&self.uuid);
        header.extend_from_slice(&tiny("UTF-8"));
        header.extend_from_slice(&tiny(&self.compression));
        header.push(self.tags.len() as u8);
        for (key, value) in &self.tags {
            header.extend_from_slice(&tiny(key));
            header.extend_from_slice(&tiny(value));
        }
        header.push(self.content_types.len() as u8);
        for content_type in &self.content_types {
            header.extend_from_slice(&text(content_type));
        }
        header.extend_from_slice(&blob_count.to_be_bytes());

        let header_len = header.len() as i64 + 8 + 8;
        let store_offset = header_len + refs_block.len() as i64;
        let file_size = store_offset + store_block.len() as i64;
        header.extend_from_slice(&store_offset.to_be_bytes());
        header.extend_from_slice(&file_size.to_be_bytes());

        header.extend_from_slice(&refs_block);
        header.extend_from_slice(&store_block);
        header
    }

    pub fn write_to(self, path: &Path) {
        std::fs::write(path, self.build()).unwrap();
    }
}

/// The standard fixture: two bins, four refs, the tags the tests expect.
pub fn test_archive() -> ArchiveBuilder {
    let mut builder = ArchiveBuilder::new(0x11);
    let earth = builder.store("Hello, Earth!".as_bytes(), PLAIN_TEXT);
    let mars = builder.store("Hello, Mars!".as_bytes(), PLAIN_TEXT);
    builder
        .alias("earth", &earth)
        .alias("terra", &earth)
        .alias("земля", &earth)
        .alias("mars", &mars)
        .tag("sometag", "xyz")
        .tag("some.other.tag", "abc")
}

fn tiny(s: &str) -> Vec<u8> {
    assert!(s.len() <= 255);
    let mut out = vec![s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

fn text(s: &str) -> Vec<u8> {
    let mut out = (u16::try_from(s.len()).unwrap()).to_be_bytes().to_vec();
    out.extend_from_slice(s.as_bytes());
    out
}

fn ref_record(r: &RefSpec) -> Vec<u8> {
    let mut out = text(&r.key);
    out.extend_from_slice(&r.bin_index.to_be_bytes());
    out.extend_from_slice(&r.item_index.to_be_bytes());
    out.extend_from_slice(&tiny(&r.fragment));
    out
}

fn store_record(items: &[(u8, Vec<u8>)], compression: &str) -> Vec<u8> {
    // Bin layout: a u32 position per item, then length-prefixed payloads
    let mut positions = Vec::new();
    let mut data = Vec::new();
    for (_, payload) in items {
        positions.extend_from_slice(&(data.len() as u32).to_be_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        data.extend_from_slice(payload);
    }
    positions.extend_from_slice(&data);
    let compressed = compress(&positions, compression);

    let mut out = (items.len() as u32).to_be_bytes().to_vec();
    for (type_id, _) in items {
        out.push(*type_id);
    }
    out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    out.extend_from_slice(&compressed);
    out
}

fn compress(data: &[u8], compression: &str) -> Vec<u8> {
    match compression {
        "zlib" => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        }
        "lzma2" => {
            let opts = xz2::stream::LzmaOptions::new_preset(6).unwrap();
            let mut filters = xz2::stream::Filters::new();
            filters.lzma2(&opts);
            let stream = xz2::stream::Stream::new_raw_encoder(&filters).unwrap();
            let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        }
        // Pass anything else through so header validation can be exercised
        _ => data.to_vec(),
    }
}

fn item_list(records: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = (records.len() as u32).to_be_bytes().to_vec();
    let mut pos = 0u64;
    for record in &records {
        out.extend_from_slice(&pos.to_be_bytes());
        pos += record.len() as u64;
    }
    for record in &records {
        out.extend_from_slice(record);
    }
    out
}

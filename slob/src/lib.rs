//! Read-only access to slob dictionary archives.
//!
//! A slob archive is a single immutable file: a self-describing header, a
//! reference list sorted by Unicode collation order, and a store of
//! compressed bins holding the content blobs. This crate opens such files,
//! answers random-access queries by position, resolves lookup strings into
//! ranked result iterators under configurable collation strength, and
//! returns typed content bytes for matches.
//!
//! ## Reading an archive
//!
//! ```no_run
//! use slob::{Slob, Strength};
//!
//! # fn main() -> slob::Result<()> {
//! let archive = Slob::open("wikipedia.slob")?;
//! for blob in archive.find("earth", Strength::Quaternary)? {
//!     let content = blob.content()?;
//!     println!("{}: {} bytes", content.content_type, content.data.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Looking up across several archives
//!
//! Multiple open archives can be queried as one. Results are deduplicated
//! and ranked: exact matches before prefix matches, stronger collation
//! strengths before weaker ones, and matches from a preferred archive
//! first.
//!
//! ```no_run
//! # fn main() -> slob::Result<()> {
//! let a = slob::Slob::open("a.slob")?;
//! let b = slob::Slob::open("b.slob")?;
//! for blob in slob::find("earth", &[a, b.clone()]) {
//!     println!("{} from {}", blob.key(), blob.owner().uri());
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod collate;
pub mod compress;
pub mod error;
pub mod header;
mod ioutils;
mod itemlist;
pub mod merge;
mod store;

pub use archive::{Blob, BlobIter, Content, FindIter, Slob, SlobOptions};
pub use collate::Strength;
pub use compress::Decompressor;
pub use error::{Error, Result};
pub use header::Header;
pub use merge::{find, find_with, MatchIterator};

/// Magic bytes at the start of every slob file
pub const MAGIC: [u8; 8] = [0x21, 0x2d, 0x31, 0x53, 0x4c, 0x4f, 0x42, 0x1f];

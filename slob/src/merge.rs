//! Cross-archive lookup with ranking and deduplication.
//!
//! [`find_with`] runs the same lookup against many archives at once,
//! walking the strength cascade per archive and merging the per-archive
//! iterators through a small buffer holding one pending match per archive.
//! Each distinct content item is emitted once, ordered by preference,
//! strength, and key collation.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::archive::{Blob, FindIter, Slob};
use crate::collate::Strength;

/// Look up `key` across `slobs` with default ranking and the full strength
/// cascade.
pub fn find(key: &str, slobs: &[Slob]) -> MatchIterator {
    find_with(key, slobs, None, None)
}

/// Look up `key` across `slobs`.
///
/// Matches from `preferred` (and archives sharing its URI) rank first among
/// exact-strength results; preference never reorders prefix-strength
/// results. `up_to_strength` bounds how far the cascade descends, inclusive;
/// `None` walks it down to the weakest prefix strength.
pub fn find_with(
    key: &str,
    slobs: &[Slob],
    preferred: Option<&Slob>,
    up_to_strength: Option<Strength>,
) -> MatchIterator {
    let mut iter = MatchIterator {
        key: key.to_string(),
        preferred: preferred.cloned(),
        up_to_strength,
        archives: slobs
            .iter()
            .map(|slob| ArchiveState {
                slob: slob.clone(),
                current: None,
            })
            .collect(),
        merge_buffer: Vec::new(),
        seen: HashSet::new(),
    };
    for idx in 0..iter.archives.len() {
        let slob = iter.archives[idx].slob.clone();
        iter.archives[idx].current = iter.next_result(&slob, None);
        iter.fill_slot(idx);
    }
    iter
}

struct FindResult {
    iter: FindIter,
    strength: Strength,
}

struct ArchiveState {
    slob: Slob,
    /// Lookup in progress at the archive's current cascade strength;
    /// `None` once the archive is exhausted.
    current: Option<FindResult>,
}

struct MergeBufferItem {
    blob: Blob,
    strength: Strength,
}

/// Peekable iterator over ranked, deduplicated matches from many archives.
pub struct MatchIterator {
    key: String,
    preferred: Option<Slob>,
    up_to_strength: Option<Strength>,
    archives: Vec<ArchiveState>,
    merge_buffer: Vec<MergeBufferItem>,
    seen: HashSet<String>,
}

impl MatchIterator {
    /// The next match without consuming it.
    pub fn peek(&mut self) -> Option<&Blob> {
        self.sort_buffer();
        self.merge_buffer.first().map(|item| &item.blob)
    }

    /// Whether another match is pending.
    pub fn has_next(&self) -> bool {
        !self.merge_buffer.is_empty()
    }

    fn sort_buffer(&mut self) {
        let preferred = self.preferred.clone();
        self.merge_buffer
            .sort_by(|a, b| compare_items(preferred.as_ref(), a, b));
    }

    /// Open the lookup that follows `current` in the cascade for this
    /// archive, or `None` when the archive is done. A failed lookup counts
    /// as empty at its strength so one bad archive cannot block the rest.
    fn next_result(&self, slob: &Slob, current: Option<Strength>) -> Option<FindResult> {
        let strength = match current {
            None => Strength::Quaternary,
            Some(s) if Some(s) == self.up_to_strength => return None,
            Some(s) => s.next_weaker()?,
        };
        let iter = match slob.find(&self.key, strength) {
            Ok(iter) => iter,
            Err(e) => {
                warn!("lookup in {} failed: {e}", slob.id());
                FindIter::empty(slob.clone(), strength)
            }
        };
        Some(FindResult { iter, strength })
    }

    /// Refill the merge-buffer slot of archive `idx`: pull from its current
    /// iterator past any already-seen blobs, moving down the cascade when
    /// an iterator drains.
    fn fill_slot(&mut self, idx: usize) {
        loop {
            let Some(strength) = self.archives[idx].current.as_ref().map(|r| r.strength) else {
                return;
            };
            loop {
                let next = self.archives[idx]
                    .current
                    .as_mut()
                    .and_then(|r| r.iter.next());
                let Some(blob) = next else {
                    break;
                };
                let dedup_key = blob.dedup_key();
                if !self.seen.insert(dedup_key.clone()) {
                    debug!("ignoring duplicate {dedup_key}");
                    continue;
                }
                self.merge_buffer.push(MergeBufferItem { blob, strength });
                return;
            }
            let slob = self.archives[idx].slob.clone();
            self.archives[idx].current = self.next_result(&slob, Some(strength));
        }
    }
}

impl Iterator for MatchIterator {
    type Item = Blob;

    fn next(&mut self) -> Option<Blob> {
        self.sort_buffer();
        if self.merge_buffer.is_empty() {
            return None;
        }
        let item = self.merge_buffer.remove(0);
        if let Some(idx) = self
            .archives
            .iter()
            .position(|state| state.slob == *item.blob.owner())
        {
            self.fill_slot(idx);
        }
        Some(item.blob)
    }
}

/// Total order over pending matches.
///
/// Exact-strength matches from different archives rank by preference first:
/// the preferred archive, then archives sharing its URI. Items at the same
/// strength rank by key collation at that strength; otherwise exact
/// strengths beat prefix strengths and higher levels beat lower ones.
fn compare_items(
    preferred: Option<&Slob>,
    a: &MergeBufferItem,
    b: &MergeBufferItem,
) -> Ordering {
    let (sa, sb) = (a.strength, b.strength);
    let (owner_a, owner_b) = (a.blob.owner(), b.blob.owner());

    if !sa.is_prefix() && !sb.is_prefix() && owner_a != owner_b {
        if let Some(preferred) = preferred {
            if owner_a == preferred {
                return Ordering::Less;
            }
            if owner_b == preferred {
                return Ordering::Greater;
            }
            let uri_a = owner_a.uri();
            let uri_b = owner_b.uri();
            if uri_a != uri_b {
                let preferred_uri = preferred.uri();
                if uri_a == preferred_uri {
                    return Ordering::Less;
                }
                if uri_b == preferred_uri {
                    return Ordering::Greater;
                }
            }
        }
    }

    if sa == sb {
        return sa
            .compare(a.blob.key(), b.blob.key())
            .unwrap_or(Ordering::Equal);
    }
    // Exact strengths rank above prefix strengths, stronger above weaker
    match (sa.is_prefix(), sb.is_prefix()) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        _ => sb.level().cmp(&sa.level()),
    }
}

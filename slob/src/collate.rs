//! Collation strengths and key comparison.
//!
//! Lookup strings are compared through ICU sort keys (root locale, shifted
//! alternate handling), one collator per strength level. Sort keys are
//! cached in process-wide per-level LRU maps so repeated lookups against
//! many archives share the work.

use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};

use lru::LruCache;
use parking_lot::Mutex;
use rust_icu_sys as sys;
use rust_icu_ucol::UCollator;
use rust_icu_ustring::UChar;

use crate::{Error, Result};

const SORT_KEY_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

/// Collation strength of a lookup.
///
/// Stronger strengths distinguish more: `Identical` separates any two
/// distinct strings, `Primary` only base letters. Each level except
/// `Identical` also has a prefix variant that additionally matches every
/// key the lookup string is a prefix of at that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strength {
    Identical,
    Quaternary,
    Tertiary,
    Secondary,
    Primary,
    QuaternaryPrefix,
    TertiaryPrefix,
    SecondaryPrefix,
    PrimaryPrefix,
}

impl Strength {
    /// Whether this is a prefix variant.
    pub fn is_prefix(self) -> bool {
        matches!(
            self,
            Strength::QuaternaryPrefix
                | Strength::TertiaryPrefix
                | Strength::SecondaryPrefix
                | Strength::PrimaryPrefix
        )
    }

    /// Numeric collation level; higher distinguishes more.
    pub fn level(self) -> u8 {
        match self {
            Strength::Identical => 15,
            Strength::Quaternary | Strength::QuaternaryPrefix => 3,
            Strength::Tertiary | Strength::TertiaryPrefix => 2,
            Strength::Secondary | Strength::SecondaryPrefix => 1,
            Strength::Primary | Strength::PrimaryPrefix => 0,
        }
    }

    /// The next-weaker strength in the lookup cascade: exact levels from
    /// quaternary down, then the prefix levels.
    pub(crate) fn next_weaker(self) -> Option<Strength> {
        match self {
            Strength::Identical => Some(Strength::Quaternary),
            Strength::Quaternary => Some(Strength::Tertiary),
            Strength::Tertiary => Some(Strength::Secondary),
            Strength::Secondary => Some(Strength::Primary),
            Strength::Primary => Some(Strength::QuaternaryPrefix),
            Strength::QuaternaryPrefix => Some(Strength::TertiaryPrefix),
            Strength::TertiaryPrefix => Some(Strength::SecondaryPrefix),
            Strength::SecondaryPrefix => Some(Strength::PrimaryPrefix),
            Strength::PrimaryPrefix => None,
        }
    }

    fn level_slot(self) -> usize {
        match self.level() {
            0 => 0,
            1 => 1,
            2 => 2,
            3 => 3,
            _ => 4,
        }
    }

    /// The sort key of `s` at this strength level, from the shared cache.
    pub(crate) fn sort_key(self, s: &str) -> Result<Arc<Vec<u8>>> {
        let level = &levels()?[self.level_slot()];
        if let Some(key) = level.cache.lock().get(s) {
            return Ok(key.clone());
        }
        let uchar = UChar::try_from(s).map_err(|e| Error::Collation(e.to_string()))?;
        let key = Arc::new(level.collator.lock().0.get_sort_key(&uchar));
        level.cache.lock().put(s.to_string(), key.clone());
        Ok(key)
    }

    /// Compare two lookup strings at this strength level.
    pub fn compare(self, a: &str, b: &str) -> Result<Ordering> {
        let ka = self.sort_key(a)?;
        let kb = self.sort_key(b)?;
        Ok(ka.as_slice().cmp(kb.as_slice()))
    }

    /// Comparison used to decide whether a scanned key still matches
    /// `target`: exact for plain strengths, sort-key prefix match for
    /// prefix strengths.
    pub(crate) fn stop_compare(self, key: &str, target: &str) -> Result<Ordering> {
        if self.is_prefix() {
            let kk = self.sort_key(key)?;
            let kt = self.sort_key(target)?;
            Ok(prefix_compare(&kk, &kt))
        } else {
            self.compare(key, target)
        }
    }
}

/// Byte-wise sort key comparison treating `target` as a prefix pattern.
///
/// Sort keys are NUL-terminated, so reaching the target's terminator (or its
/// end) means every preceding byte matched and `key` starts with `target`.
fn prefix_compare(key: &[u8], target: &[u8]) -> Ordering {
    let mut i = 0;
    loop {
        let t = target.get(i).copied().unwrap_or(0);
        if t == 0 {
            return Ordering::Equal;
        }
        let k = key.get(i).copied().unwrap_or(0);
        if k == 0 {
            return Ordering::Less;
        }
        match k.cmp(&t) {
            Ordering::Equal => i += 1,
            other => return other,
        }
    }
}

// An ICU collator may be used from any thread as long as access to it is
// serialized, which the surrounding mutex guarantees.
struct SendCollator(UCollator);
unsafe impl Send for SendCollator {}

struct LevelCollator {
    collator: Mutex<SendCollator>,
    cache: Mutex<LruCache<String, Arc<Vec<u8>>>>,
}

fn make_level(strength: sys::UCollationStrength) -> Result<LevelCollator> {
    let mut collator =
        UCollator::try_from("").map_err(|e| Error::Collation(e.to_string()))?;
    collator.set_strength(strength);
    collator
        .set_attribute(
            sys::UColAttribute::UCOL_ALTERNATE_HANDLING,
            sys::UColAttributeValue::UCOL_SHIFTED,
        )
        .map_err(|e| Error::Collation(e.to_string()))?;
    Ok(LevelCollator {
        collator: Mutex::new(SendCollator(collator)),
        cache: Mutex::new(LruCache::new(SORT_KEY_CACHE_CAPACITY)),
    })
}

fn levels() -> Result<&'static [LevelCollator; 5]> {
    static LEVELS: OnceLock<std::result::Result<[LevelCollator; 5], String>> = OnceLock::new();
    LEVELS
        .get_or_init(|| {
            let mut out = Vec::with_capacity(5);
            for strength in [
                sys::UCollationStrength::UCOL_PRIMARY,
                sys::UCollationStrength::UCOL_SECONDARY,
                sys::UCollationStrength::UCOL_TERTIARY,
                sys::UCollationStrength::UCOL_QUATERNARY,
                sys::UCollationStrength::UCOL_IDENTICAL,
            ] {
                out.push(make_level(strength).map_err(|e| e.to_string())?);
            }
            out.try_into()
                .map_err(|_| "collator level table construction failed".to_string())
        })
        .as_ref()
        .map_err(|e| Error::Collation(e.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_walks_all_lookup_strengths() {
        let mut chain = Vec::new();
        let mut current = Some(Strength::Identical);
        while let Some(s) = current {
            chain.push(s);
            current = s.next_weaker();
        }
        assert_eq!(chain.len(), 9);
        assert_eq!(chain.last(), Some(&Strength::PrimaryPrefix));
        // Exact levels all come before any prefix level
        let first_prefix = chain.iter().position(|s| s.is_prefix()).unwrap();
        assert!(chain[..first_prefix].iter().all(|s| !s.is_prefix()));
        assert!(chain[first_prefix..].iter().all(|s| s.is_prefix()));
    }

    #[test]
    fn test_levels() {
        assert_eq!(Strength::Identical.level(), 15);
        assert_eq!(Strength::Quaternary.level(), 3);
        assert_eq!(Strength::QuaternaryPrefix.level(), 3);
        assert_eq!(Strength::Primary.level(), 0);
        assert!(!Strength::Quaternary.is_prefix());
        assert!(Strength::QuaternaryPrefix.is_prefix());
    }

    #[test]
    fn test_prefix_compare_bytes() {
        assert_eq!(prefix_compare(&[3, 2, 1, 0], &[3, 2, 0]), Ordering::Equal);
        assert_eq!(prefix_compare(&[3, 2, 0], &[3, 2, 1, 0]), Ordering::Less);
        assert_eq!(prefix_compare(&[3, 1, 0], &[3, 2, 0]), Ordering::Less);
        assert_eq!(prefix_compare(&[3, 3, 0], &[3, 2, 0]), Ordering::Greater);
        // Missing terminators read as NUL
        assert_eq!(prefix_compare(&[3, 2, 1], &[3, 2]), Ordering::Equal);
        assert_eq!(prefix_compare(&[], &[]), Ordering::Equal);
    }

    #[test]
    fn test_case_is_a_tertiary_difference() {
        assert_eq!(
            Strength::Secondary.compare("Earth", "earth").unwrap(),
            Ordering::Equal
        );
        assert_ne!(
            Strength::Tertiary.compare("Earth", "earth").unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_diacritics_are_a_secondary_difference() {
        assert_eq!(
            Strength::Primary.compare("resume", "résumé").unwrap(),
            Ordering::Equal
        );
        assert_ne!(
            Strength::Secondary.compare("resume", "résumé").unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_punctuation_is_shifted() {
        // Shifted alternate handling pushes punctuation to the quaternary level
        assert_eq!(
            Strength::Tertiary.compare("foo-bar", "foobar").unwrap(),
            Ordering::Equal
        );
        assert_ne!(
            Strength::Quaternary.compare("foo-bar", "foobar").unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_prefix_match() {
        assert_eq!(
            Strength::TertiaryPrefix.stop_compare("earth", "ear").unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            Strength::TertiaryPrefix.stop_compare("dog", "ear").unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Strength::TertiaryPrefix.stop_compare("zebra", "ear").unwrap(),
            Ordering::Greater
        );
        // The scanned key being shorter than the target is not a match
        assert_eq!(
            Strength::TertiaryPrefix.stop_compare("ear", "earth").unwrap(),
            Ordering::Less
        );
        // Non-prefix strengths stop on exact comparison
        assert_ne!(
            Strength::Tertiary.stop_compare("earth", "ear").unwrap(),
            Ordering::Equal
        );
    }
}

/// A cache cell: a present value or memoized absence.
///
/// Negative caching is first-class. A completed load that found nothing is
/// stored exactly like a present value, so a known-absent key is not asked
/// from the source again until the entry is evicted. `Absent` is distinct
/// from "key unknown to the cache", which probes express as
/// `Option::<CacheEntry<V>>::None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry<V> {
    /// The source produced a value for this key.
    Present(V),
    /// The source reported that this key has no value.
    Absent,
}

impl<V> CacheEntry<V> {
    /// Whether this entry carries a value.
    pub fn is_present(&self) -> bool {
        matches!(self, CacheEntry::Present(_))
    }

    /// Whether this entry memoizes absence.
    pub fn is_absent(&self) -> bool {
        matches!(self, CacheEntry::Absent)
    }

    /// Borrows the value, if present.
    pub fn value(&self) -> Option<&V> {
        match self {
            CacheEntry::Present(value) => Some(value),
            CacheEntry::Absent => None,
        }
    }

    /// Converts into `Some(value)`, or `None` for a memoized absence.
    pub fn into_option(self) -> Option<V> {
        match self {
            CacheEntry::Present(value) => Some(value),
            CacheEntry::Absent => None,
        }
    }
}

impl<V> From<Option<V>> for CacheEntry<V> {
    fn from(value: Option<V>) -> Self {
        match value {
            Some(value) => CacheEntry::Present(value),
            None => CacheEntry::Absent,
        }
    }
}

impl<V> From<CacheEntry<V>> for Option<V> {
    fn from(entry: CacheEntry<V>) -> Self {
        entry.into_option()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absence_is_not_a_value() {
        let entry = CacheEntry::<u32>::Absent;
        assert!(entry.is_absent());
        assert!(!entry.is_present());
        assert_eq!(entry.value(), None);
        assert_eq!(entry.into_option(), None);
    }

    #[test]
    fn option_round_trip() {
        assert_eq!(CacheEntry::from(Some(3)), CacheEntry::Present(3));
        assert_eq!(CacheEntry::<u32>::from(None), CacheEntry::Absent);
        assert_eq!(Option::from(CacheEntry::Present("x")), Some("x"));
    }
}

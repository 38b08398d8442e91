use crate::core::fingerprint::Fingerprint;
use std::collections::HashSet;

/// Outcome of offering one image to the [`Deduplicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First image seen with this fingerprint
    Unique,
    /// No fingerprint could be computed; always passed through
    Unfingerprinted,
    /// An earlier image had the same fingerprint
    Duplicate,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::Duplicate)
    }
}

/// Exact-fingerprint filter. The first image offered with a given
/// fingerprint wins, so callers must offer images in a stable order.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<Fingerprint>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, fingerprint: Option<Fingerprint>) -> Admission {
        match fingerprint {
            None => Admission::Unfingerprinted,
            Some(fingerprint) => {
                if self.seen.insert(fingerprint) {
                    Admission::Unique
                } else {
                    Admission::Duplicate
                }
            }
        }
    }

    /// Number of distinct fingerprints seen so far.
    pub fn unique_count(&self) -> usize {
        self.seen.len()
    }
}

//! 32-byte identifiers and the id-keyed containers used by consensus.
//!
//! Every vertex and transaction in the protocol is named by a fixed-width
//! [`Id`]. Ids order lexicographically and hash as the raw 32-byte array, so
//! they key `HashMap`/`HashSet` collections with no indirection. The
//! submodules provide the counting containers polls are expressed in
//! ([`Bag`], [`UniqueBag`]) and the human-name registry ([`Aliaser`]).

use std::fmt;

use serde::{Deserialize, Serialize};

mod aliases;
mod bag;
mod unique_bag;

pub use aliases::{AliasError, Aliaser};
pub use bag::Bag;
pub use unique_bag::{BitSet, UniqueBag};

/// A fixed-width 32-byte identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id([u8; Id::LEN]);

impl Id {
    /// Byte width of every identifier.
    pub const LEN: usize = 32;

    /// The all-zero identifier.
    pub const EMPTY: Id = Id([0u8; Id::LEN]);

    /// Wrap raw bytes as an identifier.
    pub const fn new(bytes: [u8; Id::LEN]) -> Self {
        Id(bytes)
    }

    /// Derive an identifier from an opaque byte representation.
    ///
    /// Domain-separated so ids derived here can never collide with hashes
    /// computed for other purposes over the same bytes.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("firn.id");
        hasher.update(bytes);
        Id(*hasher.finalize().as_bytes())
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; Id::LEN] {
        &self.0
    }
}

impl From<[u8; Id::LEN]> for Id {
    fn from(bytes: [u8; Id::LEN]) -> Self {
        Id(bytes)
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    /// Truncated hex form for logs: the first 8 bytes identify a vertex
    /// unambiguously in practice and keep trace lines readable.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}…)", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn id_ordering_is_lexicographic() {
        let a = Id::new([0u8; 32]);
        let mut high = [0u8; 32];
        high[0] = 1;
        let b = Id::new(high);
        assert!(a < b);
        assert_eq!(a, Id::EMPTY);
    }

    #[test]
    fn id_digest_deterministic_and_distinct() {
        let a = Id::digest(b"vertex bytes");
        let b = Id::digest(b"vertex bytes");
        let c = Id::digest(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn id_keys_hash_sets() {
        let mut set = HashSet::new();
        assert!(set.insert(Id::digest(b"a")));
        assert!(!set.insert(Id::digest(b"a")));
        assert!(set.insert(Id::digest(b"b")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn id_display_is_full_hex() {
        let id = Id::new([0xab; 32]);
        let s = id.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("abab"));
    }
}

//! Composite key for combining two extractors.

use crate::key::Key;

/// Separator between the parts of a composite key.
///
/// Neither an IP address nor a key prefix contains it, so splitting a
/// composite key at its first separator always recovers the first part.
pub const SEPARATOR: &str = "|";

/// Combine two key extractors into a composite key.
///
/// The resulting key is formatted as `"{key1}|{key2}"` and is only produced
/// when both parts can be extracted.
///
/// # Example
///
/// ```ignore
/// use strategy_ratelimit::key::{CompositeKey, IdentifierKey, IpKey};
///
/// let key = CompositeKey::new(IpKey::new(), IdentifierKey::principal());
/// // Results in keys like "ip:192.168.1.1|key:alice"
/// ```
#[derive(Debug, Clone)]
pub struct CompositeKey<K1, K2> {
    first: K1,
    second: K2,
}

impl<K1, K2> CompositeKey<K1, K2> {
    /// Create a new composite key.
    pub fn new(first: K1, second: K2) -> Self {
        Self { first, second }
    }

    /// First extractor.
    pub fn first(&self) -> &K1 {
        &self.first
    }

    /// Second extractor.
    pub fn second(&self) -> &K2 {
        &self.second
    }
}

impl<R, K1, K2> Key<R> for CompositeKey<K1, K2>
where
    K1: Key<R>,
    K2: Key<R>,
{
    fn extract(&self, request: &R) -> Option<String> {
        let k1 = self.first.extract(request)?;
        let k2 = self.second.extract(request)?;
        Some(format!("{}{}{}", k1, SEPARATOR, k2))
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

//! Key extraction for rate limiting.
//!
//! The limiting key decides which requests share a quota. A rule picks one
//! of three modes:
//!
//! | Mode | Key | Example |
//! |------|-----|---------|
//! | `IP` | caller address, honoring the trusted proxy depth | `ip:203.0.113.7` |
//! | `KEY` | principal or a configured header | `key:alice` |
//! | `COMBINATION` | both, joined with `|` | `ip:203.0.113.7|key:alice` |
//!
//! # Example
//!
//! ```ignore
//! use strategy_ratelimit::key::{KeyDerivation, LimitMode, RequestInfo};
//!
//! let derivation = KeyDerivation::new(LimitMode::Combination);
//! let request = RequestInfo::new()
//!     .with_peer("203.0.113.7".parse()?)
//!     .with_principal("alice");
//! assert_eq!(derivation.derive(&request)?, "ip:203.0.113.7|key:alice");
//! ```

mod composite;
mod extractors;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use composite::{CompositeKey, SEPARATOR};
pub use extractors::*;

use crate::error::{RateLimitError, Result};

/// Trait for extracting rate limiting keys from requests.
///
/// Returns `None` when the request lacks the data the extractor needs.
///
/// # Type Parameters
///
/// - `R`: The request type.
pub trait Key<R>: Send + Sync + 'static {
    /// Extract a rate limiting key from the request.
    fn extract(&self, request: &R) -> Option<String>;

    /// What this extractor reads, for diagnostics.
    fn name(&self) -> &'static str;
}

/// How a rule groups requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LimitMode {
    /// By caller network address.
    Ip,
    /// By explicit caller identifier.
    Key,
    /// By address and identifier together.
    Combination,
}

impl fmt::Display for LimitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ip => "IP",
            Self::Key => "KEY",
            Self::Combination => "COMBINATION",
        })
    }
}

/// Derives the limiting key for one rule.
#[derive(Debug, Clone)]
pub struct KeyDerivation {
    mode: LimitMode,
    combined: CompositeKey<IpKey, IdentifierKey>,
}

impl KeyDerivation {
    /// Peer address, principal identifier.
    pub fn new(mode: LimitMode) -> Self {
        Self::with_extractors(mode, IpKey::new(), IdentifierKey::principal())
    }

    /// Use the given address and identifier extractors.
    pub fn with_extractors(mode: LimitMode, ip: IpKey, identifier: IdentifierKey) -> Self {
        Self {
            mode,
            combined: CompositeKey::new(ip, identifier),
        }
    }

    /// Configured mode.
    pub fn mode(&self) -> LimitMode {
        self.mode
    }

    /// Derive the limiting key, or fail with `MissingKeyMaterial`.
    pub fn derive<R: RequestContext>(&self, request: &R) -> Result<String> {
        let ip = self.combined.first();
        let identifier = self.combined.second();

        match self.mode {
            LimitMode::Ip => ip.extract(request).ok_or_else(|| self.missing(ip, request)),
            LimitMode::Key => identifier
                .extract(request)
                .ok_or_else(|| self.missing(identifier, request)),
            LimitMode::Combination => self.combined.extract(request).ok_or_else(|| {
                if ip.extract(request).is_none() {
                    self.missing(ip, request)
                } else {
                    self.missing(identifier, request)
                }
            }),
        }
    }

    fn missing<R, K: Key<R>>(&self, extractor: &K, _request: &R) -> RateLimitError {
        RateLimitError::MissingKeyMaterial {
            mode: self.mode,
            missing: extractor.name(),
        }
    }
}

//! Request accessors and the per-mode key extractors.
//!
//! Extractors are generic over the request type; a request-handling layer
//! exposes its request through the accessor traits below.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::key::Key;

/// Header carrying the proxy chain.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

// ============================================================================
// Request Info Traits
// ============================================================================

/// Trait for requests that have an IP address.
pub trait HasIpAddr {
    /// Address of the directly connected peer.
    fn client_ip(&self) -> Option<IpAddr>;
}

/// Trait for requests that have headers.
pub trait HasHeaders {
    /// Get a header value by lower-case name.
    fn header(&self, name: &str) -> Option<&str>;
}

/// Trait for requests that may carry an authenticated principal.
pub trait HasIdentifier {
    /// Identifier of the authenticated caller, if any.
    fn identifier(&self) -> Option<&str> {
        None
    }
}

/// Everything the dispatcher reads from a request.
pub trait RequestContext: HasIpAddr + HasHeaders + HasIdentifier {}

impl<T: HasIpAddr + HasHeaders + HasIdentifier> RequestContext for T {}

/// Owned request context, for callers that do not have a request type of
/// their own to implement the accessor traits on.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    peer: Option<IpAddr>,
    headers: HashMap<String, String>,
    principal: Option<String>,
}

impl RequestInfo {
    /// Create an empty request context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the peer address.
    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Add a header. Names are matched case-insensitively.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the authenticated principal.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }
}

impl HasIpAddr for RequestInfo {
    fn client_ip(&self) -> Option<IpAddr> {
        self.peer
    }
}

impl HasHeaders for RequestInfo {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

impl HasIdentifier for RequestInfo {
    fn identifier(&self) -> Option<&str> {
        self.principal.as_deref()
    }
}

// ============================================================================
// IP-based Extractor
// ============================================================================

/// Extract key from the caller's network address.
///
/// With a trusted proxy depth of `n`, the chain is the `X-Forwarded-For` hops
/// followed by the peer address, and the caller is the hop `n` positions from
/// the right. A depth beyond the chain resolves to the leftmost hop. A
/// selected hop that is not an IP address yields no key.
#[derive(Debug, Clone, Default)]
pub struct IpKey {
    trusted_proxy_depth: usize,
}

impl IpKey {
    /// Use the peer address directly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `depth` proxies in front of this service.
    pub fn with_trusted_proxy_depth(depth: usize) -> Self {
        Self {
            trusted_proxy_depth: depth,
        }
    }

    /// Configured proxy depth.
    pub fn trusted_proxy_depth(&self) -> usize {
        self.trusted_proxy_depth
    }

    /// Resolve the caller's address.
    pub fn resolve<R: HasIpAddr + HasHeaders>(&self, request: &R) -> Option<IpAddr> {
        if self.trusted_proxy_depth == 0 {
            return request.client_ip();
        }

        let hops: Vec<&str> = request
            .header(FORWARDED_FOR)
            .map(|value| value.split(',').map(str::trim).filter(|h| !h.is_empty()).collect())
            .unwrap_or_default();

        let from_right = self.trusted_proxy_depth.min(hops.len());
        if from_right == 0 {
            return request.client_ip();
        }
        hops[hops.len() - from_right].parse().ok()
    }
}

impl<R> Key<R> for IpKey
where
    R: HasIpAddr + HasHeaders,
{
    fn extract(&self, request: &R) -> Option<String> {
        self.resolve(request).map(|ip| format!("ip:{}", ip))
    }

    fn name(&self) -> &'static str {
        "client address"
    }
}

// ============================================================================
// Identifier Extractor
// ============================================================================

/// Where the identifier for `KEY` mode comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentifierSource {
    /// The authenticated principal.
    #[default]
    Principal,
    /// A request header, e.g. `x-api-key`.
    Header(String),
}

/// Extract key from an explicit caller identifier.
///
/// Empty identifiers count as absent.
#[derive(Debug, Clone, Default)]
pub struct IdentifierKey {
    source: IdentifierSource,
}

impl IdentifierKey {
    /// Identify callers by their authenticated principal.
    pub fn principal() -> Self {
        Self::default()
    }

    /// Identify callers by a header value.
    pub fn header(name: impl Into<String>) -> Self {
        Self {
            source: IdentifierSource::Header(name.into().to_ascii_lowercase()),
        }
    }

    /// Extract from X-API-Key header.
    pub fn api_key() -> Self {
        Self::header("x-api-key")
    }

    /// Build from a configured source.
    pub fn from_source(source: IdentifierSource) -> Self {
        match source {
            IdentifierSource::Principal => Self::principal(),
            IdentifierSource::Header(name) => Self::header(name),
        }
    }
}

impl<R> Key<R> for IdentifierKey
where
    R: HasHeaders + HasIdentifier,
{
    fn extract(&self, request: &R) -> Option<String> {
        let value = match &self.source {
            IdentifierSource::Principal => request.identifier(),
            IdentifierSource::Header(name) => request.header(name),
        };
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| format!("key:{}", v))
    }

    fn name(&self) -> &'static str {
        "identifier"
    }
}

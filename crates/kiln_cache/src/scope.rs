//! Identifier prefixes for nested (child) compilations.
//!
//! A child compilation caches its modules under the names its memory cache
//! has in each ancestor's cache, concatenated from the root down. A child
//! that shares its parent's cache adds nothing to the prefix.

use std::fmt;

/// How a child compilation's memory cache relates to its parent's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeCache {
    /// The child uses the parent's cache object.
    SharedWithParent,
    /// The child's cache is stored in the parent's cache under this name.
    Keyed(String),
    /// The child has no memory cache.
    Missing,
    /// The child has a cache, but the parent does not know its name.
    Unknown,
}

/// One child compilation in a chain leading to the root compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationScope {
    /// Compiler name, used in diagnostics.
    pub name: String,
    /// Relation of this compilation's cache to its parent's.
    pub cache: ScopeCache,
}

impl CompilationScope {
    /// A child compilation with the given cache relation.
    pub fn new(name: impl Into<String>, cache: ScopeCache) -> Self {
        Self {
            name: name.into(),
            cache,
        }
    }
}

/// Why a child compilation cannot be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeDisabled {
    /// The named compiler has no memory cache.
    NoMemoryCache(String),
    /// The named compiler's cache name is unknown.
    UnknownCacheName(String),
}

impl fmt::Display for ScopeDisabled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeDisabled::NoMemoryCache(name) => write!(
                f,
                "child compiler {name} has no memory cache; caching is disabled for it until one is enabled"
            ),
            ScopeDisabled::UnknownCacheName(name) => write!(
                f,
                "child compiler {name} has a memory cache but its cache name is unknown; caching is disabled for it"
            ),
        }
    }
}

/// Computes the identifier prefix of a compilation.
///
/// `chain` lists the compilation and its ancestors from the innermost child
/// outward, excluding the root compilation. The root's prefix is empty.
pub fn cache_prefix(chain: &[CompilationScope]) -> Result<String, ScopeDisabled> {
    let mut prefix = String::new();
    for scope in chain {
        match &scope.cache {
            ScopeCache::SharedWithParent => {}
            ScopeCache::Keyed(key) => prefix.insert_str(0, key),
            ScopeCache::Missing => return Err(ScopeDisabled::NoMemoryCache(scope.name.clone())),
            ScopeCache::Unknown => {
                return Err(ScopeDisabled::UnknownCacheName(scope.name.clone()))
            }
        }
    }
    Ok(prefix)
}

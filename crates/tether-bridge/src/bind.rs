//! Method bind resolution and caching
//!
//! A native method is identified by `(class, method, hash)`, where the hash
//! encodes the signature the caller was generated against. Resolution asks
//! the native side at most once per triple for the whole process; the answer,
//! success or failure, is cached.
//!
//! Each wrapper declares its bind as a `static MethodBind`, which memoizes the
//! cache answer so the hot path is a single atomic load.

use crate::config::CompatPolicy;
use crate::error::{fatal, BridgeError, Result};
use crate::interface::{config, interface, BindLookup, BindStatus, MethodPtr};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, OnceLock, PoisonError, RwLock};
use tether_core::{intern, Identifier};

/// Cache key for a resolved method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindKey {
    pub class: Identifier,
    pub method: Identifier,
    pub hash: i64,
}

impl BindKey {
    pub fn new(class: impl Into<Identifier>, method: impl Into<Identifier>, hash: i64) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            hash,
        }
    }
}

/// What to do with a lookup answer under a given policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    /// Query again with the native side's current hash
    Retry(i64),
    Reject,
}

/// Apply a compatibility policy to a lookup answer
pub fn decide(lookup: BindLookup, policy: CompatPolicy) -> Decision {
    match (lookup.status, policy) {
        (BindStatus::Exact, _) => Decision::Accept,
        (BindStatus::Compatibility, CompatPolicy::Strict) => Decision::Reject,
        (BindStatus::Compatibility, _) => Decision::Accept,
        (BindStatus::HashMismatch, CompatPolicy::Lenient) => Decision::Retry(lookup.current_hash),
        _ => Decision::Reject,
    }
}

type Outcome = std::result::Result<MethodPtr, BindStatus>;

/// Record of every resolution attempted so far
///
/// The process-wide cache follows the installed config's policy. Caches with
/// a fixed policy can be built with [`BindCache::with_policy`].
pub struct BindCache {
    entries: RwLock<HashMap<BindKey, Outcome>>,
    native_queries: AtomicUsize,
    // None: read the installed config at query time.
    policy: Option<CompatPolicy>,
}

static CACHE: LazyLock<BindCache> = LazyLock::new(|| BindCache::new(None));

impl BindCache {
    fn new(policy: Option<CompatPolicy>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            native_queries: AtomicUsize::new(0),
            policy,
        }
    }

    /// An empty cache that resolves under `policy` regardless of config
    pub fn with_policy(policy: CompatPolicy) -> Self {
        Self::new(Some(policy))
    }

    /// The policy this cache resolves under
    pub fn policy(&self) -> CompatPolicy {
        self.policy.unwrap_or_else(|| config().compat_policy)
    }

    pub fn global() -> &'static BindCache {
        &CACHE
    }

    /// Resolve a triple, asking the native side only on the first request
    pub fn lookup(&self, key: BindKey) -> Result<MethodPtr> {
        self.outcome(key).map_err(|status| BridgeError::BindResolution {
            class: key.class,
            method: key.method,
            hash: key.hash,
            status,
        })
    }

    fn outcome(&self, key: BindKey) -> Outcome {
        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return *hit;
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = entries.get(&key) {
            return *hit;
        }
        let outcome = self.query_native(key);
        entries.insert(key, outcome);
        outcome
    }

    fn query_native(&self, key: BindKey) -> Outcome {
        let policy = self.policy();
        let first = self.ask(key.class, key.method, key.hash);
        match decide(first.1, policy) {
            Decision::Accept => {
                if first.1.status == BindStatus::Compatibility {
                    tracing::debug!(
                        target: "tether::bind",
                        class = %key.class,
                        method = %key.method,
                        hash = key.hash,
                        "resolved through compatibility shim"
                    );
                }
                accept(key, first)
            }
            Decision::Retry(current) => {
                tracing::warn!(
                    target: "tether::bind",
                    class = %key.class,
                    method = %key.method,
                    requested = key.hash,
                    current,
                    "signature hash changed, binding against current signature"
                );
                let retry = self.ask(key.class, key.method, current);
                match retry.1.status {
                    BindStatus::Exact => accept(key, retry),
                    status => reject(key, status),
                }
            }
            Decision::Reject => reject(key, first.1.status),
        }
    }

    fn ask(&self, class: Identifier, method: Identifier, hash: i64) -> (Option<MethodPtr>, BindLookup) {
        self.native_queries.fetch_add(1, Ordering::Relaxed);
        let class_raw = class.raw();
        let method_raw = method.raw();
        let mut lookup = BindLookup::default();
        // SAFETY: names point to interned storage and `lookup` outlives the call.
        let ptr = unsafe { (interface().get_method_bind)(&class_raw, &method_raw, hash, &mut lookup) };
        (MethodPtr::new(ptr), lookup)
    }

    /// Number of cached triples, successful or not
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &BindKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Total queries sent to the native side by this cache
    pub fn native_queries(&self) -> usize {
        self.native_queries.load(Ordering::Relaxed)
    }
}

fn accept(key: BindKey, (ptr, lookup): (Option<MethodPtr>, BindLookup)) -> Outcome {
    match ptr {
        Some(ptr) => {
            tracing::trace!(target: "tether::bind", class = %key.class, method = %key.method, "method bound");
            Ok(ptr)
        }
        // A positive status with a null pointer counts as missing.
        None => {
            let status = match lookup.status {
                BindStatus::Exact | BindStatus::Compatibility => BindStatus::MissingMethod,
                other => other,
            };
            reject(key, status)
        }
    }
}

fn reject(key: BindKey, status: BindStatus) -> Outcome {
    tracing::warn!(
        target: "tether::bind",
        class = %key.class,
        method = %key.method,
        hash = key.hash,
        %status,
        "method bind unresolved"
    );
    Err(status)
}

/// A lazily resolved handle to one native method
///
/// Meant to live in a `static` inside a generated wrapper:
///
/// ```ignore
/// static BIND: MethodBind = MethodBind::new("PhysicsServer", "body_create", 0x5f0d);
/// ```
pub struct MethodBind {
    class: &'static str,
    method: &'static str,
    hash: i64,
    resolved: OnceLock<Outcome>,
}

impl MethodBind {
    pub const fn new(class: &'static str, method: &'static str, hash: i64) -> Self {
        Self {
            class,
            method,
            hash,
            resolved: OnceLock::new(),
        }
    }

    pub fn class(&self) -> Identifier {
        intern(self.class)
    }

    pub fn method(&self) -> Identifier {
        intern(self.method)
    }

    pub fn hash(&self) -> i64 {
        self.hash
    }

    pub fn key(&self) -> BindKey {
        BindKey::new(self.class, self.method, self.hash)
    }

    /// Resolve, reporting failure as an error
    pub fn resolve(&self) -> Result<MethodPtr> {
        let outcome = *self
            .resolved
            .get_or_init(|| BindCache::global().outcome(self.key()));
        outcome.map_err(|status| BridgeError::BindResolution {
            class: self.class(),
            method: self.method(),
            hash: self.hash,
            status,
        })
    }

    /// Resolve, failing fast at the first call site if the method is unusable
    #[track_caller]
    pub fn get(&self) -> MethodPtr {
        match self.resolve() {
            Ok(ptr) => ptr,
            Err(err) => fatal(err),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.resolved.get(), Some(Ok(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(status: BindStatus, current_hash: i64) -> BindLookup {
        BindLookup {
            status,
            current_hash,
        }
    }

    #[test]
    fn test_exact_always_accepted() {
        for policy in [CompatPolicy::Strict, CompatPolicy::Compatible, CompatPolicy::Lenient] {
            assert_eq!(decide(lookup(BindStatus::Exact, 0), policy), Decision::Accept);
        }
    }

    #[test]
    fn test_compat_shim_depends_on_policy() {
        let shim = lookup(BindStatus::Compatibility, 0);
        assert_eq!(decide(shim, CompatPolicy::Strict), Decision::Reject);
        assert_eq!(decide(shim, CompatPolicy::Compatible), Decision::Accept);
        assert_eq!(decide(shim, CompatPolicy::Lenient), Decision::Accept);
    }

    #[test]
    fn test_hash_mismatch_retries_only_when_lenient() {
        let mismatch = lookup(BindStatus::HashMismatch, 4242);
        assert_eq!(decide(mismatch, CompatPolicy::Strict), Decision::Reject);
        assert_eq!(decide(mismatch, CompatPolicy::Compatible), Decision::Reject);
        assert_eq!(decide(mismatch, CompatPolicy::Lenient), Decision::Retry(4242));
    }

    #[test]
    fn test_missing_never_accepted() {
        for status in [BindStatus::MissingMethod, BindStatus::MissingClass] {
            assert_eq!(decide(lookup(status, 0), CompatPolicy::Lenient), Decision::Reject);
        }
    }

    #[test]
    fn test_fixed_policy_ignores_config() {
        let cache = BindCache::with_policy(CompatPolicy::Lenient);
        assert_eq!(cache.policy(), CompatPolicy::Lenient);
        assert!(cache.is_empty());
        assert_eq!(cache.native_queries(), 0);
    }

    #[test]
    fn test_method_bind_metadata() {
        static BIND: MethodBind = MethodBind::new("Node", "get_name", 7);
        assert_eq!(BIND.class(), "Node");
        assert_eq!(BIND.method(), "get_name");
        assert_eq!(BIND.key(), BindKey::new("Node", "get_name", 7));
        assert!(!BIND.is_resolved());
    }
}

//! Bucket registry: route → bucket hash, and bucket key → live limiter.
//!
//! Both maps live behind a single lock so that re-keying a limiter after a hash change is atomic:
//! the same `Arc<Limiter>` moves to its new key, so callers already queued on it keep their place.
//! Entries are never removed except by that migration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::rate_limit::limiter::Limiter;
use crate::route::{BucketHash, BucketKey, Route, RouteKey};
use tracing::{debug, info, warn};

/// What a route resolved to at the start of a request.
#[derive(Debug, Clone)]
pub struct ResolvedBucket {
    pub key: BucketKey,
    pub hash: Option<BucketHash>,
    pub limiter: Arc<Limiter>,
}

/// Result of recording a bucket hash seen on a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// First hash ever seen for the route.
    Initial,
    /// The route already had a different hash.
    Changed { previous: BucketHash },
    /// Same hash as before.
    Unchanged,
}

#[derive(Debug, Default)]
struct Tables {
    hashes: HashMap<RouteKey, BucketHash>,
    limiters: HashMap<BucketKey, Arc<Limiter>>,
}

/// In-memory registry shared by every request an executor runs.
#[derive(Debug, Default, Clone)]
pub struct BucketRegistry {
    inner: Arc<RwLock<Tables>>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for `route`: hashed if the route's bucket is known, route-derived otherwise.
    pub fn key_for(&self, route: &Route) -> (BucketKey, Option<BucketHash>) {
        let tables = self.inner.read().expect("bucket registry poisoned");
        let major = route.major_parameters();
        match tables.hashes.get(&route.key()) {
            Some(hash) => (BucketKey::hashed(hash, &major), Some(hash.clone())),
            None => (BucketKey::unhashed(&route.key(), &major), None),
        }
    }

    /// Resolve `route` to its limiter, creating one on first use of the key.
    pub fn resolve(&self, route: &Route) -> ResolvedBucket {
        let (key, hash) = self.key_for(route);
        if let Some(limiter) = self.get(&key) {
            return ResolvedBucket { key, hash, limiter };
        }
        let mut tables = self.inner.write().expect("bucket registry poisoned");
        let limiter = tables.limiters.entry(key.clone()).or_default().clone();
        ResolvedBucket { key, hash, limiter }
    }

    pub fn get(&self, key: &BucketKey) -> Option<Arc<Limiter>> {
        let tables = self.inner.read().expect("bucket registry poisoned");
        tables.limiters.get(key).cloned()
    }

    pub fn hash_for(&self, route: &RouteKey) -> Option<BucketHash> {
        let tables = self.inner.read().expect("bucket registry poisoned");
        tables.hashes.get(route).cloned()
    }

    /// Record that a response for `route`, served through `limiter`, advertised `hash`.
    ///
    /// `known` is the hash the request resolved when it started. The outcome is decided against
    /// it rather than against the route's current entry, since other major parameters on the same
    /// route may already have moved the entry on. On initial discovery the limiter is registered
    /// under the hashed key. On a change it is moved from the old hashed key to the new one. If
    /// the destination key already has a limiter (another route sharing the bucket), that limiter
    /// is kept.
    pub fn observe(
        &self,
        route: &Route,
        known: Option<&BucketHash>,
        hash: BucketHash,
        limiter: &Arc<Limiter>,
    ) -> Discovery {
        let route_key = route.key();
        let major = route.major_parameters();
        let new_key = BucketKey::hashed(&hash, &major);
        let mut tables = self.inner.write().expect("bucket registry poisoned");
        tables.limiters.entry(new_key).or_insert_with(|| Arc::clone(limiter));

        match known {
            Some(known) if *known == hash => Discovery::Unchanged,
            None => {
                let first = tables.hashes.insert(route_key.clone(), hash.clone()).is_none();
                if first {
                    info!(
                        target: "bucketwise::registry",
                        route = %route_key,
                        hash = %hash,
                        "route found its initial rate limit bucket hash"
                    );
                } else {
                    debug!(
                        target: "bucketwise::registry",
                        route = %route_key,
                        hash = %hash,
                        major = %major,
                        "bucket hash adopted for another major parameter"
                    );
                }
                Discovery::Initial
            }
            Some(previous) => {
                let previous = previous.clone();
                tables.hashes.insert(route_key.clone(), hash.clone());
                let stale = BucketKey::hashed(&previous, &major);
                if tables.limiters.get(&stale).is_some_and(|l| Arc::ptr_eq(l, limiter)) {
                    tables.limiters.remove(&stale);
                }
                warn!(
                    target: "bucketwise::registry",
                    route = %route_key,
                    major = %major,
                    from = %previous,
                    to = %hash,
                    "route changed rate limit bucket hash; possible sub-rate-limit oscillation"
                );
                Discovery::Changed { previous }
            }
        }
    }

    /// Number of live limiters.
    pub fn len(&self) -> usize {
        self.inner.read().expect("bucket registry poisoned").limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every limiter key, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        let tables = self.inner.read().expect("bucket registry poisoned");
        let mut keys: Vec<String> = tables.limiters.keys().map(ToString::to_string).collect();
        keys.sort();
        keys
    }
}

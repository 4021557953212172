//! Routes and the keys derived from them.
//!
//! A [`Route`] is a method plus an unversioned path template such as
//! `/channels/{channel_id}/messages`. Before the remote service has told us which bucket a route
//! belongs to, the route itself (plus its major parameters) is the limiter key. Once a bucket hash
//! is known, the hash replaces the route in the key, which lets several routes share one limiter.

use http::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;

/// Parameters that make a bucket's scope concrete, in the order they appear in the key.
pub const MAJOR_PARAMETERS: [&str; 4] = ["channel_id", "guild_id", "webhook_id", "webhook_token"];

const PATH_SEGMENT: &AsciiSet =
    &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'<').add(b'>').add(b'?').add(b'`').add(b'{')
        .add(b'}').add(b'/').add(b'%');

/// `METHOD template`, stable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque bucket identifier assigned by the remote service (`X-Ratelimit-Bucket`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketHash(String);

impl BucketHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The limiter sharing key: bucket hash (or route key while unknown) plus major parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    scope: String,
    major: String,
}

impl BucketKey {
    /// Key used before any hash has been discovered for the route.
    pub fn unhashed(route: &RouteKey, major: &str) -> Self {
        Self { scope: route.0.clone(), major: major.to_string() }
    }

    /// Key used once the route's bucket hash is known.
    pub fn hashed(hash: &BucketHash, major: &str) -> Self {
        Self { scope: hash.0.clone(), major: major.to_string() }
    }

    pub fn major(&self) -> &str {
        &self.major
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.major)
    }
}

/// A logical API route with its parameters filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    template: String,
    params: Vec<(String, String)>,
}

impl Route {
    pub fn new(method: Method, template: impl Into<String>) -> Self {
        Self { method, template: template.into(), params: Vec::new() }
    }

    /// Bind `{name}` in the template to `value`.
    pub fn param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        let name = name.into();
        let value = value.to_string();
        match self.params.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn key(&self) -> RouteKey {
        RouteKey(format!("{} {}", self.method, self.template))
    }

    /// Major parameter values joined with `+`, in [`MAJOR_PARAMETERS`] order.
    pub fn major_parameters(&self) -> String {
        MAJOR_PARAMETERS
            .iter()
            .filter_map(|major| {
                self.params.iter().find(|(name, _)| name == major).map(|(_, v)| v.as_str())
            })
            .collect::<Vec<_>>()
            .join("+")
    }

    /// The path with every bound parameter substituted and percent-encoded.
    pub fn path(&self) -> String {
        let mut path = self.template.clone();
        for (name, value) in &self.params {
            let placeholder = format!("{{{}}}", name);
            let encoded = utf8_percent_encode(value, PATH_SEGMENT).to_string();
            path = path.replace(&placeholder, &encoded);
        }
        path
    }

    /// `base` joined with [`Route::path`], tolerating a trailing slash on `base`.
    pub fn url(&self, base: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), self.path())
    }
}

//! Opaque subproblem identity and the overlay-based configuration maps
//! used to build per-subproblem surveys and problems.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A worker rank: dense, unique across the cluster, assigned once at
/// bootstrap.
pub type Rank = u32;

/// The index of a source in the global source range handled by a
/// scheduled operation.
pub type SourceIndex = usize;

/// The index of a sub-survey configuration (e.g. a source-group id).
pub type SubIndex = i64;

/// Opaque subproblem tag: in practice a `(frequency-index,
/// parameter-index)` pair, but the scheduler only ever needs it to be
/// hashable and globally unique across the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub frequency: i64,
    pub parameter: i64,
}

impl Tag {
    pub fn new(frequency: i64, parameter: i64) -> Self {
        Self {
            frequency,
            parameter,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.frequency, self.parameter)
    }
}

/// An ordered key/value configuration overlay, mirroring the Python
/// source's plain dicts. Order is preserved so that repeated
/// `to_toml`/debug output is stable, and overlay semantics are
/// last-write-wins per key exactly like `dict.update`.
pub type SystemConfig = IndexMap<String, serde_json::Value>;

/// The base configuration every worker bootstraps with. Must contain a
/// `geom` entry (enforced by [`BaseSystemConfig::new`]).
#[derive(Debug, Clone)]
pub struct BaseSystemConfig {
    inner: SystemConfig,
}

impl BaseSystemConfig {
    pub const GEOM_KEY: &'static str = "geom";

    /// Build a base config, failing if it has no `geom` entry.
    pub fn new(inner: SystemConfig) -> Result<Self, crate::error::EndpointError> {
        if !inner.contains_key(Self::GEOM_KEY) {
            return Err(crate::error::EndpointError::MissingGeom);
        }
        Ok(Self { inner })
    }

    pub fn geom(&self) -> &serde_json::Value {
        // Presence checked at construction time.
        self.inner.get(Self::GEOM_KEY).expect("geom checked at construction")
    }

    /// The base config with the `geom` entry removed, used as the
    /// starting point for `setupLocalProblem`.
    pub fn without_geom(&self) -> SystemConfig {
        self.inner
            .iter()
            .filter(|(k, _)| k.as_str() != Self::GEOM_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Overlay `overlay` onto `base`, last-write-wins per key (matches
/// Python's `dict.update`).
pub fn overlay(base: &SystemConfig, overlay: &SystemConfig) -> SystemConfig {
    let mut merged = base.clone();
    for (k, v) in overlay {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Shallow-copy a JSON object and overlay another set of keys onto it,
/// last-write-wins — used to build per-subproblem geometry from
/// `baseSystemConfig.geom` plus a per-`isub` overlay.
pub fn overlay_json(base: &serde_json::Value, overlay: &SystemConfig) -> serde_json::Value {
    let mut merged = base.as_object().cloned().unwrap_or_default();
    for (k, v) in overlay {
        merged.insert(k.clone(), v.clone());
    }
    serde_json::Value::Object(merged)
}

/// Per-subproblem configuration passed to `setupLocalProblem`: which
/// survey it pairs with, which tag it is stored under, and any
/// per-subproblem overrides.
#[derive(Debug, Clone)]
pub struct SubConfig {
    pub isub: SubIndex,
    pub tag: Tag,
    pub overlay: SystemConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_is_last_write_wins() {
        let mut base = SystemConfig::new();
        base.insert("a".into(), serde_json::json!(1));
        base.insert("b".into(), serde_json::json!(2));

        let mut over = SystemConfig::new();
        over.insert("b".into(), serde_json::json!(20));
        over.insert("c".into(), serde_json::json!(3));

        let merged = overlay(&base, &over);
        assert_eq!(merged.get("a").unwrap(), &serde_json::json!(1));
        assert_eq!(merged.get("b").unwrap(), &serde_json::json!(20));
        assert_eq!(merged.get("c").unwrap(), &serde_json::json!(3));
    }

    #[test]
    fn base_config_requires_geom() {
        let cfg = SystemConfig::new();
        assert!(BaseSystemConfig::new(cfg).is_err());
    }

    #[test]
    fn without_geom_drops_only_geom() {
        let mut cfg = SystemConfig::new();
        cfg.insert("geom".into(), serde_json::json!({"nx": 10}));
        cfg.insert("solver".into(), serde_json::json!("direct"));
        let base = BaseSystemConfig::new(cfg).unwrap();
        let rest = base.without_geom();
        assert!(!rest.contains_key("geom"));
        assert!(rest.contains_key("solver"));
    }
}

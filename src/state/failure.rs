//! Per-domain failure bookkeeping

use super::progress::ApiDomain;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifiers that failed, grouped by [`ApiDomain`]
///
/// Identifiers are opaque strings (a form id, a request id, a URL, or a
/// composite `form_id:request_id`). Duplicates collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureRecord {
    domains: BTreeMap<ApiDomain, BTreeSet<String>>,
}

impl FailureRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed identifier; returns false if it was already present
    pub fn add(&mut self, domain: ApiDomain, id: impl Into<String>) -> bool {
        self.domains.entry(domain).or_default().insert(id.into())
    }

    /// Forget an identifier; returns whether it was present
    pub fn remove(&mut self, domain: ApiDomain, id: &str) -> bool {
        let Some(ids) = self.domains.get_mut(&domain) else {
            return false;
        };
        let removed = ids.remove(id);
        if ids.is_empty() {
            self.domains.remove(&domain);
        }
        removed
    }

    pub fn contains(&self, domain: ApiDomain, id: &str) -> bool {
        self.domains.get(&domain).is_some_and(|ids| ids.contains(id))
    }

    /// Identifiers recorded for a domain, in sorted order
    pub fn ids(&self, domain: ApiDomain) -> impl Iterator<Item = &str> + '_ {
        self.domains
            .get(&domain)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Number of identifiers recorded for a domain
    pub fn count(&self, domain: ApiDomain) -> usize {
        self.domains.get(&domain).map_or(0, BTreeSet::len)
    }

    /// Total number of identifiers across all domains
    pub fn len(&self) -> usize {
        self.domains.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.values().all(BTreeSet::is_empty)
    }

    /// Drop every identifier of a domain
    pub fn clear(&mut self, domain: ApiDomain) {
        self.domains.remove(&domain);
    }

    /// Replace a domain's identifiers with the union of `self` and `other`
    pub fn union_domain(&mut self, domain: ApiDomain, other: &FailureRecord) {
        for id in other.ids(domain) {
            self.add(domain, id);
        }
    }

    /// Domains with at least one identifier
    pub fn domains(&self) -> impl Iterator<Item = ApiDomain> + '_ {
        self.domains
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(domain, _)| *domain)
    }
}

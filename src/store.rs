//! Directory storage for admitted advertisement records.
//!
//! The store owns every persisted record. It is generic over the protocol
//! family — SHIP and SLAP records share one shape — and exposes exactly the
//! collection semantics the engine needs: point existence checks for dedup,
//! origin-keyed insert/remove, and filtered range queries that return UTXO
//! references only (callers resolve full records out of band).

use crate::{DiscoveryError, ProtocolFamily, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// A UTXO reference: the unique on-chain handle for an admitted token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: String,
    pub output_index: u32,
}

impl Outpoint {
    pub fn new(txid: impl Into<String>, output_index: u32) -> Self {
        Self {
            txid: txid.into(),
            output_index,
        }
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.output_index)
    }
}

/// One live, admitted advertisement.
///
/// Created on admission, deleted on spend or eviction, never updated in
/// place. The `origin` is the record's natural key; at most one live record
/// exists per `(identity_key, domain, label)` tuple after dedup resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementRecord {
    pub family: ProtocolFamily,
    /// Hex-encoded public key of the advertiser.
    pub identity_key: String,
    /// Advertisable base URI of the host.
    pub domain: String,
    /// Topic name (`tm_*`) or service name (`ls_*`).
    pub label: String,
    pub origin: Outpoint,
    pub created_at: DateTime<Utc>,
}

impl AdvertisementRecord {
    pub fn new(
        family: ProtocolFamily,
        identity_key: impl Into<String>,
        domain: impl Into<String>,
        label: impl Into<String>,
        origin: Outpoint,
    ) -> Self {
        Self {
            family,
            identity_key: identity_key.into(),
            domain: domain.into(),
            label: label.into(),
            origin,
            created_at: Utc::now(),
        }
    }

    /// Override the admission timestamp (deterministic ordering in tests).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    fn tuple_key(&self) -> (String, String, String) {
        (
            self.identity_key.clone(),
            self.domain.clone(),
            self.label.clone(),
        )
    }
}

/// Conjunctive filter over advertisement records. An unset field matches
/// everything; the label filter is satisfied by set membership.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdvertisementFilter {
    pub domain: Option<String>,
    pub labels: Option<Vec<String>>,
    pub identity_key: Option<String>,
}

impl AdvertisementFilter {
    fn matches(&self, record: &AdvertisementRecord) -> bool {
        if let Some(domain) = &self.domain {
            if &record.domain != domain {
                return false;
            }
        }
        if let Some(labels) = &self.labels {
            if !labels.iter().any(|l| l == &record.label) {
                return false;
            }
        }
        if let Some(identity_key) = &self.identity_key {
            if &record.identity_key != identity_key {
                return false;
            }
        }
        true
    }
}

/// Result ordering by admission time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    /// Parse the wire form used by lookup queries.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(Self::Ascending),
            "desc" => Some(Self::Descending),
            _ => None,
        }
    }
}

/// Pagination for range queries. `limit`/`skip` of zero or unset mean
/// "unbounded" / "no skip"; `sort_order` defaults to descending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub sort_order: Option<SortOrder>,
}

/// Persistent keyed collection of admitted advertisement records.
///
/// Production deployments back this with a document store carrying an index
/// on `(domain, label)`; [`MemoryDirectoryStore`] is the in-process
/// implementation.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Point lookup for the dedup check preceding [`DirectoryStore::insert`].
    async fn exists(&self, identity_key: &str, domain: &str, label: &str) -> Result<bool>;

    /// Store a record. Fails with [`DiscoveryError::DuplicateKey`] if the
    /// record's origin is already present.
    async fn insert(&self, record: AdvertisementRecord) -> Result<()>;

    /// Delete the record backed by `origin`. Idempotent — spend and eviction
    /// notifications may be replayed, so an absent origin is a no-op.
    async fn remove(&self, origin: &Outpoint) -> Result<()>;

    /// Filtered range query, ordered by admission time.
    async fn find(&self, filter: &AdvertisementFilter, page: &Pagination)
        -> Result<Vec<Outpoint>>;

    /// Equivalent to [`DirectoryStore::find`] with an empty filter.
    async fn find_all(&self, page: &Pagination) -> Result<Vec<Outpoint>> {
        self.find(&AdvertisementFilter::default(), page).await
    }
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<Outpoint, AdvertisementRecord>,
    /// Live-record count per `(identity_key, domain, label)` tuple. Kept
    /// under the same lock as `records`, so existence checks and inserts
    /// against this store observe a consistent view.
    tuples: HashMap<(String, String, String), u32>,
}

/// In-memory directory store.
#[derive(Default)]
pub struct MemoryDirectoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryDirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records (monitoring and tests).
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectoryStore {
    async fn exists(&self, identity_key: &str, domain: &str, label: &str) -> Result<bool> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let key = (
            identity_key.to_string(),
            domain.to_string(),
            label.to_string(),
        );
        Ok(inner.tuples.contains_key(&key))
    }

    async fn insert(&self, record: AdvertisementRecord) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.records.contains_key(&record.origin) {
            return Err(DiscoveryError::DuplicateKey(record.origin.to_string()));
        }
        *inner.tuples.entry(record.tuple_key()).or_insert(0) += 1;
        inner.records.insert(record.origin.clone(), record);
        Ok(())
    }

    async fn remove(&self, origin: &Outpoint) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = inner.records.remove(origin) {
            let key = record.tuple_key();
            if let Some(count) = inner.tuples.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    inner.tuples.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn find(
        &self,
        filter: &AdvertisementFilter,
        page: &Pagination,
    ) -> Result<Vec<Outpoint>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut matches: Vec<(&DateTime<Utc>, &Outpoint)> = inner
            .records
            .values()
            .filter(|record| filter.matches(record))
            .map(|record| (&record.created_at, &record.origin))
            .collect();
        // Origin tie-break keeps ordering deterministic for same-instant
        // admissions.
        match page.sort_order.unwrap_or_default() {
            SortOrder::Ascending => matches.sort(),
            SortOrder::Descending => matches.sort_by(|a, b| b.cmp(a)),
        }

        let skip = usize::try_from(page.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = match page.limit {
            Some(limit) if limit > 0 => usize::try_from(limit).unwrap_or(usize::MAX),
            _ => usize::MAX,
        };
        Ok(matches
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|(_, origin)| origin.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(n: u32, domain: &str, label: &str) -> AdvertisementRecord {
        AdvertisementRecord::new(
            ProtocolFamily::TopicHost,
            "aa".repeat(32),
            domain,
            label,
            Outpoint::new(format!("tx{n:02}"), 0),
        )
        .with_created_at(Utc.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap())
    }

    #[tokio::test]
    async fn exists_tracks_inserts_and_removes() {
        let store = MemoryDirectoryStore::new();
        let rec = record(1, "https://h.example", "tm_meter");
        let key = rec.identity_key.clone();

        assert!(!store.exists(&key, "https://h.example", "tm_meter").await.unwrap());
        store.insert(rec.clone()).await.unwrap();
        assert!(store.exists(&key, "https://h.example", "tm_meter").await.unwrap());
        store.remove(&rec.origin).await.unwrap();
        assert!(!store.exists(&key, "https://h.example", "tm_meter").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_origin_is_rejected() {
        let store = MemoryDirectoryStore::new();
        store.insert(record(1, "https://h.example", "tm_meter")).await.unwrap();
        let err = store
            .insert(record(1, "https://other.example", "tm_other"))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::DuplicateKey(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryDirectoryStore::new();
        let rec = record(1, "https://h.example", "tm_meter");
        store.insert(rec.clone()).await.unwrap();
        store.remove(&rec.origin).await.unwrap();
        store.remove(&rec.origin).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn tuple_stays_live_while_a_second_origin_backs_it() {
        // Two origins for one tuple can coexist briefly; removing one must
        // not make the tuple look absent.
        let store = MemoryDirectoryStore::new();
        let first = record(1, "https://h.example", "tm_meter");
        let second = AdvertisementRecord {
            origin: Outpoint::new("tx99", 0),
            ..first.clone()
        };
        store.insert(first.clone()).await.unwrap();
        store.insert(second).await.unwrap();
        store.remove(&first.origin).await.unwrap();
        assert!(store
            .exists(&first.identity_key, &first.domain, &first.label)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn filters_are_conjunctive() {
        let store = MemoryDirectoryStore::new();
        store.insert(record(1, "https://a.example", "tm_meter")).await.unwrap();
        store.insert(record(2, "https://b.example", "tm_meter")).await.unwrap();
        store.insert(record(3, "https://a.example", "tm_widgets")).await.unwrap();

        let filter = AdvertisementFilter {
            domain: Some("https://a.example".into()),
            labels: Some(vec!["tm_meter".into(), "tm_gadgets".into()]),
            identity_key: None,
        };
        let found = store.find(&filter, &Pagination::default()).await.unwrap();
        assert_eq!(found, vec![Outpoint::new("tx01", 0)]);
    }

    #[tokio::test]
    async fn unset_filter_fields_match_everything() {
        let store = MemoryDirectoryStore::new();
        store.insert(record(1, "https://a.example", "tm_meter")).await.unwrap();
        store.insert(record(2, "https://b.example", "tm_widgets")).await.unwrap();
        let found = store
            .find(&AdvertisementFilter::default(), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn default_order_is_newest_first() {
        let store = MemoryDirectoryStore::new();
        for n in 1..=3 {
            store.insert(record(n, "https://h.example", "tm_meter")).await.unwrap();
        }
        let found = store.find_all(&Pagination::default()).await.unwrap();
        assert_eq!(
            found,
            vec![
                Outpoint::new("tx03", 0),
                Outpoint::new("tx02", 0),
                Outpoint::new("tx01", 0),
            ]
        );

        let ascending = store
            .find_all(&Pagination {
                sort_order: Some(SortOrder::Ascending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ascending.first(), Some(&Outpoint::new("tx01", 0)));
    }

    #[tokio::test]
    async fn pagination_boundaries() {
        let store = MemoryDirectoryStore::new();
        for n in 1..=5 {
            store.insert(record(n, "https://h.example", "tm_meter")).await.unwrap();
        }

        // limit of zero or unset is unbounded
        let unbounded = store
            .find_all(&Pagination {
                limit: Some(0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unbounded.len(), 5);

        let page = store
            .find_all(&Pagination {
                limit: Some(2),
                skip: Some(1),
                sort_order: Some(SortOrder::Ascending),
            })
            .await
            .unwrap();
        assert_eq!(page, vec![Outpoint::new("tx02", 0), Outpoint::new("tx03", 0)]);

        // skip past the result set is empty, not an error
        let past_end = store
            .find_all(&Pagination {
                skip: Some(100),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(past_end.is_empty());
    }
}

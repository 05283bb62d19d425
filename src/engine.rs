//! Directory engines.
//!
//! One engine runs per protocol family. The hosting overlay runtime calls
//! [`DirectoryEngine::on_admission`] when an output matching a tracked topic
//! confirms, [`DirectoryEngine::on_spend`] when it is spent, and
//! [`DirectoryEngine::on_evicted`] when a reorg or pruning drops it. The
//! engine owns validation policy — protocol tag, signature linkage, dedup —
//! and drives the [`DirectoryStore`]; it never throws for expected "not for
//! me" conditions, because malicious or buggy tokens must not be able to take
//! down the directory.

use crate::store::{AdvertisementFilter, AdvertisementRecord, DirectoryStore, Outpoint, Pagination, SortOrder};
use crate::token::{verify_token_linkage, LockingScript, TOKEN_FIELD_COUNT};
use crate::{DiscoveryError, ProtocolFamily, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A routed lookup request: the service it is addressed to plus a
/// caller-supplied query, either the legacy `"findAll"` literal or a query
/// object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupQuestion {
    pub service: String,
    pub query: Value,
}

impl LookupQuestion {
    pub fn new(service: impl Into<String>, query: Value) -> Self {
        Self {
            service: service.into(),
            query,
        }
    }

    /// The legacy list-all request with no pagination.
    pub fn find_all(service: impl Into<String>) -> Self {
        Self::new(service, Value::String("findAll".into()))
    }
}

/// Directory engine for one protocol family.
pub struct DirectoryEngine {
    family: ProtocolFamily,
    store: Arc<dyn DirectoryStore>,
    /// Serializes the dedup check-then-insert sequence. Two concurrent
    /// admissions for the same logical tuple must not both observe the tuple
    /// as absent.
    admission_lock: Mutex<()>,
}

impl DirectoryEngine {
    pub fn new(family: ProtocolFamily, store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            family,
            store,
            admission_lock: Mutex::new(()),
        }
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    /// Admission hook: an output matching `topic` has been confirmed.
    ///
    /// Mismatched topics, non-token locking conditions, foreign protocol
    /// tags, unlinked signatures, and duplicate claims are all deliberate
    /// no-ops. The only error path is a store failure — including a
    /// [`DiscoveryError::DuplicateKey`] out of the insert, which indicates an
    /// upstream replay bug and is surfaced rather than swallowed.
    pub async fn on_admission(
        &self,
        topic: &str,
        locking_script: &LockingScript,
        origin: Outpoint,
    ) -> Result<()> {
        if topic != self.family.topic_name() {
            return Ok(());
        }
        let decoded = match locking_script.decode() {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%origin, %err, "skipping malformed token");
                return Ok(());
            }
        };
        if decoded.fields.len() != TOKEN_FIELD_COUNT {
            warn!(
                %origin,
                fields = decoded.fields.len(),
                "skipping token with unexpected field count"
            );
            return Ok(());
        }
        // The same topic may carry unrelated tokens in a shared namespace.
        if decoded.fields[0] != self.family.tag().as_bytes() {
            debug!(%origin, "ignoring token with foreign protocol tag");
            return Ok(());
        }
        match verify_token_linkage(&decoded.locking_public_key, &decoded.fields) {
            Ok(true) => {}
            Ok(false) => {
                warn!(%origin, "skipping token whose signature is not linked to its fields");
                return Ok(());
            }
            Err(err) => {
                warn!(%origin, %err, "skipping structurally invalid token");
                return Ok(());
            }
        }
        let identity_key = hex::encode(&decoded.fields[1]);
        let Ok(domain) = String::from_utf8(decoded.fields[2].clone()) else {
            warn!(%origin, "skipping token with non-UTF-8 domain");
            return Ok(());
        };
        let Ok(label) = String::from_utf8(decoded.fields[3].clone()) else {
            warn!(%origin, "skipping token with non-UTF-8 label");
            return Ok(());
        };

        let _admission = self.admission_lock.lock().await;
        if self.store.exists(&identity_key, &domain, &label).await? {
            info!(
                %origin,
                domain = %domain,
                label = %label,
                "skipping duplicate {} advertisement",
                self.family.tag()
            );
            return Ok(());
        }
        let record =
            AdvertisementRecord::new(self.family, identity_key, domain, label, origin.clone());
        if let Err(err) = self.store.insert(record).await {
            if matches!(err, DiscoveryError::DuplicateKey(_)) {
                error!(%origin, %err, "origin re-admitted while its record is still live");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Spend hook, scoped to this engine's topic.
    pub async fn on_spend(&self, topic: &str, origin: &Outpoint) -> Result<()> {
        if topic != self.family.topic_name() {
            return Ok(());
        }
        self.store.remove(origin).await
    }

    /// Eviction hook (reorg or pruning) — topic-agnostic.
    pub async fn on_evicted(&self, origin: &Outpoint) -> Result<()> {
        self.store.remove(origin).await
    }

    /// Answer a lookup question with an ordered sequence of UTXO references.
    ///
    /// Accepts the legacy `"findAll"` string, a `{"findAll": true, ...}`
    /// object with pagination, or a structured filter object. Every query
    /// field is validated before any store call.
    pub async fn lookup(&self, question: &LookupQuestion) -> Result<Vec<Outpoint>> {
        if question.service != self.family.service_name() {
            return Err(DiscoveryError::UnsupportedService(question.service.clone()));
        }
        match &question.query {
            Value::String(literal) if literal == "findAll" => {
                self.store.find_all(&Pagination::default()).await
            }
            Value::Object(map) => {
                let page = parse_pagination(map)?;
                if map.get("findAll").and_then(Value::as_bool) == Some(true) {
                    return self.store.find_all(&page).await;
                }
                let filter = self.parse_filter(map)?;
                self.store.find(&filter, &page).await
            }
            _ => Err(DiscoveryError::InvalidQuery(
                "query must be the \"findAll\" literal or a query object".into(),
            )),
        }
    }

    fn parse_filter(&self, map: &Map<String, Value>) -> Result<AdvertisementFilter> {
        let domain = optional_string(map, "domain")?;
        let identity_key = optional_string(map, "identityKey")?;
        let label_field = self.family.label_query_field();
        let labels = match map.get(label_field) {
            None | Some(Value::Null) => None,
            Some(Value::Array(values)) => {
                let mut labels = Vec::with_capacity(values.len());
                for value in values {
                    let Value::String(label) = value else {
                        return Err(DiscoveryError::InvalidQuery(format!(
                            "query.{label_field} must be an array of strings"
                        )));
                    };
                    labels.push(label.clone());
                }
                Some(labels)
            }
            Some(_) => {
                return Err(DiscoveryError::InvalidQuery(format!(
                    "query.{label_field} must be an array of strings"
                )))
            }
        };
        Ok(AdvertisementFilter {
            domain,
            labels,
            identity_key,
        })
    }
}

fn optional_string(map: &Map<String, Value>, field: &str) -> Result<Option<String>> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(DiscoveryError::InvalidQuery(format!(
            "query.{field} must be a string"
        ))),
    }
}

fn optional_count(map: &Map<String, Value>, field: &str) -> Result<Option<u64>> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            DiscoveryError::InvalidQuery(format!("query.{field} must be a non-negative integer"))
        }),
    }
}

fn parse_pagination(map: &Map<String, Value>) -> Result<Pagination> {
    let limit = optional_count(map, "limit")?;
    let skip = optional_count(map, "skip")?;
    let sort_order = match map.get("sortOrder") {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(SortOrder::parse(value).ok_or_else(|| {
            DiscoveryError::InvalidQuery(
                "query.sortOrder must be \"asc\" or \"desc\" if provided".into(),
            )
        })?),
        Some(_) => {
            return Err(DiscoveryError::InvalidQuery(
                "query.sortOrder must be \"asc\" or \"desc\" if provided".into(),
            ))
        }
    };
    Ok(Pagination {
        limit,
        skip,
        sort_order,
    })
}

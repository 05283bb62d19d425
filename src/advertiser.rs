//! Advertisement lifecycle manager.
//!
//! The [`Advertiser`] is a stateless façade over an injected wallet and the
//! directory engines' query surface: it builds and signs advertisement
//! tokens, submits them in a single wallet action, parses tokens back into
//! structured form, enumerates what the directories currently hold, and
//! revokes advertisements by spending their backing outputs. It owns no
//! persistent state — the collaborator session is acquired at
//! [`Advertiser::init`] and held for the object's lifetime.

use crate::engine::{DirectoryEngine, LookupQuestion};
use crate::protocol::{ensure_advertisable_domain, validate_label, ProtocolFamily};
use crate::store::Outpoint;
use crate::token::{sign_token_fields, LockingScript, PUBLIC_KEY_LEN, TOKEN_FIELD_COUNT};
use crate::{DiscoveryError, Result};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Value locked into each advertisement output.
const ADVERTISEMENT_SATOSHIS: u64 = 1;

/// A spendable output requested from the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutput {
    pub satoshis: u64,
    pub locking_script: LockingScript,
    pub description: String,
}

/// An existing output the wallet should spend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionInput {
    pub outpoint: Outpoint,
    pub description: String,
}

/// A transaction the wallet is asked to construct.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateActionArgs {
    pub description: String,
    pub inputs: Vec<ActionInput>,
    pub outputs: Vec<ActionOutput>,
}

/// Wallet response to [`Wallet::create_action`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateActionResult {
    pub txid: String,
    pub tx: Vec<u8>,
    /// Present when the wallet needs a follow-up [`Wallet::sign_action`]
    /// call to complete the transaction.
    pub signable: Option<String>,
}

/// Wallet response to [`Wallet::sign_action`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignActionResult {
    pub txid: String,
    pub tx: Vec<u8>,
}

/// The external wallet collaborator. Construction, signing, and broadcast of
/// transactions happen entirely on the other side of this trait; nothing
/// here is retried automatically — a submission failure surfaces to the
/// caller.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn create_action(&self, args: CreateActionArgs) -> Result<CreateActionResult>;
    async fn sign_action(&self, reference: &str) -> Result<SignActionResult>;
    async fn network(&self) -> Result<String>;
}

/// The hosting runtime's reverse lookup from a UTXO reference to its current
/// locking condition.
#[async_trait]
pub trait OutputResolver: Send + Sync {
    async fn locking_script(&self, outpoint: &Outpoint) -> Result<Option<LockingScript>>;
}

/// One advertisement to create: a protocol family plus the topic or service
/// label being claimed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdvertisementEntry {
    pub family: ProtocolFamily,
    pub label: String,
}

impl AdvertisementEntry {
    pub fn new(family: ProtocolFamily, label: impl Into<String>) -> Self {
        Self {
            family,
            label: label.into(),
        }
    }
}

/// A submitted transaction tagged with the overlay topics it touches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedTransaction {
    pub txid: String,
    pub tx: Vec<u8>,
    pub topics: Vec<String>,
}

/// A parsed advertisement.
///
/// `origin` is populated when the advertisement was resolved out of a
/// directory (and is required for revocation); it is `None` when parsed from
/// a bare locking condition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub family: ProtocolFamily,
    pub label: String,
    pub domain: String,
    /// Hex-encoded public key of the advertiser.
    pub identity_key: String,
    pub origin: Option<Outpoint>,
}

#[derive(Clone)]
struct AdvertiserSession {
    wallet: Arc<dyn Wallet>,
    resolver: Arc<dyn OutputResolver>,
    topic_hosts: Arc<DirectoryEngine>,
    service_hosts: Arc<DirectoryEngine>,
}

/// Creates, parses, enumerates, and revokes advertisements.
pub struct Advertiser {
    signing_key: SigningKey,
    identity_key: String,
    advertised_domain: String,
    session: RwLock<Option<AdvertiserSession>>,
}

impl std::fmt::Debug for Advertiser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advertiser")
            .field("identity_key", &self.identity_key)
            .field("advertised_domain", &self.advertised_domain)
            .finish_non_exhaustive()
    }
}

impl Advertiser {
    /// Construct an advertiser for the given identity and domain.
    ///
    /// Fails with [`DiscoveryError::NonAdvertisableDomain`] if the domain's
    /// URI scheme is not advertisable, and with
    /// [`DiscoveryError::InvalidArgument`] on a malformed private key.
    pub fn new(private_key_hex: &str, advertised_domain: impl Into<String>) -> Result<Self> {
        let advertised_domain = advertised_domain.into();
        ensure_advertisable_domain(&advertised_domain)?;
        let key_bytes: [u8; PUBLIC_KEY_LEN] = hex::decode(private_key_hex)
            .map_err(|e| DiscoveryError::InvalidArgument(format!("invalid private key: {e}")))?
            .try_into()
            .map_err(|bytes: Vec<u8>| {
                DiscoveryError::InvalidArgument(format!(
                    "private key must be 32 bytes, got {}",
                    bytes.len()
                ))
            })?;
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let identity_key = hex::encode(signing_key.verifying_key().to_bytes());
        Ok(Self {
            signing_key,
            identity_key,
            advertised_domain,
            session: RwLock::new(None),
        })
    }

    /// Hex-encoded public key this advertiser signs with.
    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    /// The base URI this advertiser claims to host under.
    pub fn advertised_domain(&self) -> &str {
        &self.advertised_domain
    }

    /// Establish the collaborator session. Every other operation fails with
    /// [`DiscoveryError::NotInitialized`] until this succeeds.
    pub async fn init(
        &self,
        wallet: Arc<dyn Wallet>,
        resolver: Arc<dyn OutputResolver>,
        topic_hosts: Arc<DirectoryEngine>,
        service_hosts: Arc<DirectoryEngine>,
    ) -> Result<()> {
        if topic_hosts.family() != ProtocolFamily::TopicHost {
            return Err(DiscoveryError::InvalidArgument(
                "topic_hosts engine must serve the TopicHost family".into(),
            ));
        }
        if service_hosts.family() != ProtocolFamily::ServiceHost {
            return Err(DiscoveryError::InvalidArgument(
                "service_hosts engine must serve the ServiceHost family".into(),
            ));
        }
        let network = wallet.network().await?;
        info!(network = %network, domain = %self.advertised_domain, "advertiser initialized");
        let mut session = self.session.write().unwrap_or_else(|e| e.into_inner());
        *session = Some(AdvertiserSession {
            wallet,
            resolver,
            topic_hosts,
            service_hosts,
        });
        Ok(())
    }

    fn session(&self) -> Result<AdvertiserSession> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(DiscoveryError::NotInitialized)
    }

    /// Build, sign, and submit one transaction carrying one advertisement
    /// output per entry.
    ///
    /// Every label is validated before the wallet is contacted; the returned
    /// bundle is tagged with the set of overlay topics touched.
    pub async fn create_advertisements(
        &self,
        entries: &[AdvertisementEntry],
    ) -> Result<TaggedTransaction> {
        let session = self.session()?;
        if entries.is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "must provide at least one advertisement entry".into(),
            ));
        }
        for entry in entries {
            validate_label(entry.family, &entry.label)?;
        }

        let public_key = self.signing_key.verifying_key().to_bytes();
        let mut outputs = Vec::with_capacity(entries.len());
        let mut topics: Vec<String> = Vec::new();
        for entry in entries {
            let mut fields = vec![
                entry.family.tag().as_bytes().to_vec(),
                public_key.to_vec(),
                self.advertised_domain.as_bytes().to_vec(),
                entry.label.as_bytes().to_vec(),
            ];
            fields.push(sign_token_fields(&self.signing_key, &fields));
            outputs.push(ActionOutput {
                satoshis: ADVERTISEMENT_SATOSHIS,
                locking_script: LockingScript::encode(&public_key, &fields),
                description: format!("{} advertisement of {}", entry.family.tag(), entry.label),
            });
            let topic = entry.family.topic_name().to_string();
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }

        let created = session
            .wallet
            .create_action(CreateActionArgs {
                description: "Publish overlay advertisements".into(),
                inputs: Vec::new(),
                outputs,
            })
            .await?;
        self.complete(&session, created, topics).await
    }

    /// Parse an advertisement token out of a locking condition.
    ///
    /// Pure decode — signature linkage is deliberately not verified here;
    /// that is the directory engine's admission responsibility.
    pub fn parse_advertisement(&self, locking_script: &LockingScript) -> Result<Advertisement> {
        let decoded = locking_script.decode()?;
        if decoded.fields.len() != TOKEN_FIELD_COUNT {
            return Err(DiscoveryError::MalformedToken(format!(
                "expected {TOKEN_FIELD_COUNT} fields, found {}",
                decoded.fields.len()
            )));
        }
        let tag = std::str::from_utf8(&decoded.fields[0])
            .map_err(|_| DiscoveryError::MalformedToken("non-UTF-8 protocol tag".into()))?;
        let family = ProtocolFamily::from_tag(tag).ok_or_else(|| {
            DiscoveryError::MalformedToken(format!("unknown protocol tag {tag:?}"))
        })?;
        let domain = String::from_utf8(decoded.fields[2].clone())
            .map_err(|_| DiscoveryError::MalformedToken("non-UTF-8 domain".into()))?;
        let label = String::from_utf8(decoded.fields[3].clone())
            .map_err(|_| DiscoveryError::MalformedToken("non-UTF-8 label".into()))?;
        Ok(Advertisement {
            family,
            label,
            domain,
            identity_key: hex::encode(&decoded.fields[1]),
            origin: None,
        })
    }

    /// Enumerate every advertisement the given family's directory currently
    /// tracks, resolved and parsed.
    ///
    /// Outputs that can no longer be resolved, or whose tokens fail to
    /// parse, are skipped with a warning — one bad output must not hide the
    /// rest of the directory.
    pub async fn find_all_advertisements(
        &self,
        family: ProtocolFamily,
    ) -> Result<Vec<Advertisement>> {
        let session = self.session()?;
        let engine = match family {
            ProtocolFamily::TopicHost => &session.topic_hosts,
            ProtocolFamily::ServiceHost => &session.service_hosts,
        };
        let question = LookupQuestion::find_all(family.service_name());
        let outpoints = engine.lookup(&question).await?;

        let mut advertisements = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            let script = match session.resolver.locking_script(&outpoint).await? {
                Some(script) => script,
                None => {
                    warn!(%outpoint, "directory entry no longer resolves to an output");
                    continue;
                }
            };
            match self.parse_advertisement(&script) {
                Ok(mut advertisement) => {
                    advertisement.origin = Some(outpoint);
                    advertisements.push(advertisement);
                }
                Err(err) => {
                    warn!(%outpoint, %err, "skipping unparseable advertisement");
                }
            }
        }
        Ok(advertisements)
    }

    /// Revoke advertisements by spending their backing outputs.
    ///
    /// Record removal happens asynchronously through the engines' spend
    /// handling once the spends confirm.
    pub async fn revoke_advertisements(
        &self,
        advertisements: &[Advertisement],
    ) -> Result<TaggedTransaction> {
        let session = self.session()?;
        if advertisements.is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "must provide advertisements to revoke".into(),
            ));
        }
        let mut inputs = Vec::with_capacity(advertisements.len());
        let mut topics: Vec<String> = Vec::new();
        for advertisement in advertisements {
            let outpoint = advertisement.origin.clone().ok_or_else(|| {
                DiscoveryError::InvalidArgument(format!(
                    "advertisement of {} has no backing outpoint",
                    advertisement.label
                ))
            })?;
            inputs.push(ActionInput {
                outpoint,
                description: format!(
                    "Revoke {} advertisement of {}",
                    advertisement.family.tag(),
                    advertisement.label
                ),
            });
            let topic = advertisement.family.topic_name().to_string();
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }

        let created = session
            .wallet
            .create_action(CreateActionArgs {
                description: "Revoke overlay advertisements".into(),
                inputs,
                outputs: Vec::new(),
            })
            .await?;
        self.complete(&session, created, topics).await
    }

    /// Finish a wallet action, completing the signing round-trip when the
    /// wallet hands back a signable reference.
    async fn complete(
        &self,
        session: &AdvertiserSession,
        created: CreateActionResult,
        topics: Vec<String>,
    ) -> Result<TaggedTransaction> {
        if let Some(reference) = created.signable {
            let signed = session.wallet.sign_action(&reference).await?;
            return Ok(TaggedTransaction {
                txid: signed.txid,
                tx: signed.tx,
                topics,
            });
        }
        Ok(TaggedTransaction {
            txid: created.txid,
            tx: created.tx,
            topics,
        })
    }
}

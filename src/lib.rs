//! Overlay host discovery.
//!
//! Nodes on a decentralized overlay network advertise which topics (SHIP) and
//! which lookup services (SLAP) they host by publishing signed tokens inside
//! spendable on-chain outputs. This crate covers the advertisement protocol
//! end-to-end:
//!
//! - **Token codec & signature linker** ([`token`]) — the on-chain field-list
//!   encoding and the Ed25519 linkage that makes an advertisement unforgeable.
//! - **Directory store & engine** ([`store`], [`engine`]) — admit,
//!   deduplicate, query, and evict advertisement records as the UTXO set
//!   changes, one engine per protocol family.
//! - **Advertiser** ([`advertiser`]) — a stateless façade that creates,
//!   parses, enumerates, and revokes advertisements through an injected
//!   wallet.
//!
//! Wallet access, key storage, and the hosting overlay runtime are consumed
//! through trait-based dependency injection; this crate holds no sessions of
//! its own beyond what [`advertiser::Advertiser::init`] is handed.

pub mod advertiser;
pub mod engine;
pub mod protocol;
pub mod store;
pub mod token;

pub use advertiser::{
    ActionInput, ActionOutput, Advertisement, AdvertisementEntry, Advertiser, CreateActionArgs,
    CreateActionResult, OutputResolver, SignActionResult, TaggedTransaction, Wallet,
};
pub use engine::{DirectoryEngine, LookupQuestion};
pub use protocol::{ensure_advertisable_domain, validate_label, ProtocolFamily};
pub use store::{
    AdvertisementFilter, AdvertisementRecord, DirectoryStore, MemoryDirectoryStore, Outpoint,
    Pagination, SortOrder,
};
pub use token::{sign_token_fields, verify_token_linkage, DecodedToken, LockingScript};

/// Common result alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Error taxonomy for the discovery layer.
///
/// Validation errors are returned synchronously to the immediate caller and
/// are never retried here. Expected "not for me" conditions during admission
/// (wrong topic, wrong protocol tag, duplicate claim) are not errors at all —
/// they are deliberate no-ops, observable through `tracing`.
#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    /// Structurally invalid on-chain token data.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// A record for this origin already exists. Indicates an upstream
    /// dedup-check race or replay bug, not a normal duplicate claim.
    #[error("duplicate record for origin {0}")]
    DuplicateKey(String),

    /// Caller-supplied input failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A lookup query was neither the legacy "findAll" literal nor a valid
    /// query object.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A topic or service label violates the namespace convention for its
    /// protocol family.
    #[error("invalid topic or service label: {0}")]
    InvalidLabel(String),

    /// Refusing to advertise a domain whose URI scheme is not advertisable.
    #[error("refusing to advertise non-advertisable URI: {0}")]
    NonAdvertisableDomain(String),

    /// The lookup question was routed to an engine that does not serve the
    /// named service.
    #[error("lookup service not supported: {0}")]
    UnsupportedService(String),

    /// The advertiser was used before `init()` established its collaborator
    /// session.
    #[error("initialize the advertiser using init() before use")]
    NotInitialized,

    /// The injected wallet collaborator failed.
    #[error("wallet error: {0}")]
    Wallet(String),

    /// The backing record store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

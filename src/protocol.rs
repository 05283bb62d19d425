//! Protocol family configuration.
//!
//! SHIP (topic hosting) and SLAP (service hosting) advertisements are
//! structurally identical; everything the two families differ in — protocol
//! tag, topic namespace, lookup service name, label prefix, query field name —
//! lives here so the store and engine can stay generic.

use crate::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// URI schemes a host may advertise itself under.
const ADVERTISABLE_SCHEMES: [&str; 2] = ["https", "wss"];

/// The two advertisement families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolFamily {
    /// SHIP — the advertiser hosts a topic feed.
    TopicHost,
    /// SLAP — the advertiser hosts a lookup service.
    ServiceHost,
}

impl ProtocolFamily {
    /// The fixed literal carried as a token's first field.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::TopicHost => "SHIP",
            Self::ServiceHost => "SLAP",
        }
    }

    /// The overlay topic this family's tokens are admitted under.
    pub const fn topic_name(&self) -> &'static str {
        match self {
            Self::TopicHost => "tm_ship",
            Self::ServiceHost => "tm_slap",
        }
    }

    /// The lookup service name this family's directory answers to.
    pub const fn service_name(&self) -> &'static str {
        match self {
            Self::TopicHost => "ls_ship",
            Self::ServiceHost => "ls_slap",
        }
    }

    /// Namespace prefix every label of this family must carry.
    pub const fn label_prefix(&self) -> &'static str {
        match self {
            Self::TopicHost => "tm_",
            Self::ServiceHost => "ls_",
        }
    }

    /// Name of the label-set field in structured lookup queries.
    pub const fn label_query_field(&self) -> &'static str {
        match self {
            Self::TopicHost => "topics",
            Self::ServiceHost => "services",
        }
    }

    /// Resolve a family from its token tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SHIP" => Some(Self::TopicHost),
            "SLAP" => Some(Self::ServiceHost),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Validate a topic or service label against its family's namespace
/// convention.
///
/// Labels are namespaced by prefix (`tm_*` for topic hosting, `ls_*` for
/// service hosting) and restricted to lowercase letters, digits, and
/// underscores.
pub fn validate_label(family: ProtocolFamily, label: &str) -> Result<()> {
    let prefix = family.label_prefix();
    let body = label.strip_prefix(prefix).ok_or_else(|| {
        DiscoveryError::InvalidLabel(format!(
            "{} label {:?} must start with {:?}",
            family.tag(),
            label,
            prefix
        ))
    })?;
    if body.is_empty() {
        return Err(DiscoveryError::InvalidLabel(format!(
            "{} label {:?} has an empty name after its prefix",
            family.tag(),
            label
        )));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(DiscoveryError::InvalidLabel(format!(
            "{} label {:?} contains characters outside [a-z0-9_]",
            family.tag(),
            label
        )));
    }
    Ok(())
}

/// Check that a domain URI uses an advertisable scheme.
///
/// Advertised domains become the base URI other nodes contact, so only
/// schemes a host can actually be reached under are accepted.
pub fn ensure_advertisable_domain(domain: &str) -> Result<()> {
    let (scheme, rest) = domain.split_once("://").ok_or_else(|| {
        DiscoveryError::NonAdvertisableDomain(format!("{domain:?} is not an absolute URI"))
    })?;
    if rest.is_empty() {
        return Err(DiscoveryError::NonAdvertisableDomain(format!(
            "{domain:?} has an empty host"
        )));
    }
    if !ADVERTISABLE_SCHEMES.contains(&scheme) {
        return Err(DiscoveryError::NonAdvertisableDomain(format!(
            "scheme {scheme:?} is not advertisable"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_configuration() {
        assert_eq!(ProtocolFamily::TopicHost.tag(), "SHIP");
        assert_eq!(ProtocolFamily::TopicHost.topic_name(), "tm_ship");
        assert_eq!(ProtocolFamily::TopicHost.service_name(), "ls_ship");
        assert_eq!(ProtocolFamily::ServiceHost.tag(), "SLAP");
        assert_eq!(ProtocolFamily::ServiceHost.topic_name(), "tm_slap");
        assert_eq!(ProtocolFamily::ServiceHost.service_name(), "ls_slap");
        assert_eq!(ProtocolFamily::from_tag("SHIP"), Some(ProtocolFamily::TopicHost));
        assert_eq!(ProtocolFamily::from_tag("SLAP"), Some(ProtocolFamily::ServiceHost));
        assert_eq!(ProtocolFamily::from_tag("SHOP"), None);
    }

    #[test]
    fn accepts_well_formed_labels() {
        validate_label(ProtocolFamily::TopicHost, "tm_meter").unwrap();
        validate_label(ProtocolFamily::TopicHost, "tm_uhrp_files_2").unwrap();
        validate_label(ProtocolFamily::ServiceHost, "ls_meter").unwrap();
    }

    #[test]
    fn rejects_labels_with_invalid_characters() {
        let err = validate_label(ProtocolFamily::TopicHost, "tm_!@#$invalid").unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidLabel(_)));
        assert!(validate_label(ProtocolFamily::TopicHost, "tm_Meter").is_err());
        assert!(validate_label(ProtocolFamily::TopicHost, "tm_me ter").is_err());
    }

    #[test]
    fn rejects_labels_in_the_wrong_namespace() {
        assert!(validate_label(ProtocolFamily::TopicHost, "ls_meter").is_err());
        assert!(validate_label(ProtocolFamily::ServiceHost, "tm_meter").is_err());
        assert!(validate_label(ProtocolFamily::TopicHost, "meter").is_err());
        assert!(validate_label(ProtocolFamily::TopicHost, "tm_").is_err());
    }

    #[test]
    fn accepts_advertisable_domains() {
        ensure_advertisable_domain("https://overlay.example").unwrap();
        ensure_advertisable_domain("wss://overlay.example:8080").unwrap();
    }

    #[test]
    fn rejects_non_advertisable_domains() {
        for bad in ["ftp://bad-protocol.com", "overlay.example", "https://", ""] {
            let err = ensure_advertisable_domain(bad).unwrap_err();
            assert!(matches!(err, DiscoveryError::NonAdvertisableDomain(_)), "{bad}");
        }
    }
}

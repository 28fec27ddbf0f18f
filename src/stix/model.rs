use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExternalReference {
    pub source_name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KillChainPhase {
    pub kill_chain_name: String,
    pub phase_name: String,
}

/// Properties every STIX domain object carries that the importer reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Common {
    pub id: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default, rename = "x_mitre_deprecated")]
    pub deprecated: bool,
    #[serde(default)]
    pub external_references: Vec<ExternalReference>,
}

impl Common {
    /// The ATT&CK identifier (`T1059`, `G0016`, ...) from the `mitre-attack` reference.
    pub fn attack_id(&self) -> Option<&str> {
        self.external_references
            .iter()
            .find(|r| r.source_name == "mitre-attack")
            .and_then(|r| r.external_id.as_deref())
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.revoked && !self.deprecated
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttackPattern {
    #[serde(flatten)]
    pub common: Common,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kill_chain_phases: Vec<KillChainPhase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Campaign {
    #[serde(flatten)]
    pub common: Common,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntrusionSet {
    #[serde(flatten)]
    pub common: Common,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub primary_motivation: Option<String>,
    #[serde(default)]
    pub sophistication: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Malware {
    #[serde(flatten)]
    pub common: Common,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub malware_types: Vec<String>,
    #[serde(default)]
    pub is_family: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Indicator {
    #[serde(flatten)]
    pub common: Common,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub pattern: String,
    #[serde(default)]
    pub pattern_type: Option<String>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
}

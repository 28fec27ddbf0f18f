use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// STIX object families imported into their own Notion database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    AttackPattern,
    Campaign,
    #[serde(alias = "intrusion-set")]
    Group,
    Malware,
    Indicator,
}

impl ObjectKind {
    /// Kinds imported when the configuration does not say otherwise.
    /// Indicators are opt-in.
    pub const DEFAULT_RUN: [ObjectKind; 4] = [
        ObjectKind::AttackPattern,
        ObjectKind::Campaign,
        ObjectKind::Group,
        ObjectKind::Malware,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::AttackPattern => "attack-pattern",
            ObjectKind::Campaign => "campaign",
            ObjectKind::Group => "group",
            ObjectKind::Malware => "malware",
            ObjectKind::Indicator => "indicator",
        }
    }

    /// Suffix of the KV key marking this kind's database as created.
    pub fn marker_key(&self) -> &'static str {
        match self {
            ObjectKind::AttackPattern => "attack-patterns",
            ObjectKind::Campaign => "campaigns",
            ObjectKind::Group => "groups",
            ObjectKind::Malware => "malware",
            ObjectKind::Indicator => "indicators",
        }
    }

    /// Human label used in progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            ObjectKind::AttackPattern => "attack pattern",
            ObjectKind::Campaign => "campaign",
            ObjectKind::Group => "APT group",
            ObjectKind::Malware => "malware",
            ObjectKind::Indicator => "indicator",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attack-pattern" => Ok(ObjectKind::AttackPattern),
            "campaign" => Ok(ObjectKind::Campaign),
            "group" | "intrusion-set" => Ok(ObjectKind::Group),
            "malware" => Ok(ObjectKind::Malware),
            "indicator" => Ok(ObjectKind::Indicator),
            other => Err(format!("unknown object kind {other}")),
        }
    }
}

/// Stored per bot after a successful OAuth exchange. Replaced wholesale on re-auth.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub token: String,
    pub parent_page_id: String,
    #[serde(default)]
    pub workspace_name: Option<String>,
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("parent_page_id", &self.parent_page_id)
            .field("workspace_name", &self.workspace_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_config_names() {
        assert_eq!("campaign".parse::<ObjectKind>().unwrap(), ObjectKind::Campaign);
        assert_eq!("intrusion-set".parse::<ObjectKind>().unwrap(), ObjectKind::Group);
        assert!("threat-actor".parse::<ObjectKind>().is_err());

        let kinds: Vec<ObjectKind> =
            serde_yaml::from_str("[attack-pattern, intrusion-set, indicator]").unwrap();
        assert_eq!(
            kinds,
            vec![ObjectKind::AttackPattern, ObjectKind::Group, ObjectKind::Indicator]
        );
    }

    #[test]
    fn connection_record_debug_hides_token() {
        let rec = ConnectionRecord {
            token: "secret_abc".into(),
            parent_page_id: "page-1".into(),
            workspace_name: None,
        };
        let shown = format!("{rec:?}");
        assert!(!shown.contains("secret_abc"));
        assert!(shown.contains("page-1"));
    }
}

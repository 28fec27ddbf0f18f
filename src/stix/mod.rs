//! In-memory index over a STIX2 bundle.
//!
//! Only the ATT&CK object types the importer maps are kept. Listings preserve
//! bundle order and exclude revoked or deprecated objects.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

pub mod model;

pub use model::{
    AttackPattern, Campaign, Common, ExternalReference, IntrusionSet, Indicator, KillChainPhase,
    Malware,
};

#[derive(Deserialize)]
struct Bundle {
    #[serde(default)]
    objects: Vec<Value>,
}

#[derive(Debug, Default, Clone)]
pub struct Collection {
    attack_patterns: Vec<AttackPattern>,
    campaigns: Vec<Campaign>,
    intrusion_sets: Vec<IntrusionSet>,
    malware: Vec<Malware>,
    indicators: Vec<Indicator>,
    index: HashMap<String, usize>,
}

impl Collection {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let bundle: Bundle = serde_json::from_slice(bytes).context("invalid STIX bundle JSON")?;
        let mut out = Collection::default();
        let mut ignored = 0usize;
        for raw in bundle.objects {
            let typ = raw
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match typ.as_str() {
                "attack-pattern" => {
                    push(&mut out.attack_patterns, &mut out.index, raw, |o: &AttackPattern| {
                        &o.common
                    })
                }
                "campaign" => push(&mut out.campaigns, &mut out.index, raw, |o: &Campaign| &o.common),
                "intrusion-set" => {
                    push(&mut out.intrusion_sets, &mut out.index, raw, |o: &IntrusionSet| {
                        &o.common
                    })
                }
                "malware" => push(&mut out.malware, &mut out.index, raw, |o: &Malware| &o.common),
                "indicator" => {
                    push(&mut out.indicators, &mut out.index, raw, |o: &Indicator| &o.common)
                }
                _ => ignored += 1,
            }
        }
        debug!(ignored, "skipped unmapped STIX object types");
        Ok(out)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read STIX bundle {}", path.display()))?;
        let collection = Self::from_json(&bytes)
            .with_context(|| format!("failed to parse STIX bundle {}", path.display()))?;
        info!(
            path = %path.display(),
            attack_patterns = collection.attack_patterns.len(),
            campaigns = collection.campaigns.len(),
            groups = collection.intrusion_sets.len(),
            malware = collection.malware.len(),
            indicators = collection.indicators.len(),
            "loaded STIX bundle"
        );
        Ok(collection)
    }

    pub fn attack_patterns(&self) -> &[AttackPattern] {
        &self.attack_patterns
    }

    pub fn campaigns(&self) -> &[Campaign] {
        &self.campaigns
    }

    pub fn intrusion_sets(&self) -> &[IntrusionSet] {
        &self.intrusion_sets
    }

    pub fn malware(&self) -> &[Malware] {
        &self.malware
    }

    pub fn indicators(&self) -> &[Indicator] {
        &self.indicators
    }

    pub fn attack_pattern(&self, id: &str) -> Option<&AttackPattern> {
        self.lookup(id).and_then(|i| self.attack_patterns.get(i)).filter(|o| o.common.id == id)
    }

    pub fn campaign(&self, id: &str) -> Option<&Campaign> {
        self.lookup(id).and_then(|i| self.campaigns.get(i)).filter(|o| o.common.id == id)
    }

    pub fn intrusion_set(&self, id: &str) -> Option<&IntrusionSet> {
        self.lookup(id).and_then(|i| self.intrusion_sets.get(i)).filter(|o| o.common.id == id)
    }

    pub fn malware_by_id(&self, id: &str) -> Option<&Malware> {
        self.lookup(id).and_then(|i| self.malware.get(i)).filter(|o| o.common.id == id)
    }

    pub fn indicator(&self, id: &str) -> Option<&Indicator> {
        self.lookup(id).and_then(|i| self.indicators.get(i)).filter(|o| o.common.id == id)
    }

    fn lookup(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }
}

fn push<T, F>(list: &mut Vec<T>, index: &mut HashMap<String, usize>, raw: Value, common: F)
where
    T: DeserializeOwned,
    F: Fn(&T) -> &Common,
{
    let id = raw.get("id").and_then(Value::as_str).unwrap_or("<no id>").to_string();
    match serde_json::from_value::<T>(raw) {
        Ok(obj) => {
            let c = common(&obj);
            if !c.is_active() {
                debug!(%id, "skipping revoked or deprecated STIX object");
                return;
            }
            index.insert(c.id.clone(), list.len());
            list.push(obj);
        }
        Err(err) => warn!(%id, %err, "skipping malformed STIX object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle(objects: Vec<Value>) -> Vec<u8> {
        serde_json::to_vec(&json!({ "type": "bundle", "id": "bundle--1", "objects": objects }))
            .unwrap()
    }

    #[test]
    fn dispatches_on_type_in_bundle_order() {
        let bytes = bundle(vec![
            json!({"type": "campaign", "id": "campaign--b", "name": "Second", "created": "2023-01-02T00:00:00.000Z"}),
            json!({"type": "identity", "id": "identity--x", "name": "MITRE"}),
            json!({"type": "campaign", "id": "campaign--a", "name": "First"}),
            json!({"type": "intrusion-set", "id": "intrusion-set--1", "name": "APT29", "aliases": ["Cozy Bear"]}),
            json!({"type": "malware", "id": "malware--1", "name": "Mimikatz", "is_family": true, "malware_types": ["tool"]}),
            json!({"type": "attack-pattern", "id": "attack-pattern--1", "name": "Phishing",
                   "external_references": [{"source_name": "mitre-attack", "external_id": "T1566", "url": "https://attack.mitre.org/techniques/T1566"}]}),
            json!({"type": "indicator", "id": "indicator--1", "pattern": "[file:name = 'x']", "pattern_type": "stix"}),
        ]);
        let c = Collection::from_json(&bytes).unwrap();
        let names: Vec<&str> = c.campaigns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Second", "First"]);
        assert_eq!(c.intrusion_sets()[0].aliases, vec!["Cozy Bear".to_string()]);
        assert!(c.malware()[0].is_family);
        assert_eq!(c.attack_patterns()[0].common.attack_id(), Some("T1566"));
        assert_eq!(c.indicators().len(), 1);
        assert!(c.campaigns()[0].common.created.is_some());
    }

    #[test]
    fn revoked_deprecated_and_malformed_are_skipped() {
        let bytes = bundle(vec![
            json!({"type": "malware", "id": "malware--old", "name": "Old", "revoked": true}),
            json!({"type": "malware", "id": "malware--dep", "name": "Dep", "x_mitre_deprecated": true}),
            json!({"type": "malware", "id": "malware--bad"}),
            json!({"type": "malware", "id": "malware--ok", "name": "Ok"}),
        ]);
        let c = Collection::from_json(&bytes).unwrap();
        assert_eq!(c.malware().len(), 1);
        assert_eq!(c.malware()[0].common.id, "malware--ok");
        assert!(c.malware_by_id("malware--old").is_none());
    }

    #[test]
    fn lookup_by_id_respects_type() {
        let bytes = bundle(vec![
            json!({"type": "campaign", "id": "campaign--1", "name": "C"}),
            json!({"type": "malware", "id": "malware--1", "name": "M"}),
        ]);
        let c = Collection::from_json(&bytes).unwrap();
        assert_eq!(c.campaign("campaign--1").map(|o| o.name.as_str()), Some("C"));
        assert!(c.malware_by_id("campaign--1").is_none());
        assert!(c.campaign("campaign--missing").is_none());
    }

    #[test]
    fn rejects_non_json() {
        assert!(Collection::from_json(b"not json").is_err());
    }
}

//! Offline input for `kxds translate`: Services and Endpoints from YAML or JSON.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Default)]
pub struct Manifests {
    pub services: Vec<Service>,
    pub endpoints: Vec<Endpoints>,
}

impl Manifests {
    /// Parse every document of a multi-document stream. `List` documents are flattened;
    /// kinds other than Service and Endpoints are skipped with a warning.
    pub fn parse(text: &str) -> Result<Self> {
        let mut out = Self::default();
        for (idx, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let value = serde_yaml::Value::deserialize(doc).with_context(|| format!("document {}", idx + 1))?;
            out.add(value, idx + 1)?;
        }
        Ok(out)
    }

    fn add(&mut self, value: serde_yaml::Value, doc: usize) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or_default().to_string();
        match kind.as_str() {
            "Service" => self.services.push(serde_yaml::from_value(value).with_context(|| format!("document {doc}: Service"))?),
            "Endpoints" => {
                self.endpoints.push(serde_yaml::from_value(value).with_context(|| format!("document {doc}: Endpoints"))?)
            }
            k if k.ends_with("List") => {
                if let Some(items) = value.get("items").and_then(|i| i.as_sequence()) {
                    for item in items.clone() {
                        self.add(item, doc)?;
                    }
                }
            }
            other => warn!(doc, kind = other, "skipping unsupported document"),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.endpoints.is_empty()
    }
}

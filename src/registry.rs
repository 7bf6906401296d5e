//! Provider registry: YAML definitions resolved against an environment
//! snapshot into a validated lookup table.
//!
//! Building is a pure function of (raw file, env snapshot). Entries whose
//! `${VAR}` credentials cannot be resolved are excluded with a recorded
//! reason rather than failing the whole load, so a partially configured
//! deployment still serves the providers it has secrets for.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::models::provider::ProviderConfig;

#[derive(Debug, Default, Deserialize)]
pub struct RawRegistry {
    #[serde(default)]
    pub providers: BTreeMap<String, RawProvider>,
}

#[derive(Debug, Deserialize)]
pub struct RawProvider {
    #[serde(default)]
    pub display_name: Option<String>,
    pub base_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

/// Outcome of a registry build: what loaded and what was excluded, per entry.
pub struct RegistryLoad {
    pub registry: ProviderRegistry,
    pub skipped: Vec<SkippedProvider>,
}

pub struct SkippedProvider {
    pub slug: String,
    pub reason: String,
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn get(&self, slug: &str) -> Option<&ProviderConfig> {
        self.providers.get(slug)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

pub fn load_file(path: &Path) -> anyhow::Result<RawRegistry> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read providers file {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("cannot parse providers file {}", path.display()))
}

/// Snapshot of the process environment, taken once at startup.
pub fn env_snapshot() -> HashMap<String, String> {
    std::env::vars().collect()
}

pub fn build(raw: RawRegistry, env: &HashMap<String, String>) -> RegistryLoad {
    let mut providers = BTreeMap::new();
    let mut skipped = Vec::new();

    for (slug, entry) in raw.providers {
        match resolve_entry(&slug, entry, env) {
            Ok(cfg) => {
                providers.insert(slug, cfg);
            }
            Err(reason) => skipped.push(SkippedProvider { slug, reason }),
        }
    }

    RegistryLoad {
        registry: ProviderRegistry { providers },
        skipped,
    }
}

fn resolve_entry(
    slug: &str,
    entry: RawProvider,
    env: &HashMap<String, String>,
) -> Result<ProviderConfig, String> {
    let client_id = resolve_value(&entry.client_id, env)
        .ok_or_else(|| format!("client_id '{}' is not set", entry.client_id))?;
    let client_secret = resolve_value(&entry.client_secret, env)
        .ok_or_else(|| format!("client_secret '{}' is not set", entry.client_secret))?;

    Ok(ProviderConfig {
        slug: slug.to_string(),
        display_name: entry.display_name.unwrap_or_else(|| slug.to_string()),
        base_url: entry.base_url.trim_end_matches('/').to_string(),
        auth_url: entry.auth_url,
        token_url: entry.token_url,
        client_id,
        client_secret,
        scopes: entry.scopes,
        extra_params: entry.extra_params,
    })
}

/// `${VAR}` values come from the snapshot; anything else passes through
/// literally. Empty values count as unset.
fn resolve_value(value: &str, env: &HashMap<String, String>) -> Option<String> {
    match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        Some(var) => env.get(var).filter(|v| !v.is_empty()).cloned(),
        None => {
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        }
    }
}

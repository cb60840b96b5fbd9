//! Loading and validating simulator configuration files.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::model::SimulatorConfig;
use crate::RuntimeError;

/// A parsed configuration plus the semantic problems found in it.
///
/// Problems do not stop loading: the simulator still runs what it can and
/// a front end shows `errors` next to the configuration summary.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadResult {
    pub config: SimulatorConfig,
    pub errors: Vec<String>,
}

impl ConfigLoadResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Read a JSON configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ConfigLoadResult, RuntimeError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| RuntimeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let result = parse_config(&text)?;
    tracing::info!(
        path = %path.display(),
        interfaces = result.config.interfaces.len(),
        telegrams = result.config.telegram_count(),
        errors = result.errors.len(),
        "loaded simulator configuration"
    );
    Ok(result)
}

/// Parse a JSON configuration document.
pub fn parse_config(json: &str) -> Result<ConfigLoadResult, RuntimeError> {
    let config: SimulatorConfig = serde_json::from_str(json)?;
    let errors = validate(&config);
    Ok(ConfigLoadResult { config, errors })
}

/// Semantic checks the JSON schema cannot express.
pub fn validate(config: &SimulatorConfig) -> Vec<String> {
    let mut errors = Vec::new();
    let dataset_ids: HashSet<u32> = config.datasets.iter().map(|d| d.id).collect();

    for iface in &config.interfaces {
        if let Err(err) = parse_ipv4(&iface.host_ip) {
            errors.push(format!("interface '{}': host {err}", iface.name));
        }
        if !iface.leader_ip.trim().is_empty() {
            if let Err(err) = parse_ipv4(&iface.leader_ip) {
                errors.push(format!("interface '{}': leader {err}", iface.name));
            }
        }

        let mut seen = HashSet::new();
        for telegram in &iface.telegrams {
            if telegram.com_id == 0 {
                errors.push(format!("interface '{}': telegram with com id 0", iface.name));
            }
            if !seen.insert(telegram.com_id) {
                errors.push(format!(
                    "interface '{}': duplicate com id {}",
                    iface.name, telegram.com_id
                ));
            }
            if telegram.dataset_id != 0 && !dataset_ids.contains(&telegram.dataset_id) {
                errors.push(format!(
                    "interface '{}': com id {} references unknown dataset {}",
                    iface.name, telegram.com_id, telegram.dataset_id
                ));
            }
        }
    }

    for mapping in &config.com_id_dataset_mappings {
        if !dataset_ids.contains(&mapping.dataset_id) {
            errors.push(format!(
                "com id {} is mapped to unknown dataset {}",
                mapping.com_id, mapping.dataset_id
            ));
        }
    }

    errors
}

/// Parse a dotted-quad IPv4 address, ignoring surrounding whitespace.
pub fn parse_ipv4(text: &str) -> Result<Ipv4Addr, RuntimeError> {
    text.trim()
        .parse()
        .map_err(|_| RuntimeError::InvalidAddress(text.to_string()))
}

//! Configuration model: interfaces, telegrams, datasets.
//!
//! Plain data, immutable once loaded. Field names serialize in camelCase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One source or destination endpoint of a telegram.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramEndpoint {
    pub id: u32,
    pub uri_user: String,
    pub uri_host: String,
}

impl TelegramEndpoint {
    pub fn host(uri_host: impl Into<String>) -> Self {
        Self {
            uri_host: uri_host.into(),
            ..Self::default()
        }
    }
}

/// Exchange-type tag of a telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExchangeType {
    Source,
    Sink,
    SourceSink,
    #[default]
    Unset,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Source => "source",
            ExchangeType::Sink => "sink",
            ExchangeType::SourceSink => "source+sink",
            ExchangeType::Unset => "unset",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source" => Ok(ExchangeType::Source),
            "sink" => Ok(ExchangeType::Sink),
            "source+sink" | "sourcesink" | "source-sink" => Ok(ExchangeType::SourceSink),
            "unset" | "" => Ok(ExchangeType::Unset),
            other => Err(format!("unknown exchange type '{other}'")),
        }
    }
}

impl TryFrom<String> for ExchangeType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExchangeType> for String {
    fn from(value: ExchangeType) -> Self {
        value.as_str().to_string()
    }
}

/// A configured PD exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    pub com_id: u32,
    /// Display name, optional.
    pub name: String,
    pub dataset_id: u32,
    pub com_par_id: u32,
    pub exchange_type: ExchangeType,
    pub create_endpoint: bool,
    pub service_id: u32,
    /// PD cycle time in microseconds, when the configuration carries one.
    pub cycle_time_us: Option<u32>,
    pub destinations: Vec<TelegramEndpoint>,
    pub sources: Vec<TelegramEndpoint>,
}

/// One network interface and the telegrams exchanged on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterfaceConfig {
    pub name: String,
    pub network_id: u8,
    pub host_ip: String,
    pub leader_ip: String,
    pub telegrams: Vec<TelegramConfig>,
}

fn default_array_size() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetElement {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default = "default_array_size")]
    pub array_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dataset {
    pub id: u32,
    pub name: String,
    pub elements: Vec<DatasetElement>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComIdDatasetMapping {
    pub com_id: u32,
    pub dataset_id: u32,
}

/// Everything the simulator needs from a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorConfig {
    pub interfaces: Vec<InterfaceConfig>,
    pub datasets: Vec<Dataset>,
    pub com_id_dataset_mappings: Vec<ComIdDatasetMapping>,
}

impl SimulatorConfig {
    pub fn telegram_count(&self) -> usize {
        self.interfaces.iter().map(|i| i.telegrams.len()).sum()
    }

    pub fn dataset(&self, id: u32) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.id == id)
    }

    /// Dataset carried by `com_id`: the explicit mapping wins, else the
    /// first telegram with that com id.
    pub fn dataset_for_com_id(&self, com_id: u32) -> Option<&Dataset> {
        let dataset_id = self
            .com_id_dataset_mappings
            .iter()
            .find(|m| m.com_id == com_id)
            .map(|m| m.dataset_id)
            .or_else(|| {
                self.interfaces
                    .iter()
                    .flat_map(|i| i.telegrams.iter())
                    .find(|t| t.com_id == com_id)
                    .map(|t| t.dataset_id)
            })?;
        self.dataset(dataset_id)
    }
}

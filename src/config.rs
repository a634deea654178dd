//! Game configuration: the YAML-supplied tree of teams, virtual machines and
//! their services, validated before the engine touches the store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::addr::{self, AddrError};
use crate::probes;

/// Infrastructure VMs that every game must declare.
const OFFICIAL_VMS: [&str; 3] = ["router", "scorer", "dns"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration missing required {0:?} section")]
    MissingSection(&'static str),

    #[error("there must be at least one virtual machine defined")]
    NoVirtualMachines,

    #[error("official-virtual-machines is missing required entries: {}", .0.join(", "))]
    MissingOfficialVms(Vec<String>),

    #[error("team {team:?} has invalid id {id}; ids start at 1")]
    InvalidTeamId { team: String, id: i64 },

    #[error("invalid ip-schema for virtual machine {vm}: {source}")]
    InvalidIpSchema {
        vm: String,
        #[source]
        source: AddrError,
    },

    #[error("virtual machine {0} must define at least one service or provide a config file")]
    NoServices(String),

    #[error("service {service} in virtual machine {vm} does not define a port")]
    PortMissing { vm: String, service: String },

    #[error("service {service} in virtual machine {vm} is not a known service kind")]
    UnknownServiceKind { vm: String, service: String },

    #[error("service kind {service} in virtual machine {vm} may not contain an underscore")]
    ServiceKindUnderscore { vm: String, service: String },
}

#[derive(Clone, Debug, Deserialize)]
pub struct TeamConfig {
    pub id: i64,
    pub name: String,
    pub password: String,
    pub color: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OfficialVm {
    pub ip: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceConfig {
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// Depending on the service kind: credentials file, expected web page,
    /// DNS query file or SQL schema file.
    #[serde(default)]
    pub query_file: Option<PathBuf>,
    /// Directory of payload files for the FTP round-trip kinds.
    #[serde(default)]
    pub query_dir: Option<PathBuf>,

    #[serde(default = "default_award")]
    pub award: i64,
    /// Reserved for partial-credit probes; no probe consults it yet.
    #[serde(default)]
    pub partial: bool,
}

fn default_award() -> i64 {
    1
}

#[derive(Clone, Debug, Deserialize)]
struct RawVm {
    #[serde(rename = "ip-schema")]
    ip_schema: String,
    #[serde(default)]
    services: HashMap<String, ServiceConfig>,
    #[serde(default)]
    config: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "virtual-machines")]
    virtual_machines: Option<HashMap<String, RawVm>>,
    #[serde(rename = "official-virtual-machines")]
    official_virtual_machines: Option<HashMap<String, OfficialVm>>,
    teams: Option<HashMap<String, TeamConfig>>,
}

#[derive(Clone, Debug)]
pub struct VmConfig {
    pub ip_schema: String,
    pub services: HashMap<String, ServiceConfig>,
}

/// The validated configuration, shared read-only after init.
#[derive(Clone, Debug)]
pub struct GameConfig {
    pub virtual_machines: HashMap<String, VmConfig>,
    pub official_virtual_machines: HashMap<String, OfficialVm>,
    pub teams: HashMap<String, TeamConfig>,
}

impl GameConfig {
    /// Loads and validates the main configuration file. External service maps
    /// referenced by a VM's `config` pointer are read from `config_dir`.
    pub fn load(config_dir: &Path, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = read_yaml(path)?;

        let virtual_machines = raw
            .virtual_machines
            .ok_or(ConfigError::MissingSection("virtual-machines"))?;
        let teams = raw.teams.ok_or(ConfigError::MissingSection("teams"))?;
        let official_virtual_machines = raw
            .official_virtual_machines
            .ok_or(ConfigError::MissingSection("official-virtual-machines"))?;

        if virtual_machines.is_empty() {
            return Err(ConfigError::NoVirtualMachines);
        }

        let missing: Vec<String> = OFFICIAL_VMS
            .iter()
            .filter(|name| !official_virtual_machines.contains_key(**name))
            .map(|name| (*name).to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingOfficialVms(missing));
        }

        for (key, team) in &teams {
            if team.id < 1 {
                return Err(ConfigError::InvalidTeamId {
                    team: key.clone(),
                    id: team.id,
                });
            }
        }

        let mut resolved = HashMap::with_capacity(virtual_machines.len());
        for (vm_name, vm) in virtual_machines {
            addr::validate_schema(&vm.ip_schema).map_err(|source| {
                ConfigError::InvalidIpSchema {
                    vm: vm_name.clone(),
                    source,
                }
            })?;

            let services = if vm.services.is_empty() {
                let pointer = vm
                    .config
                    .as_deref()
                    .ok_or_else(|| ConfigError::NoServices(vm_name.clone()))?;
                read_yaml(&config_dir.join(pointer))?
            } else {
                vm.services
            };
            validate_services(&vm_name, &services)?;

            resolved.insert(
                vm_name,
                VmConfig {
                    ip_schema: vm.ip_schema,
                    services,
                },
            );
        }

        Ok(GameConfig {
            virtual_machines: resolved,
            official_virtual_machines,
            teams,
        })
    }

    pub fn vm(&self, name: &str) -> Option<&VmConfig> {
        self.virtual_machines.get(name)
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_services(
    vm_name: &str,
    services: &HashMap<String, ServiceConfig>,
) -> Result<(), ConfigError> {
    if services.is_empty() {
        return Err(ConfigError::NoServices(vm_name.to_owned()));
    }

    for (kind, service) in services {
        if service.port == 0 {
            return Err(ConfigError::PortMissing {
                vm: vm_name.to_owned(),
                service: kind.clone(),
            });
        }
        if kind.contains('_') {
            return Err(ConfigError::ServiceKindUnderscore {
                vm: vm_name.to_owned(),
                service: kind.clone(),
            });
        }
        if !probes::known_kind(kind) {
            return Err(ConfigError::UnknownServiceKind {
                vm: vm_name.to_owned(),
                service: kind.clone(),
            });
        }
    }
    Ok(())
}

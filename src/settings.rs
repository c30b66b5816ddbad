// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use config::{Config, ConfigError, File};
use lazy_static::*;
use log::*;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, metadata, File as FsFile};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use struct_field_names_as_array::FieldNamesAsArray;

lazy_static! {
    pub static ref SETTINGS: Settings = match Settings::new() {
        Ok(settings) => settings,
        Err(err) => panic!("Failed to load settings: {err}"),
    };
}

const ENV_PREFIX: &str = "postref";

#[derive(Debug, Clone, Serialize, Deserialize, Default, FieldNamesAsArray)]
pub struct Settings {
    /// HTTP server settings.
    pub http: Http,

    /// Storage settings.
    pub storage: Storage,

    /// Referral reward settings.
    pub referrals: Referrals,

    /// Tracing export settings.
    pub telemetry: Telemetry,
}

impl Settings {
    /// Loads settings from `<config dir>/Postref/config.toml`, writing the
    /// defaults there first if the file does not exist.
    pub fn new() -> Result<Self, ConfigError> {
        let mut config_path = dirs::config_dir()
            .ok_or_else(|| ConfigError::Message("could not find config directory".to_owned()))?;
        config_path.push("Postref");
        config_path.push("config.toml");

        if metadata(&config_path).is_err() {
            write_default_config(&config_path);
        }

        Self::load_from(&config_path)
    }

    /// Loads settings from the given file, falling back to defaults for
    /// anything it does not set. Environment variables of the form
    /// `POSTREF_<SECTION>_<FIELDWITHOUTUNDERSCORES>` override both.
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        let env_source: Vec<_> = std::env::vars().collect();
        let mut s = Config::builder()
            .add_source(File::from(config_path.to_path_buf()).required(false));

        // Set defaults
        let default_settings = Settings::default();
        let defaults: HashMap<String, HashMap<String, DynamicConfVal>> = serde_yaml::to_value(
            &default_settings,
        )
        .and_then(serde_yaml::from_value)
        .map_err(|err| ConfigError::Message(err.to_string()))?;

        for (k1, inner) in &defaults {
            for (k2, v) in inner {
                let key = format!("{k1}.{k2}");
                match v {
                    DynamicConfVal::String(v) => {
                        s = s.set_default(key, v.as_str())?;
                    }

                    DynamicConfVal::Bool(v) => {
                        s = s.set_default(key, v.to_string())?;
                    }

                    DynamicConfVal::U16(v) => {
                        s = s.set_default(key, v.to_string())?;
                    }

                    DynamicConfVal::U64(v) => {
                        s = s.set_default(key, v.to_string())?;
                    }
                }
            }
        }

        // Make sure to list these in order
        let settings_modules: Vec<_> = vec![
            Http::FIELD_NAMES_AS_ARRAY,
            Storage::FIELD_NAMES_AS_ARRAY,
            Referrals::FIELD_NAMES_AS_ARRAY,
            Telemetry::FIELD_NAMES_AS_ARRAY,
        ];

        // Gather all possible settings keys
        let possible_keys: HashMap<String, &str> = Settings::FIELD_NAMES_AS_ARRAY
            .iter()
            .enumerate()
            .flat_map(|(i, field)| {
                settings_modules[i].iter().map(move |nested| {
                    (
                        format!("{}_{}_{}", ENV_PREFIX, field, nested.replace('_', "")),
                        *nested,
                    )
                })
            })
            .collect();

        // Parse env vars manually and set overrides if they exist as the
        // config package `Environment` module seems to behave poorly.
        for (k, v) in &env_source {
            let k = k.to_lowercase();

            if let Some(k_postfix) = possible_keys.get(&k) {
                let mut k: Vec<_> = k.split('_').filter(|x| x != &ENV_PREFIX).collect();
                if let Some(last) = k.last_mut() {
                    *last = *k_postfix;
                }
                let k = k.join(".");

                // Filter empty values
                if v.as_str() == "" {
                    continue;
                }

                s = s.set_override(k, v.as_str())?;
            }
        }

        s.build()?.try_deserialize()
    }

    /// Startup sanity checks on values the type system does not cover.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.listen_port == 0 {
            return Err(ConfigError::Message(
                "http.listen_port cannot be 0".to_owned(),
            ));
        }

        match Decimal::from_str(self.referrals.reward_per_referral.trim()) {
            Ok(reward) if reward.is_sign_negative() => Err(ConfigError::Message(
                "referrals.reward_per_referral cannot be negative".to_owned(),
            )),
            Ok(_) => Ok(()),
            Err(err) => Err(ConfigError::Message(format!(
                "invalid referrals.reward_per_referral: {err}"
            ))),
        }
    }
}

fn write_default_config(config_path: &Path) {
    let settings_str = match toml::ser::to_string_pretty(&Settings::default()) {
        Ok(s) => s,
        Err(err) => {
            error!("Failed to serialize default configuration! Reason: {:#?}", err);
            return;
        }
    };

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).unwrap_or(());
    }

    // Create configuration file
    match FsFile::create(config_path) {
        Ok(mut file) => {
            file.write_all(settings_str.as_bytes()).unwrap_or(());
        }
        Err(err) => {
            // If this fails, do nothing and fall back to envionment variables
            error!("Failed to create configuration! Reason: {:#?}", err);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Http {
    /// Listen address.
    #[serde(alias = "listenaddr")]
    pub listen_addr: String,

    /// Listen port.
    #[serde(alias = "listenport")]
    pub listen_port: u16,

    /// Username for the admin endpoints.
    #[serde(alias = "adminusername")]
    pub admin_username: String,

    /// Password for the admin endpoints.
    #[serde(alias = "adminpassword")]
    pub admin_password: String,

    /// Number of runtime worker threads.
    ///
    /// Default is 0 which means the number of cores of the system
    #[serde(alias = "workerthreads")]
    pub worker_threads: u16,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_owned(),
            listen_port: 8070,
            admin_username: "postref".to_owned(),
            admin_password: hex::encode(rand::thread_rng().gen::<[u8; 16]>()),
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Storage {
    /// Data directory
    #[serde(alias = "datadir")]
    pub data_dir: String,

    /// If specified, we won't be storing anything to disk.
    #[serde(alias = "memoryonly")]
    pub memory_only: bool,
}

impl Default for Storage {
    fn default() -> Self {
        let mut path = dirs::data_dir()
            .or_else(dirs::config_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("Postref");

        Self {
            data_dir: path.to_string_lossy().into_owned(),
            memory_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Referrals {
    /// Reward credited per valid referral, as a decimal string.
    #[serde(alias = "rewardperreferral")]
    pub reward_per_referral: String,

    /// A visit is engaged above this many milliseconds on the page.
    #[serde(alias = "mintimespentms")]
    pub min_time_spent_ms: u64,

    /// A visit is engaged above this scroll depth, in percent.
    #[serde(alias = "minscrolldepth")]
    pub min_scroll_depth: u16,

    /// A visit is engaged above this many interactions.
    #[serde(alias = "mininteractions")]
    pub min_interactions: u64,
}

impl Default for Referrals {
    fn default() -> Self {
        Self {
            reward_per_referral: "10".to_owned(),
            min_time_spent_ms: 30_000,
            min_scroll_depth: 50,
            min_interactions: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Telemetry {
    /// Export traces to a local Jaeger agent.
    #[serde(alias = "jaegerenabled")]
    pub jaeger_enabled: bool,

    /// Service name reported to Jaeger.
    #[serde(alias = "servicename")]
    pub service_name: String,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            jaeger_enabled: false,
            service_name: "Postref".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DynamicConfVal {
    String(String),
    Bool(bool),
    U16(u16),
    U64(u64),
}

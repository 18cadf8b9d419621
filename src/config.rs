//! Runtime configuration from environment variables.
//! Defaults target a local Redis and the public OccupEye cloud endpoint.

use crate::client::ClientSettings;
use crate::codec;
use crate::keys::{DEFAULT_PREFIX, KeySchema};
use crate::services::history::DEFAULT_WINDOWS;
use crate::services::refresh::RefreshSettings;
use crate::store::records::{Coordinates, Location};
use crate::utils::{parse_id, parse_id_list};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";
pub const DEFAULT_OCCUPEYE_BASE_URL: &str = "https://cloud.occupeye.com/OccupEye";
pub const DEFAULT_REFRESH_SECS: u64 = 120;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_REQUEST_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub occupeye_base_url: String,
    pub occupeye_deployment: String,
    pub occupeye_username: String,
    pub occupeye_password: String,
    /// Cadence of the refresh loop.
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    pub store_timeout: Duration,
    pub max_request_retries: NonZeroU32,
    pub key_prefix: String,
    /// Write each cycle under a new generation and flip a pointer at the end.
    pub versioned_keys: bool,
    pub key_ttl_secs: Option<u64>,
    pub staff_survey_ids: BTreeSet<u64>,
    pub survey_locations: HashMap<u64, Location>,
    pub survey_locations_file: Option<PathBuf>,
    /// Averaging windows in days, ascending.
    pub history_windows: Vec<u32>,
    pub history_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct LocationEntry {
    lat: String,
    #[serde(rename = "long")]
    lng: String,
    #[serde(default)]
    address: Vec<String>,
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, String> {
    match lookup(name) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("Missing required environment variable {}", name)),
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Result<u64, String> {
    match lookup(name) {
        Some(s) if !s.trim().is_empty() => s
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("{} must be a non-negative integer", name)),
        _ => Ok(default),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    lookup(name)
        .map(|s| matches!(s.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_windows(raw: &str) -> Result<Vec<u32>, String> {
    let mut windows = Vec::new();
    for part in raw.split(',') {
        let w = part
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| format!("HISTORY_WINDOWS contains an invalid window: {:?}", part))?;
        windows.push(w);
    }
    windows.sort_unstable();
    windows.dedup();
    Ok(windows)
}

/// `{"<survey id>": {"lat": "...", "long": "...", "address": ["...", ...]}}`; up to four lines.
pub fn parse_locations(raw: &str) -> Result<HashMap<u64, Location>, String> {
    let entries: HashMap<String, LocationEntry> =
        codec::decode_json(raw).map_err(|e| format!("survey locations: {}", e))?;
    let mut out = HashMap::with_capacity(entries.len());
    for (id, entry) in entries {
        let survey = parse_id(&id).ok_or_else(|| format!("survey locations: bad survey id {:?}", id))?;
        let lat = codec::decode_decimal("lat", &entry.lat).map_err(|e| format!("survey {}: {}", survey, e))?;
        let lng = codec::decode_decimal("long", &entry.lng).map_err(|e| format!("survey {}: {}", survey, e))?;
        if entry.address.len() > 4 {
            return Err(format!("survey {}: at most four address lines", survey));
        }
        let mut address: [String; 4] = Default::default();
        for (slot, line) in address.iter_mut().zip(entry.address) {
            *slot = line;
        }
        out.insert(
            survey,
            Location {
                coordinates: Coordinates { lat, lng },
                address,
            },
        );
    }
    Ok(out)
}

fn load_locations(path: &Path) -> Result<HashMap<u64, Location>, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_locations(&raw)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        let occupeye_base_url = lookup("OCCUPEYE_BASE_URL").unwrap_or_else(|| DEFAULT_OCCUPEYE_BASE_URL.to_string());
        let occupeye_deployment = required(&lookup, "OCCUPEYE_DEPLOYMENT")?;
        let occupeye_username = required(&lookup, "OCCUPEYE_USERNAME")?;
        let occupeye_password = required(&lookup, "OCCUPEYE_PASSWORD")?;

        let refresh_secs = secs(&lookup, "REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_SECS)?;
        if refresh_secs == 0 {
            return Err("REFRESH_INTERVAL_SECS must be greater than zero".to_string());
        }
        let request_timeout = Duration::from_secs(secs(&lookup, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?.max(1));
        let store_timeout = Duration::from_secs(secs(&lookup, "STORE_TIMEOUT_SECS", DEFAULT_STORE_TIMEOUT_SECS)?.max(1));

        let retries = secs(&lookup, "MAX_REQUEST_RETRIES", u64::from(DEFAULT_MAX_REQUEST_RETRIES))?;
        let max_request_retries = u32::try_from(retries)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| "MAX_REQUEST_RETRIES must be between 1 and 4294967295".to_string())?;

        let key_prefix = match lookup("CACHE_KEY_PREFIX") {
            Some(p) if !p.trim().is_empty() => p.trim().to_string(),
            _ => DEFAULT_PREFIX.to_string(),
        };
        let versioned_keys = flag(&lookup, "CACHE_VERSIONED_KEYS", false);
        let key_ttl_secs = match secs(&lookup, "CACHE_KEY_TTL_SECS", 0)? {
            0 => None,
            n => Some(n),
        };
        match (versioned_keys, key_ttl_secs) {
            // old generations are only reclaimed by expiry
            (true, None) => {
                return Err("CACHE_VERSIONED_KEYS requires a non-zero CACHE_KEY_TTL_SECS".to_string());
            }
            // the previous generation must outlive one full cycle
            (true, Some(ttl)) if ttl < 2 * refresh_secs => {
                return Err(format!(
                    "CACHE_KEY_TTL_SECS ({}) must be at least twice REFRESH_INTERVAL_SECS ({}) with versioned keys",
                    ttl, refresh_secs
                ));
            }
            _ => {}
        }

        let staff_survey_ids = match lookup("STAFF_SURVEY_IDS") {
            Some(s) if !s.trim().is_empty() => parse_id_list(&s)
                .map_err(|bad| format!("STAFF_SURVEY_IDS contains an invalid id: {:?}", bad))?
                .into_iter()
                .collect(),
            _ => BTreeSet::new(),
        };

        let survey_locations_file = lookup("SURVEY_LOCATIONS_FILE")
            .filter(|s| !s.trim().is_empty())
            .map(|s| PathBuf::from(s.trim()));
        let survey_locations = match &survey_locations_file {
            Some(path) => load_locations(path)?,
            None => HashMap::new(),
        };

        let history_windows = match lookup("HISTORY_WINDOWS") {
            Some(s) if !s.trim().is_empty() => parse_windows(&s)?,
            _ => DEFAULT_WINDOWS.to_vec(),
        };
        let history_enabled = flag(&lookup, "HISTORY_ENABLED", true);

        Ok(Config {
            redis_url,
            occupeye_base_url,
            occupeye_deployment,
            occupeye_username,
            occupeye_password,
            refresh_interval: Duration::from_secs(refresh_secs),
            request_timeout,
            store_timeout,
            max_request_retries,
            key_prefix,
            versioned_keys,
            key_ttl_secs,
            staff_survey_ids,
            survey_locations,
            survey_locations_file,
            history_windows,
            history_enabled,
        })
    }

    pub fn key_schema(&self) -> KeySchema {
        if self.versioned_keys {
            KeySchema::versioned(self.key_prefix.clone())
        } else {
            KeySchema::new(self.key_prefix.clone())
        }
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            staff_surveys: self.staff_survey_ids.clone(),
            locations: self.survey_locations.clone(),
            key_ttl_secs: self.key_ttl_secs,
            history_windows: self.history_windows.clone(),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.occupeye_base_url.clone(),
            deployment: self.occupeye_deployment.clone(),
            username: self.occupeye_username.clone(),
            password: self.occupeye_password.clone(),
            timeout: self.request_timeout,
            max_retries: self.max_request_retries,
        }
    }
}

//! Environment-backed configuration.
//!
//! Everything is read once at boot from the process environment (`.env`
//! supported via dotenv). Defaults match a useful dev setup; production
//! overrides each knob individually.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use serde::Deserialize;

/// Parse an env var, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_or_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Gold price feed + alert thresholds.
#[derive(Debug, Clone)]
pub struct GoldConfig {
    /// JD finance latest-price endpoint
    pub api_url: String,
    /// Extra request headers, `{"name": "value"}` JSON in the env
    pub api_headers: HashMap<String, String>,
    /// Query params, same encoding
    pub api_params: HashMap<String, String>,
    /// Window size for trend analysis
    pub sample_count: i64,
    /// Notify when a rising trend gains at least this much within the window
    pub target_rise_price: f64,
    /// Notify when a falling trend loses at least this much within the window
    pub target_fall_price: f64,
    /// Notify when the latest price is at or above this level
    pub rise_to_target_price: f64,
    /// Notify when the latest price is at or below this level
    pub fall_to_target_price: f64,
    /// Counter TTL in seconds, reset on every write
    pub duplicate_notify_time_limit: u64,
    /// Repeat budget per alert condition
    pub duplicate_notify_times: u32,
}

impl GoldConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: env_or_str(
                "JD_FINANCE_API_URL",
                "https://ms.jr.jd.com/gw/generic/hj/h5/m/latestPrice",
            ),
            api_headers: env_json_map("JD_FINANCE_API_HEADERS"),
            api_params: env_json_map("JD_FINANCE_API_PARAMS"),
            sample_count: env_or("SAMPLE_COUNT", 20),
            target_rise_price: env_or("TARGET_RISE_PRICE", 2.0),
            target_fall_price: env_or("TARGET_FALL_PRICE", 2.0),
            rise_to_target_price: env_or("RISE_TO_TARGET_PRICE", 400.0),
            fall_to_target_price: env_or("FALL_TO_TARGET_PRICE", 365.0),
            duplicate_notify_time_limit: env_or("DUPLICATE_NOTIFY_TIME_LIMIT", 90),
            duplicate_notify_times: env_or("DUPLICATE_NOTIFY_TIMES", 3),
        }
    }
}

/// One tracked hospital reservation filter set.
///
/// Configured as a JSON array under `HOSPITAL_RESERVE`, one object per
/// hospital/doctor combination being watched.
#[derive(Debug, Clone, Deserialize)]
pub struct ReserveProfile {
    #[serde(default = "default_app_id")]
    pub app_id: i64,
    /// Comma-separated department allow-list
    #[serde(default)]
    pub dept_codes: String,
    /// Comma-separated doctor work numbers to poll
    #[serde(default)]
    pub doctor_work_nums: String,
    #[serde(default = "default_register_type")]
    pub register_type: String,
    #[serde(default = "default_register_type")]
    pub appointment_type: String,
    /// Skip slots priced above this
    #[serde(default)]
    pub price_limit: f64,
    #[serde(default = "default_reserve_notify_times")]
    pub duplicate_notify_times: u32,
    #[serde(default = "default_reserve_time_limit")]
    pub duplicate_notify_time_limit: u64,
}

fn default_app_id() -> i64 {
    501107
}

fn default_register_type() -> String {
    "1,2,5,6,7,9,I,J,M,K,W,Y,R,8".to_string()
}

fn default_reserve_notify_times() -> u32 {
    1
}

fn default_reserve_time_limit() -> u64 {
    7200
}

impl ReserveProfile {
    /// Split a comma-separated config field, dropping empty segments.
    pub fn split_csv(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }
}

/// WeCom app credentials for outbound notifications.
#[derive(Debug, Clone)]
pub struct WeChatConfig {
    pub corp_id: String,
    pub corp_secret: String,
    pub agent_id: i64,
}

impl WeChatConfig {
    pub fn from_env() -> Self {
        Self {
            corp_id: env_or_str("WECHAT_CORP_ID", ""),
            corp_secret: env_or_str("WECHAT_CORP_SECRET", ""),
            agent_id: env_or("WECHAT_AGENT_ID", 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub project_name: String,
    pub runtime_env: String,
    pub gold: GoldConfig,
    pub reserves: Vec<ReserveProfile>,
    pub wechat: WeChatConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            project_name: env_or_str("PROJECT_NAME", "alert-bot"),
            runtime_env: env_or_str("RUNTIME_ENV", "dev"),
            gold: GoldConfig::from_env(),
            reserves: env_json("HOSPITAL_RESERVE"),
            wechat: WeChatConfig::from_env(),
        }
    }

    /// Cache key prefix shared by every dedup counter this instance writes.
    pub fn cache_prefix(&self) -> String {
        format!("{}-{}", self.project_name, self.runtime_env)
    }
}

fn env_json<T: serde::de::DeserializeOwned + Default>(key: &str) -> T {
    match env::var(key) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("ignoring malformed {key}: {e}");
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

fn env_json_map(key: &str) -> HashMap<String, String> {
    env_json(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_drops_empty_segments() {
        assert_eq!(
            ReserveProfile::split_csv("0102,,0203, "),
            vec!["0102".to_string(), "0203".to_string()]
        );
        assert!(ReserveProfile::split_csv("").is_empty());
    }

    #[test]
    fn reserve_profile_defaults() {
        let profile: ReserveProfile = serde_json::from_str(r#"{"dept_codes": "0102"}"#).unwrap();
        assert_eq!(profile.app_id, 501107);
        assert_eq!(profile.duplicate_notify_times, 1);
        assert_eq!(profile.duplicate_notify_time_limit, 7200);
        assert_eq!(profile.price_limit, 0.0);
    }
}

// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : item_market_pricer — async item-market pricing engine in Rust
Module  : config.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
License : MIT (see LICENSE)

Summary : Resolves pasted inventory text to item ids (fuzzy match), pulls
          sell listings through a token-bucket rate limiter, strips anchor
          price levels with robust statistics, classifies the book and
          recommends fast-sell / fair / greedy prices.
=============================================================================
*/
use dotenvy::dotenv;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::{env, str::FromStr, time::Duration};
use thiserror::Error;

use crate::cleaner::CleanerCfg;
use crate::domain::Credential;
use crate::pricing::PricingCfg;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("missing credential (set API_KEY or pass --api-key)")]
    MissingCredential,
    #[error(transparent)]
    Dictionary(#[from] crate::dictionary::DictionaryError),
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { key, reason: reason.into() }
}

#[derive(Clone, Debug)]
pub struct Settings {
    // dictionary / matching
    pub dictionary_path: String,
    pub match_threshold: u8,

    // upstream
    pub base_url: String,
    pub api_key: Option<Credential>,
    pub page_size: usize,
    pub max_listings: usize,
    pub request_timeout: Duration,
    pub item_timeout: Duration,
    pub retries: u32,

    // throttle
    pub rate_per_min: u32,
    pub burst: u32,
    pub workers: usize,

    // output / service
    pub fee_rate: Decimal,
    pub record_file: Option<String>,
    pub listen_addr: String,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_per_min == 0 { return Err(invalid("RATE_LIMIT_PER_MIN", "must be > 0")); }
        if self.burst == 0 { return Err(invalid("RATE_BURST", "must be > 0")); }
        if self.workers == 0 { return Err(invalid("MAX_WORKERS", "must be > 0")); }
        if self.page_size == 0 { return Err(invalid("PAGE_SIZE", "must be > 0")); }
        if self.max_listings == 0 { return Err(invalid("MAX_LISTINGS", "must be > 0")); }
        if self.match_threshold > 100 { return Err(invalid("FUZZY_THRESHOLD", "must be within 0..=100")); }
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err(invalid("MARKET_FEE", "must be within [0, 1)"));
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(invalid("MARKET_BASE_URL", format!("not a URL: {}", self.base_url)));
        }
        Ok(())
    }

    pub fn credential(&self) -> Result<Credential, ConfigError> {
        self.api_key.clone().ok_or(ConfigError::MissingCredential)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Thresholds {
    pub cleaner: CleanerCfg,
    pub pricing: PricingCfg,
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let share_ok = |d: Decimal| d > Decimal::ZERO && d <= Decimal::ONE;
        let c = &self.cleaner;
        if c.anchor_z <= Decimal::ZERO { return Err(invalid("ANCHOR_Z", "must be > 0")); }
        if !share_ok(c.anchor_depth_share) { return Err(invalid("ANCHOR_DEPTH_SHARE", "must be within (0, 1]")); }
        if !share_ok(c.dominance_share) { return Err(invalid("DOMINANCE_SHARE", "must be within (0, 1]")); }
        if c.dominance_z <= Decimal::ZERO { return Err(invalid("DOMINANCE_Z", "must be > 0")); }
        if !share_ok(self.pricing.wall_depth_share) { return Err(invalid("WALL_DEPTH_SHARE", "must be within (0, 1]")); }
        if self.pricing.minor_unit <= Decimal::ZERO { return Err(invalid("MINOR_UNIT", "must be > 0")); }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(s) if !s.trim().is_empty() => s
            .trim()
            .parse()
            .map_err(|_| invalid(key, format!("cannot parse {s:?}"))),
        _ => Ok(default),
    }
}

pub fn load() -> Result<(Settings, Thresholds), ConfigError> {
    // Pastikan .env dibaca (API_KEY, DICT_PATH, dll)
    let _ = dotenv();

    // ===== Upstream & throttle =====
    let rate_per_min: u32 = env_or("RATE_LIMIT_PER_MIN", 90)?;
    let settings = Settings {
        dictionary_path: env_or("DICT_PATH", "data/item_dictionary.json".to_string())?,
        match_threshold: env_or("FUZZY_THRESHOLD", 85)?,
        base_url: env_or("MARKET_BASE_URL", "https://api.torn.com/v2".to_string())?,
        api_key: env::var("API_KEY").ok().and_then(|k| Credential::new(&k)),
        page_size: env_or("PAGE_SIZE", 100)?,
        max_listings: env_or("MAX_LISTINGS", 100)?,
        request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 15)?),
        item_timeout: Duration::from_secs(env_or("ITEM_TIMEOUT_SECS", 90)?),
        retries: env_or("RETRIES", 3)?,
        rate_per_min,
        burst: env_or("RATE_BURST", rate_per_min)?,
        workers: env_or("MAX_WORKERS", 5)?,
        fee_rate: env_or("MARKET_FEE", dec!(0.05))?,
        record_file: env::var("RECORD_FILE").ok().filter(|s| !s.trim().is_empty()),
        listen_addr: env_or("LISTEN_ADDR", "0.0.0.0:9898".to_string())?,
    };

    // ===== Cleaner / pricing thresholds =====
    // Kalibrasi domain-specific, semua bisa di-override via ENV.
    let d = Thresholds::default();
    let thresholds = Thresholds {
        cleaner: CleanerCfg {
            anchor_z: env_or("ANCHOR_Z", d.cleaner.anchor_z)?,
            anchor_depth_share: env_or("ANCHOR_DEPTH_SHARE", d.cleaner.anchor_depth_share)?,
            dominance_z: env_or("DOMINANCE_Z", d.cleaner.dominance_z)?,
            dominance_share: env_or("DOMINANCE_SHARE", d.cleaner.dominance_share)?,
            thin_min_levels: env_or("THIN_MIN_LEVELS", d.cleaner.thin_min_levels)?,
            thin_min_depth: env_or("THIN_MIN_DEPTH", d.cleaner.thin_min_depth)?,
            bulk_mean_quantity: env_or("BULK_MEAN_QUANTITY", d.cleaner.bulk_mean_quantity)?,
        },
        pricing: PricingCfg {
            wall_depth_share: env_or("WALL_DEPTH_SHARE", d.pricing.wall_depth_share)?,
            minor_unit: env_or("MINOR_UNIT", d.pricing.minor_unit)?,
        },
    };

    Ok((settings, thresholds))
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        dictionary_path: "unused.json".into(),
        match_threshold: 85,
        base_url: "http://127.0.0.1:1".into(),
        api_key: Credential::new("test-key"),
        page_size: 100,
        max_listings: 100,
        request_timeout: Duration::from_secs(1),
        item_timeout: Duration::from_secs(5),
        retries: 2,
        rate_per_min: 6000,
        burst: 100,
        workers: 4,
        fee_rate: dec!(0.05),
        record_file: None,
        listen_addr: "127.0.0.1:0".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(test_settings().validate().is_ok());
        assert!(Thresholds::default().validate().is_ok());
    }

    #[test]
    fn zero_rate_is_rejected() {
        let mut s = test_settings();
        s.rate_per_min = 0;
        assert!(matches!(s.validate(), Err(ConfigError::Invalid { key: "RATE_LIMIT_PER_MIN", .. })));
    }

    #[test]
    fn bad_shares_are_rejected() {
        let mut t = Thresholds::default();
        t.cleaner.anchor_depth_share = dec!(1.5);
        assert!(t.validate().is_err());

        let mut t = Thresholds::default();
        t.pricing.minor_unit = Decimal::ZERO;
        assert!(t.validate().is_err());
    }

    #[test]
    fn missing_credential_is_a_config_error() {
        let mut s = test_settings();
        s.api_key = None;
        assert!(matches!(s.credential(), Err(ConfigError::MissingCredential)));
    }
}

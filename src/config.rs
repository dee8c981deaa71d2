use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub mpesa: MpesaConfig,
}

/// Gateway settings, injected into the client at construction rather than
/// read from ambient globals.
#[derive(Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub country_code: String,
    pub account_prefix: String,
    /// Sandbox-only: floor the submitted amount to 1 instead of rejecting a
    /// zero-total cart. The record still keeps the true cart amount.
    pub sandbox_floor: bool,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            mpesa: MpesaConfig {
                base_url: try_load("MPESA_BASE_URL", "https://sandbox.safaricom.co.ke"),
                consumer_key: read_secret("MPESA_CONSUMER_KEY"),
                consumer_secret: read_secret("MPESA_CONSUMER_SECRET"),
                shortcode: try_load("MPESA_SHORTCODE", "174379"),
                passkey: read_secret("MPESA_PASSKEY"),
                callback_url: try_load(
                    "MPESA_CALLBACK_URL",
                    "https://example.invalid/payments/callback",
                ),
                country_code: try_load("MPESA_COUNTRY_CODE", "254"),
                account_prefix: try_load("MPESA_ACCOUNT_PREFIX", "PikaQuick"),
                sandbox_floor: try_load("MPESA_SANDBOX_FLOOR", "false"),
            },
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
        })
        .expect("Secrets misconfigured!")
}

#[cfg(test)]
impl MpesaConfig {
    pub fn for_tests() -> Self {
        Self {
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            shortcode: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://example.invalid/payments/callback".to_string(),
            country_code: "254".to_string(),
            account_prefix: "PikaQuick".to_string(),
            sandbox_floor: false,
        }
    }
}

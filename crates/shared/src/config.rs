use crate::amount::sol_to_lamports;
use anyhow::{anyhow, Context};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide settings, built once at startup and handed to every component
/// behind an `Arc`. Nothing here changes after construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub solana: SolanaConfig,
    pub forwarder: ForwarderConfig,
    pub keystore: KeyStoreConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub webhook: WebhookConfig,
    pub reaper: ReaperConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub rpc_fallback_url: Option<String>,
    /// Minimum spacing between outgoing RPC calls once the burst is spent
    pub ratelimit_every: Duration,
    pub ratelimit_burst: u32,
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Treasury address every received payment is swept to
    pub forward_address: Pubkey,
    /// Smallest payment request accepted, in SOL
    pub min_forward: Decimal,
    /// Fraction of the desired amount a payer may fall short by and still settle
    pub slippage_tolerance: Decimal,
    /// Transfers below this fraction of the desired amount are treated as noise
    pub ignore_threshold: Decimal,
    pub payment_window: Duration,
    pub sweep_simulate: bool,
}

impl ForwarderConfig {
    pub fn min_forward_lamports(&self) -> u64 {
        sol_to_lamports(self.min_forward).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct KeyStoreConfig {
    pub dir: PathBuf,
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allow_local_callbacks: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub enabled: bool,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| anyhow!("Missing required environment variable {}", key))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let forward_address = required("FORWARD_ADDRESS")?;
        let forward_address = Pubkey::from_str(&forward_address)
            .map_err(|e| anyhow!("FORWARD_ADDRESS is not a valid address: {}", e))?;

        let config = Config {
            solana: SolanaConfig {
                rpc_url: required("SOLANA_RPC_URL")?,
                ws_url: required("SOLANA_WS_URL")?,
                rpc_fallback_url: lookup("SOLANA_RPC_FALLBACK_URL"),
                ratelimit_every: Duration::from_millis(
                    or_default("RPC_RATELIMIT_EVERY_MS", "100")
                        .parse()
                        .context("RPC_RATELIMIT_EVERY_MS")?,
                ),
                ratelimit_burst: or_default("RPC_RATELIMIT_BURST", "10")
                    .parse()
                    .context("RPC_RATELIMIT_BURST")?,
            },
            forwarder: ForwarderConfig {
                forward_address,
                min_forward: parse_decimal(&or_default("MIN_FORWARD_SOL", "0.01"), "MIN_FORWARD_SOL")?,
                slippage_tolerance: parse_decimal(
                    &or_default("SLIPPAGE_TOLERANCE", "0.05"),
                    "SLIPPAGE_TOLERANCE",
                )?,
                ignore_threshold: parse_decimal(
                    &or_default("IGNORE_THRESHOLD", "0.02"),
                    "IGNORE_THRESHOLD",
                )?,
                payment_window: Duration::from_secs(
                    or_default("PAYMENT_WINDOW_SECS", "1800")
                        .parse()
                        .context("PAYMENT_WINDOW_SECS")?,
                ),
                sweep_simulate: or_default("SWEEP_SIMULATE", "false")
                    .parse()
                    .context("SWEEP_SIMULATE")?,
            },
            keystore: KeyStoreConfig {
                dir: PathBuf::from(or_default("KEYSTORE_DIR", "wal")),
                encryption_key: lookup("KEYSTORE_ENCRYPTION_KEY").filter(|k| !k.is_empty()),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").filter(|u| !u.is_empty()),
                max_connections: or_default("DATABASE_MAX_CONNECTIONS", "10")
                    .parse()
                    .context("DATABASE_MAX_CONNECTIONS")?,
            },
            server: ServerConfig {
                host: or_default("SERVER_HOST", "0.0.0.0"),
                port: or_default("SERVER_PORT", "3443").parse().context("SERVER_PORT")?,
                allow_local_callbacks: or_default("ALLOW_LOCAL_CALLBACKS", "false")
                    .parse()
                    .context("ALLOW_LOCAL_CALLBACKS")?,
            },
            rate_limit: RateLimitConfig {
                requests_per_minute: or_default("RATE_LIMIT_REQUESTS_PER_MINUTE", "100")
                    .parse()
                    .context("RATE_LIMIT_REQUESTS_PER_MINUTE")?,
            },
            webhook: WebhookConfig {
                timeout: Duration::from_secs(
                    or_default("WEBHOOK_TIMEOUT_SECS", "10")
                        .parse()
                        .context("WEBHOOK_TIMEOUT_SECS")?,
                ),
            },
            reaper: ReaperConfig {
                enabled: or_default("REAPER_ENABLED", "true")
                    .parse()
                    .context("REAPER_ENABLED")?,
                interval: Duration::from_secs(
                    or_default("REAPER_INTERVAL_SECS", "300")
                        .parse()
                        .context("REAPER_INTERVAL_SECS")?,
                ),
            },
            logging: LoggingConfig {
                format: match or_default("LOG_FORMAT", "json").as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    other => return Err(anyhow!("LOG_FORMAT must be json or pretty, got {}", other)),
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let f = &self.forwarder;

        if f.min_forward <= Decimal::ZERO {
            return Err(anyhow!("MIN_FORWARD_SOL must be positive"));
        }
        for (name, value) in [
            ("SLIPPAGE_TOLERANCE", f.slippage_tolerance),
            ("IGNORE_THRESHOLD", f.ignore_threshold),
        ] {
            if value < Decimal::ZERO || value >= Decimal::ONE {
                return Err(anyhow!("{} must be within [0, 1), got {}", name, value));
            }
        }
        // The noise band has to sit below the settlement band.
        if f.ignore_threshold > Decimal::ONE - f.slippage_tolerance {
            return Err(anyhow!(
                "IGNORE_THRESHOLD ({}) must not exceed 1 - SLIPPAGE_TOLERANCE",
                f.ignore_threshold
            ));
        }
        if f.payment_window.is_zero() {
            return Err(anyhow!("PAYMENT_WINDOW_SECS must be positive"));
        }
        if self.solana.ratelimit_burst == 0 {
            return Err(anyhow!("RPC_RATELIMIT_BURST must be positive"));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(anyhow!("RATE_LIMIT_REQUESTS_PER_MINUTE must be positive"));
        }
        Ok(())
    }
}

fn parse_decimal(raw: &str, key: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(raw.trim()).map_err(|e| anyhow!("{} is not a decimal: {}", key, e))
}

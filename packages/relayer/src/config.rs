//! Relayer configuration from environment variables
//!
//! [`BootstrapConfig`] is read before the run lease is taken and never fails.
//! [`Config`] is loaded and validated once the lease is held. A `.env` file in
//! the working directory is honoured through `dotenvy`.

use eyre::{eyre, Result, WrapErr};
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub relayer: RelayerConfig,
    pub retry: RetrySettings,
    /// Source and destination chains, in scan order
    pub chains: Vec<ChainConfig>,
}

/// Values needed before the lease is taken and before the full
/// configuration is validated
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub lock_file: PathBuf,
    pub lock_stale_after: Duration,
    pub log_file: Option<PathBuf>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// Relayer behaviour
#[derive(Clone)]
pub struct RelayerConfig {
    pub private_key: String,
    pub dry_run: bool,
    /// Maximum pending requests processed per run
    pub batch_size: u32,
    /// How long an insufficient-liquidity request waits before it is retried
    pub liquidity_backoff_secs: u64,
    /// How long a request waits when its destination cannot be reached
    pub unavailable_backoff_secs: u64,
    pub metrics_textfile: Option<PathBuf>,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for RelayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerConfig")
            .field("private_key", &"<redacted>")
            .field("dry_run", &self.dry_run)
            .field("batch_size", &self.batch_size)
            .field("liquidity_backoff_secs", &self.liquidity_backoff_secs)
            .field("unavailable_backoff_secs", &self.unavailable_backoff_secs)
            .field("metrics_textfile", &self.metrics_textfile)
            .finish()
    }
}

/// Retry policy settings for release submission
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Configuration for a single chain
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Human-readable name (e.g., "ethereum", "polygon")
    pub name: String,
    /// Native chain ID
    pub chain_id: u64,
    pub rpc_url: String,
    /// Bridge contract address (0x-prefixed, 42 chars)
    pub bridge_address: String,
    /// Blocks a log must be buried under before it is ingested
    pub confirmations: u64,
    /// Upper bound on the block span of one `eth_getLogs` request
    pub max_block_range: u64,
    pub max_gas_price_gwei: u64,
    /// Block to start from when the chain has no checkpoint yet
    pub start_block: Option<u64>,
    pub enabled: bool,
}

impl ChainConfig {
    pub fn max_gas_price_wei(&self) -> u128 {
        self.max_gas_price_gwei as u128 * 1_000_000_000
    }

    fn validate(&self) -> Result<()> {
        if self.chain_id == 0 {
            return Err(eyre!("chain {} has chain id 0", self.name));
        }
        validate_rpc_url(&self.rpc_url, &format!("{} rpc_url", self.name))?;
        if self.bridge_address.len() != 42 || !self.bridge_address.starts_with("0x") {
            return Err(eyre!(
                "Invalid bridge address for chain {}: {} (expected 0x-prefixed 42-char hex)",
                self.name,
                self.bridge_address
            ));
        }
        if self.max_block_range == 0 {
            return Err(eyre!("max_block_range must be > 0 for chain {}", self.name));
        }
        if self.max_gas_price_gwei == 0 {
            return Err(eyre!("max_gas_price_gwei must be > 0 for chain {}", self.name));
        }
        Ok(())
    }
}

/// Default functions
fn default_lock_file() -> PathBuf {
    PathBuf::from("./relayer.lock")
}

fn default_lock_stale_secs() -> u64 {
    300
}

fn default_confirmations() -> u64 {
    12
}

fn default_max_block_range() -> u64 {
    2000
}

fn default_max_gas_price_gwei() -> u64 {
    200
}

fn default_batch_size() -> u32 {
    50
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    2000
}

fn default_retry_max_delay() -> u64 {
    30_000
}

fn default_liquidity_backoff_secs() -> u64 {
    300
}

fn default_unavailable_backoff_secs() -> u64 {
    60
}

/// Validates that a URL uses http/https and has a host component.
pub fn validate_rpc_url(url_str: &str, name: &str) -> Result<()> {
    let parsed =
        url::Url::parse(url_str).map_err(|e| eyre!("{} must be a valid URL: {}", name, e))?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(eyre!(
            "{} must use http:// or https:// scheme, got {}",
            name,
            scheme
        ));
    }

    if parsed.host_str().is_none() {
        return Err(eyre!("{} must have a host component", name));
    }

    Ok(())
}

/// Load `.env` from the working directory if present
pub fn load_dotenv() -> Result<()> {
    if Path::new(".env").exists() {
        dotenvy::from_filename(".env").wrap_err("Failed to load .env file")?;
    }
    Ok(())
}

fn optional_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| eyre!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

fn required_var(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

fn parse_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => Err(eyre!("{} must be a boolean, got {}", name, other)),
        },
        Err(_) => Ok(default),
    }
}

impl BootstrapConfig {
    /// Read lock and log locations. Never fails: bad values fall back to
    /// defaults so the lease can always be taken before validation.
    pub fn from_env() -> Self {
        Self {
            lock_file: env::var("LOCK_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_lock_file()),
            lock_stale_after: Duration::from_secs(
                env::var("LOCK_STALE_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_lock_stale_secs()),
            ),
            log_file: env::var("LOG_FILE").ok().filter(|v| !v.is_empty()).map(PathBuf::from),
        }
    }
}

impl Config {
    /// Load and validate configuration from environment variables
    pub fn load() -> Result<Self> {
        let database = DatabaseConfig {
            path: PathBuf::from(required_var("DATABASE_PATH")?),
        };

        let relayer = RelayerConfig {
            private_key: required_var("RELAYER_PRIVATE_KEY")?,
            dry_run: parse_bool("DRY_RUN", false)?,
            batch_size: optional_var("BATCH_SIZE")?.unwrap_or(default_batch_size()),
            liquidity_backoff_secs: optional_var("LIQUIDITY_BACKOFF_SECS")?
                .unwrap_or(default_liquidity_backoff_secs()),
            unavailable_backoff_secs: optional_var("UNAVAILABLE_BACKOFF_SECS")?
                .unwrap_or(default_unavailable_backoff_secs()),
            metrics_textfile: env::var("METRICS_TEXTFILE")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        };

        let retry = RetrySettings {
            attempts: optional_var("RETRY_ATTEMPTS")?.unwrap_or(default_retry_attempts()),
            base_delay_ms: optional_var("RETRY_BASE_DELAY_MS")?
                .unwrap_or(default_retry_base_delay()),
            max_delay_ms: optional_var("RETRY_MAX_DELAY_MS")?
                .unwrap_or(default_retry_max_delay()),
        };

        let config = Config {
            database,
            relayer,
            retry,
            chains: load_chains_from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Chains that take part in this run
    pub fn enabled_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(|c| c.enabled)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(eyre!("database path cannot be empty"));
        }

        let key = &self.relayer.private_key;
        if key.len() != 66
            || !key.starts_with("0x")
            || !key[2..].chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(eyre!("relayer private key must be 66 chars (0x + 64 hex chars)"));
        }

        if self.relayer.batch_size == 0 {
            return Err(eyre!("batch_size must be > 0"));
        }

        if self.retry.attempts == 0 {
            return Err(eyre!("retry attempts must be > 0"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(eyre!("retry max delay cannot be below the base delay"));
        }

        if self.enabled_chains().next().is_none() {
            return Err(eyre!("at least one enabled chain must be configured"));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            chain.validate()?;
            if !seen.insert(chain.chain_id) {
                return Err(eyre!(
                    "chain id {} is configured more than once",
                    chain.chain_id
                ));
            }
        }

        Ok(())
    }
}

/// Load chain configurations from environment variables
///
/// ```text
/// CHAINS_COUNT=2
/// CHAIN_1_NAME=ethereum             # optional, default chain-<id>
/// CHAIN_1_CHAIN_ID=1
/// CHAIN_1_RPC_URL=https://...
/// CHAIN_1_BRIDGE_ADDRESS=0x...
/// CHAIN_1_CONFIRMATIONS=12          # optional
/// CHAIN_1_MAX_BLOCK_RANGE=2000      # optional
/// CHAIN_1_MAX_GAS_PRICE_GWEI=200    # optional
/// CHAIN_1_START_BLOCK=19000000      # optional first-scan override
/// CHAIN_1_ENABLED=true              # optional
/// ```
fn load_chains_from_env() -> Result<Vec<ChainConfig>> {
    let count: usize = required_var("CHAINS_COUNT")?
        .trim()
        .parse()
        .wrap_err("CHAINS_COUNT must be a positive integer")?;
    if count == 0 {
        return Err(eyre!("CHAINS_COUNT must be at least 1"));
    }

    let mut chains = Vec::with_capacity(count);
    for i in 1..=count {
        let prefix = format!("CHAIN_{}", i);
        let chain_id: u64 = required_var(&format!("{}_CHAIN_ID", prefix))?
            .trim()
            .parse()
            .wrap_err_with(|| format!("{}_CHAIN_ID must be a valid u64", prefix))?;

        chains.push(ChainConfig {
            name: env::var(format!("{}_NAME", prefix))
                .unwrap_or_else(|_| format!("chain-{}", chain_id)),
            chain_id,
            rpc_url: required_var(&format!("{}_RPC_URL", prefix))?,
            bridge_address: required_var(&format!("{}_BRIDGE_ADDRESS", prefix))?,
            confirmations: optional_var(&format!("{}_CONFIRMATIONS", prefix))?
                .unwrap_or(default_confirmations()),
            max_block_range: optional_var(&format!("{}_MAX_BLOCK_RANGE", prefix))?
                .unwrap_or(default_max_block_range()),
            max_gas_price_gwei: optional_var(&format!("{}_MAX_GAS_PRICE_GWEI", prefix))?
                .unwrap_or(default_max_gas_price_gwei()),
            start_block: optional_var(&format!("{}_START_BLOCK", prefix))?,
            enabled: parse_bool(&format!("{}_ENABLED", prefix), true)?,
        });
    }

    Ok(chains)
}

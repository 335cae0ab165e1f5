//! Collector Configuration Settings
//!
//! Configuration types for the collector, loaded from environment variables.
//! Parsing goes through a lookup function so tests can supply a map instead
//! of mutating the process environment.

use std::time::Duration;

use crate::application::services::LoopSettings;
use crate::domain::batch::AssemblyPolicy;

/// PostgreSQL sink settings.
#[derive(Clone)]
pub struct DatabaseSettings {
    /// Database user.
    pub user: String,
    password: String,
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub name: String,
    /// Full connection URL; takes precedence over the individual fields.
    url_override: Option<String>,
    /// Connection pool size.
    pub max_connections: u32,
    /// Target table, validated as a plain or schema-qualified identifier.
    pub table: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            name: "meubanco".to_string(),
            url_override: None,
            max_connections: 1,
            table: "cotacoes".to_string(),
        }
    }
}

impl DatabaseSettings {
    /// Database password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// `DATABASE_URL`, if set.
    #[must_use]
    pub fn url_override(&self) -> Option<&str> {
        self.url_override.as_deref()
    }

    /// Connection URL with the password masked, for logging.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        match &self.url_override {
            Some(url) => redact_url_password(url),
            None => format!(
                "postgresql://{}:***@{}:{}/{}",
                self.user, self.host, self.port, self.name
            ),
        }
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &self.redacted_url())
            .field("max_connections", &self.max_connections)
            .field("table", &self.table)
            .finish()
    }
}

fn redact_url_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

/// Quote provider settings.
#[derive(Clone)]
pub struct SourceSettings {
    /// Coinbase currency pair (e.g. `BTC-USD`).
    pub crypto_pair: String,
    /// Coinbase API base URL.
    pub coinbase_api_url: String,
    /// Commodities API base URL.
    pub commodities_api_url: String,
    commodities_api_key: Option<String>,
    /// Commodity symbols to request.
    pub commodity_symbols: Vec<String>,
    /// Currency commodities are priced in.
    pub commodity_base: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            crypto_pair: "BTC-USD".to_string(),
            coinbase_api_url: "https://api.coinbase.com/v2".to_string(),
            commodities_api_url: "https://commodities-api.com/api".to_string(),
            commodities_api_key: None,
            commodity_symbols: ["XAU", "XAG", "WTIOIL", "BRENTOIL"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            commodity_base: "USD".to_string(),
        }
    }
}

impl SourceSettings {
    /// Commodities API key; the commodities source is disabled without one.
    #[must_use]
    pub fn commodities_api_key(&self) -> Option<&str> {
        self.commodities_api_key.as_deref()
    }
}

impl std::fmt::Debug for SourceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSettings")
            .field("crypto_pair", &self.crypto_pair)
            .field("coinbase_api_url", &self.coinbase_api_url)
            .field("commodities_api_url", &self.commodities_api_url)
            .field(
                "commodities_api_key",
                &self.commodities_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("commodity_symbols", &self.commodity_symbols)
            .field("commodity_base", &self.commodity_base)
            .finish()
    }
}

/// Observability settings.
#[derive(Debug, Clone, Default)]
pub struct ObservabilitySettings {
    /// Prometheus exporter port (0 = disabled).
    pub metrics_port: u16,
}

/// Complete collector configuration.
#[derive(Debug, Clone, Default)]
pub struct CollectorConfig {
    /// Sink connection settings.
    pub database: DatabaseSettings,
    /// Provider settings.
    pub sources: SourceSettings,
    /// Scheduling and failure-isolation settings.
    pub collection: LoopSettings,
    /// Metrics settings.
    pub observability: ObservabilitySettings,
}

impl CollectorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable (bad table name,
    /// unknown failure policy, zero interval).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset. Unparseable numbers fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let db_defaults = DatabaseSettings::default();
        let table = env.string("QUOTES_TABLE", &db_defaults.table);
        if !is_valid_table_name(&table) {
            return Err(ConfigError::InvalidValue {
                key: "QUOTES_TABLE",
                value: table,
            });
        }

        let database = DatabaseSettings {
            user: env.string("DB_USER", &db_defaults.user),
            password: env.string("DB_PASSWORD", &db_defaults.password),
            host: env.string("DB_HOST", &db_defaults.host),
            port: env.parse("DB_PORT", db_defaults.port),
            name: env.string("DB_NAME", &db_defaults.name),
            url_override: env.get("DATABASE_URL"),
            max_connections: env.parse("DB_MAX_CONNECTIONS", db_defaults.max_connections).max(1),
            table,
        };

        let src_defaults = SourceSettings::default();
        let crypto_pair = env.string("CRYPTO_PAIR", &src_defaults.crypto_pair).to_uppercase();
        if !is_valid_pair(&crypto_pair) {
            return Err(ConfigError::InvalidValue {
                key: "CRYPTO_PAIR",
                value: crypto_pair,
            });
        }

        let commodity_symbols = env.get("COMMODITY_SYMBOLS").map_or(
            src_defaults.commodity_symbols.clone(),
            |raw| parse_symbol_list(&raw),
        );
        if commodity_symbols.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "COMMODITY_SYMBOLS",
                value: env.get("COMMODITY_SYMBOLS").unwrap_or_default(),
            });
        }

        let sources = SourceSettings {
            crypto_pair,
            coinbase_api_url: trim_slash(
                env.string("COINBASE_API_URL", &src_defaults.coinbase_api_url),
            ),
            commodities_api_url: trim_slash(
                env.string("COMMODITIES_API_URL", &src_defaults.commodities_api_url),
            ),
            commodities_api_key: env.get("COMMODITIES_API_KEY"),
            commodity_symbols,
            commodity_base: env
                .string("COMMODITY_BASE", &src_defaults.commodity_base)
                .to_uppercase(),
        };

        let loop_defaults = LoopSettings::default();
        let policy = match env.get("FAILURE_POLICY") {
            None => loop_defaults.policy,
            Some(raw) => AssemblyPolicy::from_str_case_insensitive(&raw).ok_or(
                ConfigError::InvalidValue {
                    key: "FAILURE_POLICY",
                    value: raw,
                },
            )?,
        };

        let collection = LoopSettings {
            interval: env.duration_secs("SLEEP_SECONDS", loop_defaults.interval)?,
            fetch_timeout: env.duration_secs("FETCH_TIMEOUT_SECS", loop_defaults.fetch_timeout)?,
            max_cycles: Some(env.parse("COLLECTOR_MAX_CYCLES", 0_u64)).filter(|&n| n > 0),
            policy,
        };

        let observability = ObservabilitySettings {
            metrics_port: env.parse("METRICS_PORT", ObservabilitySettings::default().metrics_port),
        };

        Ok(Self {
            database,
            sources,
            collection,
            observability,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be used.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
    /// A duration that must be positive was zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let duration = self
            .get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs);
        if duration.is_zero() {
            return Err(ConfigError::ZeroDuration(key));
        }
        Ok(duration)
    }
}

fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn trim_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// `BASE-QUOTE`, both sides non-empty and alphanumeric.
fn is_valid_pair(pair: &str) -> bool {
    pair.split_once('-').is_some_and(|(base, quote)| {
        [base, quote]
            .iter()
            .all(|side| !side.is_empty() && side.chars().all(|c| c.is_ascii_alphanumeric()))
    })
}

/// Plain (`quotes`) or schema-qualified (`market.quotes`) SQL identifier.
fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && part.len() <= 63
        })
}

use crate::api::finnhub::quote::DEFAULT_BASE_URL;
use crate::error::ConfigError;
use crate::monitor::supervisor::{DEFAULT_RATE_BUDGET, MAX_CHART_SLOTS};
use crate::monitor::threshold::SymbolConfig;
use dotenv::dotenv;
use log::{warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_STATE_PATH: &str = "stockwatch_state.json";

/// Application settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Finnhub API token
    pub api_key: String,

    /// Quote API base URL, without trailing slash
    pub base_url: String,

    /// Quote requests per minute the batch must stay under
    pub rate_budget: u32,

    /// Minimum gap between two notifications for the same alert
    pub cooldown: Duration,

    /// Raise a modal notice on alerts, not only the bell
    pub notice_popup: bool,

    /// Where the watchlist is persisted
    pub state_path: PathBuf,

    pub log_level: LevelFilter,

    /// Log to this file instead of stderr
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_budget: DEFAULT_RATE_BUDGET,
            cooldown: Duration::from_secs(30),
            notice_popup: true,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            log_level: LevelFilter::Info,
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, after reading `.env` if present.
    pub fn from_env() -> Self {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unparsable values fall back to
    /// their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("FINNHUB_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            warn!("FINNHUB_API_KEY is not set");
        }

        let rate_budget: u32 = parse_or("STOCKWATCH_RATE_BUDGET", get("STOCKWATCH_RATE_BUDGET"), defaults.rate_budget);
        let rate_budget = if rate_budget == 0 {
            warn!("STOCKWATCH_RATE_BUDGET must be positive, using {}", DEFAULT_RATE_BUDGET);
            DEFAULT_RATE_BUDGET
        } else {
            rate_budget
        };

        let cooldown_secs: u64 = parse_or(
            "STOCKWATCH_COOLDOWN_SECS",
            get("STOCKWATCH_COOLDOWN_SECS"),
            defaults.cooldown.as_secs(),
        );

        Self {
            api_key,
            base_url: get("FINNHUB_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            rate_budget,
            cooldown: Duration::from_secs(cooldown_secs),
            notice_popup: parse_or(
                "STOCKWATCH_NOTICE_POPUP",
                get("STOCKWATCH_NOTICE_POPUP"),
                defaults.notice_popup,
            ),
            state_path: get("STOCKWATCH_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_path),
            log_level: parse_or("LOG_LEVEL", get("LOG_LEVEL"), defaults.log_level),
            log_file: get("LOG_FILE_PATH").map(PathBuf::from),
        }
    }

    /// Initialize logging: this crate at the configured level, everything
    /// else at warn. Logs never go to stdout, which belongs to the dashboard.
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        let mut builder = env_logger::Builder::new();
        builder
            .filter_level(LevelFilter::Warn)
            .filter_module("stockwatch", self.log_level)
            .format(|buf, record| {
                let ts = chrono::Local::now().format("%H:%M:%S%.3f");
                writeln!(
                    buf,
                    "[{} {:<5} {}] {}",
                    ts,
                    record.level(),
                    record.target(),
                    record.args()
                )
            });

        match &self.log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| ConfigError::LogFile {
                        path: path.display().to_string(),
                        source,
                    })?;
                builder
                    .target(env_logger::Target::Pipe(Box::new(file)))
                    .write_style(env_logger::WriteStyle::Never);
            }
            None => {
                builder.target(env_logger::Target::Stderr);
            }
        }

        if builder.try_init().is_err() {
            warn!("Logger was already initialized");
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid value '{}' for {}, using the default", raw, key);
            default
        }),
    }
}

/// One configured dashboard slot as persisted on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub symbol: String,

    /// `"<ConditionLabel>@<value>"`, empty when no alert is set
    #[serde(default)]
    pub threshold: String,
}

/// The persisted watchlist. Never holds more than [`MAX_CHART_SLOTS`] entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    #[serde(default)]
    pub slots: Vec<SlotEntry>,
}

impl Watchlist {
    pub fn new(mut slots: Vec<SlotEntry>) -> Self {
        slots.truncate(MAX_CHART_SLOTS);
        Self { slots }
    }

    /// Reads the watchlist, falling back to an empty one when the file is
    /// missing or unreadable.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(watchlist) => watchlist,
            Err(e) => {
                warn!("{}; starting with an empty watchlist", e);
                Self::default()
            }
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let watchlist: Watchlist =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(watchlist.slots))
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Configs for every slot with a symbol, in slot order.
    pub fn symbol_configs(&self) -> Vec<SymbolConfig> {
        self.slots
            .iter()
            .filter(|s| !s.symbol.trim().is_empty())
            .map(|s| SymbolConfig::parse(&s.symbol, &s.threshold))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.base_url, "https://finnhub.io/api/v1");
        assert_eq!(config.rate_budget, 58);
    }

    #[test]
    fn reads_every_setting() {
        let config = AppConfig::from_lookup(lookup(&[
            ("FINNHUB_API_KEY", " abc123 "),
            ("FINNHUB_BASE_URL", "http://localhost:8080/api/"),
            ("STOCKWATCH_RATE_BUDGET", "30"),
            ("STOCKWATCH_COOLDOWN_SECS", "5"),
            ("STOCKWATCH_NOTICE_POPUP", "false"),
            ("STOCKWATCH_STATE_PATH", "/tmp/watch.json"),
            ("LOG_LEVEL", "debug"),
            ("LOG_FILE_PATH", "/tmp/stockwatch.log"),
        ]));
        assert_eq!(config.api_key, "abc123");
        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert_eq!(config.rate_budget, 30);
        assert_eq!(config.cooldown, Duration::from_secs(5));
        assert!(!config.notice_popup);
        assert_eq!(config.state_path, PathBuf::from("/tmp/watch.json"));
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/stockwatch.log")));
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("STOCKWATCH_RATE_BUDGET", "0"),
            ("STOCKWATCH_COOLDOWN_SECS", "soon"),
            ("STOCKWATCH_NOTICE_POPUP", "maybe"),
            ("LOG_LEVEL", "loud"),
        ]));
        assert_eq!(config.rate_budget, DEFAULT_RATE_BUDGET);
        assert_eq!(config.cooldown, Duration::from_secs(30));
        assert!(config.notice_popup);
        assert_eq!(config.log_level, LevelFilter::Info);
    }

    #[test]
    fn watchlist_survives_a_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let watchlist = Watchlist::new(vec![
            SlotEntry {
                symbol: "AAPL".to_string(),
                threshold: "Price > Value@150.5".to_string(),
            },
            SlotEntry::default(),
            SlotEntry {
                symbol: "msft".to_string(),
                threshold: String::new(),
            },
        ]);
        watchlist.to_file(&path).unwrap();

        let loaded = Watchlist::load(&path);
        assert_eq!(loaded, watchlist);
        let configs = loaded.symbol_configs();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].symbol, "MSFT");
        assert!(configs[0].threshold.is_some());
    }

    #[test]
    fn missing_or_corrupt_file_gives_empty_watchlist() {
        let dir = tempdir().unwrap();
        assert_eq!(Watchlist::load(dir.path().join("absent.json")), Watchlist::default());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        assert_eq!(Watchlist::load(&corrupt), Watchlist::default());
        assert!(matches!(
            Watchlist::from_file(&corrupt),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn watchlist_keeps_at_most_four_slots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let six: Vec<String> = (0..6).map(|i| format!(r#"{{"symbol":"S{}"}}"#, i)).collect();
        std::fs::write(&path, format!(r#"{{"slots":[{}]}}"#, six.join(","))).unwrap();
        let loaded = Watchlist::load(&path);
        assert_eq!(loaded.slots.len(), MAX_CHART_SLOTS);
        assert_eq!(loaded.slots[3].symbol, "S3");
    }
}

use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::CredentialSource;
use crate::error::ConfigError;

const DEFAULT_SHEET_ID: &str = "1Tbzu3LjBdZxcAneZv1d6wjft6ApM-fbmwvisFjyRTAY";
const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

/// Runtime settings, read once at startup from the environment.
///
/// # Recognised variables
/// * `SHEET_ID` - spreadsheet key of the remote sheet
/// * `SHOW_TABLE` - render the table on the index page (default `false`)
/// * `MAX_VISIBLE_ROWS` - rows shown on the index page, `0` for all
/// * `MAX_SEARCH_RESULTS` - cap on search matches, `0` for no cap (default 25)
/// * `CACHE_TTL_SECONDS` - snapshot freshness window (default 15)
/// * `SHEET_REAUTH_SECONDS` - connection reuse window (default 3600)
/// * `REMOTE_TIMEOUT_SECONDS` - bound on every remote call (default 10)
/// * `SERVE_STALE_ON_ERROR` - serve the last good snapshot when a refresh fails (default `true`)
/// * `REFRESH_AFTER_APPEND` - refresh the snapshot after each append (default `false`)
/// * `GOOGLE_CREDENTIALS` - inline service-account JSON, takes priority over
/// * `CREDENTIALS_FILE` - path to the service-account JSON (default `credentials.json`)
/// * `BIND_ADDR` - listen address (default `127.0.0.1:3000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub sheet_id: String,
    pub show_table: bool,
    pub max_visible_rows: usize,
    pub max_search_results: usize,
    pub cache_ttl: Duration,
    pub reauth_after: Duration,
    pub remote_timeout: Duration,
    pub serve_stale_on_error: bool,
    pub refresh_after_append: bool,
    pub credentials: CredentialSource,
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sheet_id: DEFAULT_SHEET_ID.to_string(),
            show_table: false,
            max_visible_rows: 0,
            max_search_results: 25,
            cache_ttl: Duration::from_secs(15),
            reauth_after: Duration::from_secs(3600),
            remote_timeout: Duration::from_secs(10),
            serve_stale_on_error: true,
            refresh_after_append: false,
            credentials: CredentialSource::File(PathBuf::from(DEFAULT_CREDENTIALS_FILE)),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Unset or blank keys fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let credentials = match get("GOOGLE_CREDENTIALS") {
            Some(json) => CredentialSource::Inline(json),
            None => CredentialSource::File(
                get("CREDENTIALS_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_FILE)),
            ),
        };

        Ok(Config {
            sheet_id: get("SHEET_ID").unwrap_or(defaults.sheet_id),
            show_table: parse_bool("SHOW_TABLE", get("SHOW_TABLE"), defaults.show_table)?,
            max_visible_rows: parse_usize(
                "MAX_VISIBLE_ROWS",
                get("MAX_VISIBLE_ROWS"),
                defaults.max_visible_rows,
            )?,
            max_search_results: parse_usize(
                "MAX_SEARCH_RESULTS",
                get("MAX_SEARCH_RESULTS"),
                defaults.max_search_results,
            )?,
            cache_ttl: parse_secs("CACHE_TTL_SECONDS", get("CACHE_TTL_SECONDS"), defaults.cache_ttl)?,
            reauth_after: parse_secs(
                "SHEET_REAUTH_SECONDS",
                get("SHEET_REAUTH_SECONDS"),
                defaults.reauth_after,
            )?,
            remote_timeout: parse_positive_secs(
                "REMOTE_TIMEOUT_SECONDS",
                get("REMOTE_TIMEOUT_SECONDS"),
                defaults.remote_timeout,
            )?,
            serve_stale_on_error: parse_bool(
                "SERVE_STALE_ON_ERROR",
                get("SERVE_STALE_ON_ERROR"),
                defaults.serve_stale_on_error,
            )?,
            refresh_after_append: parse_bool(
                "REFRESH_AFTER_APPEND",
                get("REFRESH_AFTER_APPEND"),
                defaults.refresh_after_append,
            )?,
            credentials,
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn parse_bool(key: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value }),
    }
}

fn parse_usize(key: &'static str, value: Option<String>, default: usize) -> Result<usize, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidInteger { key, value }),
    }
}

fn parse_secs(
    key: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidInteger { key, value }),
    }
}

/// Like `parse_secs`, for bounds where zero would fail every call.
fn parse_positive_secs(
    key: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let secs = parse_secs(key, value, default)?;
    if secs.is_zero() {
        return Err(ConfigError::MustBePositive { key });
    }
    Ok(secs)
}

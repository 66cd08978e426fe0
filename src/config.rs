//! Server configuration read from `FUNNEL_*` environment variables.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;

use crate::charts::ChartConfig;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    pub chart: ChartConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            chart: ChartConfig::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub fn server_config_from_env() -> Result<ServerConfig, ConfigError> {
    server_config_from_lookup(|key| env::var(key).ok())
}

/// Blank values keep the defaults. Anything set but malformed is an error.
pub fn server_config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();

    if let Some(raw) = non_blank(lookup("FUNNEL_ADDR")) {
        config.bind_addr = raw.parse().map_err(|err: std::net::AddrParseError| {
            invalid("FUNNEL_ADDR", &raw, err.to_string())
        })?;
    }

    if let Some(raw) = non_blank(lookup("FUNNEL_MAX_UPLOAD_BYTES")) {
        config.max_upload_bytes = parse_positive("FUNNEL_MAX_UPLOAD_BYTES", &raw)?;
    }

    if let Some(raw) = non_blank(lookup("FUNNEL_CHART_FONT")) {
        config.chart.font_family = raw;
    }

    if let Some(raw) = non_blank(lookup("FUNNEL_CHART_WIDTH")) {
        config.chart.width = parse_dimension("FUNNEL_CHART_WIDTH", &raw)?;
    }

    if let Some(raw) = non_blank(lookup("FUNNEL_CHART_HEIGHT")) {
        config.chart.height = parse_dimension("FUNNEL_CHART_HEIGHT", &raw)?;
    }

    Ok(config)
}

fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_positive(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.parse::<usize>() {
        Ok(0) => Err(invalid(key, raw, "must be greater than zero".to_string())),
        Ok(value) => Ok(value),
        Err(err) => Err(invalid(key, raw, err.to_string())),
    }
}

fn parse_dimension(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(0) => Err(invalid(key, raw, "must be greater than zero".to_string())),
        Ok(value) => Ok(value),
        Err(err) => Err(invalid(key, raw, err.to_string())),
    }
}

fn invalid(key: &'static str, raw: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = server_config_from_lookup(lookup_from(&[])).expect("defaults");
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(cfg.max_upload_bytes, 20_971_520);
        assert_eq!(cfg.chart.font_family, "sans-serif");
        assert_eq!((cfg.chart.width, cfg.chart.height), (1280, 720));
    }

    #[test]
    fn reads_every_override() {
        let cfg = server_config_from_lookup(lookup_from(&[
            ("FUNNEL_ADDR", "0.0.0.0:9000"),
            ("FUNNEL_MAX_UPLOAD_BYTES", "1024"),
            ("FUNNEL_CHART_FONT", " Noto Sans CJK SC "),
            ("FUNNEL_CHART_WIDTH", "800"),
            ("FUNNEL_CHART_HEIGHT", "600"),
        ]))
        .expect("valid overrides");

        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(cfg.max_upload_bytes, 1024);
        assert_eq!(cfg.chart.font_family, "Noto Sans CJK SC");
        assert_eq!((cfg.chart.width, cfg.chart.height), (800, 600));
    }

    #[test]
    fn blank_values_keep_defaults() {
        let cfg = server_config_from_lookup(lookup_from(&[
            ("FUNNEL_ADDR", "   "),
            ("FUNNEL_CHART_FONT", ""),
        ]))
        .expect("blank values ignored");
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = server_config_from_lookup(lookup_from(&[("FUNNEL_ADDR", "localhost")]))
            .expect_err("bad addr");
        assert!(matches!(err, ConfigError::InvalidValue { key: "FUNNEL_ADDR", .. }));

        let err = server_config_from_lookup(lookup_from(&[("FUNNEL_MAX_UPLOAD_BYTES", "0")]))
            .expect_err("zero limit");
        assert!(err.to_string().contains("FUNNEL_MAX_UPLOAD_BYTES"));

        let err = server_config_from_lookup(lookup_from(&[("FUNNEL_CHART_WIDTH", "-5")]))
            .expect_err("negative width");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "FUNNEL_CHART_WIDTH",
                ..
            }
        ));
    }
}

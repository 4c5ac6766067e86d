//! Environment variable overrides.
//!
//! Applied after the TOML file is parsed, so deployments can tweak a
//! packaged config without editing it. Unparseable values are logged and
//! ignored; the file value stays in effect.

use super::{Config, LogFormat};
use std::net::SocketAddr;
use std::str::FromStr;

impl Config {
    /// Apply overrides from the process environment. Returns the keys applied.
    pub fn apply_env(&mut self) -> Vec<&'static str> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Returns the keys applied.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        // PORT and BIND_ADDRESS combine into a single socket address.
        let mut bind = self.server.bind;
        if let Some(ip) = parsed::<std::net::IpAddr, _>(&lookup, "BIND_ADDRESS") {
            bind.set_ip(ip);
            applied.push("BIND_ADDRESS");
        }
        if let Some(port) = parsed::<u16, _>(&lookup, "PORT") {
            bind.set_port(port);
            applied.push("PORT");
        }
        self.server.bind = SocketAddr::new(bind.ip(), bind.port());

        override_field(
            &lookup,
            "MAX_SESSIONS",
            &mut self.sessions.max_sessions,
            &mut applied,
        );
        override_field(
            &lookup,
            "CLEANUP_INTERVAL_MINUTES",
            &mut self.sessions.cleanup_interval_minutes,
            &mut applied,
        );
        override_field(
            &lookup,
            "SESSION_TIMEOUT_MINUTES",
            &mut self.sessions.timeout_minutes,
            &mut applied,
        );
        override_field(
            &lookup,
            "DEFAULT_DELAY_MS",
            &mut self.messages.default_delay_ms,
            &mut applied,
        );
        override_field(
            &lookup,
            "MAX_RETRIES",
            &mut self.messages.max_retries,
            &mut applied,
        );

        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level.trim().to_string();
            applied.push("LOG_LEVEL");
        }
        override_field::<LogFormat, _>(
            &lookup,
            "LOG_FORMAT",
            &mut self.logging.format,
            &mut applied,
        );

        applied
    }
}

fn override_field<T, F>(
    lookup: &F,
    key: &'static str,
    field: &mut T,
    applied: &mut Vec<&'static str>,
) where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = parsed(lookup, key) {
        *field = value;
        applied.push(key);
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn no_environment_changes_nothing() {
        let mut config = Config::default();
        let applied = config.apply_overrides(lookup(&[]));
        assert!(applied.is_empty());
        assert_eq!(config.server.bind, "127.0.0.1:3000".parse().unwrap());
    }

    #[test]
    fn port_and_bind_address_combine() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[("PORT", "8081"), ("BIND_ADDRESS", "0.0.0.0")]));
        assert_eq!(config.server.bind, "0.0.0.0:8081".parse().unwrap());
    }

    #[test]
    fn numeric_overrides() {
        let mut config = Config::default();
        let applied = config.apply_overrides(lookup(&[
            ("MAX_SESSIONS", "7"),
            ("CLEANUP_INTERVAL_MINUTES", "1"),
            ("SESSION_TIMEOUT_MINUTES", "5"),
            ("DEFAULT_DELAY_MS", "100"),
            ("MAX_RETRIES", "0"),
        ]));
        assert_eq!(applied.len(), 5);
        assert_eq!(config.sessions.max_sessions, 7);
        assert_eq!(config.sessions.cleanup_interval_minutes, 1);
        assert_eq!(config.sessions.timeout_minutes, 5);
        assert_eq!(config.messages.default_delay_ms, 100);
        assert_eq!(config.messages.max_retries, 0);
    }

    #[test]
    fn bad_values_are_ignored() {
        let mut config = Config::default();
        let applied = config.apply_overrides(lookup(&[
            ("PORT", "eighty"),
            ("MAX_SESSIONS", "-1"),
            ("LOG_FORMAT", "xml"),
        ]));
        assert!(applied.is_empty());
        assert_eq!(config.server.bind.port(), 3000);
        assert_eq!(config.sessions.max_sessions, 50);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn logging_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[("LOG_LEVEL", "debug"), ("LOG_FORMAT", "json")]));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}

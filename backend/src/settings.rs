//! Environment settings.
//!
//! | Variable             | Meaning                  | Default                    |
//! |----------------------|--------------------------|----------------------------|
//! | `OLAP_SERVER`        | XMLA server base URL     | required for queries       |
//! | `OLAP_USERNAME`      | basic-auth user          | required for queries       |
//! | `OLAP_PASSWORD`      | basic-auth password      | required for queries       |
//! | `OLAP_SSL_VERIFY`    | verify TLS certificates  | `false`                    |
//! | `CUBESYNC_PIPELINES` | pipelines file           | `pipelines/pipelines.yaml` |
//!
//! A `.env` file in the working directory is loaded first, if present.

use std::env;
use std::path::PathBuf;

use crate::error::{XmlaError, XmlaResult};
use crate::registry::DEFAULT_PIPELINES_FILE;

pub const OLAP_SERVER: &str = "OLAP_SERVER";
pub const OLAP_USERNAME: &str = "OLAP_USERNAME";
pub const OLAP_PASSWORD: &str = "OLAP_PASSWORD";
pub const OLAP_SSL_VERIFY: &str = "OLAP_SSL_VERIFY";
pub const CUBESYNC_PIPELINES: &str = "CUBESYNC_PIPELINES";

#[derive(Debug, Clone, Default)]
pub struct OlapSettings {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_verify: bool,
}

/// Credentials checked to be present.
#[derive(Debug, Clone, Copy)]
pub struct OlapCredentials<'a> {
    pub server: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

impl OlapSettings {
    pub fn require(&self) -> XmlaResult<OlapCredentials<'_>> {
        Ok(OlapCredentials {
            server: self
                .server
                .as_deref()
                .ok_or(XmlaError::MissingSetting(OLAP_SERVER))?,
            username: self
                .username
                .as_deref()
                .ok_or(XmlaError::MissingSetting(OLAP_USERNAME))?,
            password: self
                .password
                .as_deref()
                .ok_or(XmlaError::MissingSetting(OLAP_PASSWORD))?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub olap: OlapSettings,
    pub pipelines_file: PathBuf,
}

impl Settings {
    /// Read settings from the process environment, after loading `.env`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            olap: OlapSettings {
                server: non_empty(OLAP_SERVER),
                username: non_empty(OLAP_USERNAME),
                password: non_empty(OLAP_PASSWORD),
                ssl_verify: non_empty(OLAP_SSL_VERIFY).is_some_and(|v| parse_flag(&v)),
            },
            pipelines_file: non_empty(CUBESYNC_PIPELINES)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PIPELINES_FILE)),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]);
        assert!(!s.olap.ssl_verify);
        assert_eq!(s.pipelines_file, PathBuf::from("pipelines/pipelines.yaml"));
        assert!(matches!(
            s.olap.require(),
            Err(XmlaError::MissingSetting("OLAP_SERVER"))
        ));
    }

    #[test]
    fn test_full_settings() {
        let s = settings(&[
            ("OLAP_SERVER", "https://olap.example.com"),
            ("OLAP_USERNAME", "svc"),
            ("OLAP_PASSWORD", "secret"),
            ("OLAP_SSL_VERIFY", "True"),
            ("CUBESYNC_PIPELINES", "/etc/cubesync/pipelines.yaml"),
        ]);
        assert!(s.olap.ssl_verify);
        assert_eq!(s.pipelines_file, PathBuf::from("/etc/cubesync/pipelines.yaml"));
        let creds = s.olap.require().unwrap();
        assert_eq!(creds.username, "svc");
    }

    #[test]
    fn test_blank_values_are_missing() {
        let s = settings(&[("OLAP_SERVER", "https://olap"), ("OLAP_USERNAME", " ")]);
        assert!(matches!(
            s.olap.require(),
            Err(XmlaError::MissingSetting("OLAP_USERNAME"))
        ));
    }
}

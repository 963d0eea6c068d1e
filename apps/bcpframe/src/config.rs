//! # Configuration
//!
//! Connection profiles live in a TOML file:
//!
//! ```toml
//! [profiles.default]
//! server = "db01.corp"
//! database = "sales"
//! username = "loader"
//!
//! [profiles.warehouse]
//! connection_string = "Server=tcp:wh01,1444;Database=dw;Trusted_Connection=yes;"
//! bcp_path = "/opt/mssql-tools18/bin/bcp"
//! ```
//!
//! Command-line flags (and their `BCPFRAME_*` environment variables) win over
//! the profile, which wins over a profile connection string.

use crate::error::{AppError, Result};
use bcpframe_core::creds::{DEFAULT_DRIVER_VERSION, DEFAULT_PORT, REDACTED};
use bcpframe_core::SqlCreds;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "bcpframe";
const CONFIG_FILE: &str = "config.toml";

/// Profile used when none is named.
pub const DEFAULT_PROFILE: &str = "default";

// =============================================================================
// FILE
// =============================================================================

/// Contents of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

/// One named connection.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    /// ODBC-style string; individual fields below override its parts.
    pub connection_string: Option<String>,
    pub server: Option<String>,
    pub database: Option<String>,
    /// `0` means "let the client pick".
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub driver_version: Option<u32>,
    pub odbc: BTreeMap<String, String>,
    pub bcp_path: Option<PathBuf>,
    pub sqlcmd_path: Option<PathBuf>,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| REDACTED),
            )
            .field("server", &self.server)
            .field("database", &self.database)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("driver_version", &self.driver_version)
            .field("odbc", &self.odbc)
            .field("bcp_path", &self.bcp_path)
            .field("sqlcmd_path", &self.sqlcmd_path)
            .finish()
    }
}

impl ConfigFile {
    /// Parse config text.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load the config file.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// tried and a missing file yields an empty config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                return Err(AppError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            tracing::debug!(path = %path.display(), "No config file, using flags only");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Self::parse(&text)
    }
}

/// `<config dir>/bcpframe/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Some(path)
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Connection settings given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOverrides {
    pub server: Option<String>,
    pub database: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub bcp_path: Option<PathBuf>,
    pub sqlcmd_path: Option<PathBuf>,
}

/// Final connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub creds: SqlCreds,
    pub bcp_path: Option<PathBuf>,
    pub sqlcmd_path: Option<PathBuf>,
}

/// Merge the named profile with command-line overrides.
///
/// Naming a profile that does not exist is an error; the default profile
/// may be absent.
pub fn resolve(
    file: &ConfigFile,
    profile: Option<&str>,
    overrides: &ConnectionOverrides,
) -> Result<ResolvedConnection> {
    let empty = Profile::default();
    let selected = match profile {
        Some(name) => file
            .profiles
            .get(name)
            .ok_or_else(|| AppError::Config(format!("no profile named {name:?}")))?,
        None => file.profiles.get(DEFAULT_PROFILE).unwrap_or(&empty),
    };

    let base = selected
        .connection_string
        .as_deref()
        .map(SqlCreds::from_odbc_connection_string)
        .transpose()?;

    let server = pick(&overrides.server, &selected.server, base.as_ref().map(|c| &c.server))
        .ok_or_else(|| missing("server", "--server"))?;
    let database = pick(
        &overrides.database,
        &selected.database,
        base.as_ref().map(|c| &c.database),
    )
    .ok_or_else(|| missing("database", "--database"))?;

    let port = match overrides.port.or(selected.port) {
        Some(0) => None,
        Some(port) => Some(port),
        None => base.as_ref().map_or(Some(DEFAULT_PORT), |c| c.port),
    };

    let mut creds = SqlCreds::new(server, database).with_port(port);
    creds.username = pick(
        &overrides.username,
        &selected.username,
        base.as_ref().and_then(|c| c.username.as_ref()),
    );
    creds.password = pick(
        &overrides.password,
        &selected.password,
        base.as_ref().and_then(|c| c.password.as_ref()),
    );
    creds.driver_version = selected
        .driver_version
        .or_else(|| base.as_ref().map(|c| c.driver_version))
        .unwrap_or(DEFAULT_DRIVER_VERSION);
    if let Some(base) = &base {
        creds.odbc_options.clone_from(&base.odbc_options);
    }
    creds.odbc_options.extend(selected.odbc.clone());

    Ok(ResolvedConnection {
        creds,
        bcp_path: overrides.bcp_path.clone().or_else(|| selected.bcp_path.clone()),
        sqlcmd_path: overrides
            .sqlcmd_path
            .clone()
            .or_else(|| selected.sqlcmd_path.clone()),
    })
}

fn pick(
    flag: &Option<String>,
    profile: &Option<String>,
    base: Option<&String>,
) -> Option<String> {
    flag.as_ref().or(profile.as_ref()).or(base).cloned()
}

fn missing(field: &str, flag: &str) -> AppError {
    AppError::Config(format!(
        "no {field} given: pass {flag} or set it in the config profile"
    ))
}

// =============================================================================
// TESTS
// =============================================================================

//! # Credentials Module
//!
//! Connection settings shared by `bcp` and `sqlcmd`.
//!
//! Only SQL logins and trusted (integrated/Kerberos) authentication are
//! supported. Missing username or password means trusted authentication.

use crate::error::{BcpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;

/// Default Microsoft ODBC driver major version.
pub const DEFAULT_DRIVER_VERSION: u32 = 17;

/// Placeholder written wherever a password would appear in output.
pub const REDACTED: &str = "[REDACTED]";

/// Credentials for every SQL operation of a load.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlCreds {
    pub server: String,
    pub database: String,
    /// `None` leaves the port to the client default.
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub driver_version: u32,
    /// Extra `key=value` pairs appended to the ODBC connection string.
    pub odbc_options: BTreeMap<String, String>,
}

impl SqlCreds {
    /// Credentials on the default port with trusted authentication.
    pub fn new(server: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            port: Some(DEFAULT_PORT),
            username: None,
            password: None,
            driver_version: DEFAULT_DRIVER_VERSION,
            odbc_options: BTreeMap::new(),
        }
    }

    /// Use a SQL login.
    #[must_use]
    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Trusted authentication unless both username and password are present.
    #[must_use]
    pub fn uses_trusted_auth(&self) -> bool {
        self.login().is_none()
    }

    /// `(username, password)` when a full SQL login is configured.
    #[must_use]
    pub fn login(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user, password))
            }
            _ => None,
        }
    }

    /// Value for the `-S` argument of `bcp` and `sqlcmd`.
    #[must_use]
    pub fn server_arg(&self) -> String {
        match self.port {
            Some(port) => format!("{},{}", self.server, port),
            None => self.server.clone(),
        }
    }

    /// Build an ODBC connection string.
    #[must_use]
    pub fn odbc_connection_string(&self) -> String {
        let port = self.port.map(|p| format!(",{p}")).unwrap_or_default();
        let mut url = format!(
            "Driver={{ODBC Driver {} for SQL Server}};Server=tcp:{}{};Database={};",
            self.driver_version, self.server, port, self.database
        );
        match self.login() {
            Some((user, password)) => url.push_str(&format!("UID={user};PWD={password};")),
            None => url.push_str("Trusted_Connection=yes;"),
        }
        let extras: Vec<String> = self
            .odbc_options
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        url.push_str(&extras.join(";"));
        url
    }

    /// Parse an ODBC connection string such as one built by
    /// [`SqlCreds::odbc_connection_string`].
    ///
    /// Keys are matched case-insensitively. Unknown keys other than `Driver`
    /// and `Trusted_Connection` are kept as ODBC options.
    pub fn from_odbc_connection_string(conn: &str) -> Result<Self> {
        let mut server = None;
        let mut database = None;
        let mut username = None;
        let mut password = None;
        let mut driver_version = DEFAULT_DRIVER_VERSION;
        let mut odbc_options = BTreeMap::new();

        for part in conn.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "server" => server = Some(value.to_string()),
                "database" => database = Some(value.to_string()),
                "uid" => username = Some(value.to_string()),
                "pwd" => password = Some(value.to_string()),
                "driver" => {
                    if let Some(v) = parse_driver_version(value) {
                        driver_version = v;
                    }
                }
                "trusted_connection" => {}
                _ => {
                    odbc_options.insert(key.trim().to_string(), value.to_string());
                }
            }
        }

        let server = server
            .ok_or_else(|| BcpError::InvalidConnectionString("missing Server".into()))?;
        let database = database
            .ok_or_else(|| BcpError::InvalidConnectionString("missing Database".into()))?;

        let server = server.strip_prefix("tcp:").unwrap_or(&server).to_string();
        let (host, port) = match server.split_once(',') {
            Some((host, port)) => {
                let port = port.trim().parse::<u16>().map_err(|_| {
                    BcpError::InvalidConnectionString(format!("invalid port {port:?}"))
                })?;
                (host.to_string(), Some(port))
            }
            None => (server, None),
        };

        Ok(Self {
            server: host,
            database,
            port,
            username,
            password,
            driver_version,
            odbc_options,
        })
    }
}

/// `{ODBC Driver 18 for SQL Server}` -> 18
fn parse_driver_version(driver: &str) -> Option<u32> {
    driver
        .trim_matches(|c| c == '{' || c == '}')
        .split_whitespace()
        .find_map(|word| word.parse().ok())
}

impl fmt::Debug for SqlCreds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlCreds")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("driver_version", &self.driver_version)
            .field("trusted_auth", &self.uses_trusted_auth())
            .finish()
    }
}

impl fmt::Display for SqlCreds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// TESTS
// =============================================================================

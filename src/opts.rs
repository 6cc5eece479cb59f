//! Connection options.

use std::time::Duration;

use url::Url;

use crate::error::Error;

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Never use SSL
    Disable,
    /// Try unencrypted first, retry with SSL if the server demands it
    Allow,
    /// Try SSL first, fall back to unencrypted if not supported
    #[default]
    Prefer,
    /// Require SSL; fail if the server refuses
    Require,
}

impl SslMode {
    fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            _ => Err(Error::InvalidUsage(format!(
                "invalid sslmode: expected one of ['disable', 'allow', 'prefer', 'require'], got {}",
                value
            ))),
        }
    }
}

/// Connection options for PostgreSQL.
///
/// Driver-side options (transport, TLS, timeouts) are struct fields; anything
/// else found in a connection URI is forwarded verbatim as a startup setting
/// through [`Opts::settings`].
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path. Takes precedence over host/port when set.
    ///
    /// Default: `None`
    pub unix: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Client certificate file (PEM).
    pub ssl_crt_file: Option<String>,

    /// Client private key file (PEM).
    pub ssl_key_file: Option<String>,

    /// Root certificate file used to verify the server (PEM).
    pub ssl_root_crt_file: Option<String>,

    /// Connect timeout.
    ///
    /// Default: `None` (OS default)
    pub connect_timeout: Option<Duration>,

    /// Expected server encoding, recorded for session reporting. The driver
    /// itself always negotiates `client_encoding=UTF8`.
    pub server_encoding: Option<String>,

    /// Additional startup settings sent verbatim in the StartupMessage.
    ///
    /// Default: `[]`
    pub settings: Vec<(String, String)>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            unix: None,
            user: String::new(),
            database: None,
            password: None,
            ssl_mode: SslMode::Prefer,
            ssl_crt_file: None,
            ssl_key_file: None,
            ssl_root_crt_file: None,
            connect_timeout: None,
            server_encoding: None,
            settings: Vec::new(),
        }
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URI.
    ///
    /// Format: `pq://[user[:password]@]host[:port]/database?setting=value&[driver_setting]=value`
    ///
    /// Square-bracketed query keys are driver options; plain keys are
    /// forwarded as startup settings. Recognized driver options:
    /// `sslmode`, `sslcrtfile`, `sslkeyfile`, `sslrootcrtfile`,
    /// `connect_timeout`, `server_encoding`, `unix`.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["pq", "postgres", "postgresql"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "invalid scheme: expected 'pq://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: percent_decode(url.username()),
            password: url.password().map(percent_decode),
            database: url.path().strip_prefix('/').and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            // `[name]` marks a driver-side option; bare names (and a few
            // well-known aliases) are startup settings.
            let driver_key = key
                .strip_prefix('[')
                .and_then(|k| k.strip_suffix(']'))
                .map(str::to_string);

            let effective = driver_key.as_deref().unwrap_or_else(|| key.as_ref());
            match (driver_key.is_some(), effective) {
                (_, "sslmode") => opts.ssl_mode = SslMode::parse(&value)?,
                (_, "sslcrtfile") => opts.ssl_crt_file = Some(value.to_string()),
                (_, "sslkeyfile") => opts.ssl_key_file = Some(value.to_string()),
                (_, "sslrootcrtfile") => opts.ssl_root_crt_file = Some(value.to_string()),
                (_, "connect_timeout") => {
                    let secs: u64 = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!("invalid connect_timeout: {}", value))
                    })?;
                    opts.connect_timeout = Some(Duration::from_secs(secs));
                }
                (_, "server_encoding") => opts.server_encoding = Some(value.to_string()),
                (_, "unix") => opts.unix = Some(value.to_string()),
                (true, other) => {
                    return Err(Error::InvalidUsage(format!(
                        "unknown driver option: [{}]",
                        other
                    )));
                }
                (false, _) => {
                    opts.settings.push((key.to_string(), value.to_string()));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("invalid URI: {}", e)))?;
        Self::try_from(&url)
    }
}

/// Anything a connection can be configured from: an [`Opts`] struct or a
/// `pq://` URI.
pub trait IntoOpts {
    /// Produce the connection options.
    fn into_opts(self) -> Result<Opts, Error>;
}

impl IntoOpts for Opts {
    fn into_opts(self) -> Result<Opts, Error> {
        Ok(self)
    }
}

impl IntoOpts for &Opts {
    fn into_opts(self) -> Result<Opts, Error> {
        Ok(self.clone())
    }
}

impl IntoOpts for &str {
    fn into_opts(self) -> Result<Opts, Error> {
        Opts::try_from(self)
    }
}

impl IntoOpts for String {
    fn into_opts(self) -> Result<Opts, Error> {
        Opts::try_from(self.as_str())
    }
}

impl IntoOpts for &String {
    fn into_opts(self) -> Result<Opts, Error> {
        Opts::try_from(self.as_str())
    }
}

impl IntoOpts for &Url {
    fn into_opts(self) -> Result<Opts, Error> {
        Opts::try_from(self)
    }
}

fn percent_decode(s: &str) -> String {
    // Userinfo may carry %-escapes; anything malformed passes through as-is.
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = |b: u8| match b {
                b'0'..=b'9' => Some(b - b'0'),
                b'a'..=b'f' => Some(b - b'a' + 10),
                b'A'..=b'F' => Some(b - b'A' + 10),
                _ => None,
            };
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_uri() {
        let opts = Opts::try_from("pq://alice:secret@db.example.com:6432/appdb").unwrap();
        assert_eq!(opts.user, "alice");
        assert_eq!(opts.password.as_deref(), Some("secret"));
        assert_eq!(opts.host, "db.example.com");
        assert_eq!(opts.port, 6432);
        assert_eq!(opts.database.as_deref(), Some("appdb"));
    }

    #[test]
    fn driver_options_and_settings() {
        let opts = Opts::try_from(
            "pq://u@h/db?application_name=myapp&[sslmode]=require&[connect_timeout]=5",
        )
        .unwrap();
        assert_eq!(opts.ssl_mode, SslMode::Require);
        assert_eq!(opts.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            opts.settings,
            vec![("application_name".to_string(), "myapp".to_string())]
        );
    }

    #[test]
    fn bare_sslmode_recognized() {
        let opts = Opts::try_from("pq://u@h/db?sslmode=disable").unwrap();
        assert_eq!(opts.ssl_mode, SslMode::Disable);
        assert!(opts.settings.is_empty());
    }

    #[test]
    fn unknown_driver_option_rejected() {
        assert!(Opts::try_from("pq://u@h/db?[nope]=1").is_err());
    }

    #[test]
    fn bad_scheme_rejected() {
        assert!(Opts::try_from("mysql://u@h/db").is_err());
    }

    #[test]
    fn percent_decoded_userinfo() {
        let opts = Opts::try_from("pq://a%40corp:p%23w@h/db").unwrap();
        assert_eq!(opts.user, "a@corp");
        assert_eq!(opts.password.as_deref(), Some("p#w"));
    }
}

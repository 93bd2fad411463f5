// ABOUTME: Connection URI normalization for the source and destination databases
// ABOUTME: Validates scheme and host, rewrites ports and replaces query parameters

use std::fmt;
use url::Url;

use crate::error::{MigratorError, Result};
use crate::settings::DestinationRules;

/// Query flag forcing TLS on the PlanetScale side.
pub const SOURCE_TLS_FLAG: (&str, &str) = ("useSSL", "true");
/// pgloader runs inside a container and cannot validate the pooler certificate.
pub const DESTINATION_SSL_FLAG: (&str, &str) = ("sslmode", "disable");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::Source => "MySQL",
            Role::Destination => "Postgres",
        }
    }

    fn allowed_schemes(self) -> &'static [&'static str] {
        match self {
            Role::Source => &["mysql"],
            Role::Destination => &["postgres", "postgresql"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Mysql,
    Postgres,
}

/// A validated connection string. The underlying URL is the exact locator
/// handed to pgloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEndpoint {
    role: Role,
    scheme: Scheme,
    url: Url,
}

impl ConnectionEndpoint {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    pub fn username(&self) -> &str {
        self.url.username()
    }

    pub fn password(&self) -> Option<&str> {
        self.url.password()
    }

    /// Path component without its leading separator.
    pub fn database(&self) -> &str {
        let path = self.url.path();
        path.strip_prefix('/').unwrap_or(path)
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url.query_pairs().into_owned().collect()
    }

    /// Supabase pooler usernames look like `postgres.<project-ref>`.
    pub fn project_ref(&self) -> Option<&str> {
        self.username().split('.').nth(1).filter(|r| !r.is_empty())
    }

    /// Locator safe for logs: the password is masked.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("****"));
        }
        url.to_string()
    }
}

impl fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Parses and sanitizes a raw connection string for the given role.
pub fn normalize(raw: &str, role: Role, rules: &DestinationRules) -> Result<ConnectionEndpoint> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| MigratorError::InvalidUri(format!("'{}': {}", redact_raw(raw), e)))?;

    let scheme = url.scheme().to_string();
    if !role.allowed_schemes().contains(&scheme.as_str()) {
        return Err(MigratorError::WrongScheme {
            role: role.label(),
            expected: role.allowed_schemes().join(" or "),
            found: scheme,
        });
    }

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => {
            return Err(MigratorError::InvalidUri(format!(
                "'{}' has no host",
                redact_raw(raw)
            )))
        }
    };

    let (scheme, flag) = match role {
        Role::Source => {
            let database = url.path().trim_start_matches('/');
            if database.is_empty() {
                return Err(MigratorError::InvalidUri(format!(
                    "'{}' does not name a database",
                    redact_raw(raw)
                )));
            }
            (Scheme::Mysql, SOURCE_TLS_FLAG)
        }
        Role::Destination => {
            if url.port() == Some(rules.pooled_port) {
                url.set_port(Some(rules.direct_port)).map_err(|_| {
                    MigratorError::InvalidUri(format!("cannot set port on '{}'", host))
                })?;
            }
            if !host.contains(&rules.pooler_domain) {
                return Err(MigratorError::UnexpectedHost {
                    host,
                    marker: rules.pooler_domain.clone(),
                });
            }
            (Scheme::Postgres, DESTINATION_SSL_FLAG)
        }
    };

    url.set_query(None);
    url.query_pairs_mut().append_pair(flag.0, flag.1);

    Ok(ConnectionEndpoint { role, scheme, url })
}

// Best effort: the string did not parse, so mask anything between ':' and '@'.
fn redact_raw(raw: &str) -> String {
    match (raw.find("://"), raw.rfind('@')) {
        (Some(start), Some(at)) if at > start + 3 => {
            let userinfo = &raw[start + 3..at];
            match userinfo.find(':') {
                Some(colon) => format!(
                    "{}{}:****{}",
                    &raw[..start + 3],
                    &userinfo[..colon],
                    &raw[at..]
                ),
                None => raw.to_string(),
            }
        }
        _ => raw.to_string(),
    }
}

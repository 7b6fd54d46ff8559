//! Storage credentials loaded from the process environment.
//!
//! The only supported credential is a connection string carrying a shared access signature:
//!
//! ```text
//! BlobEndpoint=https://account.blob.core.windows.net/;SharedAccessSignature=sv=2022-11-02&ss=b&...
//! ```
//!
//! Instead of `BlobEndpoint`, the endpoint may be given through `AccountName`, optionally combined
//! with `DefaultEndpointsProtocol` and `EndpointSuffix`.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Environment variable holding the connection string.
pub const CONNECTION_STRING_ENV: &str = "AZURE_STORAGE_CONNECTION_STRING";

/// Errors while loading or parsing a connection string.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The environment variable is not set or not valid unicode.
    #[error("environment variable `{CONNECTION_STRING_ENV}` is not set")]
    Missing,

    /// A required key is absent from the connection string.
    #[error("connection string lacks `{0}`")]
    MissingField(&'static str),

    /// The blob endpoint is not a valid URL.
    #[error("invalid blob endpoint `{0}`")]
    InvalidEndpoint(String),
}

/// A parsed connection string.
///
/// The shared access signature never shows up in [`fmt::Debug`] output.
#[derive(Clone)]
pub struct ConnectionString {
    endpoint: reqwest::Url,
    sas: SecretString,
}

impl ConnectionString {
    /// Reads and parses the connection string from [`CONNECTION_STRING_ENV`].
    pub fn from_env() -> Result<Self, CredentialError> {
        let raw = std::env::var(CONNECTION_STRING_ENV).map_err(|_| CredentialError::Missing)?;
        raw.parse()
    }

    /// The blob service endpoint, always ending in a slash.
    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }

    /// The shared access signature, without a leading `?`.
    pub fn sas(&self) -> &SecretString {
        &self.sas
    }
}

impl std::str::FromStr for ConnectionString {
    type Err = CredentialError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut blob_endpoint = None;
        let mut account = None;
        let mut protocol = None;
        let mut suffix = None;
        let mut sas = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key {
                "BlobEndpoint" => blob_endpoint = Some(value),
                "AccountName" => account = Some(value),
                "DefaultEndpointsProtocol" => protocol = Some(value),
                "EndpointSuffix" => suffix = Some(value),
                "SharedAccessSignature" => sas = Some(value),
                _ => {}
            }
        }

        let endpoint = match (blob_endpoint, account) {
            (Some(endpoint), _) => endpoint.to_owned(),
            (None, Some(account)) => format!(
                "{}://{account}.blob.{}",
                protocol.unwrap_or("https"),
                suffix.unwrap_or("core.windows.net")
            ),
            (None, None) => return Err(CredentialError::MissingField("BlobEndpoint")),
        };
        let endpoint = if endpoint.ends_with('/') {
            endpoint
        } else {
            format!("{endpoint}/")
        };
        let endpoint = reqwest::Url::parse(&endpoint)
            .map_err(|_| CredentialError::InvalidEndpoint(endpoint.clone()))?;

        let sas = sas
            .map(|s| s.trim_start_matches('?'))
            .filter(|s| !s.is_empty())
            .ok_or(CredentialError::MissingField("SharedAccessSignature"))?;

        Ok(Self {
            endpoint,
            sas: SecretString::from(sas.to_owned()),
        })
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint.as_str())
            .field("sas", &"[redacted]")
            .finish()
    }
}

impl PartialEq for ConnectionString {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint && self.sas.expose_secret() == other.sas.expose_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blob_endpoint() {
        let conn: ConnectionString =
            "BlobEndpoint=https://acct.blob.core.windows.net;SharedAccessSignature=?sv=1&sig=abc"
                .parse()
                .unwrap();
        assert_eq!(conn.endpoint().as_str(), "https://acct.blob.core.windows.net/");
        assert_eq!(conn.sas().expose_secret(), "sv=1&sig=abc");
    }

    #[test]
    fn derives_endpoint_from_account() {
        let conn: ConnectionString = "DefaultEndpointsProtocol=http;AccountName=dev;\
             EndpointSuffix=localhost:10000;SharedAccessSignature=sig=x"
            .parse()
            .unwrap();
        assert_eq!(conn.endpoint().as_str(), "http://dev.blob.localhost:10000/");
    }

    #[test]
    fn requires_signature() {
        let err = "AccountName=acct;AccountKey=c2VjcmV0"
            .parse::<ConnectionString>()
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::MissingField("SharedAccessSignature")
        ));
    }

    #[test]
    fn requires_endpoint() {
        let err = "SharedAccessSignature=sig=x"
            .parse::<ConnectionString>()
            .unwrap_err();
        assert!(matches!(err, CredentialError::MissingField("BlobEndpoint")));
    }

    #[test]
    fn debug_redacts_signature() {
        let conn: ConnectionString = "BlobEndpoint=https://acct.example/;SharedAccessSignature=sig=hunter2"
            .parse()
            .unwrap();
        assert!(!format!("{conn:?}").contains("hunter2"));
    }
}

//! DID document resolution over HTTP.
//!
//! Supported methods:
//!
//! | Method    | Document location                               |
//! |-----------|-------------------------------------------------|
//! | `did:plc` | `{plc_url}/{did}` (PLC directory)               |
//! | `did:web` | `https://{host}/.well-known/did.json`           |
//!
//! Only the `alsoKnownAs` aliases are kept; handle extraction happens in
//! [`ResolvedIdentity::handle`].

use crate::{Error, Result};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Scheme prefix of a handle alias in `alsoKnownAs`.
const HANDLE_ALIAS_PREFIX: &str = "at://";

/// Identity information resolved for a DID.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedIdentity {
    pub did: String,
    /// Aliases from the DID document, in document order.
    pub also_known_as: Vec<String>,
}

impl ResolvedIdentity {
    /// The first `at://<handle>` alias, without its scheme.
    pub fn handle(&self) -> Option<&str> {
        self.also_known_as
            .iter()
            .filter_map(|alias| alias.strip_prefix(HANDLE_ALIAS_PREFIX))
            .find(|handle| !handle.is_empty())
    }
}

/// Resolves a DID into identity information.
///
/// Implementations are consulted by [`HandleCache`](super::HandleCache) on a
/// miss only.
pub trait IdentityBackend: Send + Sync {
    fn resolve(&self, did: &str) -> impl Future<Output = Result<ResolvedIdentity>> + Send;
}

/// Configuration for the HTTP resolver.
#[derive(Debug, Clone)]
pub struct HttpResolverConfig {
    /// Base URL of the PLC directory.
    pub plc_url: String,

    /// Timeout for a single document request.
    pub timeout: Duration,
}

impl Default for HttpResolverConfig {
    fn default() -> Self {
        Self {
            plc_url: "https://plc.directory".to_string(),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Subset of a DID document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidDocument {
    id: String,
    #[serde(default)]
    also_known_as: Vec<String>,
}

/// Fetches DID documents from the PLC directory or `did:web` hosts.
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    config: HttpResolverConfig,
}

impl HttpResolver {
    /// Create a resolver with its own HTTP client.
    pub fn new(config: HttpResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("skyscrape/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// Location of the DID document for `did`.
    fn document_url(&self, did: &str) -> Result<String> {
        if let Some(id) = did.strip_prefix("did:plc:") {
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::Resolution(format!("malformed did:plc identifier '{did}'")));
            }
            Ok(format!("{}/{}", self.config.plc_url.trim_end_matches('/'), did))
        } else if let Some(host) = did.strip_prefix("did:web:") {
            let host = host.replace("%3A", ":");
            if host.is_empty() || (host.contains([':', '/']) && !is_host_with_port(&host)) {
                return Err(Error::Resolution(format!("unsupported did:web identifier '{did}'")));
            }
            Ok(format!("https://{host}/.well-known/did.json"))
        } else {
            Err(Error::Resolution(format!("unsupported DID method in '{did}'")))
        }
    }
}

fn is_host_with_port(host: &str) -> bool {
    match host.split_once(':') {
        Some((name, port)) => {
            !name.is_empty() && !name.contains('/') && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

impl IdentityBackend for HttpResolver {
    fn resolve(&self, did: &str) -> impl Future<Output = Result<ResolvedIdentity>> + Send {
        let url = self.document_url(did);
        let client = self.client.clone();
        let did = did.to_string();

        async move {
            let url = url?;
            let response = client.get(&url).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::Resolution(format!("{url} returned {status}")));
            }

            let document: DidDocument = response.json().await?;
            if document.id != did {
                return Err(Error::Resolution(format!(
                    "document at {url} is for {}, expected {did}",
                    document.id
                )));
            }

            Ok(ResolvedIdentity {
                did,
                also_known_as: document.also_known_as,
            })
        }
    }
}

// ABOUTME: Container engine endpoint parsing
// ABOUTME: Maps a single DOCKER_HOST-style string onto a named pipe, unix socket or TCP/TLS transport

use tracing::warn;
use url::Url;

const DEFAULT_TCP_PORT: u16 = 2375;
const DEFAULT_TLS_PORT: u16 = 2376;

/// Transport selected by the configured engine endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEndpoint {
    /// `npipe:////./pipe/docker_engine`
    NamedPipe(String),
    /// `unix:///var/run/docker.sock`
    UnixSocket(String),
    /// `tcp://host:port`, TLS when `https://` or when TLS verification is requested
    Tcp { address: String, tls: bool },
    /// Let the engine client probe its platform defaults
    AutoDetect,
}

impl EngineEndpoint {
    /// Parse an endpoint string. Malformed input never fails; it degrades to
    /// `AutoDetect` with a warning so a typo does not take the sandbox down.
    pub fn parse(raw: &str, tls_verify: bool) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            warn!("Empty engine endpoint, falling back to auto-detection");
            return EngineEndpoint::AutoDetect;
        }

        // Bare socket paths are common in hand-written configs
        if raw.starts_with('/') {
            return EngineEndpoint::UnixSocket(format!("unix://{}", raw));
        }

        let Some((scheme, rest)) = raw.split_once("://") else {
            warn!(
                "Engine endpoint '{}' has no scheme, falling back to auto-detection",
                raw
            );
            return EngineEndpoint::AutoDetect;
        };

        let scheme = scheme.to_ascii_lowercase();
        match scheme.as_str() {
            "npipe" if !rest.is_empty() => EngineEndpoint::NamedPipe(raw.to_string()),
            "unix" if rest.starts_with('/') => EngineEndpoint::UnixSocket(raw.to_string()),
            "tcp" | "http" | "https" => {
                let tls = scheme == "https" || (scheme == "tcp" && tls_verify);
                Self::parse_tcp(rest, tls).unwrap_or_else(|| {
                    warn!(
                        "Engine endpoint '{}' is not a valid host:port, falling back to auto-detection",
                        raw
                    );
                    EngineEndpoint::AutoDetect
                })
            }
            _ => {
                warn!(
                    "Unsupported engine endpoint '{}', falling back to auto-detection",
                    raw
                );
                EngineEndpoint::AutoDetect
            }
        }
    }

    fn parse_tcp(authority: &str, tls: bool) -> Option<Self> {
        let url = Url::parse(&format!("http://{}", authority)).ok()?;
        let host = url.host_str().filter(|h| !h.is_empty())?;
        if url.path() != "/" && !url.path().is_empty() {
            return None;
        }
        let port = url
            .port()
            .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_TCP_PORT });

        Some(EngineEndpoint::Tcp {
            address: format!("tcp://{}:{}", host, port),
            tls,
        })
    }

    /// Short human-readable transport name for logs
    pub fn transport(&self) -> &'static str {
        match self {
            EngineEndpoint::NamedPipe(_) => "named pipe",
            EngineEndpoint::UnixSocket(_) => "unix socket",
            EngineEndpoint::Tcp { tls: true, .. } => "tcp+tls",
            EngineEndpoint::Tcp { tls: false, .. } => "tcp",
            EngineEndpoint::AutoDetect => "auto-detect",
        }
    }
}

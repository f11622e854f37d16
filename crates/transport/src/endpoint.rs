//! Connection-mode resolution
//!
//! Direct mode embeds the agent id in the remote host's streaming
//! endpoint; proxy mode targets a fixed relay and defers agent
//! identification to the first application message.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::TransportError;

/// How the session reaches the remote agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Straight to the agent host
    Direct,
    /// Through the fixed relay, for restrictive networks
    Proxy,
}

impl std::str::FromStr for ConnectionMode {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ConnectionMode::Direct),
            "proxy" => Ok(ConnectionMode::Proxy),
            other => Err(TransportError::Config(format!(
                "unknown connection mode '{other}'"
            ))),
        }
    }
}

/// Endpoint base URLs, supplied by configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Streaming endpoint of the remote agent host (direct mode)
    pub direct_base_url: String,
    /// Fixed relay address (proxy mode)
    pub relay_url: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            direct_base_url: "wss://api.elevenlabs.io/v1/convai/conversation".into(),
            relay_url: "wss://relay.internal:8443/ws".into(),
        }
    }
}

/// Resolved target for one connection attempt
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: Url,
    pub mode: ConnectionMode,
}

/// Build the target endpoint for `mode`.
///
/// Failures here are configuration errors, surfaced before any
/// connection attempt.
pub fn resolve(
    mode: ConnectionMode,
    agent_id: Option<&str>,
    settings: &EndpointSettings,
) -> Result<Endpoint, TransportError> {
    match mode {
        ConnectionMode::Direct => {
            let agent_id = agent_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| TransportError::Config("direct mode requires an agent id".into()))?;

            let mut url = Url::parse(&settings.direct_base_url)
                .map_err(|e| TransportError::Config(format!("invalid direct base URL: {e}")))?;
            url.query_pairs_mut().append_pair("agent_id", agent_id);

            Ok(Endpoint {
                url,
                mode: ConnectionMode::Direct,
            })
        }
        ConnectionMode::Proxy => {
            if settings.relay_url.is_empty() {
                return Err(TransportError::Config("proxy mode requires a relay URL".into()));
            }
            let url = Url::parse(&settings.relay_url)
                .map_err(|e| TransportError::Config(format!("invalid relay URL: {e}")))?;

            Ok(Endpoint {
                url,
                mode: ConnectionMode::Proxy,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EndpointSettings {
        EndpointSettings {
            direct_base_url: "wss://agent.example.com/v1/stream".into(),
            relay_url: "wss://relay.example.com/voice".into(),
        }
    }

    #[test]
    fn test_direct_embeds_agent_id() {
        let endpoint = resolve(ConnectionMode::Direct, Some("a1"), &settings()).unwrap();
        assert_eq!(endpoint.mode, ConnectionMode::Direct);
        assert_eq!(
            endpoint.url.as_str(),
            "wss://agent.example.com/v1/stream?agent_id=a1"
        );
    }

    #[test]
    fn test_direct_without_agent_id_is_config_error() {
        let err = resolve(ConnectionMode::Direct, None, &settings()).unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));

        let err = resolve(ConnectionMode::Direct, Some(""), &settings()).unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn test_proxy_uses_fixed_relay() {
        // Agent id is not part of the proxy URL; it travels in the first
        // application message instead.
        let endpoint = resolve(ConnectionMode::Proxy, Some("a1"), &settings()).unwrap();
        assert_eq!(endpoint.url.as_str(), "wss://relay.example.com/voice");
    }

    #[test]
    fn test_proxy_requires_relay() {
        let mut s = settings();
        s.relay_url.clear();
        assert!(resolve(ConnectionMode::Proxy, None, &s).is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("direct".parse::<ConnectionMode>().unwrap(), ConnectionMode::Direct);
        assert_eq!("proxy".parse::<ConnectionMode>().unwrap(), ConnectionMode::Proxy);
        assert!("p2p".parse::<ConnectionMode>().is_err());
    }
}

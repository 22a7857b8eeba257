// Client configuration
// Logging defaults to verbose only in development builds

use crate::error::{MeshError, Result};
use crate::utils::add_ice_url_scheme;
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "warn";

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3001";

/// ICE server entry as configured by the user
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }
}

/// Settings for one client process
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MeshConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub relay_url: String,
    pub log_filter: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            relay_url: DEFAULT_RELAY_URL.into(),
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl MeshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.relay_url.trim().is_empty() {
            return Err(MeshError::InvalidConfig("relay URL cannot be empty".into()));
        }
        validate_ice_servers(&self.ice_servers)
    }

    /// Replaces the ICE servers from a JSON array of [`ServerConfig`]
    pub fn with_ice_servers_json(mut self, json: &str) -> Result<Self> {
        let servers: Vec<ServerConfig> = serde_json::from_str(json)?;
        validate_ice_servers(&servers)?;
        self.ice_servers = servers;
        Ok(self)
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
    ]
}

pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<()> {
    for server in servers {
        if server.url.is_empty() {
            return Err(MeshError::InvalidConfig(format!(
                "server {} has an empty URL",
                server.id
            )));
        }

        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(MeshError::InvalidConfig(format!(
                "TURN server {} requires username and credential",
                server.id
            )));
        }
    }
    Ok(())
}

/// Converts user server entries into `webrtc` ICE servers
pub fn get_user_ice_servers(servers: Vec<ServerConfig>) -> Vec<RTCIceServer> {
    servers
        .into_iter()
        .map(|config| {
            let url = add_ice_url_scheme(&config);

            RTCIceServer {
                urls: vec![url],
                username: config.username.unwrap_or_default(),
                credential: config.credential.unwrap_or_default(),
                ..Default::default()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MeshConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let json = r#"[{"id":"t","type":"turn","url":"turn.example.org:3478"}]"#;
        let err = MeshConfig::default().with_ice_servers_json(json).unwrap_err();
        assert!(matches!(err, MeshError::InvalidConfig(_)));
    }

    #[test]
    fn empty_url_is_rejected() {
        let servers = vec![ServerConfig::stun("s", "")];
        assert!(validate_ice_servers(&servers).is_err());
    }

    #[test]
    fn urls_gain_missing_scheme() {
        let json = r#"[
            {"id":"s","type":"stun","url":"stun.example.org:3478"},
            {"id":"t","type":"turn","url":"turn.example.org:3478","username":"u","credential":"p"}
        ]"#;
        let config = MeshConfig::default().with_ice_servers_json(json).unwrap();
        let servers = get_user_ice_servers(config.ice_servers);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.org:3478".to_string()]);
        assert_eq!(servers[1].urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(servers[1].username, "u");
    }
}

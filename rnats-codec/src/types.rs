use serde::{Deserialize, Serialize};

/// Client library name reported in `CONNECT`
pub const LANG: &str = "rust";

/// Client library version reported in `CONNECT`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server information carried by `INFO`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub go: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub proto: i8,
    #[serde(default)]
    pub max_payload: usize,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub tls_required: bool,
    #[serde(default)]
    pub headers: bool,
    #[serde(default)]
    pub client_id: u64,
    #[serde(default)]
    pub client_ip: String,
    /// Other cluster members the client may fail over to
    #[serde(default)]
    pub connect_urls: Vec<String>,
    /// Lame duck mode
    #[serde(default)]
    pub ldm: bool,
}

impl ServerInfo {
    #[inline]
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Options sent to the server by `CONNECT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub verbose: bool,
    pub pedantic: bool,
    pub tls_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub lang: String,
    pub version: String,
    pub protocol: u8,
    pub echo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ConnectInfo {
    fn default() -> Self {
        Self {
            verbose: false,
            pedantic: false,
            tls_required: false,
            name: None,
            lang: LANG.into(),
            version: VERSION.into(),
            protocol: 1,
            echo: true,
            user: None,
            pass: None,
            auth_token: None,
        }
    }
}

/// Classification of `-ERR` text sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    StaleConnection,
    AuthorizationViolation,
    AuthenticationExpired,
    PermissionsViolation(String),
    SlowConsumer,
    MaxPayloadViolation,
    Other(String),
}

impl ServerError {
    pub fn parse(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        if lower.starts_with("stale connection") {
            ServerError::StaleConnection
        } else if lower.starts_with("authorization violation") {
            ServerError::AuthorizationViolation
        } else if lower.starts_with("user authentication expired") {
            ServerError::AuthenticationExpired
        } else if lower.starts_with("permissions violation") {
            ServerError::PermissionsViolation(text.to_owned())
        } else if lower.starts_with("slow consumer") {
            ServerError::SlowConsumer
        } else if lower.starts_with("maximum payload violation") {
            ServerError::MaxPayloadViolation
        } else {
            ServerError::Other(text.to_owned())
        }
    }

    /// The server closes the connection after sending these.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::AuthorizationViolation | ServerError::AuthenticationExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_json() {
        let info = ConnectInfo { name: Some("app".into()), user: Some("u".into()), ..Default::default() };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains(r#""name":"app""#));
        assert!(json.contains(r#""user":"u""#));
        assert!(json.contains(r#""lang":"rust""#));
        assert!(!json.contains("pass"));
        assert!(!json.contains("auth_token"));
    }

    #[test]
    fn test_info_defaults() {
        let info = ServerInfo::parse(r#"{"server_id":"abc","max_payload":1024,"unknown":true}"#).unwrap();
        assert_eq!(info.server_id, "abc");
        assert_eq!(info.max_payload, 1024);
        assert!(info.connect_urls.is_empty());
        assert!(!info.tls_required);
    }

    #[test]
    fn test_server_error() {
        assert_eq!(ServerError::parse("Stale Connection"), ServerError::StaleConnection);
        assert!(ServerError::parse("Authorization Violation").is_fatal());
        assert!(matches!(
            ServerError::parse("Permissions Violation for Publish to foo"),
            ServerError::PermissionsViolation(_)
        ));
        assert!(!ServerError::parse("Slow Consumer").is_fatal());
        assert_eq!(ServerError::parse("Unknown Protocol Operation"), ServerError::Other("Unknown Protocol Operation".into()));
    }
}

use mindhaven_common::{Error, Identity, Result};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            realtime: RealtimeConfig::default(),
            log_level: Some("info".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// `wss` in production, `ws` for local backends.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Host (and optional port) of the chat backend.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// Endpoint a channel for `identity` connects to: `<scheme>://<host>/ws/chat/<identity>/`.
    pub fn endpoint_for(&self, identity: &Identity) -> Result<Url> {
        if !matches!(self.scheme.as_str(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "unsupported realtime scheme '{}', expected ws or wss",
                self.scheme
            )));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config("realtime host cannot be empty".into()));
        }

        let mut url = Url::parse(&format!("{}://{}/", self.scheme, self.host.trim()))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("host '{}' cannot carry a path", self.host)))?
            .extend(["ws", "chat", identity.as_str(), ""]);
        Ok(url)
    }
}

fn default_scheme() -> String {
    "wss".to_string()
}

fn default_host() -> String {
    "api.mindhaven.site".to_string()
}

/// Knobs for the reconnect policy. Delays are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Fraction of the delay applied as random spread in both directions.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("reconnect.max_attempts must be at least 1".into()));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Error::Config(format!(
                "reconnect.initial_delay_ms ({}) exceeds max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        if !(self.factor >= 1.0 && self.factor.is_finite()) {
            return Err(Error::Config(format!(
                "reconnect.factor must be a finite value >= 1.0, got {}",
                self.factor
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::Config(format!(
                "reconnect.jitter must be in [0.0, 1.0), got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.25
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uses_identity_as_single_path_segment() {
        let config = RealtimeConfig::default();
        let url = config
            .endpoint_for(&Identity::from_string("42"))
            .expect("endpoint should build");
        assert_eq!(url.as_str(), "wss://api.mindhaven.site/ws/chat/42/");
    }

    #[test]
    fn endpoint_escapes_identity() {
        let config = RealtimeConfig {
            scheme: "ws".to_string(),
            host: "127.0.0.1:8000".to_string(),
            ..RealtimeConfig::default()
        };
        let url = config
            .endpoint_for(&Identity::from_string("a/b"))
            .expect("endpoint should build");
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/chat/a%2Fb/");
    }

    #[test]
    fn endpoint_rejects_http_scheme() {
        let config = RealtimeConfig {
            scheme: "https".to_string(),
            ..RealtimeConfig::default()
        };
        let err = config
            .endpoint_for(&Identity::from_string("1"))
            .expect_err("https is not a websocket scheme");
        assert!(err.to_string().contains("unsupported realtime scheme"));
    }

    #[test]
    fn reconnect_validation() {
        assert!(ReconnectConfig::default().validate().is_ok());

        let zero = ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        };
        assert!(zero.validate().is_err());

        let inverted = ReconnectConfig {
            initial_delay_ms: 10_000,
            max_delay_ms: 100,
            ..ReconnectConfig::default()
        };
        assert!(inverted.validate().is_err());

        let wild_jitter = ReconnectConfig {
            jitter: 1.5,
            ..ReconnectConfig::default()
        };
        assert!(wild_jitter.validate().is_err());
    }
}

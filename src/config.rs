use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Physics tick rate in Hz for every game session
    pub tick_rate: u32,
    /// Period of the ping/pong liveness probe
    pub heartbeat_interval: Duration,
    /// Endpoint that finished online match results are posted to
    pub result_store_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3003,
            tick_rate: 60,
            heartbeat_interval: Duration::from_secs(25),
            result_store_url: "http://user-manager:3000/games".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.port = parsed;
                } else {
                    tracing::warn!("PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid PORT '{}', using default", port);
            }
        }

        if let Ok(rate) = std::env::var("TICK_RATE") {
            if let Ok(parsed) = rate.parse::<u32>() {
                if parsed > 0 && parsed <= 240 {
                    config.tick_rate = parsed;
                } else {
                    tracing::warn!("TICK_RATE must be 1-240, using default");
                }
            } else {
                tracing::warn!("Invalid TICK_RATE '{}', using default", rate);
            }
        }

        if let Ok(url) = std::env::var("RESULT_STORE_URL") {
            config.result_store_url = url;
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.tick_rate == 0 || self.tick_rate > 240 {
            return Err("tick_rate must be 1-240".to_string());
        }
        if self.heartbeat_interval < Duration::from_secs(1) {
            return Err("heartbeat_interval must be at least 1s".to_string());
        }
        if self.result_store_url.is_empty() {
            return Err("result_store_url cannot be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3003);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.port > 0);
    }
}

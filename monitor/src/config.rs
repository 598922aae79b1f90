use crate::connection::{gateway_url, ConnectionOptions};
use crate::model::Command;
use clap::Parser;
use std::time::Duration;

/// Dashboard client for ESP32 telemetry devices.
#[derive(Debug, Clone, Parser)]
#[command(name = "monitor", version)]
pub struct Config {
    /// Device host (and optional port) serving the WebSocket.
    #[arg(long, env = "DEVICE_HOST", default_value = "192.168.4.1")]
    pub host: String,

    #[arg(long, env = "WS_PATH", default_value = "/ws")]
    pub ws_path: String,

    /// Address of the local HTTP API.
    #[arg(long, env = "HTTP_ADDR", default_value = "127.0.0.1:8080")]
    pub http_addr: String,

    #[arg(long, env = "RECONNECT_DELAY_MS", default_value_t = 2000)]
    pub reconnect_delay_ms: u64,

    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Points kept per chart series.
    #[arg(long, env = "SERIES_CAP", default_value_t = 40)]
    pub series_cap: usize,

    /// Chart series, in the order the device sends the quantities.
    #[arg(
        long,
        env = "SERIES",
        value_delimiter = ',',
        default_value = "temperature,humidity,pressure"
    )]
    pub series: Vec<String>,

    /// GPIO ids with a checkbox on the page.
    #[arg(long, env = "GPIOS", value_delimiter = ',', default_value = "12,13,14")]
    pub gpios: Vec<String>,

    /// Command sent as soon as the connection opens: getReadings, states,
    /// sd_status, sample_running or none.
    #[arg(long, env = "POST_CONNECT", default_value = "getReadings", value_parser = parse_post_connect)]
    pub post_connect: PostConnect,

    #[arg(long, env = "COMMAND_CAPACITY", default_value_t = 32)]
    pub command_capacity: usize,
}

/// Wrapper so clap can parse "none" into no command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostConnect(pub Option<Command>);

pub fn parse_post_connect(value: &str) -> Result<PostConnect, String> {
    let command = match value {
        "getReadings" | "get_readings" => Some(Command::GetReadings),
        "states" => Some(Command::States),
        "sd_status" => Some(Command::SdStatus),
        "sample_running" => Some(Command::SampleRunning),
        "none" | "" => None,
        other => return Err(format!("unknown post-connect command: {}", other)),
    };
    Ok(PostConnect(command))
}

impl Config {
    pub fn gateway(&self) -> String {
        gateway_url(&self.host, &self.ws_path)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            url: self.gateway(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            post_connect: self.post_connect.0.clone(),
            command_capacity: self.command_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["monitor"]).unwrap();
        assert_eq!(config.gateway(), "ws://192.168.4.1/ws");
        assert_eq!(config.series, vec!["temperature", "humidity", "pressure"]);
        assert_eq!(config.series_cap, 40);
        assert_eq!(config.post_connect, PostConnect(Some(Command::GetReadings)));

        let options = config.connection_options();
        assert_eq!(options.reconnect_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_overrides() {
        let config = Config::try_parse_from([
            "monitor",
            "--host",
            "10.0.0.7:8081",
            "--series",
            "load",
            "--post-connect",
            "none",
            "--reconnect-delay-ms",
            "1000",
        ])
        .unwrap();

        assert_eq!(config.gateway(), "ws://10.0.0.7:8081/ws");
        assert_eq!(config.series, vec!["load"]);
        assert_eq!(config.post_connect, PostConnect(None));
        assert_eq!(config.reconnect_delay_ms, 1000);
    }

    #[test]
    fn test_unknown_post_connect() {
        assert!(parse_post_connect("reboot").is_err());
        assert_eq!(
            parse_post_connect("states").unwrap(),
            PostConnect(Some(Command::States))
        );
    }
}

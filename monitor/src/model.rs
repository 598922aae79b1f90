use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

/// One chart point: device timestamp in milliseconds and the reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: i64,
    pub value: f64,
}

/// Date and time attached to a `sample_begin` request; the device uses
/// them to name its log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStamp {
    pub date: String,
    pub time: String,
}

/// Commands the dashboard sends to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    GetReadings,
    States,
    Toggle { gpio: String },
    SdStatus,
    SampleRunning,
    SampleBegin(SampleStamp),
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a SampleStamp>,
}

impl Command {
    /// Renders the command as the text frame the firmware expects. Legacy
    /// commands are bare strings, newer ones are `{type, data}` records.
    pub fn to_frame(&self) -> Result<String> {
        let envelope = match self {
            Command::GetReadings => return Ok("getReadings".to_string()),
            Command::States => return Ok("states".to_string()),
            Command::Toggle { gpio } => return Ok(gpio.clone()),
            Command::SdStatus => OutboundEnvelope {
                kind: "sd_status",
                data: None,
            },
            Command::SampleRunning => OutboundEnvelope {
                kind: "sample_running",
                data: None,
            },
            Command::SampleBegin(stamp) => OutboundEnvelope {
                kind: "sample_begin",
                data: Some(stamp),
            },
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Load-cell reading carried by a `sample` message.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleReading {
    /// Raw value as sent, kept for display.
    pub reading: Value,
    /// Milliseconds since the sampling run started, when present.
    pub time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpioState {
    pub output: String,
    pub on: bool,
}

/// Inbound telemetry after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `{epoch, metric, metric, ...}`: metrics map to series by position.
    Positional {
        timestamp: i64,
        metrics: Vec<(String, Value)>,
    },
    Sample(SampleReading),
    SdStatus(Value),
    SampleRunning(Value),
    Gpios(Vec<GpioState>),
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_commands_are_bare_strings() {
        assert_eq!(Command::GetReadings.to_frame().unwrap(), "getReadings");
        assert_eq!(Command::States.to_frame().unwrap(), "states");
        assert_eq!(
            Command::Toggle {
                gpio: "12".to_string()
            }
            .to_frame()
            .unwrap(),
            "12"
        );
    }

    #[test]
    fn test_tagged_commands() {
        assert_eq!(
            Command::SdStatus.to_frame().unwrap(),
            r#"{"type":"sd_status"}"#
        );
        assert_eq!(
            Command::SampleRunning.to_frame().unwrap(),
            r#"{"type":"sample_running"}"#
        );

        let begin = Command::SampleBegin(SampleStamp {
            date: "2024-05-01".to_string(),
            time: "10-30-00".to_string(),
        });
        assert_eq!(
            begin.to_frame().unwrap(),
            r#"{"type":"sample_begin","data":{"date":"2024-05-01","time":"10-30-00"}}"#
        );
    }

    #[test]
    fn test_command_from_api_body() {
        let command: Command =
            serde_json::from_str(r#"{"command":"toggle","gpio":"14"}"#).unwrap();
        assert_eq!(
            command,
            Command::Toggle {
                gpio: "14".to_string()
            }
        );

        let command: Command = serde_json::from_str(
            r#"{"command":"sample_begin","date":"2024-05-01","time":"10-30-00"}"#,
        )
        .unwrap();
        assert!(matches!(command, Command::SampleBegin(_)));
    }
}

use crate::errors::{Error, Result};
use crate::metrics::{
    DISPATCHED_TOTAL, DISPATCH_LATENCY_SECONDS, MALFORMED_TOTAL, MISSING_ELEMENT_TOTAL,
    UNKNOWN_KIND_TOTAL,
};
use crate::model::{GpioState, Message, Point, SampleReading};
use crate::page::{gpio_label, on_off, Page, UiSurface, LAST_READING, SD_INFO, STATUS_INFO};
use crate::series::Chart;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Series fed by load-cell `sample` messages.
pub const THRUST_SERIES: &str = "thrust";

/// What a frame turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Points appended to the chart.
    Plotted(usize),
    /// UI element writes performed.
    Updated(usize),
    Ignored,
}

/// Parses a frame and decides its shape.
pub fn parse(frame: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(frame).map_err(Error::MalformedPayload)?;
    classify(value)
}

/// Decides the shape of a parsed frame. Only `type` (a string) and `data`
/// keys make it tagged, a lone `gpios` list is the legacy GPIO report,
/// anything else is positional with the timestamp under the first key.
pub fn classify(value: Value) -> Result<Message> {
    let mut object = match value {
        Value::Object(object) => object,
        other => {
            return Err(Error::InvalidShape(format!(
                "expected a JSON object, got {}",
                other
            )))
        }
    };

    if is_tagged(&object) {
        let kind = value_text(&object["type"]);
        let data = object.remove("data").unwrap_or(Value::Null);
        return classify_tagged(kind, data);
    }

    if is_legacy_gpios(&object) {
        let gpios = object.remove("gpios").unwrap_or(Value::Null);
        return Ok(Message::Gpios(parse_gpios(gpios)?));
    }

    classify_positional(object)
}

fn is_tagged(object: &Map<String, Value>) -> bool {
    matches!(object.get("type"), Some(Value::String(_)))
        && object.keys().all(|key| key == "type" || key == "data")
}

fn is_legacy_gpios(object: &Map<String, Value>) -> bool {
    object.len() == 1 && matches!(object.get("gpios"), Some(Value::Array(_)))
}

fn classify_tagged(kind: String, data: Value) -> Result<Message> {
    match kind.as_str() {
        "sample" => Ok(Message::Sample(parse_sample(data)?)),
        "sd_status" => Ok(Message::SdStatus(data)),
        "sample_running" | "status_info" => Ok(Message::SampleRunning(data)),
        "gpios" => Ok(Message::Gpios(parse_gpios(data)?)),
        _ => Ok(Message::Unknown(kind)),
    }
}

fn classify_positional(object: Map<String, Value>) -> Result<Message> {
    let mut entries = object.into_iter();
    let (epoch_key, epoch) = entries
        .next()
        .ok_or_else(|| Error::InvalidShape("empty object".to_string()))?;
    let timestamp = numeric(&epoch).ok_or_else(|| {
        Error::InvalidShape(format!("timestamp key {} is not numeric: {}", epoch_key, epoch))
    })?;

    Ok(Message::Positional {
        timestamp: timestamp as i64,
        metrics: entries.collect(),
    })
}

fn parse_sample(data: Value) -> Result<SampleReading> {
    let mut data = match data {
        Value::Object(data) => data,
        other => {
            return Err(Error::InvalidShape(format!(
                "sample data must be an object, got {}",
                other
            )))
        }
    };
    let reading = data
        .remove("reading")
        .ok_or_else(|| Error::InvalidShape("sample without reading".to_string()))?;
    let time = data.get("time").and_then(numeric).map(|t| t as i64);

    Ok(SampleReading { reading, time })
}

fn parse_gpios(data: Value) -> Result<Vec<GpioState>> {
    let entries = match data {
        Value::Array(entries) => entries,
        other => {
            return Err(Error::InvalidShape(format!(
                "gpios must be a list, got {}",
                other
            )))
        }
    };

    entries
        .into_iter()
        .map(|entry| {
            let output = entry
                .get("output")
                .map(value_text)
                .ok_or_else(|| Error::InvalidShape(format!("gpio without output: {}", entry)))?;
            let on = entry.get("state").and_then(numeric) == Some(1.0);
            Ok(GpioState { output, on })
        })
        .collect()
}

/// Numeric reading of a JSON value: numbers, numeric strings and booleans.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Display text of a JSON value; strings lose their quotes.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn sd_status_text(data: &Value) -> String {
    match data {
        Value::String(s) if s.eq_ignore_ascii_case("ok") => "Ok".to_string(),
        Value::String(s) if s.eq_ignore_ascii_case("erro") || s.eq_ignore_ascii_case("error") => {
            "Error".to_string()
        }
        Value::String(s) => s.clone(),
        other => match numeric(other) {
            Some(n) if n != 0.0 => "Ok".to_string(),
            _ => "Error".to_string(),
        },
    }
}

pub fn running_text(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => match numeric(other) {
            Some(n) if n != 0.0 => "Running".to_string(),
            _ => "Stand-by".to_string(),
        },
    }
}

/// Applies one classified message to the chart and the page elements.
/// Element writes that fail are logged and skipped; the rest still apply.
pub fn apply(message: Message, chart: &mut Chart, ui: &mut dyn UiSurface) -> Dispatched {
    match message {
        Message::Positional { timestamp, metrics } => {
            let mut plotted = 0;
            for (index, (key, raw)) in metrics.iter().enumerate() {
                match numeric(raw) {
                    Some(value) => {
                        chart.push_at(index, key, Point { timestamp, value });
                        plotted += 1;
                    }
                    None => warn!("Skipping non-numeric value for {}: {}", key, raw),
                }
            }
            Dispatched::Plotted(plotted)
        }
        Message::Sample(sample) => {
            if let (Some(time), Some(value)) = (sample.time, numeric(&sample.reading)) {
                chart.push_named(
                    THRUST_SERIES,
                    Point {
                        timestamp: time,
                        value,
                    },
                );
            }
            let text = value_text(&sample.reading);
            Dispatched::Updated(write_text(ui, LAST_READING, &text))
        }
        Message::SdStatus(data) => {
            Dispatched::Updated(write_text(ui, SD_INFO, &sd_status_text(&data)))
        }
        Message::SampleRunning(data) => {
            Dispatched::Updated(write_text(ui, STATUS_INFO, &running_text(&data)))
        }
        Message::Gpios(gpios) => {
            let mut updated = 0;
            for gpio in &gpios {
                updated += write_checked(ui, &gpio.output, gpio.on);
                updated += write_text(ui, &gpio_label(&gpio.output), on_off(gpio.on));
            }
            Dispatched::Updated(updated)
        }
        Message::Unknown(kind) => {
            UNKNOWN_KIND_TOTAL.inc();
            debug!("Ignoring message of unknown type {}", kind);
            Dispatched::Ignored
        }
    }
}

fn write_text(ui: &mut dyn UiSurface, id: &str, text: &str) -> usize {
    report(ui.set_text(id, text))
}

fn write_checked(ui: &mut dyn UiSurface, id: &str, checked: bool) -> usize {
    report(ui.set_checked(id, checked))
}

fn report(result: Result<()>) -> usize {
    match result {
        Ok(()) => 1,
        Err(e) => {
            MISSING_ELEMENT_TOTAL.inc();
            warn!("{}", e);
            0
        }
    }
}

impl Page {
    /// Parses and applies one frame.
    pub fn dispatch(&mut self, frame: &str) -> Result<Dispatched> {
        let message = parse(frame)?;
        Ok(apply(message, &mut self.chart, &mut self.elements))
    }

    /// Frame entry point for the connection: errors are logged and the
    /// frame dropped, never propagated.
    pub fn handle_frame(&mut self, frame: &str) {
        debug!("Received frame: {}", frame);
        let start = Instant::now();
        match self.dispatch(frame) {
            Ok(outcome) => {
                DISPATCHED_TOTAL.inc();
                DISPATCH_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
                debug!("Dispatched frame: {:?}", outcome);
            }
            Err(e) => {
                MALFORMED_TOTAL.inc();
                error!("Dropping frame: {}", e);
            }
        }
    }
}

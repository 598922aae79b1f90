mod telemetry;

use clap::{Parser, ValueEnum};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::{generate_thrust, generate_weather, tagged, GpioReport, SampleData};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Profile {
    /// Temperature, humidity and pressure in the positional shape.
    Weather,
    /// Load-cell test stand with SD card status and sampling runs.
    LoadCell,
    /// GPIO toggle board.
    Gpio,
}

/// Simulates an ESP32 dashboard device on a WebSocket.
#[derive(Debug, Parser)]
#[command(name = "simulator", version)]
struct Args {
    #[arg(long, env = "SIM_ADDR", default_value = "127.0.0.1:8081")]
    addr: String,

    #[arg(long, env = "PROFILE", value_enum, default_value_t = Profile::Weather)]
    profile: Profile,

    /// Interval between weather broadcasts.
    #[arg(long, env = "INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    #[arg(long, env = "PINS", value_delimiter = ',', default_value = "12,13,14")]
    pins: Vec<String>,

    /// Length of a load-cell sampling run.
    #[arg(long, env = "SAMPLE_DURATION_MS", default_value_t = 10000)]
    sample_duration_ms: u64,

    #[arg(long, env = "SAMPLE_PERIOD_MS", default_value_t = 13)]
    sample_period_ms: u64,

    /// Report the SD card as failed.
    #[arg(long, env = "SD_FAILED")]
    sd_failed: bool,
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// State shared by every connected client, like the firmware's globals.
struct Device {
    args: Args,
    started: Instant,
    notify: broadcast::Sender<String>,
    sampling: AtomicBool,
    pins: Mutex<BTreeMap<String, bool>>,
}

impl Device {
    fn new(args: Args) -> Self {
        let (notify, _) = broadcast::channel(1024);
        let pins = args.pins.iter().map(|p| (p.clone(), false)).collect();
        Self {
            args,
            started: Instant::now(),
            notify,
            sampling: AtomicBool::new(false),
            pins: Mutex::new(pins),
        }
    }

    /// Sends to every connected client.
    fn notify_clients(&self, message: String) {
        debug!("Broadcasting {}", message);
        // No receivers just means nobody is connected.
        let _ = self.notify.send(message);
    }

    fn weather_reading(&self) -> String {
        let epoch = self.started.elapsed().as_millis() as u64;
        let reading = generate_weather(&mut rand::thread_rng(), epoch);
        to_json(&reading)
    }

    fn sd_status(&self) -> String {
        let status = if self.args.sd_failed { "ERRO" } else { "OK" };
        to_json(&tagged("sd_status", status))
    }

    fn sample_running(&self) -> String {
        to_json(&tagged(
            "sample_running",
            self.sampling.load(Ordering::SeqCst),
        ))
    }

    async fn gpio_states(&self) -> String {
        let pins = self.pins.lock().await;
        let report: Vec<GpioReport> = pins
            .iter()
            .map(|(output, on)| GpioReport {
                output: output.clone(),
                state: if *on { "1" } else { "0" }.to_string(),
            })
            .collect();
        to_json(&tagged("gpios", report))
    }

    /// Frames sent to a client as soon as it connects.
    fn greeting(&self) -> Vec<String> {
        match self.args.profile {
            Profile::LoadCell => vec![self.sd_status(), self.sample_running()],
            Profile::Weather | Profile::Gpio => Vec::new(),
        }
    }

    /// Handles one request. Returns replies for the requesting client only;
    /// broadcasts go through `notify_clients`.
    async fn handle_request(self: &Arc<Self>, text: &str) -> Vec<String> {
        match self.args.profile {
            Profile::Weather => {
                self.notify_clients(self.weather_reading());
                Vec::new()
            }
            Profile::Gpio => {
                if text == "states" {
                    return vec![self.gpio_states().await];
                }
                let toggled = {
                    let mut pins = self.pins.lock().await;
                    match pins.get_mut(text) {
                        Some(on) => {
                            *on = !*on;
                            Some(*on)
                        }
                        None => None,
                    }
                };
                match toggled {
                    Some(on) => {
                        info!("GPIO {} is now {}", text, if on { "ON" } else { "OFF" });
                        self.notify_clients(self.gpio_states().await);
                    }
                    None => warn!("Unknown GPIO request: {}", text),
                }
                Vec::new()
            }
            Profile::LoadCell => {
                let request: Request = match serde_json::from_str(text) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Ignoring request {}: {}", text, e);
                        return Vec::new();
                    }
                };
                match request.kind.as_str() {
                    "sd_status" => vec![self.sd_status()],
                    "sample_running" => vec![self.sample_running()],
                    "sample_begin" => {
                        info!(
                            "Sampling requested for {} {}",
                            request.data["date"].as_str().unwrap_or("?"),
                            request.data["time"].as_str().unwrap_or("?")
                        );
                        self.start_sampling();
                        Vec::new()
                    }
                    other => {
                        warn!("Unknown request type: {}", other);
                        Vec::new()
                    }
                }
            }
        }
    }

    fn start_sampling(self: &Arc<Self>) {
        if self.sampling.swap(true, Ordering::SeqCst) {
            warn!("Sampling already running, request ignored");
            return;
        }
        let device = Arc::clone(self);
        tokio::spawn(async move {
            device.run_sampling().await;
        });
    }

    async fn run_sampling(&self) {
        let duration = self.args.sample_duration_ms;
        info!("Starting sampling run of {}ms", duration);
        self.notify_clients(self.sample_running());

        let start = Instant::now();
        let mut samples = 0u64;
        loop {
            let time = start.elapsed().as_millis() as u64;
            if time > duration {
                break;
            }
            let reading = generate_thrust(&mut rand::thread_rng(), time, duration);
            self.notify_clients(to_json(&tagged("sample", SampleData { reading, time })));
            samples += 1;
            tokio::time::sleep(Duration::from_millis(self.args.sample_period_ms)).await;
        }

        self.sampling.store(false, Ordering::SeqCst);
        self.notify_clients(self.sample_running());
        info!("Sampling finished after {} samples", samples);
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        error!("Failed to serialize message: {}", e);
        String::new()
    })
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting device simulator");
    info!("Profile: {:?}, address: ws://{}/ws", args.profile, args.addr);

    let listener = match TcpListener::bind(&args.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", args.addr, e);
            std::process::exit(1);
        }
    };

    let device = Arc::new(Device::new(args));

    if device.args.profile == Profile::Weather {
        let ticker_device = Arc::clone(&device);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(ticker_device.args.interval_ms));
            loop {
                ticker.tick().await;
                ticker_device.notify_clients(ticker_device.weather_reading());
            }
        });
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_client(stream, peer, Arc::clone(&device)));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, device: Arc<Device>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    info!("WebSocket client {} connected", peer);

    let (mut sink, mut source) = ws.split();
    let mut notifications = device.notify.subscribe();

    if let Err(e) = send_all(&mut sink, device.greeting()).await {
        warn!("Failed to greet {}: {}", peer, e);
        return;
    }

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    debug!("Request from {}: {}", peer, text);
                    let replies = device.handle_request(&text).await;
                    if let Err(e) = send_all(&mut sink, replies).await {
                        warn!("Failed to reply to {}: {}", peer, e);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error from {}: {}", peer, e);
                    break;
                }
            },
            note = notifications.recv() => match note {
                Ok(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!("Failed to notify {}: {}", peer, e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client {} lagged, skipped {} messages", peer, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("WebSocket client {} disconnected", peer);
}

/// Sends frames in order, stopping at the first failure.
async fn send_all<S>(sink: &mut S, frames: Vec<String>) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    for frame in frames {
        sink.send(Message::Text(frame)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(profile: Profile) -> Arc<Device> {
        let args = Args::try_parse_from(["simulator", "--pins", "2,4"]).unwrap();
        Arc::new(Device::new(Args { profile, ..args }))
    }

    #[test]
    fn test_gpio_toggle_broadcasts_states() {
        tokio_test::block_on(async {
            let device = device(Profile::Gpio);
            let mut notifications = device.notify.subscribe();

            assert!(device.handle_request("4").await.is_empty());
            let report = notifications.recv().await.unwrap();
            assert_eq!(
                report,
                r#"{"type":"gpios","data":[{"output":"2","state":"0"},{"output":"4","state":"1"}]}"#
            );

            let replies = device.handle_request("states").await;
            assert_eq!(replies, vec![report]);
        });
    }

    #[test]
    fn test_load_cell_status_requests() {
        tokio_test::block_on(async {
            let device = device(Profile::LoadCell);
            assert_eq!(
                device.handle_request(r#"{"type":"sd_status"}"#).await,
                vec![r#"{"type":"sd_status","data":"OK"}"#.to_string()]
            );
            assert_eq!(
                device.handle_request(r#"{"type":"sample_running"}"#).await,
                vec![r#"{"type":"sample_running","data":false}"#.to_string()]
            );
            assert!(device.handle_request("getReadings").await.is_empty());
        });
    }

    #[test]
    fn test_send_all_stops_at_first_failure() {
        use std::sync::atomic::AtomicUsize;

        tokio_test::block_on(async {
            let attempts = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&attempts);
            let sink = futures_util::sink::unfold((), move |(), _frame: Message| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(())
                    } else {
                        Err("connection reset")
                    }
                }
            });
            futures_util::pin_mut!(sink);

            let frames = vec!["a".to_string(), "b".to_string(), "c".to_string()];
            assert_eq!(send_all(&mut sink, frames).await, Err("connection reset"));
            assert_eq!(attempts.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn test_weather_answers_any_request() {
        tokio_test::block_on(async {
            let device = device(Profile::Weather);
            let mut notifications = device.notify.subscribe();

            device.handle_request("getReadings").await;
            let reading: Value = serde_json::from_str(&notifications.recv().await.unwrap()).unwrap();
            assert!(reading["epoch"].is_u64());
            assert!(reading["pressure"].is_i64());
        });
    }
}

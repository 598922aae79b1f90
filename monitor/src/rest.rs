use crate::connection::{ConnectionHandle, ConnectionState};
use crate::errors::Error;
use crate::model::{Command, SampleStamp};
use crate::page::{gpio_label, on_off, Element, Elements, SharedPage, UiSurface};
use crate::series::Chart;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// The sample button stays disabled this long after a run is requested.
pub const SAMPLE_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct AppState {
    page: SharedPage,
    connection: ConnectionHandle,
    last_sample: Arc<Mutex<Option<Instant>>>,
}

impl AppState {
    pub fn new(page: SharedPage, connection: ConnectionHandle) -> Self {
        Self {
            page,
            connection,
            last_sample: Arc::new(Mutex::new(None)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub state: ConnectionState,
    pub open: bool,
}

#[derive(Debug, Serialize)]
pub struct GpioResponse {
    pub gpio: String,
    pub checked: bool,
    pub label: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/series", get(get_series))
        .route("/api/v1/elements", get(get_elements))
        .route("/api/v1/connection", get(get_connection))
        .route("/api/v1/commands", post(post_command))
        .route("/api/v1/gpio/:id/toggle", post(toggle_gpio))
        .route("/api/v1/sample", post(start_sample))
        .route("/api/v1/reconnect", post(reconnect))
        .with_state(state)
}

async fn get_series(State(state): State<AppState>) -> Json<Chart> {
    Json(state.page.read().await.chart.clone())
}

async fn get_elements(State(state): State<AppState>) -> Json<Elements> {
    Json(state.page.read().await.elements.clone())
}

async fn get_connection(State(state): State<AppState>) -> Json<ConnectionResponse> {
    let current = state.connection.state();
    Json(ConnectionResponse {
        state: current,
        open: current == ConnectionState::Open,
    })
}

async fn post_command(
    State(state): State<AppState>,
    Json(command): Json<Command>,
) -> Result<StatusCode, AppError> {
    state.connection.send(command)?;
    Ok(StatusCode::ACCEPTED)
}

/// Sends the toggle and flips the checkbox right away; the device's next
/// `gpios` report has the final word.
async fn toggle_gpio(
    State(state): State<AppState>,
    Path(gpio): Path<String>,
) -> Result<Json<GpioResponse>, AppError> {
    let mut page = state.page.write().await;
    let checked = match page.elements.get(&gpio) {
        Some(Element::Checkbox { checked }) => !*checked,
        _ => return Err(Error::MissingUiElement(gpio).into()),
    };

    state.connection.send(Command::Toggle { gpio: gpio.clone() })?;

    let label = gpio_label(&gpio);
    page.elements.set_checked(&gpio, checked)?;
    if let Err(e) = page.elements.set_text(&label, on_off(checked)) {
        warn!("{}", e);
    }
    info!("Toggled GPIO {} to {}", gpio, on_off(checked));

    Ok(Json(GpioResponse {
        gpio,
        checked,
        label: on_off(checked).to_string(),
    }))
}

async fn start_sample(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    let mut last_sample = state.last_sample.lock().await;
    if let Some(at) = *last_sample {
        let elapsed = at.elapsed();
        if elapsed < SAMPLE_COOLDOWN {
            return Err(AppError::new(
                StatusCode::TOO_MANY_REQUESTS,
                anyhow::anyhow!(
                    "sampling was requested {:.1}s ago, wait {:.1}s",
                    elapsed.as_secs_f64(),
                    (SAMPLE_COOLDOWN - elapsed).as_secs_f64()
                ),
            ));
        }
    }

    let stamp = sample_stamp(Local::now());
    info!("Requesting sampling run {} {}", stamp.date, stamp.time);
    state.connection.send(Command::SampleBegin(stamp))?;
    *last_sample = Some(Instant::now());

    Ok(StatusCode::ACCEPTED)
}

async fn reconnect(State(state): State<AppState>) -> StatusCode {
    state.connection.reconnect();
    StatusCode::ACCEPTED
}

/// Date and time with separators the device can use in a file name.
pub fn sample_stamp(now: DateTime<Local>) -> SampleStamp {
    SampleStamp {
        date: now.format("%d-%m-%Y").to_string(),
        time: now.format("%H-%M-%S").to_string(),
    }
}

pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("API error: {}", self.error);
        }
        (self.status, format!("{}", self.error)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotConnected(_) | Error::ChannelSend => StatusCode::SERVICE_UNAVAILABLE,
            Error::MissingUiElement(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.into())
    }
}

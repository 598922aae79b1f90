use futures_util::{SinkExt, StreamExt};
use monitor::connection::{connection, gateway_url, ConnectionHandle, ConnectionOptions, ConnectionState};
use monitor::model::Command;
use monitor::page::{Elements, Page, SharedPage, SD_INFO, STATUS_INFO};
use monitor::series::Chart;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

fn weather_page() -> SharedPage {
    Page::new(
        Chart::new(["temperature", "humidity", "pressure"], 40),
        Elements::dashboard(&["12"]),
    )
    .shared()
}

fn start(
    addr: SocketAddr,
    reconnect_delay: Duration,
    page: SharedPage,
) -> (ConnectionHandle, JoinHandle<()>) {
    let (handle, driver) = connection(
        ConnectionOptions {
            url: gateway_url(&addr.to_string(), "/ws"),
            reconnect_delay,
            connect_timeout: Duration::from_secs(2),
            post_connect: Some(Command::GetReadings),
            command_capacity: 8,
        },
        page,
    );
    (handle, tokio::spawn(driver.run()))
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client did not connect in time")
        .unwrap();
    accept_async(tcp).await.unwrap()
}

async fn assert_no_connection(listener: &TcpListener, within: Duration) {
    assert!(
        timeout(within, listener.accept()).await.is_err(),
        "unexpected extra connection attempt"
    );
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("no frame from client")
            .expect("client went away")
            .unwrap();
        if let Message::Text(text) = message {
            return text;
        }
    }
}

async fn wait_for_state(handle: &ConnectionHandle, wanted: ConnectionState) {
    let mut state = handle.watch();
    timeout(WAIT, async {
        while *state.borrow_and_update() != wanted {
            state.changed().await.unwrap();
        }
    })
    .await
    .expect("connection never reached the expected state");
}

async fn wait_until<F: Fn(&Page) -> bool>(page: &SharedPage, check: F) {
    timeout(WAIT, async {
        loop {
            if check(&*page.read().await) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("page never reached the expected state");
}

#[tokio::test]
async fn test_post_connect_dispatch_and_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let page = weather_page();
    let reconnect_delay = Duration::from_millis(100);
    let (handle, run) = start(addr, reconnect_delay, page.clone());

    let mut ws = accept(&listener).await;
    assert_eq!(next_text(&mut ws).await, "getReadings");

    ws.send(Message::Text(
        r#"{"epoch":1000,"temperature":21,"humidity":70,"pressure":700}"#.to_string(),
    ))
    .await
    .unwrap();
    wait_until(&page, |p| p.chart.series.iter().all(|s| s.len() == 1)).await;

    wait_for_state(&handle, ConnectionState::Open).await;
    handle.send(Command::States).unwrap();
    assert_eq!(next_text(&mut ws).await, "states");

    // Device goes away; exactly one new connection follows.
    ws.close(None).await.unwrap();
    drop(ws);

    let mut ws = accept(&listener).await;
    assert_eq!(next_text(&mut ws).await, "getReadings");
    assert_eq!(page.read().await.chart.series[0].len(), 1);
    assert_no_connection(&listener, 3 * reconnect_delay).await;
    assert_eq!(handle.state(), ConnectionState::Open);

    drop(handle);
    timeout(WAIT, run).await.expect("driver kept running").unwrap();
}

#[tokio::test]
async fn test_bad_frames_do_not_stop_dispatch() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let page = weather_page();
    let (handle, run) = start(addr, Duration::from_millis(100), page.clone());

    let mut ws = accept(&listener).await;
    next_text(&mut ws).await;

    for frame in [
        "{'type':'status_info','data':'Running'}",
        r#"{"type":"calibration","data":1}"#,
        "[]",
        r#"{"type":"sample_running","data":true}"#,
        r#"{"type":"sd_status","data":0}"#,
    ] {
        ws.send(Message::Text(frame.to_string())).await.unwrap();
    }

    wait_until(&page, |p| p.elements.text(SD_INFO) == Some("Error")).await;
    assert_eq!(page.read().await.elements.text(STATUS_INFO), Some("Running"));
    assert_eq!(handle.state(), ConnectionState::Open);

    drop(handle);
    timeout(WAIT, run).await.expect("driver kept running").unwrap();
}

#[tokio::test]
async fn test_manual_reconnect_cancels_pending_timer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let page = weather_page();
    let (handle, run) = start(addr, Duration::from_secs(3600), page);

    // Refuse the first attempt by hanging up before the handshake.
    let (tcp, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client did not connect in time")
        .unwrap();
    drop(tcp);

    wait_for_state(&handle, ConnectionState::RetryPending).await;
    assert!(handle.send(Command::States).is_err());

    handle.reconnect();

    let mut ws = accept(&listener).await;
    assert_eq!(next_text(&mut ws).await, "getReadings");
    assert_no_connection(&listener, Duration::from_millis(300)).await;

    drop(handle);
    timeout(WAIT, run).await.expect("driver kept running").unwrap();
}

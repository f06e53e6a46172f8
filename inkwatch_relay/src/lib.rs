// THEORY:
// The relay server connects one phone camera to any number of viewers over
// websockets. The camera connects to `/ws/sender` and pushes compressed frames;
// each viewer connects to `/ws/viewer` and gets every frame the camera sends.
//
// Each viewer owns one `OverlaySession` and always gets the camera's bytes
// untouched. While detection is on, frames are also decoded into the session's
// latest-wins slot, and every rendered overlay follows as a `{"type":"overlay"}`
// text header plus a PNG binary message, to be drawn over the raw frame. Sessions
// are never shared, and a viewer disconnecting drops its engine with it.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use inkwatch::codec;
use inkwatch::config::{LoggingConfig, OverlaySettings, load_toml};
use inkwatch::relay::{ClientId, FrameRelay};
use inkwatch::session::{
    OverlaySession, SessionControl, SessionOutput, SessionReport, overlay_stream,
};
use inkwatch::{ConfigError, MotionOverlayEngine, OverlayConfig, SessionError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Frames buffered per viewer before a slow viewer starts skipping.
    #[serde(default = "default_relay_capacity")]
    pub relay_capacity: usize,
    /// Whether new viewers start with detection switched on.
    #[serde(default)]
    pub detect_on_connect: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            relay_capacity: default_relay_capacity(),
            detect_on_connect: false,
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".into()
}
fn default_relay_capacity() -> usize {
    2
}

/// Shared by every connection.
#[derive(Clone)]
pub struct RelayState {
    pub relay: FrameRelay,
    pub overlay: OverlayConfig,
    pub detect_on_connect: bool,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            relay: FrameRelay::new(config.server.relay_capacity),
            overlay: config.overlay.clone(),
            detect_on_connect: config.server.detect_on_connect,
        }
    }
}

/// Text payload the camera page sends.
#[derive(Debug, Deserialize)]
pub struct SenderMessage {
    pub data: String,
}

/// Tuning changes a viewer can make. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OverlayPatch {
    pub sensitivity: Option<f64>,
    pub decay: Option<f64>,
    pub dilation_radius: Option<u32>,
    pub visibility_floor: Option<f64>,
    pub dim_factor: Option<f64>,
}

impl OverlayPatch {
    pub fn apply(&self, config: &mut OverlayConfig) {
        if let Some(sensitivity) = self.sensitivity {
            config.set_sensitivity(sensitivity);
        }
        if let Some(decay) = self.decay {
            config.set_decay(decay);
        }
        if let Some(radius) = self.dilation_radius {
            config.set_dilation_radius(radius);
        }
        if let Some(floor) = self.visibility_floor {
            config.set_visibility_floor(floor);
        }
        if let Some(factor) = self.dim_factor {
            config.set_dim_factor(factor);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewerCommand {
    Enable,
    Disable,
    Reset,
    Configure(OverlayPatch),
}

/// Replies sent to a viewer as JSON text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewerEvent {
    Detection { enabled: bool },
    Config(OverlaySettings),
    /// Announces that the next binary message is the PNG overlay for frame `seq`.
    Overlay { seq: u64 },
}

/// Per-viewer state that lives alongside its session.
pub struct Viewer {
    id: ClientId,
    detecting: bool,
    config: OverlayConfig,
    session: OverlaySession,
}

impl Viewer {
    pub fn new(id: ClientId, state: &RelayState, sink: mpsc::Sender<SessionOutput>) -> Self {
        let mut engine = MotionOverlayEngine::new(state.overlay.clone());
        if !state.detect_on_connect {
            engine.disable();
        }
        Self {
            id,
            detecting: state.detect_on_connect,
            config: state.overlay.clone(),
            session: OverlaySession::spawn(id, engine, sink),
        }
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn handle(&mut self, command: ViewerCommand) -> Result<ViewerEvent, SessionError> {
        debug!(viewer = self.id, ?command, "viewer command");
        match command {
            ViewerCommand::Enable => {
                self.session.enable()?;
                self.detecting = true;
            }
            ViewerCommand::Disable => {
                self.session.disable()?;
                self.detecting = false;
            }
            ViewerCommand::Reset => self.session.reset()?,
            ViewerCommand::Configure(patch) => {
                patch.apply(&mut self.config);
                self.session.control(SessionControl::Configure(self.config.clone()))?;
                return Ok(ViewerEvent::Config(self.config.clone().into()));
            }
        }
        Ok(ViewerEvent::Detection {
            enabled: self.detecting,
        })
    }

    /// Stops the session and logs how it ended.
    pub async fn close(self) -> Option<SessionReport> {
        let report = match self.session.close().await {
            Ok(report) => report,
            Err(e) => {
                warn!(viewer = self.id, error = %e, "viewer session ended badly");
                return None;
            }
        };
        match &report.failure {
            Some(failure) => warn!(
                viewer = self.id,
                rendered = report.rendered,
                error = %failure,
                "viewer session failed"
            ),
            None => info!(
                viewer = self.id,
                rendered = report.rendered,
                dropped = report.dropped,
                rejected = report.rejected,
                "viewer disconnected"
            ),
        }
        Some(report)
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/ws/sender", get(sender_handler))
        .route("/ws/viewer", get(viewer_handler))
        .with_state(state)
}

async fn sender_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| sender_conn(socket, state))
}

async fn viewer_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| viewer_conn(socket, state))
}

async fn sender_conn(mut socket: WebSocket, state: RelayState) {
    let client = state.relay.register();
    info!(client, "camera connected");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Binary(bytes) => {
                state.relay.publish(client, bytes);
            }
            Message::Text(txt) => match sender_payload(&txt) {
                Ok(bytes) => {
                    state.relay.publish(client, bytes);
                }
                Err(e) => debug!(client, error = %e, "ignoring sender message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!(client, "camera disconnected");
}

/// Extracts the image bytes from a `{"data": "data:image/...;base64,..."}` message.
pub fn sender_payload(text: &str) -> anyhow::Result<Vec<u8>> {
    let message: SenderMessage = serde_json::from_str(text)?;
    Ok(codec::data_url_bytes(&message.data)?)
}

async fn viewer_conn(socket: WebSocket, state: RelayState) {
    let client = state.relay.register();
    let mut frames = state.relay.subscribe(client);
    let (sink, outputs) = mpsc::channel(1);
    let mut viewer = Viewer::new(client, &state, sink);
    let mut overlays = Box::pin(overlay_stream(outputs));
    let (mut ws_tx, mut ws_rx) = socket.split();
    info!(viewer = client, detecting = viewer.is_detecting(), "viewer connected");

    loop {
        tokio::select! {
            packet = frames.recv() => {
                let Some(packet) = packet else { break };
                if ws_tx.send(Message::Binary(packet.data.to_vec())).await.is_err() {
                    break;
                }
                if !viewer.is_detecting() {
                    continue;
                }
                match packet.decode() {
                    Ok(frame) => {
                        if viewer.session.push(Arc::new(frame)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(viewer = client, seq = packet.seq, error = %e, "undecodable frame")
                    }
                }
            }
            output = overlays.next() => {
                let Some(output) = output else { break };
                // Rendered before a disable that the viewer has already been told about.
                if !viewer.is_detecting() {
                    continue;
                }
                let (header, png) = match overlay_messages(&output) {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(viewer = client, error = %e, "overlay encoding failed");
                        continue;
                    }
                };
                if ws_tx.send(header).await.is_err() || ws_tx.send(png).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(txt))) => {
                    let command = match serde_json::from_str::<ViewerCommand>(&txt) {
                        Ok(command) => command,
                        Err(e) => {
                            debug!(viewer = client, error = %e, "ignoring viewer message");
                            continue;
                        }
                    };
                    let Ok(event) = viewer.handle(command) else { break };
                    let Ok(reply) = serde_json::to_string(&event) else { continue };
                    if ws_tx.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    viewer.close().await;
}

/// The header and PNG messages that carry one overlay to a viewer.
fn overlay_messages(output: &SessionOutput) -> anyhow::Result<(Message, Message)> {
    let header = serde_json::to_string(&ViewerEvent::Overlay { seq: output.seq })?;
    let png = codec::encode_png(&output.overlay)?;
    Ok((Message::Text(header), Message::Binary(png)))
}

/// Binds the listener and serves the relay on a background task.
pub async fn start_server(
    config: &RelayConfig,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let app = router(RelayState::new(config));
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "relay server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "relay server stopped");
        }
    });
    Ok((addr, server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use inkwatch::Frame;
    use inkwatch::core_modules::pixel::pixel::Pixel;
    use std::io::Write;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn gray_png(value: u8) -> Vec<u8> {
        codec::encode_png(&Frame::filled(4, 4, Pixel::opaque(value, value, value))).unwrap()
    }

    #[test]
    fn viewer_commands_parse_from_json() {
        let parse = |s: &str| serde_json::from_str::<ViewerCommand>(s).unwrap();
        assert_eq!(parse(r#"{"type":"enable"}"#), ViewerCommand::Enable);
        assert_eq!(parse(r#"{"type":"reset"}"#), ViewerCommand::Reset);
        assert_eq!(
            parse(r#"{"type":"configure","sensitivity":30}"#),
            ViewerCommand::Configure(OverlayPatch {
                sensitivity: Some(30.0),
                ..Default::default()
            })
        );
        assert!(serde_json::from_str::<ViewerCommand>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn patches_only_touch_the_given_fields_and_clamp() {
        let mut config = OverlayConfig::default();
        config.set_decay(0.7);
        OverlayPatch {
            sensitivity: Some(400.0),
            ..Default::default()
        }
        .apply(&mut config);
        assert_eq!(config.sensitivity(), 50.0);
        assert_eq!(config.decay(), 0.7);
    }

    #[test]
    fn sender_payload_accepts_camera_page_messages() {
        let png = codec::encode_png(&Frame::filled(2, 2, Pixel::opaque(9, 9, 9))).unwrap();
        let url = format!("data:image/png;base64,{}", STANDARD.encode(png));
        let bytes = sender_payload(&format!(r#"{{"data":"{url}"}}"#)).unwrap();
        assert_eq!(codec::decode_image(&bytes).unwrap().dimensions(), (2, 2));
        assert!(sender_payload("not json").is_err());
        assert!(sender_payload(r#"{"data":"plain text"}"#).is_err());
    }

    #[test]
    fn config_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\ndetect_on_connect = true\n\n[overlay]\nsensitivity = 2"
        )
        .unwrap();
        let config = RelayConfig::load(file.path()).unwrap();
        assert!(config.server.detect_on_connect);
        assert_eq!(config.server.bind_addr, "127.0.0.1:3001");
        assert_eq!(config.server.relay_capacity, 2);
        assert_eq!(config.overlay.sensitivity(), 5.0);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn viewers_start_with_detection_off_and_toggle_it() {
        let state = RelayState::new(&RelayConfig::default());
        let (sink, mut outputs) = mpsc::channel(1);
        let mut viewer = Viewer::new(1, &state, sink);
        assert!(!viewer.is_detecting());

        let frame = Arc::new(Frame::filled(4, 4, Pixel::opaque(0, 0, 0)));
        assert_eq!(
            viewer.handle(ViewerCommand::Enable),
            Ok(ViewerEvent::Detection { enabled: true })
        );
        viewer.session.push(frame).unwrap();
        let output = outputs.recv().await.unwrap();
        assert_eq!(output.overlay.dimensions(), (4, 4));

        let event = viewer
            .handle(ViewerCommand::Configure(OverlayPatch {
                sensitivity: Some(30.0),
                ..Default::default()
            }))
            .unwrap();
        let ViewerEvent::Config(settings) = event else {
            panic!("expected a config reply");
        };
        assert_eq!(settings.sensitivity, 30.0);
        assert_eq!(viewer.config().sensitivity(), 30.0);

        assert_eq!(
            viewer.handle(ViewerCommand::Disable),
            Ok(ViewerEvent::Detection { enabled: false })
        );
        let report = viewer.close().await.unwrap();
        assert_eq!(report.rendered, 1);
        assert_eq!(report.failure, None);
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let json = serde_json::to_string(&ViewerEvent::Detection { enabled: true }).unwrap();
        assert_eq!(json, r#"{"type":"detection","enabled":true}"#);
        let json = serde_json::to_string(&ViewerEvent::Overlay { seq: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"overlay","seq":3}"#);
    }

    #[test]
    fn overlays_go_out_as_a_header_then_a_png() {
        let output = SessionOutput {
            session: 1,
            seq: 9,
            overlay: Frame::filled(3, 2, Pixel::opaque(1, 2, 3)),
        };
        let (header, png) = overlay_messages(&output).unwrap();
        assert_eq!(header, Message::Text(r#"{"type":"overlay","seq":9}"#.into()));
        let Message::Binary(png) = png else {
            panic!("expected a binary overlay");
        };
        assert_eq!(codec::decode_image(&png).unwrap(), output.overlay);
    }

    /// Next data message, skipping pings and pongs.
    async fn next_message(client: &mut Client) -> WsMessage {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection closed")
                .unwrap();
            match msg {
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                msg => return msg,
            }
        }
    }

    async fn next_json(client: &mut Client) -> serde_json::Value {
        match next_message(client).await {
            WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text, got {other:?}"),
        }
    }

    async fn next_binary(client: &mut Client) -> Vec<u8> {
        match next_message(client).await {
            WsMessage::Binary(bytes) => bytes,
            other => panic!("expected binary, got {other:?}"),
        }
    }

    async fn send_json(client: &mut Client, json: &str) {
        client.send(WsMessage::Text(json.into())).await.unwrap();
    }

    #[tokio::test]
    async fn viewers_get_raw_frames_and_overlays_over_websockets() {
        let mut config = RelayConfig::default();
        config.server.bind_addr = "127.0.0.1:0".into();
        let (addr, server) = start_server(&config).await.unwrap();

        let (mut viewer, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/viewer"))
            .await
            .unwrap();
        // Once the reply arrives the viewer is subscribed to the relay.
        send_json(&mut viewer, r#"{"type":"disable"}"#).await;
        let reply = next_json(&mut viewer).await;
        assert_eq!(reply["type"], "detection");
        assert_eq!(reply["enabled"], false);

        let (mut camera, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/sender"))
            .await
            .unwrap();

        // Detection off: the camera's bytes come through untouched.
        let raw = gray_png(100);
        camera.send(WsMessage::Binary(raw.clone())).await.unwrap();
        assert_eq!(next_binary(&mut viewer).await, raw);

        // Camera pages send base64 data URLs as text.
        let url = format!("data:image/png;base64,{}", STANDARD.encode(gray_png(60)));
        send_json(&mut camera, &format!(r#"{{"data":"{url}"}}"#)).await;
        assert_eq!(next_binary(&mut viewer).await, gray_png(60));

        send_json(&mut viewer, r#"{"type":"enable"}"#).await;
        assert_eq!(next_json(&mut viewer).await["enabled"], true);

        // Detection on: the raw frame, then the overlay header, then the overlay.
        camera.send(WsMessage::Binary(raw.clone())).await.unwrap();
        assert_eq!(next_binary(&mut viewer).await, raw);
        let header = next_json(&mut viewer).await;
        assert_eq!(header["type"], "overlay");
        assert!(header["seq"].as_u64().is_some());
        let overlay = codec::decode_image(&next_binary(&mut viewer).await).unwrap();
        assert_eq!(overlay.dimensions(), (4, 4));
        let seed = Pixel::opaque(100, 100, 100).dimmed(0.35);
        assert!(overlay.pixels().all(|p| p == seed));

        send_json(&mut viewer, r#"{"type":"configure","sensitivity":400}"#).await;
        let reply = next_json(&mut viewer).await;
        assert_eq!(reply["type"], "config");
        assert_eq!(reply["sensitivity"], 50.0);

        // Detection off again: only raw frames, no late overlays.
        send_json(&mut viewer, r#"{"type":"disable"}"#).await;
        assert_eq!(next_json(&mut viewer).await["enabled"], false);
        camera.send(WsMessage::Binary(gray_png(200))).await.unwrap();
        assert_eq!(next_binary(&mut viewer).await, gray_png(200));
        let quiet = tokio::time::timeout(Duration::from_millis(200), viewer.next()).await;
        assert!(quiet.is_err(), "unexpected message after disable");

        // The camera never hears its own frames back.
        let echo = tokio::time::timeout(Duration::from_millis(200), camera.next()).await;
        assert!(echo.is_err(), "camera received a frame");

        server.abort();
    }

    #[tokio::test]
    async fn health_check_answers_ok() {
        let mut config = RelayConfig::default();
        config.server.bind_addr = "127.0.0.1:0".into();
        let (addr, server) = start_server(&config).await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));
        server.abort();
    }
}

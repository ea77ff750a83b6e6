//! Viewer fan-out over WebSocket.
//!
//! The tick runner publishes each message once into a tokio broadcast
//! channel; every connected viewer drains its own receiver. A viewer that
//! falls more than `VIEWER_QUEUE` messages behind loses the oldest ones
//! and keeps going, so a slow socket never holds up the tick.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use reactor_compute::{FeedState, ModelMode, SensorPhase};
use reactor_core::{AnomalyEvent, AnomalyKind, HealthStatus, SensorKind, SensorReading, TwinState};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::state::AppState;

// ── Wire messages ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Init,
    SensorUpdate,
    Anomaly,
}

/// One sensor entry of a viewer message.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SensorPayload {
    #[schema(value_type = String)]
    pub id: SensorKind,
    pub value: f64,
    #[schema(value_type = String)]
    pub status: HealthStatus,
    pub unit: String,
    pub tick: u64,
}

impl From<&SensorReading> for SensorPayload {
    fn from(r: &SensorReading) -> Self {
        Self {
            id: r.sensor,
            value: r.value,
            status: r.status,
            unit: r.unit.to_string(),
            tick: r.tick,
        }
    }
}

/// One anomaly entry of a viewer message. `timestamp` is Unix seconds.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AnomalyPayload {
    #[schema(value_type = String)]
    pub zone: SensorKind,
    pub severity: f64,
    pub timestamp: f64,
    #[schema(value_type = String)]
    pub kind: AnomalyKind,
    pub tick: u64,
}

impl From<&AnomalyEvent> for AnomalyPayload {
    fn from(e: &AnomalyEvent) -> Self {
        Self {
            zone: e.sensor(),
            severity: e.severity(),
            timestamp: e.timestamp().timestamp_millis() as f64 / 1000.0,
            kind: e.kind(),
            tick: e.tick(),
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct LiveMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub payload: Vec<SensorPayload>,
    #[schema(value_type = Object)]
    pub twin_state: TwinState,
    pub anomalies: Vec<AnomalyPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub feed: Option<FeedState>,
}

impl LiveMessage {
    pub fn new(
        msg_type: MessageType,
        readings: &[SensorReading],
        twin: TwinState,
        anomalies: &[AnomalyEvent],
    ) -> Self {
        Self {
            msg_type,
            payload: readings.iter().map(SensorPayload::from).collect(),
            twin_state: twin,
            anomalies: anomalies.iter().map(AnomalyPayload::from).collect(),
            feed: None,
        }
    }

    pub fn with_feed(mut self, feed: FeedState) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Snapshot ────────────────────────────────────────────────────

/// Latest pipeline state as seen by readers. Written by the tick runner
/// after every tick and scoring cycle.
#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    pub tick: u64,
    pub readings: Vec<SensorReading>,
    pub twin: TwinState,
    pub active: Vec<AnomalyEvent>,
    /// Bounded history, newest first.
    pub recent: Vec<AnomalyEvent>,
    pub model_mode: ModelMode,
    pub phases: BTreeMap<SensorKind, SensorPhase>,
    pub last_tick_at: Option<Instant>,
}

impl LiveSnapshot {
    pub fn new(model_mode: ModelMode) -> Self {
        Self {
            tick: 0,
            readings: Vec::new(),
            twin: TwinState::default(),
            active: Vec::new(),
            recent: Vec::new(),
            model_mode,
            phases: BTreeMap::new(),
            last_tick_at: None,
        }
    }
}

// ── Hub ─────────────────────────────────────────────────────────

pub struct Hub {
    tx: broadcast::Sender<String>,
    snapshot: RwLock<LiveSnapshot>,
    viewers: AtomicUsize,
    tick_period: Duration,
    stale_after: u32,
}

impl Hub {
    pub fn new(
        queue: usize,
        model_mode: ModelMode,
        tick_period: Duration,
        stale_after: u32,
    ) -> Self {
        let (tx, _) = broadcast::channel(queue.max(1));
        Self {
            tx,
            snapshot: RwLock::new(LiveSnapshot::new(model_mode)),
            viewers: AtomicUsize::new(0),
            tick_period,
            stale_after,
        }
    }

    /// Serialize once and fan out. Having no viewers is not an error.
    pub fn publish(&self, message: &LiveMessage) {
        let json = message.to_json();
        if self.tx.send(json).is_err() {
            debug!(kind = ?message.msg_type, "no viewers connected");
        }
    }

    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut LiveSnapshot),
    {
        let mut snapshot = self.snapshot.write().await;
        f(&mut snapshot);
    }

    pub async fn snapshot(&self) -> LiveSnapshot {
        self.snapshot.read().await.clone()
    }

    pub fn feed_state(&self, snapshot: &LiveSnapshot) -> FeedState {
        FeedState::from_last_tick(
            snapshot.last_tick_at,
            Instant::now(),
            self.tick_period,
            self.stale_after,
        )
    }

    /// Full snapshot message for a newly connected viewer.
    pub async fn init_message(&self) -> LiveMessage {
        let snapshot = self.snapshot.read().await;
        LiveMessage::new(MessageType::Init, &snapshot.readings, snapshot.twin, &snapshot.active)
            .with_feed(self.feed_state(&snapshot))
    }

    /// Subscribe, then build the init message. Anything published after
    /// the subscription is queued behind init, so init always comes first.
    pub async fn join(&self) -> (String, broadcast::Receiver<String>) {
        let rx = self.tx.subscribe();
        let init = self.init_message().await.to_json();
        (init, rx)
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }
}

// ── WebSocket Handler ───────────────────────────────────────────

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    serve_viewer(&state.hub, sender, receiver).await;
}

/// Drive one viewer: init first, then every broadcast, until the client
/// closes or a send fails. The viewer is counted for as long as it is
/// subscribed.
async fn serve_viewer<S, R, E>(hub: &Hub, mut sender: S, mut receiver: R)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let (init, mut rx) = hub.join().await;
    let viewers = hub.viewers.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(viewers, "viewer connected");

    if sender.send(Message::Text(init.into())).await.is_ok() {
        let mut send_task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "viewer lagging; oldest updates dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Incoming frames are ignored apart from close.
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        });

        // Wait for the aborted side too, so its broadcast receiver is gone
        // before the viewer is uncounted.
        tokio::select! {
            _ = &mut send_task => {
                recv_task.abort();
                let _ = recv_task.await;
            }
            _ = &mut recv_task => {
                send_task.abort();
                let _ = send_task.await;
            }
        }
    }

    let viewers = hub.viewers.fetch_sub(1, Ordering::Relaxed) - 1;
    debug!(viewers, "viewer disconnected");
}

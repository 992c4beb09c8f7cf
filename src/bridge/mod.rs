//! Persistent control channel to the controller.
//!
//! One WebSocket connection carries JSON commands in and JSON events out.
//! The bridge owns the dispatch: each inbound command is routed to the
//! active platform strategy, long-running chat turns run on their own task
//! so heartbeats keep flowing, and a dropped connection is re-established
//! after a fixed delay for as long as the process lives.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::core::config::WireConfig;
use crate::core::types::{ControlCommand, ControlEvent, PhaseRecord};
use crate::error::{WireError, WireResult};
use crate::strategy::{PlatformStrategy, StrategyCtx};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type SharedSink = Arc<Mutex<WsSink>>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct ControlBridge {
    url: String,
    app_name: String,
    socket_timeout: Duration,
    reconnect_delay: Duration,
    ctx: Arc<StrategyCtx>,
    strategy: Arc<dyn PlatformStrategy>,
    /// One chat at a time; a second is rejected, not queued.
    chat_active: Arc<AtomicBool>,
    connected: AtomicBool,
}

impl ControlBridge {
    pub fn new(
        config: &WireConfig,
        ctx: Arc<StrategyCtx>,
        strategy: Arc<dyn PlatformStrategy>,
    ) -> Self {
        Self {
            url: config.resolve_controller_url(),
            app_name: format!("chatwire-{}", strategy.name()),
            socket_timeout: Duration::from_secs(config.resolve_socket_timeout_secs()),
            reconnect_delay: Duration::from_secs(config.resolve_reconnect_delay_secs()),
            ctx,
            strategy,
            chat_active: Arc::new(AtomicBool::new(false)),
            connected: AtomicBool::new(false),
        }
    }

    /// Whether the control channel is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Serve the control channel until the process is shut down.
    pub async fn run(&self) {
        loop {
            match self.connect_and_serve().await {
                Ok(()) => info!("control channel closed cleanly"),
                Err(e) => warn!("control channel lost: {}", e),
            }
            self.connected.store(false, Ordering::SeqCst);
            info!("reconnecting in {:?}", self.reconnect_delay);
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn connect_and_serve(&self) -> WireResult<()> {
        info!("connecting to controller at {}", self.url);
        let (ws, _) = tokio::time::timeout(self.socket_timeout, connect_async(&self.url))
            .await
            .map_err(|_| WireError::Socket(format!("connect timeout to {}", self.url)))?
            .map_err(WireError::socket)?;
        info!("control channel established");
        self.connected.store(true, Ordering::SeqCst);

        let (sink, mut stream) = ws.split();
        let sink: SharedSink = Arc::new(Mutex::new(sink));

        send_event(
            &sink,
            &ControlEvent::Heartbeat {
                app_name: self.app_name.clone(),
            },
        )
        .await?;

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // immediate first tick already sent above
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    send_event(&sink, &ControlEvent::Heartbeat {
                        app_name: self.app_name.clone(),
                    })
                    .await?;
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text, &sink).await,
                    Some(Ok(Message::Ping(payload))) => {
                        sink.lock()
                            .await
                            .send(Message::Pong(payload))
                            .await
                            .map_err(WireError::socket)?;
                    }
                    Some(Ok(Message::Close(_))) => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(WireError::socket(e)),
                    None => return Err(WireError::Socket("stream ended".to_string())),
                },
            }
        }
    }

    async fn dispatch(&self, text: &str, sink: &SharedSink) {
        let command: ControlCommand = match serde_json::from_str(text) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("malformed command dropped: {} ({})", e, text);
                return;
            }
        };
        debug!("command: {:?}", command);

        match command {
            ControlCommand::Chat {
                payload,
                request_id,
            } => self.start_chat(payload.prompt, request_id, sink).await,
            ControlCommand::NewChat { request_id } => {
                let strategy = self.strategy.clone();
                let ctx = self.ctx.clone();
                spawn_session_op(sink, request_id, "new-chat", async move {
                    strategy.handle_new_chat(&ctx).await
                });
            }
            ControlCommand::ChatReload { chat_id } => {
                let strategy = self.strategy.clone();
                let ctx = self.ctx.clone();
                spawn_session_op(sink, None, "chat-reload", async move {
                    strategy.handle_chat_reload(&ctx, chat_id.as_deref()).await
                });
            }
            ControlCommand::GetChatId => {
                let chat_id = match self.strategy.current_chat_id(&self.ctx).await {
                    Ok(id) => id,
                    Err(e) => {
                        error!("get-chat-id failed: {}", e);
                        None
                    }
                };
                send_or_log(sink, &ControlEvent::ReturnChatId { chat_id }).await;
            }
            ControlCommand::Heartbeat => {
                send_or_log(
                    sink,
                    &ControlEvent::Heartbeat {
                        app_name: self.app_name.clone(),
                    },
                )
                .await;
            }
            ControlCommand::Connected => info!("controller acknowledged connection"),
        }
    }

    /// Run one chat turn on its own task. A turn already in flight rejects
    /// the newcomer immediately.
    async fn start_chat(&self, prompt: String, request_id: String, sink: &SharedSink) {
        if self.chat_active.swap(true, Ordering::SeqCst) {
            warn!("chat {} rejected: another chat is active", request_id);
            send_or_log(
                sink,
                &ControlEvent::answer_err(&request_id, WireError::Busy("chat".to_string())),
            )
            .await;
            return;
        }

        let strategy = self.strategy.clone();
        let ctx = self.ctx.clone();
        let sink = sink.clone();
        let chat_active = self.chat_active.clone();
        tokio::spawn(async move {
            let (fragment_tx, mut fragment_rx) = mpsc::unbounded_channel::<String>();
            let relay_sink = sink.clone();
            let relay_id = request_id.clone();
            let relay = tokio::spawn(async move {
                while let Some(fragment) = fragment_rx.recv().await {
                    send_or_log(
                        &relay_sink,
                        &ControlEvent::AnswerStream {
                            request_id: relay_id.clone(),
                            fragment,
                        },
                    )
                    .await;
                }
            });

            let result = bounded(
                strategy.chat_deadline(),
                strategy.name(),
                strategy.handle_chat_event(&ctx, &prompt, &request_id, Some(fragment_tx)),
            )
            .await;
            if result.is_err() {
                // A turn cancelled mid-flight leaves its watcher in the
                // slot; vacate it so stray matching calls stop writing.
                if let Some(watcher) = ctx.slot.lock().await.take() {
                    if let Err(e) = watcher.cleanup().await {
                        debug!("cleanup of {} failed: {}", watcher.phase_key(), e);
                    }
                }
            }
            relay.await.ok();
            chat_active.store(false, Ordering::SeqCst);

            let event = match result {
                Ok(record) => match serde_json::to_value(&record) {
                    Ok(data) => ControlEvent::answer_ok(&request_id, data),
                    Err(e) => ControlEvent::answer_err(&request_id, e),
                },
                Err(e) => {
                    error!("chat {} failed: {}", request_id, e);
                    ControlEvent::answer_err(&request_id, e)
                }
            };
            send_or_log(&sink, &event).await;
        });
    }
}

/// Bound one chat turn so a call that stalls past INIT cannot pin the
/// bridge busy for the rest of the process.
async fn bounded<F>(deadline: Duration, site: &str, turn: F) -> WireResult<PhaseRecord>
where
    F: Future<Output = WireResult<PhaseRecord>>,
{
    match tokio::time::timeout(deadline, turn).await {
        Ok(result) => result,
        Err(_) => Err(WireError::Timeout {
            pattern: site.to_string(),
            timeout_ms: deadline.as_millis() as u64,
        }),
    }
}

/// Run a session operation off the select loop; a slow strategy (chat-reload
/// sleeps between clicks) must not stall heartbeat ticks or later commands.
/// A request id, when supplied, gets an `answer` event with the outcome.
fn spawn_session_op<F>(sink: &SharedSink, request_id: Option<String>, op: &'static str, fut: F)
where
    F: Future<Output = WireResult<()>> + Send + 'static,
{
    let sink = sink.clone();
    tokio::spawn(async move {
        let result = fut.await;
        match (request_id, result) {
            (Some(id), Ok(())) => {
                send_or_log(
                    &sink,
                    &ControlEvent::answer_ok(&id, serde_json::json!({"status": "ok"})),
                )
                .await;
            }
            (Some(id), Err(e)) => {
                error!("{} failed: {}", op, e);
                send_or_log(&sink, &ControlEvent::answer_err(&id, e)).await;
            }
            (None, Ok(())) => {}
            (None, Err(e)) => error!("{} failed: {}", op, e),
        }
    });
}

async fn send_event(sink: &SharedSink, event: &ControlEvent) -> WireResult<()> {
    let text = serde_json::to_string(event)?;
    sink.lock()
        .await
        .send(Message::Text(text))
        .await
        .map_err(WireError::socket)?;
    Ok(())
}

async fn send_or_log(sink: &SharedSink, event: &ControlEvent) {
    if let Err(e) = send_event(sink, event).await {
        error!("failed to send control event: {}", e);
    }
}

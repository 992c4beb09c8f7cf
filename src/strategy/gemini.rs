//! Strategy for gemini.google.com.
//!
//! Gemini's answer call uses a batched RPC endpoint whose response is not
//! always observable at the network layer (the page occasionally serves the
//! answer from a prefetched session). When the network watch times out, the
//! answer is recovered by observing the output element directly.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::browser::typing;
use crate::core::types::{Phase, PhaseRecord};
use crate::error::{WireError, WireResult};
use crate::watch::ui_watch;
use crate::watch::PhaseWatcher;

use super::{chat_id_from_url, run_watched_chat, ChatRun, PlatformStrategy, StrategyCtx, Submit};

const ANSWER_PATTERN: &str =
    "/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate";
const INPUT_SELECTOR: &str = "rich-textarea .ql-editor";
const SEND_SELECTOR: &str = "button.send-button";
const NEW_CHAT_SELECTOR: &str = "#sidebar-new-chat-button";
const OUTPUT_SELECTOR: &str = "message-content";
const REPLACE_URL: &str = "http://localhost:4001/api/fake-stream-chat?platform=gemini";
const ANSWER_TIMEOUT: Duration = Duration::from_secs(60);
// Network watch plus the output-observation fallback, with slack.
const TURN_DEADLINE: Duration = Duration::from_secs(180);

static CHAT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/app/([a-f0-9-]+)").expect("valid chat id pattern"));

pub struct GeminiStrategy;

#[async_trait]
impl PlatformStrategy for GeminiStrategy {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn is_match(&self, hostname: &str) -> bool {
        hostname.contains("gemini.google.com")
    }

    fn replace_url(&self) -> Option<String> {
        Some(REPLACE_URL.to_string())
    }

    fn chat_deadline(&self) -> Duration {
        TURN_DEADLINE
    }

    async fn handle_chat(
        &self,
        ctx: &StrategyCtx,
        prompt: &str,
        request_id: &str,
        break_phase: Phase,
        fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> WireResult<PhaseRecord> {
        let network = run_watched_chat(
            ctx,
            ChatRun {
                pattern: ANSWER_PATTERN,
                replace_url: self.replace_url(),
                timeout: ANSWER_TIMEOUT,
                break_phase,
                request_id,
                prompt,
                input_selector: INPUT_SELECTOR,
                submit: Submit::Click(SEND_SELECTOR),
            },
        )
        .await;

        match network {
            Err(WireError::Timeout { .. }) => {
                warn!("no answer call observed, falling back to output observation");
                self.observe_output(ctx, request_id, fragments).await
            }
            other => other,
        }
    }

    async fn handle_new_chat(&self, ctx: &StrategyCtx) -> WireResult<()> {
        typing::click(&ctx.page, NEW_CHAT_SELECTOR).await
    }

    async fn handle_chat_reload(&self, ctx: &StrategyCtx, chat_id: Option<&str>) -> WireResult<()> {
        let current = chat_id_from_url(&ctx.page, &CHAT_ID_RE).await?;
        match reload_target(current.as_deref(), chat_id) {
            Some(url) => {
                ctx.page
                    .goto(url)
                    .await
                    .map_err(crate::error::WireError::browser)?;
            }
            None => {
                ctx.page
                    .reload()
                    .await
                    .map_err(crate::error::WireError::browser)?;
            }
        }
        Ok(())
    }

    async fn current_chat_id(&self, ctx: &StrategyCtx) -> WireResult<Option<String>> {
        chat_id_from_url(&ctx.page, &CHAT_ID_RE).await
    }
}

/// Navigation target when the requested conversation is not the one on
/// screen; `None` means reload in place (also the no-id case).
fn reload_target(current: Option<&str>, requested: Option<&str>) -> Option<String> {
    match requested {
        Some(id) if current != Some(id) => Some(format!("https://gemini.google.com/app/{id}")),
        _ => None,
    }
}

impl GeminiStrategy {
    async fn observe_output(
        &self,
        ctx: &StrategyCtx,
        request_id: &str,
        fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> WireResult<PhaseRecord> {
        let watcher = PhaseWatcher::new(
            ctx.store.clone(),
            ctx.bus.clone(),
            ANSWER_PATTERN,
            ANSWER_TIMEOUT,
            request_id,
            None,
        );
        let observed = ui_watch::observe_element(
            &ctx.page,
            OUTPUT_SELECTOR,
            &watcher,
            fragments,
            ANSWER_TIMEOUT,
        )
        .await;

        let record = match observed {
            Ok(()) => watcher.phase_data().await?.ok_or_else(|| {
                WireError::Phase("output observation finished without a record".to_string())
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = watcher.cleanup().await {
            tracing::debug!("cleanup of {} failed: {}", watcher.phase_key(), e);
        }
        record
    }
}

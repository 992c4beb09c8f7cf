//! Strategy for chat.z.ai.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::browser::typing;
use crate::core::types::{Phase, PhaseRecord};
use crate::error::WireResult;

use super::{run_watched_chat, ChatRun, PlatformStrategy, StrategyCtx, Submit};

const ANSWER_PATTERN: &str = "/api/v2/chat/completions";
const INPUT_SELECTOR: &str = "#chat-input";
const SEND_SELECTOR: &str = "#send-message-button";
const NEW_CHAT_SELECTOR: &str = "#sidebar-new-chat-button";
const REPLACE_URL: &str = "http://localhost:4001/api/fake-stream-chat?platform=z.ai";
const ANSWER_TIMEOUT: Duration = Duration::from_secs(6);
const TURN_DEADLINE: Duration = Duration::from_secs(30);

pub struct ZaiStrategy;

#[async_trait]
impl PlatformStrategy for ZaiStrategy {
    fn name(&self) -> &'static str {
        "z.ai"
    }

    fn is_match(&self, hostname: &str) -> bool {
        hostname.contains("z.ai")
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
        _fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> WireResult<PhaseRecord> {
        run_watched_chat(
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
        .await
    }

    async fn handle_new_chat(&self, ctx: &StrategyCtx) -> WireResult<()> {
        typing::click(&ctx.page, NEW_CHAT_SELECTOR).await
    }

    async fn handle_chat_reload(&self, ctx: &StrategyCtx, _chat_id: Option<&str>) -> WireResult<()> {
        // z.ai restores the previous conversation through history, not URLs.
        typing::click(&ctx.page, NEW_CHAT_SELECTOR).await?;
        tokio::time::sleep(Duration::from_secs(3)).await;
        ctx.page
            .evaluate("window.history.back()")
            .await
            .map_err(crate::error::WireError::browser)?;
        Ok(())
    }

    async fn current_chat_id(&self, _ctx: &StrategyCtx) -> WireResult<Option<String>> {
        Ok(None)
    }
}

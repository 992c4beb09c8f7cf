//! Strategy for chat.deepseek.com.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;

use crate::core::types::{Phase, PhaseRecord};
use crate::error::WireResult;

use super::{chat_id_from_url, run_watched_chat, ChatRun, PlatformStrategy, StrategyCtx, Submit};

const ANSWER_PATTERN: &str = "/api/v0/chat/completion";
const INPUT_SELECTOR: &str = "textarea[placeholder='Message DeepSeek']";
const REPLACE_URL: &str = "http://127.0.0.1:4001/api/fake-stream-chat?platform=deepseek";
const ANSWER_TIMEOUT: Duration = Duration::from_secs(60);

// e.g. https://chat.deepseek.com/a/chat/s/9eb2e582-5626-405e-85b7-22bd441f8581
static CHAT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/chat/s/([a-f0-9-]+)").expect("valid chat id pattern"));

pub struct DeepseekStrategy;

#[async_trait]
impl PlatformStrategy for DeepseekStrategy {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    fn is_match(&self, hostname: &str) -> bool {
        hostname.contains("deepseek.com")
    }

    fn replace_url(&self) -> Option<String> {
        Some(REPLACE_URL.to_string())
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
                // The send button has no stable selector; Enter submits.
                submit: Submit::Enter,
            },
        )
        .await
    }

    async fn handle_new_chat(&self, ctx: &StrategyCtx) -> WireResult<()> {
        ctx.page
            .goto("https://chat.deepseek.com")
            .await
            .map_err(crate::error::WireError::browser)?;
        Ok(())
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
        Some(id) if current != Some(id) => {
            Some(format!("https://chat.deepseek.com/a/chat/s/{id}"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_without_id_stays_in_place() {
        assert_eq!(reload_target(Some("abc123"), None), None);
    }

    #[test]
    fn reload_navigates_only_when_the_id_differs() {
        assert_eq!(reload_target(Some("abc123"), Some("abc123")), None);
        assert_eq!(
            reload_target(Some("abc123"), Some("def456")).as_deref(),
            Some("https://chat.deepseek.com/a/chat/s/def456")
        );
    }
}

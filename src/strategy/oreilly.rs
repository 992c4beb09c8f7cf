//! Strategy for learning.oreilly.com.
//!
//! Claimed so the host never falls through to the generic strategy, but the
//! answer flow itself is not automated yet.
//! TODO: wire up the O'Reilly Answers input form once its selectors settle.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::types::{Phase, PhaseRecord};
use crate::error::{WireError, WireResult};

use super::{PlatformStrategy, StrategyCtx};

const HOST: &str = "learning.oreilly.com";

pub struct OreillyStrategy;

#[async_trait]
impl PlatformStrategy for OreillyStrategy {
    fn name(&self) -> &'static str {
        "oreilly"
    }

    fn is_match(&self, hostname: &str) -> bool {
        hostname.contains(HOST)
    }

    async fn handle_chat(
        &self,
        _ctx: &StrategyCtx,
        _prompt: &str,
        _request_id: &str,
        _break_phase: Phase,
        _fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> WireResult<PhaseRecord> {
        warn!("chat is not automated on {}", HOST);
        Err(WireError::Unsupported(HOST.to_string()))
    }

    async fn handle_new_chat(&self, _ctx: &StrategyCtx) -> WireResult<()> {
        warn!("new-chat is not automated on {}", HOST);
        Ok(())
    }

    async fn handle_chat_reload(&self, _ctx: &StrategyCtx, _chat_id: Option<&str>) -> WireResult<()> {
        warn!("chat-reload is not automated on {}", HOST);
        Ok(())
    }

    async fn current_chat_id(&self, _ctx: &StrategyCtx) -> WireResult<Option<String>> {
        Ok(None)
    }
}

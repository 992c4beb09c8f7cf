//! Fallback strategy for hosts nothing claims.
//!
//! Matches everything and answers every operation with a loud warning, so a
//! controller pointed at an unsupported frontend gets a clear rejection
//! instead of a silent hang.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::types::{Phase, PhaseRecord};
use crate::error::{WireError, WireResult};

use super::{PlatformStrategy, StrategyCtx};

pub struct GenericStrategy;

#[async_trait]
impl PlatformStrategy for GenericStrategy {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn is_match(&self, _hostname: &str) -> bool {
        true
    }

    async fn handle_chat(
        &self,
        _ctx: &StrategyCtx,
        _prompt: &str,
        _request_id: &str,
        _break_phase: Phase,
        _fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> WireResult<PhaseRecord> {
        warn!("generic strategy: chat not implemented for this host");
        Err(WireError::Unsupported("unrecognized platform".to_string()))
    }

    async fn handle_new_chat(&self, _ctx: &StrategyCtx) -> WireResult<()> {
        warn!("generic strategy: new-chat not implemented for this host");
        Ok(())
    }

    async fn handle_chat_reload(&self, _ctx: &StrategyCtx, _chat_id: Option<&str>) -> WireResult<()> {
        warn!("generic strategy: chat-reload not implemented for this host");
        Ok(())
    }

    async fn current_chat_id(&self, _ctx: &StrategyCtx) -> WireResult<Option<String>> {
        Ok(None)
    }
}

//! Per-platform automation strategies.
//!
//! Each supported chat frontend gets one strategy describing which network
//! calls carry the answer, which DOM elements accept the prompt, and how
//! chat identity shows up in the page URL. Selection is ordered first-match
//! on the page hostname, with [`generic::GenericStrategy`] as the fallback
//! for hosts nothing claims.

pub mod deepseek;
pub mod gemini;
pub mod generic;
pub mod mistral;
pub mod oreilly;
pub mod zai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::browser::typing;
use crate::core::types::{Phase, PhaseRecord};
use crate::error::WireResult;
use crate::sync::{PhaseBus, SharedStore, TriggerFlag};
use crate::watch::{PhaseWatcher, WatcherSlot};

/// Shared handles a strategy needs to drive one operation.
pub struct StrategyCtx {
    pub page: Page,
    pub store: Arc<dyn SharedStore>,
    pub bus: Arc<PhaseBus>,
    pub slot: WatcherSlot,
    pub trigger: Arc<TriggerFlag>,
}

/// How a strategy submits the typed prompt.
pub enum Submit<'a> {
    Click(&'a str),
    Enter,
}

/// One network-watched chat turn, described declaratively.
pub struct ChatRun<'a> {
    pub pattern: &'a str,
    pub replace_url: Option<String>,
    pub timeout: Duration,
    pub break_phase: Phase,
    pub request_id: &'a str,
    pub prompt: &'a str,
    pub input_selector: &'a str,
    pub submit: Submit<'a>,
}

#[async_trait]
pub trait PlatformStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy claims `hostname`.
    fn is_match(&self, hostname: &str) -> bool;

    /// Synthetic endpoint a redirected call is issued against, when the
    /// platform supports redirection.
    fn replace_url(&self) -> Option<String> {
        None
    }

    /// Upper bound for one whole chat turn: trigger arming, prompt
    /// injection, and the site answer wait, with slack. A matching call
    /// that advances past INIT and then stalls would otherwise hold the
    /// bridge busy forever.
    fn chat_deadline(&self) -> Duration {
        Duration::from_secs(90)
    }

    /// Type the prompt, submit it, and wait for the matching call to reach
    /// `break_phase`. `fragments` receives incremental text when the
    /// strategy can observe it before the terminal record.
    async fn handle_chat(
        &self,
        ctx: &StrategyCtx,
        prompt: &str,
        request_id: &str,
        break_phase: Phase,
        fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> WireResult<PhaseRecord>;

    /// Like `handle_chat`, but arms the redirect trigger first: the next
    /// matching call is rerouted to the strategy's synthetic endpoint, and
    /// the operation settles at FETCH since the original call never gets a
    /// response stage.
    async fn handle_chat_event(
        &self,
        ctx: &StrategyCtx,
        prompt: &str,
        request_id: &str,
        fragments: Option<mpsc::UnboundedSender<String>>,
    ) -> WireResult<PhaseRecord> {
        ctx.trigger.arm().await?;
        // Give the interception side a beat to observe the armed flag
        // before the page issues the call.
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.handle_chat(ctx, prompt, request_id, Phase::Fetch, fragments)
            .await
    }

    async fn handle_new_chat(&self, ctx: &StrategyCtx) -> WireResult<()>;

    /// Bring a conversation back on screen. Without an id, the current one
    /// is re-established in place.
    async fn handle_chat_reload(&self, ctx: &StrategyCtx, chat_id: Option<&str>)
        -> WireResult<()>;

    /// Chat ID of the conversation currently on screen, if the URL carries
    /// one.
    async fn current_chat_id(&self, ctx: &StrategyCtx) -> WireResult<Option<String>>;
}

/// Ordered first-match selection; generic catches everything else.
pub fn select_strategy(hostname: &str) -> Arc<dyn PlatformStrategy> {
    let known: Vec<Arc<dyn PlatformStrategy>> = vec![
        Arc::new(zai::ZaiStrategy),
        Arc::new(gemini::GeminiStrategy),
        Arc::new(deepseek::DeepseekStrategy),
        Arc::new(mistral::MistralStrategy),
        Arc::new(oreilly::OreillyStrategy),
    ];
    for strategy in known {
        if strategy.is_match(hostname) {
            info!("platform strategy for {}: {}", hostname, strategy.name());
            return strategy;
        }
    }
    warn!("no platform strategy for {}, using generic", hostname);
    Arc::new(generic::GenericStrategy)
}

/// Shared chat flow: install the watcher in the slot, type and submit the
/// prompt, await the break phase, then vacate the slot and drop the store
/// record regardless of outcome.
pub(crate) async fn run_watched_chat(
    ctx: &StrategyCtx,
    run: ChatRun<'_>,
) -> WireResult<PhaseRecord> {
    let watcher = PhaseWatcher::new(
        ctx.store.clone(),
        ctx.bus.clone(),
        run.pattern,
        run.timeout,
        run.request_id,
        run.replace_url,
    );
    *ctx.slot.lock().await = Some(watcher.clone());

    let outcome = async {
        typing::type_like_human(&ctx.page, run.input_selector, run.prompt).await?;
        match run.submit {
            Submit::Click(selector) => typing::click(&ctx.page, selector).await?,
            Submit::Enter => typing::press_enter(&ctx.page, run.input_selector).await?,
        }
        watcher.watch(run.break_phase).await
    }
    .await;

    *ctx.slot.lock().await = None;
    if let Err(e) = watcher.cleanup().await {
        debug!("cleanup of {} failed: {}", watcher.phase_key(), e);
    }
    outcome
}

/// First capture of `re` against the page's current URL.
pub(crate) async fn chat_id_from_url(page: &Page, re: &Regex) -> WireResult<Option<String>> {
    let url = page
        .url()
        .await
        .map_err(crate::error::WireError::browser)?
        .unwrap_or_default();
    Ok(re
        .captures(&url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string()))
}

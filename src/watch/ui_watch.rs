//! UI-observation fallback.
//!
//! Some sites render streamed answers incrementally into the DOM through
//! page-internal code paths the network layer cannot observe reliably. For
//! those, a small script is installed on a designated element: an
//! attribute-change observer, a content-change observer, and an input-event
//! listener all append new text fragments to a queue on the page. The Rust
//! side drains that queue, reporting RESPONSE per fragment and DATA once the
//! end-marker sentinel appears. All observers are torn down together exactly
//! once, on both the success and timeout paths.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::Page;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::types::Phase;
use crate::error::{WireError, WireResult};
use crate::watch::watcher::PhaseWatcher;

/// End-of-stream marker emitted into the observed element.
pub const STREAM_SENTINEL: &str = "[DONE]";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn install_script(selector: &str) -> String {
    format!(
        r#"
(function () {{
    'use strict';
    if (window.__chatwireUiObserver) return true;
    var el = document.querySelector({selector:?});
    if (!el) return false;

    window.__chatwireFragments = [];
    var last = '';

    function currentText() {{
        return (el.value !== undefined ? el.value : el.textContent) || '';
    }}

    function push() {{
        var now = currentText();
        if (now.length > last.length) {{
            window.__chatwireFragments.push(now.substring(last.length));
        }} else if (now !== last) {{
            window.__chatwireFragments.push(now);
        }}
        last = now;
    }}

    var attrObserver = new MutationObserver(push);
    attrObserver.observe(el, {{ attributes: true }});

    var contentObserver = new MutationObserver(push);
    contentObserver.observe(el, {{ childList: true, characterData: true, subtree: true }});

    el.addEventListener('input', push, true);

    window.__chatwireUiObserver = {{
        el: el,
        attrObserver: attrObserver,
        contentObserver: contentObserver,
        inputListener: push
    }};
    return true;
}})();
"#
    )
}

const DRAIN_SCRIPT: &str = r#"
(function () {
    var q = window.__chatwireFragments || [];
    window.__chatwireFragments = [];
    return q;
})();
"#;

const TEARDOWN_SCRIPT: &str = r#"
(function () {
    var o = window.__chatwireUiObserver;
    if (!o) return false;
    o.attrObserver.disconnect();
    o.contentObserver.disconnect();
    o.el.removeEventListener('input', o.inputListener, true);
    delete window.__chatwireUiObserver;
    delete window.__chatwireFragments;
    return true;
})();
"#;

/// Observe `selector` until the sentinel arrives or `deadline` elapses.
///
/// Each fragment is written as a RESPONSE phase on `watcher` (and forwarded
/// to `fragments` when given, for `answer-stream` relaying); the aggregate up
/// to the sentinel is written as DATA. Returns after teardown.
pub async fn observe_element(
    page: &Page,
    selector: &str,
    watcher: &Arc<PhaseWatcher>,
    fragments: Option<mpsc::UnboundedSender<String>>,
    deadline: Duration,
) -> WireResult<()> {
    let installed = page
        .evaluate(install_script(selector))
        .await
        .map_err(WireError::browser)?
        .into_value::<bool>()
        .unwrap_or(false);
    if !installed {
        return Err(WireError::ElementNotFound(selector.to_string()));
    }
    debug!("ui-watch: observing {}", selector);

    let result = drain_until_sentinel(page, watcher, fragments, deadline).await;

    // Single teardown for all exit paths; leaving observers behind would
    // double-report phases on the next operation reusing this element.
    if let Err(e) = page.evaluate(TEARDOWN_SCRIPT).await {
        warn!("ui-watch: teardown failed: {}", e);
    }
    result
}

async fn drain_until_sentinel(
    page: &Page,
    watcher: &Arc<PhaseWatcher>,
    fragments: Option<mpsc::UnboundedSender<String>>,
    deadline: Duration,
) -> WireResult<()> {
    let started = tokio::time::Instant::now();
    let mut aggregate = String::new();

    loop {
        if started.elapsed() >= deadline {
            return Err(WireError::Timeout {
                pattern: watcher.match_source_url.clone(),
                timeout_ms: deadline.as_millis() as u64,
            });
        }

        let batch: Vec<String> = page
            .evaluate(DRAIN_SCRIPT)
            .await
            .ok()
            .and_then(|v| v.into_value().ok())
            .unwrap_or_default();

        for fragment in batch {
            if fragment.contains(STREAM_SENTINEL) {
                let tail = fragment.replace(STREAM_SENTINEL, "");
                if !tail.trim().is_empty() {
                    aggregate.push_str(&tail);
                }
                watcher
                    .set_phase(Phase::Data, json!({ "data": aggregate }))
                    .await?;
                return Ok(());
            }
            aggregate.push_str(&fragment);
            watcher
                .set_phase(Phase::Response, json!({ "fragment": fragment }))
                .await?;
            if let Some(tx) = &fragments {
                let _ = tx.send(fragment);
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

//! Network call interceptor.
//!
//! Wraps the page's call-issuing primitives at the CDP Fetch domain: every
//! request pauses once before transmission and once when the response
//! headers arrive. Calls that do not match the active watcher's pattern are
//! passed through untouched. Matching calls get phase emission at the
//! defined points, the gate-guarded redirect decision at FETCH, and body
//! capture (buffered or incrementally drained) at DATA. Failures on matching
//! calls are reported as an ERROR phase and then passed through — the page's
//! own error handling is never suppressed.

pub mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FulfillRequestParams,
    GetResponseBodyParams, HeaderEntry, RequestPattern, RequestStage,
    TakeResponseBodyAsStreamParams,
};
use chromiumoxide::cdp::browser_protocol::network::{PostDataEntry, ResourceType};
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::types::{now_millis, Phase, RequestSnapshot, ResponseSnapshot};
use crate::error::{WireError, WireResult};
use crate::sync::gate::TriggerFlag;
use crate::watch::watcher::{PhaseWatcher, WatcherSlot};

/// Spacing between consecutive phase writes for one call, giving the
/// watching context time to observe each step before the next overwrites
/// the store record.
const PHASE_PACING: Duration = Duration::from_millis(257);

/// Wire-compatible discriminator for the page's two call primitives: the
/// event-driven one reports as `xhr_*`, everything else as `fetch_*`.
fn request_kind(resource_type: &ResourceType) -> &'static str {
    if *resource_type == ResourceType::Xhr {
        "xhr"
    } else {
        "fetch"
    }
}

fn header_value<'a>(headers: &'a [HeaderEntry], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Incremental transfer that must be drained rather than buffered.
fn is_stream_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| {
            ct.contains("text/event-stream") || ct.contains("application/octet-stream")
        })
        .unwrap_or(false)
}

/// Reassemble the request body from its base64-encoded entries. CDP splits
/// multi-part bodies into one entry per part.
fn post_body(entries: Option<&[PostDataEntry]>) -> Option<String> {
    let mut raw = Vec::new();
    for entry in entries? {
        if let Some(bytes) = &entry.bytes {
            match BASE64_STANDARD.decode(bytes) {
                Ok(decoded) => raw.extend_from_slice(&decoded),
                Err(e) => debug!("undecodable post data entry skipped: {}", e),
            }
        }
    }
    if raw.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&raw).into_owned())
    }
}

fn headers_to_value(headers: &[HeaderEntry]) -> Value {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|h| (h.name.clone(), Value::String(h.value.clone())))
        .collect();
    Value::Object(map)
}

pub struct Interceptor {
    slot: WatcherSlot,
    trigger: Arc<TriggerFlag>,
    installed: AtomicBool,
}

impl Interceptor {
    pub fn new(slot: WatcherSlot, trigger: Arc<TriggerFlag>) -> Arc<Self> {
        Arc::new(Self {
            slot,
            trigger,
            installed: AtomicBool::new(false),
        })
    }

    /// Install interception on `page` and spawn the serving task.
    ///
    /// Installation is once-per-interceptor: a second call is a logged
    /// no-op, so a re-injected bootstrap cannot double-wrap the page.
    pub async fn install(self: &Arc<Self>, page: &Page) -> WireResult<Option<JoinHandle<()>>> {
        if self.installed.swap(true, Ordering::SeqCst) {
            debug!("interceptor already installed, skipping");
            return Ok(None);
        }

        let params = EnableParams::builder()
            .pattern(
                RequestPattern::builder()
                    .url_pattern("*")
                    .request_stage(RequestStage::Request)
                    .build(),
            )
            .pattern(
                RequestPattern::builder()
                    .url_pattern("*")
                    .request_stage(RequestStage::Response)
                    .build(),
            )
            .build();
        page.execute(params).await.map_err(WireError::browser)?;

        let mut events = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(WireError::browser)?;

        info!("network interception enabled");
        let this = self.clone();
        let page = page.clone();
        Ok(Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = this.on_request_paused(&page, &event).await {
                    warn!("interceptor: {} ({})", e, event.request.url);
                    // The page must not hang on a paused request it never
                    // hears back about.
                    this.finish_passthrough(&page, &event).await;
                }
            }
        })))
    }

    /// The active watcher, if any.
    async fn active_watcher(&self) -> Option<Arc<PhaseWatcher>> {
        self.slot.lock().await.clone()
    }

    async fn on_request_paused(
        &self,
        page: &Page,
        event: &EventRequestPaused,
    ) -> WireResult<()> {
        let url = event.request.url.as_str();
        let watcher = self.active_watcher().await;
        let matched = watcher
            .as_ref()
            .map(|w| w.matches(url))
            .unwrap_or(false);

        // Upstream failure surfaced at the pause: report only if matched,
        // then let the failure flow back to the page unchanged.
        if let Some(reason) = &event.response_error_reason {
            if matched {
                if let Some(w) = &watcher {
                    let kind = request_kind(&event.resource_type);
                    w.set_phase(
                        Phase::Error,
                        json!({
                            "type": format!("{kind}_error"),
                            "timestamp": now_millis(),
                            "url": url,
                            "error": format!("{:?}", reason),
                        }),
                    )
                    .await?;
                }
            }
            return self.continue_untouched(page, event).await;
        }

        if !matched {
            return self.continue_untouched(page, event).await;
        }
        let watcher = watcher.ok_or_else(|| WireError::Browser("watcher vanished".into()))?;

        if event.response_status_code.is_some() {
            self.on_response_stage(page, event, &watcher).await
        } else {
            self.on_request_stage(page, event, &watcher).await
        }
    }

    /// Request-stage pause on a matching call: REQUEST → HEADERS → FETCH,
    /// then the redirect decision.
    async fn on_request_stage(
        &self,
        page: &Page,
        event: &EventRequestPaused,
        watcher: &Arc<PhaseWatcher>,
    ) -> WireResult<()> {
        let url = event.request.url.clone();
        let kind = request_kind(&event.resource_type);
        let headers = event.request.headers.inner().clone();
        let snapshot = RequestSnapshot {
            kind: format!("{kind}_request"),
            timestamp: now_millis(),
            url: url.clone(),
            method: event.request.method.clone(),
            headers: Some(headers.clone()),
            body: post_body(event.request.post_data_entries.as_deref()),
        };

        watcher
            .set_phase(Phase::Request, serde_json::to_value(&snapshot)?)
            .await?;
        tokio::time::sleep(PHASE_PACING).await;

        watcher
            .set_phase(Phase::Headers, json!({ "headers": headers }))
            .await?;
        tokio::time::sleep(PHASE_PACING).await;

        watcher
            .set_phase(Phase::Fetch, serde_json::to_value(&snapshot)?)
            .await?;
        tokio::time::sleep(PHASE_PACING).await;

        let redirect = self.trigger.check_and_clear().await?;
        let mut params = ContinueRequestParams::new(event.request_id.clone());
        if redirect {
            match &watcher.replace_url {
                Some(replace) if !replace.trim().is_empty() => {
                    info!("redirecting matching call {} -> {}", url, replace);
                    params.url = Some(replace.clone());
                }
                _ => {
                    debug!("trigger set but no replacement endpoint; proceeding");
                }
            }
        }
        page.execute(params).await.map_err(WireError::browser)?;
        Ok(())
    }

    /// Response-stage pause on a matching call: RESPONSE, then body capture
    /// and DATA.
    async fn on_response_stage(
        &self,
        page: &Page,
        event: &EventRequestPaused,
        watcher: &Arc<PhaseWatcher>,
    ) -> WireResult<()> {
        let url = event.request.url.clone();
        let kind = request_kind(&event.resource_type);
        let status = event.response_status_code.unwrap_or(0);
        let response_headers = event.response_headers.clone().unwrap_or_default();
        let headers_value = headers_to_value(&response_headers);

        watcher.set_phase(Phase::Response, Value::Null).await?;
        tokio::time::sleep(PHASE_PACING).await;

        let content_type = header_value(&response_headers, "content-type");
        let mut snapshot = ResponseSnapshot {
            kind: format!("{kind}_response"),
            timestamp: now_millis(),
            url,
            status,
            status_text: None,
            headers: Some(headers_value),
            body: None,
            data: None,
        };

        if is_stream_content_type(content_type) {
            // Drain incrementally, then hand the reassembled body back so
            // the page still receives what it asked for.
            let taken = page
                .execute(TakeResponseBodyAsStreamParams::new(event.request_id.clone()))
                .await
                .map_err(WireError::browser)?;
            let (raw, aggregate) =
                stream::drain_body_stream(page, taken.result.stream.clone()).await?;
            snapshot.data = Some(aggregate);
            watcher
                .set_phase(Phase::Data, serde_json::to_value(&snapshot)?)
                .await?;

            let fulfill = FulfillRequestParams::builder()
                .request_id(event.request_id.clone())
                .response_code(status)
                .response_headers(response_headers)
                .body(BASE64_STANDARD.encode(&raw))
                .build()
                .map_err(WireError::Browser)?;
            page.execute(fulfill).await.map_err(WireError::browser)?;
            return Ok(());
        }

        // Buffered body. An unreadable body still yields a DATA phase with
        // status and headers only.
        match page
            .execute(GetResponseBodyParams::new(event.request_id.clone()))
            .await
        {
            Ok(resp) => {
                let body = if resp.result.base64_encoded {
                    BASE64_STANDARD
                        .decode(resp.result.body.as_bytes())
                        .ok()
                        .map(|b| String::from_utf8_lossy(&b).into_owned())
                        .unwrap_or_else(|| resp.result.body.clone())
                } else {
                    resp.result.body.clone()
                };
                snapshot.body = Some(body);
            }
            Err(e) => {
                debug!("response body unreadable: {}", e);
            }
        }
        watcher
            .set_phase(Phase::Data, serde_json::to_value(&snapshot)?)
            .await?;

        page.execute(ContinueRequestParams::new(event.request_id.clone()))
            .await
            .map_err(WireError::browser)?;
        Ok(())
    }

    async fn continue_untouched(&self, page: &Page, event: &EventRequestPaused) -> WireResult<()> {
        page.execute(ContinueRequestParams::new(event.request_id.clone()))
            .await
            .map_err(WireError::browser)?;
        Ok(())
    }

    /// Best-effort continue after a handling error, so a failed phase write
    /// never leaves the page hanging. A request that was already continued
    /// or fulfilled makes this a no-op error from the browser.
    async fn finish_passthrough(&self, page: &Page, event: &EventRequestPaused) {
        if let Err(e) = page
            .execute(ContinueRequestParams::new(event.request_id.clone()))
            .await
        {
            debug!("late continue failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xhr_and_fetch_kinds() {
        assert_eq!(request_kind(&ResourceType::Xhr), "xhr");
        assert_eq!(request_kind(&ResourceType::Fetch), "fetch");
        assert_eq!(request_kind(&ResourceType::Document), "fetch");
    }

    #[test]
    fn stream_content_type_detection() {
        assert!(is_stream_content_type(Some("text/event-stream")));
        assert!(is_stream_content_type(Some(
            "text/event-stream; charset=utf-8"
        )));
        assert!(is_stream_content_type(Some("application/octet-stream")));
        assert!(!is_stream_content_type(Some("application/json")));
        assert!(!is_stream_content_type(None));
    }

    #[test]
    fn post_body_concatenates_decoded_entries() {
        use chromiumoxide::Binary;

        let entries = vec![
            PostDataEntry {
                bytes: Some(Binary::from(BASE64_STANDARD.encode(r#"{"prompt":"#))),
            },
            PostDataEntry {
                bytes: Some(Binary::from(BASE64_STANDARD.encode(r#""hi"}"#))),
            },
        ];
        assert_eq!(
            post_body(Some(&entries)).as_deref(),
            Some(r#"{"prompt":"hi"}"#)
        );
        assert_eq!(post_body(None), None);
        assert_eq!(post_body(Some(&[])), None);
        assert_eq!(post_body(Some(&[PostDataEntry { bytes: None }])), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = vec![HeaderEntry {
            name: "Content-Type".to_string(),
            value: "application/json".to_string(),
        }];
        assert_eq!(header_value(&headers, "content-type"), Some("application/json"));
        assert_eq!(header_value(&headers, "x-missing"), None);
    }
}

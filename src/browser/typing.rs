//! Prompt entry that reads like a person at the keyboard.
//!
//! Chat frontends increasingly ignore values poked straight into the DOM;
//! characters go through the real input pipeline one at a time with
//! randomized spacing, and a synthetic `input`/`change` pair is dispatched
//! afterwards so value-tracking frameworks pick the text up.

use std::time::Duration;

use chromiumoxide::{Element, Page};
use rand::distr::{Distribution, Uniform};
use tracing::debug;

use crate::error::{WireError, WireResult};

/// Inter-key delay in milliseconds.
const KEY_DELAY_MS: (u64, u64) = (30, 90);
/// Longer pause after sentence punctuation.
const PUNCT_DELAY_MS: (u64, u64) = (120, 340);

pub async fn find_element(page: &Page, selector: &str) -> WireResult<Element> {
    page.find_element(selector)
        .await
        .map_err(|_| WireError::ElementNotFound(selector.to_string()))
}

fn key_delay(after: char) -> Duration {
    let (lo, hi) = if matches!(after, '.' | ',' | '!' | '?' | ';' | ':') {
        PUNCT_DELAY_MS
    } else {
        KEY_DELAY_MS
    };
    let ms = match Uniform::new(lo, hi) {
        Ok(dist) => dist.sample(&mut rand::rng()),
        Err(_) => lo,
    };
    Duration::from_millis(ms)
}

/// Click, focus and type `text` into the element at `selector`.
pub async fn type_like_human(page: &Page, selector: &str, text: &str) -> WireResult<()> {
    let element = find_element(page, selector).await?;
    element.click().await.map_err(WireError::browser)?;
    element.focus().await.map_err(WireError::browser)?;

    for ch in text.chars() {
        element
            .type_str(ch.to_string())
            .await
            .map_err(WireError::browser)?;
        tokio::time::sleep(key_delay(ch)).await;
    }

    // React-style inputs track value state internally; the synthetic pair
    // makes sure the typed text is committed before submission.
    let script = format!(
        "(() => {{ const el = document.querySelector({selector:?}); if (!el) return false; \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()"
    );
    page.evaluate(script).await.map_err(WireError::browser)?;
    debug!("typed {} chars into {}", text.chars().count(), selector);
    Ok(())
}

/// Submit by clicking a button.
pub async fn click(page: &Page, selector: &str) -> WireResult<()> {
    find_element(page, selector)
        .await?
        .click()
        .await
        .map_err(WireError::browser)?;
    Ok(())
}

/// Submit by pressing Enter inside the input element.
pub async fn press_enter(page: &Page, selector: &str) -> WireResult<()> {
    find_element(page, selector)
        .await?
        .press_key("Enter")
        .await
        .map_err(WireError::browser)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_pauses_longer_than_letters() {
        for _ in 0..32 {
            assert!(key_delay('a') <= Duration::from_millis(KEY_DELAY_MS.1));
            assert!(key_delay('.') >= Duration::from_millis(PUNCT_DELAY_MS.0));
        }
    }
}

//! Native browser management using `chromiumoxide`.
//!
//! Single source of truth for:
//! * Finding a usable browser executable (Brave → Chrome → Chromium, cross-platform).
//! * `BrowserSession` — one persistent browser with one long-lived page, kept
//!   alive for the whole lifetime of the process so platform logins survive.
//! * Launch flags. Chat frontends fingerprint automation aggressively, so the
//!   same stealth defaults apply headful and headless.

pub mod typing;

use std::path::Path;

use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use rand::seq::IndexedRandom;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::core::config::WireConfig;
use crate::error::{WireError, WireResult};

const DESKTOP_USER_AGENTS: &[&str] = &[
    // Chrome 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 132 – macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 131 – Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
];

/// Returns a randomly-chosen realistic desktop User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan – finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "brave-browser",
            "brave",
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/brave-browser",
            "/usr/bin/brave",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Build a `BrowserConfig` with stealth defaults.
///
/// `--disable-blink-features=AutomationControlled` hides the
/// `navigator.webdriver` flag; UA is randomly drawn from
/// `DESKTOP_USER_AGENTS`.
pub fn build_browser_config(exe: &str, headless: bool) -> WireResult<BrowserConfig> {
    let ua = random_user_agent();

    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: 1920,
            height: 1080,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(1920, 1080)
        .arg("--disable-gpu")
        .arg("--no-sandbox") // often required in CI / restricted environments
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-crash-reporter")
        .arg("--disable-breakpad")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        // Stealth: suppress CDP automation fingerprint
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua));

    if !headless {
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| WireError::Browser(format!("failed to build browser config: {}", e)))
}

/// One persistent browser with one long-lived page.
///
/// The page is never recycled: chat platforms keep login state and
/// conversation context in it, and the interceptor is installed on it once.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    pub page: Page,
}

impl BrowserSession {
    /// Launch the browser and open the configured start URL.
    pub async fn launch(config: &WireConfig) -> WireResult<Self> {
        let exe = config
            .resolve_chrome_executable()
            .or_else(find_chrome_executable)
            .ok_or_else(|| {
                WireError::Browser("no usable browser executable found".to_string())
            })?;
        info!("launching browser ({})", exe);

        let browser_config = build_browser_config(&exe, config.resolve_headless())?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| WireError::Browser(format!("failed to launch ({}): {}", exe, e)))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });

        let start_url = config.resolve_start_url();
        let page = browser
            .new_page(start_url.as_str())
            .await
            .map_err(WireError::browser)?;
        let _ = page.wait_for_navigation().await;
        info!("page ready at {}", start_url);

        Ok(Self {
            browser,
            handler,
            page,
        })
    }

    /// Hostname of the page currently loaded, for strategy selection.
    pub async fn hostname(&self) -> WireResult<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(WireError::browser)?
            .unwrap_or_default();
        let parsed = Url::parse(&url)
            .map_err(|e| WireError::Browser(format!("unparseable page url {}: {}", url, e)))?;
        Ok(parsed.host_str().unwrap_or_default().to_string())
    }

    pub async fn shutdown(mut self) {
        let _ = self.browser.close().await;
        self.handler.abort();
        info!("browser shut down");
    }
}

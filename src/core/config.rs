use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// WireConfig — file-based config loader (chatwire.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Top-level config loaded from `chatwire.json`.
///
/// Every field is optional in the file; `resolve_*` accessors apply the
/// JSON → env var → default precedence.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct WireConfig {
    /// Controller WebSocket endpoint, e.g. `ws://localhost:4001`.
    pub controller_url: Option<String>,
    /// Page to open on startup (decides the active strategy).
    pub start_url: Option<String>,
    /// Run the browser headless. Visible by default — the whole point is
    /// driving a real page session that sites accept as a user.
    pub headless: Option<bool>,
    /// Explicit browser executable path (otherwise auto-discovered).
    pub chrome_executable: Option<String>,
    /// Directory for the file-backed shared store.
    pub store_dir: Option<String>,
    /// Connect timeout for the control socket, seconds.
    pub socket_timeout_secs: Option<u64>,
    /// Delay between reconnect attempts, seconds.
    pub reconnect_delay_secs: Option<u64>,
}

impl WireConfig {
    /// Load `chatwire.json` from the working directory or `CHATWIRE_CONFIG`.
    /// A missing or unreadable file yields the all-defaults config.
    pub fn load() -> Self {
        let path = std::env::var("CHATWIRE_CONFIG").unwrap_or_else(|_| "chatwire.json".to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!("chatwire.json is invalid ({}); using defaults", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Controller URL: JSON field → `CHATWIRE_CONTROLLER_URL` → `ws://localhost:4001`.
    pub fn resolve_controller_url(&self) -> String {
        if let Some(u) = &self.controller_url {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var("CHATWIRE_CONTROLLER_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "ws://localhost:4001".to_string())
    }

    /// Start URL: JSON field → `CHATWIRE_START_URL` → `https://chat.z.ai/`.
    pub fn resolve_start_url(&self) -> String {
        if let Some(u) = &self.start_url {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var("CHATWIRE_START_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://chat.z.ai/".to_string())
    }

    /// Headless: JSON field → `CHATWIRE_HEADLESS` ("1"/"true") → `false`.
    pub fn resolve_headless(&self) -> bool {
        if let Some(b) = self.headless {
            return b;
        }
        std::env::var("CHATWIRE_HEADLESS")
            .map(|v| matches!(v.trim(), "1" | "true"))
            .unwrap_or(false)
    }

    /// Browser executable override: JSON field → `CHROME_EXECUTABLE` → auto-discovery.
    pub fn resolve_chrome_executable(&self) -> Option<String> {
        if let Some(p) = &self.chrome_executable {
            if !p.trim().is_empty() {
                return Some(p.clone());
            }
        }
        std::env::var("CHROME_EXECUTABLE")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    /// Store directory: JSON field → `CHATWIRE_STORE_DIR` → `~/.chatwire/store`.
    pub fn resolve_store_dir(&self) -> PathBuf {
        if let Some(d) = &self.store_dir {
            if !d.trim().is_empty() {
                return PathBuf::from(d);
            }
        }
        if let Ok(d) = std::env::var("CHATWIRE_STORE_DIR") {
            if !d.trim().is_empty() {
                return PathBuf::from(d);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chatwire")
            .join("store")
    }

    /// Socket connect timeout: JSON field → `CHATWIRE_SOCKET_TIMEOUT_SECS` → 5.
    pub fn resolve_socket_timeout_secs(&self) -> u64 {
        if let Some(n) = self.socket_timeout_secs {
            return n;
        }
        std::env::var("CHATWIRE_SOCKET_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5)
    }

    /// Reconnect delay: JSON field → `CHATWIRE_RECONNECT_DELAY_SECS` → 5.
    pub fn resolve_reconnect_delay_secs(&self) -> u64 {
        if let Some(n) = self.reconnect_delay_secs {
            return n;
        }
        std::env::var("CHATWIRE_RECONNECT_DELAY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = WireConfig::default();
        assert_eq!(cfg.resolve_socket_timeout_secs(), 5);
        assert!(cfg.resolve_start_url().contains("z.ai"));
    }

    #[test]
    fn json_field_wins() {
        let cfg: WireConfig =
            serde_json::from_str(r#"{"controller_url": "ws://10.0.0.2:9000"}"#).unwrap();
        assert_eq!(cfg.resolve_controller_url(), "ws://10.0.0.2:9000");
    }
}

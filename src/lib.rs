pub mod bridge;
pub mod browser;
pub mod core;
pub mod error;
pub mod intercept;
pub mod strategy;
pub mod sync;
pub mod watch;

// --- Primary core exports ---
pub use core::config::WireConfig;
pub use core::types;
pub use core::types::{ControlCommand, ControlEvent, Phase, PhaseRecord};
pub use error::{WireError, WireResult};

pub use bridge::ControlBridge;
pub use browser::BrowserSession;
pub use intercept::Interceptor;
pub use strategy::{select_strategy, PlatformStrategy, StrategyCtx};
pub use sync::{FileStore, Gate, MemoryStore, PhaseBus, SharedStore, TriggerFlag};
pub use watch::{PhaseWatcher, WatcherSlot};

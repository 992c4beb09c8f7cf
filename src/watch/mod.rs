pub mod ui_watch;
pub mod watcher;

pub use watcher::{PhaseWatcher, WatcherSlot, DEFAULT_WATCH_TIMEOUT};

pub mod events;
pub mod gate;
pub mod store;

pub use events::{PhaseBus, PhaseEvent};
pub use gate::{Gate, TriggerFlag};
pub use store::{phase_key, FileStore, MemoryStore, SharedStore, TRIGGER_KEY};

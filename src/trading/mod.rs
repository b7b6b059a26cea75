pub mod engine;
pub mod events;
pub mod registry;
pub mod simulation;

pub use engine::{EngineConfig, EngineError, TradingEngine};
pub use events::EngineEvent;
pub use registry::{PendingOrder, RegistryError, TradeRegistry, TradeTransition};
pub use simulation::{SimulatedOutcome, Simulator};

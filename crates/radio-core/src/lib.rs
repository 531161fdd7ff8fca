pub mod constants;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lightning;
pub mod media;
pub mod noise;
pub mod scheduler;
pub mod sim;
pub mod station;
pub mod synth;
pub mod timers;

pub use engine::{Engine, EngineConfig, PowerState, ScanFuture, ScanOutcome};
pub use error::{RadioError, Result};
pub use graph::{AudioBackend, NodeId, SharedBackend};
pub use lightning::{LightningEvent, LightningHandler};
pub use noise::{NoiseBuffer, NoiseBufferFactory, NoiseColor};
pub use scheduler::{EventScheduler, ScheduleHandle, ScheduleSpec};
pub use station::{MediaInput, SourceSpec, Station, TextureColor, TextureSpec, ThunderProfile};
pub use timers::{SharedTimers, TimerId, Timers};

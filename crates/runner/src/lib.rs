pub mod coordinator;
pub mod engine;
pub mod reader;
pub mod status;

pub use coordinator::{Coordinator, SinkSlot};
pub use engine::{
    EngineHandle, EngineManager, build_coordinator, checkpoint_store,
    spawn_engine,
};
pub use reader::BatchReader;
pub use status::{EngineState, EngineStatus, SinkHealth, SinkStatus};

pub mod actor;
pub mod events;
pub mod level;
pub mod registry;

pub use actor::WorldHandle;
pub use events::{EntityInfo, Watcher, WorldEvent};
pub use level::{LevelData, WorldTime};
pub use registry::WorldRegistry;

pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    SimulationConfig, GeneralConfig, WorldConfig, ImmuneSystemConfig, EpithelialSystemConfig,
    FocusSystemConfig, EpithelialCellConfig, ImmuneCellConfig, OutputConfig,
};
pub use sim_params::{SimParams, WorldParams, EpithelialParams, ImmuneParams, FocusParams};
pub use snapshot::Snapshot;
pub use vecmath::{Vector2D, MOORE_OFFSETS, wrap, clamp};

//! Cellular-automaton model of influenza spreading through a sheet of epithelial cells,
//! with an innate immune response and lesion (focus) merge tracking.

pub mod cells;
pub mod epithelial;
pub mod focus;
pub mod grid;
pub mod immune;
pub mod presenter;
pub mod simulation;
pub mod system;

#[cfg(test)]
mod test_support;

pub use cells::{EpithelialCell, EpithelialState, FocusId, ImmuneCell, ImmuneCellId, ImmuneState};
pub use epithelial::{EpithelialCounts, EpithelialSystem};
pub use focus::{Focus, FocusSystem, MergeEvent};
pub use grid::{Site, World};
pub use immune::ImmuneSystem;
pub use presenter::{frame_channel, spawn_presenter, FrameReceiver, FrameSink, PresenterStats};
pub use simulation::{Frame, ImmuneView, InfluenzaSimulation, SiteView};
pub use system::CellSystem;

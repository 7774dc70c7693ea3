use serde::{Serialize, Deserialize};

/// Aggregate population counters of a run at a specific timestep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The timestep this snapshot was taken after.
    pub time: u32,
    pub healthy: u32,
    pub containing: u32,
    pub expressing: u32,
    pub infectious: u32,
    /// Natural and infection deaths combined.
    pub dead: u32,
    pub virgin_immune: u32,
    pub mature_immune: u32,
    /// Infection deaths divided by the number of seeded infections.
    pub avg_foci_area: f64,
    /// Mean cell count over enabled, non-empty foci.
    /// Only present when focus tracking is enabled.
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "avg_enabled_focus_cells": null
    pub avg_enabled_focus_cells: Option<f64>,
}

impl Snapshot {
    pub fn infected(&self) -> u32 {
        self.containing + self.expressing + self.infectious
    }

    pub fn immune_total(&self) -> u32 {
        self.virgin_immune + self.mature_immune
    }
}

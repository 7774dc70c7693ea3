use serde::{Deserialize, Serialize};

/// Grid geometry, fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldParams {
    pub grid_width: u32,
    pub grid_height: u32,
    pub is_toroidal: bool,
}

impl WorldParams {
    pub fn area(&self) -> u32 {
        self.grid_width * self.grid_height
    }
}

/// Epithelial cell and system parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpithelialParams {
    pub lifespan: u32,
    pub infect_rate: f64,
    pub infect_lifespan: u32,
    pub express_delay: u32,
    pub infect_delay: u32,
    pub division_time: u32,
    pub infect_init_fraction: f64,
    pub regen_enabled: bool,
    pub random_age: bool,
}

/// Immune cell and system parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImmuneParams {
    pub enabled: bool,
    pub lifespan: u32,
    pub base_cell_fraction: f64,
    pub recruitment_rate: f64,
    pub recruit_delay: u32,
    pub flow_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusParams {
    pub enabled: bool,
    pub merge_threshold_percent: u32, // Always in 1..=100
    pub debug_text_enabled: bool,
}

/// Simulation parameters derived from the configuration, shared read-only by every system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    pub world: WorldParams,
    pub epithelial: EpithelialParams,
    pub immune: ImmuneParams,
    pub focus: FocusParams,
}

impl SimParams {
    /// Number of epithelial cells seeded as CONTAINING at start-up: `ceil(area * fraction)`, at least 1.
    pub fn initial_infected(&self) -> u32 {
        let area = self.world.area();
        let seeds = (area as f64 * self.epithelial.infect_init_fraction).ceil() as u32;
        seeds.max(1).min(area)
    }

    /// Baseline virgin immune population: `area * fraction`, at least 1.
    pub fn base_immune_cells(&self) -> u32 {
        let area = self.world.area();
        ((area as f64 * self.immune.base_cell_fraction) as u32).max(1)
    }
}

use simulation_common::{EpithelialParams, FocusParams, ImmuneParams, SimParams, WorldParams};

/// Quiet parameters for unit tests: a toroidal grid, one seed that never progresses on its own,
/// no spread, no regeneration, and both optional systems off.
pub fn params(width: u32, height: u32) -> SimParams {
    SimParams {
        world: WorldParams { grid_width: width, grid_height: height, is_toroidal: true },
        epithelial: EpithelialParams {
            lifespan: 10_000,
            infect_rate: 0.0,
            infect_lifespan: 100,
            express_delay: 100,
            infect_delay: 100,
            division_time: 72,
            infect_init_fraction: 0.0,
            regen_enabled: false,
            random_age: false,
        },
        immune: ImmuneParams {
            enabled: false,
            lifespan: 1_000,
            base_cell_fraction: 0.0,
            recruitment_rate: 0.25,
            recruit_delay: 7,
            flow_rate: 6.0,
        },
        focus: FocusParams { enabled: false, merge_threshold_percent: 10, debug_text_enabled: false },
    }
}

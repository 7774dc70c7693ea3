use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::{EpithelialParams, FocusParams, ImmuneParams, SimParams, WorldParams};
use std::path::Path;

// Run-level settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_number_of_runs")]
    pub number_of_runs: u32,
    /// Last timestep of a run (inclusive). 1440 timesteps = 10 days.
    #[serde(default = "default_run_time")]
    pub run_time: u32,
    #[serde(default)]
    pub debug_text_enabled: bool,
    /// Seed for the per-run RNG. Run `n` uses `seed + n`. Random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

// Worldspace geometry
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorldConfig {
    #[serde(default = "default_true")]
    pub is_toroidal: bool,
    #[serde(default = "default_grid_width")]
    pub grid_width: u32,
    #[serde(default = "default_grid_height")]
    pub grid_height: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ImmuneSystemConfig {
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default = "default_recruit_delay")]
    pub recruit_delay: u32,
    #[serde(default = "default_base_imm_cell")]
    pub base_imm_cell: f64,
    #[serde(default = "default_recruitment")]
    pub recruitment: f64,
    #[serde(default = "default_flow_rate")]
    pub flow_rate: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EpithelialSystemConfig {
    #[serde(default = "default_infect_init")]
    pub infect_init: f64,
    #[serde(default = "default_true")]
    pub regen_enabled: bool,
    #[serde(default = "default_true")]
    pub random_age: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FocusSystemConfig {
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default = "default_collisions_for_merge_percentage")]
    pub collisions_for_merge_percentage: u32,
    #[serde(default)]
    pub debug_text_enabled: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EpithelialCellConfig {
    #[serde(default = "default_epithelial_lifespan")]
    pub lifespan: u32,
    #[serde(default = "default_infect_rate")]
    pub infect_rate: f64,
    #[serde(default = "default_infect_lifespan")]
    pub infect_lifespan: u32,
    #[serde(default = "default_express_delay")]
    pub express_delay: u32,
    #[serde(default = "default_infect_delay")]
    pub infect_delay: u32,
    #[serde(default = "default_division_time")]
    pub division_time: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ImmuneCellConfig {
    #[serde(default = "default_immune_lifespan")]
    pub lifespan: u32,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_base_filename")]
    pub base_filename: String,
    #[serde(default = "default_true")]
    pub save_stats: bool,
    #[serde(default)]
    pub save_csv: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    #[serde(default)]
    pub presentation_enabled: bool,
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,
    /// Timesteps between `info` progress lines. 72 timesteps = 12 hours.
    #[serde(default = "default_record_interval")]
    pub record_interval: u32,
}

// Main simulation configuration structure, loaded from config.toml.
// Every section may be omitted, in which case its defaults apply.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SimulationConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub immune_system: ImmuneSystemConfig,
    #[serde(default)]
    pub epithelial_system: EpithelialSystemConfig,
    #[serde(default)]
    pub focus_system: FocusSystemConfig,
    #[serde(default)]
    pub epithelial_cell: EpithelialCellConfig,
    #[serde(default)]
    pub immune_cell: ImmuneCellConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;

        Ok(config)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let mut config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;

        // A zero percentage would let a single shared location merge any focus.
        if config.focus_system.collisions_for_merge_percentage == 0 {
            config.focus_system.collisions_for_merge_percentage = 1;
        }

        Ok(config)
    }

    /// Rejects out-of-domain values. The simulation core does not re-check them.
    pub fn validate(&self) -> Result<()> {
        if self.world.grid_width == 0 || self.world.grid_height == 0 {
            anyhow::bail!("grid_width and grid_height must be greater than 0.");
        }
        if self.general.number_of_runs == 0 {
            anyhow::bail!("number_of_runs must be greater than 0.");
        }
        check_fraction("epithelial_system.infect_init", self.epithelial_system.infect_init)?;
        check_fraction("immune_system.base_imm_cell", self.immune_system.base_imm_cell)?;
        check_non_negative("epithelial_cell.infect_rate", self.epithelial_cell.infect_rate)?;
        check_non_negative("immune_system.recruitment", self.immune_system.recruitment)?;
        if !(self.immune_system.flow_rate.is_finite() && self.immune_system.flow_rate > 0.0) {
            anyhow::bail!("immune_system.flow_rate must be positive, got {}.", self.immune_system.flow_rate);
        }
        if self.epithelial_cell.division_time == 0 {
            anyhow::bail!("epithelial_cell.division_time must be greater than 0.");
        }
        if self.focus_system.collisions_for_merge_percentage > 100 {
            anyhow::bail!(
                "focus_system.collisions_for_merge_percentage must be <= 100, got {}.",
                self.focus_system.collisions_for_merge_percentage
            );
        }
        if self.output.frame_queue_capacity == 0 {
            anyhow::bail!("output.frame_queue_capacity must be greater than 0.");
        }

        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        SimParams {
            world: WorldParams {
                grid_width: self.world.grid_width,
                grid_height: self.world.grid_height,
                is_toroidal: self.world.is_toroidal,
            },
            epithelial: EpithelialParams {
                lifespan: self.epithelial_cell.lifespan,
                infect_rate: self.epithelial_cell.infect_rate,
                infect_lifespan: self.epithelial_cell.infect_lifespan,
                express_delay: self.epithelial_cell.express_delay,
                infect_delay: self.epithelial_cell.infect_delay,
                division_time: self.epithelial_cell.division_time,
                infect_init_fraction: self.epithelial_system.infect_init,
                regen_enabled: self.epithelial_system.regen_enabled,
                random_age: self.epithelial_system.random_age,
            },
            immune: ImmuneParams {
                enabled: self.immune_system.is_enabled,
                lifespan: self.immune_cell.lifespan,
                base_cell_fraction: self.immune_system.base_imm_cell,
                recruitment_rate: self.immune_system.recruitment,
                recruit_delay: self.immune_system.recruit_delay,
                flow_rate: self.immune_system.flow_rate,
            },
            focus: FocusParams {
                enabled: self.focus_system.is_enabled,
                merge_threshold_percent: self.focus_system.collisions_for_merge_percentage.max(1),
                debug_text_enabled: self.focus_system.debug_text_enabled,
            },
        }
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{} must be within [0, 1], got {}.", name, value);
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value >= 0.0) {
        anyhow::bail!("{} must be a non-negative number, got {}.", name, value);
    }
    Ok(())
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            number_of_runs: default_number_of_runs(),
            run_time: default_run_time(),
            debug_text_enabled: false,
            seed: None,
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            is_toroidal: true,
            grid_width: default_grid_width(),
            grid_height: default_grid_height(),
        }
    }
}

impl Default for ImmuneSystemConfig {
    fn default() -> Self {
        ImmuneSystemConfig {
            is_enabled: true,
            recruit_delay: default_recruit_delay(),
            base_imm_cell: default_base_imm_cell(),
            recruitment: default_recruitment(),
            flow_rate: default_flow_rate(),
        }
    }
}

impl Default for EpithelialSystemConfig {
    fn default() -> Self {
        EpithelialSystemConfig {
            infect_init: default_infect_init(),
            regen_enabled: true,
            random_age: true,
        }
    }
}

impl Default for FocusSystemConfig {
    fn default() -> Self {
        FocusSystemConfig {
            is_enabled: false,
            collisions_for_merge_percentage: default_collisions_for_merge_percentage(),
            debug_text_enabled: false,
        }
    }
}

impl Default for EpithelialCellConfig {
    fn default() -> Self {
        EpithelialCellConfig {
            lifespan: default_epithelial_lifespan(),
            infect_rate: default_infect_rate(),
            infect_lifespan: default_infect_lifespan(),
            express_delay: default_express_delay(),
            infect_delay: default_infect_delay(),
            division_time: default_division_time(),
        }
    }
}

impl Default for ImmuneCellConfig {
    fn default() -> Self {
        ImmuneCellConfig { lifespan: default_immune_lifespan() }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: default_base_filename(),
            save_stats: true,
            save_csv: false,
            format: None,
            presentation_enabled: false,
            frame_queue_capacity: default_frame_queue_capacity(),
            record_interval: default_record_interval(),
        }
    }
}

fn default_true() -> bool { true }
fn default_number_of_runs() -> u32 { 1 }
fn default_run_time() -> u32 { 1440 }
fn default_grid_width() -> u32 { 440 }
fn default_grid_height() -> u32 { 280 }
fn default_recruit_delay() -> u32 { 7 }
fn default_base_imm_cell() -> f64 { 0.00015 }
fn default_recruitment() -> f64 { 0.25 }
fn default_flow_rate() -> f64 { 6.0 }
fn default_infect_init() -> f64 { 0.01 }
fn default_collisions_for_merge_percentage() -> u32 { 10 }
fn default_epithelial_lifespan() -> u32 { 2280 }
fn default_infect_rate() -> f64 { 2.0 }
fn default_infect_lifespan() -> u32 { 144 }
fn default_express_delay() -> u32 { 24 }
fn default_infect_delay() -> u32 { 12 }
fn default_division_time() -> u32 { 72 }
fn default_immune_lifespan() -> u32 { 1008 }
fn default_base_filename() -> String { "influenza_sim".to_string() }
fn default_frame_queue_capacity() -> usize { 4 }
fn default_record_interval() -> u32 { 72 }

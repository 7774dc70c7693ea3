use crate::cells::{EpithelialState, FocusId, ImmuneState};
use crate::epithelial::EpithelialSystem;
use crate::focus::MergeEvent;
use crate::grid::World;
use crate::immune::ImmuneSystem;
use crate::system::CellSystem;
use anyhow::{Context, Result};
use log::{debug, info};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use simulation_common::{SimParams, Snapshot, Vector2D};

/// Read-only view of one immune cell for presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmuneView {
    pub location: Vector2D,
    pub state: ImmuneState,
}

/// Read-only view of one site for presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteView {
    pub location: Vector2D,
    pub state: EpithelialState,
    pub focus_id: Option<FocusId>,
    pub immune_cells: Vec<ImmuneView>,
}

/// Everything a display needs to draw one committed timestep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub run: u32,
    pub time: u32,
    pub grid_width: u32,
    pub grid_height: u32,
    /// Row-major, one entry per site.
    pub sites: Vec<SiteView>,
    pub merges: Vec<MergeEvent>,
}

/// Owns the world and both cell systems for one run and drives the update/synchronise cycle.
pub struct InfluenzaSimulation {
    params: SimParams,
    world: World,
    epithelial: EpithelialSystem,
    immune: ImmuneSystem,
    /// Host-side RNG shared by every system; seeded for reproducible runs.
    rng: StdRng,
    /// Number of completed timesteps.
    current_time_step: u32,
    recorded_snapshots: Vec<Snapshot>,
}

impl InfluenzaSimulation {
    /// Builds the world and initialises the enabled systems. `seed` of `None` draws from the OS.
    pub fn new(params: SimParams, seed: Option<u64>) -> Result<Self> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut world = World::new(params.world);
        let mut epithelial = EpithelialSystem::new(&params);
        let mut immune = ImmuneSystem::new(&params);

        epithelial
            .initialise(&mut world, &mut rng)
            .context("Failed to initialise epithelial system")?;
        if params.immune.enabled {
            immune
                .initialise(&mut world, &mut rng)
                .context("Failed to initialise immune system")?;
        }

        debug!(
            "Simulation initialised: {}x{} grid ({}), {} seeded infections, {} immune cells.",
            params.world.grid_width,
            params.world.grid_height,
            if params.world.is_toroidal { "toroidal" } else { "bounded" },
            epithelial.initial_infected(),
            immune.cells().len()
        );

        Ok(Self {
            params,
            world,
            epithelial,
            immune,
            rng,
            current_time_step: 0,
            recorded_snapshots: Vec::new(),
        })
    }

    /// Advances the simulation by one timestep.
    pub fn step(&mut self) -> Result<()> {
        let immune_enabled = self.params.immune.enabled;

        // --- 1. Update phase: stage next states ---
        self.epithelial
            .update(&mut self.world, &mut self.rng)
            .with_context(|| format!("Epithelial update failed at timestep {}", self.current_time_step))?;
        if immune_enabled {
            self.immune
                .update(&mut self.world, &mut self.rng)
                .with_context(|| format!("Immune update failed at timestep {}", self.current_time_step))?;
        }

        // --- 2. Synchronise phase: commit, same order ---
        self.epithelial
            .synchronise(&mut self.world)
            .with_context(|| format!("Epithelial synchronise failed at timestep {}", self.current_time_step))?;
        if immune_enabled {
            self.immune
                .synchronise(&mut self.world)
                .with_context(|| format!("Immune synchronise failed at timestep {}", self.current_time_step))?;
        }

        self.current_time_step += 1;
        Ok(())
    }

    /// Aggregate counters of the current committed state.
    pub fn snapshot(&self) -> Snapshot {
        let counts = self.epithelial.counts();
        Snapshot {
            time: self.current_time_step,
            healthy: counts.healthy,
            containing: counts.containing,
            expressing: counts.expressing,
            infectious: counts.infectious,
            dead: counts.dead(),
            virgin_immune: self.immune.virgin_count(),
            mature_immune: self.immune.mature_count(),
            avg_foci_area: self.epithelial.avg_foci_area(),
            avg_enabled_focus_cells: self.epithelial.focus_system().map(|f| f.avg_enabled_focus_cells()),
        }
    }

    pub fn record_snapshot(&mut self) -> &Snapshot {
        let snapshot = self.snapshot();
        self.recorded_snapshots.push(snapshot);
        &self.recorded_snapshots[self.recorded_snapshots.len() - 1]
    }

    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }

    /// Builds a presentation frame of the committed state. Does not drain merge events.
    pub fn frame(&self, run: u32) -> Frame {
        let mut sites: Vec<SiteView> = self
            .world
            .sites()
            .iter()
            .map(|site| SiteView {
                location: site.location,
                state: site.epithelial.state,
                focus_id: site.epithelial.focus_id,
                immune_cells: Vec::with_capacity(site.immune_cells.len()),
            })
            .collect();
        for cell in self.immune.cells() {
            let idx = self.world.index_of(cell.location);
            sites[idx].immune_cells.push(ImmuneView { location: cell.location, state: cell.state });
        }

        Frame {
            run,
            time: self.current_time_step,
            grid_width: self.params.world.grid_width,
            grid_height: self.params.world.grid_height,
            sites,
            merges: self
                .epithelial
                .focus_system()
                .map(|f| f.merge_detected().to_vec())
                .unwrap_or_default(),
        }
    }

    /// Takes the merges detected since the last call. Empty when focus tracking is off.
    pub fn drain_merges(&mut self) -> Vec<MergeEvent> {
        self.epithelial
            .focus_system_mut()
            .map(|f| f.drain_merges())
            .unwrap_or_default()
    }

    /// Logs the enabled foci that still hold cells.
    pub fn report_usable_foci(&self, run: u32) {
        if let Some(focus_system) = self.epithelial.focus_system() {
            let usable = focus_system.usable_foci();
            info!("Run {}: remaining usable foci: {:?} count = {}", run, usable, usable.len());
        }
    }

    pub fn current_time_step(&self) -> u32 {
        self.current_time_step
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn epithelial(&self) -> &EpithelialSystem {
        &self.epithelial
    }

    pub fn immune(&self) -> &ImmuneSystem {
        &self.immune
    }
}

use crate::cells::{EpithelialCell, EpithelialState, FocusId};
use crate::grid::World;
use anyhow::{anyhow, Result};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use simulation_common::{FocusParams, Vector2D};
use std::collections::{BTreeMap, BTreeSet};

const MAX_NEIGHBOURS: usize = 8;

/// A contiguous lesion of infection-killed cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Focus {
    pub id: FocusId,
    /// Location of the seed cell the lesion grew from.
    pub origin: Vector2D,
    /// Cells at the boundary of the lesion; candidates for collision checks.
    pub perimeter: Vec<Vector2D>,
    pub cell_count: u32,
    /// Cleared once a merge with another focus has been detected.
    pub is_enabled: bool,
}

impl Focus {
    fn new(id: FocusId, origin: Vector2D) -> Self {
        Self {
            id,
            origin,
            perimeter: Vec::new(),
            cell_count: 0,
            is_enabled: true,
        }
    }
}

/// A detected merge, reported once per focus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeEvent {
    pub focus_id: FocusId,
    /// The foreign focus whose collisions crossed the threshold.
    pub colliding_focus_id: FocusId,
    pub collisions: usize,
    /// Perimeter of the merged focus at detection time.
    pub perimeter: Vec<Vector2D>,
}

/// Tracks foci, grows their perimeters and detects when two lesions merge.
#[derive(Debug, Clone)]
pub struct FocusSystem {
    params: FocusParams,
    foci: BTreeMap<FocusId, Focus>,
    next_id: FocusId,
    merge_detected: Vec<MergeEvent>,
}

impl FocusSystem {
    pub fn new(params: FocusParams) -> Self {
        Self {
            params,
            foci: BTreeMap::new(),
            next_id: 0,
            merge_detected: Vec::new(),
        }
    }

    /// Starts a new focus at `origin` and tags the cell with its id.
    pub fn add_new_focus(&mut self, origin: &mut EpithelialCell) -> FocusId {
        let id = self.next_id;
        self.next_id += 1;
        origin.focus_id = Some(id);
        self.foci.insert(id, Focus::new(id, origin.location));
        id
    }

    /// Registers a cell that just died of infection with the focus it carries.
    pub fn add_cell_to_focus(&mut self, cell: &EpithelialCell) -> Result<()> {
        let id = cell
            .focus_id
            .ok_or_else(|| anyhow!("Cell at ({}, {}) died of infection without a focus id.", cell.location.x, cell.location.y))?;
        let focus = self.focus_mut(id)?;
        focus.perimeter.push(cell.location);
        focus.cell_count += 1;
        Ok(())
    }

    /// Removes the cell at `location` from focus `id` after it regenerated, and picks up the
    /// cells that now border the vacated site.
    pub fn remove_cell_from_focus(&mut self, world: &World, id: FocusId, location: Vector2D) -> Result<()> {
        let focus = self.foci.get_mut(&id).ok_or_else(|| anyhow!("Unknown focus id {}.", id))?;
        if let Some(pos) = focus.perimeter.iter().position(|&loc| loc == location) {
            focus.perimeter.remove(pos);
        }
        focus.cell_count = focus
            .cell_count
            .checked_sub(1)
            .ok_or_else(|| anyhow!("Focus {} cell count underflow.", id))?;

        for neighbour in world.moore_neighbours(location, Some(EpithelialState::InfectionDeath)) {
            if neighbour.focus_id != Some(id) && !focus.perimeter.contains(&neighbour.location) {
                focus.perimeter.push(neighbour.location);
            }
        }
        Ok(())
    }

    /// Per-tick maintenance: prunes interior perimeter cells, then looks for merges.
    pub fn update(&mut self, world: &World) {
        self.prune_perimeters(world);
        self.detect_collisions(world);
    }

    fn prune_perimeters(&mut self, world: &World) {
        for focus in self.foci.values_mut().filter(|f| f.is_enabled) {
            focus.perimeter.retain(|&loc| {
                world.moore_neighbour_state_count(loc, EpithelialState::InfectionDeath) != MAX_NEIGHBOURS
            });
        }
    }

    fn detect_collisions(&mut self, world: &World) {
        let percent = self.params.merge_threshold_percent as f64 / 100.0;

        for focus in self.foci.values_mut().filter(|f| f.is_enabled) {
            let mut collisions: BTreeMap<FocusId, BTreeSet<Vector2D>> = BTreeMap::new();

            for &loc in &focus.perimeter {
                let own_id = world.epithelial(loc).focus_id;
                for neighbour in world.moore_neighbours(loc, Some(EpithelialState::InfectionDeath)) {
                    if neighbour.focus_id == own_id || neighbour.focus_id == Some(focus.id) {
                        continue;
                    }
                    if let Some(foreign_id) = neighbour.focus_id {
                        collisions.entry(foreign_id).or_default().insert(neighbour.location);
                    }
                }
            }

            let threshold = (focus.perimeter.len() as f64 * percent).max(1.0);
            let merged = collisions
                .iter()
                .find(|(_, locations)| locations.len() as f64 > threshold);

            if let Some((&colliding_focus_id, locations)) = merged {
                focus.is_enabled = false;
                if self.params.debug_text_enabled {
                    debug!("Merge detected on Focus #{} (with #{}, {} collisions).", focus.id, colliding_focus_id, locations.len());
                } else {
                    trace!("Merge detected on Focus #{}.", focus.id);
                }
                self.merge_detected.push(MergeEvent {
                    focus_id: focus.id,
                    colliding_focus_id,
                    collisions: locations.len(),
                    perimeter: focus.perimeter.clone(),
                });
            }
        }
    }

    fn focus_mut(&mut self, id: FocusId) -> Result<&mut Focus> {
        self.foci.get_mut(&id).ok_or_else(|| anyhow!("Unknown focus id {}.", id))
    }

    pub fn focus(&self, id: FocusId) -> Option<&Focus> {
        self.foci.get(&id)
    }

    /// All foci ever created, including disabled ones, ordered by id.
    pub fn foci(&self) -> impl Iterator<Item = &Focus> {
        self.foci.values()
    }

    /// Merges detected since the last drain.
    pub fn merge_detected(&self) -> &[MergeEvent] {
        &self.merge_detected
    }

    pub fn drain_merges(&mut self) -> Vec<MergeEvent> {
        std::mem::take(&mut self.merge_detected)
    }

    /// Mean cell count of enabled, non-empty foci; 0 when there are none.
    pub fn avg_enabled_focus_cells(&self) -> f64 {
        let (total, count) = self
            .foci
            .values()
            .filter(|f| f.is_enabled && f.cell_count > 0)
            .fold((0u64, 0u32), |(total, count), f| (total + f.cell_count as u64, count + 1));
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Ids of enabled foci that still contain cells.
    pub fn usable_foci(&self) -> Vec<FocusId> {
        self.foci
            .values()
            .filter(|f| f.is_enabled && f.cell_count > 0)
            .map(|f| f.id)
            .collect()
    }
}

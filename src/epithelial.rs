use crate::cells::{EpithelialCell, EpithelialState};
use crate::focus::FocusSystem;
use crate::grid::World;
use crate::system::{roll, CellSystem};
use anyhow::{anyhow, Result};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use simulation_common::{EpithelialParams, SimParams, Vector2D};

const MAX_NEIGHBOURS: f64 = 8.0;

/// Population counters, one per epithelial state. They always sum to the grid area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpithelialCounts {
    pub healthy: u32,
    pub containing: u32,
    pub expressing: u32,
    pub infectious: u32,
    pub infection_death: u32,
    pub natural_death: u32,
}

impl EpithelialCounts {
    pub fn get(&self, state: EpithelialState) -> u32 {
        match state {
            EpithelialState::Healthy => self.healthy,
            EpithelialState::Containing => self.containing,
            EpithelialState::Expressing => self.expressing,
            EpithelialState::Infectious => self.infectious,
            EpithelialState::InfectionDeath => self.infection_death,
            EpithelialState::NaturalDeath => self.natural_death,
        }
    }

    fn slot_mut(&mut self, state: EpithelialState) -> &mut u32 {
        match state {
            EpithelialState::Healthy => &mut self.healthy,
            EpithelialState::Containing => &mut self.containing,
            EpithelialState::Expressing => &mut self.expressing,
            EpithelialState::Infectious => &mut self.infectious,
            EpithelialState::InfectionDeath => &mut self.infection_death,
            EpithelialState::NaturalDeath => &mut self.natural_death,
        }
    }

    /// Moves one cell from `from` to `to`.
    fn transfer(&mut self, from: EpithelialState, to: EpithelialState) -> Result<()> {
        let slot = self.slot_mut(from);
        *slot = slot
            .checked_sub(1)
            .ok_or_else(|| anyhow!("Population counter for {:?} underflowed.", from))?;
        *self.slot_mut(to) += 1;
        Ok(())
    }

    pub fn dead(&self) -> u32 {
        self.natural_death + self.infection_death
    }

    pub fn total(&self) -> u32 {
        EpithelialState::ALL.iter().map(|&s| self.get(s)).sum()
    }
}

// Focus bookkeeping deferred until every cell has committed.
enum FocusChange {
    Add(Vector2D),
    Remove(u32, Vector2D),
}

/// Updates and commits every epithelial cell: aging, regeneration, infection progression and spread.
#[derive(Debug, Clone)]
pub struct EpithelialSystem {
    params: EpithelialParams,
    /// Infection chance per healthy neighbour and tick: `(1/8) * (infect_rate / flow_rate)`.
    infect_chance: f64,
    initial_infected: u32,
    counts: EpithelialCounts,
    avg_foci_area: f64,
    focus_system: Option<FocusSystem>,
}

impl EpithelialSystem {
    pub fn new(params: &SimParams) -> Self {
        let infect_chance = (1.0 / MAX_NEIGHBOURS) * (params.epithelial.infect_rate / params.immune.flow_rate);
        Self {
            params: params.epithelial,
            infect_chance,
            initial_infected: params.initial_infected(),
            counts: EpithelialCounts::default(),
            avg_foci_area: 0.0,
            focus_system: params.focus.enabled.then(|| FocusSystem::new(params.focus)),
        }
    }

    pub fn counts(&self) -> &EpithelialCounts {
        &self.counts
    }

    pub fn initial_infected(&self) -> u32 {
        self.initial_infected
    }

    /// Infection deaths per seeded infection.
    pub fn avg_foci_area(&self) -> f64 {
        self.avg_foci_area
    }

    pub fn focus_system(&self) -> Option<&FocusSystem> {
        self.focus_system.as_ref()
    }

    pub fn focus_system_mut(&mut self) -> Option<&mut FocusSystem> {
        self.focus_system.as_mut()
    }

    /// Returns true if the rest of the update can be skipped.
    fn update_age(&self, cell: &mut EpithelialCell) -> bool {
        cell.age += 1;
        if cell.age >= self.params.lifespan {
            cell.stage(EpithelialState::NaturalDeath);
            return true;
        }
        false
    }

    /// Returns true if the rest of the update can be skipped.
    fn update_regeneration(&self, cell: &mut EpithelialCell, rng: &mut StdRng) -> bool {
        if !self.params.regen_enabled {
            return true;
        }

        let deaths = self.counts.dead();
        let chance = if deaths == 0 {
            1.0
        } else {
            self.counts.healthy as f64 / deaths as f64 / self.params.division_time as f64
        };

        if roll(rng, chance) {
            cell.stage(EpithelialState::Healthy);
            false
        } else {
            cell.stage_unchanged();
            true
        }
    }

    /// Returns true if the rest of the update can be skipped.
    fn update_infection_time(&self, cell: &mut EpithelialCell) -> bool {
        cell.time_infected += 1;
        if cell.time_infected >= self.params.infect_lifespan {
            cell.stage(EpithelialState::InfectionDeath);
            return true;
        }
        false
    }

    fn update_infection_severity(&self, cell: &mut EpithelialCell) {
        if cell.state != EpithelialState::Infectious {
            cell.delay += 1;
        }

        match cell.state {
            EpithelialState::Containing if cell.delay >= self.params.express_delay => {
                cell.stage(EpithelialState::Expressing)
            }
            EpithelialState::Expressing if cell.delay >= self.params.infect_delay => {
                cell.stage(EpithelialState::Infectious)
            }
            _ => cell.stage_unchanged(),
        }
    }

    /// Rolls an infection against every healthy neighbour of the infectious cell at `location`.
    fn attempt_infect(&self, world: &mut World, location: Vector2D, rng: &mut StdRng) {
        let focus_id = world.epithelial(location).focus_id;
        let targets: Vec<Vector2D> = world
            .moore_neighbours(location, Some(EpithelialState::Healthy))
            .into_iter()
            .map(|cell| cell.location)
            .collect();

        for target in targets {
            let neighbour = world.epithelial_mut(target);
            // Re-checked per draw: a neighbour may already have been claimed this tick.
            if neighbour.can_infect && roll(rng, self.infect_chance) {
                neighbour.stage(EpithelialState::Containing);
                neighbour.can_infect = false;
                neighbour.focus_id = focus_id;
            }
        }
    }
}

impl CellSystem for EpithelialSystem {
    /// Ages the grid's cells and seeds the initial infections.
    fn initialise(&mut self, world: &mut World, rng: &mut StdRng) -> Result<()> {
        let area = world.area();
        if self.params.random_age {
            let lifespan = self.params.lifespan;
            for cell in world.epithelial_cells_mut() {
                cell.age = rng.random_range(0..=lifespan);
            }
        }

        let seeds = (self.initial_infected as usize).min(area);
        if seeds == 0 {
            anyhow::bail!("Cannot seed an infection on an empty grid.");
        }
        let width = world.width();
        for idx in rand::seq::index::sample(rng, area, seeds).iter() {
            let location = Vector2D::new((idx % width as usize) as i32, (idx / width as usize) as i32);
            let cell = world.epithelial_mut(location);
            cell.state = EpithelialState::Containing;
            cell.next_state = EpithelialState::Containing;
            if let Some(focus_system) = self.focus_system.as_mut() {
                focus_system.add_new_focus(cell);
            }
        }

        self.initial_infected = seeds as u32;
        self.counts = EpithelialCounts {
            healthy: (area - seeds) as u32,
            containing: seeds as u32,
            ..EpithelialCounts::default()
        };
        debug!("Epithelial system initialised: {} cells, {} seeded infections.", area, seeds);
        Ok(())
    }

    fn update(&mut self, world: &mut World, rng: &mut StdRng) -> Result<()> {
        let width = world.width();
        let height = world.height();

        for y in 0..height {
            for x in 0..width {
                let location = Vector2D::new(x, y);
                let cell = world.epithelial_mut(location);

                // Age death step, or regeneration for the dead
                if !cell.state.is_dead() {
                    if self.update_age(cell) {
                        continue;
                    }
                } else if self.update_regeneration(cell, rng) {
                    continue;
                }

                // Infection progression step
                if cell.state.is_infected() {
                    if self.update_infection_time(cell) {
                        continue;
                    }
                    self.update_infection_severity(cell);

                    if cell.state == EpithelialState::Infectious {
                        self.attempt_infect(world, location, rng);
                    }
                }
            }
        }
        Ok(())
    }

    fn synchronise(&mut self, world: &mut World) -> Result<()> {
        let tracking = self.focus_system.is_some();
        let mut focus_changes = Vec::new();

        for cell in world.epithelial_cells_mut() {
            let released = cell.released_focus.take();
            if cell.state != cell.next_state {
                self.counts.transfer(cell.state, cell.next_state)?;

                match cell.next_state {
                    // Only cells that died of infection were ever counted in a focus.
                    EpithelialState::Healthy if cell.state == EpithelialState::InfectionDeath => {
                        if let (true, Some(id)) = (tracking, released) {
                            focus_changes.push(FocusChange::Remove(id, cell.location));
                        }
                    }
                    EpithelialState::InfectionDeath if tracking => {
                        focus_changes.push(FocusChange::Add(cell.location));
                    }
                    _ => {}
                }
            }
            cell.state = cell.next_state;
        }

        if self.initial_infected == 0 {
            anyhow::bail!("Initial infected count must be positive before computing the average focus area.");
        }
        self.avg_foci_area = self.counts.infection_death as f64 / self.initial_infected as f64;

        if let Some(focus_system) = self.focus_system.as_mut() {
            for change in focus_changes {
                match change {
                    FocusChange::Add(location) => focus_system.add_cell_to_focus(world.epithelial(location))?,
                    FocusChange::Remove(id, location) => focus_system.remove_cell_from_focus(world, id, location)?,
                }
            }
            focus_system.update(world);
        }

        trace!(
            "Epithelial counts: H {} C {} E {} I {} ID {} ND {}",
            self.counts.healthy,
            self.counts.containing,
            self.counts.expressing,
            self.counts.infectious,
            self.counts.infection_death,
            self.counts.natural_death
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::params;
    use rand::SeedableRng;

    fn setup(p: &SimParams, seed: u64) -> (World, EpithelialSystem, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut world = World::new(p.world);
        let mut system = EpithelialSystem::new(p);
        system.initialise(&mut world, &mut rng).unwrap();
        (world, system, rng)
    }

    fn tick(world: &mut World, system: &mut EpithelialSystem, rng: &mut StdRng) {
        system.update(world, rng).unwrap();
        system.synchronise(world).unwrap();
    }

    fn seed_location(world: &World) -> Vector2D {
        world
            .epithelial_cells()
            .find(|c| c.state == EpithelialState::Containing)
            .map(|c| c.location)
            .unwrap()
    }

    fn assert_counts_match(world: &World, system: &EpithelialSystem) {
        for state in EpithelialState::ALL {
            let actual = world.epithelial_cells().filter(|c| c.state == state).count() as u32;
            assert_eq!(system.counts().get(state), actual, "counter for {:?}", state);
        }
        assert_eq!(system.counts().total() as usize, world.area());
    }

    #[test]
    fn initialise_seeds_distinct_containing_cells() {
        let mut p = params(10, 10);
        p.epithelial.infect_init_fraction = 0.05;
        p.focus.enabled = true;
        let (world, system, _) = setup(&p, 1);

        let seeds: Vec<_> = world.epithelial_cells().filter(|c| c.state == EpithelialState::Containing).collect();
        assert_eq!(seeds.len(), 5);
        assert_eq!(system.counts().containing, 5);
        assert_eq!(system.counts().healthy, 95);
        let mut ids: Vec<_> = seeds.iter().map(|c| c.focus_id.unwrap()).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(world.epithelial_cells().all(|c| c.age <= p.epithelial.lifespan));
    }

    #[test]
    fn zero_fraction_still_seeds_one_cell() {
        let p = params(3, 3);
        let (_, system, _) = setup(&p, 2);
        assert_eq!(system.counts().containing, 1);
        assert_eq!(system.initial_infected(), 1);
    }

    #[test]
    fn seed_progresses_through_infection_stages() {
        let mut p = params(3, 3);
        p.epithelial.express_delay = 2;
        p.epithelial.infect_delay = 2;
        p.epithelial.infect_lifespan = 100;
        let (mut world, mut system, mut rng) = setup(&p, 3);
        let seed = seed_location(&world);

        let mut states = Vec::new();
        for _ in 0..4 {
            tick(&mut world, &mut system, &mut rng);
            states.push(world.epithelial(seed).state);
        }
        assert_eq!(
            states,
            vec![
                EpithelialState::Containing,
                EpithelialState::Expressing,
                EpithelialState::Expressing,
                EpithelialState::Infectious,
            ]
        );
        // Zero infect rate: nobody else is ever infected.
        tick(&mut world, &mut system, &mut rng);
        assert_eq!(system.counts().healthy, 8);
        assert_eq!(system.counts().infectious, 1);
    }

    #[test]
    fn certain_infection_spreads_to_every_neighbour_with_focus() {
        let mut p = params(3, 3);
        p.epithelial.express_delay = 1;
        p.epithelial.infect_delay = 1;
        // (1/8) * (48 / 6) = 1
        p.epithelial.infect_rate = 48.0;
        p.focus.enabled = true;
        let (mut world, mut system, mut rng) = setup(&p, 4);
        let seed = seed_location(&world);

        tick(&mut world, &mut system, &mut rng);
        tick(&mut world, &mut system, &mut rng);
        assert_eq!(world.epithelial(seed).state, EpithelialState::Infectious);
        assert_eq!(system.counts().healthy, 8);

        tick(&mut world, &mut system, &mut rng);
        assert_eq!(system.counts().containing, 8);
        for cell in world.epithelial_cells().filter(|c| c.location != seed) {
            assert_eq!(cell.state, EpithelialState::Containing);
            assert!(!cell.can_infect);
            assert_eq!(cell.focus_id, Some(0));
        }
        assert_counts_match(&world, &system);
    }

    #[test]
    fn infection_death_then_regeneration_fully_resets_cell() {
        let mut p = params(3, 3);
        p.epithelial.infect_lifespan = 2;
        p.epithelial.regen_enabled = true;
        p.epithelial.division_time = 1;
        p.focus.enabled = true;
        let (mut world, mut system, mut rng) = setup(&p, 5);
        let seed = seed_location(&world);

        tick(&mut world, &mut system, &mut rng);
        tick(&mut world, &mut system, &mut rng);
        assert_eq!(world.epithelial(seed).state, EpithelialState::InfectionDeath);
        assert_eq!(system.counts().infection_death, 1);
        assert_eq!(system.avg_foci_area(), 1.0);
        let focus = system.focus_system().unwrap().focus(0).unwrap();
        assert_eq!(focus.cell_count, 1);
        assert_eq!(focus.perimeter, vec![seed]);

        // 8 healthy / 1 dead / division time 1: regeneration is certain.
        tick(&mut world, &mut system, &mut rng);
        let cell = world.epithelial(seed);
        assert_eq!(cell.state, EpithelialState::Healthy);
        assert!(cell.can_infect);
        assert_eq!(cell.focus_id, None);
        assert_eq!((cell.age, cell.delay, cell.time_infected), (0, 0, 0));
        let focus = system.focus_system().unwrap().focus(0).unwrap();
        assert_eq!(focus.cell_count, 0);
        assert!(focus.perimeter.is_empty());
        assert_counts_match(&world, &system);
    }

    #[test]
    fn dead_cells_stay_dead_without_regeneration() {
        let mut p = params(3, 3);
        p.epithelial.lifespan = 3;
        let (mut world, mut system, mut rng) = setup(&p, 6);

        for _ in 0..3 {
            tick(&mut world, &mut system, &mut rng);
        }
        assert_eq!(system.counts().natural_death, 9);
        for _ in 0..10 {
            tick(&mut world, &mut system, &mut rng);
        }
        assert_eq!(system.counts().natural_death, 9);
        assert!(world.epithelial_cells().all(|c| c.age == 0));
    }

    #[test]
    fn failed_regeneration_leaves_dead_cells_unchanged() {
        let mut p = params(3, 3);
        p.epithelial.lifespan = 100;
        p.epithelial.regen_enabled = true;
        p.epithelial.division_time = 1_000_000;
        let (mut world, mut system, mut rng) = setup(&p, 8);
        let survivor = world
            .epithelial_cells()
            .find(|c| c.state == EpithelialState::Healthy)
            .map(|c| c.location)
            .unwrap();
        for cell in world.epithelial_cells_mut().filter(|c| c.location != survivor) {
            cell.age = 99;
        }

        tick(&mut world, &mut system, &mut rng);
        assert_eq!(system.counts().natural_death, 8);
        assert_eq!(system.counts().healthy, 1);

        // 1 healthy / 8 dead / 1_000_000: every regeneration draw fails.
        for _ in 0..10 {
            system.update(&mut world, &mut rng).unwrap();
            for cell in world.epithelial_cells().filter(|c| c.location != survivor) {
                assert_eq!(cell.state, EpithelialState::NaturalDeath);
                assert_eq!(cell.next_state, cell.state);
                assert_eq!(cell.age, 0);
            }
            system.synchronise(&mut world).unwrap();
            assert_eq!(system.counts().natural_death, 8);
            assert_counts_match(&world, &system);
        }
        assert_eq!(world.epithelial(survivor).age, 11);
    }

    #[test]
    fn counters_always_sum_to_grid_area() {
        let mut p = params(12, 9);
        p.world.is_toroidal = false;
        p.epithelial.infect_init_fraction = 0.05;
        p.epithelial.lifespan = 40;
        p.epithelial.random_age = true;
        p.epithelial.express_delay = 2;
        p.epithelial.infect_delay = 2;
        p.epithelial.infect_lifespan = 8;
        p.epithelial.infect_rate = 20.0;
        p.epithelial.regen_enabled = true;
        p.epithelial.division_time = 3;
        p.focus.enabled = true;
        let (mut world, mut system, mut rng) = setup(&p, 7);

        for _ in 0..60 {
            tick(&mut world, &mut system, &mut rng);
            assert_counts_match(&world, &system);
            assert!(world.epithelial_cells().all(|c| c.state == c.next_state));
        }
    }
}

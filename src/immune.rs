use crate::cells::{EpithelialState, ImmuneCell, ImmuneCellId, ImmuneState};
use crate::grid::World;
use crate::system::CellSystem;
use anyhow::{anyhow, Result};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::Rng;
use simulation_common::{ImmuneParams, SimParams, Vector2D, MOORE_OFFSETS};

/// Moves the innate immune cells, clears infected tissue they run into, recruits reinforcements
/// and keeps the virgin population at its baseline density.
#[derive(Debug, Clone)]
pub struct ImmuneSystem {
    params: ImmuneParams,
    /// Virgin density maintained by the maintenance phase.
    base_cells: u32,
    cells: Vec<ImmuneCell>,
    next_id: ImmuneCellId,
    virgin_count: u32,
    mature_count: u32,
    /// Ticks waited by each pending recruitment.
    recruitment_times: Vec<u32>,
    current_recruitment: f64,
}

impl ImmuneSystem {
    pub fn new(params: &SimParams) -> Self {
        Self {
            params: params.immune,
            base_cells: params.base_immune_cells(),
            cells: Vec::new(),
            next_id: 0,
            virgin_count: 0,
            mature_count: 0,
            recruitment_times: Vec::new(),
            current_recruitment: 0.0,
        }
    }

    pub fn cells(&self) -> &[ImmuneCell] {
        &self.cells
    }

    pub fn virgin_count(&self) -> u32 {
        self.virgin_count
    }

    pub fn mature_count(&self) -> u32 {
        self.mature_count
    }

    pub fn base_cells(&self) -> u32 {
        self.base_cells
    }

    pub fn pending_recruitments(&self) -> usize {
        self.recruitment_times.len()
    }

    /// Creates a cell at a uniformly random site and registers it there.
    fn spawn(&mut self, world: &mut World, rng: &mut StdRng) -> &mut ImmuneCell {
        let location = Vector2D::new(rng.random_range(0..world.width()), rng.random_range(0..world.height()));
        let id = self.next_id;
        self.next_id += 1;
        world.site_mut(location).immune_cells.push(id);
        self.cells.push(ImmuneCell::new(id, location));
        let last = self.cells.len() - 1;
        &mut self.cells[last]
    }

    fn update_recruitment(&mut self, world: &mut World, rng: &mut StdRng) {
        let mut i = self.recruitment_times.len();
        while i > 0 {
            i -= 1;
            self.recruitment_times[i] += 1;
            if self.recruitment_times[i] < self.params.recruit_delay {
                continue;
            }
            self.recruitment_times.remove(i);
            self.current_recruitment += self.params.recruitment_rate;

            while self.current_recruitment >= 1.0 {
                self.current_recruitment -= 1.0;
                let cell = self.spawn(world, rng);
                cell.stage(ImmuneState::Mature);
                trace!("Recruited mature immune cell {} at ({}, {}).", cell.id, cell.location.x, cell.location.y);
                self.mature_count += 1;
            }
        }
    }

    fn update_maintenance(&mut self, world: &mut World, rng: &mut StdRng) {
        while self.virgin_count < self.base_cells {
            self.spawn(world, rng);
            self.virgin_count += 1;
        }
    }
}

fn decrement(counter: &mut u32, name: &str) -> Result<()> {
    *counter = counter
        .checked_sub(1)
        .ok_or_else(|| anyhow!("{} immune cell counter underflowed.", name))?;
    Ok(())
}

impl CellSystem for ImmuneSystem {
    /// Spawns the baseline virgin population with ages spread over the whole lifespan.
    fn initialise(&mut self, world: &mut World, rng: &mut StdRng) -> Result<()> {
        let lifespan = self.params.lifespan;
        for _ in 0..self.base_cells {
            let age = rng.random_range(0..=lifespan);
            self.spawn(world, rng).age = age;
            self.virgin_count += 1;
        }
        debug!("Immune system initialised with {} virgin cells.", self.virgin_count);
        Ok(())
    }

    fn update(&mut self, world: &mut World, rng: &mut StdRng) -> Result<()> {
        for cell in self.cells.iter_mut() {
            // Age step
            cell.age += 1;
            if cell.age >= self.params.lifespan {
                cell.stage(ImmuneState::Dead);
                match cell.state {
                    ImmuneState::Virgin => decrement(&mut self.virgin_count, "Virgin")?,
                    _ => decrement(&mut self.mature_count, "Mature")?,
                }
                continue;
            }

            // Movement step
            if !world.site_mut(cell.location).remove_immune(cell.id) {
                anyhow::bail!(
                    "Immune cell {} is not registered at its site ({}, {}).",
                    cell.id,
                    cell.location.x,
                    cell.location.y
                );
            }
            let (dx, dy) = MOORE_OFFSETS[rng.random_range(0..MOORE_OFFSETS.len())];
            cell.location = world.step_location(cell.location, dx, dy);
            let site = world.site_mut(cell.location);
            site.immune_cells.push(cell.id);

            // Encounter step
            if site.epithelial.state.is_recognisable() {
                if cell.state == ImmuneState::Virgin {
                    cell.stage(ImmuneState::Mature);
                    decrement(&mut self.virgin_count, "Virgin")?;
                    self.mature_count += 1;
                }
                site.epithelial.stage(EpithelialState::NaturalDeath);
                self.recruitment_times.push(0);
            }
        }

        // Recruitment phase
        self.update_recruitment(world, rng);

        // Maintenance phase
        self.update_maintenance(world, rng);
        Ok(())
    }

    fn synchronise(&mut self, world: &mut World) -> Result<()> {
        let mut i = self.cells.len();
        while i > 0 {
            i -= 1;
            if self.cells[i].next_state == ImmuneState::Dead {
                let cell = self.cells.remove(i);
                if !world.site_mut(cell.location).remove_immune(cell.id) {
                    anyhow::bail!("Dead immune cell {} missing from its site.", cell.id);
                }
            } else {
                let cell = &mut self.cells[i];
                cell.state = cell.next_state;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::params;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn setup(p: &SimParams, seed: u64) -> (World, ImmuneSystem, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut world = World::new(p.world);
        let mut system = ImmuneSystem::new(p);
        system.initialise(&mut world, &mut rng).unwrap();
        (world, system, rng)
    }

    /// Same as `setup` but with every cell newborn, so nobody dies of old age mid-test.
    fn setup_young(p: &SimParams, seed: u64) -> (World, ImmuneSystem, StdRng) {
        let (world, mut system, rng) = setup(p, seed);
        for cell in system.cells.iter_mut() {
            cell.age = 0;
        }
        (world, system, rng)
    }

    fn tick(world: &mut World, system: &mut ImmuneSystem, rng: &mut StdRng) {
        system.update(world, rng).unwrap();
        system.synchronise(world).unwrap();
    }

    fn set_all_epithelial(world: &mut World, state: EpithelialState) {
        for cell in world.epithelial_cells_mut() {
            cell.state = state;
            cell.next_state = state;
        }
    }

    /// Every live cell is listed at exactly its own site, and no site lists anything else.
    fn assert_registered(world: &World, system: &ImmuneSystem) {
        let listed: usize = world.sites().iter().map(|s| s.immune_cells.len()).sum();
        assert_eq!(listed, system.cells().len());
        for cell in system.cells() {
            let site = world.site(cell.location);
            assert_eq!(site.immune_cells.iter().filter(|&&id| id == cell.id).count(), 1);
        }
    }

    #[test]
    fn initialise_spawns_baseline_virgins() {
        let mut p = params(20, 20);
        p.immune.base_cell_fraction = 0.05;
        let (world, system, _) = setup(&p, 11);
        assert_eq!(system.base_cells(), 20);
        assert_eq!(system.cells().len(), 20);
        assert_eq!(system.virgin_count(), 20);
        assert!(system.cells().iter().all(|c| c.state == ImmuneState::Virgin && c.age <= p.immune.lifespan));
        assert_registered(&world, &system);
    }

    #[test]
    fn tiny_fraction_keeps_at_least_one_cell() {
        let (_, system, _) = setup(&params(3, 3), 12);
        assert_eq!(system.cells().len(), 1);
    }

    #[test]
    fn cells_step_to_an_adjacent_site() {
        let mut p = params(5, 5);
        p.world.is_toroidal = false;
        p.immune.base_cell_fraction = 0.4;
        let (mut world, mut system, mut rng) = setup(&p, 13);

        for _ in 0..20 {
            let before: HashMap<_, _> = system.cells().iter().map(|c| (c.id, c.location)).collect();
            tick(&mut world, &mut system, &mut rng);
            for cell in system.cells() {
                if let Some(prev) = before.get(&cell.id) {
                    assert!((cell.location.x - prev.x).abs() <= 1 && (cell.location.y - prev.y).abs() <= 1);
                }
                assert!(world.contains(cell.location));
            }
            assert_registered(&world, &system);
        }
    }

    #[test]
    fn age_increases_until_death_and_dead_cells_are_removed() {
        let mut p = params(6, 6);
        p.immune.lifespan = 5;
        p.immune.base_cell_fraction = 0.25;
        let (mut world, mut system, mut rng) = setup(&p, 14);

        for _ in 0..15 {
            let before: HashMap<_, _> = system.cells().iter().map(|c| (c.id, c.age)).collect();
            tick(&mut world, &mut system, &mut rng);
            for cell in system.cells() {
                if let Some(&age) = before.get(&cell.id) {
                    assert_eq!(cell.age, age + 1);
                }
                assert!(cell.age < p.immune.lifespan);
                assert_ne!(cell.state, ImmuneState::Dead);
            }
            // Survivors plus maintenance backfill keep the virgin baseline.
            assert_eq!(system.virgin_count(), system.base_cells());
            assert_registered(&world, &system);
        }
    }

    #[test]
    fn encounter_matures_cell_and_clears_epithelium() {
        let p = params(3, 3);
        let (mut world, mut system, mut rng) = setup_young(&p, 15);
        set_all_epithelial(&mut world, EpithelialState::Infectious);

        system.update(&mut world, &mut rng).unwrap();
        let cell = &system.cells()[0];
        assert_eq!(cell.next_state, ImmuneState::Mature);
        assert_eq!(world.epithelial(cell.location).next_state, EpithelialState::NaturalDeath);
        // Still infectious until the epithelial system synchronises.
        assert_eq!(world.epithelial(cell.location).state, EpithelialState::Infectious);
        system.synchronise(&mut world).unwrap();
        assert_eq!(system.cells()[0].state, ImmuneState::Mature);
    }

    #[test]
    fn healthy_tissue_leaves_cells_virgin() {
        let p = params(4, 4);
        let (mut world, mut system, mut rng) = setup(&p, 16);
        for _ in 0..10 {
            tick(&mut world, &mut system, &mut rng);
        }
        assert_eq!(system.mature_count(), 0);
        assert_eq!(system.pending_recruitments(), 0);
        assert!(world.epithelial_cells().all(|c| c.next_state == EpithelialState::Healthy));
    }

    #[test]
    fn one_encounter_recruits_one_mature_cell_after_the_delay() {
        let mut p = params(3, 3);
        p.immune.recruit_delay = 1;
        p.immune.recruitment_rate = 1.0;
        let (mut world, mut system, mut rng) = setup_young(&p, 17);
        set_all_epithelial(&mut world, EpithelialState::Infectious);
        let first = system.cells()[0].id;

        tick(&mut world, &mut system, &mut rng);
        let mature: Vec<_> = system.cells().iter().filter(|c| c.state == ImmuneState::Mature).collect();
        assert_eq!(mature.len(), 2);
        assert!(mature.iter().any(|c| c.id == first));
        assert_eq!(system.mature_count(), 2);
        // The matured first cell is backfilled by a fresh virgin.
        assert_eq!(system.virgin_count(), 1);
        assert_eq!(system.cells().len(), 3);
        assert_eq!(system.pending_recruitments(), 0);
        assert_registered(&world, &system);
    }

    #[test]
    fn recruitment_waits_for_the_delay() {
        let mut p = params(3, 3);
        p.immune.recruit_delay = 2;
        p.immune.recruitment_rate = 1.0;
        let (mut world, mut system, mut rng) = setup_young(&p, 18);
        set_all_epithelial(&mut world, EpithelialState::Infectious);

        tick(&mut world, &mut system, &mut rng);
        assert_eq!(system.pending_recruitments(), 1);
        assert_eq!(system.mature_count(), 1);

        set_all_epithelial(&mut world, EpithelialState::Healthy);
        tick(&mut world, &mut system, &mut rng);
        assert_eq!(system.pending_recruitments(), 0);
        assert_eq!(system.mature_count(), 2);
    }

    #[test]
    fn fractional_recruitment_accumulates() {
        let mut p = params(3, 3);
        p.immune.recruit_delay = 1;
        p.immune.recruitment_rate = 0.5;
        let (mut world, mut system, mut rng) = setup_young(&p, 19);
        set_all_epithelial(&mut world, EpithelialState::Infectious);

        tick(&mut world, &mut system, &mut rng);
        // Half a recruit is banked; nothing spawned yet.
        assert_eq!(system.mature_count(), 1);
        assert_eq!(system.cells().len(), 2);
    }
}

use crate::cells::{EpithelialCell, EpithelialState, ImmuneCellId};
use simulation_common::{clamp, wrap, Vector2D, WorldParams, MOORE_OFFSETS};

/// One (x, y) location of the worldspace.
#[derive(Debug, Clone)]
pub struct Site {
    pub location: Vector2D,
    pub epithelial: EpithelialCell,
    /// Immune cells currently at this site, by id. The immune system owns the cells themselves.
    pub immune_cells: Vec<ImmuneCellId>,
}

impl Site {
    pub fn new(location: Vector2D) -> Self {
        Self {
            location,
            epithelial: EpithelialCell::new(location),
            immune_cells: Vec::new(),
        }
    }

    /// Removes `id` from this site. Returns false if it was not here.
    pub fn remove_immune(&mut self, id: ImmuneCellId) -> bool {
        match self.immune_cells.iter().position(|&other| other == id) {
            Some(pos) => {
                self.immune_cells.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// The 2D array of sites, stored row-major (`y * width + x`).
#[derive(Debug, Clone)]
pub struct World {
    params: WorldParams,
    sites: Vec<Site>,
}

impl World {
    /// Creates a grid with a fresh HEALTHY epithelial cell at every site.
    pub fn new(params: WorldParams) -> Self {
        let width = params.grid_width as i32;
        let height = params.grid_height as i32;
        let sites = (0..height)
            .flat_map(|y| (0..width).map(move |x| Site::new(Vector2D::new(x, y))))
            .collect();
        Self { params, sites }
    }

    pub fn width(&self) -> i32 {
        self.params.grid_width as i32
    }

    pub fn height(&self) -> i32 {
        self.params.grid_height as i32
    }

    pub fn area(&self) -> usize {
        self.sites.len()
    }

    pub fn contains(&self, location: Vector2D) -> bool {
        location.x >= 0 && location.x < self.width() && location.y >= 0 && location.y < self.height()
    }

    // Callers must pass an in-range location.
    #[inline(always)]
    pub fn index_of(&self, location: Vector2D) -> usize {
        location.y as usize * self.params.grid_width as usize + location.x as usize
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn site(&self, location: Vector2D) -> &Site {
        &self.sites[self.index_of(location)]
    }

    pub fn site_mut(&mut self, location: Vector2D) -> &mut Site {
        let idx = self.index_of(location);
        &mut self.sites[idx]
    }

    pub fn epithelial(&self, location: Vector2D) -> &EpithelialCell {
        &self.site(location).epithelial
    }

    pub fn epithelial_mut(&mut self, location: Vector2D) -> &mut EpithelialCell {
        &mut self.site_mut(location).epithelial
    }

    pub fn epithelial_cells(&self) -> impl Iterator<Item = &EpithelialCell> {
        self.sites.iter().map(|site| &site.epithelial)
    }

    pub fn epithelial_cells_mut(&mut self) -> impl Iterator<Item = &mut EpithelialCell> {
        self.sites.iter_mut().map(|site| &mut site.epithelial)
    }

    /// Resolves the neighbour of `location` at offset (dx, dy) under the configured boundary mode.
    /// Returns `None` when a bounded grid has no site there.
    #[inline(always)]
    pub fn neighbour_location(&self, location: Vector2D, dx: i32, dy: i32) -> Option<Vector2D> {
        let target = location.offset(dx, dy);
        if self.params.is_toroidal {
            Some(Vector2D::new(wrap(target.x, self.width()), wrap(target.y, self.height())))
        } else if self.contains(target) {
            Some(target)
        } else {
            None
        }
    }

    /// Moves `location` by (dx, dy): wraps on a toroidal grid, and on a bounded grid drops
    /// the component of the step that would leave the grid.
    pub fn step_location(&self, location: Vector2D, dx: i32, dy: i32) -> Vector2D {
        if self.params.is_toroidal {
            let target = location.offset(dx, dy);
            Vector2D::new(wrap(target.x, self.width()), wrap(target.y, self.height()))
        } else {
            let x = location.x + dx;
            let y = location.y + dy;
            Vector2D::new(
                if x == clamp(x, 0, self.width() - 1) { x } else { location.x },
                if y == clamp(y, 0, self.height() - 1) { y } else { location.y },
            )
        }
    }

    /// Locations of the Moore neighbours of `location`, in row-major offset order.
    pub fn moore_neighbour_locations(&self, location: Vector2D) -> impl Iterator<Item = Vector2D> + '_ {
        MOORE_OFFSETS
            .iter()
            .filter_map(move |&(dx, dy)| self.neighbour_location(location, dx, dy))
    }

    /// Epithelial cells among the 8 adjacent sites whose committed state equals `filter`,
    /// or all of them when `filter` is `None`.
    pub fn moore_neighbours(&self, location: Vector2D, filter: Option<EpithelialState>) -> Vec<&EpithelialCell> {
        self.moore_neighbour_locations(location)
            .map(|loc| self.epithelial(loc))
            .filter(|cell| filter.map_or(true, |state| cell.state == state))
            .collect()
    }

    /// Number of adjacent epithelial cells whose committed state is `state`.
    pub fn moore_neighbour_state_count(&self, location: Vector2D, state: EpithelialState) -> usize {
        self.moore_neighbour_locations(location)
            .filter(|&loc| self.epithelial(loc).state == state)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world(width: u32, height: u32, is_toroidal: bool) -> World {
        World::new(WorldParams { grid_width: width, grid_height: height, is_toroidal })
    }

    #[test]
    fn every_site_holds_its_own_epithelial_cell() {
        let w = world(4, 3, true);
        assert_eq!(w.area(), 12);
        for site in w.sites() {
            assert_eq!(site.epithelial.location, site.location);
            assert!(site.immune_cells.is_empty());
        }
        assert_eq!(w.site(Vector2D::new(3, 2)).location, Vector2D::new(3, 2));
    }

    #[test]
    fn toroidal_grid_has_eight_neighbours_everywhere() {
        let w = world(3, 3, true);
        for site in w.sites() {
            assert_eq!(w.moore_neighbours(site.location, None).len(), 8);
            assert_eq!(w.moore_neighbour_state_count(site.location, EpithelialState::Healthy), 8);
        }
    }

    #[test]
    fn toroidal_neighbours_wrap_to_opposite_edge() {
        let w = world(5, 4, true);
        let locations: Vec<_> = w.moore_neighbour_locations(Vector2D::new(0, 0)).collect();
        assert!(locations.contains(&Vector2D::new(4, 3)));
        assert!(locations.contains(&Vector2D::new(1, 3)));
        assert!(locations.contains(&Vector2D::new(4, 0)));
        assert!(!locations.contains(&Vector2D::new(0, 0)));
    }

    #[test]
    fn bounded_grid_excludes_out_of_range_neighbours() {
        let w = world(4, 4, false);
        assert_eq!(w.moore_neighbours(Vector2D::new(0, 0), None).len(), 3);
        assert_eq!(w.moore_neighbours(Vector2D::new(3, 3), None).len(), 3);
        assert_eq!(w.moore_neighbours(Vector2D::new(1, 0), None).len(), 5);
        assert_eq!(w.moore_neighbours(Vector2D::new(0, 2), None).len(), 5);
        assert_eq!(w.moore_neighbours(Vector2D::new(1, 1), None).len(), 8);
    }

    #[test]
    fn absent_state_counts_zero() {
        let w = world(3, 3, false);
        for site in w.sites() {
            assert_eq!(w.moore_neighbour_state_count(site.location, EpithelialState::Infectious), 0);
            assert!(w.moore_neighbours(site.location, Some(EpithelialState::NaturalDeath)).is_empty());
        }
    }

    #[test]
    fn filter_reads_committed_state_only() {
        let mut w = world(3, 3, true);
        w.epithelial_mut(Vector2D::new(0, 0)).stage(EpithelialState::NaturalDeath);
        assert_eq!(w.moore_neighbour_state_count(Vector2D::new(1, 1), EpithelialState::NaturalDeath), 0);

        let cell = w.epithelial_mut(Vector2D::new(0, 0));
        cell.state = cell.next_state;
        assert_eq!(w.moore_neighbour_state_count(Vector2D::new(1, 1), EpithelialState::NaturalDeath), 1);
        assert_eq!(w.moore_neighbour_state_count(Vector2D::new(1, 1), EpithelialState::Healthy), 7);
    }

    #[test]
    fn bounded_steps_drop_the_leaving_component() {
        let w = world(3, 3, false);
        assert_eq!(w.step_location(Vector2D::new(0, 0), -1, 1), Vector2D::new(0, 1));
        assert_eq!(w.step_location(Vector2D::new(2, 2), 1, 1), Vector2D::new(2, 2));
        assert_eq!(w.step_location(Vector2D::new(1, 1), 1, -1), Vector2D::new(2, 0));

        let t = world(3, 3, true);
        assert_eq!(t.step_location(Vector2D::new(0, 0), -1, -1), Vector2D::new(2, 2));
    }

    #[test]
    fn remove_immune_reports_membership() {
        let mut site = Site::new(Vector2D::zero());
        site.immune_cells.extend([4, 9]);
        assert!(site.remove_immune(4));
        assert!(!site.remove_immune(4));
        assert_eq!(site.immune_cells, vec![9]);
    }
}

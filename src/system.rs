use crate::grid::World;
use anyhow::Result;
use rand::rngs::StdRng;

/// The contract shared by the epithelial and immune systems.
///
/// A tick calls `update` on every system first and `synchronise` afterwards. `update` only reads
/// committed state and writes staged state, so the order cells are visited in does not matter.
pub trait CellSystem {
    /// Populates the world. Called once, before the first tick.
    fn initialise(&mut self, world: &mut World, rng: &mut StdRng) -> Result<()>;

    /// Stages next states for every cell.
    fn update(&mut self, world: &mut World, rng: &mut StdRng) -> Result<()>;

    /// Commits the staged states.
    fn synchronise(&mut self, world: &mut World) -> Result<()>;
}

/// Uniform draw that succeeds with probability `chance` (always for `chance >= 1`).
#[inline(always)]
pub(crate) fn roll(rng: &mut StdRng, chance: f64) -> bool {
    use rand::Rng;
    rng.random::<f64>() < chance
}

use serde::{Deserialize, Serialize};
use simulation_common::Vector2D;

/// Identifier of a focus (lesion) in the focus system.
pub type FocusId = u32;

/// Identifier of an immune cell, unique within a run.
pub type ImmuneCellId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpithelialState {
    Healthy,
    Containing,
    Expressing,
    Infectious,
    InfectionDeath,
    NaturalDeath,
}

impl EpithelialState {
    pub const ALL: [EpithelialState; 6] = [
        EpithelialState::Healthy,
        EpithelialState::Containing,
        EpithelialState::Expressing,
        EpithelialState::Infectious,
        EpithelialState::InfectionDeath,
        EpithelialState::NaturalDeath,
    ];

    pub fn is_dead(self) -> bool {
        matches!(self, EpithelialState::InfectionDeath | EpithelialState::NaturalDeath)
    }

    pub fn is_infected(self) -> bool {
        matches!(
            self,
            EpithelialState::Containing | EpithelialState::Expressing | EpithelialState::Infectious
        )
    }

    /// Expressing and infectious cells present antigen to passing immune cells.
    pub fn is_recognisable(self) -> bool {
        matches!(self, EpithelialState::Expressing | EpithelialState::Infectious)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImmuneState {
    Virgin,
    Mature,
    Dead,
}

/// The target of the virus. Exactly one lives at every site for the whole run;
/// regeneration resets it in place.
#[derive(Debug, Clone)]
pub struct EpithelialCell {
    pub location: Vector2D,
    pub age: u32,
    /// Committed state. Only written during synchronise.
    pub state: EpithelialState,
    /// Staged state. Only written during update.
    pub next_state: EpithelialState,
    /// Ticks spent in the current infection stage.
    pub delay: u32,
    pub time_infected: u32,
    pub focus_id: Option<FocusId>,
    /// Cleared once the cell has been targeted, so it is not re-infected in the same tick.
    pub can_infect: bool,
    /// Focus the cell belonged to before being staged HEALTHY; consumed by synchronise.
    pub(crate) released_focus: Option<FocusId>,
}

impl EpithelialCell {
    pub fn new(location: Vector2D) -> Self {
        Self {
            location,
            age: 0,
            state: EpithelialState::Healthy,
            next_state: EpithelialState::Healthy,
            delay: 0,
            time_infected: 0,
            focus_id: None,
            can_infect: true,
            released_focus: None,
        }
    }

    /// Stages `state` for the next synchronise and applies its entry side effects immediately.
    pub fn stage(&mut self, state: EpithelialState) {
        match state {
            EpithelialState::InfectionDeath | EpithelialState::NaturalDeath => {
                self.age = 0;
                self.delay = 0;
            }
            EpithelialState::Healthy => {
                self.age = 0;
                self.delay = 0;
                self.time_infected = 0;
                self.can_infect = true;
                if let Some(id) = self.focus_id.take() {
                    self.released_focus = Some(id);
                }
            }
            EpithelialState::Containing | EpithelialState::Expressing => {
                self.delay = 0;
            }
            EpithelialState::Infectious => {}
        }
        self.next_state = state;
    }

    /// Keeps the committed state for the next tick.
    pub fn stage_unchanged(&mut self) {
        self.next_state = self.state;
    }
}

/// A mobile innate immune cell. Cells migrate between sites and are removed once dead.
#[derive(Debug, Clone)]
pub struct ImmuneCell {
    pub id: ImmuneCellId,
    pub location: Vector2D,
    pub age: u32,
    pub state: ImmuneState,
    pub next_state: ImmuneState,
}

impl ImmuneCell {
    pub fn new(id: ImmuneCellId, location: Vector2D) -> Self {
        Self {
            id,
            location,
            age: 0,
            state: ImmuneState::Virgin,
            next_state: ImmuneState::Virgin,
        }
    }

    /// Staging is monotonic: a dead cell never comes back and a mature cell never reverts.
    pub fn stage(&mut self, state: ImmuneState) {
        match (self.next_state, state) {
            (ImmuneState::Dead, _) => {}
            (ImmuneState::Mature, ImmuneState::Virgin) => {}
            _ => self.next_state = state,
        }
    }
}

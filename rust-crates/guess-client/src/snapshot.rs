use crate::{
    Address,
    U256,
    actions::{
        self,
        ActionKind,
        ActionState,
        ActionStates,
    },
    phase::{
        GamePeriodWindow,
        GameProgress,
        Phase,
    },
    session::Session,
};

/// Everything the presentation layer may read, published after every state
/// change. Cheap to clone; never mutated once sent.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GameSnapshot {
    pub session: Session,
    pub is_contract_owner: bool,
    pub current_block: Option<u64>,
    pub window: Option<GamePeriodWindow>,
    pub phase: Phase,
    pub blocks_remaining: Option<u64>,
    pub progress: GameProgress,
    /// Last `WinningGuessCalculated` of the current round.
    pub winning_guess: Option<U256>,
    pub players: Vec<Address>,
    pub min_num_players: Option<u64>,
    pub participation_fee: Option<U256>,
    pub winners: Vec<Address>,
    pub actions: ActionStates,
    /// Set when the node could not be reached; the client is inert.
    pub provider_notice: Option<String>,
}

impl GameSnapshot {
    pub fn unavailable(notice: impl Into<String>) -> Self {
        Self {
            provider_notice: Some(notice.into()),
            ..Self::default()
        }
    }

    pub fn is_inert(&self) -> bool {
        self.provider_notice.is_some()
    }

    pub fn action_state(&self, kind: ActionKind) -> &ActionState {
        self.actions.get(kind)
    }

    pub fn is_available(&self, kind: ActionKind) -> bool {
        actions::is_available(kind, self)
    }

    pub fn available_actions(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|kind| self.is_available(*kind))
            .collect()
    }
}

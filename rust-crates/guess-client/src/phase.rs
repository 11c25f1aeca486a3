//! Client-side game phase state machine.
//!
//! The engine does no I/O. It is fed block numbers and decoded game logs and
//! answers with the [`Transition`]s that actually changed its state, so
//! feeding it the same log twice (once from the per-block poll, once from a
//! subscription) is harmless.

use crate::{
    Address,
    U256,
    chain::{
        EventId,
        GameEvent,
        GameLog,
    },
};
use std::collections::{
    BTreeSet,
    HashMap,
};


/// Contract-wide period lengths in blocks. Both are non-zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GamePeriods {
    submission_length: u64,
    reveal_length: u64,
}

impl GamePeriods {
    pub fn new(submission_length: u64, reveal_length: u64) -> Option<Self> {
        (submission_length > 0 && reveal_length > 0).then_some(Self {
            submission_length,
            reveal_length,
        })
    }

    pub fn submission_length(&self) -> u64 {
        self.submission_length
    }

    pub fn reveal_length(&self) -> u64 {
        self.reveal_length
    }

    /// How far back a round that is still open can have started.
    pub fn round_length(&self) -> u64 {
        self.submission_length.saturating_add(self.reveal_length)
    }

    pub fn window_starting_at(&self, start_block: u64) -> GamePeriodWindow {
        GamePeriodWindow {
            start_block,
            submission_length: self.submission_length,
            reveal_length: self.reveal_length,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GamePeriodWindow {
    pub start_block: u64,
    pub submission_length: u64,
    pub reveal_length: u64,
}

impl GamePeriodWindow {
    pub fn end_submission_block(&self) -> u64 {
        self.start_block.saturating_add(self.submission_length)
    }

    pub fn end_reveal_block(&self) -> u64 {
        self.end_submission_block().saturating_add(self.reveal_length)
    }

    /// Half-open ranges: `[.., end_submission)` is submission,
    /// `[end_submission, end_reveal)` is reveal, the rest is idle.
    pub fn phase_at(&self, block: u64) -> Phase {
        if block < self.end_submission_block() {
            Phase::Submission
        } else if block < self.end_reveal_block() {
            Phase::Reveal
        } else {
            Phase::Idle
        }
    }

    pub fn blocks_remaining(&self, block: u64) -> Option<u64> {
        match self.phase_at(block) {
            Phase::Submission => Some(self.end_submission_block() - block),
            Phase::Reveal => Some(self.end_reveal_block() - block),
            Phase::Idle => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Phase {
    Submission,
    Reveal,
    /// No open window: before the first round, or settling after reveal.
    #[default]
    Idle,
}

impl Phase {
    pub fn is_submission(self) -> bool {
        matches!(self, Phase::Submission)
    }

    pub fn is_reveal(self) -> bool {
        matches!(self, Phase::Reveal)
    }

    pub fn is_idle(self) -> bool {
        matches!(self, Phase::Idle)
    }
}

pub fn classify(window: Option<&GamePeriodWindow>, current_block: Option<u64>) -> Phase {
    match (window, current_block) {
        (Some(window), Some(block)) => window.phase_at(block),
        _ => Phase::Idle,
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GameProgress {
    pub is_game_started: bool,
    pub is_guesses_submitted: bool,
    pub is_winning_guess_calculated: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Transition {
    RoundStarted(GamePeriodWindow),
    SubmissionClosed,
    /// `round_continues` is false when nobody took part and the round
    /// fell back to "not started".
    RevealClosed { round_continues: bool },
    GuessesSubmitted,
    GuessRecorded { player: Address },
    WinningGuessCalculated { winning_guess: U256 },
    RoundSettled,
}

#[derive(Clone, Debug)]
pub struct PhaseEngine {
    periods: GamePeriods,
    current_block: Option<u64>,
    window: Option<GamePeriodWindow>,
    progress: GameProgress,
    players: BTreeSet<Address>,
    winning_guess: Option<U256>,
    /// Applied log ids with their block. Pruned whenever a round begins.
    applied: HashMap<EventId, u64>,
}

impl PhaseEngine {
    pub fn new(periods: GamePeriods) -> Self {
        Self {
            periods,
            current_block: None,
            window: None,
            progress: GameProgress::default(),
            players: BTreeSet::new(),
            winning_guess: None,
            applied: HashMap::new(),
        }
    }

    pub fn periods(&self) -> GamePeriods {
        self.periods
    }

    pub fn current_block(&self) -> Option<u64> {
        self.current_block
    }

    pub fn window(&self) -> Option<GamePeriodWindow> {
        self.window
    }

    pub fn progress(&self) -> GameProgress {
        self.progress
    }

    pub fn players(&self) -> &BTreeSet<Address> {
        &self.players
    }

    pub fn winning_guess(&self) -> Option<U256> {
        self.winning_guess
    }

    pub fn phase(&self) -> Phase {
        classify(self.window.as_ref(), self.current_block)
    }

    pub fn blocks_remaining(&self) -> Option<u64> {
        let block = self.current_block?;
        self.window?.blocks_remaining(block)
    }

    /// Moves the head forward. Ticks at or below the known head are stale
    /// and ignored, so the head only ever grows.
    pub fn observe_block(&mut self, block: u64) -> Vec<Transition> {
        let previous = match self.current_block {
            Some(head) if block <= head => return Vec::new(),
            other => other,
        };
        self.current_block = Some(block);

        let (Some(previous), Some(window)) = (previous, self.window) else {
            return Vec::new();
        };
        let crossed = |boundary: u64| previous < boundary && block >= boundary;

        let mut transitions = Vec::new();
        if crossed(window.end_submission_block()) {
            transitions.push(Transition::SubmissionClosed);
        }
        if crossed(window.end_reveal_block()) {
            let round_continues = self.participation_recorded();
            self.progress.is_game_started = round_continues;
            transitions.push(Transition::RevealClosed { round_continues });
        }
        transitions
    }

    /// Applies a mined log at most once per [`EventId`]. Logs mined before
    /// the current round started belong to an earlier round and are dropped.
    pub fn apply_log(&mut self, log: &GameLog) -> Vec<Transition> {
        if self.applied.contains_key(&log.id) {
            tracing::trace!(?log.id, "log already applied");
            return Vec::new();
        }
        let predates_round = self
            .window
            .is_some_and(|window| log.block_number < window.start_block);
        if predates_round && !matches!(log.event, GameEvent::GameStarted { .. }) {
            tracing::debug!(
                kind = %log.kind(),
                block = log.block_number,
                "log from an earlier round ignored"
            );
            return Vec::new();
        }
        self.applied.insert(log.id, log.block_number);
        tracing::debug!(
            kind = %log.kind(),
            block = log.block_number,
            "applying game log"
        );
        match &log.event {
            GameEvent::GameStarted { .. } => self.begin_round(log.block_number),
            GameEvent::AllGuessesSubmitted => {
                if self.progress.is_guesses_submitted {
                    return Vec::new();
                }
                self.progress.is_guesses_submitted = true;
                vec![Transition::GuessesSubmitted]
            }
            GameEvent::GuessSubmitted { player } => {
                if self.players.insert(*player) {
                    vec![Transition::GuessRecorded { player: *player }]
                } else {
                    Vec::new()
                }
            }
            GameEvent::WinningGuessCalculated { winning_guess } => {
                let changed = self.progress.is_guesses_submitted
                    || !self.progress.is_winning_guess_calculated
                    || self.winning_guess != Some(*winning_guess);
                self.progress.is_guesses_submitted = false;
                self.progress.is_winning_guess_calculated = true;
                self.winning_guess = Some(*winning_guess);
                if changed {
                    vec![Transition::WinningGuessCalculated {
                        winning_guess: *winning_guess,
                    }]
                } else {
                    Vec::new()
                }
            }
        }
    }

    pub fn apply_logs<'a>(
        &mut self,
        logs: impl IntoIterator<Item = &'a GameLog>,
    ) -> Vec<Transition> {
        logs.into_iter()
            .flat_map(|log| self.apply_log(log))
            .collect()
    }

    /// Rebuilds an in-flight round after a restart from the logs mined since
    /// it started. The started flag is then re-derived from the phase.
    pub fn recover(&mut self, logs: &[GameLog]) -> Vec<Transition> {
        let transitions = self.apply_logs(logs);
        if self.window.is_some() && self.phase().is_idle() {
            self.progress.is_game_started = self.participation_recorded();
        }
        transitions
    }

    /// A `startGame` receipt mined at `start_block`.
    pub fn start_round(&mut self, start_block: u64) -> Vec<Transition> {
        self.begin_round(start_block)
    }

    /// Winner selected: the round is over.
    pub fn settle_round(&mut self) -> Vec<Transition> {
        let was_active = self.progress != GameProgress::default();
        self.progress = GameProgress::default();
        if was_active {
            vec![Transition::RoundSettled]
        } else {
            Vec::new()
        }
    }

    fn begin_round(&mut self, start_block: u64) -> Vec<Transition> {
        let window = self.periods.window_starting_at(start_block);
        if let Some(current) = self.window {
            if start_block < current.start_block {
                tracing::debug!(
                    start_block,
                    current = current.start_block,
                    "stale round start ignored"
                );
                return Vec::new();
            }
            if current == window && self.progress.is_game_started {
                return Vec::new();
            }
        }
        self.window = Some(window);
        self.progress = GameProgress {
            is_game_started: true,
            ..GameProgress::default()
        };
        self.players.clear();
        self.winning_guess = None;
        self.applied.retain(|_, block| *block >= start_block);
        vec![Transition::RoundStarted(window)]
    }

    fn participation_recorded(&self) -> bool {
        self.progress.is_guesses_submitted || self.progress.is_winning_guess_calculated
    }
}

//! The five game transactions: who may send them when, and how one is
//! carried from gas estimate to receipt.

use crate::{
    Address,
    Error,
    Result,
    TxHash,
    chain::{
        ChainClient,
        GameCall,
        TxOptions,
        TxReceipt,
    },
    commitment::GuessInput,
    config::GasPolicy,
    phase::Phase,
    snapshot::GameSnapshot,
};
use std::{
    collections::BTreeMap,
    fmt,
};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ActionKind {
    StartGame,
    EnterGuess,
    RevealSaltAndGuess,
    CalculateWinningGuess,
    SelectWinner,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::StartGame,
        ActionKind::EnterGuess,
        ActionKind::RevealSaltAndGuess,
        ActionKind::CalculateWinningGuess,
        ActionKind::SelectWinner,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ActionKind::StartGame => "Start game",
            ActionKind::EnterGuess => "Enter guess",
            ActionKind::RevealSaltAndGuess => "Reveal guess and salt",
            ActionKind::CalculateWinningGuess => "Calculate winning guess",
            ActionKind::SelectWinner => "Select winner",
        }
    }

    pub fn pending_message(self) -> &'static str {
        match self {
            ActionKind::StartGame => "Waiting for the game to start",
            ActionKind::EnterGuess => "Waiting for the guess to be entered",
            ActionKind::RevealSaltAndGuess => {
                "Waiting for the guess and salt to be revealed"
            }
            ActionKind::CalculateWinningGuess => "Waiting for calculating winnings",
            ActionKind::SelectWinner => "Waiting for a winner selecting",
        }
    }

    /// `None` when success is announced by a later event instead of the
    /// receipt.
    pub fn success_message(self) -> Option<&'static str> {
        match self {
            ActionKind::StartGame => Some("The game is started"),
            ActionKind::EnterGuess => Some("The guess is saved"),
            ActionKind::RevealSaltAndGuess => {
                Some("Guess and salt are successfully revealed")
            }
            ActionKind::CalculateWinningGuess => None,
            ActionKind::SelectWinner => Some("The winner is selected"),
        }
    }

    pub fn owner_only(self) -> bool {
        matches!(
            self,
            ActionKind::StartGame
                | ActionKind::CalculateWinningGuess
                | ActionKind::SelectWinner
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ActionState {
    #[default]
    Idle,
    /// `tx_hash` is known once the node accepted the transaction.
    Pending { tx_hash: Option<TxHash> },
    Confirmed { block: u64 },
    Failed { reason: String },
}

impl ActionState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ActionState::Pending { .. })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActionStates {
    states: BTreeMap<ActionKind, ActionState>,
}

impl ActionStates {
    pub fn get(&self, kind: ActionKind) -> &ActionState {
        const IDLE: &ActionState = &ActionState::Idle;
        self.states.get(&kind).unwrap_or(IDLE)
    }

    pub fn set(&mut self, kind: ActionKind, state: ActionState) {
        self.states.insert(kind, state);
    }

    pub fn is_pending(&self, kind: ActionKind) -> bool {
        self.get(kind).is_pending()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionKind, &ActionState)> {
        ActionKind::ALL.into_iter().map(|kind| (kind, self.get(kind)))
    }
}

/// A user request to send one of the game transactions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GameAction {
    StartGame,
    EnterGuess(GuessInput),
    RevealSaltAndGuess(GuessInput),
    CalculateWinningGuess,
    SelectWinner,
}

impl GameAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            GameAction::StartGame => ActionKind::StartGame,
            GameAction::EnterGuess(_) => ActionKind::EnterGuess,
            GameAction::RevealSaltAndGuess(_) => ActionKind::RevealSaltAndGuess,
            GameAction::CalculateWinningGuess => ActionKind::CalculateWinningGuess,
            GameAction::SelectWinner => ActionKind::SelectWinner,
        }
    }

    pub fn call(&self) -> GameCall {
        match self {
            GameAction::StartGame => GameCall::StartGame,
            GameAction::EnterGuess(input) => GameCall::EnterGuess {
                commitment: input.commitment(),
            },
            GameAction::RevealSaltAndGuess(input) => GameCall::RevealSaltAndGuess {
                guess: input.guess,
                salt: input.salt,
            },
            GameAction::CalculateWinningGuess => GameCall::CalculateWinningGuess,
            GameAction::SelectWinner => GameCall::SelectWinner,
        }
    }
}

/// Checks `kind` against the published state. The error says what is
/// missing; nothing is sent when this fails.
pub fn check_preconditions(kind: ActionKind, snapshot: &GameSnapshot) -> Result<()> {
    if snapshot.provider_notice.is_some() {
        return Err(Error::ProviderUnavailable(
            "no connection to the game contract".to_string(),
        ));
    }
    if !snapshot.session.connected {
        return Err(Error::validation("Connect a wallet first"));
    }
    if snapshot.actions.is_pending(kind) {
        return Err(Error::validation(format!("{kind} is already pending")));
    }
    if kind.owner_only() && !snapshot.is_contract_owner {
        return Err(Error::validation(format!(
            "{kind} is reserved for the contract owner"
        )));
    }

    let progress = snapshot.progress;
    match kind {
        ActionKind::StartGame => {
            if progress.is_game_started || !snapshot.phase.is_idle() {
                return Err(Error::validation("The game is already started"));
            }
        }
        ActionKind::EnterGuess => {
            if snapshot.phase != Phase::Submission {
                return Err(Error::validation("The submission phase is not open"));
            }
        }
        ActionKind::RevealSaltAndGuess => {
            if snapshot.phase != Phase::Reveal {
                return Err(Error::validation("The reveal phase is not open"));
            }
        }
        ActionKind::CalculateWinningGuess => {
            if !snapshot.phase.is_idle() {
                return Err(Error::validation("The reveal phase is not over yet"));
            }
            if !progress.is_guesses_submitted {
                return Err(Error::validation("Not all guesses are submitted yet"));
            }
        }
        ActionKind::SelectWinner => {
            if !progress.is_winning_guess_calculated {
                return Err(Error::validation(
                    "The winning guess is not calculated yet",
                ));
            }
        }
    }
    Ok(())
}

pub fn is_available(kind: ActionKind, snapshot: &GameSnapshot) -> bool {
    check_preconditions(kind, snapshot).is_ok()
}

/// Estimates, caps and sends `call` from `from`, then waits for it to be
/// mined. `on_pending` fires as soon as the node returns the hash.
pub async fn submit<C, F>(
    chain: &C,
    gas: GasPolicy,
    from: Address,
    call: GameCall,
    on_pending: F,
) -> Result<TxReceipt>
where
    C: ChainClient,
    F: FnOnce(TxHash) + Send,
{
    let value = match call {
        GameCall::EnterGuess { .. } => Some(chain.participation_fee().await?),
        _ => None,
    };
    let estimate = chain.estimate_gas(from, &call, value).await?;
    let gas_limit = gas.gas_limit(estimate);
    tracing::debug!(
        method = call.method_name(),
        %estimate,
        %gas_limit,
        "sending game transaction"
    );

    let tx_hash = chain
        .send_transaction(
            from,
            &call,
            TxOptions {
                gas: Some(gas_limit),
                value,
            },
        )
        .await?;
    on_pending(tx_hash);

    let receipt = chain.wait_for_receipt(tx_hash).await?;
    tracing::info!(
        method = call.method_name(),
        ?tx_hash,
        block = receipt.block_number,
        "game transaction mined"
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        U256,
        phase::{
            GamePeriods,
            GameProgress,
        },
        session::Session,
        test_helpers::FakeChainClient,
    };
    use std::sync::{
        Arc,
        Mutex,
    };

    fn connected_snapshot(is_owner: bool) -> GameSnapshot {
        GameSnapshot {
            session: Session {
                connected: true,
                connecting: false,
                accounts: vec![Address::from_low_u64_be(0xa)],
            },
            is_contract_owner: is_owner,
            current_block: Some(100),
            ..GameSnapshot::default()
        }
    }

    #[test]
    fn owner_only__round_management__is_reserved_for_owner() {
        let reserved: Vec<ActionKind> = ActionKind::ALL
            .into_iter()
            .filter(|kind| kind.owner_only())
            .collect();

        assert_eq!(
            reserved,
            vec![
                ActionKind::StartGame,
                ActionKind::CalculateWinningGuess,
                ActionKind::SelectWinner,
            ]
        );
    }

    #[test]
    fn check_preconditions__start_game__requires_owner_and_idle_round() {
        // given
        let owner = connected_snapshot(true);
        let player = connected_snapshot(false);
        let mut running = connected_snapshot(true);
        running.progress.is_game_started = true;

        // then
        assert!(check_preconditions(ActionKind::StartGame, &owner).is_ok());
        assert!(check_preconditions(ActionKind::StartGame, &player).is_err());
        assert!(check_preconditions(ActionKind::StartGame, &running).is_err());
    }

    #[test]
    fn check_preconditions__enter_guess__only_in_submission_phase() {
        // given
        let mut snapshot = connected_snapshot(false);
        snapshot.window = Some(GamePeriods::new(10, 5).unwrap().window_starting_at(95));
        snapshot.phase = Phase::Submission;

        // then
        assert!(check_preconditions(ActionKind::EnterGuess, &snapshot).is_ok());
        assert!(check_preconditions(ActionKind::RevealSaltAndGuess, &snapshot).is_err());
    }

    #[test]
    fn check_preconditions__pending_action__cannot_be_relaunched() {
        // given
        let mut snapshot = connected_snapshot(true);
        snapshot
            .actions
            .set(ActionKind::StartGame, ActionState::Pending { tx_hash: None });

        // when
        let result = check_preconditions(ActionKind::StartGame, &snapshot);

        // then
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn check_preconditions__calculate__needs_all_guesses_and_closed_reveal() {
        // given
        let mut snapshot = connected_snapshot(true);
        snapshot.progress = GameProgress {
            is_game_started: true,
            is_guesses_submitted: true,
            is_winning_guess_calculated: false,
        };
        let mut in_reveal = snapshot.clone();
        in_reveal.phase = Phase::Reveal;

        // then
        assert!(check_preconditions(ActionKind::CalculateWinningGuess, &snapshot).is_ok());
        assert!(
            check_preconditions(ActionKind::CalculateWinningGuess, &in_reveal).is_err()
        );
    }

    #[test]
    fn check_preconditions__disconnected__rejects_everything() {
        let snapshot = GameSnapshot::default();
        for kind in ActionKind::ALL {
            assert!(!is_available(kind, &snapshot), "{kind} should be unavailable");
        }
    }

    #[tokio::test]
    async fn submit__enter_guess__attaches_fee_and_scaled_gas() {
        // given
        let chain = FakeChainClient::new();
        let from = Address::from_low_u64_be(0xb);
        let input = GuessInput::new(42, U256::from(7u64)).unwrap();
        let call = GameAction::EnterGuess(input).call();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_callback = seen.clone();

        // when
        let receipt = submit(&chain, GasPolicy::default(), from, call.clone(), move |hash| {
            *seen_in_callback.lock().unwrap() = Some(hash);
        })
        .await
        .unwrap();

        // then
        let sent = chain.sent_transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].call, call);
        assert_eq!(sent[0].options.value, Some(U256::from(1_000u64)));
        assert_eq!(sent[0].options.gas, Some(U256::from(120_000u64)));
        assert_eq!(*seen.lock().unwrap(), Some(receipt.tx_hash));
    }

    #[tokio::test]
    async fn submit__reverted_receipt__is_transaction_error() {
        // given
        let chain = FakeChainClient::new();
        chain.revert_receipts(true);

        // when
        let result = submit(
            &chain,
            GasPolicy::default(),
            Address::from_low_u64_be(0xa),
            GameCall::StartGame,
            |_| {},
        )
        .await;

        // then
        assert!(matches!(result, Err(Error::Transaction(_))));
    }
}

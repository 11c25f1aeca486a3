//! Seam between the game logic and a blockchain node.
//!
//! [`ChainClient`] is everything the client needs from a node: block numbers,
//! one-shot log queries, push subscriptions, contract views and transaction
//! submission. The production implementation lives in [`ethers_client`];
//! tests drive the same seam with `test_helpers::FakeChainClient`.

use crate::{
    Address,
    Error,
    Result,
    TxHash,
    U256,
    phase::GamePeriods,
};
use std::fmt;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};

pub mod ethers_client;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum GameEventKind {
    GameStarted,
    AllGuessesSubmitted,
    GuessSubmitted,
    WinningGuessCalculated,
}

impl GameEventKind {
    pub fn name(self) -> &'static str {
        match self {
            GameEventKind::GameStarted => "GameStarted",
            GameEventKind::AllGuessesSubmitted => "AllGuessesSubmitted",
            GameEventKind::GuessSubmitted => "GuessSubmitted",
            GameEventKind::WinningGuessCalculated => "WinningGuessCalculated",
        }
    }
}

impl fmt::Display for GameEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GameEvent {
    /// The contract's payload is named `timestamp`; the round boundaries are
    /// taken from the block the log was mined in, not from this value.
    GameStarted { timestamp: U256 },
    AllGuessesSubmitted,
    GuessSubmitted { player: Address },
    WinningGuessCalculated { winning_guess: U256 },
}

impl GameEvent {
    pub fn kind(&self) -> GameEventKind {
        match self {
            GameEvent::GameStarted { .. } => GameEventKind::GameStarted,
            GameEvent::AllGuessesSubmitted => GameEventKind::AllGuessesSubmitted,
            GameEvent::GuessSubmitted { .. } => GameEventKind::GuessSubmitted,
            GameEvent::WinningGuessCalculated { .. } => {
                GameEventKind::WinningGuessCalculated
            }
        }
    }
}

/// Identity of a mined log. Two deliveries of the same log share it no
/// matter which path (poll or subscription) produced them.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct EventId {
    pub tx_hash: TxHash,
    pub log_index: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameLog {
    pub id: EventId,
    pub block_number: u64,
    pub event: GameEvent,
}

impl GameLog {
    pub fn kind(&self) -> GameEventKind {
        self.event.kind()
    }
}

pub fn sort_logs(logs: &mut [GameLog]) {
    logs.sort_by_key(|log| (log.block_number, log.id.log_index));
}

/// A state-changing contract method with its arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GameCall {
    StartGame,
    EnterGuess { commitment: [u8; 32] },
    RevealSaltAndGuess { guess: U256, salt: U256 },
    CalculateWinningGuess,
    SelectWinner,
}

impl GameCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            GameCall::StartGame => "startGame",
            GameCall::EnterGuess { .. } => "enterGuess",
            GameCall::RevealSaltAndGuess { .. } => "revealSaltAndGuess",
            GameCall::CalculateWinningGuess => "calculateWinningGuess",
            GameCall::SelectWinner => "selectWinner",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TxOptions {
    pub gas: Option<U256>,
    pub value: Option<U256>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// Contract-wide constants read once at startup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GameConstants {
    pub periods: GamePeriods,
    pub min_num_players: u64,
    pub participation_fee: U256,
}

/// A live push stream. Dropping it (or calling [`Subscription::unsubscribe`])
/// stops the task feeding it.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<Result<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    pub fn new(receiver: mpsc::UnboundedReceiver<Result<T>>, task: JoinHandle<()>) -> Self {
        Self {
            receiver,
            task: Some(task),
        }
    }

    /// A subscription fed by someone else holding the sender.
    pub fn from_receiver(receiver: mpsc::UnboundedReceiver<Result<T>>) -> Self {
        Self {
            receiver,
            task: None,
        }
    }

    /// `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.receiver.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

pub trait ChainClient: Send + Sync + 'static {
    fn current_block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    fn owner(&self) -> impl Future<Output = Result<Address>> + Send;

    fn submission_period(&self) -> impl Future<Output = Result<u64>> + Send;

    fn reveal_period(&self) -> impl Future<Output = Result<u64>> + Send;

    fn min_num_players(&self) -> impl Future<Output = Result<u64>> + Send;

    fn participation_fee(&self) -> impl Future<Output = Result<U256>> + Send;

    /// Reverts (and so errors) once `index` is past the last winner.
    fn winning_address(&self, index: u64) -> impl Future<Output = Result<Address>> + Send;

    /// Logs of `kind` (or every game event when `None`) mined in
    /// `from..=to`, ordered by block then log index.
    fn query_events(
        &self,
        kind: Option<GameEventKind>,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<GameLog>>> + Send;

    fn subscribe_new_blocks(&self)
    -> impl Future<Output = Result<Subscription<u64>>> + Send;

    fn subscribe_event(
        &self,
        kind: GameEventKind,
    ) -> impl Future<Output = Result<Subscription<GameLog>>> + Send;

    fn estimate_gas(
        &self,
        from: Address,
        call: &GameCall,
        value: Option<U256>,
    ) -> impl Future<Output = Result<U256>> + Send;

    /// Resolves once the node accepted the transaction.
    fn send_transaction(
        &self,
        from: Address,
        call: &GameCall,
        options: TxOptions,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// Resolves once the transaction is mined; a revert is an error.
    fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<TxReceipt>> + Send;
}

pub async fn fetch_game_constants<C: ChainClient>(chain: &C) -> Result<GameConstants> {
    let submission = chain.submission_period().await?;
    let reveal = chain.reveal_period().await?;
    let periods = GamePeriods::new(submission, reveal).ok_or_else(|| {
        Error::Provider(format!(
            "contract reports zero-length period (submission {submission}, reveal {reveal})"
        ))
    })?;
    let min_num_players = chain.min_num_players().await?;
    let participation_fee = chain.participation_fee().await?;
    Ok(GameConstants {
        periods,
        min_num_players,
        participation_fee,
    })
}

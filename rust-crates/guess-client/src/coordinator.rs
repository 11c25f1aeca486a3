//! The task that owns all client state.
//!
//! Everything that can change the game view arrives as an event on one of two
//! channels (user commands, or reports from spawned I/O tasks) and is applied
//! synchronously. After each event the coordinator publishes a fresh
//! [`GameSnapshot`] and any [`Notification`]s the event produced. No handler
//! holds state across an await; provider calls run in their own tasks and
//! report back.

use crate::{
    Address,
    Error,
    Result,
    TxHash,
    actions::{
        self,
        ActionKind,
        ActionState,
        ActionStates,
        GameAction,
        check_preconditions,
    },
    chain::{
        ChainClient,
        GameConstants,
        GameEventKind,
        GameLog,
        Subscription,
        TxReceipt,
        fetch_game_constants,
    },
    commitment::GuessInput,
    config::{
        ClientConfig,
        GasPolicy,
    },
    notification::Notification,
    phase::{
        PhaseEngine,
        Transition,
    },
    session::{
        self,
        Authorization,
        SessionPersistence,
        SessionStore,
    },
    snapshot::GameSnapshot,
    wallet::WalletProvider,
    winners::{
        WinnersRegistry,
        lookup_bound,
        fetch_winners,
    },
};
use std::{
    ops::ControlFlow,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    task::JoinHandle,
};

#[cfg(test)]
mod tests;

/// Never log a `Command` with `{:?}`: `Connect` carries the passphrase.
#[derive(Clone, Eq, PartialEq)]
pub enum Command {
    Connect { passphrase: String },
    Disconnect,
    StartGame,
    EnterGuess(GuessInput),
    RevealSaltAndGuess(GuessInput),
    CalculateWinningGuess,
    SelectWinner,
    RefreshWinners,
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "connect",
            Command::Disconnect => "disconnect",
            Command::StartGame => "start-game",
            Command::EnterGuess(_) => "enter-guess",
            Command::RevealSaltAndGuess(_) => "reveal-salt-and-guess",
            Command::CalculateWinningGuess => "calculate-winning-guess",
            Command::SelectWinner => "select-winner",
            Command::RefreshWinners => "refresh-winners",
            Command::Shutdown => "shutdown",
        }
    }

    fn into_action(self) -> std::result::Result<GameAction, Command> {
        match self {
            Command::StartGame => Ok(GameAction::StartGame),
            Command::EnterGuess(input) => Ok(GameAction::EnterGuess(input)),
            Command::RevealSaltAndGuess(input) => {
                Ok(GameAction::RevealSaltAndGuess(input))
            }
            Command::CalculateWinningGuess => Ok(GameAction::CalculateWinningGuess),
            Command::SelectWinner => Ok(GameAction::SelectWinner),
            other => Err(other),
        }
    }
}

/// The presentation layer's end of the coordinator.
pub struct CoordinatorHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub snapshots: watch::Receiver<GameSnapshot>,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
}

impl CoordinatorHandle {
    /// A handle with no coordinator behind it, for when the node could not be
    /// reached at all. Shows `notice` and drops every command.
    pub fn unavailable(notice: impl Into<String>) -> Self {
        let notice = notice.into();
        let (commands, _) = mpsc::unbounded_channel();
        let (_, snapshots) = watch::channel(GameSnapshot::unavailable(notice.clone()));
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        let _ = notify_tx.send(Notification::error(notice));
        Self {
            commands,
            snapshots,
            notifications,
        }
    }

    pub fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ProviderUnavailable("game coordinator stopped".to_string()))
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.snapshots.borrow().clone()
    }
}

/// Reports from spawned I/O tasks.
#[derive(Debug)]
enum EngineEvent {
    BlockTick(u64),
    BlockStreamFailed(Error),
    PolledLogs {
        block: u64,
        result: Result<Vec<GameLog>>,
    },
    SubscriptionLog(GameLog),
    SubscriptionFailed {
        kind: GameEventKind,
        error: Error,
    },
    ActionPending {
        kind: ActionKind,
        tx_hash: TxHash,
    },
    ActionSettled {
        kind: ActionKind,
        result: Result<TxReceipt>,
    },
    Authorized(Result<Authorization>),
    WinnersRefreshDue,
    WinnersFetched(Vec<Address>),
}

pub struct GameCoordinator<C, W, P> {
    chain: Arc<C>,
    wallet: Arc<W>,
    session: SessionStore<P>,
    gas: GasPolicy,
    winners_refresh_delay: Duration,
    constants: Option<GameConstants>,
    engine: Option<PhaseEngine>,
    winners: WinnersRegistry,
    actions: ActionStates,
    provider_notice: Option<String>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    snapshot_tx: watch::Sender<GameSnapshot>,
    notifications: mpsc::UnboundedSender<Notification>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C, W, P> GameCoordinator<C, W, P>
where
    C: ChainClient,
    W: WalletProvider,
    P: SessionPersistence,
{
    pub fn new(
        chain: C,
        wallet: W,
        persistence: P,
        config: &ClientConfig,
    ) -> (Self, CoordinatorHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(GameSnapshot::default());
        let (notifications, notifications_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            chain: Arc::new(chain),
            wallet: Arc::new(wallet),
            session: SessionStore::new(persistence),
            gas: config.gas,
            winners_refresh_delay: config.winners_refresh_delay,
            constants: None,
            engine: None,
            winners: WinnersRegistry::default(),
            actions: ActionStates::default(),
            provider_notice: None,
            commands,
            events_tx,
            events_rx,
            snapshot_tx,
            notifications,
            tasks: Vec::new(),
        };
        let handle = CoordinatorHandle {
            commands: commands_tx,
            snapshots,
            notifications: notifications_rx,
        };
        (coordinator, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        if let Err(err) = self.start().await {
            tracing::error!(%err, "game client is unavailable");
            self.provider_notice = Some(err.to_string());
            self.notify(Notification::error(err.to_string()));
            self.publish();
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::info!("command channel closed");
                        break;
                    };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }
            }
        }
        self.stop_tasks();
        tracing::info!("game coordinator stopped");
    }

    /// Reads the contract constants, restores the session and rebuilds the
    /// round in flight, then starts listening. Fails only when the node or
    /// contract cannot be reached at all.
    async fn start(&mut self) -> Result<()> {
        let constants = fetch_game_constants(&*self.chain)
            .await
            .map_err(unavailable)?;
        let latest = self
            .chain
            .current_block_number()
            .await
            .map_err(unavailable)?;
        tracing::info!(
            latest,
            submission = constants.periods.submission_length(),
            reveal = constants.periods.reveal_length(),
            "game constants loaded"
        );
        let mut engine = PhaseEngine::new(constants.periods);
        engine.observe_block(latest);
        self.constants = Some(constants);

        self.restore_session().await;
        self.recover_round(&mut engine, latest).await;
        let bound = lookup_bound(engine.players().len());
        self.engine = Some(engine);
        self.winners.replace(fetch_winners(&*self.chain, bound).await);

        match self.chain.subscribe_new_blocks().await {
            Ok(subscription) => self.spawn_block_pump(subscription),
            Err(err) => {
                tracing::error!(%err, "block subscription failed");
                self.notify(Notification::error(format!(
                    "Block subscription failed: {err}"
                )));
            }
        }
        self.spawn_one_shot(GameEventKind::AllGuessesSubmitted);
        self.publish();
        Ok(())
    }

    async fn restore_session(&mut self) {
        let account = match self.session.restore() {
            Ok(Some(account)) => account,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(%err, "stored session ignored");
                self.notify(Notification::warning(err.to_string()));
                return;
            }
        };
        match self.chain.owner().await {
            Ok(owner) => self.session.apply_owner(owner),
            Err(err) => {
                tracing::warn!(%err, "owner lookup failed");
                self.notify(Notification::error(err.to_string()));
            }
        }
        self.notify(Notification::info(format!("Reconnected as {account:?}")));
    }

    async fn recover_round(&mut self, engine: &mut PhaseEngine, latest: u64) {
        let from = latest.saturating_sub(engine.periods().round_length());
        let started = match self
            .chain
            .query_events(Some(GameEventKind::GameStarted), from, latest)
            .await
        {
            Ok(logs) => logs,
            Err(err) => {
                tracing::warn!(%err, "round recovery query failed");
                self.notify(Notification::error(err.to_string()));
                return;
            }
        };
        let Some(last_start) = started.last() else {
            tracing::info!(from, latest, "no round in flight");
            return;
        };

        let replay = match self
            .chain
            .query_events(None, last_start.block_number, latest)
            .await
        {
            Ok(logs) => logs,
            Err(err) => {
                tracing::warn!(%err, "round replay query failed");
                self.notify(Notification::error(err.to_string()));
                vec![last_start.clone()]
            }
        };
        engine.recover(&replay);
        tracing::info!(
            start_block = last_start.block_number,
            phase = ?engine.phase(),
            players = engine.players().len(),
            "round recovered"
        );
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        tracing::debug!(command = command.name(), "command received");
        if command == Command::Shutdown {
            return ControlFlow::Break(());
        }
        if let Some(notice) = &self.provider_notice {
            self.notify(Notification::warning(notice.clone()));
            return ControlFlow::Continue(());
        }

        let command = match command.into_action() {
            Ok(action) => {
                self.launch(action);
                return ControlFlow::Continue(());
            }
            Err(command) => command,
        };
        match command {
            Command::Connect { passphrase } => self.connect(passphrase),
            Command::Disconnect => self.disconnect(),
            Command::RefreshWinners => self.refresh_winners(),
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::BlockTick(block) => self.on_block(block),
            EngineEvent::BlockStreamFailed(err) => {
                tracing::error!(%err, "block subscription ended");
                self.notify(Notification::error(format!(
                    "Block subscription failed: {err}"
                )));
            }
            EngineEvent::PolledLogs { block, result } => match result {
                Ok(logs) => self.apply_logs(&logs),
                Err(err) => {
                    // the next tick polls again
                    tracing::warn!(block, %err, "event poll failed");
                }
            },
            EngineEvent::SubscriptionLog(log) => self.apply_logs(std::slice::from_ref(&log)),
            EngineEvent::SubscriptionFailed { kind, error } => {
                tracing::error!(%kind, %error, "event subscription failed");
                self.notify(Notification::error(format!(
                    "{kind} subscription failed: {error}"
                )));
            }
            EngineEvent::ActionPending { kind, tx_hash } => {
                self.actions.set(
                    kind,
                    ActionState::Pending {
                        tx_hash: Some(tx_hash),
                    },
                );
                self.notify(Notification::pending(kind.pending_message()).for_action(kind));
            }
            EngineEvent::ActionSettled { kind, result } => self.on_action_settled(kind, result),
            EngineEvent::Authorized(outcome) => self.on_authorized(outcome),
            EngineEvent::WinnersRefreshDue => self.refresh_winners(),
            EngineEvent::WinnersFetched(winners) => self.winners.replace(winners),
        }
        self.publish();
    }

    fn on_block(&mut self, block: u64) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.current_block().is_some_and(|head| block <= head) {
            tracing::trace!(block, "stale block tick");
            return;
        }
        let transitions = engine.observe_block(block);
        self.announce(&transitions);

        let chain = self.chain.clone();
        let events = self.events_tx.clone();
        self.spawn_task(async move {
            let result = chain.query_events(None, block.saturating_sub(1), block).await;
            let _ = events.send(EngineEvent::PolledLogs { block, result });
        });
    }

    fn apply_logs(&mut self, logs: &[GameLog]) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let transitions = engine.apply_logs(logs);
        self.announce(&transitions);
    }

    fn announce(&mut self, transitions: &[Transition]) {
        for transition in transitions {
            tracing::info!(?transition, "phase transition");
            let notification = match transition {
                Transition::RoundStarted(window) => Notification::info(format!(
                    "A new round started at block {}",
                    window.start_block
                )),
                Transition::SubmissionClosed => {
                    Notification::info("The submission phase is over")
                }
                Transition::RevealClosed {
                    round_continues: true,
                } => Notification::info("The reveal phase is over"),
                Transition::RevealClosed {
                    round_continues: false,
                } => Notification::info("The reveal phase is over; nobody took part"),
                Transition::GuessesSubmitted => {
                    Notification::success("All guesses are submitted")
                }
                Transition::WinningGuessCalculated { .. } => {
                    Notification::success("The winning guess is calculated")
                }
                Transition::GuessRecorded { .. } | Transition::RoundSettled => continue,
            };
            self.notify(notification);
        }
    }

    fn launch(&mut self, action: GameAction) {
        let kind = action.kind();
        let snapshot = self.snapshot();
        if let Err(err) = check_preconditions(kind, &snapshot) {
            tracing::debug!(%kind, %err, "action refused");
            self.notify(Notification::warning(err.to_string()).for_action(kind));
            return;
        }
        let Some(from) = snapshot.session.primary_account() else {
            return;
        };

        tracing::info!(%kind, ?from, "launching action");
        self.actions
            .set(kind, ActionState::Pending { tx_hash: None });
        self.publish();

        // Armed before sending so the event cannot be mined ahead of the
        // listener. A failed send leaves it waiting for the next calculation.
        if kind == ActionKind::CalculateWinningGuess {
            self.spawn_one_shot(GameEventKind::WinningGuessCalculated);
        }

        let chain = self.chain.clone();
        let events = self.events_tx.clone();
        let gas = self.gas;
        let call = action.call();
        self.spawn_task(async move {
            let pending = events.clone();
            let result = actions::submit(&*chain, gas, from, call, move |tx_hash| {
                let _ = pending.send(EngineEvent::ActionPending { kind, tx_hash });
            })
            .await;
            let _ = events.send(EngineEvent::ActionSettled { kind, result });
        });
    }

    fn on_action_settled(&mut self, kind: ActionKind, result: Result<TxReceipt>) {
        let receipt = match result {
            Ok(receipt) => receipt,
            Err(err) => {
                tracing::error!(%kind, %err, "action failed");
                self.actions.set(
                    kind,
                    ActionState::Failed {
                        reason: err.to_string(),
                    },
                );
                self.notify(Notification::error(err.to_string()).for_action(kind));
                return;
            }
        };

        self.actions.set(
            kind,
            ActionState::Confirmed {
                block: receipt.block_number,
            },
        );
        if let Some(engine) = self.engine.as_mut() {
            let transitions = engine.observe_block(receipt.block_number);
            self.announce(&transitions);
        }

        match kind {
            ActionKind::StartGame => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.start_round(receipt.block_number);
                }
                self.winners.clear();
            }
            ActionKind::SelectWinner => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.settle_round();
                }
                self.schedule_winners_refresh();
            }
            ActionKind::EnterGuess
            | ActionKind::RevealSaltAndGuess
            | ActionKind::CalculateWinningGuess => {}
        }
        if let Some(message) = kind.success_message() {
            self.notify(Notification::success(message).for_action(kind));
        }
    }

    fn connect(&mut self, passphrase: String) {
        if !self.session.begin_connect() {
            self.notify(Notification::warning("A wallet connection is already in progress"));
            return;
        }
        self.publish();

        let chain = self.chain.clone();
        let wallet = self.wallet.clone();
        let events = self.events_tx.clone();
        self.spawn_task(async move {
            let outcome = session::authorize(&*wallet, &*chain, passphrase).await;
            let _ = events.send(EngineEvent::Authorized(outcome));
        });
    }

    fn on_authorized(&mut self, outcome: Result<Authorization>) {
        match self.session.finish_connect(outcome) {
            Ok(()) => {
                let owner = if self.session.is_contract_owner() {
                    " (contract owner)"
                } else {
                    ""
                };
                tracing::info!(owner = self.session.is_contract_owner(), "wallet connected");
                self.notify(Notification::success(format!("Wallet connected{owner}")));
            }
            Err(err @ Error::Persistence(_)) => {
                tracing::warn!(%err, "session not saved");
                self.notify(Notification::warning(err.to_string()));
            }
            Err(err) => {
                tracing::warn!(%err, "wallet connection failed");
                self.wallet.lock();
                self.notify(Notification::error(err.to_string()));
            }
        }
    }

    fn disconnect(&mut self) {
        self.wallet.lock();
        if let Err(err) = self.session.disconnect() {
            tracing::warn!(%err, "failed to clear stored session");
            self.notify(Notification::warning(err.to_string()));
        }
        tracing::info!("wallet disconnected");
        self.notify(Notification::info("Wallet disconnected"));
        self.publish();
    }

    fn refresh_winners(&mut self) {
        let bound = lookup_bound(self.engine.as_ref().map_or(0, |e| e.players().len()));
        let chain = self.chain.clone();
        let events = self.events_tx.clone();
        self.spawn_task(async move {
            let winners = fetch_winners(&*chain, bound).await;
            let _ = events.send(EngineEvent::WinnersFetched(winners));
        });
    }

    fn schedule_winners_refresh(&mut self) {
        let delay = self.winners_refresh_delay;
        let events = self.events_tx.clone();
        self.spawn_task(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(EngineEvent::WinnersRefreshDue);
        });
    }

    fn spawn_block_pump(&mut self, mut subscription: Subscription<u64>) {
        let events = self.events_tx.clone();
        self.spawn_task(async move {
            while let Some(item) = subscription.next().await {
                let event = match item {
                    Ok(block) => EngineEvent::BlockTick(block),
                    Err(err) => {
                        let _ = events.send(EngineEvent::BlockStreamFailed(err));
                        return;
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            let _ = events.send(EngineEvent::BlockStreamFailed(Error::subscription(
                "block stream closed",
            )));
        });
    }

    /// Listens for the first `kind` log only, then unsubscribes.
    fn spawn_one_shot(&mut self, kind: GameEventKind) {
        let chain = self.chain.clone();
        let events = self.events_tx.clone();
        self.spawn_task(async move {
            let mut subscription = match chain.subscribe_event(kind).await {
                Ok(subscription) => subscription,
                Err(error) => {
                    let _ = events.send(EngineEvent::SubscriptionFailed { kind, error });
                    return;
                }
            };
            let event = match subscription.next().await {
                Some(Ok(log)) => EngineEvent::SubscriptionLog(log),
                Some(Err(error)) => EngineEvent::SubscriptionFailed { kind, error },
                None => return,
            };
            subscription.unsubscribe();
            let _ = events.send(event);
        });
    }

    fn spawn_task<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(tokio::spawn(task));
    }

    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn snapshot(&self) -> GameSnapshot {
        let mut snapshot = GameSnapshot {
            session: self.session.session().clone(),
            is_contract_owner: self.session.is_contract_owner(),
            winners: self.winners.winners().to_vec(),
            actions: self.actions.clone(),
            provider_notice: self.provider_notice.clone(),
            ..GameSnapshot::default()
        };
        if let Some(constants) = &self.constants {
            snapshot.min_num_players = Some(constants.min_num_players);
            snapshot.participation_fee = Some(constants.participation_fee);
        }
        if let Some(engine) = &self.engine {
            snapshot.current_block = engine.current_block();
            snapshot.window = engine.window();
            snapshot.phase = engine.phase();
            snapshot.blocks_remaining = engine.blocks_remaining();
            snapshot.progress = engine.progress();
            snapshot.winning_guess = engine.winning_guess();
            snapshot.players = engine.players().iter().copied().collect();
        }
        snapshot
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn notify(&self, notification: Notification) {
        tracing::debug!(%notification, "notify");
        let _ = self.notifications.send(notification);
    }
}

fn unavailable(err: Error) -> Error {
    match err {
        Error::ProviderUnavailable(_) => err,
        other => Error::ProviderUnavailable(other.to_string()),
    }
}

//! In-memory stand-ins for the node, the wallet and the session file.

use crate::{
    Address,
    Error,
    Result,
    TxHash,
    U256,
    chain::{
        ChainClient,
        EventId,
        GameCall,
        GameEvent,
        GameEventKind,
        GameLog,
        Subscription,
        TxOptions,
        TxReceipt,
        sort_logs,
    },
    session::SessionPersistence,
    wallet::WalletProvider,
};
use session_store::StoredSession;
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    atomic::{
        AtomicUsize,
        Ordering,
    },
};
use tokio::sync::mpsc;

pub fn game_log(block_number: u64, log_index: u64, event: GameEvent) -> GameLog {
    GameLog {
        id: EventId {
            tx_hash: TxHash::from_low_u64_be(block_number * 1_000 + log_index + 1),
            log_index,
        },
        block_number,
        event,
    }
}

pub fn game_started(block_number: u64) -> GameLog {
    game_log(
        block_number,
        0,
        GameEvent::GameStarted {
            timestamp: U256::from(block_number),
        },
    )
}

#[derive(Clone, Debug)]
pub struct SentTransaction {
    pub from: Address,
    pub call: GameCall,
    pub options: TxOptions,
    pub tx_hash: TxHash,
}

struct FakeChainState {
    block_number: u64,
    owner: Address,
    submission_period: u64,
    reveal_period: u64,
    min_num_players: u64,
    participation_fee: U256,
    gas_estimate: U256,
    winners: Vec<Address>,
    winner_lookups: u64,
    logs: Vec<GameLog>,
    query_calls: usize,
    fail_queries: bool,
    unavailable: bool,
    block_subscribers: Vec<mpsc::UnboundedSender<Result<u64>>>,
    event_subscribers: Vec<(GameEventKind, mpsc::UnboundedSender<Result<GameLog>>)>,
    sent: Vec<SentTransaction>,
    receipt_block: Option<u64>,
    fail_next_send: Option<String>,
    revert_receipts: bool,
}

impl Default for FakeChainState {
    fn default() -> Self {
        Self {
            block_number: 0,
            owner: Address::from_low_u64_be(0xa),
            submission_period: 10,
            reveal_period: 5,
            min_num_players: 2,
            participation_fee: U256::from(1_000u64),
            gas_estimate: U256::from(100_000u64),
            winners: Vec::new(),
            winner_lookups: 0,
            logs: Vec::new(),
            query_calls: 0,
            fail_queries: false,
            unavailable: false,
            block_subscribers: Vec::new(),
            event_subscribers: Vec::new(),
            sent: Vec::new(),
            receipt_block: None,
            fail_next_send: None,
            revert_receipts: false,
        }
    }
}

/// A scripted node. Clones share state, so a test keeps one handle to push
/// blocks and logs while the coordinator owns another.
#[derive(Clone, Default)]
pub struct FakeChainClient {
    state: Arc<Mutex<FakeChainState>>,
}

impl FakeChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeChainState> {
        self.state.lock().unwrap()
    }

    pub fn set_block_number(&self, block_number: u64) {
        self.state().block_number = block_number;
    }

    pub fn set_owner(&self, owner: Address) {
        self.state().owner = owner;
    }

    pub fn set_periods(&self, submission: u64, reveal: u64) {
        let mut state = self.state();
        state.submission_period = submission;
        state.reveal_period = reveal;
    }

    pub fn set_winners(&self, winners: Vec<Address>) {
        self.state().winners = winners;
    }

    pub fn set_receipt_block(&self, block_number: u64) {
        self.state().receipt_block = Some(block_number);
    }

    pub fn set_unavailable(&self) {
        self.state().unavailable = true;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state().fail_queries = fail;
    }

    pub fn fail_next_send(&self, reason: impl Into<String>) {
        self.state().fail_next_send = Some(reason.into());
    }

    pub fn revert_receipts(&self, revert: bool) {
        self.state().revert_receipts = revert;
    }

    /// Records a mined log so later queries return it.
    pub fn push_log(&self, log: GameLog) {
        self.state().logs.push(log);
    }

    /// Advances the head and notifies block subscribers.
    pub fn mine_block(&self, block_number: u64) {
        let mut state = self.state();
        state.block_number = state.block_number.max(block_number);
        state
            .block_subscribers
            .retain(|sender| sender.send(Ok(block_number)).is_ok());
    }

    /// Delivers `log` to subscribers of its kind without recording it.
    pub fn emit(&self, log: GameLog) {
        let kind = log.kind();
        let mut state = self.state();
        state.event_subscribers.retain(|(subscribed, sender)| {
            *subscribed != kind || sender.send(Ok(log.clone())).is_ok()
        });
    }

    pub fn break_block_subscription(&self, reason: &str) {
        let mut state = self.state();
        for sender in state.block_subscribers.drain(..) {
            let _ = sender.send(Err(Error::subscription(reason)));
        }
    }

    /// Fails every live subscription to `kind` and drops it.
    pub fn break_event_subscription(&self, kind: GameEventKind, reason: &str) {
        let mut state = self.state();
        state.event_subscribers.retain(|(subscribed, sender)| {
            if *subscribed != kind {
                return true;
            }
            let _ = sender.send(Err(Error::subscription(reason)));
            false
        });
    }

    pub fn event_subscriber_count(&self, kind: GameEventKind) -> usize {
        self.state()
            .event_subscribers
            .iter()
            .filter(|(subscribed, sender)| *subscribed == kind && !sender.is_closed())
            .count()
    }

    pub fn sent_transactions(&self) -> Vec<SentTransaction> {
        self.state().sent.clone()
    }

    pub fn winner_lookups(&self) -> u64 {
        self.state().winner_lookups
    }

    pub fn query_calls(&self) -> usize {
        self.state().query_calls
    }

    fn check_available(&self) -> Result<()> {
        if self.state().unavailable {
            return Err(Error::ProviderUnavailable("node unreachable".to_string()));
        }
        Ok(())
    }
}

impl ChainClient for FakeChainClient {
    async fn current_block_number(&self) -> Result<u64> {
        self.check_available()?;
        Ok(self.state().block_number)
    }

    async fn owner(&self) -> Result<Address> {
        self.check_available()?;
        Ok(self.state().owner)
    }

    async fn submission_period(&self) -> Result<u64> {
        self.check_available()?;
        Ok(self.state().submission_period)
    }

    async fn reveal_period(&self) -> Result<u64> {
        self.check_available()?;
        Ok(self.state().reveal_period)
    }

    async fn min_num_players(&self) -> Result<u64> {
        Ok(self.state().min_num_players)
    }

    async fn participation_fee(&self) -> Result<U256> {
        Ok(self.state().participation_fee)
    }

    async fn winning_address(&self, index: u64) -> Result<Address> {
        let mut state = self.state();
        state.winner_lookups += 1;
        let position = usize::try_from(index).map_err(Error::provider)?;
        state
            .winners
            .get(position)
            .copied()
            .ok_or_else(|| Error::Provider("execution reverted".to_string()))
    }

    async fn query_events(
        &self,
        kind: Option<GameEventKind>,
        from: u64,
        to: u64,
    ) -> Result<Vec<GameLog>> {
        let mut state = self.state();
        state.query_calls += 1;
        if state.fail_queries {
            return Err(Error::Provider("eth_getLogs failed".to_string()));
        }
        let mut logs: Vec<GameLog> = state
            .logs
            .iter()
            .filter(|log| kind.is_none_or(|kind| log.kind() == kind))
            .filter(|log| (from..=to).contains(&log.block_number))
            .cloned()
            .collect();
        sort_logs(&mut logs);
        Ok(logs)
    }

    async fn subscribe_new_blocks(&self) -> Result<Subscription<u64>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state().block_subscribers.push(sender);
        Ok(Subscription::from_receiver(receiver))
    }

    async fn subscribe_event(&self, kind: GameEventKind) -> Result<Subscription<GameLog>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state().event_subscribers.push((kind, sender));
        Ok(Subscription::from_receiver(receiver))
    }

    async fn estimate_gas(
        &self,
        _from: Address,
        _call: &GameCall,
        _value: Option<U256>,
    ) -> Result<U256> {
        Ok(self.state().gas_estimate)
    }

    async fn send_transaction(
        &self,
        from: Address,
        call: &GameCall,
        options: TxOptions,
    ) -> Result<TxHash> {
        let mut state = self.state();
        if let Some(reason) = state.fail_next_send.take() {
            return Err(Error::Transaction(reason));
        }
        let tx_hash = TxHash::from_low_u64_be(0xfeed_0000 + state.sent.len() as u64);
        state.sent.push(SentTransaction {
            from,
            call: call.clone(),
            options,
            tx_hash,
        });
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        let state = self.state();
        if state.revert_receipts {
            return Err(Error::Transaction(format!(
                "transaction {tx_hash:?} reverted"
            )));
        }
        Ok(TxReceipt {
            tx_hash,
            block_number: state.receipt_block.unwrap_or(state.block_number),
        })
    }
}

/// A wallet that hands out fixed accounts, or refuses.
#[derive(Clone, Default)]
pub struct FakeWallet {
    accounts: Vec<Address>,
    rejects: bool,
    unlocked: Arc<Mutex<bool>>,
    requests: Arc<AtomicUsize>,
}

impl FakeWallet {
    pub fn with_accounts(accounts: Vec<Address>) -> Self {
        Self {
            accounts,
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            rejects: true,
            ..Self::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn is_unlocked(&self) -> bool {
        *self.unlocked.lock().unwrap()
    }
}

impl WalletProvider for FakeWallet {
    async fn request_accounts(&self, _passphrase: String) -> Result<Vec<Address>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.rejects {
            return Err(Error::UserRejected("User rejected the request".to_string()));
        }
        *self.unlocked.lock().unwrap() = true;
        Ok(self.accounts.clone())
    }

    fn accounts(&self) -> Vec<Address> {
        if self.is_unlocked() {
            self.accounts.clone()
        } else {
            Vec::new()
        }
    }

    fn lock(&self) {
        *self.unlocked.lock().unwrap() = false;
    }
}

/// Session slot kept in memory; clones share it, which stands in for a
/// restart reading back the same file.
#[derive(Clone, Default)]
pub struct InMemorySessionPersistence {
    slot: Arc<Mutex<Option<StoredSession>>>,
}

impl InMemorySessionPersistence {
    pub fn with_session(stored: StoredSession) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(stored))),
        }
    }

    pub fn stored(&self) -> Option<StoredSession> {
        self.slot.lock().unwrap().clone()
    }
}

impl SessionPersistence for InMemorySessionPersistence {
    fn load(&self) -> Result<Option<StoredSession>> {
        Ok(self.stored())
    }

    fn save(&self, stored: &StoredSession) -> Result<()> {
        *self.slot.lock().unwrap() = Some(stored.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap() = None;
        Ok(())
    }
}

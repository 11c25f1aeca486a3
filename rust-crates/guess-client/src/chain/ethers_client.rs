//! [`ChainClient`] over an `ethers` WebSocket provider.

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
    config::ClientConfig,
    wallet::SignerSlot,
};
use ethers::{
    abi::RawLog,
    contract::{
        EthEvent,
        EthLogDecode,
    },
    middleware::SignerMiddleware,
    providers::{
        Middleware,
        PendingTransaction,
        Provider,
        Ws,
    },
    signers::Signer,
    types::{
        Bytes,
        Filter,
        H256,
        Log,
        TransactionRequest,
        U64,
        ValueOrArray,
        transaction::eip2718::TypedTransaction,
    },
};
use futures::StreamExt;
use generated_abi::{
    AllGuessesSubmittedFilter,
    GameStartedFilter,
    GuessSubmittedFilter,
    GuessTheNumberGame,
    GuessTheNumberGameEvents,
    WinningGuessCalculatedFilter,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::sync::{
    mpsc,
    oneshot,
};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct EthersChainClient {
    provider: Provider<Ws>,
    contract: GuessTheNumberGame<Provider<Ws>>,
    address: Address,
    chain_id: u64,
    signer: SignerSlot,
}

impl EthersChainClient {
    /// Opens the WebSocket and binds the game contract. Any failure here
    /// means the node is unreachable.
    pub async fn connect(config: &ClientConfig, signer: SignerSlot) -> Result<Self> {
        let provider = Provider::<Ws>::connect(config.ws_url.as_str())
            .await
            .map_err(|e| {
                Error::ProviderUnavailable(format!(
                    "cannot reach node at {}: {e}",
                    config.ws_url
                ))
            })?
            .interval(RECEIPT_POLL_INTERVAL);
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("eth_chainId failed: {e}")))?
            .as_u64();
        let contract =
            generated_abi::game_contract(config.contract_address, Arc::new(provider.clone()));
        tracing::info!(
            ws_url = %config.ws_url,
            chain_id,
            contract = ?config.contract_address,
            "connected to node"
        );
        Ok(Self {
            provider,
            contract,
            address: config.contract_address,
            chain_id,
            signer,
        })
    }

    fn calldata(&self, call: &GameCall) -> Result<Bytes> {
        let function_call = match call {
            GameCall::StartGame => self.contract.start_game(),
            GameCall::EnterGuess { commitment } => self.contract.enter_guess(*commitment),
            GameCall::RevealSaltAndGuess { guess, salt } => {
                self.contract.reveal_salt_and_guess(*guess, *salt)
            }
            GameCall::CalculateWinningGuess => self.contract.calculate_winning_guess(),
            GameCall::SelectWinner => self.contract.select_winner(),
        };
        function_call.calldata().ok_or_else(|| {
            Error::Transaction(format!("no calldata for {}", call.method_name()))
        })
    }

    fn transaction(
        &self,
        from: Address,
        call: &GameCall,
        options: TxOptions,
    ) -> Result<TypedTransaction> {
        let mut request = TransactionRequest::new()
            .from(from)
            .to(self.address)
            .data(self.calldata(call)?);
        if let Some(gas) = options.gas {
            request = request.gas(gas);
        }
        if let Some(value) = options.value {
            request = request.value(value);
        }
        Ok(request.into())
    }

    fn filter(&self, kinds: &[GameEventKind]) -> Filter {
        let topics = kinds
            .iter()
            .map(|kind| Some(event_signature(*kind)))
            .collect::<Vec<_>>();
        Filter::new()
            .address(self.address)
            .topic0(ValueOrArray::Array(topics))
    }
}

const ALL_KINDS: [GameEventKind; 4] = [
    GameEventKind::GameStarted,
    GameEventKind::AllGuessesSubmitted,
    GameEventKind::GuessSubmitted,
    GameEventKind::WinningGuessCalculated,
];

fn event_signature(kind: GameEventKind) -> H256 {
    match kind {
        GameEventKind::GameStarted => GameStartedFilter::signature(),
        GameEventKind::AllGuessesSubmitted => AllGuessesSubmittedFilter::signature(),
        GameEventKind::GuessSubmitted => GuessSubmittedFilter::signature(),
        GameEventKind::WinningGuessCalculated => WinningGuessCalculatedFilter::signature(),
    }
}

/// `None` for pending or removed logs, and for logs that do not decode as a
/// game event.
fn to_game_log(log: &Log) -> Option<GameLog> {
    if log.removed == Some(true) {
        return None;
    }
    let tx_hash = log.transaction_hash?;
    let log_index = log.log_index?.low_u64();
    let block_number = log.block_number?.as_u64();
    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    let event = match GuessTheNumberGameEvents::decode_log(&raw) {
        Ok(GuessTheNumberGameEvents::GameStartedFilter(e)) => GameEvent::GameStarted {
            timestamp: e.timestamp,
        },
        Ok(GuessTheNumberGameEvents::AllGuessesSubmittedFilter(_)) => {
            GameEvent::AllGuessesSubmitted
        }
        Ok(GuessTheNumberGameEvents::GuessSubmittedFilter(e)) => {
            GameEvent::GuessSubmitted { player: e.player }
        }
        Ok(GuessTheNumberGameEvents::WinningGuessCalculatedFilter(e)) => {
            GameEvent::WinningGuessCalculated {
                winning_guess: e.winning_guess,
            }
        }
        Err(err) => {
            tracing::warn!(?tx_hash, log_index, %err, "undecodable game log skipped");
            return None;
        }
    };
    Some(GameLog {
        id: EventId { tx_hash, log_index },
        block_number,
        event,
    })
}

fn to_u64(value: U256, what: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(Error::Provider(format!("{what} does not fit in u64: {value}")));
    }
    Ok(value.as_u64())
}

impl ChainClient for EthersChainClient {
    async fn current_block_number(&self) -> Result<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(Error::provider)?;
        Ok(number.as_u64())
    }

    async fn owner(&self) -> Result<Address> {
        self.contract.owner().call().await.map_err(Error::provider)
    }

    async fn submission_period(&self) -> Result<u64> {
        let value = self
            .contract
            .submission_period()
            .call()
            .await
            .map_err(Error::provider)?;
        to_u64(value, "submissionPeriod")
    }

    async fn reveal_period(&self) -> Result<u64> {
        let value = self
            .contract
            .reveal_period()
            .call()
            .await
            .map_err(Error::provider)?;
        to_u64(value, "revealPeriod")
    }

    async fn min_num_players(&self) -> Result<u64> {
        let value = self
            .contract
            .min_num_players()
            .call()
            .await
            .map_err(Error::provider)?;
        to_u64(value, "minNumPlayers")
    }

    async fn participation_fee(&self) -> Result<U256> {
        self.contract
            .participation_fee()
            .call()
            .await
            .map_err(Error::provider)
    }

    async fn winning_address(&self, index: u64) -> Result<Address> {
        self.contract
            .winning_addresses(U256::from(index))
            .call()
            .await
            .map_err(Error::provider)
    }

    async fn query_events(
        &self,
        kind: Option<GameEventKind>,
        from: u64,
        to: u64,
    ) -> Result<Vec<GameLog>> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => ALL_KINDS.to_vec(),
        };
        let filter = self.filter(&kinds).from_block(from).to_block(to);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(Error::provider)?;
        let mut decoded: Vec<GameLog> = logs.iter().filter_map(to_game_log).collect();
        sort_logs(&mut decoded);
        tracing::trace!(from, to, found = decoded.len(), "game logs queried");
        Ok(decoded)
    }

    async fn subscribe_new_blocks(&self) -> Result<Subscription<u64>> {
        let provider = self.provider.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut stream = match provider.subscribe_blocks().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(Error::subscription(err)));
                    return;
                }
            };
            while let Some(block) = stream.next().await {
                let Some(number) = block.number else {
                    continue;
                };
                if sender.send(Ok(number.as_u64())).is_err() {
                    return;
                }
            }
            let _ = sender.send(Err(Error::subscription("node closed the block stream")));
        });
        ready_rx
            .await
            .map_err(|_| Error::subscription("block subscription task ended"))??;
        Ok(Subscription::new(receiver, task))
    }

    async fn subscribe_event(&self, kind: GameEventKind) -> Result<Subscription<GameLog>> {
        let provider = self.provider.clone();
        let filter = self.filter(&[kind]);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut stream = match provider.subscribe_logs(&filter).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(Error::subscription(err)));
                    return;
                }
            };
            while let Some(log) = stream.next().await {
                let Some(game_log) = to_game_log(&log) else {
                    continue;
                };
                if sender.send(Ok(game_log)).is_err() {
                    return;
                }
            }
            let _ = sender.send(Err(Error::subscription(format!(
                "node closed the {kind} stream"
            ))));
        });
        ready_rx
            .await
            .map_err(|_| Error::subscription(format!("{kind} subscription task ended")))??;
        Ok(Subscription::new(receiver, task))
    }

    async fn estimate_gas(
        &self,
        from: Address,
        call: &GameCall,
        value: Option<U256>,
    ) -> Result<U256> {
        let tx = self.transaction(from, call, TxOptions { gas: None, value })?;
        self.provider
            .estimate_gas(&tx, None)
            .await
            .map_err(|e| Error::Transaction(format!("{} would fail: {e}", call.method_name())))
    }

    async fn send_transaction(
        &self,
        from: Address,
        call: &GameCall,
        options: TxOptions,
    ) -> Result<TxHash> {
        let wallet = self.signer.signer_for(from).ok_or_else(|| {
            Error::transaction("wallet is locked; reconnect to sign")
        })?;
        let client =
            SignerMiddleware::new(self.provider.clone(), wallet.with_chain_id(self.chain_id));
        let tx = self.transaction(from, call, options)?;
        let pending = client
            .send_transaction(tx, None)
            .await
            .map_err(Error::transaction)?;
        let tx_hash = pending.tx_hash();
        tracing::info!(method = call.method_name(), ?tx_hash, "transaction submitted");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        let receipt = PendingTransaction::new(tx_hash, &self.provider)
            .await
            .map_err(Error::transaction)?
            .ok_or_else(|| {
                Error::Transaction(format!("transaction {tx_hash:?} was dropped"))
            })?;
        if receipt.status == Some(U64::zero()) {
            return Err(Error::Transaction(format!(
                "transaction {tx_hash:?} reverted"
            )));
        }
        let block_number = receipt
            .block_number
            .map(|number| number.as_u64())
            .ok_or_else(|| {
                Error::Transaction(format!("receipt for {tx_hash:?} has no block"))
            })?;
        Ok(TxReceipt {
            tx_hash,
            block_number,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use ethers::abi::{
        Token,
        encode,
    };

    fn mined_log(topics: Vec<H256>, data: Vec<u8>) -> Log {
        Log {
            topics,
            data: data.into(),
            transaction_hash: Some(H256::from_low_u64_be(0xabc)),
            log_index: Some(U256::from(2u64)),
            block_number: Some(U64::from(42u64)),
            ..Log::default()
        }
    }

    #[test]
    fn to_game_log__winning_guess__decodes_payload_and_identity() {
        // given
        let log = mined_log(
            vec![event_signature(GameEventKind::WinningGuessCalculated)],
            encode(&[Token::Uint(U256::from(321u64))]),
        );

        // when
        let decoded = to_game_log(&log).unwrap();

        // then
        assert_eq!(
            decoded.event,
            GameEvent::WinningGuessCalculated {
                winning_guess: U256::from(321u64)
            }
        );
        assert_eq!(decoded.block_number, 42);
        assert_eq!(decoded.id.log_index, 2);
        assert_eq!(decoded.id.tx_hash, H256::from_low_u64_be(0xabc));
    }

    #[test]
    fn to_game_log__pending_log__is_skipped() {
        // given
        let mut log = mined_log(
            vec![event_signature(GameEventKind::AllGuessesSubmitted)],
            Vec::new(),
        );
        log.block_number = None;

        // then
        assert_eq!(to_game_log(&log), None);
    }

    #[test]
    fn to_game_log__removed_log__is_skipped() {
        // given
        let mut log = mined_log(
            vec![event_signature(GameEventKind::AllGuessesSubmitted)],
            Vec::new(),
        );
        log.removed = Some(true);

        // then
        assert_eq!(to_game_log(&log), None);
    }

    #[test]
    fn to_game_log__foreign_topic__is_skipped() {
        let log = mined_log(vec![H256::repeat_byte(0x11)], Vec::new());
        assert_eq!(to_game_log(&log), None);
    }

    #[test]
    fn event_signature__matches_generated_binding() {
        let signatures: Vec<H256> = ALL_KINDS.iter().map(|k| event_signature(*k)).collect();
        assert_eq!(signatures, generated_abi::game_event_signatures().to_vec());
    }

    #[test]
    fn to_u64__oversized_value__is_provider_error() {
        let result = to_u64(U256::MAX, "submissionPeriod");
        assert!(matches!(result, Err(Error::Provider(_))));
    }
}

#![allow(non_snake_case)]

use super::*;
use crate::{
    U256,
    chain::GameEvent,
    notification::NotificationLevel,
    phase::{
        GameProgress,
        Phase,
    },
    test_helpers::{
        FakeChainClient,
        FakeWallet,
        InMemorySessionPersistence,
        game_log,
        game_started,
    },
};
use ethers::utils::to_checksum;
use session_store::StoredSession;

type TestCoordinator =
    GameCoordinator<FakeChainClient, FakeWallet, InMemorySessionPersistence>;

fn owner() -> Address {
    Address::from_low_u64_be(0xa)
}

fn config() -> ClientConfig {
    ClientConfig::new("ws://localhost:8545", Address::from_low_u64_be(0xc0ffee))
}

fn owner_session() -> InMemorySessionPersistence {
    InMemorySessionPersistence::with_session(StoredSession {
        accounts: vec![to_checksum(&owner(), None)],
        connected: true,
    })
}

fn coordinator(
    chain: &FakeChainClient,
    wallet: FakeWallet,
    persistence: InMemorySessionPersistence,
) -> (TestCoordinator, CoordinatorHandle) {
    GameCoordinator::new(chain.clone(), wallet, persistence, &config())
}

/// Applies the next report from a spawned task.
async fn pump(coordinator: &mut TestCoordinator) {
    let event = coordinator.events_rx.recv().await.unwrap();
    coordinator.handle_event(event);
}

fn drain(handle: &mut CoordinatorHandle) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(notification) = handle.notifications.try_recv() {
        notifications.push(notification);
    }
    notifications
}

fn messages(notifications: &[Notification]) -> Vec<&str> {
    notifications.iter().map(|n| n.message.as_str()).collect()
}

/// Lets spawned tasks run until `ready` holds or the budget runs out.
async fn settle(ready: impl Fn() -> bool) {
    for _ in 0..64 {
        if ready() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn start__round_in_flight__is_recovered_from_logs() {
    // given
    let chain = FakeChainClient::new();
    chain.set_block_number(100);
    chain.push_log(game_started(95));
    chain.push_log(game_log(
        97,
        0,
        GameEvent::GuessSubmitted {
            player: Address::from_low_u64_be(7),
        },
    ));
    let (mut coordinator, handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());

    // when
    coordinator.start().await.unwrap();

    // then
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.current_block, Some(100));
    assert_eq!(snapshot.window.map(|w| w.start_block), Some(95));
    assert_eq!(snapshot.phase, Phase::Submission);
    assert_eq!(snapshot.blocks_remaining, Some(5));
    assert!(snapshot.progress.is_game_started);
    assert_eq!(snapshot.players, vec![Address::from_low_u64_be(7)]);
    assert_eq!(snapshot.min_num_players, Some(2));
}

#[tokio::test]
async fn handle_event__same_log_from_poll_and_subscription__notifies_once() {
    // given
    let chain = FakeChainClient::new();
    chain.set_block_number(100);
    chain.push_log(game_started(95));
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());
    coordinator.start().await.unwrap();
    drain(&mut handle);
    let log = game_log(101, 4, GameEvent::AllGuessesSubmitted);

    // when
    coordinator.handle_event(EngineEvent::PolledLogs {
        block: 101,
        result: Ok(vec![log.clone()]),
    });
    coordinator.handle_event(EngineEvent::SubscriptionLog(log));

    // then
    let notifications = drain(&mut handle);
    assert_eq!(messages(&notifications), vec!["All guesses are submitted"]);
    assert!(handle.snapshot().progress.is_guesses_submitted);
}

#[tokio::test]
async fn start__persisted_owner_session__restores_owner_without_prompt() {
    // given
    let chain = FakeChainClient::new();
    chain.set_owner(owner());
    let wallet = FakeWallet::with_accounts(vec![owner()]);
    let (mut coordinator, handle) = coordinator(&chain, wallet.clone(), owner_session());

    // when
    coordinator.start().await.unwrap();

    // then
    let snapshot = handle.snapshot();
    assert!(snapshot.session.connected);
    assert!(!snapshot.session.connecting);
    assert!(snapshot.is_contract_owner);
    assert_eq!(wallet.request_count(), 0);
}

#[tokio::test]
async fn start__after_disconnect__is_disconnected_and_not_owner() {
    // given
    let chain = FakeChainClient::new();
    chain.set_owner(owner());
    let backing = InMemorySessionPersistence::default();
    let wallet = FakeWallet::with_accounts(vec![owner()]);
    let (mut first, _first_handle) = coordinator(&chain, wallet.clone(), backing.clone());
    first.start().await.unwrap();
    let _ = first.handle_command(Command::Connect {
        passphrase: "pw".to_string(),
    });
    pump(&mut first).await;
    assert!(first.session.is_contract_owner());
    let _ = first.handle_command(Command::Disconnect);

    // when
    let (mut restarted, handle) = coordinator(&chain, wallet.clone(), backing);
    restarted.start().await.unwrap();

    // then
    let snapshot = handle.snapshot();
    assert!(!snapshot.session.connected);
    assert!(!snapshot.is_contract_owner);
    assert!(!wallet.is_unlocked());
}

#[tokio::test]
async fn handle_command__rejected_connect__surfaces_error_and_stays_disconnected() {
    // given
    let chain = FakeChainClient::new();
    let (mut coordinator, mut handle) = coordinator(
        &chain,
        FakeWallet::rejecting(),
        InMemorySessionPersistence::default(),
    );
    coordinator.start().await.unwrap();
    drain(&mut handle);

    // when
    let _ = coordinator.handle_command(Command::Connect {
        passphrase: "wrong".to_string(),
    });
    let connecting = handle.snapshot().session.connecting;
    pump(&mut coordinator).await;

    // then
    let notifications = drain(&mut handle);
    assert!(connecting);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Error);
    let snapshot = handle.snapshot();
    assert!(!snapshot.session.connected);
    assert!(!snapshot.session.connecting);
}

#[tokio::test]
async fn handle_event__block_crosses_submission_end__moves_to_reveal() {
    // given
    let chain = FakeChainClient::new();
    chain.set_block_number(100);
    chain.push_log(game_started(95));
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());
    coordinator.start().await.unwrap();
    drain(&mut handle);

    // when
    coordinator.handle_event(EngineEvent::BlockTick(105));
    pump(&mut coordinator).await;

    // then
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.phase, Phase::Reveal);
    assert_eq!(snapshot.blocks_remaining, Some(5));
    assert_eq!(
        messages(&drain(&mut handle)),
        vec!["The submission phase is over"]
    );
}

#[tokio::test]
async fn handle_event__stale_block_tick__does_not_poll() {
    // given
    let chain = FakeChainClient::new();
    chain.set_block_number(100);
    let (mut coordinator, handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());
    coordinator.start().await.unwrap();
    let queries_after_start = chain.query_calls();

    // when
    coordinator.handle_event(EngineEvent::BlockTick(99));
    tokio::task::yield_now().await;

    // then
    assert_eq!(handle.snapshot().current_block, Some(100));
    assert_eq!(chain.query_calls(), queries_after_start);
}

#[tokio::test]
async fn handle_command__start_game_confirmed__opens_window_at_receipt_block() {
    // given
    let chain = FakeChainClient::new();
    chain.set_owner(owner());
    chain.set_block_number(110);
    chain.set_receipt_block(111);
    chain.set_winners(vec![Address::from_low_u64_be(3)]);
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), owner_session());
    coordinator.start().await.unwrap();
    assert_eq!(handle.snapshot().winners.len(), 1);
    drain(&mut handle);

    // when
    let _ = coordinator.handle_command(Command::StartGame);
    let launched = handle.snapshot().action_state(ActionKind::StartGame).clone();
    pump(&mut coordinator).await;
    pump(&mut coordinator).await;

    // then
    let snapshot = handle.snapshot();
    assert_eq!(launched, ActionState::Pending { tx_hash: None });
    assert_eq!(
        snapshot.action_state(ActionKind::StartGame),
        &ActionState::Confirmed { block: 111 }
    );
    assert_eq!(snapshot.window.map(|w| w.start_block), Some(111));
    assert_eq!(snapshot.phase, Phase::Submission);
    assert!(snapshot.progress.is_game_started);
    assert!(snapshot.winners.is_empty());
    assert_eq!(
        messages(&drain(&mut handle)),
        vec!["Waiting for the game to start", "The game is started"]
    );
}

#[tokio::test]
async fn handle_command__send_fails__marks_action_failed_only() {
    // given
    let chain = FakeChainClient::new();
    chain.set_owner(owner());
    chain.set_block_number(110);
    chain.fail_next_send("insufficient funds");
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), owner_session());
    coordinator.start().await.unwrap();
    let before = handle.snapshot().progress;
    drain(&mut handle);

    // when
    let _ = coordinator.handle_command(Command::StartGame);
    pump(&mut coordinator).await;

    // then
    let snapshot = handle.snapshot();
    assert!(matches!(
        snapshot.action_state(ActionKind::StartGame),
        ActionState::Failed { .. }
    ));
    assert_eq!(snapshot.progress, before);
    let notifications = drain(&mut handle);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Error);
    assert_eq!(notifications[0].action, Some(ActionKind::StartGame));
}

#[tokio::test(start_paused = true)]
async fn handle_command__select_winner_confirmed__settles_round_and_refreshes_winners() {
    // given
    let chain = FakeChainClient::new();
    chain.set_owner(owner());
    chain.set_block_number(112);
    chain.push_log(game_started(100));
    chain.push_log(game_log(
        111,
        0,
        GameEvent::WinningGuessCalculated {
            winning_guess: U256::from(500u64),
        },
    ));
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), owner_session());
    coordinator.start().await.unwrap();
    assert!(handle.snapshot().progress.is_winning_guess_calculated);
    assert_eq!(handle.snapshot().winning_guess, Some(U256::from(500u64)));
    let winners = vec![Address::from_low_u64_be(1), Address::from_low_u64_be(2)];
    chain.set_winners(winners.clone());
    drain(&mut handle);

    // when
    let _ = coordinator.handle_command(Command::SelectWinner);
    pump(&mut coordinator).await; // pending
    pump(&mut coordinator).await; // settled
    let settled = handle.snapshot();
    pump(&mut coordinator).await; // refresh due
    pump(&mut coordinator).await; // fetched

    // then
    assert_eq!(settled.progress, GameProgress::default());
    assert!(settled.winners.is_empty());
    assert_eq!(handle.snapshot().winners, winners);
    assert!(messages(&drain(&mut handle)).contains(&"The winner is selected"));
}

#[tokio::test]
async fn handle_command__calculate_winning_guess__listens_before_receipt() {
    // given
    let chain = FakeChainClient::new();
    chain.set_owner(owner());
    chain.set_block_number(115);
    chain.push_log(game_started(100));
    chain.push_log(game_log(108, 0, GameEvent::AllGuessesSubmitted));
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), owner_session());
    coordinator.start().await.unwrap();
    assert!(handle.snapshot().is_available(ActionKind::CalculateWinningGuess));
    drain(&mut handle);

    // when
    let _ = coordinator.handle_command(Command::CalculateWinningGuess);
    pump(&mut coordinator).await; // pending
    pump(&mut coordinator).await; // settled
    let listening_at_receipt =
        chain.event_subscriber_count(GameEventKind::WinningGuessCalculated);
    chain.emit(game_log(
        115,
        0,
        GameEvent::WinningGuessCalculated {
            winning_guess: U256::from(42u64),
        },
    ));
    pump(&mut coordinator).await;

    // then
    assert_eq!(listening_at_receipt, 1);
    assert_eq!(
        chain.event_subscriber_count(GameEventKind::WinningGuessCalculated),
        0
    );
    let snapshot = handle.snapshot();
    assert!(snapshot.progress.is_winning_guess_calculated);
    assert!(!snapshot.progress.is_guesses_submitted);
    assert_eq!(snapshot.winning_guess, Some(U256::from(42u64)));
    assert_eq!(
        messages(&drain(&mut handle)),
        vec![
            "Waiting for calculating winnings",
            "The winning guess is calculated"
        ]
    );
}

#[tokio::test]
async fn handle_event__failed_event_poll__is_retried_on_next_block() {
    // given
    let chain = FakeChainClient::new();
    chain.set_block_number(100);
    chain.push_log(game_started(95));
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());
    coordinator.start().await.unwrap();
    drain(&mut handle);
    chain.push_log(game_log(101, 4, GameEvent::AllGuessesSubmitted));
    chain.fail_queries(true);

    // when
    chain.mine_block(101);
    pump(&mut coordinator).await; // tick
    pump(&mut coordinator).await; // failed poll
    let after_failure = handle.snapshot().progress.is_guesses_submitted;
    chain.fail_queries(false);
    chain.mine_block(102);
    pump(&mut coordinator).await; // tick
    pump(&mut coordinator).await; // poll of 101..=102

    // then
    assert!(!after_failure);
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.current_block, Some(102));
    assert!(snapshot.progress.is_guesses_submitted);
    assert_eq!(
        messages(&drain(&mut handle)),
        vec!["All guesses are submitted"]
    );
}

#[tokio::test]
async fn start__all_guesses_listener__unsubscribes_after_first_log() {
    // given
    let chain = FakeChainClient::new();
    chain.set_block_number(100);
    chain.push_log(game_started(95));
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());
    coordinator.start().await.unwrap();
    settle(|| chain.event_subscriber_count(GameEventKind::AllGuessesSubmitted) == 1).await;
    let listening = chain.event_subscriber_count(GameEventKind::AllGuessesSubmitted);
    drain(&mut handle);

    // when
    chain.emit(game_log(101, 4, GameEvent::AllGuessesSubmitted));
    pump(&mut coordinator).await;

    // then
    assert_eq!(listening, 1);
    assert_eq!(
        chain.event_subscriber_count(GameEventKind::AllGuessesSubmitted),
        0
    );
    assert!(handle.snapshot().progress.is_guesses_submitted);
    assert_eq!(
        messages(&drain(&mut handle)),
        vec!["All guesses are submitted"]
    );
}

#[tokio::test]
async fn handle_event__event_subscription_error__is_reported() {
    // given
    let chain = FakeChainClient::new();
    chain.set_block_number(100);
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());
    coordinator.start().await.unwrap();
    settle(|| chain.event_subscriber_count(GameEventKind::AllGuessesSubmitted) == 1).await;
    drain(&mut handle);

    // when
    chain.break_event_subscription(GameEventKind::AllGuessesSubmitted, "socket closed");
    pump(&mut coordinator).await;

    // then
    let notifications = drain(&mut handle);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Error);
    assert_eq!(
        notifications[0].message,
        format!(
            "{} subscription failed: Subscription failed: socket closed",
            GameEventKind::AllGuessesSubmitted
        )
    );
}

#[tokio::test]
async fn block_pump__mined_blocks__drive_phases_until_stream_breaks() {
    // given
    let chain = FakeChainClient::new();
    chain.set_periods(3, 2);
    chain.set_block_number(100);
    chain.push_log(game_started(100));
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());
    coordinator.start().await.unwrap();
    assert_eq!(handle.snapshot().blocks_remaining, Some(3));
    drain(&mut handle);

    // when
    chain.mine_block(103);
    pump(&mut coordinator).await; // tick
    pump(&mut coordinator).await; // poll
    let in_reveal = handle.snapshot();
    chain.break_block_subscription("connection reset");
    pump(&mut coordinator).await;

    // then
    assert_eq!(in_reveal.phase, Phase::Reveal);
    assert_eq!(in_reveal.blocks_remaining, Some(2));
    let notifications = drain(&mut handle);
    assert_eq!(
        messages(&notifications),
        vec![
            "The submission phase is over",
            "Block subscription failed: Subscription failed: connection reset"
        ]
    );
    assert_eq!(notifications[1].level, NotificationLevel::Error);
}

#[tokio::test]
async fn handle_command__enter_guess_while_disconnected__sends_nothing() {
    // given
    let chain = FakeChainClient::new();
    chain.set_block_number(100);
    chain.push_log(game_started(95));
    let (mut coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());
    coordinator.start().await.unwrap();
    drain(&mut handle);
    let input = GuessInput::new(10, U256::from(99u64)).unwrap();

    // when
    let _ = coordinator.handle_command(Command::EnterGuess(input));

    // then
    let notifications = drain(&mut handle);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Warning);
    assert!(chain.sent_transactions().is_empty());
    assert_eq!(
        handle.snapshot().action_state(ActionKind::EnterGuess),
        &ActionState::Idle
    );
}

#[tokio::test]
async fn run__provider_unreachable__publishes_notice_and_stays_inert() {
    // given
    let chain = FakeChainClient::new();
    chain.set_unavailable();
    let (coordinator, mut handle) =
        coordinator(&chain, FakeWallet::default(), InMemorySessionPersistence::default());

    // when
    let task = coordinator.spawn();
    let snapshot = handle
        .snapshots
        .wait_for(|snapshot| snapshot.is_inert())
        .await
        .unwrap()
        .clone();
    handle.send(Command::StartGame).unwrap();
    handle.send(Command::Shutdown).unwrap();
    task.await.unwrap();

    // then
    assert!(snapshot.available_actions().is_empty());
    let levels: Vec<_> = drain(&mut handle).iter().map(|n| n.level).collect();
    assert_eq!(
        levels,
        vec![NotificationLevel::Error, NotificationLevel::Warning]
    );
    assert!(chain.sent_transactions().is_empty());
}

#[tokio::test]
async fn unavailable_handle__shows_notice_and_drops_commands() {
    // given
    let mut handle = CoordinatorHandle::unavailable("node is down");

    // when
    let sent = handle.send(Command::StartGame);

    // then
    assert!(matches!(sent, Err(Error::ProviderUnavailable(_))));
    assert_eq!(
        handle.snapshot().provider_notice.as_deref(),
        Some("node is down")
    );
    let notices = drain(&mut handle);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NotificationLevel::Error);
}

use crate::ui;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use guess_client::{
    chain::ethers_client::EthersChainClient,
    config::ClientConfig,
    coordinator::{
        Command,
        CoordinatorHandle,
        GameCoordinator,
    },
    notification::Notification,
    wallet::SignerSlot,
};
use guess_game::wallets;
use session_store::SessionFile;
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub keystore: Option<String>,
    pub connect_on_start: bool,
}

/// Binds to the node and starts the coordinator. A node that cannot be
/// reached yields a handle that only shows why.
async fn start_coordinator(
    config: &AppConfig,
) -> Result<(CoordinatorHandle, Option<JoinHandle<()>>)> {
    let signer = SignerSlot::default();
    let wallet = wallets::open_keystore(config.keystore.as_deref(), &signer)?;
    let passphrase = match (&wallet, config.connect_on_start) {
        (Some(wallet), true) => Some(wallets::prompt_passphrase(wallet)?),
        _ => None,
    };
    let sessions = SessionFile::open(&config.client.data_dir)
        .map_err(|e| eyre!("Failed to open session store: {e:#}"))?;

    let chain = match EthersChainClient::connect(&config.client, signer).await {
        Ok(chain) => chain,
        Err(err) => {
            tracing::error!(%err, ws_url = %config.client.ws_url, "node is unreachable");
            return Ok((CoordinatorHandle::unavailable(err.to_string()), None));
        }
    };

    let (coordinator, handle) =
        GameCoordinator::new(chain, wallet, sessions, &config.client);
    let task = coordinator.spawn();
    if let Some(passphrase) = passphrase {
        handle
            .send(Command::Connect { passphrase })
            .wrap_err("queueing the startup connect failed")?;
    }
    Ok((handle, Some(task)))
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let (mut handle, coordinator) = start_coordinator(&config).await?;
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    tracing::info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    tracing::info!("UI ready");
    let res = run_loop(&mut handle, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;

    let _ = handle.send(Command::Shutdown);
    if let Some(task) = coordinator {
        if let Err(err) = task.await {
            tracing::warn!(%err, "game coordinator ended abnormally");
        }
    }
    res
}

async fn run_loop(
    handle: &mut CoordinatorHandle,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    tracing::info!("Running app loop");
    let mut snapshot = handle.snapshot();
    let mut snapshots_closed = false;
    let mut notifications_closed = false;
    ui::draw(ui_state, &snapshot).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            changed = handle.snapshots.changed(), if !snapshots_closed => {
                if changed.is_err() {
                    tracing::warn!("game coordinator stopped publishing");
                    snapshots_closed = true;
                    continue;
                }
                snapshot = handle.snapshots.borrow_and_update().clone();
                ui::draw(ui_state, &snapshot)
                    .wrap_err("draw after snapshot update failed")?;
            }
            notification = handle.notifications.recv(), if !notifications_closed => {
                let Some(notification) = notification else {
                    notifications_closed = true;
                    continue;
                };
                ui_state.push_notification(notification);
                ui::draw(ui_state, &snapshot)
                    .wrap_err("draw after notification failed")?;
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, &snapshot, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::Command(command) => {
                        tracing::debug!(command = command.name(), "forwarding command");
                        if let Err(err) = handle.send(command) {
                            ui_state.push_notification(Notification::error(err.to_string()));
                        }
                    }
                    ui::UserEvent::Rejected(message) => {
                        ui_state.push_notification(Notification::warning(message));
                    }
                }
                ui::draw(ui_state, &snapshot).wrap_err("draw after input failed")?;
            }
        }
    }
    Ok(())
}

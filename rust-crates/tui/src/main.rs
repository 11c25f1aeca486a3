use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use guess_client::config::{
    self,
    CONTRACT_ADDRESS_ENV,
    ClientConfig,
    DEFAULT_WS_URL,
};
use guess_game::logging;
use std::path::PathBuf;

mod client;
mod ui;

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: guess-game [--ws-url <url>] [--contract <address>] [--keystore <path>]\n\
         [--data-dir <path>] [--gas-multiplier <percent>] [--connect]\n\
         \n\
         Flags:\n\
           --ws-url <url>              WebSocket endpoint of the node (default {})\n\
           --contract <address>        Game contract address (defaults to ${})\n\
           --keystore <path>           Encrypted JSON keystore used to play\n\
           --data-dir <path>           Session and log directory (default ~/{})\n\
           --gas-multiplier <percent>  Gas limit as a percentage of the estimate (default {})\n\
           --connect                   Ask for the keystore passphrase before the UI starts",
        DEFAULT_WS_URL,
        CONTRACT_ADDRESS_ENV,
        session_store::DEFAULT_DATA_ROOT,
        config::DEFAULT_GAS_MULTIPLIER_PERCENT,
    );
    std::process::exit(0);
}

fn parse_cli_args() -> Result<client::AppConfig> {
    let mut args = std::env::args().skip(1);
    let mut ws_url: Option<String> = None;
    let mut contract: Option<String> = None;
    let mut keystore: Option<String> = None;
    let mut data_dir: Option<String> = None;
    let mut gas_multiplier: Option<u64> = None;
    let mut connect_on_start = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ws-url" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--ws-url requires a URL argument"))?;
                if ws_url.is_some() {
                    return Err(eyre!("--ws-url may only be specified once"));
                }
                ws_url = Some(url);
            }
            "--contract" => {
                let address = args
                    .next()
                    .ok_or_else(|| eyre!("--contract requires an address argument"))?;
                if contract.is_some() {
                    return Err(eyre!("--contract may only be specified once"));
                }
                contract = Some(address);
            }
            "--keystore" => {
                let path = args
                    .next()
                    .ok_or_else(|| eyre!("--keystore requires a path argument"))?;
                if keystore.is_some() {
                    return Err(eyre!("--keystore may only be specified once"));
                }
                keystore = Some(path);
            }
            "--data-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--data-dir requires a path argument"))?;
                if data_dir.is_some() {
                    return Err(eyre!("--data-dir may only be specified once"));
                }
                data_dir = Some(dir);
            }
            "--gas-multiplier" => {
                let raw = args
                    .next()
                    .ok_or_else(|| eyre!("--gas-multiplier requires a percentage"))?;
                let percent: u64 = raw
                    .parse()
                    .wrap_err_with(|| format!("Invalid --gas-multiplier '{raw}'"))?;
                if percent < 100 {
                    return Err(eyre!(
                        "--gas-multiplier must be at least 100 (got {percent})"
                    ));
                }
                gas_multiplier = Some(percent);
            }
            "--connect" => connect_on_start = true,
            "--help" | "-h" => print_usage_and_exit(),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    if connect_on_start && keystore.is_none() {
        return Err(eyre!("--connect needs a keystore; pass --keystore <path>"));
    }

    let contract_address = match contract {
        Some(raw) => config::parse_address(&raw)?,
        None => config::contract_address_from_env()?,
    };
    let mut client = ClientConfig::new(
        ws_url.unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
        contract_address,
    );
    if let Some(percent) = gas_multiplier {
        client.gas.multiplier_percent = percent;
    }
    client.data_dir = resolve_data_dir(data_dir.as_deref())?;

    Ok(client::AppConfig {
        client,
        keystore,
        connect_on_start,
    })
}

fn resolve_data_dir(raw: Option<&str>) -> Result<PathBuf> {
    match raw {
        Some(raw) => Ok(PathBuf::from(shellexpand::tilde(raw).into_owned())),
        None => {
            let home =
                std::env::var("HOME").wrap_err("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(session_store::DEFAULT_DATA_ROOT))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let app_config = parse_cli_args()?;
    let _log_guard = logging::init(&app_config.client.data_dir)?;
    tracing::info!(
        ws_url = %app_config.client.ws_url,
        contract = ?app_config.client.contract_address,
        "starting guess-game client"
    );
    client::run_app(app_config).await
}

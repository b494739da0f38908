use alloy_primitives::U256;
use arcade_session::{
    config::{
        GameConfig,
        SignerConfig,
    },
    controller::GameSessionController,
    notify::TracingNotifier,
    rpc::{
        JsonRpcClient,
        RpcWallet,
    },
    signer::{
        AuthorizationSigner,
        WalletSigner,
        find_keystore,
        resolve_keystore_dir,
        unlock_keystore,
    },
    wallet::ConnectOutcome,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    info,
    warn,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "arcade.json";
const DEFAULT_LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "arcade-session.log";

type CliController =
    GameSessionController<RpcWallet, AuthorizationSigner<RpcWallet>, TracingNotifier>;

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: arcade-session [--config <path>] [--rpc-url <url>]\n\
         [--wallet <name>] [--wallet-dir <path>] [--log-dir <path>] <command>...\n\
         \n\
         Flags:\n\
           --config <path>     Game configuration file (default {DEFAULT_CONFIG_PATH})\n\
           --rpc-url <url>     Override the chain RPC URL from the config\n\
           --wallet <name>     Sign authorizations with this keystore instead of the wallet\n\
           --wallet-dir <path> Keystore directory (defaults to ~/.foundry/keystores)\n\
           --log-dir <path>    Directory for rolling log files (default {DEFAULT_LOG_DIR})\n\
         \n\
         Commands (run in order):\n\
           connect                    Connect, or disconnect if already connected\n\
           status                     Print session and cached game state\n\
           result <score> <collected> Record the outcome of a finished game\n\
           winnings                   Query winnings for the recorded game\n\
           claim                      Submit the score and claim winnings\n\
           free-play                  Redeem the account's free play\n\
           play                       Pay for a play, approving the token if needed\n\
           leaderboard                Print the ranked scoreboard"
    );
    std::process::exit(0);
}

#[derive(Debug)]
enum Command {
    Connect,
    Status,
    Result { score: U256, collected: U256 },
    Winnings,
    Claim,
    FreePlay,
    Play,
    Leaderboard,
}

struct CliArgs {
    config: PathBuf,
    rpc_url: Option<String>,
    wallet: Option<String>,
    wallet_dir: Option<String>,
    log_dir: PathBuf,
    commands: Vec<Command>,
}

fn parse_amount(raw: Option<String>, what: &str) -> Result<U256> {
    let raw = raw.ok_or_else(|| eyre!("result requires <score> <collected>"))?;
    raw.parse::<U256>()
        .map_err(|e| eyre!("invalid {what} {raw:?}: {e}"))
}

fn parse_cli_args() -> Result<CliArgs> {
    let mut args = std::env::args().skip(1);
    let mut config: Option<PathBuf> = None;
    let mut rpc_url: Option<String> = None;
    let mut wallet: Option<String> = None;
    let mut wallet_dir: Option<String> = None;
    let mut log_dir: Option<PathBuf> = None;
    let mut commands = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| eyre!("--config requires a path argument"))?;
                if config.is_some() {
                    return Err(eyre!("--config may only be specified once"));
                }
                config = Some(PathBuf::from(shellexpand::tilde(&path).into_owned()));
            }
            "--rpc-url" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--rpc-url requires a URL argument"))?;
                if rpc_url.is_some() {
                    return Err(eyre!("--rpc-url may only be specified once"));
                }
                rpc_url = Some(url);
            }
            "--wallet" => {
                let name = args
                    .next()
                    .ok_or_else(|| eyre!("--wallet requires a keystore name"))?;
                if wallet.is_some() {
                    return Err(eyre!("--wallet may only be specified once"));
                }
                wallet = Some(name);
            }
            "--wallet-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--wallet-dir requires a path argument"))?;
                if wallet_dir.is_some() {
                    return Err(eyre!("--wallet-dir may only be specified once"));
                }
                wallet_dir = Some(dir);
            }
            "--log-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--log-dir requires a path argument"))?;
                log_dir = Some(PathBuf::from(shellexpand::tilde(&dir).into_owned()));
            }
            "--help" | "-h" => print_usage_and_exit(),
            "connect" => commands.push(Command::Connect),
            "status" => commands.push(Command::Status),
            "result" => {
                let score = parse_amount(args.next(), "score")?;
                let collected = parse_amount(args.next(), "collected count")?;
                commands.push(Command::Result { score, collected });
            }
            "winnings" => commands.push(Command::Winnings),
            "claim" => commands.push(Command::Claim),
            "free-play" => commands.push(Command::FreePlay),
            "play" => commands.push(Command::Play),
            "leaderboard" => commands.push(Command::Leaderboard),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    if commands.is_empty() {
        commands.push(Command::Status);
    }
    Ok(CliArgs {
        config: config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        rpc_url,
        wallet,
        wallet_dir,
        log_dir: log_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
        commands,
    })
}

fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    let appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("failed to initialise tracing: {e}"))?;
    Ok(guard)
}

/// Config file first, then command-line overrides, validated once more.
fn load_config(args: &CliArgs) -> Result<GameConfig> {
    let mut config = GameConfig::load(&args.config)
        .wrap_err_with(|| format!("failed to load config {}", args.config.display()))?;
    if let Some(url) = &args.rpc_url {
        config.chain.rpc_urls = vec![url.clone()];
    }
    if let Some(name) = &args.wallet {
        config.signer = SignerConfig::Keystore {
            name: name.clone(),
            dir: args.wallet_dir.clone(),
        };
    } else if let (Some(wallet_dir), SignerConfig::Keystore { dir, .. }) =
        (&args.wallet_dir, &mut config.signer)
    {
        *dir = Some(wallet_dir.clone());
    }
    config.validate().wrap_err("invalid configuration")?;
    Ok(config)
}

fn build_signer(config: &GameConfig, wallet: &RpcWallet) -> Result<AuthorizationSigner<RpcWallet>> {
    match &config.signer {
        SignerConfig::Wallet => Ok(AuthorizationSigner::Wallet(WalletSigner::new(
            wallet.clone(),
        ))),
        SignerConfig::Keystore { name, dir } => {
            let dir = resolve_keystore_dir(dir.as_deref())?;
            let descriptor = find_keystore(&dir, name)?;
            let signer = unlock_keystore(&descriptor)
                .wrap_err_with(|| format!("failed to unlock keystore '{name}'"))?;
            info!(signer = %signer.address(), "using keystore signer");
            Ok(AuthorizationSigner::Local(signer))
        }
    }
}

fn report_connect(outcome: &ConnectOutcome) {
    match outcome {
        ConnectOutcome::Connected { address, chain_id } => {
            println!("connected {address} on chain {chain_id}")
        }
        ConnectOutcome::Disconnected => println!("disconnected"),
        ConnectOutcome::NoProvider => println!("no wallet endpoint reachable"),
        ConnectOutcome::NoAccounts => println!("wallet returned no accounts"),
        ConnectOutcome::Superseded => println!("connection superseded by a wallet change"),
        ConnectOutcome::Failed => println!("connection failed, see log"),
    }
}

/// Turns node-side account or chain changes into session resets, then
/// reconnects so later commands run against the new identity.
async fn sync_wallet_changes(controller: &CliController, wallet: &RpcWallet) {
    match wallet.poll_changes().await {
        Ok(0) => return,
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "unable to poll wallet for changes");
            return;
        }
    }
    if controller.process_pending_events().await > 0 {
        info!("wallet changed, reconnecting");
        report_connect(&controller.connect_wallet().await);
    }
}

async fn print_status(controller: &CliController) {
    let state = controller.game_state().await;
    println!("phase: {:?}", controller.phase().await);
    if let Some(address) = controller.address().await {
        println!("address: {address}");
    }
    if let Some(chain_id) = controller.chain_id().await {
        println!("chain: {chain_id}");
    }
    if let Some(token) = &state.payment_token {
        println!("payment token: {} ({}) at {}", token.name, token.symbol, token.address);
    }
    println!("prize pool: {:?}", state.prize_pool);
    println!("score: {}  collected: {}", state.score, state.collected);
    println!("winnings: {:?}", state.winnings);
    println!("can play: {}", state.can_play);
}

async fn run_command(controller: &CliController, command: &Command) {
    match command {
        Command::Connect => report_connect(&controller.connect_wallet().await),
        Command::Status => print_status(controller).await,
        Command::Result { score, collected } => {
            controller.record_game_result(*score, *collected).await;
            println!("recorded score {score} with {collected} collected");
        }
        Command::Winnings => {
            if controller.get_winnings().await {
                println!("winnings: {:?}", controller.game_state().await.winnings);
            }
        }
        Command::Claim => {
            if controller.claim_winnings().await {
                if let Some(tx) = controller.game_state().await.last_claim {
                    println!("claimed in transaction {tx}");
                }
            }
        }
        Command::FreePlay => {
            if controller.free_play().await {
                println!("free play claimed");
            }
        }
        Command::Play => {
            if controller.paid_play().await {
                println!("game started");
            }
        }
        Command::Leaderboard => match controller.get_leaderboard().await {
            Some(board) => {
                for entry in board {
                    println!(
                        "{:>3}  {}  {:>12}  {}",
                        entry.rank,
                        entry.masked_address,
                        entry.score,
                        entry.explorer_url.unwrap_or_default()
                    );
                }
            }
            None => println!("leaderboard is empty"),
        },
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = parse_cli_args()?;
    let _log_guard = init_tracing(&args.log_dir)?;
    info!("starting arcade-session");

    let config = load_config(&args)?;
    let url = config
        .chain
        .primary_rpc_url()
        .ok_or_else(|| eyre!("no rpc url configured"))?
        .to_string();
    let wallet = RpcWallet::new(JsonRpcClient::new(url)?)
        .with_token_image(config.token_image_url.clone());
    let signer = build_signer(&config, &wallet)?;
    let controller: CliController =
        GameSessionController::new(config, wallet.clone(), signer, TracingNotifier);

    if !matches!(args.commands.first(), Some(Command::Connect)) {
        report_connect(&controller.connect_wallet().await);
    }
    for command in &args.commands {
        sync_wallet_changes(&controller, &wallet).await;
        run_command(&controller, command).await;
    }
    Ok(())
}

use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{Args as ClapArgs, Parser, Subcommand};
use daemon::Daemon;
use error::Error;
use ipnet::IpNet;
use peer::{PeerId, PeerPolicy, PeerUpdate, PeerView, Timestamp, unix_now};
use reconcile::{Reconciler, ReconcilerConfig};
use service::PeerService;
use settings::{Bootstrap, ServerConfig, SettingsUpdate};
use store::file::FileStore;
use tokio::sync::broadcast;
use wg::cmd::WgCmdBackend;

mod alloc;
mod daemon;
pub(crate) mod error;
mod peer;
mod reconcile;
mod service;
mod settings;
mod status;
mod store;
mod sync;
mod telemetry;
mod wg;

#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Args {
    /// Panel state file (peers and server settings)
    #[arg(long, env = "WG_PANEL_STATE", default_value = "/var/lib/wg-panel/state.bin")]
    state: PathBuf,

    #[arg(long, env = "WG_INTERFACE", default_value = "wg0")]
    iface: String,

    /// Address block peers are allocated from (first start only)
    #[arg(long, env = "WG_NETWORK", default_value = "10.0.0.0/24")]
    network: IpNet,

    /// Listen port (first start only)
    #[arg(long, env = "WG_PORT", default_value_t = 51820)]
    port: u16,

    /// Client DNS servers (first start only)
    #[arg(
        long,
        env = "WG_DNS",
        value_delimiter = ',',
        default_value = "1.1.1.1,8.8.8.8"
    )]
    dns: Vec<IpAddr>,

    /// Public host name or address clients connect to (first start only)
    #[arg(long, env = "WG_ENDPOINT")]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reconciler until interrupted
    Serve {
        /// Seconds between reconciliation cycles
        #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,

        /// Do not re-register peers the daemon lost
        #[arg(long)]
        no_repair: bool,

        /// Timer length for peers without their own expiry days
        #[arg(long, default_value_t = peer::DEFAULT_EXPIRY_DAYS)]
        default_expiry_days: u32,
    },
    Create(CreateArgs),
    List,
    Show {
        id: PeerId,
    },
    Update(UpdateArgs),
    Delete {
        id: PeerId,
    },
    /// Print the client config file of a peer
    Config {
        id: PeerId,
    },
    ResetData {
        id: PeerId,
    },
    /// Make the daemon's peer table match the stored peers
    Resync,
    Stats,
    System,
    /// Show or change server settings
    Settings(SettingsArgs),
    Up,
    Down,
    Restart,
}

#[derive(Debug, ClapArgs)]
struct CreateArgs {
    name: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    note: Option<String>,
    /// Data ceiling in bytes
    #[arg(long)]
    data_limit: Option<u64>,
    /// Absolute expiry, unix seconds
    #[arg(long)]
    expires_at: Option<Timestamp>,
    #[arg(long)]
    expiry_days: Option<u32>,
    /// Start the expiry timer on the first handshake instead of now
    #[arg(long)]
    start_on_first_connect: bool,
    #[arg(long)]
    auto_renew: bool,
    #[arg(long)]
    auto_renew_days: Option<u32>,
    #[arg(long)]
    auto_renew_data_limit: Option<u64>,
}

impl From<CreateArgs> for PeerPolicy {
    fn from(args: CreateArgs) -> Self {
        PeerPolicy {
            name: args.name,
            email: args.email,
            note: args.note,
            data_limit: args.data_limit,
            expiry_date: args.expires_at,
            expiry_days: args.expiry_days,
            start_on_first_connect: args.start_on_first_connect,
            auto_renew: args.auto_renew,
            auto_renew_days: args.auto_renew_days,
            auto_renew_data_limit: args.auto_renew_data_limit,
        }
    }
}

#[derive(Debug, ClapArgs)]
struct UpdateArgs {
    id: PeerId,
    #[arg(long)]
    name: Option<String>,
    /// Empty string clears
    #[arg(long)]
    email: Option<String>,
    /// Empty string clears
    #[arg(long)]
    note: Option<String>,
    #[arg(long, conflicts_with = "unlimited")]
    data_limit: Option<u64>,
    /// Remove the data ceiling
    #[arg(long)]
    unlimited: bool,
    #[arg(long, conflicts_with = "no_expiry")]
    expires_at: Option<Timestamp>,
    #[arg(long)]
    no_expiry: bool,
    #[arg(long)]
    expiry_days: Option<u32>,
    #[arg(long)]
    auto_renew: Option<bool>,
    #[arg(long)]
    auto_renew_days: Option<u32>,
    #[arg(long)]
    auto_renew_data_limit: Option<u64>,
    #[arg(long, conflicts_with = "disable")]
    enable: bool,
    #[arg(long)]
    disable: bool,
}

impl From<UpdateArgs> for PeerUpdate {
    fn from(args: UpdateArgs) -> Self {
        PeerUpdate {
            name: args.name,
            email: args.email.map(non_empty),
            note: args.note.map(non_empty),
            data_limit: clearable(args.data_limit, args.unlimited),
            expiry_date: clearable(args.expires_at, args.no_expiry),
            expiry_days: args.expiry_days.map(Some),
            auto_renew: args.auto_renew,
            auto_renew_days: args.auto_renew_days.map(Some),
            auto_renew_data_limit: args.auto_renew_data_limit.map(Some),
            is_enabled: match (args.enable, args.disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
        }
    }
}

#[derive(Debug, ClapArgs)]
struct SettingsArgs {
    #[arg(long)]
    server_name: Option<String>,
    /// Empty string clears
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    listen_port: Option<u16>,
    #[arg(long, value_delimiter = ',')]
    dns: Option<Vec<IpAddr>>,
    #[arg(long)]
    mtu: Option<u16>,
    #[arg(long)]
    keepalive: Option<u32>,
}

impl From<SettingsArgs> for SettingsUpdate {
    fn from(args: SettingsArgs) -> Self {
        SettingsUpdate {
            server_name: args.server_name,
            endpoint: args.endpoint.map(non_empty),
            listen_port: args.listen_port,
            dns: args.dns,
            mtu: args.mtu,
            persistent_keepalive: args.keepalive,
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    Some(s).filter(|s| !s.trim().is_empty())
}

fn clearable<T>(value: Option<T>, clear: bool) -> Option<Option<T>> {
    if clear { Some(None) } else { value.map(Some) }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let store = Arc::new(FileStore::open(&args.state)?);
    log::debug!("state file {}", store.path().display());
    let daemon = Arc::new(Daemon::new(WgCmdBackend::new(), args.iface.clone()));
    let service = PeerService::new(Arc::clone(&store), Arc::clone(&daemon));

    let existing = load_wg_config(&wg_config_path(&args.iface));
    service.ensure_settings(
        &Bootstrap {
            interface: args.iface.clone(),
            listen_port: args.port,
            network: args.network,
            dns: args.dns,
            endpoint: args.endpoint,
        },
        existing.as_ref(),
    )?;

    match args.command {
        Command::Serve {
            interval,
            no_repair,
            default_expiry_days,
        } => {
            let reconciler = Arc::new(Reconciler::new(
                store,
                daemon,
                ReconcilerConfig {
                    interval: Duration::from_secs(interval),
                    default_expiry_days,
                    repair_drift: !no_repair,
                },
            ));

            let (shutdown, rx) = broadcast::channel(1);
            let handle = reconciler.spawn(rx);

            shutdown_signal().await?;
            log::info!("interrupted, waiting for the current cycle");

            let _ = shutdown.send(());
            if let Err(err) = handle.await {
                log::error!("reconciler task failed: {err}");
            }
        }

        Command::Create(create) => {
            let peer = service.create_peer(create.into(), unix_now())?;
            print_peer(&service.get_peer(peer.id, unix_now())?);
        }

        Command::List => {
            for view in service.list_peers(unix_now())? {
                print_peer(&view);
            }
        }

        Command::Show { id } => print_peer(&service.get_peer(id, unix_now())?),

        Command::Update(update) => {
            let id = update.id;
            print_peer(&service.update_peer(id, update.into(), unix_now())?);
        }

        Command::Delete { id } => {
            let peer = service.delete_peer(id)?;
            println!("deleted {} ({})", peer.id, peer.name);
        }

        Command::Config { id } => print!("{}", service.render_client_config(id)?),

        Command::ResetData { id } => {
            service.reset_data(id)?;
            print_peer(&service.get_peer(id, unix_now())?);
        }

        Command::Resync => {
            let report = service.resync()?;
            println!(
                "activated {}, deactivated {}, removed unknown {}, failed {}",
                report.activated, report.deactivated, report.removed_unknown, report.failed
            );
        }

        Command::Stats => {
            let stats = service.stats(unix_now())?;
            println!("peers:              {}", stats.total);
            println!("active:             {}", stats.active);
            println!("disabled:           {}", stats.disabled);
            println!("expired:            {}", stats.expired);
            println!("data limit reached: {}", stats.data_limit_reached);
            println!("online:             {}", stats.online);
            println!("data used:          {}", stats.total_data_used);
        }

        Command::System => {
            let info = daemon.system_info();
            println!("interface:    {}", info.interface);
            println!("installed:    {}", info.installed);
            println!("interface up: {}", info.interface_up);
        }

        Command::Settings(update) => {
            let update = SettingsUpdate::from(update);
            let settings = if update == SettingsUpdate::default() {
                service.settings()?
            } else {
                service.update_settings(update)?
            };
            print_settings(&settings);
        }

        Command::Up => daemon.interface_up()?,
        Command::Down => daemon.interface_down()?,
        Command::Restart => daemon.restart_interface()?,
    }

    Ok(())
}

/// Ctrl-C, or SIGTERM from a service manager.
#[cfg(unix)]
async fn shutdown_signal() -> Result<(), Error> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = terminate.recv() => log::debug!("received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<(), Error> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

fn wg_config_path(iface: &str) -> PathBuf {
    Path::new("/etc/wireguard").join(format!("{iface}.conf"))
}

/// The server's own `wg-quick` config, adopted on first start.
fn load_wg_config(path: &Path) -> Option<wg::config::WgConfigInterface> {
    settings::read_interface_config(path).unwrap_or_else(|err| {
        log::warn!("ignoring {}: {err}", path.display());
        None
    })
}

fn print_peer(view: &PeerView) {
    let peer = &view.peer;
    let limit = peer
        .data_limit
        .map_or_else(|| "unlimited".to_string(), |l| l.to_string());
    let expiry = peer
        .expiry_date
        .map_or_else(|| "never".to_string(), |e| e.to_string());

    println!(
        "{}  {:<20} {:<18} {:<18} {:<7} {}/{} bytes  expires {}  renewed {}",
        peer.id,
        peer.name,
        peer.address.to_string(),
        view.status.to_string(),
        if view.online { "online" } else { "offline" },
        view.data_used,
        limit,
        expiry,
        peer.renew_count,
    );
}

fn print_settings(settings: &ServerConfig) {
    let dns: Vec<String> = settings.dns.iter().map(ToString::to_string).collect();

    println!("name:       {}", settings.server_name);
    println!("interface:  {}", settings.interface);
    println!("network:    {}", settings.network);
    println!("address:    {}", settings.server_address);
    println!("public key: {}", settings.public_key);
    println!("port:       {}", settings.listen_port);
    println!(
        "endpoint:   {}",
        settings.endpoint.as_deref().unwrap_or("(not configured)")
    );
    println!("dns:        {}", dns.join(","));
    println!("mtu:        {}", settings.mtu);
    println!("keepalive:  {}", settings.persistent_keepalive);
}

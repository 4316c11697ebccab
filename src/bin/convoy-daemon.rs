//! Convoy volume manager daemon.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, format_err, Error};
use clap::Parser;
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};

use convoy::daemon::{load_daemon_config, save_daemon_config, Daemon, LOCK_FILE};
use convoy::driver::parse_driver_opts;
use convoy_api_types::DaemonConfig;
use convoy_config::{open_lockfile, ConfigLockGuard};

#[derive(Debug, Parser)]
#[command(name = "convoy-daemon")]
#[command(version, about = "Host volume manager daemon", long_about = None)]
struct DaemonArgs {
    /// Directory holding the daemon configuration and volume records.
    #[arg(long, default_value = convoy_buildcfg::CONVOY_STATE_DIR)]
    root: PathBuf,

    /// Unix socket to listen on.
    #[arg(long, default_value = convoy_buildcfg::CONVOY_SOCKET_FN)]
    socket: PathBuf,

    /// Storage drivers to enable, the first one is the default.
    #[arg(long = "drivers")]
    drivers: Vec<String>,

    /// Driver options as key=value.
    #[arg(long = "driver-opts")]
    driver_opts: Vec<String>,

    /// Append log output to this file instead of stderr.
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(long)]
    debug: bool,

    /// Keep volumes when docker removes them.
    #[arg(long)]
    ignore_docker_delete: bool,

    /// Create volumes that docker mounts but which do not exist.
    #[arg(long)]
    create_on_docker_mount: bool,

    /// Timeout for external commands, e.g. 5m or 30s.
    #[arg(long, default_value = "")]
    cmd_timeout: String,

    /// Mount namespace file to run mount commands in, e.g. /proc/1/ns/mnt.
    #[arg(long = "mnt-ns", default_value = "")]
    mnt_ns: String,

    /// Use the command line even if a saved configuration exists.
    #[arg(long)]
    ignore_config_file: bool,
}

fn init_logger(args: &DaemonArgs) -> Result<(), Error> {
    let default_filter = if args.debug { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::new().filter_or("CONVOY_LOG", default_filter));

    if let Some(path) = &args.log {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| format_err!("unable to open log file {:?} - {}", path, err))?;
        builder
            .write_style(env_logger::WriteStyle::Never)
            .target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();

    std::panic::set_hook(Box::new(|info| {
        log::error!("daemon panicked - {}", info);
        std::process::exit(1);
    }));
    Ok(())
}

fn daemon_config(args: &DaemonArgs, root: &Path) -> Result<(DaemonConfig, bool), Error> {
    if !args.ignore_config_file {
        if let Some(config) = load_daemon_config(root)? {
            log::info!("loaded configuration from {:?}, ignoring command line", root);
            return Ok((config, false));
        }
    }

    if args.drivers.is_empty() {
        bail!("missing storage driver, use --drivers");
    }
    let config = DaemonConfig {
        root: root.to_string_lossy().to_string(),
        driver_list: args.drivers.clone(),
        default_driver: args.drivers[0].clone(),
        mount_namespace_fd: args.mnt_ns.clone(),
        ignore_docker_delete: args.ignore_docker_delete,
        create_on_docker_mount: args.create_on_docker_mount,
        cmd_timeout: args.cmd_timeout.clone(),
    };
    Ok((config, true))
}

fn bind_socket(path: &Path) -> Result<UnixListener, Error> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|err| format_err!("unable to create socket directory {:?} - {}", dir, err))?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("removed stale socket {:?}", path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
        Err(err) => bail!("unable to remove stale socket {:?} - {}", path, err),
    }
    UnixListener::bind(path).map_err(|err| format_err!("unable to bind {:?} - {}", path, err))
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            log::error!("unable to install SIGTERM handler - {}", err);
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("got SIGINT, shutting down"),
        _ = terminate.recv() => log::info!("got SIGTERM, shutting down"),
    }
}

async fn run(daemon: Arc<Daemon>, socket: PathBuf) -> Result<(), Error> {
    let listener = bind_socket(&socket)?;
    log::info!("listening on {:?}", socket);

    convoy::server::serve(daemon, listener, shutdown_signal()).await?;

    if let Err(err) = std::fs::remove_file(&socket) {
        log::warn!("unable to remove socket {:?} - {}", socket, err);
    }
    Ok(())
}

/// Only one daemon may run per root directory.
fn lock_root(root: &Path) -> Result<ConfigLockGuard, Error> {
    std::fs::create_dir_all(root)
        .map_err(|err| format_err!("invalid root directory {:?} - {}", root, err))?;

    let lock_path = root.join(LOCK_FILE);
    open_lockfile(&lock_path, None)
        .map_err(|err| format_err!("failed to lock {:?} - {}", lock_path, err))
}

fn start(args: DaemonArgs, _lock: ConfigLockGuard) -> Result<(), Error> {
    let root = args.root.clone();
    let (config, fresh) = daemon_config(&args, &root)?;

    convoy_tools::init_mount_namespace(&config.mount_namespace_fd)?;
    convoy_tools::init_command_timeout(&config.cmd_timeout)?;

    let driver_opts = parse_driver_opts(&args.driver_opts)?;
    let daemon = Daemon::new(config, &driver_opts)?;
    if fresh {
        save_daemon_config(&daemon.config)?;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(Arc::new(daemon), args.socket))
}

fn main() {
    let args = DaemonArgs::parse();

    // the log file belongs to the daemon holding the lock
    let lock = match lock_root(&args.root) {
        Ok(lock) => lock,
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "convoy-daemon: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = init_logger(&args) {
        let _ = writeln!(std::io::stderr(), "{}", err);
        std::process::exit(1);
    }

    if let Err(err) = start(args, lock) {
        log::error!("{}", err);
        let _ = writeln!(std::io::stderr(), "convoy-daemon: {}", err);
        std::process::exit(1);
    }
}

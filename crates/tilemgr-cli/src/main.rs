//! Entry point: argument parsing, logging setup and dispatch.

use std::path::Path;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use tilemgr_cli::cli::{split_copy_arg, Cli, CliCommand};
use tilemgr_cli::push::ProgressBar;
use tilemgr_cli::terminal::TerminalSession;
use tilemgr_cli::{DeviceSession, Result};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(&cli) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let session = DeviceSession::open(&cli.port, cli.baud)?;

    // Terminal mode owns the session and closes it itself.
    if matches!(cli.command, CliCommand::Terminal) {
        return TerminalSession::new(session)?.run();
    }

    let mut session = session;
    let result = dispatch(&mut session, &cli.command);
    if let Err(err) = session.close() {
        warn!("close failed: {err}");
    }
    result
}

fn dispatch(session: &mut DeviceSession, command: &CliCommand) -> Result<()> {
    match command {
        CliCommand::Init { core } => {
            session.format()?;
            for file in ["main.lua", "init.lua"] {
                let source = core.join(file);
                let mut bar = ProgressBar::new("install");
                session.push_file(&source, None, &mut |sent, total| bar.update(sent, total))?;
            }
            session.restart()
        }
        CliCommand::Restart => session.restart(),
        CliCommand::Terminal => unreachable!("terminal handled by the caller"),
        CliCommand::List => {
            for entry in session.list()? {
                println!("{entry}");
            }
            Ok(())
        }
        CliCommand::Copy { restart, files } => {
            for file in files {
                let (source, remote) = split_copy_arg(file);
                let mut bar = ProgressBar::new("copy");
                session.push_file(Path::new(source), remote, &mut |sent, total| {
                    bar.update(sent, total)
                })?;
            }
            if *restart {
                session.restart()?;
            }
            Ok(())
        }
        CliCommand::Rm { files } => {
            for name in files {
                session.remove(name)?;
            }
            Ok(())
        }
        CliCommand::Wifi { ssid, passphrase } => {
            let mut bar = ProgressBar::new("wifi");
            session.configure_wifi(ssid, passphrase, &mut |sent, total| bar.update(sent, total))
        }
        CliCommand::Hostname { name } => {
            let mut bar = ProgressBar::new("hostname");
            session.configure_hostname(name, &mut |sent, total| bar.update(sent, total))
        }
        CliCommand::Info => {
            let id = session.chip_id()?;
            println!("{id}");
            Ok(())
        }
    }
}

use std::io::IsTerminal;
use std::process::ExitCode;

use color_eyre::eyre::Result as EyreResult;
use tokio::select;
use tokio::signal::{self, unix::SignalKind};
use tpm_ssh_agent::{Agent, FileKeySource, SigningCoordinator, SoftwareTpm};

mod cli;
mod logging;
mod systemd;

const BUILD_VERSION: &str = env!("TPM_SSH_AGENT_BUILD_VERSION");
const GIT_DESCRIBE: &str = env!("TPM_SSH_AGENT_GIT_DESCRIBE");

#[cfg(debug_assertions)]
fn install_eyre_hook() -> EyreResult<()> {
    color_eyre::config::HookBuilder::default()
        .display_env_section(true)
        .install()
}

#[cfg(not(debug_assertions))]
fn install_eyre_hook() -> EyreResult<()> {
    color_eyre::config::HookBuilder::default()
        .display_env_section(false)
        .install()
}

fn main() -> ExitCode {
    if let Err(e) = install_eyre_hook() {
        eprintln!("Failed to install error hook: {}", e);
        return ExitCode::FAILURE;
    }

    match run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn warn_if_interactive() {
    if std::io::stdin().is_terminal() {
        log::warn!("tpm-ssh-agent is meant to run as a background daemon.");
        log::warn!("Running multiple instances is likely to lead to conflicts.");
        log::warn!("Consider using a systemd service.");
    }
}

// A single user's SSH sessions make few, short requests; signing itself runs
// on tokio's blocking pool
#[tokio::main(flavor = "current_thread")]
async fn run_daemon() -> EyreResult<()> {
    let config = cli::Config::parse()?;

    // LoggerHandle must be held until program termination so file logging takes place
    let _logger = logging::setup_logger(config.log_level.into(), config.log_file.as_deref())?;
    log::info!(
        "Starting tpm-ssh-agent version {}; commit {}",
        BUILD_VERSION,
        GIT_DESCRIBE
    );
    warn_if_interactive();

    let mut sigterm = signal::unix::signal(SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(SignalKind::hangup())?;

    let tpm = SoftwareTpm::new().factory();
    let agent = match &config.key_path {
        Some(path) => {
            log::info!("Serving key from {}", path.display());
            let keys = FileKeySource::new(path);
            Agent::start_with(&config.listen_path, SigningCoordinator::new(keys, tpm))?
        }
        None => Agent::start(&config.listen_path, tpm)?,
    };

    systemd::notify_ready();
    systemd::notify_status("Running");

    let reason = select! {
        res = agent.wait() => return Ok(res?),
        _ = signal::ctrl_c() => "SIGINT",
        Some(_) = sigterm.recv() => "SIGTERM",
        // TODO: SIGHUP stops the agent; confirm whether it should reload instead
        Some(_) = sighup.recv() => "SIGHUP",
    };

    log::info!("Exiting on {}", reason);
    systemd::notify_stopping();
    agent.stop().await?;

    Ok(())
}

use std::{env, fs::File, io::Read, path::PathBuf};

use clap_serde_derive::{
    clap::{self, Parser, ValueEnum},
    serde::{self, Deserialize, Serialize},
    ClapSerde,
};
use color_eyre::eyre::Result as EyreResult;
use expand_tilde::ExpandTilde;
use log::LevelFilter;

const APP_VERSION: &str = env!("TPM_SSH_AGENT_BUILD_VERSION");

fn default_config_path() -> PathBuf {
    let config_dir = env::var_os("XDG_CONFIG_HOME")
        .or_else(|| Some("~/.config".into()))
        .map(PathBuf::from)
        .and_then(|p| p.expand_tilde_owned().ok())
        .expect("HOME not defined in environment");

    config_dir
        .join(env!("CARGO_PKG_NAME"))
        .join(concat!(env!("CARGO_PKG_NAME"), ".toml"))
}

fn default_listen_path() -> PathBuf {
    PathBuf::from(concat!("~/.ssh/", env!("CARGO_PKG_NAME"), ".sock"))
}

#[derive(Parser)]
#[command(author, version = APP_VERSION, about)]
pub struct Args {
    /// Config file
    #[arg(short, long = "config", default_value_os_t = default_config_path())]
    pub config_path: PathBuf,

    /// Config from file or args
    #[command(flatten)]
    pub config: <Config as ClapSerde>::Opt,
}

#[derive(ClapSerde, Clone, Serialize)]
pub struct Config {
    /// Listen path
    #[default(default_listen_path())]
    #[arg(short, long = "listen")]
    pub listen_path: PathBuf,

    /// Key file (defaults to $XDG_DATA_HOME/tpm-ssh-agent/ssh.key)
    #[arg(long = "key", num_args = 1)]
    pub key_path: Option<PathBuf>,

    /// Log level for agent
    #[default(LogLevel::Warn)]
    #[arg(long, value_enum)]
    pub log_level: LogLevel,

    /// Optional log file for agent (logs to standard error, otherwise)
    #[arg(long, num_args = 1)]
    pub log_file: Option<PathBuf>,

    /// Config file path (not an arg; copied from struct Args)
    #[arg(skip)]
    #[serde(skip_deserializing, skip_serializing)]
    pub config_path: PathBuf,
}

impl Config {
    pub fn parse() -> EyreResult<Self> {
        let args = <Args as Parser>::parse();
        Self::from_args(args.config_path, args.config)
    }

    fn from_args(config_path: PathBuf, mut config_opt: <Config as ClapSerde>::Opt) -> EyreResult<Self> {
        let mut config = if let Ok(mut f) = File::open(&config_path) {
            log::info!("Read configuration from {}", config_path.display());
            let mut config_text = String::new();
            f.read_to_string(&mut config_text)?;
            let file_config = toml::from_str::<<Config as ClapSerde>::Opt>(&config_text)?;
            Config::from(file_config).merge(&mut config_opt)
        } else {
            Config::from(&mut config_opt)
        };

        config.config_path = config_path;
        config.listen_path = config.listen_path.expand_tilde_owned()?;
        config.key_path = config
            .key_path
            .map(|p| p.expand_tilde_owned())
            .transpose()?;
        config.log_file = config
            .log_file
            .map(|p| p.expand_tilde_owned())
            .transpose()?;

        Ok(config)
    }
}

#[derive(ValueEnum, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    #[value(hide = true)]
    Trace = 5,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

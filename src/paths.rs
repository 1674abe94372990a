//! Filesystem locations used by the agent.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use expand_tilde::ExpandTilde;

use crate::error::KeyError;

/// Directory name under the data home holding agent state
pub const AGENT_DIR: &str = "tpm-ssh-agent";

/// File name of the stored key
pub const KEY_FILE: &str = "ssh.key";

/// `$XDG_DATA_HOME`, or `~/.local/share` when it is not set.
pub fn data_home() -> Result<PathBuf, KeyError> {
    data_home_from(env::var_os("XDG_DATA_HOME"))
}

fn data_home_from(xdg_data_home: Option<OsString>) -> Result<PathBuf, KeyError> {
    // Set-but-empty still wins over $HOME
    if let Some(dir) = xdg_data_home {
        return Ok(PathBuf::from(dir));
    }

    PathBuf::from("~/.local/share")
        .expand_tilde_owned()
        .map_err(|e| KeyError::DataHome(e.to_string()))
}

/// `<data-home>/tpm-ssh-agent`
pub fn agent_storage() -> Result<PathBuf, KeyError> {
    Ok(data_home()?.join(AGENT_DIR))
}

/// `<data-home>/tpm-ssh-agent/ssh.key`
pub fn default_key_path() -> Result<PathBuf, KeyError> {
    Ok(agent_storage()?.join(KEY_FILE))
}

//! systemd notification support
//!
//! Lets the agent run as a Type=notify service: systemd considers it started
//! once the socket is bound, and is told when shutdown begins.

/// Notify systemd that the agent socket is ready.
#[cfg(feature = "systemd")]
pub fn notify_ready() {
    // Use false to keep NOTIFY_SOCKET for the later STOPPING notification
    match sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        Ok(()) => log::debug!("Sent READY notification to systemd"),
        Err(e) => log::debug!("Failed to notify systemd (not running under systemd?): {}", e),
    }
}

#[cfg(not(feature = "systemd"))]
pub fn notify_ready() {
    log::debug!("systemd notify support not compiled in");
}

/// Tell systemd that shutdown has begun.
#[cfg(feature = "systemd")]
pub fn notify_stopping() {
    match sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]) {
        Ok(()) => log::debug!("Sent STOPPING notification to systemd"),
        Err(e) => log::debug!("Failed to notify systemd: {}", e),
    }
}

#[cfg(not(feature = "systemd"))]
pub fn notify_stopping() {}

/// Update the status line shown by `systemctl status`.
#[cfg(feature = "systemd")]
pub fn notify_status(status: &str) {
    match sd_notify::notify(false, &[sd_notify::NotifyState::Status(status)]) {
        Ok(()) => log::trace!("Updated systemd status: {}", status),
        Err(e) => log::trace!("Failed to update status: {}", e),
    }
}

#[cfg(not(feature = "systemd"))]
pub fn notify_status(_status: &str) {}

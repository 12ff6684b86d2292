use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use time::macros::format_description;

/// XDG cache location of the Waybar status file.
pub mod paths {
    use std::path::PathBuf;

    /// ~/.cache/clipswap-rs/
    pub fn cache_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|d| d.cache_dir().join("clipswap-rs"))
            .unwrap_or_else(|| PathBuf::from("/tmp/clipswap-rs"))
    }

    pub fn status_file() -> PathBuf {
        cache_dir().join("status.json")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaybarState {
    Idle,
    /// A transformed clipboard can still be reverted.
    Pending,
    Error,
}

impl WaybarState {
    fn icon(&self) -> &'static str {
        match self {
            Self::Idle => "󰅍",
            Self::Pending => "󰅎",
            Self::Error => "󰅙",
        }
    }

    fn class(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WaybarStatus {
    text: String,
    tooltip: String,
    class: String,
    alt: String,
}

/// Writes trigger status for Waybar to read (JSON format).
///
/// Tooltips carry profile names and counts only; clipboard text is never
/// written to disk.
pub struct StatusWriter {
    status_file: Option<PathBuf>,
    signal: bool,
}

impl StatusWriter {
    pub fn new(enabled: bool) -> Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }
        fs::create_dir_all(paths::cache_dir()).context("Failed to create cache directory")?;
        Ok(Self {
            status_file: Some(paths::status_file()),
            signal: true,
        })
    }

    pub fn disabled() -> Self {
        Self {
            status_file: None,
            signal: false,
        }
    }

    /// Writes to `path` without signalling Waybar.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            status_file: Some(path.into()),
            signal: false,
        }
    }

    pub fn status_file(&self) -> Option<&Path> {
        self.status_file.as_deref()
    }

    pub fn set_state(&self, state: WaybarState, tooltip: &str) -> Result<()> {
        let Some(status_file) = &self.status_file else {
            return Ok(());
        };

        let status = WaybarStatus {
            text: state.icon().to_string(),
            tooltip: format!("{} {}", timestamp(), tooltip),
            class: state.class().to_string(),
            alt: state.class().to_string(),
        };

        let json = serde_json::to_string(&status).context("Failed to serialize status")?;
        fs::write(status_file, &json).context("Failed to write status file")?;
        tracing::debug!(state = ?state, tooltip = %tooltip, "Updated Waybar status");

        self.signal_waybar();
        Ok(())
    }

    pub fn set_idle(&self, tooltip: &str) -> Result<()> {
        self.set_state(WaybarState::Idle, tooltip)
    }

    pub fn set_pending(&self, profiles: &[String], replacements: usize) -> Result<()> {
        self.set_state(
            WaybarState::Pending,
            &format!(
                "{} replacement(s) by {}; revert available",
                replacements,
                profiles.join(", ")
            ),
        )
    }

    pub fn set_error(&self, message: &str) -> Result<()> {
        self.set_state(WaybarState::Error, &format!("Error: {message}"))
    }

    /// SIGRTMIN+9 refreshes the custom module.
    fn signal_waybar(&self) {
        if !self.signal {
            return;
        }
        if let Err(e) = Command::new("/usr/bin/pkill")
            .args(["-RTMIN+9", "waybar"])
            .status()
        {
            tracing::debug!("Failed to signal waybar: {}", e);
        }
    }

    pub fn cleanup(&self) -> Result<()> {
        if let Some(status_file) = self.status_file.as_ref().filter(|path| path.exists()) {
            fs::remove_file(status_file).context("Failed to remove status file")?;
            self.signal_waybar();
        }
        Ok(())
    }
}

fn timestamp() -> String {
    time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_status(path: &Path) -> WaybarStatus {
        let text = fs::read_to_string(path).expect("status written");
        serde_json::from_str(&text).expect("valid status json")
    }

    #[test]
    fn writes_pending_status_without_clipboard_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("status.json");
        let writer = StatusWriter::at_path(&path);

        writer
            .set_pending(&["nicknames".to_string()], 2)
            .expect("status written");

        let status = read_status(&path);
        assert_eq!(status.class, "pending");
        assert!(status.tooltip.contains("2 replacement(s) by nicknames"));
    }

    #[test]
    fn disabled_writer_is_silent() {
        let writer = StatusWriter::disabled();
        assert!(writer.status_file().is_none());
        writer.set_error("boom").expect("no-op");
        writer.cleanup().expect("no-op");
    }

    #[test]
    fn cleanup_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("status.json");
        let writer = StatusWriter::at_path(&path);
        writer.set_idle("Ready").expect("status written");
        assert!(path.exists());

        writer.cleanup().expect("cleanup");
        assert!(!path.exists());
    }
}

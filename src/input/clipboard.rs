use anyhow::{Context, Result};
use arboard::Clipboard;
use std::env;
use tracing::{debug, warn};
use wl_clipboard_rs::copy::{ClipboardType, Error as WlCopyError, MimeType, Options, Source};

/// Reads and writes clipboard text. Either side may fail or block briefly.
pub trait ClipboardIo {
    fn read(&mut self) -> Result<String>;
    fn write(&mut self, text: &str) -> Result<()>;
}

/// In-process clipboard, handy for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    contents: String,
    fail_reads: bool,
    fail_writes: bool,
    writes: usize,
}

impl MemoryClipboard {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            ..Self::default()
        }
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Simulates another application copying text.
    pub fn set_contents(&mut self, contents: impl Into<String>) {
        self.contents = contents.into();
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl ClipboardIo for MemoryClipboard {
    fn read(&mut self) -> Result<String> {
        if self.fail_reads {
            anyhow::bail!("clipboard unavailable");
        }
        Ok(self.contents.clone())
    }

    fn write(&mut self, text: &str) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("clipboard rejected write");
        }
        self.contents = text.to_string();
        self.writes += 1;
        Ok(())
    }
}

/// The desktop clipboard: arboard everywhere, plus wl-clipboard-rs on
/// Wayland so both the regular clipboard and primary selection are set.
pub struct SystemClipboard {
    clipboard: Clipboard,
    wayland_clipboard_enabled: bool,
}

impl SystemClipboard {
    pub fn new() -> Result<Self> {
        let clipboard = Clipboard::new().context("Failed to initialize clipboard")?;
        let wayland_env = env::var("WAYLAND_DISPLAY").is_ok();
        if wayland_env {
            debug!("Wayland session detected; using wl-clipboard for writes");
        }

        Ok(Self {
            clipboard,
            wayland_clipboard_enabled: wayland_env,
        })
    }

    fn copy_wayland_clipboard(&self, text: &str) -> Result<(), WlCopyError> {
        let bytes = text.as_bytes().to_vec();

        let mut both = Options::new();
        both.clipboard(ClipboardType::Both);
        match both.copy(
            Source::Bytes(bytes.clone().into_boxed_slice()),
            MimeType::Text,
        ) {
            Ok(_) => Ok(()),
            Err(WlCopyError::PrimarySelectionUnsupported) => {
                let mut regular = Options::new();
                regular.clipboard(ClipboardType::Regular);
                regular.copy(Source::Bytes(bytes.into_boxed_slice()), MimeType::Text)
            }
            Err(err) => Err(err),
        }
    }
}

impl ClipboardIo for SystemClipboard {
    fn read(&mut self) -> Result<String> {
        self.clipboard
            .get_text()
            .context("Failed to read text from clipboard")
    }

    fn write(&mut self, text: &str) -> Result<()> {
        if self.wayland_clipboard_enabled {
            match self.copy_wayland_clipboard(text) {
                Ok(_) => {
                    debug!("Text copied to Wayland clipboard");
                    return Ok(());
                }
                Err(err) => {
                    warn!("Wayland clipboard copy failed (falling back to arboard): {err:?}");
                    self.wayland_clipboard_enabled = false;
                }
            }
        }

        self.clipboard
            .set_text(text)
            .context("Failed to copy text to clipboard")?;
        debug!("Text copied to clipboard");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_clipboard_round_trips_text() {
        let mut clipboard = MemoryClipboard::new("start");
        assert_eq!(clipboard.read().expect("read"), "start");
        clipboard.write("next").expect("write");
        assert_eq!(clipboard.contents(), "next");
        assert_eq!(clipboard.writes(), 1);
    }

    #[test]
    fn memory_clipboard_can_fail() {
        let mut clipboard = MemoryClipboard::new("start");
        clipboard.fail_writes(true);
        assert!(clipboard.write("next").is_err());
        assert_eq!(clipboard.contents(), "start");

        clipboard.fail_reads(true);
        assert!(clipboard.read().is_err());
    }
}

use anyhow::{anyhow, Context, Result};
use enigo::{Keyboard, Settings};
use serde_json::Value;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};
use wrtype::{Modifier, WrtypeClient};

use crate::config::Config;

/// Window classes that paste with Ctrl+Shift+V.
const SHIFT_PASTE_CLASSES: &[&str] = &[
    "Alacritty",
    "kitty",
    "foot",
    "footclient",
    "org.wezfurlong.wezterm",
    "org.gnome.Console",
    "gnome-terminal-server",
    "konsole",
    "yakuake",
    "tilix",
    "xfce4-terminal",
    "com.mitchellh.ghostty",
];

/// Dotted or dashed class fragments that mark a terminal.
const SHIFT_PASTE_CLASS_COMPONENTS: &[&str] = &[
    "terminal",
    "console",
    "ghostty",
    "wezterm",
    "kitty",
    "alacritty",
    "foot",
    "konsole",
    "xterm",
    "urxvt",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteSettings {
    /// Ctrl+Shift+V when the focused window cannot be classified.
    pub shift_by_default: bool,
    /// Shift+Insert everywhere instead of Ctrl(+Shift)+V.
    pub global_shortcut: bool,
    pub extra_shift_classes: HashSet<String>,
}

impl PasteSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            shift_by_default: config.shift_paste,
            global_shortcut: config.global_paste_shortcut,
            extra_shift_classes: config
                .paste_hints
                .shift
                .iter()
                .map(|entry| entry.trim().to_ascii_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect(),
        }
    }

    /// `Some(true)` if the window class is a known shift-paste target.
    pub fn shift_hint_for_class(&self, class: &str) -> Option<bool> {
        if SHIFT_PASTE_CLASSES
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(class))
        {
            return Some(true);
        }

        let lower = class.to_ascii_lowercase();
        if self.extra_shift_classes.contains(&lower) {
            return Some(true);
        }

        lower
            .split(['.', '-', '_'])
            .any(|component| {
                SHIFT_PASTE_CLASS_COMPONENTS.contains(&component)
                    || self.extra_shift_classes.contains(component)
            })
            .then_some(true)
    }
}

struct HyprlandDispatcher {
    socket_path: PathBuf,
}

impl HyprlandDispatcher {
    fn new() -> Option<Self> {
        let runtime_dir = env::var("XDG_RUNTIME_DIR").ok()?;
        let signature = env::var("HYPRLAND_INSTANCE_SIGNATURE").ok()?;
        let socket_path = PathBuf::from(runtime_dir)
            .join("hypr")
            .join(signature)
            .join(".socket.sock");

        socket_path.exists().then_some(Self { socket_path })
    }

    async fn send_shortcut(&self, modifiers: &[&str], key: &str) -> Result<()> {
        let command = if modifiers.is_empty() {
            format!("dispatch sendshortcut , {key}, active")
        } else {
            format!("dispatch sendshortcut {}, {key}, active", modifiers.join(" "))
        };
        let response = self.send_command(&command).await?;
        if response.is_empty() || response.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(anyhow!("Hyprland sendshortcut error: {response}"))
        }
    }

    async fn active_window_class(&self) -> Result<Option<String>> {
        for command in ["j/activewindow", "activewindow"] {
            let response = self.send_command(command).await?;
            if response.is_empty() || response.eq_ignore_ascii_case("unknown request") {
                debug!(command, "Hyprland returned no active window data");
                continue;
            }
            if let Some(class) = extract_window_class(&response) {
                return Ok(Some(class));
            }
        }
        Ok(None)
    }

    async fn send_command(&self, command: &str) -> Result<String> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to Hyprland socket at {}",
                    self.socket_path.display()
                )
            })?;

        stream
            .write_all(command.as_bytes())
            .await
            .with_context(|| format!("Failed to send IPC command: {command}"))?;
        stream
            .shutdown()
            .await
            .context("Failed to finish Hyprland IPC write")?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .context("Failed to read Hyprland IPC response")?;
        Ok(String::from_utf8_lossy(&response).trim().to_string())
    }
}

/// Pulls `class` out of either the JSON or the plain `activewindow` reply.
fn extract_window_class(response: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(response) {
        return value
            .get("class")
            .and_then(Value::as_str)
            .filter(|class| !class.is_empty())
            .map(str::to_string);
    }

    response.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(':')?;
        (key.trim().eq_ignore_ascii_case("class") && !value.trim().is_empty())
            .then(|| value.trim().to_string())
    })
}

/// Sends the paste keystroke to the focused window.
///
/// Tries Hyprland's `sendshortcut` dispatcher, then a Wayland virtual
/// keyboard, then enigo.
pub struct PasteSimulator {
    settings: PasteSettings,
    hyprland_dispatcher: Option<HyprlandDispatcher>,
    wrtype_client: Option<WrtypeClient>,
    wrtype_attempted: bool,
    wayland_env: bool,
}

impl PasteSimulator {
    pub fn new(settings: PasteSettings) -> Self {
        let wayland_env = env::var("WAYLAND_DISPLAY").is_ok();
        let hyprland_dispatcher = HyprlandDispatcher::new();

        if hyprland_dispatcher.is_some() {
            debug!("Hyprland IPC detected; pasting through sendshortcut");
        } else if wayland_env {
            debug!("Wayland session without Hyprland IPC; virtual keyboard paste will be used");
        }

        Self {
            settings,
            hyprland_dispatcher,
            wrtype_client: None,
            wrtype_attempted: false,
            wayland_env,
        }
    }

    pub fn update_settings(&mut self, settings: PasteSettings) {
        self.settings = settings;
    }

    pub async fn simulate_paste(&mut self) -> Result<()> {
        let (modifiers, key) = if self.settings.global_shortcut {
            (&["shift"][..], "Insert")
        } else if self.use_shift().await {
            (&["ctrl", "shift"][..], "v")
        } else {
            (&["ctrl"][..], "v")
        };

        if let Some(dispatcher) = self.hyprland_dispatcher.as_ref() {
            match dispatcher.send_shortcut(modifiers, key).await {
                Ok(()) => {
                    info!("📋 Pasted via Hyprland sendshortcut");
                    return Ok(());
                }
                Err(err) => warn!("Hyprland sendshortcut paste failed: {err:?}"),
            }
        }

        if let Some(client) = self.ensure_wrtype_client() {
            let wrtype_modifiers: Vec<Modifier> = modifiers
                .iter()
                .map(|name| match *name {
                    "shift" => Modifier::Shift,
                    _ => Modifier::Ctrl,
                })
                .collect();
            match client.send_shortcut(&wrtype_modifiers, key) {
                Ok(()) => {
                    info!("📋 Pasted via Wayland virtual keyboard");
                    return Ok(());
                }
                Err(err) => {
                    warn!("Wayland virtual keyboard paste failed: {err:?}");
                    self.invalidate_wrtype_client();
                }
            }
        }

        debug!("Falling back to enigo paste");
        paste_via_enigo(modifiers, key)
    }

    async fn use_shift(&self) -> bool {
        let default_shift = self.settings.shift_by_default;
        let Some(dispatcher) = self.hyprland_dispatcher.as_ref() else {
            return default_shift;
        };

        match dispatcher.active_window_class().await {
            Ok(Some(class)) => {
                let hint = self.settings.shift_hint_for_class(&class);
                debug!(class = class.as_str(), ?hint, "Active window classification");
                hint.unwrap_or(default_shift)
            }
            Ok(None) => default_shift,
            Err(err) => {
                warn!("Failed to query Hyprland active window class: {err:?}");
                default_shift
            }
        }
    }

    fn ensure_wrtype_client(&mut self) -> Option<&mut WrtypeClient> {
        if !self.wayland_env {
            return None;
        }

        if self.wrtype_client.is_none() && !self.wrtype_attempted {
            self.wrtype_attempted = true;
            match WrtypeClient::new() {
                Ok(client) => {
                    debug!("Initialized Wayland virtual keyboard client");
                    self.wrtype_client = Some(client);
                }
                Err(err) => {
                    warn!("Failed to initialize Wayland virtual keyboard client: {err:?}");
                }
            }
        }

        self.wrtype_client.as_mut()
    }

    fn invalidate_wrtype_client(&mut self) {
        self.wrtype_client = None;
        self.wrtype_attempted = false;
    }
}

fn paste_via_enigo(modifiers: &[&str], key: &str) -> Result<()> {
    use enigo::{Direction, Key};

    // Created per paste so no virtual keyboard lingers between triggers.
    let mut enigo =
        enigo::Enigo::new(&Settings::default()).context("Failed to initialize enigo")?;

    let held: Vec<Key> = modifiers
        .iter()
        .map(|name| match *name {
            "shift" => Key::Shift,
            _ => Key::Control,
        })
        .collect();
    let key = match key {
        "Insert" => Key::Insert,
        other => Key::Unicode(other.chars().next().unwrap_or('v')),
    };

    for modifier in &held {
        enigo
            .key(*modifier, Direction::Press)
            .context("Failed to press modifier")?;
    }
    enigo
        .key(key, Direction::Click)
        .context("Failed to press paste key")?;
    for modifier in held.iter().rev() {
        enigo
            .key(*modifier, Direction::Release)
            .context("Failed to release modifier")?;
    }

    info!("📋 Pasted via enigo fallback");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(extra: &[&str]) -> PasteSettings {
        PasteSettings {
            shift_by_default: false,
            global_shortcut: false,
            extra_shift_classes: extra.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn terminals_need_shift() {
        let settings = settings(&[]);
        assert_eq!(settings.shift_hint_for_class("kitty"), Some(true));
        assert_eq!(settings.shift_hint_for_class("org.custom.Terminal"), Some(true));
        assert_eq!(settings.shift_hint_for_class("firefox"), None);
    }

    #[test]
    fn extra_classes_from_hints() {
        let settings = settings(&["zed"]);
        assert_eq!(settings.shift_hint_for_class("Zed"), Some(true));
        assert_eq!(settings.shift_hint_for_class("dev.zed"), Some(true));
    }

    #[test]
    fn settings_normalize_config_hints() {
        let mut config = Config::default();
        config.paste_hints.shift = vec!["  MyTerm ".into(), "".into()];
        let settings = PasteSettings::from_config(&config);
        assert_eq!(settings.extra_shift_classes.len(), 1);
        assert!(settings.extra_shift_classes.contains("myterm"));
    }

    #[test]
    fn extracts_class_from_plain_hyprland_output() {
        let sample = "Address: 0x123456\nClass: kitty\nTitle: sample\n";
        assert_eq!(extract_window_class(sample), Some("kitty".to_string()));
    }

    #[test]
    fn extracts_class_from_json_hyprland_output() {
        let sample = r#"{"address":"0x123","class":"foot","title":"shell"}"#;
        assert_eq!(extract_window_class(sample), Some("foot".to_string()));
    }
}

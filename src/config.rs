use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::paths::expand_tilde;
use crate::secrets::{is_valid_secret_name, mask_placeholders};
use crate::transform::Direction;

const CONFIG_FILE_NAME: &str = "config.jsonc";
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

fn default_true() -> bool {
    true
}

/// One pattern -> replacement transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
    #[serde(default)]
    pub preserve_case: bool,
    /// Text to restore when reversing; derived from the pattern when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_source: Option<String>,
}

impl Rule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            preserve_case: false,
            reverse_source: None,
        }
    }

    pub fn preserving_case(mut self) -> Self {
        self.preserve_case = true;
        self
    }

    pub fn with_reverse_source(mut self, source: impl Into<String>) -> Self {
        self.reverse_source = Some(source.into());
        self
    }
}

/// A named set of rules bound to a forward and optional reverse trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub trigger: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_trigger: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Profile {
    pub fn new(name: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            trigger: trigger.into(),
            reverse_trigger: None,
            rules: Vec::new(),
        }
    }

    pub fn with_reverse_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.reverse_trigger = Some(trigger.into());
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// How resolved secret values are spliced into regular expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretPatternMode {
    /// Value is inserted as regex syntax.
    #[default]
    Raw,
    /// Value is regex-escaped and matches literally.
    Escaped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PasteHintsConfig {
    /// Extra window classes that need Ctrl+Shift+V.
    pub shift: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub profiles: Vec<Profile>,
    /// Secret names that placeholders may resolve against.
    pub secrets: Vec<String>,
    pub temporary_clipboard: bool,
    pub automatic_revert: bool,
    pub paste_after_transform: bool,
    pub paste_delay_ms: u64,
    pub revert_delay_ms: u64,
    /// Per-rule regex budget; 0 disables it.
    pub regex_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert_shortcut: Option<String>,
    /// Logs the latest before/after diff when pressed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_shortcut: Option<String>,
    pub secret_pattern_mode: SecretPatternMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_error_level: Option<DiagnosticLevel>,
    pub status_file: bool,
    pub shift_paste: bool,
    pub global_paste_shortcut: bool,
    pub paste_hints: PasteHintsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            secrets: Vec::new(),
            temporary_clipboard: true,
            automatic_revert: false,
            paste_after_transform: true,
            paste_delay_ms: 100,
            revert_delay_ms: 1500,
            regex_timeout_ms: 250,
            revert_shortcut: None,
            diff_shortcut: None,
            secret_pattern_mode: SecretPatternMode::Raw,
            rule_error_level: None,
            status_file: true,
            shift_paste: true,
            global_paste_shortcut: false,
            paste_hints: PasteHintsConfig::default(),
        }
    }
}

/// What a global shortcut does when pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingAction {
    Transform(Direction),
    Revert,
    ShowDiff,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub shortcut: String,
    pub action: BindingAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("profile #{position} has an empty name")]
    EmptyProfileName { position: usize },
    #[error("duplicate profile name '{0}'")]
    DuplicateProfile(String),
    #[error("profile '{profile}' has an empty {which} trigger")]
    EmptyTrigger {
        profile: String,
        which: &'static str,
    },
    #[error("profile '{profile}' rule #{position} has an empty pattern")]
    EmptyPattern { profile: String, position: usize },
    #[error("profile '{profile}' rule #{position} has an invalid pattern: {message}")]
    InvalidPattern {
        profile: String,
        position: usize,
        message: String,
    },
    #[error("invalid secret name '{0}' (use letters, digits, '_', '.', '-')")]
    InvalidSecretName(String),
    #[error("secret '{0}' is registered twice")]
    DuplicateSecret(String),
    #[error("{0} shortcut is empty")]
    EmptyShortcut(&'static str),
}

impl Config {
    /// Rejects configurations the engine must never see.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for (index, profile) in self.profiles.iter().enumerate() {
            if profile.name.trim().is_empty() {
                return Err(ConfigError::EmptyProfileName {
                    position: index + 1,
                });
            }
            if !names.insert(profile.name.as_str()) {
                return Err(ConfigError::DuplicateProfile(profile.name.clone()));
            }
            if profile.trigger.trim().is_empty() {
                return Err(ConfigError::EmptyTrigger {
                    profile: profile.name.clone(),
                    which: "forward",
                });
            }
            if profile
                .reverse_trigger
                .as_deref()
                .is_some_and(|trigger| trigger.trim().is_empty())
            {
                return Err(ConfigError::EmptyTrigger {
                    profile: profile.name.clone(),
                    which: "reverse",
                });
            }

            for (rule_index, rule) in profile.rules.iter().enumerate() {
                if rule.pattern.is_empty() {
                    return Err(ConfigError::EmptyPattern {
                        profile: profile.name.clone(),
                        position: rule_index + 1,
                    });
                }
                if let Err(err) = regex::Regex::new(&mask_placeholders(&rule.pattern)) {
                    return Err(ConfigError::InvalidPattern {
                        profile: profile.name.clone(),
                        position: rule_index + 1,
                        message: err.to_string(),
                    });
                }
            }
        }

        let mut secrets = HashSet::new();
        for name in &self.secrets {
            if !is_valid_secret_name(name) {
                return Err(ConfigError::InvalidSecretName(name.clone()));
            }
            if !secrets.insert(name.as_str()) {
                return Err(ConfigError::DuplicateSecret(name.clone()));
            }
        }

        for (which, shortcut) in [
            ("revert", &self.revert_shortcut),
            ("diff", &self.diff_shortcut),
        ] {
            if shortcut
                .as_deref()
                .is_some_and(|shortcut| shortcut.trim().is_empty())
            {
                return Err(ConfigError::EmptyShortcut(which));
            }
        }

        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    pub fn regex_budget(&self) -> Option<Duration> {
        (self.regex_timeout_ms > 0).then(|| Duration::from_millis(self.regex_timeout_ms))
    }

    pub fn paste_delay(&self) -> Duration {
        Duration::from_millis(self.paste_delay_ms)
    }

    pub fn revert_delay(&self) -> Duration {
        Duration::from_millis(self.revert_delay_ms)
    }

    /// Every distinct shortcut the listener must watch, in configuration order.
    pub fn bindings(&self) -> Vec<Binding> {
        let mut seen = HashSet::new();
        let mut bindings = Vec::new();

        let mut push = |shortcut: &str, action: BindingAction| {
            let binding = Binding {
                shortcut: shortcut.to_string(),
                action,
            };
            if seen.insert(binding.clone()) {
                bindings.push(binding);
            }
        };

        for profile in &self.profiles {
            push(&profile.trigger, BindingAction::Transform(Direction::Forward));
            if let Some(reverse) = profile.reverse_trigger.as_deref() {
                push(reverse, BindingAction::Transform(Direction::Reverse));
            }
        }
        if let Some(revert) = self.revert_shortcut.as_deref() {
            push(revert, BindingAction::Revert);
        }
        if let Some(diff) = self.diff_shortcut.as_deref() {
            push(diff, BindingAction::ShowDiff);
        }

        bindings
    }

    /// Configuration written on first start.
    pub fn example() -> Self {
        Self {
            profiles: vec![
                Profile::new("tidy-whitespace", "ctrl+alt+v")
                    .with_rule(Rule::new(r"\t", " "))
                    .with_rule(Rule::new(r" {2,}", " ")),
                Profile::new("nicknames", "ctrl+alt+n")
                    .with_reverse_trigger("ctrl+alt+shift+n")
                    .with_rule(Rule::new(r"(?i)\b(robert|bob)\b", "rob").preserving_case()),
            ],
            revert_shortcut: Some("ctrl+alt+z".to_string()),
            ..Self::default()
        }
    }
}

/// Parses JSONC configuration text; an empty document yields defaults.
pub fn parse_config(text: &str) -> Result<Config> {
    let value = jsonc_parser::parse_to_serde_value(text, &Default::default())
        .map_err(|err| anyhow::anyhow!("Invalid JSONC: {err}"))?;
    match value {
        Some(value) => serde_json::from_value(value).context("Invalid configuration structure"),
        None => Ok(Config::default()),
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "clipswap-rs")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .context("Could not determine configuration directory")
}

fn read_config_file(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config =
        parse_config(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn write_config_file(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    let staging = path.with_extension("jsonc.tmp");
    fs::write(&staging, json)
        .with_context(|| format!("Failed to write config file {}", staging.display()))?;
    fs::rename(&staging, path)
        .with_context(|| format!("Failed to replace config file {}", path.display()))?;
    Ok(())
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Owns the configuration file and publishes immutable snapshots of it.
///
/// Readers hold an `Arc<Config>` for the duration of one trigger; reloads and
/// edits swap in a new snapshot instead of mutating the current one.
pub struct ConfigManager {
    config_path: PathBuf,
    sender: Arc<watch::Sender<Arc<Config>>>,
    edit_lock: Arc<Mutex<()>>,
}

impl ConfigManager {
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path()?)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config_path = expand_tilde(&path.as_ref().to_string_lossy());

        if !config_path.exists() {
            info!("Creating default configuration at {}", config_path.display());
            write_config_file(&config_path, &Config::example())?;
        }

        let config = read_config_file(&config_path)?;
        let (sender, _) = watch::channel(Arc::new(config));

        Ok(Self {
            config_path,
            sender: Arc::new(sender),
            edit_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn get(&self) -> Arc<Config> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.sender.subscribe()
    }

    /// Re-reads the file; returns whether a new snapshot was published.
    pub fn reload(&self) -> Result<bool> {
        let config = read_config_file(&self.config_path)?;
        Ok(publish(&self.sender, config))
    }

    /// Polls the file for changes on a background thread until the manager
    /// is dropped. Invalid edits keep the previous snapshot.
    pub fn start_watching(&self) {
        let sender: Weak<watch::Sender<Arc<Config>>> = Arc::downgrade(&self.sender);
        let path = self.config_path.clone();
        let mut last_modified = modified_at(&path);

        thread::spawn(move || loop {
            thread::sleep(WATCH_INTERVAL);
            let Some(sender) = sender.upgrade() else {
                debug!("Config manager dropped; stopping watcher");
                break;
            };

            let current = modified_at(&path);
            if current == last_modified {
                continue;
            }
            last_modified = current;

            match read_config_file(&path) {
                Ok(config) => {
                    if publish(&sender, config) {
                        info!("Configuration reloaded from {}", path.display());
                    }
                }
                Err(err) => {
                    error!("Ignoring invalid configuration change: {err:#}");
                }
            }
        });
    }

    pub fn set_profile_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.edit(|config| {
            let profile = config
                .profiles
                .iter_mut()
                .find(|profile| profile.name == name)
                .with_context(|| format!("No profile named '{name}'"))?;
            profile.enabled = enabled;
            Ok(())
        })
    }

    /// Appends a rule that replaces `find` literally.
    pub fn add_simple_rule(
        &self,
        profile_name: &str,
        find: &str,
        replace: &str,
        preserve_case: bool,
        reverse_source: Option<String>,
    ) -> Result<()> {
        if find.is_empty() {
            anyhow::bail!("Text to find must not be empty");
        }

        let escaped = regex::escape(find);
        // Reversing derives the source from the pattern, which would keep
        // the escapes; record the literal instead.
        let reverse_source = reverse_source.or_else(|| (escaped != find).then(|| find.to_string()));
        let pattern = if preserve_case {
            format!("(?i){escaped}")
        } else {
            escaped
        };

        self.edit(|config| {
            let profile = config
                .profiles
                .iter_mut()
                .find(|profile| profile.name == profile_name)
                .with_context(|| format!("No profile named '{profile_name}'"))?;
            profile.rules.push(Rule {
                pattern,
                replacement: replace.to_string(),
                preserve_case,
                reverse_source,
            });
            Ok(())
        })
    }

    /// Registers a secret name; returns `false` if it already was.
    pub fn add_secret_reference(&self, name: &str) -> Result<bool> {
        let mut added = false;
        self.edit(|config| {
            if !config.secrets.iter().any(|existing| existing == name) {
                config.secrets.push(name.to_string());
                added = true;
            }
            Ok(())
        })?;
        Ok(added)
    }

    /// Unregisters a secret name; returns `false` if it was not registered.
    pub fn remove_secret_reference(&self, name: &str) -> Result<bool> {
        let mut removed = false;
        self.edit(|config| {
            let before = config.secrets.len();
            config.secrets.retain(|existing| existing != name);
            removed = config.secrets.len() != before;
            Ok(())
        })?;
        Ok(removed)
    }

    fn edit<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        let _guard = self.edit_lock.lock();
        let mut config = read_config_file(&self.config_path)?;
        apply(&mut config)?;
        config
            .validate()
            .context("Edit would produce an invalid configuration")?;
        write_config_file(&self.config_path, &config)?;
        publish(&self.sender, config);
        Ok(())
    }
}

fn publish(sender: &watch::Sender<Arc<Config>>, config: Config) -> bool {
    if **sender.borrow() == config {
        debug!("Config unchanged; ignoring reload");
        return false;
    }
    sender.send_replace(Arc::new(config));
    true
}

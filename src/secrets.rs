use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::config::SecretPatternMode;

/// Keyring service every secret is stored under.
pub const KEYRING_SERVICE: &str = "clipswap-rs";

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid placeholder regex")
});

/// Read-only lookup of secret values by logical name.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// In-memory secrets, used for tests and command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, String)> for StaticSecrets {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl SecretResolver for StaticSecrets {
    fn resolve(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Secrets held by the OS credential store.
///
/// Only names registered in the configuration are looked up, so a stray
/// `{{name}}` in a pattern never probes arbitrary keyring entries.
#[derive(Debug, Clone)]
pub struct KeyringSecrets {
    service: String,
    names: HashSet<String>,
}

impl KeyringSecrets {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            service: KEYRING_SERVICE.to_string(),
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl SecretResolver for KeyringSecrets {
    fn resolve(&self, name: &str) -> Option<String> {
        if !self.names.contains(name) {
            debug!(secret = name, "Placeholder references an unregistered secret");
            return None;
        }

        let entry = match keyring::Entry::new(&self.service, name) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(secret = name, "Failed to open keyring entry: {err}");
                return None;
            }
        };

        match entry.get_password() {
            Ok(value) => Some(value),
            Err(keyring::Error::NoEntry) => {
                debug!(secret = name, "Secret registered but not present in keyring");
                None
            }
            Err(err) => {
                warn!(secret = name, "Failed to read secret from keyring: {err}");
                None
            }
        }
    }
}

/// Consults each resolver in order; the first hit wins.
#[derive(Clone, Default)]
pub struct LayeredSecrets {
    layers: Vec<Arc<dyn SecretResolver>>,
}

impl LayeredSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, layer: Arc<dyn SecretResolver>) -> Self {
        self.layers.push(layer);
        self
    }
}

impl SecretResolver for LayeredSecrets {
    fn resolve(&self, name: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.resolve(name))
    }
}

/// Writable side of the secret store, used by `secret add/remove`.
pub trait SecretStore {
    fn store(&self, name: &str, value: &str) -> Result<()>;
    /// Returns `false` when there was nothing to delete.
    fn delete(&self, name: &str) -> Result<bool>;
}

/// The OS credential store under [`KEYRING_SERVICE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringStore;

impl SecretStore for KeyringStore {
    fn store(&self, name: &str, value: &str) -> Result<()> {
        store_secret(name, value)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        delete_secret(name)
    }
}

pub fn store_secret(name: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, name)
        .with_context(|| format!("Failed to open keyring entry for secret '{name}'"))?;
    entry
        .set_password(value)
        .with_context(|| format!("Failed to store secret '{name}' in keyring"))
}

/// Removes a secret; returns `false` when there was nothing to delete.
pub fn delete_secret(name: &str) -> Result<bool> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, name)
        .with_context(|| format!("Failed to open keyring entry for secret '{name}'"))?;
    match entry.delete_credential() {
        Ok(()) => Ok(true),
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to delete secret '{name}' from keyring"))
        }
    }
}

pub fn is_valid_secret_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
}

/// Names of every `{{name}}` placeholder in `text`, in order of appearance.
pub fn placeholder_names(text: &str) -> Vec<String> {
    PLACEHOLDER_REGEX
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|name| name.as_str().to_string()))
        .collect()
}

/// Replaces every placeholder with its regex-escaped literal text so a
/// pattern can be syntax-checked without consulting the secret store.
pub fn mask_placeholders(pattern: &str) -> String {
    PLACEHOLDER_REGEX
        .replace_all(pattern, |caps: &regex::Captures<'_>| regex::escape(&caps[0]))
        .into_owned()
}

/// Text with its placeholders substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substituted {
    pub text: String,
    /// At least one placeholder resolved to a secret value.
    pub used_secrets: bool,
}

fn substitute<F, G>(
    text: &str,
    secrets: &dyn SecretResolver,
    resolved: F,
    unresolved: G,
) -> Substituted
where
    F: Fn(&str) -> String,
    G: Fn(&str) -> String,
{
    if !text.contains("{{") {
        return Substituted {
            text: text.to_string(),
            used_secrets: false,
        };
    }

    let mut used_secrets = false;
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;

    for caps in PLACEHOLDER_REGEX.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        result.push_str(&text[last_end..whole.start()]);
        match secrets.resolve(name.as_str()) {
            Some(value) => {
                used_secrets = true;
                result.push_str(&resolved(&value));
            }
            None => {
                debug!(secret = name.as_str(), "Placeholder left unresolved");
                result.push_str(&unresolved(whole.as_str()));
            }
        }
        last_end = whole.end();
    }
    result.push_str(&text[last_end..]);

    Substituted {
        text: result,
        used_secrets,
    }
}

/// Resolves placeholders in a regular expression.
///
/// Unresolved placeholders are escaped so they match their own text. Whether
/// resolved values are escaped is a configuration policy: `Raw` splices them
/// in as regex syntax.
pub fn resolve_pattern(
    pattern: &str,
    secrets: &dyn SecretResolver,
    mode: SecretPatternMode,
) -> Substituted {
    substitute(
        pattern,
        secrets,
        |value| match mode {
            SecretPatternMode::Raw => value.to_string(),
            SecretPatternMode::Escaped => regex::escape(value),
        },
        regex::escape,
    )
}

/// Resolves placeholders in a replacement used as an expansion template;
/// `$` inside secret values is doubled so it stays literal.
pub fn resolve_template(replacement: &str, secrets: &dyn SecretResolver) -> Substituted {
    substitute(replacement, secrets, |value| value.replace('$', "$$"), str::to_string)
}

/// Resolves placeholders into plain text.
pub fn resolve_literal(text: &str, secrets: &dyn SecretResolver) -> Substituted {
    substitute(text, secrets, str::to_string, str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> StaticSecrets {
        StaticSecrets::new()
            .with("user", "alice")
            .with("price", "$5.00")
    }

    #[test]
    fn finds_placeholder_names() {
        assert_eq!(
            placeholder_names("{{user}} and {{ host.name }}"),
            vec!["user".to_string(), "host.name".to_string()]
        );
    }

    #[test]
    fn literal_resolution_keeps_unknown_placeholders() {
        let resolved = resolve_literal("hi {{user}} from {{missing}}", &secrets());
        assert_eq!(resolved.text, "hi alice from {{missing}}");
        assert!(resolved.used_secrets);
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        let resolved = resolve_literal("plain", &secrets());
        assert_eq!(resolved.text, "plain");
        assert!(!resolved.used_secrets);
    }

    #[test]
    fn raw_pattern_mode_splices_value_unescaped() {
        let resolved = resolve_pattern("cost {{price}}", &secrets(), SecretPatternMode::Raw);
        assert_eq!(resolved.text, "cost $5.00");
    }

    #[test]
    fn escaped_pattern_mode_escapes_value() {
        let resolved = resolve_pattern("cost {{price}}", &secrets(), SecretPatternMode::Escaped);
        assert_eq!(resolved.text, r"cost \$5\.00");
    }

    #[test]
    fn unresolved_pattern_placeholder_matches_literally() {
        let resolved = resolve_pattern("{{missing}}", &secrets(), SecretPatternMode::Raw);
        let regex = Regex::new(&resolved.text).expect("escaped placeholder compiles");
        assert!(regex.is_match("x {{missing}} y"));
        assert!(!resolved.used_secrets);
    }

    #[test]
    fn template_doubles_dollar_signs_in_values() {
        let resolved = resolve_template("pay {{price}} for $1", &secrets());
        assert_eq!(resolved.text, "pay $$5.00 for $1");
    }

    #[test]
    fn masked_placeholders_compile() {
        let masked = mask_placeholders("({{user}}|bob)");
        assert!(Regex::new(&masked).is_ok());
    }

    #[test]
    fn layered_secrets_prefer_earlier_layers() {
        let layered = LayeredSecrets::new()
            .push(Arc::new(StaticSecrets::new().with("user", "override")))
            .push(Arc::new(secrets()));
        assert_eq!(layered.resolve("user").as_deref(), Some("override"));
        assert_eq!(layered.resolve("price").as_deref(), Some("$5.00"));
        assert_eq!(layered.resolve("nope"), None);
    }

    #[test]
    fn validates_secret_names() {
        assert!(is_valid_secret_name("work.email"));
        assert!(is_valid_secret_name("api_key-2"));
        assert!(!is_valid_secret_name(""));
        assert!(!is_valid_secret_name("has space"));
        assert!(!is_valid_secret_name("{{x}}"));
    }
}

pub mod alternatives;
pub mod case;
pub mod rule;
pub mod selector;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DiagnosticLevel};
use crate::history::{DiffPair, HistoryManager, RecordOutcome, RevertState};
use crate::input::ClipboardIo;
use crate::logging::{record_text_pipeline, PipelineStepRecord, TextPipelineRecord};
use crate::secrets::SecretResolver;

pub use alternatives::extract_primary;
pub use case::{match_case, CaseClass};
pub use rule::{RuleApplier, RuleError, RuleOutcome};
pub use selector::{select, SelectedProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Reverse => f.write_str("reverse"),
        }
    }
}

/// One rule that ran without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleStep {
    pub profile: String,
    /// 1-based position of the rule within its profile.
    pub position: usize,
    pub replacements: usize,
    pub used_secrets: bool,
}

/// A rule that was skipped.
#[derive(Debug)]
pub struct RuleDiagnostic {
    pub profile: String,
    pub position: usize,
    pub error: RuleError,
}

impl RuleDiagnostic {
    fn report(&self, level_override: Option<DiagnosticLevel>) {
        let level = level_override.unwrap_or_else(|| self.error.default_level());
        let profile = self.profile.as_str();
        let position = self.position;
        let error = &self.error;
        match level {
            DiagnosticLevel::Debug => debug!(profile, rule = position, "Rule skipped: {error}"),
            DiagnosticLevel::Info => info!(profile, rule = position, "Rule skipped: {error}"),
            DiagnosticLevel::Warn => warn!(profile, rule = position, "Rule skipped: {error}"),
            DiagnosticLevel::Error => error!(profile, rule = position, "Rule skipped: {error}"),
        }
    }
}

/// Result of running every selected profile over one piece of text.
#[derive(Debug)]
pub struct Transformation {
    pub input: String,
    pub text: String,
    pub replacements: usize,
    /// Profiles that ran, in order.
    pub profiles: Vec<String>,
    pub steps: Vec<RuleStep>,
    pub diagnostics: Vec<RuleDiagnostic>,
}

impl Transformation {
    fn unchanged(text: &str) -> Self {
        Self {
            input: text.to_string(),
            text: text.to_string(),
            replacements: 0,
            profiles: Vec::new(),
            steps: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Rules can cancel each other out, so compare text rather than counts.
    pub fn changed(&self) -> bool {
        self.text != self.input
    }
}

/// Runs every enabled profile bound to `trigger`, rule after rule, each rule
/// seeing the previous rule's output.
pub fn transform_text(
    config: &Config,
    secrets: &dyn SecretResolver,
    text: &str,
    trigger: &str,
    direction: Direction,
) -> Transformation {
    let selected = select(&config.profiles, trigger, direction);
    if selected.is_empty() {
        debug!(trigger, %direction, "No enabled profile bound to trigger");
        return Transformation::unchanged(text);
    }

    let applier = RuleApplier::new(secrets)
        .with_pattern_mode(config.secret_pattern_mode)
        .with_budget(config.regex_budget());

    let mut pipeline = if tracing::level_enabled!(tracing::Level::DEBUG) {
        Some(Vec::new())
    } else {
        None
    };
    let mut result = Transformation::unchanged(text);

    for selection in selected {
        let profile = selection.profile;
        result.profiles.push(profile.name.clone());

        for (index, rule) in profile.rules.iter().enumerate() {
            let position = index + 1;
            match applier.apply(&result.text, rule, selection.direction) {
                Ok(outcome) => {
                    if let Some(ref mut logged_steps) = pipeline {
                        let label = format!("{}#{position}", profile.name);
                        let count = (outcome.replacements > 0).then_some(outcome.replacements);
                        logged_steps.push(if outcome.used_secrets {
                            PipelineStepRecord::redacted(label, count)
                        } else {
                            PipelineStepRecord::new(
                                label,
                                result.text.clone(),
                                outcome.text.clone(),
                                count,
                            )
                        });
                    }

                    result.replacements += outcome.replacements;
                    result.steps.push(RuleStep {
                        profile: profile.name.clone(),
                        position,
                        replacements: outcome.replacements,
                        used_secrets: outcome.used_secrets,
                    });
                    result.text = outcome.text;
                }
                Err(error) => {
                    let diagnostic = RuleDiagnostic {
                        profile: profile.name.clone(),
                        position,
                        error,
                    };
                    diagnostic.report(config.rule_error_level);
                    result.diagnostics.push(diagnostic);
                }
            }
        }
    }

    if let Some(logged_steps) = pipeline {
        record_text_pipeline(TextPipelineRecord::new(
            text.to_string(),
            result.text.clone(),
            logged_steps,
        ));
    }

    result
}

#[derive(Debug)]
pub struct TriggerOutcome {
    pub transformation: Transformation,
    pub record: RecordOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertRequest {
    /// User asked for it.
    Explicit,
    /// Delayed automatic revert scheduled for this snapshot generation.
    Scheduled(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertOutcome {
    Reverted { restored: String },
    /// Nothing pending.
    NothingToRevert,
    /// A newer snapshot replaced the one this revert was scheduled for.
    Superseded,
    /// The clipboard no longer holds our output; the snapshot was dropped.
    ClipboardChanged,
}

/// Shared entry point for trigger events.
///
/// All mutable state lives in one `HistoryManager` behind a read/write lock
/// that is held for the whole read -> transform -> write -> record sequence
/// of a trigger, so concurrent triggers are serialized.
pub struct TransformationEngine {
    secrets: RwLock<Arc<dyn SecretResolver>>,
    history: RwLock<HistoryManager>,
}

impl TransformationEngine {
    pub fn new(secrets: Arc<dyn SecretResolver>) -> Self {
        Self {
            secrets: RwLock::new(secrets),
            history: RwLock::new(HistoryManager::new()),
        }
    }

    /// Swaps the secret resolver, e.g. after the registered names changed.
    pub fn set_secrets(&self, secrets: Arc<dyn SecretResolver>) {
        *self.secrets.write() = secrets;
    }

    /// Transforms `text` without touching history.
    pub fn transform(
        &self,
        config: &Config,
        text: &str,
        trigger: &str,
        direction: Direction,
    ) -> Transformation {
        let secrets = Arc::clone(&self.secrets.read());
        transform_text(config, secrets.as_ref(), text, trigger, direction)
    }

    /// Handles one trigger end to end. Clipboard failures abort before
    /// history is touched, and nothing is written unless the text changed.
    pub fn run_trigger(
        &self,
        config: &Config,
        clipboard: &mut dyn ClipboardIo,
        trigger: &str,
        direction: Direction,
    ) -> Result<TriggerOutcome> {
        let mut history = self.history.write();

        let original = clipboard.read().context("Failed to read clipboard")?;
        let transformation = self.transform(config, &original, trigger, direction);

        if transformation.changed() {
            clipboard
                .write(&transformation.text)
                .context("Failed to write transformed text to clipboard")?;
        }

        let record = history.record(&original, &transformation.text, config.temporary_clipboard);
        Ok(TriggerOutcome {
            transformation,
            record,
        })
    }

    pub fn revert(
        &self,
        clipboard: &mut dyn ClipboardIo,
        request: RevertRequest,
    ) -> Result<RevertOutcome> {
        let mut history = self.history.write();

        if history.state() == RevertState::Idle {
            return Ok(RevertOutcome::NothingToRevert);
        }
        if let RevertRequest::Scheduled(generation) = request {
            if generation != history.generation() {
                debug!(
                    scheduled = generation,
                    current = history.generation(),
                    "Skipping stale scheduled revert"
                );
                return Ok(RevertOutcome::Superseded);
            }
        }

        let current = clipboard.read().context("Failed to read clipboard")?;
        if !history.holds_own_output(&current) {
            history.observe_external_copy();
            return Ok(RevertOutcome::ClipboardChanged);
        }

        let Some(original) = history.snapshot().map(|snapshot| snapshot.original.clone()) else {
            return Ok(RevertOutcome::NothingToRevert);
        };
        clipboard
            .write(&original)
            .context("Failed to restore original clipboard text")?;
        history.complete_revert();

        Ok(RevertOutcome::Reverted { restored: original })
    }

    /// Turning temporary storage off forgets the snapshot without
    /// rewriting the clipboard.
    pub fn set_temporary_clipboard(&self, enabled: bool) {
        if !enabled {
            self.history.write().disable();
        }
    }

    pub fn revert_state(&self) -> RevertState {
        self.history.read().state()
    }

    /// Generation of the latest recorded change.
    pub fn generation(&self) -> u64 {
        self.history.read().generation()
    }

    pub fn last_diff_pair(&self) -> DiffPair {
        self.history.read().last_diff_pair()
    }
}

use anyhow::{Context, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{Binding, BindingAction, Config, ConfigManager};
use crate::diff::DiffReport;
use crate::history::RecordOutcome;
use crate::input::{GlobalShortcuts, PasteSettings, PasteSimulator, SystemClipboard, TriggerEvent};
use crate::logging::record_diff;
use crate::scheduler::DelayedTasks;
use crate::secrets::{KeyringSecrets, SecretResolver};
use crate::status::StatusWriter;
use crate::transform::{Direction, RevertOutcome, RevertRequest, TransformationEngine};

struct ShortcutListener {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    bindings: Vec<Binding>,
}

impl ShortcutListener {
    fn spawn(bindings: Vec<Binding>, tx: mpsc::Sender<TriggerEvent>) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let runner_flag = Arc::clone(&stop_flag);
        let runner_bindings = bindings.clone();

        let handle = thread::spawn(move || match GlobalShortcuts::new(runner_bindings) {
            Ok(shortcuts) => {
                if let Err(e) = shortcuts.run(tx, runner_flag) {
                    error!("Global shortcuts error: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to initialize global shortcuts: {}", e);
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
            bindings,
        }
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.join() {
                error!("Shortcut listener thread panicked: {:?}", err);
            }
        }
    }
}

impl Drop for ShortcutListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Side effects that fire after a delay and run back on the app task.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DeferredAction {
    Paste {
        trigger: String,
        generation: Option<u64>,
    },
    Revert {
        generation: u64,
    },
}

/// There is one clipboard, so at most one paste and one revert are pending,
/// whichever trigger scheduled them.
const PASTE_KEY: &str = "paste";
const REVERT_KEY: &str = "revert";

fn schedule_action(
    tasks: &DelayedTasks,
    tx: &mpsc::Sender<DeferredAction>,
    key: &'static str,
    delay: Duration,
    action: DeferredAction,
) {
    let tx = tx.clone();
    tasks.schedule(key, delay, async move {
        let _ = tx.send(action).await;
    });
}

/// A paste scheduled for an older change would paste text that has since
/// been transformed again.
fn paste_is_current(generation: Option<u64>, current: u64) -> bool {
    generation.is_none_or(|generation| generation == current)
}

/// The clipboard holds newer text than any pending paste or revert.
fn supersede_pending(tasks: &DelayedTasks) {
    tasks.cancel(PASTE_KEY);
    tasks.cancel(REVERT_KEY);
}

/// The engine's latest before/after pair, if a change is on record.
fn last_diff(engine: &TransformationEngine) -> Option<DiffReport> {
    DiffReport::from_pair(&engine.last_diff_pair())
}

fn build_secrets(config: &Config) -> Arc<dyn SecretResolver> {
    Arc::new(KeyringSecrets::new(config.secrets.iter().cloned()))
}

pub struct ClipswapApp {
    config_manager: ConfigManager,
    config: Arc<Config>,
    engine: TransformationEngine,
    clipboard: SystemClipboard,
    paster: PasteSimulator,
    status_writer: StatusWriter,
    tasks: DelayedTasks,
    trigger_tx: mpsc::Sender<TriggerEvent>,
    trigger_rx: Option<mpsc::Receiver<TriggerEvent>>,
    action_tx: mpsc::Sender<DeferredAction>,
    action_rx: Option<mpsc::Receiver<DeferredAction>>,
    listener: Option<ShortcutListener>,
    /// Whether the latest change used a secret, so its diff stays out of logs.
    diff_has_secrets: bool,
}

impl ClipswapApp {
    pub fn new(config_manager: ConfigManager) -> Result<Self> {
        let config = config_manager.get();

        let engine = TransformationEngine::new(build_secrets(&config));
        let clipboard = SystemClipboard::new()?;
        let paster = PasteSimulator::new(PasteSettings::from_config(&config));

        let status_writer = StatusWriter::new(config.status_file)?;
        status_writer.set_idle("Ready")?;

        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (action_tx, action_rx) = mpsc::channel(16);

        Ok(Self {
            config_manager,
            config,
            engine,
            clipboard,
            paster,
            status_writer,
            tasks: DelayedTasks::new(),
            trigger_tx,
            trigger_rx: Some(trigger_rx),
            action_tx,
            action_rx: Some(action_rx),
            listener: None,
            diff_has_secrets: false,
        })
    }

    /// Runs until the shortcut or config channels close or `shutdown` fires.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        info!("🚀 clipswap running!");

        let mut trigger_rx = self
            .trigger_rx
            .take()
            .context("Trigger receiver already consumed")?;
        let mut action_rx = self
            .action_rx
            .take()
            .context("Action receiver already consumed")?;
        self.ensure_listener();

        let mut config_rx = self.config_manager.subscribe();

        loop {
            tokio::select! {
                event = trigger_rx.recv() => {
                    let Some(event) = event else {
                        info!("Shortcut channel closed");
                        break;
                    };
                    if let Err(e) = self.handle_trigger(event) {
                        error!("Error handling trigger: {:#}", e);
                    }
                }
                Some(action) = action_rx.recv() => {
                    self.handle_deferred(action).await;
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                result = config_rx.changed() => {
                    if result.is_err() {
                        info!("Configuration watcher closed");
                        break;
                    }
                    let updated = config_rx.borrow_and_update().clone();
                    self.apply_config_update(updated);
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    fn ensure_listener(&mut self) {
        let bindings = self.config.bindings();
        if self
            .listener
            .as_ref()
            .is_some_and(|listener| listener.bindings == bindings)
        {
            return;
        }

        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
        if bindings.is_empty() {
            warn!("No enabled profile has a shortcut; nothing to listen for");
            return;
        }
        for binding in &bindings {
            info!("   {} -> {:?}", binding.shortcut, binding.action);
        }
        self.listener = Some(ShortcutListener::spawn(bindings, self.trigger_tx.clone()));
    }

    fn apply_config_update(&mut self, new_config: Arc<Config>) {
        if new_config == self.config {
            debug!("Config unchanged; ignoring update");
            return;
        }
        let old = std::mem::replace(&mut self.config, new_config);
        let config = Arc::clone(&self.config);

        if old.secrets != config.secrets {
            info!("Secret references changed ({} registered)", config.secrets.len());
            self.engine.set_secrets(build_secrets(&config));
        }
        if old.temporary_clipboard != config.temporary_clipboard {
            info!("Temporary clipboard: {}", config.temporary_clipboard);
            self.engine.set_temporary_clipboard(config.temporary_clipboard);
        }
        if old.status_file != config.status_file {
            match StatusWriter::new(config.status_file) {
                Ok(writer) => {
                    if let Err(err) = self.status_writer.cleanup() {
                        warn!("Failed to remove old status file: {err:#}");
                    }
                    self.status_writer = writer;
                }
                Err(err) => warn!("Failed to reconfigure status file: {err:#}"),
            }
        }

        self.paster.update_settings(PasteSettings::from_config(&config));
        self.ensure_listener();
        info!("✅ Configuration update applied");
    }

    fn handle_trigger(&mut self, event: TriggerEvent) -> Result<()> {
        debug!(
            shortcut = event.binding.shortcut.as_str(),
            latency_ms = event.triggered_at.elapsed().as_millis() as u64,
            "Handling trigger"
        );
        match event.binding.action {
            BindingAction::Transform(direction) => {
                self.run_transform(&event.binding.shortcut, direction)
            }
            BindingAction::Revert => {
                self.tasks.cancel_all();
                self.run_revert(RevertRequest::Explicit)
            }
            BindingAction::ShowDiff => {
                self.show_last_diff();
                Ok(())
            }
        }
    }

    fn run_transform(&mut self, trigger: &str, direction: Direction) -> Result<()> {
        let config = Arc::clone(&self.config);

        let outcome = match self
            .engine
            .run_trigger(&config, &mut self.clipboard, trigger, direction)
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report_status(self.status_writer.set_error("clipboard unavailable"));
                return Err(err);
            }
        };

        let transformation = &outcome.transformation;
        if !transformation.changed() {
            info!(trigger, %direction, "No changes to clipboard text");
            return Ok(());
        }

        supersede_pending(&self.tasks);
        let used_secrets = transformation.steps.iter().any(|step| step.used_secrets);
        // A rerun's input is our earlier output, which may already hold a secret.
        self.diff_has_secrets = match outcome.record {
            RecordOutcome::Extended { .. } => self.diff_has_secrets || used_secrets,
            _ => used_secrets,
        };

        info!(
            trigger,
            %direction,
            profiles = transformation.profiles.join(", ").as_str(),
            "✂️  {} replacement(s)",
            transformation.replacements
        );

        let generation = outcome.record.generation();
        let status = match generation {
            Some(_) => self
                .status_writer
                .set_pending(&transformation.profiles, transformation.replacements),
            None => self.status_writer.set_idle("Clipboard transformed"),
        };
        self.report_status(status);

        if config.paste_after_transform {
            let action = DeferredAction::Paste {
                trigger: trigger.to_string(),
                generation,
            };
            schedule_action(&self.tasks, &self.action_tx, PASTE_KEY, config.paste_delay(), action);
        } else if let Some(generation) = generation {
            self.schedule_revert(trigger, generation);
        }

        Ok(())
    }

    fn schedule_revert(&self, trigger: &str, generation: u64) {
        if !self.config.automatic_revert {
            return;
        }
        debug!(trigger, generation, "Scheduling automatic revert");
        schedule_action(
            &self.tasks,
            &self.action_tx,
            REVERT_KEY,
            self.config.revert_delay(),
            DeferredAction::Revert { generation },
        );
    }

    async fn handle_deferred(&mut self, action: DeferredAction) {
        match action {
            DeferredAction::Paste {
                trigger,
                generation,
            } => {
                if !paste_is_current(generation, self.engine.generation()) {
                    debug!(
                        trigger = trigger.as_str(),
                        ?generation,
                        "Skipping paste for a superseded change"
                    );
                    return;
                }
                if let Err(err) = self.paster.simulate_paste().await {
                    warn!("Paste simulation failed: {err:#}");
                }
                if let Some(generation) = generation {
                    self.schedule_revert(&trigger, generation);
                }
            }
            DeferredAction::Revert { generation } => {
                if let Err(err) = self.run_revert(RevertRequest::Scheduled(generation)) {
                    error!("Automatic revert failed: {err:#}");
                }
            }
        }
    }

    fn show_last_diff(&self) {
        let Some(report) = last_diff(&self.engine) else {
            info!("No transformation to diff");
            return;
        };
        record_diff(&report, self.diff_has_secrets);
    }

    fn run_revert(&mut self, request: RevertRequest) -> Result<()> {
        match self.engine.revert(&mut self.clipboard, request) {
            Ok(RevertOutcome::Reverted { .. }) => {
                info!("↩️  Clipboard reverted");
                self.report_status(self.status_writer.set_idle("Clipboard reverted"));
            }
            Ok(RevertOutcome::ClipboardChanged) => {
                info!("Clipboard changed since the transform; revert skipped");
                self.report_status(self.status_writer.set_idle("Ready"));
            }
            Ok(outcome) => debug!(?outcome, ?request, "Nothing to revert"),
            Err(err) => {
                self.report_status(self.status_writer.set_error("revert failed"));
                return Err(err);
            }
        }
        Ok(())
    }

    fn report_status(&self, result: Result<()>) {
        if let Err(err) = result {
            warn!("Failed to update status file: {err:#}");
        }
    }

    fn cleanup(&mut self) {
        self.tasks.cancel_all();
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
        if let Err(err) = self.status_writer.cleanup() {
            warn!("Failed to clean up status file: {err:#}");
        }
    }
}

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use dialoguer::{theme::ColorfulTheme, Password};
use owo_colors::OwoColorize;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::config::{Config, ConfigManager};
use crate::diff::DiffReport;
use crate::secrets::{
    self, KeyringSecrets, KeyringStore, LayeredSecrets, SecretResolver, SecretStore, StaticSecrets,
};
use crate::transform::{transform_text, Direction, Transformation};

#[derive(Parser)]
#[command(
    name = "clipswap-rs",
    version,
    about = "Hotkey-driven, reversible clipboard text transformations"
)]
pub struct Cli {
    /// Configuration file (defaults to the XDG config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the shortcut daemon (default)
    Run,
    /// Transform stdin with the profiles bound to a trigger
    Apply(TransformArgs),
    /// Show what a trigger would change in stdin
    Diff(DiffArgs),
    /// List configured profiles
    Profiles,
    /// Enable a profile
    Enable { name: String },
    /// Disable a profile
    Disable { name: String },
    /// Append a literal find/replace rule to a profile
    AddRule(AddRuleArgs),
    /// Manage secrets referenced as {{name}} in rules
    #[command(subcommand)]
    Secret(SecretCommand),
    /// Validate the configuration and print a summary
    Check,
}

#[derive(Args)]
pub struct TransformArgs {
    /// Trigger id, e.g. ctrl+alt+v
    #[arg(long)]
    pub trigger: String,

    /// Use the reverse direction
    #[arg(long)]
    pub reverse: bool,

    /// Override a secret for this run (name=value); repeatable
    #[arg(long = "secret", value_parser = parse_secret_override)]
    pub secrets: Vec<(String, String)>,
}

impl TransformArgs {
    fn direction(&self) -> Direction {
        if self.reverse {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }
}

#[derive(Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub transform: TransformArgs,

    /// Print a line-based unified diff instead of inline markers
    #[arg(long)]
    pub unified: bool,
}

#[derive(Args)]
pub struct AddRuleArgs {
    pub profile: String,
    pub find: String,
    pub replace: String,

    /// Re-case the replacement to match each occurrence
    #[arg(long)]
    pub preserve_case: bool,

    /// Text to restore when the reverse trigger runs
    #[arg(long)]
    pub reverse_source: Option<String>,
}

#[derive(Subcommand)]
pub enum SecretCommand {
    /// Store a secret in the keyring and register its name
    Add {
        name: String,
        /// Value to store; prompted for when omitted
        #[arg(long)]
        value: Option<String>,
    },
    /// Delete a secret from the keyring and unregister its name
    Remove { name: String },
}

/// Parses `name=value`.
pub fn parse_secret_override(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if !secrets::is_valid_secret_name(name) {
        return Err(format!("invalid secret name '{name}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Command-line overrides first, then the keyring.
fn cli_secrets(config: &Config, overrides: &[(String, String)]) -> Arc<dyn SecretResolver> {
    let overrides: StaticSecrets = overrides.iter().cloned().collect();
    Arc::new(
        LayeredSecrets::new()
            .push(Arc::new(overrides))
            .push(Arc::new(KeyringSecrets::new(config.secrets.iter().cloned()))),
    )
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read stdin")?;
    Ok(input)
}

fn run_transform(config: &Config, args: &TransformArgs, input: &str) -> Transformation {
    let secrets = cli_secrets(config, &args.secrets);
    transform_text(
        config,
        secrets.as_ref(),
        input,
        &args.trigger,
        args.direction(),
    )
}

fn print_summary(transformation: &Transformation) {
    if transformation.profiles.is_empty() {
        eprintln!("{} no enabled profile bound to this trigger", "○".yellow());
        return;
    }
    eprintln!(
        "{} {} replacement(s) by {}",
        "✓".green(),
        transformation.replacements,
        transformation.profiles.join(", ")
    );
    for diagnostic in &transformation.diagnostics {
        eprintln!(
            "  {} {} rule {}: {}",
            "✗".red(),
            diagnostic.profile,
            diagnostic.position,
            diagnostic.error
        );
    }
}

pub fn apply(manager: &ConfigManager, args: &TransformArgs) -> Result<()> {
    let config = manager.get();
    let input = read_stdin()?;
    let transformation = run_transform(&config, args, &input);

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(transformation.text.as_bytes())
        .context("Failed to write stdout")?;
    stdout.flush().context("Failed to flush stdout")?;

    print_summary(&transformation);
    Ok(())
}

pub fn diff(manager: &ConfigManager, args: &DiffArgs) -> Result<()> {
    let config = manager.get();
    let input = read_stdin()?;
    let transformation = run_transform(&config, &args.transform, &input);
    let report = DiffReport::new(input, transformation.text.clone());

    if report.is_unchanged() {
        println!("No changes.");
    } else if args.unified {
        print!("{}", report.unified(3));
    } else {
        println!("{}", report.render_terminal());
        let stats = report.stats();
        println!(
            "{} word(s) removed, {} added, {} unchanged",
            stats.removed, stats.added, stats.unchanged
        );
    }

    print_summary(&transformation);
    Ok(())
}

pub fn profiles_table(config: &Config) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Profile", "Enabled", "Trigger", "Reverse", "Rules"]);

    for profile in &config.profiles {
        table.add_row(vec![
            Cell::new(&profile.name),
            Cell::new(if profile.enabled { "yes" } else { "no" }),
            Cell::new(&profile.trigger),
            Cell::new(profile.reverse_trigger.as_deref().unwrap_or("-")),
            Cell::new(profile.rules.len()),
        ]);
    }
    if let Some(column) = table.column_mut(4) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    table
}

pub fn profiles(manager: &ConfigManager) -> Result<()> {
    let config = manager.get();
    if config.profiles.is_empty() {
        println!("No profiles configured in {}", manager.config_path().display());
        return Ok(());
    }
    println!("{}", profiles_table(&config));
    Ok(())
}

pub fn set_enabled(manager: &ConfigManager, name: &str, enabled: bool) -> Result<()> {
    manager.set_profile_enabled(name, enabled)?;
    let state = if enabled { "enabled" } else { "disabled" };
    println!("{} Profile '{}' {}", "✓".green(), name, state);
    Ok(())
}

pub fn add_rule(manager: &ConfigManager, args: &AddRuleArgs) -> Result<()> {
    manager.add_simple_rule(
        &args.profile,
        &args.find,
        &args.replace,
        args.preserve_case,
        args.reverse_source.clone(),
    )?;
    println!(
        "{} Added rule to '{}': {} -> {}",
        "✓".green(),
        args.profile,
        args.find,
        args.replace
    );
    Ok(())
}

/// Registers `name` before storing its value, so a failed config edit never
/// leaves an unregistered value behind. A failed store undoes the
/// registration it made.
fn add_secret(
    manager: &ConfigManager,
    store: &dyn SecretStore,
    name: &str,
    value: &str,
) -> Result<bool> {
    let added = manager.add_secret_reference(name)?;
    if let Err(err) = store.store(name, value) {
        if added {
            if let Err(undo) = manager.remove_secret_reference(name) {
                warn!("Failed to unregister secret '{name}': {undo:#}");
            }
        }
        return Err(err);
    }
    Ok(added)
}

pub fn secret(manager: &ConfigManager, command: &SecretCommand) -> Result<()> {
    match command {
        SecretCommand::Add { name, value } => {
            if !secrets::is_valid_secret_name(name) {
                anyhow::bail!("Invalid secret name '{name}'");
            }
            let value = match value {
                Some(value) => value.clone(),
                None if io::stdin().is_terminal() => {
                    Password::with_theme(&ColorfulTheme::default())
                        .with_prompt(format!("Value for {{{{{name}}}}}"))
                        .interact()?
                }
                None => read_stdin()?.trim_end_matches(['\r', '\n']).to_string(),
            };
            let added = add_secret(manager, &KeyringStore, name, &value)?;
            let note = if added { "stored and registered" } else { "updated" };
            println!("{} Secret '{}' {}", "✓".green(), name, note);
        }
        SecretCommand::Remove { name } => {
            let deleted = KeyringStore.delete(name)?;
            let unregistered = manager.remove_secret_reference(name)?;
            if deleted || unregistered {
                println!("{} Secret '{}' removed", "✓".green(), name);
            } else {
                println!("{} No secret named '{}'", "○".yellow(), name);
            }
        }
    }
    Ok(())
}

pub fn check(manager: &ConfigManager) -> Result<()> {
    let config = manager.get();
    config.validate()?;

    let enabled = config.profiles.iter().filter(|profile| profile.enabled).count();
    let rules: usize = config.profiles.iter().map(|profile| profile.rules.len()).sum();
    println!(
        "{} {} is valid",
        "✓".green(),
        manager.config_path().display()
    );
    println!(
        "  {} profile(s), {} enabled, {} rule(s)",
        config.profiles.len(),
        enabled,
        rules
    );
    println!("  {} shortcut binding(s)", config.bindings().len());
    println!("  {} registered secret(s)", config.secrets.len());
    println!(
        "  temporary clipboard: {}, automatic revert: {}",
        config.temporary_clipboard, config.automatic_revert
    );
    Ok(())
}

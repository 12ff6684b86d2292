use std::env;
use std::path::PathBuf;

/// Expands `~` or a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let rest = match trimmed {
        "~" => Some(""),
        other => other.strip_prefix("~/"),
    };
    match (rest, env::var("HOME")) {
        (Some(rest), Ok(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(trimmed),
    }
}

const CASE_INSENSITIVE_FLAG: &str = "(?i)";

/// Derives the literal "primary" text of a pattern: the first alternative of
/// its first group, e.g. `(?i)(Alice|Alicia|Al)` yields `Alice`.
///
/// Used to rebuild the source text of a reverse replacement when the rule
/// does not name one. Escape sequences inside the alternative are kept as
/// written.
pub fn extract_primary(pattern: &str) -> String {
    let body = strip_case_flag(pattern);

    let Some(group) = first_group(body) else {
        return body.trim().to_string();
    };

    let group = strip_group_prefix(group);
    split_alternatives(group)
        .into_iter()
        .next()
        .map(|first| first.trim().to_string())
        .unwrap_or_default()
}

fn strip_case_flag(pattern: &str) -> &str {
    let trimmed = pattern.trim_start();
    trimmed
        .strip_prefix(CASE_INSENSITIVE_FLAG)
        .unwrap_or(trimmed)
}

/// Content between the first unescaped `(` and its balancing `)`.
fn first_group(pattern: &str) -> Option<&str> {
    let mut escaped = false;
    let mut depth = 0usize;
    let mut start = None;

    for (idx, ch) in pattern.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '(' => {
                if start.is_none() {
                    start = Some(idx + ch.len_utf8());
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|open| &pattern[open..idx]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Drops non-capturing and named-group markers so `(?:a|b)` and
/// `(?P<name>a|b)` behave like `(a|b)`.
fn strip_group_prefix(group: &str) -> &str {
    if let Some(rest) = group.strip_prefix("?:") {
        return rest;
    }
    for marker in ["?P<", "?<"] {
        if let Some(rest) = group.strip_prefix(marker) {
            if let Some(close) = rest.find('>') {
                return &rest[close + 1..];
            }
        }
    }
    group
}

/// Splits on top-level unescaped `|`, leaving `\|` and nested groups intact.
fn split_alternatives(group: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut escaped = false;
    let mut depth = 0usize;
    let mut piece_start = 0;

    for (idx, ch) in group.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '|' if depth == 0 => {
                pieces.push(&group[piece_start..idx]);
                piece_start = idx + 1;
            }
            _ => {}
        }
    }
    pieces.push(&group[piece_start..]);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_first_alternative_of_first_group() {
        assert_eq!(extract_primary("(?i)(Alice|Bob|Carol)"), "Alice");
        assert_eq!(extract_primary("(Alice|Alicia|Al)"), "Alice");
    }

    #[test]
    fn plain_pattern_is_returned_trimmed() {
        assert_eq!(extract_primary("plainword"), "plainword");
        assert_eq!(extract_primary("  spaced  "), "spaced");
        assert_eq!(extract_primary("(?i)plainword"), "plainword");
    }

    #[test]
    fn group_without_alternation_returns_whole_group() {
        assert_eq!(extract_primary(r"\b( hello )\b"), "hello");
    }

    #[test]
    fn escaped_pipe_does_not_split() {
        assert_eq!(extract_primary(r"(a\|b|c)"), r"a\|b");
    }

    #[test]
    fn escaped_paren_is_not_a_group() {
        assert_eq!(extract_primary(r"\(x\) (first|second)"), "first");
    }

    #[test]
    fn nested_groups_stay_in_first_piece() {
        assert_eq!(extract_primary("((ab|cd)ef|gh)"), "(ab|cd)ef");
    }

    #[test]
    fn non_capturing_and_named_groups_are_unwrapped() {
        assert_eq!(extract_primary("(?:one|two)"), "one");
        assert_eq!(extract_primary("(?P<who>Ann|Bea)"), "Ann");
    }

    #[test]
    fn unbalanced_group_falls_back_to_pattern() {
        assert_eq!(extract_primary("(open|ended"), "(open|ended");
    }
}

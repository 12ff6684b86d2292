use regex::{Captures, Regex, RegexBuilder};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::alternatives::extract_primary;
use super::case::match_case;
use super::Direction;
use crate::config::{DiagnosticLevel, Rule, SecretPatternMode};
use crate::secrets::{resolve_literal, resolve_pattern, resolve_template, SecretResolver};

/// Upper bound on the compiled size of a single rule's regex.
const COMPILED_SIZE_LIMIT: usize = 10 * (1 << 20);

/// Why a rule was skipped. None of these stop the rest of the invocation.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Carries the pattern as configured, never with secrets substituted.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("replacement is empty, nothing to search for when reversing")]
    EmptyReverseTarget,
    #[error("no reverse source: set 'reverse_source' or start the pattern with a literal alternative")]
    MissingReverseSource,
    #[error("pattern exceeded its {}ms execution budget", .budget.as_millis())]
    Timeout { budget: Duration },
}

impl RuleError {
    pub fn default_level(&self) -> DiagnosticLevel {
        match self {
            Self::MissingReverseSource => DiagnosticLevel::Error,
            Self::InvalidPattern { .. } | Self::EmptyReverseTarget | Self::Timeout { .. } => {
                DiagnosticLevel::Warn
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub text: String,
    /// Matches replaced; 0 whenever the text came out unchanged.
    pub replacements: usize,
    pub used_secrets: bool,
}

impl RuleOutcome {
    fn new(input: &str, output: String, matches: usize, used_secrets: bool) -> Self {
        let replacements = if output == input { 0 } else { matches };
        Self {
            text: output,
            replacements,
            used_secrets,
        }
    }
}

/// Applies a single rule, forward or reverse. Never mutates the rule.
pub struct RuleApplier<'a> {
    secrets: &'a dyn SecretResolver,
    pattern_mode: SecretPatternMode,
    budget: Option<Duration>,
}

impl<'a> RuleApplier<'a> {
    pub fn new(secrets: &'a dyn SecretResolver) -> Self {
        Self {
            secrets,
            pattern_mode: SecretPatternMode::default(),
            budget: None,
        }
    }

    pub fn with_pattern_mode(mut self, mode: SecretPatternMode) -> Self {
        self.pattern_mode = mode;
        self
    }

    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    pub fn apply(
        &self,
        text: &str,
        rule: &Rule,
        direction: Direction,
    ) -> Result<RuleOutcome, RuleError> {
        match direction {
            Direction::Forward => self.apply_forward(text, rule),
            Direction::Reverse => self.apply_reverse(text, rule),
        }
    }

    fn apply_forward(&self, text: &str, rule: &Rule) -> Result<RuleOutcome, RuleError> {
        let pattern = resolve_pattern(&rule.pattern, self.secrets, self.pattern_mode);
        let template = resolve_template(&rule.replacement, self.secrets);
        let used_secrets = pattern.used_secrets || template.used_secrets;

        let regex = compile(&pattern.text, false).map_err(|source| RuleError::InvalidPattern {
            pattern: rule.pattern.clone(),
            source,
        })?;

        let template = template.text;
        let (output, matches) = if rule.preserve_case {
            self.replace_each(&regex, text, |caps, out| {
                let mut expanded = String::new();
                caps.expand(&template, &mut expanded);
                out.push_str(&match_case(&caps[0], &expanded));
            })?
        } else {
            self.replace_each(&regex, text, |caps, out| caps.expand(&template, out))?
        };

        Ok(RuleOutcome::new(text, output, matches, used_secrets))
    }

    fn apply_reverse(&self, text: &str, rule: &Rule) -> Result<RuleOutcome, RuleError> {
        let target = resolve_literal(&rule.replacement, self.secrets);
        if target.text.is_empty() {
            return Err(RuleError::EmptyReverseTarget);
        }

        let source = match rule.reverse_source.as_deref().filter(|s| !s.is_empty()) {
            Some(explicit) => resolve_literal(explicit, self.secrets),
            None => resolve_literal(&extract_primary(&rule.pattern), self.secrets),
        };
        if source.text.is_empty() || source.text == target.text {
            return Err(RuleError::MissingReverseSource);
        }
        let used_secrets = target.used_secrets || source.used_secrets;

        let regex = compile(&regex::escape(&target.text), rule.preserve_case).map_err(
            |source| RuleError::InvalidPattern {
                pattern: rule.replacement.clone(),
                source,
            },
        )?;

        let source = source.text;
        let (output, matches) = if rule.preserve_case {
            self.replace_each(&regex, text, |caps, out| {
                out.push_str(&match_case(&caps[0], &source));
            })?
        } else {
            self.replace_each(&regex, text, |_, out| out.push_str(&source))?
        };

        Ok(RuleOutcome::new(text, output, matches, used_secrets))
    }

    /// Rebuilds `text` with every match rewritten by `write`, checking the
    /// execution budget between matches.
    fn replace_each<F>(
        &self,
        regex: &Regex,
        text: &str,
        mut write: F,
    ) -> Result<(String, usize), RuleError>
    where
        F: FnMut(&Captures<'_>, &mut String),
    {
        let deadline = self.budget.map(|budget| (budget, Instant::now() + budget));
        let over_budget = || match deadline {
            Some((budget, deadline)) if Instant::now() >= deadline => {
                Err(RuleError::Timeout { budget })
            }
            _ => Ok(()),
        };

        let mut output = String::with_capacity(text.len());
        let mut last_end = 0;
        let mut matches = 0;

        for caps in regex.captures_iter(text) {
            over_budget()?;
            let Some(whole) = caps.get(0) else {
                continue;
            };
            output.push_str(&text[last_end..whole.start()]);
            write(&caps, &mut output);
            last_end = whole.end();
            matches += 1;
        }
        over_budget()?;

        if matches == 0 {
            return Ok((text.to_string(), 0));
        }
        output.push_str(&text[last_end..]);
        Ok((output, matches))
    }
}

fn compile(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .size_limit(COMPILED_SIZE_LIMIT)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::StaticSecrets;

    fn forward(text: &str, rule: &Rule) -> RuleOutcome {
        let secrets = StaticSecrets::new();
        RuleApplier::new(&secrets)
            .apply(text, rule, Direction::Forward)
            .expect("rule applies")
    }

    fn reverse(text: &str, rule: &Rule) -> Result<RuleOutcome, RuleError> {
        let secrets = StaticSecrets::new();
        RuleApplier::new(&secrets).apply(text, rule, Direction::Reverse)
    }

    #[test]
    fn replaces_every_match() {
        let outcome = forward("a-b-c", &Rule::new("-", "+"));
        assert_eq!(outcome.text, "a+b+c");
        assert_eq!(outcome.replacements, 2);
    }

    #[test]
    fn no_match_leaves_text() {
        let outcome = forward("abc", &Rule::new("z", "y"));
        assert_eq!(outcome.text, "abc");
        assert_eq!(outcome.replacements, 0);
    }

    #[test]
    fn identical_replacement_counts_zero() {
        let outcome = forward("foo bar", &Rule::new("foo", "foo"));
        assert_eq!(outcome.text, "foo bar");
        assert_eq!(outcome.replacements, 0);
    }

    #[test]
    fn capture_groups_expand_in_replacement() {
        let outcome = forward("john smith", &Rule::new(r"(\w+) (\w+)", "$2, $1"));
        assert_eq!(outcome.text, "smith, john");
    }

    #[test]
    fn preserve_case_adapts_each_match_independently() {
        let rule = Rule::new("(?i)colour", "color").preserving_case();
        let outcome = forward("Colour, COLOUR and colour", &rule);
        assert_eq!(outcome.text, "Color, COLOR and color");
        assert_eq!(outcome.replacements, 3);
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let secrets = StaticSecrets::new();
        let result =
            RuleApplier::new(&secrets).apply("x", &Rule::new("(", "y"), Direction::Forward);
        assert!(matches!(result, Err(RuleError::InvalidPattern { .. })));
    }

    #[test]
    fn secret_placeholders_resolve_in_pattern_and_replacement() {
        let secrets = StaticSecrets::new()
            .with("user", "alice")
            .with("alias", "A. Example");
        let rule = Rule::new("{{user}}", "{{alias}}");
        let outcome = RuleApplier::new(&secrets)
            .apply("hi alice", &rule, Direction::Forward)
            .expect("rule applies");
        assert_eq!(outcome.text, "hi A. Example");
        assert!(outcome.used_secrets);
    }

    #[test]
    fn dollar_in_secret_replacement_stays_literal() {
        let secrets = StaticSecrets::new().with("price", "$1");
        let rule = Rule::new("(cost)", "{{price}}");
        let outcome = RuleApplier::new(&secrets)
            .apply("cost", &rule, Direction::Forward)
            .expect("rule applies");
        assert_eq!(outcome.text, "$1");
    }

    #[test]
    fn raw_and_escaped_pattern_modes_differ() {
        let secrets = StaticSecrets::new().with("host", "a.b");
        let rule = Rule::new("{{host}}", "HOST");

        let raw = RuleApplier::new(&secrets)
            .apply("axb a.b", &rule, Direction::Forward)
            .expect("raw applies");
        assert_eq!(raw.text, "HOST HOST");

        let escaped = RuleApplier::new(&secrets)
            .with_pattern_mode(SecretPatternMode::Escaped)
            .apply("axb a.b", &rule, Direction::Forward)
            .expect("escaped applies");
        assert_eq!(escaped.text, "axb HOST");
    }

    #[test]
    fn reverse_uses_explicit_source() {
        let rule = Rule::new("(?i)(hello)", "world")
            .preserving_case()
            .with_reverse_source("hello");
        let outcome = reverse("World, world", &rule).expect("reverse applies");
        assert_eq!(outcome.text, "Hello, hello");
        assert_eq!(outcome.replacements, 2);
    }

    #[test]
    fn reverse_derives_source_from_first_alternative() {
        let rule = Rule::new("(Alice|Alicia|Al)", "A.");
        let outcome = reverse("Dear A.", &rule).expect("reverse applies");
        assert_eq!(outcome.text, "Dear Alice");
    }

    #[test]
    fn reverse_without_preserve_case_is_case_sensitive() {
        let rule = Rule::new("cat", "dog");
        let outcome = reverse("dog Dog", &rule).expect("reverse applies");
        assert_eq!(outcome.text, "cat Dog");
        assert_eq!(outcome.replacements, 1);
    }

    #[test]
    fn reverse_treats_target_as_literal() {
        let rule = Rule::new("plus", "a+b");
        let outcome = reverse("aab a+b", &rule).expect("reverse applies");
        assert_eq!(outcome.text, "aab plus");
    }

    #[test]
    fn reverse_rejects_empty_target() {
        let rule = Rule::new("remove me", "");
        assert!(matches!(
            reverse("text", &rule),
            Err(RuleError::EmptyReverseTarget)
        ));
    }

    #[test]
    fn reverse_rejects_source_equal_to_target() {
        let rule = Rule::new("same", "same");
        assert!(matches!(
            reverse("same", &rule),
            Err(RuleError::MissingReverseSource)
        ));
    }

    #[test]
    fn exhausted_budget_times_out() {
        let secrets = StaticSecrets::new();
        let text = "a".repeat(10_000);
        let result = RuleApplier::new(&secrets)
            .with_budget(Some(Duration::ZERO))
            .apply(&text, &Rule::new("a", "b"), Direction::Forward);
        assert!(matches!(result, Err(RuleError::Timeout { .. })));
    }

    #[test]
    fn diagnostic_levels_follow_severity() {
        assert_eq!(
            RuleError::MissingReverseSource.default_level(),
            DiagnosticLevel::Error
        );
        assert_eq!(
            RuleError::EmptyReverseTarget.default_level(),
            DiagnosticLevel::Warn
        );
    }
}

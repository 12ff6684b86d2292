use clipswap_rs::config::SecretPatternMode;
use clipswap_rs::history::RecordOutcome;
use clipswap_rs::input::MemoryClipboard;
use clipswap_rs::secrets::StaticSecrets;
use clipswap_rs::transform::{extract_primary, match_case, RuleError};
use clipswap_rs::{
    transform_text, Config, Direction, Profile, RevertOutcome, RevertRequest, RevertState, Rule,
    TransformationEngine,
};
use std::sync::Arc;

const TRIGGER: &str = "ctrl+alt+v";

fn config_with(profiles: Vec<Profile>) -> Config {
    Config {
        profiles,
        ..Config::default()
    }
}

fn run(config: &Config, text: &str, direction: Direction) -> (String, usize) {
    let result = transform_text(config, &StaticSecrets::new(), text, TRIGGER, direction);
    (result.text, result.replacements)
}

#[test]
fn later_rules_see_earlier_output() {
    let config = config_with(vec![Profile::new("ws", TRIGGER)
        .with_rule(Rule::new(r"\t", " "))
        .with_rule(Rule::new(r"\s+", ""))]);
    assert_eq!(run(&config, "a\tb", Direction::Forward).0, "ab");
}

#[test]
fn preserve_case_round_trips_title_case() {
    let config = config_with(vec![Profile::new("greet", TRIGGER)
        .with_reverse_trigger(TRIGGER)
        .with_rule(
            Rule::new("(?i)(hello)", "world")
                .preserving_case()
                .with_reverse_source("hello"),
        )]);

    assert_eq!(run(&config, "Hello", Direction::Forward), ("World".into(), 1));
    assert_eq!(run(&config, "World", Direction::Reverse), ("Hello".into(), 1));
}

#[test]
fn reverse_source_defaults_to_first_alternative() {
    let config = config_with(vec![Profile::new("names", TRIGGER)
        .with_reverse_trigger("ctrl+alt+shift+v")
        .with_rule(Rule::new("(?i)(Alice|Alicia|Al)", "Ally").preserving_case())]);

    let result = transform_text(
        &config,
        &StaticSecrets::new(),
        "ask ally about Ally",
        "ctrl+alt+shift+v",
        Direction::Reverse,
    );
    assert_eq!(result.text, "ask alice about Alice");
    assert_eq!(result.replacements, 2);
}

#[test]
fn identical_replacement_counts_as_no_change() {
    let config = config_with(vec![Profile::new("p", TRIGGER).with_rule(Rule::new("foo", "foo"))]);
    assert_eq!(run(&config, "foo bar", Direction::Forward), ("foo bar".into(), 0));
}

#[test]
fn case_classes() {
    assert_eq!(match_case("hello", "WORLD"), "world");
    assert_eq!(match_case("HELLO", "world"), "WORLD");
    assert_eq!(match_case("Hello", "world"), "World");
    assert_eq!(match_case("gitHub", "foo"), "foo");
    assert_eq!(match_case("GitHub", "foo"), "Foo");
}

#[test]
fn primary_alternative_extraction() {
    assert_eq!(extract_primary("(?i)(Alice|Bob|Carol)"), "Alice");
    assert_eq!(extract_primary("plainword"), "plainword");
}

#[test]
fn profiles_sharing_a_trigger_merge_in_order() {
    let config = config_with(vec![
        Profile::new("first", TRIGGER).with_rule(Rule::new("a", "b")),
        Profile::new("other", "ctrl+alt+x").with_rule(Rule::new("b", "z")),
        Profile::new("second", TRIGGER).with_rule(Rule::new("b", "c")),
    ]);

    let result = transform_text(&config, &StaticSecrets::new(), "ab", TRIGGER, Direction::Forward);
    assert_eq!(result.text, "cc");
    assert_eq!(result.replacements, 3);
    assert_eq!(result.profiles, vec!["first", "second"]);
}

#[test]
fn disabled_profiles_are_skipped() {
    let config = config_with(vec![Profile::new("off", TRIGGER)
        .disabled()
        .with_rule(Rule::new("a", "b"))]);
    assert_eq!(run(&config, "a", Direction::Forward), ("a".into(), 0));
}

#[test]
fn invalid_rules_never_block_the_profile() {
    let config = config_with(vec![Profile::new("p", TRIGGER)
        .with_rule(Rule::new("[", "x"))
        .with_rule(Rule::new("a", "b"))]);
    assert_eq!(run(&config, "aa", Direction::Forward), ("bb".into(), 2));
}

#[test]
fn timed_out_rule_is_skipped_and_later_rules_run() {
    let mut config = config_with(vec![Profile::new("p", TRIGGER)
        .with_rule(Rule::new("a", "b"))
        .with_rule(Rule::new("^a", "A"))]);
    config.regex_timeout_ms = 1;
    let text = "a".repeat(200_000);

    let result = transform_text(&config, &StaticSecrets::new(), &text, TRIGGER, Direction::Forward);
    assert!(result.text.starts_with("Aa"));
    assert_eq!(result.text.len(), text.len());
    assert_eq!(result.replacements, 1);
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].position, 1);
    assert!(matches!(result.diagnostics[0].error, RuleError::Timeout { .. }));
}

#[test]
fn secrets_resolve_in_pattern_and_replacement() {
    let config = config_with(vec![Profile::new("p", TRIGGER)
        .with_rule(Rule::new("{{user}}", "{{alias}}"))]);
    let secrets = StaticSecrets::new()
        .with("user", "jdoe")
        .with("alias", "$me");

    let result = transform_text(&config, &secrets, "hi jdoe", TRIGGER, Direction::Forward);
    assert_eq!(result.text, "hi $me");
    assert!(result.steps[0].used_secrets);
}

#[test]
fn escaped_pattern_mode_matches_secret_literally() {
    let mut config = config_with(vec![Profile::new("p", TRIGGER)
        .with_rule(Rule::new("{{host}}", "HOST"))]);
    let secrets = StaticSecrets::new().with("host", "a.b");

    let raw = transform_text(&config, &secrets, "axb a.b", TRIGGER, Direction::Forward);
    assert_eq!(raw.text, "HOST HOST");

    config.secret_pattern_mode = SecretPatternMode::Escaped;
    let escaped = transform_text(&config, &secrets, "axb a.b", TRIGGER, Direction::Forward);
    assert_eq!(escaped.text, "axb HOST");
}

#[test]
fn history_tracks_diff_and_revert() {
    let engine = TransformationEngine::new(Arc::new(StaticSecrets::new()));
    let config = config_with(vec![Profile::new("p", TRIGGER).with_rule(Rule::new("a", "b"))]);
    let mut clipboard = MemoryClipboard::new("aa");

    engine
        .run_trigger(&config, &mut clipboard, TRIGGER, Direction::Forward)
        .expect("trigger runs");
    let diff = engine.last_diff_pair();
    assert!(diff.available);
    assert_eq!((diff.original.as_str(), diff.modified.as_str()), ("aa", "bb"));

    let outcome = engine
        .revert(&mut clipboard, RevertRequest::Explicit)
        .expect("revert runs");
    assert_eq!(
        outcome,
        RevertOutcome::Reverted {
            restored: "aa".into()
        }
    );
    assert_eq!(clipboard.contents(), "aa");
    assert!(!engine.last_diff_pair().available);

    clipboard.set_contents("zzz");
    engine
        .run_trigger(&config, &mut clipboard, TRIGGER, Direction::Forward)
        .expect("trigger runs");
    assert!(!engine.last_diff_pair().available);
}

#[test]
fn rerun_on_own_output_keeps_original() {
    let engine = TransformationEngine::new(Arc::new(StaticSecrets::new()));
    let config = config_with(vec![
        Profile::new("ab", TRIGGER).with_rule(Rule::new("a", "b")),
        Profile::new("bc", "ctrl+alt+c").with_rule(Rule::new("b", "c")),
    ]);
    let mut clipboard = MemoryClipboard::new("a");

    let first = engine
        .run_trigger(&config, &mut clipboard, TRIGGER, Direction::Forward)
        .expect("first trigger");
    assert_eq!(first.record, RecordOutcome::Stored { generation: 1 });

    let second = engine
        .run_trigger(&config, &mut clipboard, "ctrl+alt+c", Direction::Forward)
        .expect("second trigger");
    assert_eq!(second.record, RecordOutcome::Extended { generation: 2 });
    assert_eq!(clipboard.contents(), "c");

    let outcome = engine
        .revert(&mut clipboard, RevertRequest::Scheduled(1))
        .expect("revert runs");
    assert_eq!(outcome, RevertOutcome::Superseded);
    assert_eq!(clipboard.contents(), "c");

    let outcome = engine
        .revert(&mut clipboard, RevertRequest::Scheduled(2))
        .expect("revert runs");
    assert_eq!(
        outcome,
        RevertOutcome::Reverted {
            restored: "a".into()
        }
    );
    assert_eq!(engine.revert_state(), RevertState::Idle);
}

#[test]
fn concurrent_triggers_serialize_on_the_engine() {
    let engine = Arc::new(TransformationEngine::new(Arc::new(StaticSecrets::new())));
    let config = Arc::new(config_with(vec![
        Profile::new("p", TRIGGER).with_rule(Rule::new("x", "y"))
    ]));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let config = Arc::clone(&config);
            std::thread::spawn(move || {
                let mut clipboard = MemoryClipboard::new(format!("x{i}"));
                engine
                    .run_trigger(&config, &mut clipboard, TRIGGER, Direction::Forward)
                    .expect("trigger runs");
                clipboard.contents().to_string()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().expect("thread finished"), format!("y{i}"));
    }
    assert_eq!(engine.revert_state(), RevertState::PendingRevert);
}

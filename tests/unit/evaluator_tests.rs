//! Unit tests for policy evaluation: gate order, transforms, and
//! determinism.

use relay_control::models::event::{InboundMessage, MessageKind};
use relay_control::models::mapping::{KeywordMode, Mapping};
use relay_control::models::rule::{RegexRule, RuleKind};
use relay_control::rules::{compile, evaluate, Decision, FilterReason};

fn message(text: &str) -> InboundMessage {
    InboundMessage {
        source_chat_id: -100_123,
        message_id: 7,
        text: text.to_owned(),
        kind: MessageKind::Text,
        is_forward: false,
        sender: None,
    }
}

fn mapping() -> Mapping {
    Mapping::new("u1".into(), "src1".into(), "dst1".into(), "pair".into())
}

fn rule(pattern: &str, kind: RuleKind, replacement: Option<&str>) -> RegexRule {
    let mut rule = RegexRule::new("u1".into(), None, "r".into(), pattern.into(), kind);
    rule.replacement = replacement.map(ToOwned::to_owned);
    rule
}

#[test]
fn clean_message_forwards_unchanged() {
    let policy = compile(&mapping(), &[]);
    let decision = evaluate(&message("hello world"), &policy);
    assert_eq!(
        decision,
        Decision::Forward {
            text: "hello world".into()
        }
    );
}

#[test]
fn type_gate_runs_first() {
    let mut mapping = mapping();
    mapping.filters.allowed_types = vec![MessageKind::Photo];
    // Also trip the forward gate; the type gate must win.
    mapping.filters.block_forwards = true;
    let policy = compile(&mapping, &[]);

    let mut msg = message("anything");
    msg.is_forward = true;
    assert_eq!(
        evaluate(&msg, &policy),
        Decision::Filter {
            reason: FilterReason::Type
        }
    );
}

#[test]
fn forward_gate_blocks_forwards() {
    let mut mapping = mapping();
    mapping.filters.block_forwards = true;
    let policy = compile(&mapping, &[]);

    let mut msg = message("fwd");
    msg.is_forward = true;
    assert_eq!(
        evaluate(&msg, &policy),
        Decision::Filter {
            reason: FilterReason::Forward
        }
    );
}

#[test]
fn length_gates_use_inclusive_bounds() {
    let mut mapping = mapping();
    mapping.filters.min_len = Some(5);
    mapping.filters.max_len = Some(10);
    let policy = compile(&mapping, &[]);

    assert_eq!(
        evaluate(&message("hi"), &policy),
        Decision::Filter {
            reason: FilterReason::Length
        }
    );
    assert_eq!(
        evaluate(&message("a very long message body"), &policy),
        Decision::Filter {
            reason: FilterReason::Length
        }
    );
    assert!(matches!(
        evaluate(&message("just right"), &policy),
        Decision::Forward { .. }
    ));
}

#[test]
fn exclude_keywords_beat_include_keywords() {
    let mut mapping = mapping();
    mapping.filters.include_kw = vec!["deal".into()];
    mapping.filters.exclude_kw = vec!["scam".into()];
    let policy = compile(&mapping, &[]);

    assert_eq!(
        evaluate(&message("great deal, not a scam"), &policy),
        Decision::Filter {
            reason: FilterReason::ExcludeKeyword
        }
    );
}

#[test]
fn include_any_and_all_modes() {
    let mut mapping = mapping();
    mapping.filters.include_kw = vec!["btc".into(), "eth".into()];
    mapping.filters.kw_mode = KeywordMode::Any;
    let policy = compile(&mapping, &[]);
    assert!(matches!(
        evaluate(&message("btc pumping"), &policy),
        Decision::Forward { .. }
    ));

    let mut mapping = self::mapping();
    mapping.filters.include_kw = vec!["btc".into(), "eth".into()];
    mapping.filters.kw_mode = KeywordMode::All;
    let policy = compile(&mapping, &[]);
    assert_eq!(
        evaluate(&message("btc pumping"), &policy),
        Decision::Filter {
            reason: FilterReason::IncludeKeyword
        }
    );
    assert!(matches!(
        evaluate(&message("btc and eth pumping"), &policy),
        Decision::Forward { .. }
    ));
}

#[test]
fn keyword_case_sensitivity_is_configurable() {
    let mut mapping = mapping();
    mapping.filters.include_kw = vec!["BTC".into()];
    let policy = compile(&mapping, &[]);
    assert!(matches!(
        evaluate(&message("btc moves"), &policy),
        Decision::Forward { .. }
    ));

    let mut mapping = self::mapping();
    mapping.filters.include_kw = vec!["BTC".into()];
    mapping.filters.case_sensitive = true;
    let policy = compile(&mapping, &[]);
    assert_eq!(
        evaluate(&message("btc moves"), &policy),
        Decision::Filter {
            reason: FilterReason::IncludeKeyword
        }
    );
}

#[test]
fn url_gate_blocks_linked_messages() {
    let mut mapping = mapping();
    mapping.filters.block_urls = true;
    let policy = compile(&mapping, &[]);
    assert_eq!(
        evaluate(&message("join https://t.me/x"), &policy),
        Decision::Filter {
            reason: FilterReason::Url
        }
    );
}

#[test]
fn regex_rules_apply_before_toggles_and_framing() {
    let mut mapping = mapping();
    mapping.editing.header = Some("[relay]".into());
    mapping.editing.footer = Some("-- end".into());
    mapping.editing.remove_hashtags = true;
    let rules = vec![rule("secret", RuleKind::FindReplace, Some("[redacted]"))];
    let policy = compile(&mapping, &rules);

    let decision = evaluate(&message("secret launch #soon"), &policy);
    let Decision::Forward { text } = decision else {
        panic!("expected forward");
    };
    assert_eq!(text, "[relay]\n[redacted] launch \n-- end");
}

#[test]
fn remove_and_extract_rule_kinds() {
    let policy = compile(&mapping(), &[rule(r"\d+", RuleKind::Remove, None)]);
    let Decision::Forward { text } = evaluate(&message("call 555 now"), &policy) else {
        panic!("expected forward");
    };
    assert_eq!(text, "call  now");

    let policy = compile(
        &mapping(),
        &[rule(r"price: (\d+)", RuleKind::Extract, None)],
    );
    let Decision::Forward { text } =
        evaluate(&message("price: 42 and price: 77 today"), &policy)
    else {
        panic!("expected forward");
    };
    assert_eq!(text, "4277");
}

#[test]
fn rules_chain_in_order() {
    let mut first = rule("alpha", RuleKind::FindReplace, Some("beta"));
    first.order_index = 0;
    let mut second = rule("beta", RuleKind::FindReplace, Some("gamma"));
    second.order_index = 1;
    let policy = compile(&mapping(), &[first, second]);

    let Decision::Forward { text } = evaluate(&message("alpha"), &policy) else {
        panic!("expected forward");
    };
    // First rewrites alpha -> beta, second rewrites that beta -> gamma.
    assert_eq!(text, "gamma");
}

#[test]
fn approval_branch_returns_rendered_text() {
    let mut mapping = mapping();
    mapping.delay.require_approval = true;
    mapping.editing.header = Some("[hold]".into());
    let policy = compile(&mapping, &[]);

    assert_eq!(
        evaluate(&message("msg"), &policy),
        Decision::Approve {
            text: "[hold]\nmsg".into()
        }
    );
}

#[test]
fn evaluation_is_deterministic() {
    let mut mapping = mapping();
    mapping.filters.include_kw = vec!["x".into()];
    mapping.editing.footer = Some("f".into());
    let rules = vec![rule("x", RuleKind::FindReplace, Some("y"))];
    let policy = compile(&mapping, &rules);

    let msg = message("x marks the spot");
    assert_eq!(evaluate(&msg, &policy), evaluate(&msg, &policy));
}

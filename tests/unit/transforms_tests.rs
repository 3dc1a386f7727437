//! Unit tests for the fixed text transforms.

use relay_control::rules::transforms;

#[test]
fn detects_urls_in_common_shapes() {
    assert!(transforms::contains_url("see https://example.com/x"));
    assert!(transforms::contains_url("see www.example.com"));
    assert!(transforms::contains_url("see example.com/promo"));
    assert!(!transforms::contains_url("no links here"));
}

#[test]
fn strips_urls() {
    let stripped = transforms::strip_urls("buy at https://shop.example.com/deal now");
    assert!(!stripped.contains("shop.example.com"));
    assert!(stripped.contains("buy at"));
    assert!(stripped.contains("now"));
}

#[test]
fn strips_mentions_and_hashtags() {
    assert_eq!(transforms::strip_mentions("ping @alice_99 ok"), "ping  ok");
    assert_eq!(transforms::strip_hashtags("big #sale today"), "big  today");
}

#[test]
fn strips_forwarded_sender_lines() {
    let text = "Forwarded from Crypto Signals\nbuy the dip";
    assert_eq!(transforms::strip_sender_info(text), "buy the dip");
}

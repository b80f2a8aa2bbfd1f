//! Tests for the local spam scorer

use proptest::prelude::*;
use sms_shield::heuristic::{HeuristicScorer, SPAM_KEYWORDS};
use sms_shield::models::VerdictSource;

fn scorer() -> HeuristicScorer {
    HeuristicScorer::new().expect("Failed to build scorer")
}

#[test]
fn test_prize_message_is_spam() {
    let text = "Congratulations! You WON a FREE prize, claim now at http://bit.ly/x";
    let score = scorer().score(text);

    assert!(score.keyword_hits >= 3);
    assert!(score.has_url);
    assert!(score.has_urgency_marks);
    assert!(score.score >= 3);
    assert!(scorer().is_spam(text));
}

#[test]
fn test_lunch_message_is_safe() {
    let text = "Hey, are we still on for lunch tomorrow?";
    let score = scorer().score(text);

    assert_eq!(score.score, 0);
    assert_eq!(score.threshold, 2);
    assert!(!scorer().is_spam(text));
}

#[test]
fn test_threshold_depends_on_length() {
    let short = "a".repeat(50);
    let long = "a".repeat(51);
    assert_eq!(scorer().score(&short).threshold, 2);
    assert_eq!(scorer().score(&long).threshold, 3);
}

#[test]
fn test_keyword_count_is_case_insensitive() {
    let score = scorer().score("URGENT: Verify your BANK account");
    assert_eq!(score.keyword_hits, 4);
    assert!(!score.has_url);
    assert!(score.is_spam());
}

#[test]
fn test_bare_domain_counts_as_url() {
    let score = scorer().score("see example.com");
    assert!(score.has_url);
    assert_eq!(score.score, 2);
}

#[test]
fn test_each_urgency_mark_counts_once() {
    assert_eq!(scorer().score("$$$ !!! %%%").score, 1);
    assert_eq!(scorer().score("only 5€").score, 1);
}

#[test]
fn test_long_message_with_two_points_is_safe() {
    let text = "Please remember to bring the cash for the school trip on Friday morning!";
    let score = scorer().score(text);
    assert_eq!(score.keyword_hits, 1);
    assert_eq!(score.score, 2);
    assert_eq!(score.threshold, 3);
    assert!(!scorer().is_spam(text));
}

#[test]
fn test_empty_content_is_safe() {
    assert!(!scorer().is_spam(""));
    let verdict = scorer().classify("");
    assert!(!verdict.is_spam);
    assert_eq!(verdict.source, VerdictSource::Heuristic);
}

#[test]
fn test_classify_explains_score() {
    let verdict = scorer().classify("Claim your gift card at www.example.com!");
    assert!(verdict.is_spam);
    assert!(verdict.explanation.contains("local analysis"));
}

#[test]
fn test_keyword_list_has_no_duplicates() {
    let mut keywords = SPAM_KEYWORDS.to_vec();
    keywords.sort_unstable();
    keywords.dedup();
    assert_eq!(keywords.len(), SPAM_KEYWORDS.len());
}

proptest! {
    #[test]
    fn test_scoring_is_deterministic(content in "\\PC{0,120}") {
        let first = scorer().score(&content);
        let second = scorer().score(&content);
        prop_assert_eq!(first, second);
        prop_assert_eq!(scorer().is_spam(&content), scorer().is_spam(&content));
    }

    #[test]
    fn test_plain_lowercase_words_without_keywords_are_safe(content in "[qxyz ]{0,80}") {
        prop_assert!(!scorer().is_spam(&content));
    }
}

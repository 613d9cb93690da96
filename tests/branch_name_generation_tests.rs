use chrono::{TimeZone, Utc};
use regex::Regex;

use gitfix::git::branch_name::{generate, regenerate_suffix, slugify};

fn contract_pattern() -> Regex {
    Regex::new(r"^ai-fix/[0-9]+-[a-z0-9-]{1,30}-[0-9]{8}(-[a-z0-9]{1,10})?-[a-z0-9]{3}$").unwrap()
}

fn at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
}

#[test]
fn generated_names_always_match_the_contract() {
    let pattern = contract_pattern();
    let titles = [
        "Fix login redirect",
        "FEATURE Fix doctor JSON mode currently non-functional",
        "Fix [URGENT] issue with @#$%^&*() special chars!",
        "Fix   multiple---spaces  and-dashes",
        "",
        "!!!",
        "supercalifragilisticexpialidocious",
        "Fix émoji 🐛 and ñice ünïcödë",
        "a",
    ];
    for title in titles {
        for model in [None, Some("claude-3-opus"), Some("o")] {
            let name = generate(431, title, at(), model);
            assert!(pattern.is_match(&name), "{title:?} -> {name}");
        }
    }
}

#[test]
fn slug_is_capped_at_thirty_chars_without_trailing_dash() {
    let slug = slugify(
        "INFRASTRUCTURE Improve branch creation reliability using git2 local operations",
        30,
    );
    assert!(slug.len() <= 30);
    assert!(!slug.ends_with('-'));
    assert!(!slug.starts_with('-'));
}

#[test]
fn empty_titles_slug_to_issue() {
    let name = generate(7, "", at(), None);
    assert!(name.starts_with("ai-fix/7-issue-20240115-"));
}

#[test]
fn date_stamp_reflects_creation_day() {
    let name = generate(42, "Fix login redirect", at(), None);
    assert!(name.contains("-20240115-"), "{name}");
}

#[test]
fn collision_reroll_changes_only_the_suffix() {
    let original = generate(42, "Fix login redirect", at(), None);
    let rerolled = regenerate_suffix(&original);
    assert!(contract_pattern().is_match(&rerolled), "{rerolled}");

    let stem = |s: &str| s.rsplit_once('-').map(|(a, _)| a.to_string()).unwrap();
    assert_eq!(stem(&original), stem(&rerolled));
}

#[test]
fn suffixes_are_unlikely_to_repeat() {
    let mut seen = std::collections::HashSet::new();
    for _ in 0..50 {
        seen.insert(generate(1, "same title", at(), None));
    }
    // 3 random base-36 chars: 50 draws colliding entirely would be broken.
    assert!(seen.len() > 1);
}

use chrono::{DateTime, Utc};
use rand::Rng;

const SLUG_MAX: usize = 30;
const SUFFIX_LEN: usize = 3;
const MODEL_SLUG_MAX: usize = 10;

/// Turn an issue title into a branch-safe slug: lowercase, `[a-z0-9-]`,
/// runs of other characters collapse to a single hyphen, trailing hyphens
/// trimmed, capped at `max`. An empty result falls back to `issue`.
pub fn slugify(title: &str, max: usize) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.truncate(max);
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "issue".to_string()
    } else {
        trimmed.to_string()
    }
}

fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Branch name for one fix attempt:
/// `ai-fix/<N>-<slug(title,30)>-<YYYYMMDD>[-<modelSlug>]-<rand3>`.
pub fn generate(
    issue_number: u64,
    title: &str,
    now: DateTime<Utc>,
    model: Option<&str>,
) -> String {
    let slug = slugify(title, SLUG_MAX);
    let date = now.format("%Y%m%d");
    match model.map(model_slug).filter(|m| !m.is_empty()) {
        Some(model) => format!(
            "ai-fix/{issue_number}-{slug}-{date}-{model}-{}",
            random_suffix(SUFFIX_LEN)
        ),
        None => format!(
            "ai-fix/{issue_number}-{slug}-{date}-{}",
            random_suffix(SUFFIX_LEN)
        ),
    }
}

/// Re-roll only the trailing random suffix after a remote collision.
pub fn regenerate_suffix(branch: &str) -> String {
    match branch.rsplit_once('-') {
        Some((stem, _)) => format!("{stem}-{}", random_suffix(SUFFIX_LEN)),
        None => format!("{branch}-{}", random_suffix(SUFFIX_LEN)),
    }
}

fn model_slug(model: &str) -> String {
    let slug: String = model
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MODEL_SLUG_MAX)
        .collect();
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn slug_is_lowercased_and_hyphenated() {
        assert_eq!(slugify("Fix login redirect", 30), "fix-login-redirect");
        assert_eq!(slugify("Fix [URGENT] @#$ bug!", 30), "fix-urgent-bug");
    }

    #[test]
    fn slug_trims_trailing_hyphens_after_truncation() {
        // Truncation can land on a hyphen; it must not survive.
        let slug = slugify("fix the thing and also the-other", 30);
        assert!(!slug.ends_with('-'));
        assert!(slug.len() <= 30);
    }

    #[test]
    fn empty_title_falls_back_to_issue() {
        assert_eq!(slugify("", 30), "issue");
        assert_eq!(slugify("!!!", 30), "issue");
    }

    #[test]
    fn branch_name_matches_contract() {
        let pattern = regex::Regex::new(
            r"^ai-fix/[0-9]+-[a-z0-9-]{1,30}-[0-9]{8}(-[a-z0-9]{1,10})?-[a-z0-9]{3}$",
        )
        .unwrap();

        let plain = generate(42, "Fix login redirect", at(), None);
        assert!(pattern.is_match(&plain), "{plain}");
        assert!(plain.starts_with("ai-fix/42-fix-login-redirect-20240115-"));

        let with_model = generate(42, "Fix login redirect", at(), Some("claude-3-opus"));
        assert!(pattern.is_match(&with_model), "{with_model}");
        assert!(with_model.contains("-claude3opu-"));
    }

    #[test]
    fn regenerated_suffix_keeps_stem() {
        let original = generate(7, "A title", at(), None);
        let rerolled = regenerate_suffix(&original);
        let stem = |s: &str| s.rsplit_once('-').map(|(a, _)| a.to_string()).unwrap();
        assert_eq!(stem(&original), stem(&rerolled));
    }

    #[test]
    fn unicode_is_filtered() {
        assert_eq!(slugify("Fix émoji 🐛 bug", 30), "fix-moji-bug");
    }
}

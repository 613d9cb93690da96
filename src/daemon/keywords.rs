use regex::Regex;

use crate::github::CommentView;

/// Case-insensitive, word-boundary matcher over the configured follow-up
/// keywords. Patterns are compiled once per config snapshot.
pub struct KeywordMatcher {
    patterns: Vec<Regex>,
}

impl KeywordMatcher {
    pub fn new(keywords: &[String]) -> Self {
        let patterns = keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .filter_map(|k| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(k.trim()))).ok()
            })
            .collect();
        Self { patterns }
    }

    pub fn matches(&self, body: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(body))
    }
}

/// Decides which PR comments become follow-up work: author on the whitelist
/// (when one is set), not the bot itself, and body carrying a keyword.
pub struct CommentFilter {
    whitelist: Vec<String>,
    bot_username: String,
    matcher: KeywordMatcher,
}

impl CommentFilter {
    pub fn new(whitelist: &[String], bot_username: &str, keywords: &[String]) -> Self {
        Self {
            whitelist: whitelist.to_vec(),
            bot_username: bot_username.to_string(),
            matcher: KeywordMatcher::new(keywords),
        }
    }

    pub fn is_actionable(&self, comment: &CommentView) -> bool {
        if comment.author.eq_ignore_ascii_case(&self.bot_username) {
            return false;
        }
        if !self.whitelist.is_empty()
            && !self
                .whitelist
                .iter()
                .any(|u| u.eq_ignore_ascii_case(&comment.author))
        {
            return false;
        }
        self.matcher.matches(&comment.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn comment(author: &str, body: &str) -> CommentView {
        CommentView {
            id: 1,
            author: author.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }

    fn keywords() -> Vec<String> {
        vec!["GITFIX".to_string()]
    }

    #[test]
    fn keyword_is_case_insensitive() {
        let matcher = KeywordMatcher::new(&keywords());
        assert!(matcher.matches("gitfix please rename X"));
        assert!(matcher.matches("GITFIX: do the thing"));
    }

    #[test]
    fn keyword_respects_word_boundaries() {
        let matcher = KeywordMatcher::new(&keywords());
        assert!(!matcher.matches("mygitfixer is broken"));
        assert!(matcher.matches("run gitfix, thanks"));
    }

    #[test]
    fn whitelist_filters_authors_when_nonempty() {
        let filter = CommentFilter::new(&["alice".to_string()], "gitfix-bot", &keywords());
        assert!(filter.is_actionable(&comment("alice", "GITFIX please rename X")));
        assert!(!filter.is_actionable(&comment("mallory", "GITFIX please rename X")));
    }

    #[test]
    fn empty_whitelist_admits_everyone() {
        let filter = CommentFilter::new(&[], "gitfix-bot", &keywords());
        assert!(filter.is_actionable(&comment("anyone", "GITFIX go")));
    }

    #[test]
    fn bot_comments_are_never_actionable() {
        let filter = CommentFilter::new(&[], "gitfix-bot", &keywords());
        assert!(!filter.is_actionable(&comment("gitfix-bot", "GITFIX echo")));
        assert!(!filter.is_actionable(&comment("GitFix-Bot", "GITFIX echo")));
    }

    #[test]
    fn comments_without_keywords_are_ignored() {
        let filter = CommentFilter::new(&[], "gitfix-bot", &keywords());
        assert!(!filter.is_actionable(&comment("alice", "nice work!")));
    }
}

use std::collections::BTreeMap;

/// One emoji per user per target, keyed by user id.
pub type ReactionMap = BTreeMap<String, String>;

/// Write-site rule: the same emoji again removes the reaction, a different one
/// replaces it. Returns the user's reaction after the write.
pub fn toggle_reaction(map: &mut ReactionMap, user_id: &str, emoji: &str) -> Option<String> {
    match map.get(user_id) {
        Some(existing) if existing == emoji => {
            map.remove(user_id);
            None
        }
        _ => {
            map.insert(user_id.to_string(), emoji.to_string());
            Some(emoji.to_string())
        }
    }
}

/// Read-only summary of a [`ReactionMap`], counted in a single pass.
///
/// Ties in [`ReactionSummary::top_emojis`] keep the order in which each emoji was
/// first seen while walking users in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionSummary<'a> {
    map: Option<&'a ReactionMap>,
    counts: Vec<(&'a str, usize)>,
}

impl<'a> ReactionSummary<'a> {
    pub fn new(map: &'a ReactionMap) -> Self {
        let mut counts: Vec<(&'a str, usize)> = Vec::new();
        for emoji in map.values() {
            match counts.iter_mut().find(|(seen, _)| *seen == emoji.as_str()) {
                Some((_, count)) => *count += 1,
                None => counts.push((emoji.as_str(), 1)),
            }
        }
        // Stable sort keeps first-seen order for equal counts.
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        Self {
            map: Some(map),
            counts,
        }
    }

    pub fn my_reaction(&self, user_id: &str) -> Option<&'a str> {
        self.map
            .and_then(|map| map.get(user_id))
            .map(String::as_str)
    }

    pub fn top_emojis(&self, n: usize) -> Vec<&'a str> {
        self.counts.iter().take(n).map(|(emoji, _)| *emoji).collect()
    }

    /// Number of users who reacted, not number of distinct emoji.
    pub fn total_count(&self) -> usize {
        self.map.map(BTreeMap::len).unwrap_or(0)
    }

    pub fn count_of(&self, emoji: &str) -> usize {
        self.counts
            .iter()
            .find(|(seen, _)| *seen == emoji)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

use std::sync::LazyLock;

use regex::Regex;

use crate::service::VoiceChannel;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s]+").expect("static pattern"));

/// Edit distance between two strings, two-row iterative form.
pub fn levenshtein(s: &str, t: &str) -> usize {
    let s: Vec<char> = s.chars().collect();
    let t: Vec<char> = t.chars().collect();

    let mut prev: Vec<usize> = (0..=t.len()).collect();
    let mut cur = vec![0; t.len() + 1];

    for (i, sc) in s.iter().enumerate() {
        cur[0] = i + 1;
        for (j, tc) in t.iter().enumerate() {
            let deletion = prev[j + 1] + 1;
            let insertion = cur[j] + 1;
            let substitution = if sc == tc { prev[j] } else { prev[j] + 1 };
            cur[j + 1] = deletion.min(insertion).min(substitution);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[t.len()]
}

/// Lower-cased with everything but letters, digits and whitespace removed.
pub fn normalize(name: &str) -> String {
    NON_ALPHANUMERIC.replace_all(name, "").to_lowercase()
}

/// Word-by-word distance between a query and a channel name. Words are
/// paired positionally; trailing words on the longer side are ignored.
fn distance(query: &str, name: &str) -> usize {
    let query = normalize(query);
    let name = normalize(name);
    query
        .split_whitespace()
        .zip(name.split_whitespace())
        .map(|(a, b)| levenshtein(a, b))
        .sum()
}

/// Exact name match, otherwise the closest channel (first one on ties).
pub fn resolve<'a>(channels: &'a [VoiceChannel], query: &str) -> Option<&'a VoiceChannel> {
    if let Some(exact) = channels.iter().find(|c| c.name == query) {
        return Some(exact);
    }

    channels
        .iter()
        .enumerate()
        .min_by_key(|(index, c)| (distance(query, &c.name), *index))
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ChannelId;

    fn channels() -> Vec<VoiceChannel> {
        ["General", "Gaming Room", "Study Hall", "AFK"]
            .iter()
            .enumerate()
            .map(|(i, name)| VoiceChannel {
                id: ChannelId(i as u64 + 1),
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("flaw", "flaw"), 0);
    }

    #[test]
    fn test_normalize_strips_symbols() {
        assert_eq!(normalize("🎮 Gaming-Room!"), " gamingroom");
    }

    #[test]
    fn test_exact_name_wins() {
        let channels = channels();
        assert_eq!(resolve(&channels, "AFK").map(|c| c.id), Some(ChannelId(4)));
    }

    #[test]
    fn test_fuzzy_match() {
        let channels = channels();
        assert_eq!(
            resolve(&channels, "gamng room").map(|c| c.id),
            Some(ChannelId(2))
        );
        assert_eq!(
            resolve(&channels, "study!!").map(|c| c.id),
            Some(ChannelId(3))
        );
    }

    #[test]
    fn test_no_channels() {
        assert!(resolve(&[], "anything").is_none());
    }
}

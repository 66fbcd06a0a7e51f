//! Deterministic fuzzy matching of a free-text entity name to a gallery.
//!
//! Search proceeds in stages, stopping at the first stage that yields any
//! candidate:
//!
//! 1. Alias substitution (exact key, then case-insensitive key).
//! 2. Exact form: galleries whose name contains the query, ignoring case.
//! 3. Normalized form (trimmed, lowercased, whitespace removed), only when it
//!    differs from the exact form.
//! 4. Word decomposition: each whitespace-separated word of two or more
//!    characters, longest first.
//!
//! Candidates within a stage are ranked by [`score`]; ties keep input order.

use galleria_core::{AliasTable, Gallery};
use tracing::debug;

use crate::error::MatchError;

/// Which search stage produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Exact,
    Normalized,
    Word,
}

/// A gallery chosen for an entity name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GalleryMatch<'a> {
    pub gallery: &'a Gallery,
    pub score: i64,
    pub strategy: MatchStrategy,
    /// Index of the gallery in the input slice.
    pub index: usize,
}

/// Match `name` against `galleries`, returning the best gallery or `None`.
///
/// A blank name or an empty gallery list is [`MatchError::InvalidInput`];
/// finding nothing is a normal `Ok(None)`.
pub fn match_gallery<'a>(
    name: &str,
    galleries: &'a [Gallery],
    aliases: &AliasTable,
) -> Result<Option<GalleryMatch<'a>>, MatchError> {
    if name.trim().is_empty() {
        return Err(MatchError::InvalidInput("entity name is blank".into()));
    }
    if galleries.is_empty() {
        return Err(MatchError::InvalidInput("gallery list is empty".into()));
    }

    let query = aliases.resolve(name);
    if query != name {
        debug!(name, alias = query, "applied alias");
    }

    let exact = query.to_lowercase();
    if let Some(m) = best_candidate(galleries, query, MatchStrategy::Exact, |g| {
        g.name.to_lowercase().contains(&exact)
    }) {
        return Ok(Some(m));
    }

    let normalized = normalize(query);
    if normalized != query
        && !normalized.is_empty()
        && let Some(m) = best_candidate(galleries, &normalized, MatchStrategy::Normalized, |g| {
            normalize(&g.name).contains(&normalized)
        })
    {
        return Ok(Some(m));
    }

    for word in words_longest_first(query) {
        let needle = word.to_lowercase();
        if let Some(m) = best_candidate(galleries, word, MatchStrategy::Word, |g| {
            g.name.to_lowercase().contains(&needle)
        }) {
            return Ok(Some(m));
        }
    }

    debug!(name, "no gallery matched");
    Ok(None)
}

/// Score how well `gallery_name` fits `query` (case-insensitive).
///
/// | relation                     | base                    |
/// |------------------------------|-------------------------|
/// | equal                        | 1000                    |
/// | gallery name contains query  | 900                     |
/// | gallery name starts with it  | 850                     |
/// | otherwise                    | 700 + 50 × shared words |
///
/// minus `2 × |len(gallery_name) − len(query)|`, lengths in characters.
pub fn score(gallery_name: &str, query: &str) -> i64 {
    let g = gallery_name.to_lowercase();
    let q = query.to_lowercase();

    let base = if g == q {
        1000
    } else if g.contains(&q) {
        900
    } else if g.starts_with(&q) {
        850
    } else {
        700 + 50 * shared_words(&g, &q) as i64
    };

    let len_diff = (g.chars().count() as i64 - q.chars().count() as i64).abs();
    base - 2 * len_diff
}

/// Trim, lowercase, and drop all whitespace.
pub fn normalize(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn best_candidate<'a>(
    galleries: &'a [Gallery],
    query: &str,
    strategy: MatchStrategy,
    is_candidate: impl Fn(&Gallery) -> bool,
) -> Option<GalleryMatch<'a>> {
    let mut best: Option<GalleryMatch<'a>> = None;
    for (index, gallery) in galleries.iter().enumerate() {
        if !is_candidate(gallery) {
            continue;
        }
        let s = score(&gallery.name, query);
        // Strict comparison: the first gallery with the top score wins.
        if best.as_ref().is_none_or(|b| s > b.score) {
            best = Some(GalleryMatch {
                gallery,
                score: s,
                strategy,
                index,
            });
        }
    }
    best
}

fn words_longest_first(query: &str) -> Vec<&str> {
    let mut words: Vec<&str> = query
        .split_whitespace()
        .filter(|w| w.chars().count() >= 2)
        .collect();
    // Stable: equal-length words keep their order in the name.
    words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));
    words
}

fn shared_words(a: &str, b: &str) -> usize {
    let a_words: Vec<&str> = a.split_whitespace().collect();
    let mut seen: Vec<&str> = Vec::new();
    for w in b.split_whitespace() {
        if a_words.contains(&w) && !seen.contains(&w) {
            seen.push(w);
        }
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery(id: &str, name: &str) -> Gallery {
        Gallery {
            id: id.into(),
            name: name.into(),
            images: vec![],
        }
    }

    #[test]
    fn exact_name_beats_containing_name() {
        let galleries = vec![gallery("g1", "레이"), gallery("g2", "레이 스텔라")];
        let m = match_gallery("레이", &galleries, &AliasTable::new())
            .unwrap()
            .unwrap();
        assert_eq!(m.gallery.name, "레이");
        assert_eq!(m.score, 1000);
        assert_eq!(m.strategy, MatchStrategy::Exact);
    }

    #[test]
    fn exact_name_wins_regardless_of_order() {
        let galleries = vec![gallery("g2", "레이 스텔라"), gallery("g1", "레이")];
        let m = match_gallery("레이", &galleries, &AliasTable::new())
            .unwrap()
            .unwrap();
        assert_eq!(m.gallery.id, "g1");
        assert_eq!(m.index, 1);
    }

    #[test]
    fn alias_redirects_to_target_gallery() {
        let galleries = vec![gallery("g1", "레이"), gallery("g2", "가온누리")];
        let aliases: AliasTable = [("가온", "레이")].into_iter().collect();
        let m = match_gallery("가온", &galleries, &aliases).unwrap().unwrap();
        assert_eq!(m.gallery.name, "레이");
    }

    #[test]
    fn alias_lookup_ignores_case_as_fallback() {
        let galleries = vec![gallery("g1", "Rei")];
        let aliases: AliasTable = [("Gaon", "Rei")].into_iter().collect();
        let m = match_gallery("GAON", &galleries, &aliases).unwrap().unwrap();
        assert_eq!(m.gallery.id, "g1");
    }

    #[test]
    fn word_decomposition_tries_longest_word() {
        let galleries = vec![gallery("g1", "스텔라")];
        let m = match_gallery("엔비 스텔라", &galleries, &AliasTable::new())
            .unwrap()
            .unwrap();
        assert_eq!(m.gallery.name, "스텔라");
        assert_eq!(m.strategy, MatchStrategy::Word);
        assert_eq!(m.score, 1000);
    }

    #[test]
    fn longest_word_is_preferred_over_shorter_word() {
        // "엔비" alone would match g1; "스텔라" is tried first and matches g2.
        let galleries = vec![gallery("g1", "엔비"), gallery("g2", "스텔라")];
        let m = match_gallery("엔비 스텔라", &galleries, &AliasTable::new())
            .unwrap()
            .unwrap();
        assert_eq!(m.gallery.id, "g2");
    }

    #[test]
    fn single_character_words_are_ignored() {
        let galleries = vec![gallery("g1", "A")];
        let m = match_gallery("A B", &galleries, &AliasTable::new()).unwrap();
        assert!(m.is_none());
    }

    #[test]
    fn normalized_form_bridges_spacing_differences() {
        let galleries = vec![gallery("g1", "Rei Stella")];
        let m = match_gallery(" reistella ", &galleries, &AliasTable::new())
            .unwrap()
            .unwrap();
        assert_eq!(m.gallery.id, "g1");
        assert_eq!(m.strategy, MatchStrategy::Normalized);
    }

    #[test]
    fn exact_search_is_case_insensitive() {
        let galleries = vec![gallery("g1", "Stella")];
        let m = match_gallery("stella", &galleries, &AliasTable::new())
            .unwrap()
            .unwrap();
        assert_eq!(m.score, 1000);
        assert_eq!(m.strategy, MatchStrategy::Exact);
    }

    #[test]
    fn ties_keep_first_gallery() {
        let galleries = vec![gallery("a", "레이A"), gallery("b", "레이B")];
        let m = match_gallery("레이", &galleries, &AliasTable::new())
            .unwrap()
            .unwrap();
        assert_eq!(m.gallery.id, "a");
        assert_eq!(m.score, 898);
    }

    #[test]
    fn no_match_is_none_not_error() {
        let galleries = vec![gallery("g1", "레이")];
        let m = match_gallery("엔비", &galleries, &AliasTable::new()).unwrap();
        assert!(m.is_none());
    }

    #[test]
    fn blank_name_is_invalid() {
        let galleries = vec![gallery("g1", "레이")];
        let err = match_gallery("  ", &galleries, &AliasTable::new()).unwrap_err();
        assert!(matches!(err, MatchError::InvalidInput(_)));
    }

    #[test]
    fn empty_gallery_list_is_invalid() {
        let err = match_gallery("레이", &[], &AliasTable::new()).unwrap_err();
        assert!(matches!(err, MatchError::InvalidInput(_)));
    }

    #[test]
    fn score_table() {
        assert_eq!(score("레이", "레이"), 1000);
        assert_eq!(score("REI", "rei"), 1000);
        // contains, four extra characters.
        assert_eq!(score("레이 스텔라", "레이"), 892);
        // no containment, one shared word, equal length.
        assert_eq!(score("rei stella", "mei stella"), 750);
        // no relation at all.
        assert_eq!(score("abc", "xyz"), 700);
    }

    #[test]
    fn normalize_strips_whitespace_and_case() {
        assert_eq!(normalize("  Rei  Stella "), "reistella");
        assert_eq!(normalize("레이 스텔라"), "레이스텔라");
    }
}

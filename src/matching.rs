//! Best-match selection within one provider's result set.

/// Anything that can be compared against a requested artist/title pair.
pub trait MatchCandidate {
    fn candidate_artist(&self) -> &str;
    fn candidate_title(&self) -> &str;
}

/// How well a candidate matched. Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    FirstResult,
    TitleContainment,
    Exact,
}

/// Lowercases, drops every char that is neither a word char nor whitespace,
/// and collapses runs of whitespace.
pub fn normalize_for_match(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            normalized.extend(ch.to_lowercase());
        } else if ch.is_whitespace() {
            normalized.push(' ');
        }
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn match_tier<C: MatchCandidate + ?Sized>(candidate: &C, artist: &str, title: &str) -> MatchTier {
    let wanted_artist = normalize_for_match(artist);
    let wanted_title = normalize_for_match(title);
    let found_artist = normalize_for_match(candidate.candidate_artist());
    let found_title = normalize_for_match(candidate.candidate_title());

    if !wanted_title.is_empty() && found_title == wanted_title && found_artist == wanted_artist {
        return MatchTier::Exact;
    }
    if !wanted_title.is_empty()
        && !found_title.is_empty()
        && (found_title.contains(&wanted_title) || wanted_title.contains(&found_title))
    {
        return MatchTier::TitleContainment;
    }
    MatchTier::FirstResult
}

/// Exact artist+title match first, then title containment, then the first result.
pub fn pick_best_match<'a, C: MatchCandidate>(
    candidates: &'a [C],
    artist: &str,
    title: &str,
) -> Option<&'a C> {
    let first_with_tier = |tier: MatchTier| {
        candidates
            .iter()
            .find(|candidate| match_tier(*candidate, artist, title) == tier)
    };
    first_with_tier(MatchTier::Exact)
        .or_else(|| first_with_tier(MatchTier::TitleContainment))
        .or_else(|| candidates.first())
}

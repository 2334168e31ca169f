//! Fuzzy term matching and highlighting for title search.
//!
//! Matching follows "AUTO" fuzziness: a query term of up to two characters
//! must match a title token exactly, three to five characters allow one edit,
//! longer terms allow two. Comparison is case-insensitive.
//!
//! Terms combine with OR: a title matches when any query term matches one of
//! its tokens. Titles matching more terms rank first, then titles needing
//! fewer edits.

/// Opening highlight tag.
pub const HIGHLIGHT_PRE: &str = "<em>";
/// Closing highlight tag.
pub const HIGHLIGHT_POST: &str = "</em>";

/// Edit distance over Unicode scalar values, counting an adjacent
/// transposition as one edit (optimal string alignment).
#[must_use]
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = b.len();
    let mut before: Vec<usize> = vec![0; n + 1];
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0; n + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                curr[j] = curr[j].min(before[j - 2] + 1);
            }
        }
        std::mem::swap(&mut before, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Maximum edits allowed for a query term.
#[must_use]
pub fn fuzziness(term: &str) -> usize {
    match term.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// Byte spans of the alphanumeric tokens in `text`.
#[must_use]
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        match (ch.is_alphanumeric(), start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                spans.push((s, idx));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Lowercased query terms.
#[must_use]
pub fn query_terms(query: &str) -> Vec<String> {
    token_spans(query)
        .into_iter()
        .map(|(s, e)| query[s..e].to_lowercase())
        .collect()
}

/// Lowercased, deduplicated tokens of a title, as stored for lookup.
#[must_use]
pub fn title_tokens(title: &str) -> Vec<String> {
    let mut tokens = query_terms(title);
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}

/// Whether `token` is within `term`'s fuzziness, and at what distance.
#[must_use]
pub fn term_distance(term: &str, token: &str) -> Option<usize> {
    let allowed = fuzziness(term);
    if token.chars().count().abs_diff(term.chars().count()) > allowed {
        return None;
    }
    let distance = edit_distance(term, token);
    (distance <= allowed).then_some(distance)
}

/// Shortest and longest token length any of `terms` can match, in chars.
#[must_use]
pub fn token_length_window(terms: &[String]) -> Option<(usize, usize)> {
    terms
        .iter()
        .map(|term| {
            let len = term.chars().count();
            let allowed = fuzziness(term);
            (len.saturating_sub(allowed).max(1), len + allowed)
        })
        .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)))
}

/// How a title matched a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TitleMatch {
    /// Number of query terms that matched some token
    pub matched_terms: usize,
    /// Sum over matched terms of the closest token's edit distance
    pub edits: usize,
    /// Byte spans of every title token within some term's fuzziness
    pub matched_spans: Vec<(usize, usize)>,
}

impl TitleMatch {
    /// Sort key: more matched terms first, then fewer edits.
    #[must_use]
    pub const fn relevance(&self) -> (std::cmp::Reverse<usize>, usize) {
        (std::cmp::Reverse(self.matched_terms), self.edits)
    }
}

/// Match `terms` against `title`. `None` unless some term matches a token.
#[must_use]
pub fn match_title(terms: &[String], title: &str) -> Option<TitleMatch> {
    let spans = token_spans(title);
    let tokens: Vec<String> = spans
        .iter()
        .map(|&(s, e)| title[s..e].to_lowercase())
        .collect();

    let mut matched_terms = 0;
    let mut edits = 0;
    let mut matched = vec![false; tokens.len()];
    for term in terms {
        let mut best: Option<usize> = None;
        for (idx, token) in tokens.iter().enumerate() {
            if let Some(distance) = term_distance(term, token) {
                matched[idx] = true;
                if best.is_none_or(|d| distance < d) {
                    best = Some(distance);
                }
            }
        }
        if let Some(distance) = best {
            matched_terms += 1;
            edits += distance;
        }
    }
    if matched_terms == 0 {
        return None;
    }

    let matched_spans = spans
        .into_iter()
        .zip(matched)
        .filter_map(|(span, hit)| hit.then_some(span))
        .collect();
    Some(TitleMatch {
        matched_terms,
        edits,
        matched_spans,
    })
}

/// Wrap the given spans of `text` in highlight tags.
#[must_use]
pub fn highlight(text: &str, spans: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(text.len() + spans.len() * 9);
    let mut cursor = 0;
    for &(start, end) in spans {
        out.push_str(&text[cursor..start]);
        out.push_str(HIGHLIGHT_PRE);
        out.push_str(&text[start..end]);
        out.push_str(HIGHLIGHT_POST);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

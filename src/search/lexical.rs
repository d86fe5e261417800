/// Lowercased query terms, split on anything that is not alphanumeric or `_`
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fraction of `terms` found as substrings of the (case-folded) content, in [0, 1]
pub fn lexical_score(terms: &[String], content: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = content.to_lowercase();
    let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f32 / terms.len() as f32
}

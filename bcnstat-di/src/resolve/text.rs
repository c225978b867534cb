//! Text normalization for neighborhood name matching
//!
//! Raw names arrive with inconsistent casing, Catalan/Spanish accents,
//! punctuation variants and optional leading articles. Normalization maps
//! all of them onto one canonical key: lower-case, accents folded,
//! punctuation replaced by spaces, whitespace collapsed, and one leading
//! article stripped so "Poble Sec" and "el Poble-sec" match.

/// Leading articles dropped during normalization (Catalan incl. salat
/// forms). Only the first token is stripped; articles inside a name stay.
const LEADING_ARTICLES: &[&str] = &["el", "la", "els", "les", "l", "es", "sa"];

/// Normalize a raw neighborhood name or alias to its matching key.
pub fn normalize_name(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = fold_accent(c);
        if c.is_alphanumeric() {
            folded.push(c);
        } else {
            folded.push(' ');
        }
    }

    let tokens: Vec<&str> = folded.split_whitespace().collect();
    let tokens = match tokens.first() {
        Some(first) if tokens.len() > 1 && LEADING_ARTICLES.contains(first) => &tokens[1..],
        _ => &tokens[..],
    };
    tokens.join(" ")
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        _ => c,
    }
}

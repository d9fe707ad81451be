// src/normalize/canonical.rs
//
// Canonical form of free-text titles and names. Every equality check and
// every slug in the crate goes through here; nothing else re-implements
// normalization, or the matching guarantees break.

/// Default bound on canonical string length. Anything longer is free-text
/// noise, not a name.
pub const DEFAULT_MAX_CANONICAL_LEN: usize = 200;

/// Latin diacritic fold table. Covers the ranges that actually occur in the
/// catalog (transliterated Indian names, European loan spellings); anything
/// outside it passes through lowercased.
const DIACRITIC_FOLDS: [(char, &str); 60] = [
    ('à', "a"), ('á', "a"), ('â', "a"), ('ã', "a"), ('ä', "a"), ('å', "a"), ('ā', "a"),
    ('ç', "c"), ('č', "c"),
    ('è', "e"), ('é', "e"), ('ê', "e"), ('ë', "e"), ('ē', "e"),
    ('ì', "i"), ('í', "i"), ('î', "i"), ('ï', "i"), ('ī', "i"),
    ('ñ', "n"), ('ņ', "n"), ('ṇ', "n"),
    ('ò', "o"), ('ó', "o"), ('ô', "o"), ('õ', "o"), ('ö', "o"), ('ō', "o"),
    ('ù', "u"), ('ú', "u"), ('û', "u"), ('ü', "u"), ('ū', "u"),
    ('ý', "y"), ('ÿ', "y"),
    ('š', "s"), ('ş', "s"), ('ś', "s"), ('ṣ', "s"),
    ('ž', "z"), ('ź', "z"),
    ('ł', "l"), ('ļ', "l"),
    ('ď', "d"), ('đ', "d"), ('ḍ', "d"),
    ('ť', "t"), ('ṭ', "t"),
    ('ŕ', "r"), ('ř', "r"), ('ṛ', "r"),
    ('ģ', "g"), ('ğ', "g"),
    ('æ', "ae"), ('œ', "oe"), ('ß', "ss"), ('ø', "o"),
    ('ȧ', "a"), ('ė', "e"), ('ȯ', "o"),
];

fn fold_char(c: char, out: &mut String) {
    for (from, to) in DIACRITIC_FOLDS.iter() {
        if *from == c {
            out.push_str(to);
            return;
        }
    }
    out.push(c);
}

/// Canonicalize with the default length bound. See [`canonicalize_bounded`].
pub fn canonicalize(text: &str) -> String {
    canonicalize_bounded(text, DEFAULT_MAX_CANONICAL_LEN)
}

/// Fold case and diacritics, collapse punctuation and whitespace, drop
/// zero-width marks, and trim to `max_len` characters. Pure and idempotent:
/// `canonicalize(canonicalize(x)) == canonicalize(x)`.
pub fn canonicalize_bounded(text: &str, max_len: usize) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        match c {
            // Zero-width and combining marks carry no comparison signal.
            '\u{200b}'..='\u{200f}' | '\u{feff}' | '\u{0300}'..='\u{036f}' => {}
            c if c.is_alphanumeric() => fold_char(c, &mut folded),
            // Everything else (punctuation, symbols) becomes a separator.
            _ => folded.push(' '),
        }
    }

    let collapsed: String = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_len {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(max_len).collect();
    truncated.trim_end().to_string()
}

/// URL-safe slug derived from the canonical form.
pub fn slugify(text: &str) -> String {
    canonicalize(text).replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_punctuation() {
        assert_eq!(canonicalize("N.T. Rama Rao"), "n t rama rao");
        assert_eq!(canonicalize("  Sri   Venkateswara;;Mahatyam!  "), "sri venkateswara mahatyam");
    }

    #[test]
    fn folds_diacritics() {
        assert_eq!(canonicalize("Déjà Vu"), "deja vu");
        assert_eq!(canonicalize("Šankarābharaṇam"), "sankarabharanam");
    }

    #[test]
    fn drops_zero_width_marks() {
        assert_eq!(canonicalize("Ravi\u{200b} Teja"), "ravi teja");
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "Mayabazar (1957)",
            "Raadhika",
            "Déjà—Vu!!",
            "  L. V.  Prasad ",
            "",
        ];
        for input in inputs {
            let once = canonicalize(input);
            assert_eq!(canonicalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn bounded_length_trims_deterministically() {
        let long = "a ".repeat(500);
        let out = canonicalize(&long);
        assert!(out.chars().count() <= DEFAULT_MAX_CANONICAL_LEN);
        assert_eq!(canonicalize(&out), out);
        assert!(!out.ends_with(' '));
    }

    #[test]
    fn slug_is_hyphen_joined_canonical() {
        assert_eq!(slugify("Ranuva Veeran (1981)"), "ranuva-veeran-1981");
    }

    #[test]
    fn empty_and_punctuation_only_collapse_to_empty() {
        assert_eq!(canonicalize("?!...,"), "");
        assert_eq!(canonicalize(""), "");
    }
}

// src/normalize/name_match.rs
//
// Decides whether two free-text name strings denote the same person. Legacy
// role fields frequently hold comma-separated lists ("Krishna, Sobhan Babu"),
// reordered forms, or a bare surname, so plain equality is nowhere near
// enough. The checks run in order and short-circuit on the first hit.

use std::collections::HashSet;

use crate::config::MatcherConfig;
use crate::normalize::canonical::canonicalize;

/// True when `query_name` and `field_value` refer to the same entity.
/// `field_value` may be a comma-separated list of names. Never panics.
///
/// 1. Exact canonical equality.
/// 2. Canonical equality against any comma element of the field.
/// 3. Token-set match: all query tokens appear in a field element, or the
///    element's tokens are a non-empty subset of the query's.
/// 4. Disambiguation guard on step 3: the shorter token set must have at
///    least `min_guard_tokens` tokens, or its single token must be at least
///    `min_single_token_len` characters. Short common given names ("Teja")
///    otherwise collide with every unrelated person sharing that token.
pub fn names_match(query_name: &str, field_value: &str, cfg: &MatcherConfig) -> bool {
    let query = canonicalize(query_name);
    if query.is_empty() {
        return false;
    }

    let field_all = canonicalize(field_value);
    if query == field_all {
        return true;
    }

    let query_tokens: HashSet<&str> = query.split_whitespace().collect();

    for element in field_value.split(',') {
        let element = canonicalize(element);
        if element.is_empty() {
            continue;
        }
        if element == query {
            return true;
        }

        let element_tokens: HashSet<&str> = element.split_whitespace().collect();
        let query_in_element = query_tokens.is_subset(&element_tokens);
        let element_in_query = element_tokens.is_subset(&query_tokens);
        if !(query_in_element || element_in_query) {
            continue;
        }

        // The guard is evaluated on whichever token set is shorter; the
        // longer side being unambiguous doesn't help.
        let shorter = if query_tokens.len() <= element_tokens.len() {
            &query_tokens
        } else {
            &element_tokens
        };
        if guard_passes(shorter, cfg) {
            return true;
        }
    }

    false
}

fn guard_passes(shorter: &HashSet<&str>, cfg: &MatcherConfig) -> bool {
    if shorter.len() >= cfg.min_guard_tokens {
        return true;
    }
    shorter
        .iter()
        .next()
        .map(|t| t.chars().count() >= cfg.min_single_token_len)
        .unwrap_or(false)
}

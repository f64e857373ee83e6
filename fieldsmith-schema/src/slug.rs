//! Deterministic slug normalization.
//!
//! Slugs identify fields, user types, and registrations. The mapping is
//! `str -> [a-z0-9_]*`: lowercase, separators become underscores, everything
//! else is dropped, runs of underscores collapse, leading/trailing
//! underscores are trimmed. The same input always yields the same slug.

/// Normalize an arbitrary string into a slug.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_underscore = true; // suppress a leading underscore

    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if matches!(c, ' ' | '-' | '_' | '.') && !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }

    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_replaces_spaces() {
        assert_eq!(slugify("Favorite Color"), "favorite_color");
    }

    #[test]
    fn drops_non_ascii_and_punctuation() {
        assert_eq!(slugify("Téléphone (mobile)!"), "tlphone_mobile");
    }

    #[test]
    fn collapses_separator_runs() {
        assert_eq!(slugify("a - b__c"), "a_b_c");
    }

    #[test]
    fn trims_edge_underscores() {
        assert_eq!(slugify("  _hello_  "), "hello");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn already_normalized_is_identity() {
        assert_eq!(slugify("website_url_2"), "website_url_2");
    }
}

//! Case-insensitive glob matching for `is` / `is-not` comparisons.
//!
//! Supports `*` (any run of characters, including empty) and `?` (exactly
//! one character). All other characters match themselves. There is no
//! escape syntax; patterns come from filter text or are built verbatim
//! from message attributes.

/// Match `text` against `pattern`, ignoring ASCII case.
pub fn glob_match_ci(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    glob_match(&pattern, &text)
}

/// Iterative matcher with single-star backtracking.
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let mut p = 0;
    let mut t = 0;
    // Position of the most recent '*' and the text position it was tried at.
    let mut star: Option<usize> = None;
    let mut star_t = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star {
            // Let the star absorb one more character and retry.
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_literal_patterns() {
        assert!(glob_match_ci("help", "help"));
        assert!(glob_match_ci("help", "HELP"));
        assert!(glob_match_ci("HeLp", "hElP"));
        assert!(!glob_match_ci("help", "help2"));
        assert!(!glob_match_ci("help", "hel"));
    }

    #[test]
    fn test_star() {
        assert!(glob_match_ci("*", ""));
        assert!(glob_match_ci("*", "anything"));
        assert!(glob_match_ci("un*", "unclass"));
        assert!(glob_match_ci("*class", "ununclass"));
        assert!(glob_match_ci("*pipit*", "a pipit appears"));
        assert!(!glob_match_ci("un*x", "unclass"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match_ci("?", "a"));
        assert!(!glob_match_ci("?", ""));
        assert!(glob_match_ci("h?lp", "help"));
        assert!(!glob_match_ci("h?lp", "heelp"));
    }

    #[test]
    fn test_star_backtracking() {
        assert!(glob_match_ci("*ab*ab", "abxabab"));
        assert!(glob_match_ci("a*a*a", "aaa"));
        assert!(!glob_match_ci("a*a*a", "aa"));
    }

    proptest! {
        /// A pattern with no wildcards is case-insensitive equality.
        #[test]
        fn prop_literal_is_ci_equality(s in "[a-zA-Z0-9 ._@/-]{0,24}") {
            prop_assert!(glob_match_ci(&s, &s));
            prop_assert!(glob_match_ci(&s.to_ascii_uppercase(), &s.to_ascii_lowercase()));
        }

        /// '*' on either side of a literal still matches the literal.
        #[test]
        fn prop_star_wrapping_matches(s in "[a-z0-9.]{0,16}") {
            let wrapped = format!("*{}*", s);
            let embedded = format!("xx{}yy", s);
            prop_assert!(glob_match_ci(&wrapped, &s));
            prop_assert!(glob_match_ci(&wrapped, &embedded));
        }
    }
}

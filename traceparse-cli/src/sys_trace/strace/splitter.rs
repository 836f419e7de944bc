// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

/// Splits the text between a syscall's parentheses into raw argument tokens.
///
/// The split is a naive top-level split on `", "`, followed by `merge_quoted_tokens` to repair string literals that
/// contained `", "` themselves.  Structures (`{...}`, `[...]`) remain split across tokens; the structure parsers in
/// `args` re-collect them.
#[must_use]
pub fn split_arguments(blob: &str) -> Vec<String> {
    let blob = blob.trim().trim_end_matches(',');
    if blob.is_empty() {
        return Vec::new();
    }
    merge_quoted_tokens(blob.split(", ").map(String::from).collect())
}

/// Re-joins tokens that were split inside a double-quoted string literal.  A token opening a quote that it doesn't
/// close absorbs each following token (re-inserting the `", "` separator) until one ends in an unescaped quote.  A
/// quote that is never closed absorbs the rest of the list.
#[must_use]
pub fn merge_quoted_tokens(tokens: Vec<String>) -> Vec<String> {
    let mut merged = Vec::with_capacity(tokens.len());
    let mut tokens = tokens.into_iter();

    while let Some(mut token) = tokens.next() {
        if token.starts_with('"') {
            while !ends_in_unescaped_quote(trimmed_string(&token)) {
                let Some(next) = tokens.next() else {
                    break;
                };
                token.push_str(", ");
                token.push_str(&next);
            }
        }
        merged.push(token);
    }

    merged
}

// Strings truncated by strace's string limit end in `"...`; the ellipsis follows the closing quote.
fn trimmed_string(token: &str) -> &str {
    token.trim_end_matches('.')
}

/// True if `token` is a complete string literal: it ends in a `"` that isn't the opening quote, and that quote is
/// preceded by an even number of backslashes.
#[must_use]
pub fn ends_in_unescaped_quote(token: &str) -> bool {
    // the opening quote alone doesn't close anything
    if token == "\"" {
        return false;
    }
    let Some(body) = token.strip_suffix('"') else {
        return false;
    };
    trailing_backslashes(body) % 2 == 0
}

fn trailing_backslashes(s: &str) -> usize {
    s.chars().rev().take_while(|c| *c == '\\').count()
}

#[cfg(test)]
mod tests {
    use super::{ends_in_unescaped_quote, merge_quoted_tokens, split_arguments};

    fn tokens(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| String::from(*s)).collect()
    }

    #[test]
    fn simple_split() {
        assert_eq!(
            split_arguments(r#""test.txt", O_RDONLY, 0"#),
            tokens(&[r#""test.txt""#, "O_RDONLY", "0"])
        );
        assert_eq!(split_arguments(""), Vec::<String>::new());
        assert_eq!(split_arguments("  "), Vec::<String>::new());
        // resumed/unfinished fragments can leave a trailing comma
        assert_eq!(split_arguments("3, "), tokens(&["3"]));
    }

    #[test]
    fn quoted_comma() {
        assert_eq!(
            split_arguments(r#"1, "hello, world", 12"#),
            tokens(&["1", r#""hello, world""#, "12"])
        );
        assert_eq!(
            split_arguments(r#"1, "a, b, c", 12"#),
            tokens(&["1", r#""a, b, c""#, "12"])
        );
    }

    #[test]
    fn escaped_quote_inside() {
        // `"say \", hi"` -- the first quote after `say ` is escaped, so the string continues
        assert_eq!(
            split_arguments(r#"1, "say \", hi", 2"#),
            tokens(&["1", r#""say \", hi""#, "2"])
        );
        // escaped backslash before the quote; the quote closes the string
        assert_eq!(
            split_arguments(r#"1, "dir\\", 2"#),
            tokens(&["1", r#""dir\\""#, "2"])
        );
    }

    #[test]
    fn truncated_string() {
        assert_eq!(
            split_arguments(r#"3, "abc, def"..., 1024"#),
            tokens(&["3", r#""abc, def"..."#, "1024"])
        );
    }

    #[test]
    fn unterminated_absorbs_rest() {
        assert_eq!(
            merge_quoted_tokens(tokens(&["1", "\"abc", "def", "ghi"])),
            tokens(&["1", "\"abc, def, ghi"])
        );
    }

    #[test]
    fn empty_and_lone_quote() {
        assert!(ends_in_unescaped_quote(r#""""#));
        assert!(!ends_in_unescaped_quote(r#"""#));
        assert!(ends_in_unescaped_quote(r#"world""#));
        assert!(!ends_in_unescaped_quote(r#"world\""#));
        assert!(ends_in_unescaped_quote(r#"world\\""#));
        assert!(!ends_in_unescaped_quote("world"));
    }

    #[test]
    fn rejoin_reproduces_input() {
        for blob in [
            r#""a, b", 3, {sa_family=AF_INET, sin_port=htons(80), sin_addr=inet_addr("1.2.3.4")}, 16"#,
            r#"7, "hello world", 1024"#,
            r#""x\"y, z", O_RDONLY"#,
        ] {
            let split = split_arguments(blob);
            assert_eq!(split.join(", "), blob);
            assert_eq!(merge_quoted_tokens(split.clone()), split);
        }
    }
}

//! Line to word normalization used by the mappers.
//!
//! Every character falls into exactly one class. Letters build words,
//! separators end them, and everything else is dropped in place so the
//! letters on either side stay joined (`don't` -> `dont`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    Letter,
    Separator,
    Dropped,
}

pub fn classify(c: char) -> CharClass {
    match c {
        'a'..='z' | 'A'..='Z' => CharClass::Letter,
        ';' | '!' | '?' | '[' | ']' => CharClass::Separator,
        // en and em dashes
        '\u{2013}' | '\u{2014}' => CharClass::Separator,
        c if c.is_whitespace() => CharClass::Separator,
        _ => CharClass::Dropped,
    }
}

/// Splits `line` into lowercase ASCII words.
pub fn words(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in line.chars() {
        match classify(c) {
            CharClass::Letter => current.push(c.to_ascii_lowercase()),
            CharClass::Separator => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            CharClass::Dropped => {}
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_table() {
        let table: &[(&str, CharClass)] = &[
            ("abcxyzABCXYZ", CharClass::Letter),
            (" \t\r\n\u{000b}\u{000c}\u{00a0}", CharClass::Separator),
            (";!?[]", CharClass::Separator),
            ("\u{2013}\u{2014}", CharClass::Separator),
            ("'\u{2018}\u{2019}-", CharClass::Dropped),
            (".,:\"(){}<>*/", CharClass::Dropped),
            ("\u{201c}\u{201d}", CharClass::Dropped),
            ("0123456789#&_@", CharClass::Dropped),
            ("\u{e9}\u{df}\u{4e2d}", CharClass::Dropped),
        ];
        for (chars, class) in table {
            for c in chars.chars() {
                assert_eq!(classify(c), *class, "{:?}", c);
            }
        }
    }

    #[test]
    fn plain_words_are_lowercased() {
        assert_eq!(words("The Cat SAT"), ["the", "cat", "sat"]);
    }

    #[test]
    fn possessives_contractions_and_hyphens_fold() {
        assert_eq!(
            words("beauty's self-substantial don't feed'st"),
            ["beautys", "selfsubstantial", "dont", "feedst"]
        );
    }

    #[test]
    fn curly_quotes_fold_like_ascii() {
        assert_eq!(
            words("\u{201c}Tis my lady\u{2019}s \u{2018}fault\u{2019}\u{201d}"),
            ["tis", "my", "ladys", "fault"]
        );
    }

    #[test]
    fn dashes_and_terminal_punctuation_split() {
        assert_eq!(words("yes\u{2014}no; stop!go?[end]"), ["yes", "no", "stop", "go", "end"]);
    }

    #[test]
    fn stripped_punctuation_joins_neighbours() {
        assert_eq!(words("(hello), <world>. e.g."), ["hello", "world", "eg"]);
    }

    #[test]
    fn punctuation_only_line_has_no_words() {
        assert!(words("... !!! ,,,").is_empty());
        assert!(words("").is_empty());
        assert!(words("   \t ").is_empty());
        assert!(words("1984 -- 2001").is_empty());
    }

    #[test]
    fn digits_inside_words_are_dropped() {
        assert_eq!(words("r2d2 abc123def"), ["rd", "abcdef"]);
    }
}

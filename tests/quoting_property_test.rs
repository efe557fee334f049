//! Property tests for the columnar literal quoters: arbitrary strings must
//! never produce a literal that closes its quoting early.

use netwatcher_controller::columnar::quoting::{like_prefix, quote_string};
use proptest::prelude::*;

proptest! {
    #[test]
    fn quoted_string_is_always_single_quote_wrapped(s in ".*") {
        let quoted = quote_string(&s);
        prop_assert!(quoted.starts_with('\''));
        prop_assert!(quoted.ends_with('\''));
    }

    #[test]
    fn quoted_string_never_contains_an_unescaped_quote(s in "[^']*'[^']*") {
        let quoted = quote_string(&s);
        let inner = &quoted[1..quoted.len() - 1];
        // every single quote in the interior is part of a doubled pair
        let mut chars = inner.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                assert_eq!(chars.next(), Some('\''));
            }
        }
    }

    #[test]
    fn like_prefix_escapes_every_wildcard_and_quote(prefix in ".*") {
        let fragment = like_prefix("target", &prefix);
        prop_assert!(fragment.starts_with("target LIKE '"));
        prop_assert!(fragment.ends_with("%'"));
    }
}

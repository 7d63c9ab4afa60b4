// Text that keystroke simulation can reproduce reliably is typed; anything
// else (accents, emoji, CJK, line breaks) goes through clipboard paste.

const TYPEABLE_PUNCTUATION: &str = " ,.?!@#$%^&*()-_=+[]{}|;:'\"<>/\\`~";

/// Models write line breaks as a literal backslash-n.
pub fn expand_newline_escapes(text: &str) -> String {
    text.replace("\\n", "\n")
}

pub fn is_typeable(c: char) -> bool {
    c.is_ascii_alphanumeric() || TYPEABLE_PUNCTUATION.contains(c)
}

/// True if any character falls outside the typeable set.
pub fn requires_clipboard(text: &str) -> bool {
    !text.chars().all(is_typeable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_become_line_breaks() {
        assert_eq!(expand_newline_escapes(r"Hi\nthere"), "Hi\nthere");
        assert_eq!(expand_newline_escapes("plain"), "plain");
    }

    #[test]
    fn plain_ascii_is_typed() {
        assert!(!requires_clipboard("Hello, world! (test) user@example.com ~/path\\x"));
    }

    #[test]
    fn non_ascii_and_line_breaks_are_pasted() {
        assert!(requires_clipboard("café"));
        assert!(requires_clipboard("你好"));
        assert!(requires_clipboard("line one\nline two"));
        assert!(requires_clipboard("tab\there"));
    }
}

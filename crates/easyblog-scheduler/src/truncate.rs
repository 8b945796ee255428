//! Output truncation for stored run records.
//!
//! A chatty task (migrations, `collectstatic -v 2`) must not bloat the run
//! table. The head and the tail are kept because the tail carries the final
//! error while the head shows what the command was doing.

/// Truncate `output` to at most `max_chars` characters by cutting the middle.
///
/// Splits on character boundaries, never inside a multi-byte sequence.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let half = max_chars / 2;
    let head: String = output.chars().take(half).collect();
    let tail: String = output.chars().skip(total - half).collect();
    let omitted = total - 2 * half;

    format!("{head}\n\n... [{omitted} chars omitted] ...\n\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_untouched() {
        assert_eq!(truncate_output("done", 10), "done");
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let input = format!("{}{}", "a".repeat(50), "z".repeat(50));
        let out = truncate_output(&input, 20);
        assert!(out.starts_with(&"a".repeat(10)));
        assert!(out.ends_with(&"z".repeat(10)));
        assert!(out.contains("[80 chars omitted]"));
    }

    #[test]
    fn multibyte_characters_are_not_split() {
        let input = "ž".repeat(30);
        let out = truncate_output(&input, 10);
        assert!(out.starts_with(&"ž".repeat(5)));
        assert!(out.ends_with(&"ž".repeat(5)));
    }
}

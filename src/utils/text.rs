/// Removes a surrounding Markdown code fence, if the model added one.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// First `max_chars` characters of `s`, with an ellipsis when cut.
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }

    #[test]
    fn test_word_count_ignores_extra_whitespace() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("  the  keeper\nlights\tthe lamp "), 5);
        assert_eq!(word_count("storm-tossed waves crash"), 3);
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("lighthouse", 5), "light...");
        assert_eq!(preview("storm", 5), "storm");
        assert_eq!(preview("燈塔與風暴", 2), "燈塔...");
    }
}

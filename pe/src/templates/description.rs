use tracing::debug;

/// Comment delimiters accepted on the first line, long form first so that
/// `{{!-- x --}}` never matches the short form
const COMMENT_DELIMITERS: [(&str, &str); 8] = [
    ("{{!--", "--}}"),
    ("{{~!--", "--}}"),
    ("{{!--", "--~}}"),
    ("{{~!--", "--~}}"),
    ("{{~!", "~}}"),
    ("{{!", "~}}"),
    ("{{~!", "}}"),
    ("{{!", "}}"),
];

/// Extract a prompt description from the first line of a template
///
/// The first non-blank line must consist of a single handlebars comment
/// (`{{!-- text --}}` or `{{! text }}`, optionally with `~` whitespace
/// control). Returns an empty string when there is no such comment.
pub fn extract_description(content: &str) -> String {
    let first_line = content.trim_start().lines().next().unwrap_or("").trim();
    debug!(first_line_len = first_line.len(), "extract_description: called");

    for (open, close) in COMMENT_DELIMITERS {
        if let Some(inner) = first_line
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
            && is_single_comment(inner, open.ends_with("--"))
        {
            return inner.trim().to_string();
        }
    }

    String::new()
}

/// The comment body must not close the comment early
fn is_single_comment(inner: &str, long_form: bool) -> bool {
    if long_form {
        !inner.contains("--}}") && !inner.contains("--~}}")
    } else {
        !inner.contains("}}")
    }
}

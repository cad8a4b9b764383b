//! Comment and filename escaping.
//!
//! HTML-escapes the input, then re-inserts a small whitelist of
//! span-producing markers (`[spoiler]`, `[code]`), collapses runs of blank
//! lines down to one, and wraps `&gt;`-prefixed lines (post-escape
//! greentext) in a quote span.

/// HTML-escapes the five characters Go's `template.HTMLEscapeString` treats
/// specially.
fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_bbcode(s: &str) -> String {
    s.replace("[spoiler]", r#"<span class="spoiler">"#)
        .replace("[/spoiler]", "</span>")
        .replace("[code]", "<code>")
        .replace("[/code]", "</code>")
}

/// Escapes a comment or filename for inclusion in rendered HTML.
pub fn escape(text: &str) -> String {
    let text = unescape_bbcode(&html_escape(text));
    let text = text.trim();

    let mut lines = Vec::new();
    let mut blank_run = 0u32;

    for raw_line in text.split('\n') {
        let line = raw_line.trim_matches('\n');
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run < 2 {
                lines.push(line.to_owned());
            }
            continue;
        }

        blank_run = 0;
        if line.starts_with("&gt;") {
            lines.push(format!(r#"<span class="line_quote">{line}</span>"#));
        } else {
            lines.push(line.to_owned());
        }
    }

    lines.join("").trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html_and_markers() {
        assert_eq!(escape("<b>hi</b>"), "&lt;b&gt;hi&lt;/b&gt;");
        assert_eq!(escape("[spoiler]x[/spoiler]"), r#"<span class="spoiler">x</span>"#);
    }

    #[test]
    fn collapses_blank_lines() {
        // Lines are joined without a separator (matching the source this is
        // grounded on); a run of blank lines collapses to at most one empty
        // line, which then contributes nothing to the joined output.
        let input = "a\n\n\n\nb";
        assert_eq!(escape(input), "ab");
    }

    #[test]
    fn wraps_greentext() {
        assert_eq!(escape(">quoted"), r#"<span class="line_quote">&gt;quoted</span>"#);
    }
}

//! HTML to plain text conversion for bodies without a text/plain alternative

use regex::Regex;
use std::sync::OnceLock;

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<!--.*?-->")
            .expect("valid script/style regex")
    })
}

fn line_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(?:p|div|li|tr|h[1-6])\s*>").expect("valid line break regex")
    })
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<li\b[^>]*>").expect("valid list item regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"))
}

/// Convert an HTML body into readable plain text.
///
/// Script and style blocks are removed, common block-level tags become line
/// breaks, list items become `- ` bullets, remaining tags are stripped,
/// entities are unescaped and runs of blank lines collapse to one.
pub fn html_to_text(html: &str) -> String {
    let text = script_style_re().replace_all(html, "");
    let text = line_break_re().replace_all(&text, "\n");
    let text = list_item_re().replace_all(&text, "\n- ");
    let text = tag_re().replace_all(&text, "");
    let text = unescape_entities(&text);
    let text = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{a0}', " ");

    let mut lines: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        let trimmed = line.trim_matches(|c: char| c.is_whitespace());
        if trimmed.is_empty() {
            if lines.last().is_some_and(|last| !last.is_empty()) {
                lines.push("");
            }
            continue;
        }
        lines.push(trimmed);
    }

    lines.join("\n").trim().to_string()
}

/// Decode HTML5 named and numeric character references. Unknown
/// references are kept verbatim.
pub fn unescape_entities(s: &str) -> String {
    html_escape::decode_html_entities(s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_html_to_text_strips_markup() {
        let html = r#"<html><head><style>p { color: red; }</style>
<script type="text/javascript">alert("x")</script></head>
<body><h1>Welcome</h1><p>Hello&nbsp;<b>world</b> &amp; friends</p>
<ul><li>one</li><li>two</li></ul>
<div>Line<br>break<br/>again</div><!-- hidden --></body></html>"#;

        assert_eq!(
            html_to_text(html),
            "Welcome\nHello world & friends\n\n- one\n\n- two\n\nLine\nbreak\nagain"
        );
    }

    #[test]
    fn test_html_to_text_collapses_blank_lines() {
        let html = "<p>first</p>\r\n\r\n\r\n<p>second</p>";
        assert_eq!(html_to_text(html), "first\n\nsecond");
    }

    #[test]
    fn test_html_to_text_keeps_visible_content_only() {
        assert_eq!(html_to_text("<script>var a = 1;</script>"), "");
        assert!(!html_to_text("<span>visible</span>").is_empty());
    }

    #[test]
    fn test_unescape_entities() {
        assert_eq!(unescape_entities("a &lt;b&gt; &#65;&#x42; &quot;c&quot;"), "a <b> AB \"c\"");
        assert_eq!(unescape_entities("fish & chips"), "fish & chips");
    }

    #[test]
    fn test_html_to_text_decodes_named_entities() {
        assert_eq!(
            html_to_text("<p>caf&eacute; M&uuml;ller &hearts;</p>"),
            "café Müller ♥"
        );
        assert_eq!(unescape_entities("&Aring;ngstr&ouml;m &mdash; &euro;5"), "Ångström — €5");
    }
}

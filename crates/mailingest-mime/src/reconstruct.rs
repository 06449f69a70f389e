//! Self-contained HTML reconstruction for display.

use crate::email::{EmailContent, EmbeddedImage};
use crate::encoding::encode_base64;

/// Attribute marking markup injected by [`add_display_styles`].
pub const VIEW_MARKER: &str = "data-mailingest-view";

/// Document produced when a message has neither HTML nor text.
pub const PLACEHOLDER_HTML: &str =
    "<html><head><meta charset=\"utf-8\"></head><body><p>Unable to parse email content</p></body></html>";

const DISPLAY_STYLE: &str = "\
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif; \
line-height: 1.6; color: #333; background-color: #f5f5f5; margin: 0; padding: 20px; }\n\
.email-container { max-width: 800px; margin: 0 auto; background: #fff; padding: 30px; \
border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }\n\
img { max-width: 100%; height: auto; }\n\
table { border-collapse: collapse; width: 100%; }\n\
td, th { padding: 8px; text-align: left; }\n\
a { color: #007bff; text-decoration: none; }\n\
a:hover { text-decoration: underline; }\n\
pre { white-space: pre-wrap; word-wrap: break-word; }\n";

/// Wraps plain text in a minimal HTML shell that preserves whitespace.
#[must_use]
pub fn wrap_text(text: &str) -> String {
    format!(
        "<pre style=\"white-space: pre-wrap; word-wrap: break-word;\">{}</pre>",
        escape_html(text)
    )
}

/// Builds a display document from parsed content.
///
/// Uses the HTML body when present, otherwise the wrapped text, otherwise
/// [`PLACEHOLDER_HTML`]. Inline images are resolved to data URIs and the
/// display styles are injected. Feeding the output back in as HTML yields
/// the same document.
#[must_use]
pub fn reconstruct(content: &EmailContent) -> String {
    let base = if !content.html.trim().is_empty() {
        content.html.clone()
    } else if !content.text.trim().is_empty() {
        format!("<html><body>{}</body></html>", wrap_text(&content.text))
    } else {
        PLACEHOLDER_HTML.to_string()
    };

    let inlined = inline_images(&base, &content.embedded_images);
    add_display_styles(&inlined)
}

/// Replaces every `cid:<id>` reference with a base64 data URI.
///
/// Images without a content id, and references to unknown ids, are left as
/// they are.
#[must_use]
pub fn inline_images(html: &str, images: &[EmbeddedImage]) -> String {
    let mut out = html.to_string();
    for image in images {
        let Some(id) = image.content_id.as_deref() else {
            continue;
        };
        let token = format!("cid:{id}");
        if !out.contains(&token) {
            continue;
        }
        let uri = format!(
            "data:{};base64,{}",
            image.content_type,
            encode_base64(&image.payload)
        );
        out = out.replace(&token, &uri);
    }
    out
}

/// Injects the display style block and the bounding container.
///
/// Does nothing if the document already carries [`VIEW_MARKER`].
#[must_use]
pub fn add_display_styles(html: &str) -> String {
    if html.contains(VIEW_MARKER) {
        return html.to_string();
    }

    let style = format!("<style {VIEW_MARKER}>\n{DISPLAY_STYLE}</style>");
    let open_container = format!("<div class=\"email-container\" {VIEW_MARKER}>");

    let mut doc = html.to_string();

    if let Some(end) = open_tag_end(&doc, "head") {
        doc.insert_str(end, &style);
    } else if let Some(end) = open_tag_end(&doc, "html") {
        doc.insert_str(end, &format!("<head><meta charset=\"utf-8\">{style}</head>"));
    } else {
        return format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">{style}</head>\
             <body>{open_container}{html}</div></body></html>"
        );
    }

    if let Some(end) = open_tag_end(&doc, "body") {
        doc.insert_str(end, &open_container);
        match rfind_ignore_case(&doc, "</body") {
            Some(close) if close >= end => doc.insert_str(close, "</div>"),
            _ => doc.push_str("</div>"),
        }
    } else {
        let start = rfind_ignore_case(&doc, "</head>").map_or(0, |i| i + "</head>".len());
        let close = rfind_ignore_case(&doc, "</html")
            .filter(|&i| i >= start)
            .unwrap_or(doc.len());
        doc.insert_str(close, "</div></body>");
        doc.insert_str(start, &format!("<body>{open_container}"));
    }

    doc
}

/// Byte offset just past the first `<name ...>` opening tag.
fn open_tag_end(doc: &str, name: &str) -> Option<usize> {
    let lower = doc.to_ascii_lowercase();
    let needle = format!("<{name}");
    let mut from = 0;

    while let Some(pos) = lower[from..].find(&needle) {
        let start = from + pos;
        let after = start + needle.len();
        match lower.as_bytes().get(after) {
            Some(b'>') => return Some(after + 1),
            Some(c) if c.is_ascii_whitespace() || *c == b'/' => {
                return lower[after..].find('>').map(|i| after + i + 1);
            }
            None => return None,
            _ => from = after,
        }
    }

    None
}

fn rfind_ignore_case(doc: &str, needle: &str) -> Option<usize> {
    doc.to_ascii_lowercase().rfind(needle)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn png(id: &str) -> EmbeddedImage {
        EmbeddedImage {
            filename: None,
            content_type: "image/png".to_string(),
            size_bytes: 4,
            payload: b"\x89PNG".to_vec(),
            content_id: Some(id.to_string()),
        }
    }

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn test_html_with_head_gets_style_inside_head() {
        let content = EmailContent {
            html: "<HTML><Head><title>t</title></Head><BODY class=x><p>hi</p></BODY></HTML>"
                .to_string(),
            ..EmailContent::default()
        };
        let out = reconstruct(&content);
        let style_at = out.find("<style").unwrap();
        assert!(style_at > out.find("<Head>").unwrap());
        assert!(style_at < out.find("</Head>").unwrap());
        assert!(out.contains("<BODY class=x><div class=\"email-container\""));
        assert!(out.contains("<p>hi</p></div></BODY>"));
    }

    #[test]
    fn test_header_tag_is_not_head() {
        let out = add_display_styles("<html><body><header>x</header></body></html>");
        assert!(out.starts_with("<html><head>"));
        assert_eq!(count(&out, "<header>"), 1);
    }

    #[test]
    fn test_fragment_is_wrapped() {
        let out = add_display_styles("<p>fragment</p>");
        assert!(out.starts_with("<!DOCTYPE html>"));
        assert!(out.contains("<div class=\"email-container\" data-mailingest-view><p>fragment</p></div>"));
    }

    #[test]
    fn test_head_without_body() {
        let out = add_display_styles("<html><head></head><p>x</p></html>");
        assert!(out.contains("</head><body><div class=\"email-container\""));
        assert!(out.ends_with("<p>x</p></div></body></html>"));
    }

    #[test]
    fn test_text_only_is_escaped_and_wrapped() {
        let content = EmailContent {
            text: "a < b\n  indented".to_string(),
            ..EmailContent::default()
        };
        let out = reconstruct(&content);
        assert!(out.contains("<pre style=\"white-space: pre-wrap; word-wrap: break-word;\">a &lt; b\n  indented</pre>"));
    }

    #[test]
    fn test_empty_content_uses_placeholder() {
        let out = reconstruct(&EmailContent::default());
        assert!(out.contains("Unable to parse email content"));
        assert!(out.contains(VIEW_MARKER));
    }

    #[test]
    fn test_cid_is_inlined() {
        let content = EmailContent {
            html: "<html><body><img src=\"cid:img1\"><img src='cid:img1'></body></html>"
                .to_string(),
            embedded_images: vec![png("img1")],
            ..EmailContent::default()
        };
        let out = reconstruct(&content);
        assert_eq!(count(&out, "cid:img1"), 0);
        assert_eq!(count(&out, "data:image/png;base64,iVBORw=="), 2);
    }

    #[test]
    fn test_unknown_cid_left_alone() {
        let out = inline_images("<img src=\"cid:missing\">", &[png("img1")]);
        assert_eq!(out, "<img src=\"cid:missing\">");
    }

    #[test]
    fn test_reconstruct_is_idempotent() {
        let content = EmailContent {
            html: "<html><head></head><body><img src=\"cid:a\"> <img src=\"cid:b\"></body></html>"
                .to_string(),
            embedded_images: vec![png("a")],
            ..EmailContent::default()
        };
        let once = reconstruct(&content);
        let twice = reconstruct(&EmailContent {
            html: once.clone(),
            ..content.clone()
        });
        assert_eq!(once, twice);
        assert_eq!(count(&twice, "<style"), 1);
        assert_eq!(count(&twice, "email-container\""), 1);
        assert_eq!(count(&twice, "cid:b"), 1);
    }

    proptest! {
        #[test]
        fn prop_reconstruct_idempotent(html in "[a-zA-Z<>/ =\"]{0,64}", text in ".{0,32}") {
            let content = EmailContent { html, text, ..EmailContent::default() };
            let once = reconstruct(&content);
            let again = reconstruct(&EmailContent { html: once.clone(), ..EmailContent::default() });
            prop_assert_eq!(count(&again, "<style data-mailingest-view>"), 1);
            prop_assert_eq!(once, again);
        }
    }
}

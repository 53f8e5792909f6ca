//! Content sanitization on the cache write path
//!
//! Markup is filtered before it is persisted so cached payloads cannot carry
//! executable content. The allow-list sanitizer is the primary path. The
//! fallback exists for hosts where the primary sanitizer is not installed; it
//! is best-effort and NOT a security boundary.

use crate::CacheError;
use regex::{Captures, Regex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Tags kept by the allow-list path
pub const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "em", "strong", "i", "b", "u", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Attributes kept on allowed tags
pub const ALLOWED_ATTRIBUTES: &[&str] = &["class", "id"];

/// Transforms raw markup into content safe to cache
pub trait Sanitizer: Send + Sync {
    /// Sanitizer name for logs
    fn name(&self) -> &'static str;

    /// Sanitize markup
    fn sanitize(&self, input: &str) -> String;
}

struct Patterns {
    comment: Regex,
    script_block: Regex,
    style_block: Regex,
    tag: Regex,
    attribute: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        comment: Regex::new(r"(?s)<!--.*?-->").unwrap(),
        script_block: Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap(),
        style_block: Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap(),
        tag: Regex::new(r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)([^>]*)>").unwrap(),
        attribute: Regex::new(
            r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#,
        )
        .unwrap(),
    })
}

/// Allow-list sanitizer.
///
/// Keeps [`ALLOWED_TAGS`] with only [`ALLOWED_ATTRIBUTES`], drops every other
/// tag while keeping its text, removes script/style blocks and comments
/// entirely, and escapes stray angle brackets. Output is canonical, so
/// sanitizing it again returns it unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowListSanitizer;

impl AllowListSanitizer {
    fn render_tag(closing: bool, name: &str, attrs: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        if !ALLOWED_TAGS.contains(&name.as_str()) {
            return None;
        }
        if closing {
            return Some(format!("</{}>", name));
        }

        let mut out = format!("<{}", name);
        for cap in patterns().attribute.captures_iter(attrs) {
            let attr = cap[1].to_ascii_lowercase();
            if !ALLOWED_ATTRIBUTES.contains(&attr.as_str()) {
                continue;
            }
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .or_else(|| cap.get(4))
                .map(|m| m.as_str())
                .unwrap_or("");
            out.push_str(&format!(" {}=\"{}\"", attr, escape_attribute(value)));
        }
        out.push('>');
        Some(out)
    }
}

impl Sanitizer for AllowListSanitizer {
    fn name(&self) -> &'static str {
        "allow-list"
    }

    fn sanitize(&self, input: &str) -> String {
        let p = patterns();
        let stripped = p.comment.replace_all(input, "");
        let stripped = p.script_block.replace_all(&stripped, "");
        let stripped = p.style_block.replace_all(&stripped, "");

        let mut out = String::with_capacity(stripped.len());
        let mut last = 0;
        for cap in p.tag.captures_iter(&stripped) {
            let Some(whole) = cap.get(0) else { continue };
            out.push_str(&escape_text(&stripped[last..whole.start()]));
            if let Some(tag) = Self::render_tag(!cap[1].is_empty(), &cap[2], &cap[3]) {
                out.push_str(&tag);
            }
            last = whole.end();
        }
        out.push_str(&escape_text(&stripped[last..]));
        out
    }
}

/// Escape-then-unescape fallback with regex stripping.
///
/// Known limitation: pattern-based stripping can be bypassed by crafted
/// markup. Use only when no allow-list sanitizer is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackSanitizer;

struct FallbackPatterns {
    allowed_tag: Regex,
    script_block: Regex,
    event_handler: Regex,
    dangerous_scheme: Regex,
}

fn fallback_patterns() -> &'static FallbackPatterns {
    static PATTERNS: OnceLock<FallbackPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let tags = ALLOWED_TAGS.join("|");
        FallbackPatterns {
            allowed_tag: Regex::new(&format!(
                r"(?i)&lt;(/?)({})\b((?:[^&]|&(?:quot|#39|amp);)*?)&gt;",
                tags
            ))
            .unwrap(),
            script_block: Regex::new(r"(?is)(?:<|&lt;)script\b.*?(?:<|&lt;)/script\s*(?:>|&gt;)")
                .unwrap(),
            event_handler: Regex::new(r#"(?i)\s+on[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#)
                .unwrap(),
            dangerous_scheme: Regex::new(r"(?i)(?:javascript|data|vbscript)\s*:").unwrap(),
        }
    })
}

impl Sanitizer for FallbackSanitizer {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn sanitize(&self, input: &str) -> String {
        let p = fallback_patterns();

        let escaped = input
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;");

        let unescaped = p.allowed_tag.replace_all(&escaped, |cap: &Captures<'_>| {
            let attrs = cap[3]
                .replace("&quot;", "\"")
                .replace("&#39;", "'")
                .replace("&amp;", "&");
            format!("<{}{}{}>", &cap[1], &cap[2], attrs)
        });

        let cleaned = p.script_block.replace_all(&unescaped, "");
        let cleaned = p.event_handler.replace_all(&cleaned, "");
        p.dangerous_scheme.replace_all(&cleaned, "").into_owned()
    }
}

/// Sanitizer selection with a one-time degradation warning
pub struct SanitizationPipeline {
    primary: Option<Arc<dyn Sanitizer>>,
    fallback: FallbackSanitizer,
    degraded_logged: AtomicBool,
}

impl SanitizationPipeline {
    /// Pipeline with a primary sanitizer
    pub fn new(primary: Arc<dyn Sanitizer>) -> Self {
        Self {
            primary: Some(primary),
            fallback: FallbackSanitizer,
            degraded_logged: AtomicBool::new(false),
        }
    }

    /// Pipeline with no primary sanitizer installed
    pub fn fallback_only() -> Self {
        Self {
            primary: None,
            fallback: FallbackSanitizer,
            degraded_logged: AtomicBool::new(false),
        }
    }

    /// Check if the permissive fallback is in use
    pub fn is_degraded(&self) -> bool {
        self.primary.is_none()
    }

    /// Sanitize markup through the best available path
    pub fn sanitize(&self, raw: &str) -> String {
        match &self.primary {
            Some(primary) => primary.sanitize(raw),
            None => {
                if !self.degraded_logged.swap(true, Ordering::Relaxed) {
                    warn!(
                        "Security degradation: {}; cached markup is only best-effort filtered",
                        CacheError::SanitizationUnavailable
                    );
                }
                self.fallback.sanitize(raw)
            }
        }
    }
}

impl Default for SanitizationPipeline {
    fn default() -> Self {
        Self::new(Arc::new(AllowListSanitizer))
    }
}

fn escape_text(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clean(input: &str) -> String {
        AllowListSanitizer.sanitize(input)
    }

    #[test]
    fn test_keeps_allowed_tags_and_text() {
        assert_eq!(
            clean(r#"<p class="lead" onclick="x()">Hello <em>there</em></p>"#),
            r#"<p class="lead">Hello <em>there</em></p>"#
        );
    }

    #[test]
    fn test_strips_disallowed_tags_but_keeps_text() {
        assert_eq!(
            clean(r#"<div><a href="javascript:alert(1)">link</a></div>"#),
            "link"
        );
    }

    #[test]
    fn test_removes_script_and_style_blocks() {
        assert_eq!(
            clean("<h1>T</h1><script>alert(1)</script><style>p{}</style><!-- c -->ok"),
            "<h1>T</h1>ok"
        );
    }

    #[test]
    fn test_canonicalizes_case_and_self_closing() {
        assert_eq!(clean("<BR/><P ID='x'>a</P>"), r#"<br><p id="x">a</p>"#);
    }

    #[test]
    fn test_escapes_stray_brackets() {
        assert_eq!(clean("a < b > c"), "a &lt; b &gt; c");
        // A tag reassembled from fragments must not survive
        assert_eq!(
            clean("<<x>img src=x onerror=alert(1)>"),
            "&lt;img src=x onerror=alert(1)&gt;"
        );
    }

    #[test]
    fn test_idempotent_examples() {
        for input in [
            r#"<p class="a&quot;b">x</p>"#,
            "<b>bold</b> & <i>it</i>",
            "<<script>x</script>p>",
            r#"<h2 id='"q"'>t</h2>"#,
        ] {
            let once = clean(input);
            assert_eq!(clean(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn test_fallback_strips_handlers_and_schemes() {
        let out = FallbackSanitizer.sanitize(
            r#"<p onclick="steal()">hi</p><a href="javascript:alert(1)">x</a><script>bad()</script>"#,
        );
        assert!(out.starts_with("<p>hi</p>"));
        assert!(!out.contains("onclick"));
        assert!(!out.to_lowercase().contains("javascript:"));
        assert!(!out.contains("bad()"));
        assert!(!out.contains("<a"));
    }

    #[test]
    fn test_pipeline_prefers_primary() {
        let pipeline = SanitizationPipeline::default();
        assert!(!pipeline.is_degraded());
        assert_eq!(pipeline.sanitize("<div>x</div>"), "x");
    }

    #[test]
    fn test_pipeline_degrades_to_fallback() {
        let pipeline = SanitizationPipeline::fallback_only();
        assert!(pipeline.is_degraded());
        assert_eq!(pipeline.sanitize("<em>x</em>"), "<em>x</em>");
        assert_eq!(pipeline.sanitize("<div>x</div>"), "&lt;div&gt;x&lt;/div&gt;");
    }

    proptest! {
        #[test]
        fn prop_allow_list_is_idempotent(input in r#"[<>/a-zA-Z0-9 ="'&!-]{0,64}"#) {
            let once = clean(&input);
            prop_assert_eq!(clean(&once), once);
        }

        #[test]
        fn prop_output_has_no_disallowed_tags(input in r#"[<>/a-z0-9 ="']{0,64}"#) {
            let out = clean(&input);
            for cap in patterns().tag.captures_iter(&out) {
                prop_assert!(ALLOWED_TAGS.contains(&cap[2].to_ascii_lowercase().as_str()));
            }
        }
    }
}

//! Markdown renderers for the editor preview.
//!
//! In the browser the preview is rendered by markdown-it with highlight.js
//! (see `browser::MarkdownItRenderer`). [`CmarkRenderer`] renders the same
//! markup natively with `pulldown-cmark` for headless use and tests. Both
//! wrap fenced code as `<pre class="hljs"><code>…</code></pre>`.

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};

use crate::error::RenderError;

/// Turns markdown source into preview HTML.
pub trait MarkdownRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError>;
}

impl<F> MarkdownRenderer for F
where
    F: Fn(&str) -> Result<String, RenderError>,
{
    fn render(&self, source: &str) -> Result<String, RenderError> {
        self(source)
    }
}

/// Native renderer: CommonMark plus tables, strikethrough and task lists.
/// Raw HTML in the source is passed through, as markdown-it's `html: true`
/// does.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmarkRenderer;

impl CmarkRenderer {
    fn options() -> Options {
        let mut opts = Options::empty();
        opts.insert(Options::ENABLE_TABLES);
        opts.insert(Options::ENABLE_STRIKETHROUGH);
        opts.insert(Options::ENABLE_TASKLISTS);
        opts.insert(Options::ENABLE_SMART_PUNCTUATION);
        opts
    }
}

impl MarkdownRenderer for CmarkRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError> {
        let mut events: Vec<Event<'_>> = Vec::new();
        let mut code: Option<(String, String)> = None;

        for event in Parser::new_ext(source, Self::options()) {
            if let Some((lang, buf)) = code.as_mut() {
                match event {
                    Event::Text(text) => buf.push_str(&text),
                    Event::End(TagEnd::CodeBlock) => {
                        let block = highlight_block(lang, buf);
                        events.push(Event::Html(CowStr::from(block)));
                        code = None;
                    }
                    _ => {}
                }
                continue;
            }
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().unwrap_or("").to_string()
                        }
                        CodeBlockKind::Indented => String::new(),
                    };
                    code = Some((lang, String::new()));
                }
                other => events.push(other),
            }
        }

        let mut out = String::with_capacity(source.len() * 3 / 2);
        html::push_html(&mut out, events.into_iter());
        Ok(out)
    }
}

/// Wrap a code block the way the browser highlighter does when no language
/// grammar applies: escaped text inside `pre.hljs > code`.
pub fn highlight_block(lang: &str, code: &str) -> String {
    let class = if lang.is_empty() {
        String::new()
    } else {
        format!(" class=\"language-{}\"", escape_html(lang))
    };
    format!("<pre class=\"hljs\"><code{class}>{}</code></pre>\n", escape_html(code))
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

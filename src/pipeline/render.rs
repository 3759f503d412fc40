//! Markdown → Telegram HTML.
//!
//! The answer backend speaks GitHub-flavoured markdown with numeric citation
//! links (`[3](https://...)`). Telegram accepts only a handful of HTML tags, so
//! rendering happens in two passes: pulldown-cmark produces ordinary HTML with
//! citations renumbered in first-seen order, then [`clean_markup`] flattens
//! block structure into line breaks and drops every tag Telegram would reject.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};
use regex::{Captures, Regex};
use tracing::warn;

use crate::pipeline::error::PipelineError;

/// Tags Telegram's HTML parse mode understands. `span` is handled separately
/// because only `<span class="tg-spoiler">` is valid.
const ALLOWED_TAGS: &[&str] = &[
    "b", "strong", "i", "em", "u", "ins", "s", "strike", "del", "code", "pre", "a", "tg-spoiler",
];

static ESCAPED_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\([_*\[\]()~`>#+=|{}.!\-])").expect("valid regex"));
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));
static FENCED_CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(\d+)```").expect("valid regex"));

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?p>|</?br\s*/?>\n?|</?div(?:\s[^>]*)?>").expect("valid regex")
});
static HEADING_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<h[1-6](?:\s[^>]*)?>").expect("valid regex"));
static HEADING_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</h[1-6]>").expect("valid regex"));
static LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?(?:ul|ol)(?:\s[^>]*)?>").expect("valid regex"));
static ITEM_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<li(?:\s[^>]*)?>").expect("valid regex"));
static ITEM_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</li>").expect("valid regex"));
static TABLE_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?(?:table|thead|tbody|tfoot)(?:\s[^>]*)?>\s*").expect("valid regex")
});
static CELL_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</t[hd]>\s*<t[hd](?:\s[^>]*)?>").expect("valid regex"));
static ROW_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</tr>\s*").expect("valid regex"));
static DECLARATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[!?][^>]*>").expect("valid regex"));
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)([^>]*)>").expect("valid regex"));
static EXTRA_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Render backend markdown without an accompanying link list.
pub fn render(markdown: &str) -> String {
    render_with_citations(markdown, &[])
}

/// Render backend markdown into Telegram-safe HTML.
///
/// Bare `[n]` placeholders are turned into links to `citation_links[n - 1]`
/// when that entry exists and are left as literal text otherwise. Links whose
/// visible text is a number are citations: they are renumbered `[1]`, `[2]`,
/// ... by first appearance of their target URL, so repeated sources share one
/// number.
pub fn render_with_citations(markdown: &str, citation_links: &[String]) -> String {
    if markdown.trim().is_empty() {
        warn!("Received empty markdown, nothing to render");
        return String::new();
    }

    let unescaped = unescape_markdown(markdown);

    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let events = rewrite_events(Parser::new_ext(&unescaped, options), citation_links);
    let mut out = String::with_capacity(unescaped.len() * 2);
    html::push_html(&mut out, events.into_iter());

    clean_markup(&out)
}

/// Like [`render_with_citations`], but a panic inside the parser becomes a
/// [`PipelineError::RenderFailure`] instead of unwinding into the caller.
pub fn try_render(markdown: &str, citation_links: &[String]) -> Result<String, PipelineError> {
    std::panic::catch_unwind(|| render_with_citations(markdown, citation_links)).map_err(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "renderer panicked".to_string());
        PipelineError::RenderFailure(detail)
    })
}

/// Render, or degrade to the escaped raw text if rendering fails.
pub fn render_or_raw(markdown: &str, citation_links: &[String]) -> String {
    match try_render(markdown, citation_links) {
        Ok(markup) => markup,
        Err(e) => {
            warn!(error = %e, "Rendering failed, sending raw text");
            escape_html(markdown.trim())
        }
    }
}

/// The backend sometimes wraps citation numbers in code fences (```` ```2``` ````).
pub fn collapse_fenced_citations(text: &str) -> Cow<'_, str> {
    FENCED_CITATION.replace_all(text, "[$1]")
}

/// Flatten block-level HTML into text and strip tags Telegram does not accept.
///
/// Running this on its own output changes nothing.
pub fn clean_markup(html: &str) -> String {
    let text = LINE_BREAK.replace_all(html, "\n");
    let text = HEADING_OPEN.replace_all(&text, "<b>");
    let text = HEADING_CLOSE.replace_all(&text, "</b>\n");
    let text = LIST.replace_all(&text, "\n");
    let text = ITEM_OPEN.replace_all(&text, "• ");
    let text = ITEM_CLOSE.replace_all(&text, "\n");
    // Tables become one line per row with cells joined by " | ".
    let text = TABLE_SECTION.replace_all(&text, "");
    let text = CELL_GAP.replace_all(&text, " | ");
    let text = ROW_CLOSE.replace_all(&text, "\n");
    let text = DECLARATION.replace_all(&text, "");

    let mut open_spoilers = 0usize;
    let text = TAG.replace_all(&text, |caps: &Captures| {
        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        let keep = match name.as_str() {
            "span" if !closing => {
                let spoiler = caps[3].contains("tg-spoiler");
                if spoiler {
                    open_spoilers += 1;
                }
                spoiler
            }
            "span" => {
                if open_spoilers > 0 {
                    open_spoilers -= 1;
                    true
                } else {
                    false
                }
            }
            other => ALLOWED_TAGS.contains(&other),
        };
        if keep { caps[0].to_string() } else { String::new() }
    });

    EXTRA_NEWLINES.replace_all(&text, "\n\n").trim().to_string()
}

/// Escape text for inclusion in Telegram HTML (content or attribute).
pub fn escape_html(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            _ => result.push(c),
        }
    }
    result
}

/// The backend backslash-escapes markdown punctuation even where it means
/// nothing, which would otherwise show up as literal backslashes.
fn unescape_markdown(markdown: &str) -> Cow<'_, str> {
    ESCAPED_PUNCT.replace_all(markdown, "$1")
}

/// First-seen numbering of citation targets, fresh for every render.
#[derive(Default)]
struct Citations {
    ordinals: HashMap<String, usize>,
}

impl Citations {
    fn ordinal(&mut self, url: &str) -> usize {
        let next = self.ordinals.len() + 1;
        *self.ordinals.entry(url.to_string()).or_insert(next)
    }
}

struct PendingLink<'a> {
    url: CowStr<'a>,
    start: Tag<'a>,
    inner: Vec<Event<'a>>,
}

/// Apply the bot's rendering rules to the parser's event stream: soft breaks
/// become hard breaks, numeric links become renumbered citations and bare
/// `[n]` placeholders in prose are linked to `citation_links[n - 1]`.
///
/// Text inside links, images and code blocks is never touched, and inline
/// code arrives as `Event::Code`, so `v[1]` in a snippet stays as written.
fn rewrite_events<'a>(parser: impl Iterator<Item = Event<'a>>, citation_links: &[String]) -> Vec<Event<'a>> {
    let mut citations = Citations::default();
    let mut out = Vec::new();
    let mut pending: Option<PendingLink<'a>> = None;
    // The parser splits `[`, digits and `]` into separate text events.
    let mut prose = String::new();
    let mut verbatim = 0usize;

    for event in parser {
        let event = match event {
            Event::SoftBreak => Event::HardBreak,
            other => other,
        };

        if let Event::Text(text) = &event {
            if pending.is_none() && verbatim == 0 {
                prose.push_str(text);
                continue;
            }
        }
        if !prose.is_empty() {
            let text = std::mem::take(&mut prose);
            out.extend(resolve_placeholders(&text, citation_links, &mut citations));
        }

        match event {
            Event::Start(Tag::Link { link_type, dest_url, title, id }) => {
                pending = Some(PendingLink {
                    url: dest_url.clone(),
                    start: Tag::Link { link_type, dest_url, title, id },
                    inner: Vec::new(),
                });
            }
            Event::End(TagEnd::Link) => match pending.take() {
                Some(link) => out.extend(finish_link(link, &mut citations)),
                None => out.push(Event::End(TagEnd::Link)),
            },
            other => {
                match &other {
                    Event::Start(Tag::CodeBlock(_) | Tag::Image { .. }) => verbatim += 1,
                    Event::End(TagEnd::CodeBlock | TagEnd::Image) => verbatim = verbatim.saturating_sub(1),
                    _ => {}
                }
                match pending.as_mut() {
                    Some(link) => link.inner.push(other),
                    None => out.push(other),
                }
            }
        }
    }

    if !prose.is_empty() {
        out.extend(resolve_placeholders(&prose, citation_links, &mut citations));
    }

    // Unterminated link: emit what we buffered as-is.
    if let Some(link) = pending {
        out.push(Event::Start(link.start));
        out.extend(link.inner);
        out.push(Event::End(TagEnd::Link));
    }

    out
}

/// Split prose around in-range `[n]` placeholders, linking each one.
fn resolve_placeholders<'a>(text: &str, citation_links: &[String], citations: &mut Citations) -> Vec<Event<'a>> {
    let mut events = Vec::new();
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        // Leftovers of link syntax the parser did not accept.
        if matches!(text[whole.end()..].chars().next(), Some('(' | '[')) {
            continue;
        }
        let Some(url) = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| citation_links.get(idx))
            .filter(|url| !url.trim().is_empty())
        else {
            continue;
        };
        if whole.start() > last {
            events.push(Event::Text(CowStr::from(text[last..whole.start()].to_string())));
        }
        events.push(citation_anchor(url, citations));
        last = whole.end();
    }

    if last < text.len() {
        events.push(Event::Text(CowStr::from(text[last..].to_string())));
    }
    events
}

fn citation_anchor<'a>(url: &str, citations: &mut Citations) -> Event<'a> {
    let n = citations.ordinal(url);
    Event::InlineHtml(CowStr::from(format!("<a href=\"{}\">[{}]</a>", escape_html(url), n)))
}

fn finish_link<'a>(link: PendingLink<'a>, citations: &mut Citations) -> Vec<Event<'a>> {
    let visible: String = link
        .inner
        .iter()
        .filter_map(|e| match e {
            Event::Text(t) | Event::Code(t) => Some(t.as_ref()),
            _ => None,
        })
        .collect();

    if is_citation_label(&visible) {
        return vec![citation_anchor(&link.url, citations)];
    }

    let mut events = Vec::with_capacity(link.inner.len() + 2);
    events.push(Event::Start(link.start));
    events.extend(link.inner);
    events.push(Event::End(TagEnd::Link));
    events
}

fn is_citation_label(text: &str) -> bool {
    let mut digits = text.chars().filter(|c| !c.is_whitespace() && *c != '`').peekable();
    digits.peek().is_some() && digits.all(|c| c.is_ascii_digit())
}

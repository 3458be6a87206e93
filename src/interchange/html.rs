//! Card content normalization.
//!
//! Card faces are small HTML fragments. [`normalize_content`] turns whatever
//! a source produced into the subset we store:
//! - script/style/embedding blocks, event handlers and script URLs removed
//! - media, line breaks, lists, tables and basic emphasis kept
//! - font/span unwrapped, div/p turned into line breaks, other tags unwrapped
//! - entities decoded (except `&lt;`, `&gt;` and an `&amp;` that would start
//!   a new entity, which stay encoded)
//! - whitespace collapsed, at most two consecutive line breaks
//!
//! The output is a fixed point: normalizing it again returns it unchanged.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Upper bound on wrapper-unwrapping passes for nested markup
const MAX_UNWRAP_PASSES: usize = 8;

/// Upper bound on whole-pipeline passes while looking for a fixed point
const MAX_NORMALIZE_PASSES: usize = 4;

const ALLOWED_TAGS: &str =
    "img|audio|video|source|hr|br|ul|ol|li|table|thead|tbody|tfoot|tr|td|th|strong|b|em|i|u|s|sub|sup|code";

const DANGEROUS_BLOCKS: [&str; 6] = ["script", "style", "iframe", "object", "embed", "noscript"];

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->|(?i)<!doctype[^>]*>").unwrap());

static DANGEROUS_BLOCK_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DANGEROUS_BLOCKS
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{0}\b[^>]*>.*?</{0}\s*>", tag)).unwrap())
        .collect()
});

static DANGEROUS_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:script|style|iframe|object|embed|noscript|link|meta|base|form)\b[^>]*>")
        .unwrap()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[a-zA-Z][^<>]*>").unwrap());

static EVENT_HANDLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)[\s/]+on[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#).unwrap()
});

static PRESENTATION_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)[\s/]+(?:style|class)\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#).unwrap()
});

static SCRIPT_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:java|vb)script\s*:").unwrap());

static ALLOWED_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)</?(?:{})\b[^<>]*>", ALLOWED_TAGS)).unwrap()
});

static FONT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<font\b[^>]*>(.*?)</font\s*>").unwrap());
static SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<span\b[^>]*>(.*?)</span\s*>").unwrap());
static DIV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<div\b[^>]*>(.*?)</div\s*>").unwrap());
static P_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>").unwrap());

static STRAY_WRAPPER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(?:font|span)\b[^<>]*>").unwrap());
static STRAY_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(?:div|p)\b[^<>]*>").unwrap());
static OTHER_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?[a-z][a-z0-9-]*\b[^<>]*>").unwrap());

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}([0-9]+)\u{E001}").unwrap());

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);").unwrap());
static ENTITY_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);").unwrap());

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s*<br\s*/?>\s*").unwrap());
static BR_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:<br>){3,}").unwrap());

/// Allow-listed tags parked outside the text while it is rewritten.
/// Every tag is cleaned on the way in, so nothing unsafe is ever restored.
#[derive(Default)]
struct Protected {
    tags: Vec<String>,
}

impl Protected {
    fn protect(&mut self, text: &str) -> String {
        ALLOWED_TAG_RE
            .replace_all(text, |caps: &Captures| {
                // A tag spanning other placeholders loses them
                let tag = PLACEHOLDER_RE.replace_all(&caps[0], "");
                self.tags.push(strip_script_urls(clean_tag(&tag)));
                format!("{}{}{}", PLACEHOLDER_OPEN, self.tags.len() - 1, PLACEHOLDER_CLOSE)
            })
            .into_owned()
    }

    fn restore(&self, text: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.tags.get(i))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

/// Normalize raw card markup. See the module docs for the rules.
pub fn normalize_content(raw: &str) -> String {
    let mut text = normalize_pass(raw);
    for _ in 0..MAX_NORMALIZE_PASSES {
        let next = normalize_pass(&text);
        if next == text {
            break;
        }
        text = next;
    }
    text
}

fn normalize_pass(raw: &str) -> String {
    let mut text: String = raw
        .chars()
        .filter(|c| *c != PLACEHOLDER_OPEN && *c != PLACEHOLDER_CLOSE)
        .collect();

    // Unsafe content goes first, before anything can be unwrapped into view
    text = COMMENT_RE.replace_all(&text, "").into_owned();
    for block_re in DANGEROUS_BLOCK_RES.iter() {
        text = block_re.replace_all(&text, "").into_owned();
    }
    text = DANGEROUS_TAG_RE.replace_all(&text, "").into_owned();
    text = TAG_RE
        .replace_all(&text, |caps: &Captures| clean_tag(&caps[0]))
        .into_owned();
    text = strip_script_urls(text);

    let mut protected = Protected::default();
    text = protected.protect(&text);
    text = unwrap_wrappers(text);
    text = STRAY_WRAPPER_RE.replace_all(&text, "").into_owned();
    text = STRAY_BLOCK_RE.replace_all(&text, "<br>").into_owned();
    text = strip_other_tags(text, &mut protected);

    text = decode_entities(&text);
    text = WHITESPACE_RE.replace_all(&text, " ").into_owned();
    text = protected.restore(&text);

    text = BR_RE.replace_all(&text, "<br>").into_owned();
    text = BR_RUN_RE.replace_all(&text, "<br><br>").into_owned();
    trim_breaks(&text).to_string()
}

/// Park allowed tags and drop the rest. Removing a tag can join its
/// neighbours into a new one, so repeat until no raw tag is left. Each round
/// that changes anything shortens the raw text.
fn strip_other_tags(mut text: String, protected: &mut Protected) -> String {
    loop {
        text = protected.protect(&text);
        if !OTHER_TAG_RE.is_match(&text) {
            return text;
        }
        text = OTHER_TAG_RE.replace_all(&text, "").into_owned();
    }
}

/// Drop event handlers and presentational attributes from one tag.
fn clean_tag(tag: &str) -> String {
    let tag = EVENT_HANDLER_RE.replace_all(tag, "");
    PRESENTATION_ATTR_RE.replace_all(&tag, "").into_owned()
}

/// Removing one scheme can expose another ("javajavascript:script:").
fn strip_script_urls(mut text: String) -> String {
    while SCRIPT_URL_RE.is_match(&text) {
        text = SCRIPT_URL_RE.replace_all(&text, "").into_owned();
    }
    text
}

fn unwrap_wrappers(mut text: String) -> String {
    for _ in 0..MAX_UNWRAP_PASSES {
        let previous = text.clone();
        text = FONT_RE.replace_all(&text, "$1").into_owned();
        text = SPAN_RE.replace_all(&text, "$1").into_owned();
        text = DIV_RE.replace_all(&text, "$1<br>").into_owned();
        text = P_RE.replace_all(&text, "$1<br><br>").into_owned();
        if text == previous {
            break;
        }
    }
    text
}

/// Decode entities in text (tags are parked as placeholders at this point).
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in ENTITY_RE.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        out.push_str(&decode_entity(m.as_str(), &text[m.end()..]));
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

fn decode_entity(entity: &str, rest: &str) -> String {
    let decoded = html_escape::decode_html_entities(entity);
    if decoded == entity {
        // Unknown entity, leave it for the renderer
        return entity.to_string();
    }
    match decoded.as_ref() {
        "<" => "&lt;".to_string(),
        ">" => "&gt;".to_string(),
        "&" if ENTITY_PREFIX_RE.is_match(rest) => "&amp;".to_string(),
        "\u{a0}" => " ".to_string(),
        "\u{200b}" => String::new(),
        other => other
            .chars()
            .filter(|c| *c != PLACEHOLDER_OPEN && *c != PLACEHOLDER_CLOSE)
            .collect(),
    }
}

fn trim_breaks(mut text: &str) -> &str {
    loop {
        let trimmed = text.trim();
        let trimmed = trimmed.strip_prefix("<br>").unwrap_or(trimmed);
        let trimmed = trimmed.strip_suffix("<br>").unwrap_or(trimmed);
        if trimmed.len() == text.len() {
            return trimmed;
        }
        text = trimmed;
    }
}

/// Extract plain text from card markup, for sort fields and terminal output.
///
/// Line breaks and block elements become newlines, media tags and all other
/// markup are dropped, entities decoded.
pub fn to_plain_text(html: &str) -> String {
    let mut text = normalize_content(html);

    static BREAK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)<br>|</?(?:li|tr|ul|ol|table)\b[^>]*>").unwrap());
    text = BREAK_RE.replace_all(&text, "\n").into_owned();

    static ANY_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
    text = ANY_TAG_RE.replace_all(&text, "").into_owned();

    text = html_escape::decode_html_entities(&text).to_string();

    static NEWLINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());
    text = NEWLINE_RE.replace_all(&text, "\n\n").into_owned();

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_scripts_and_styles() {
        let html = "<p>Before</p><script>alert('hi');</script><style>p { color: red; }</style>After";
        let text = normalize_content(html);
        assert_eq!(text, "Before<br><br>After");
    }

    #[test]
    fn test_strips_event_handlers_and_script_urls() {
        let html = r#"<img src="dog.jpg" onerror="alert(1)" style="width:10px"><a href="javascript:alert(1)">x</a>"#;
        let text = normalize_content(html);
        assert_eq!(text, r#"<img src="dog.jpg">x"#);

        let sneaky = normalize_content("<b onclick='x()'>javajavascript:script:go</b>");
        assert_eq!(sneaky, "<b>go</b>");

        // Tags rebuilt by removing an inner tag are cleaned as well
        assert_eq!(normalize_content("<im<x>g src=x onerror=alert(1)>"), "<img src=x>");
        assert_eq!(normalize_content("<img src=x o<span>nerror=alert(1)>"), "<img src=x>");
        assert_eq!(normalize_content(r#"<a hr<q>ef="java<q>script:alert(1)">x</a>"#), "x");
        assert_eq!(normalize_content("<img/onerror=alert(1) src=y>"), "<img src=y>");
        assert_eq!(normalize_content("<sc<i>ript>alert(1)</sc<i>ript>"), "alert(1)");
    }

    #[test]
    fn test_keeps_allowed_tags() {
        let html = "<ul><li><b>bold</b></li><li><i>it</i></li></ul><table><tr><td>1</td></tr></table>";
        assert_eq!(normalize_content(html), html);

        let audio = r#"<audio controls><source src="data:audio/mpeg;base64,AAAA" type="audio/mpeg"></audio>"#;
        assert_eq!(normalize_content(audio), audio);
    }

    #[test]
    fn test_unwraps_presentational_wrappers() {
        let html = r#"<span style="color:red"><font face="x"><span>Hi</span></font></span> there"#;
        assert_eq!(normalize_content(html), "Hi there");
        assert_eq!(normalize_content("<span><b>x</b></span>"), "<b>x</b>");
    }

    #[test]
    fn test_blocks_become_breaks() {
        assert_eq!(normalize_content("<div>Hello</div><div>World</div>"), "Hello<br>World");
        assert_eq!(normalize_content("<p>One</p><p>Two</p>"), "One<br><br>Two");
        assert_eq!(normalize_content("a<br><br/> <br ><BR>b"), "a<br><br>b");
    }

    #[test]
    fn test_unknown_tags_are_unwrapped() {
        assert_eq!(normalize_content("<h1>Title</h1> <a href='x'>link</a>"), "Title link");
        assert_eq!(normalize_content("1 < 2 and 3 > 2"), "1 < 2 and 3 > 2");
    }

    #[test]
    fn test_decodes_entities_safely() {
        let html = "Tom &amp; Jerry &lt;3 caf&eacute;&nbsp;au&#160;lait &#8220;q&#x201D;";
        assert_eq!(
            normalize_content(html),
            "Tom & Jerry &lt;3 café au lait \u{201c}q\u{201d}"
        );
        // Decoding must not manufacture markup
        assert_eq!(normalize_content("&lt;script&gt;x&lt;/script&gt;"), "&lt;script&gt;x&lt;/script&gt;");
        assert_eq!(normalize_content("&amp;lt;"), "&amp;lt;");
        assert_eq!(normalize_content("&bogus; stays"), "&bogus; stays");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize_content("  a \n\t b  "), "a b");
        assert_eq!(normalize_content("<br><br>x<br><br><br>"), "x");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "<div><span style='x'>Hello&nbsp;<b>world</b></span></div><p>para</p>",
            "Tom &amp; Jerry &amp;amp; &lt;b&gt; &#60;i&#62;",
            "<img src=\"a.png\" class=\"c\"><br/><br/><br/><br/>text",
            "<span><span><span>deep</span></span></span>",
            "[sound:hola.mp3] <font color=red>rojo</font>",
            "<ol><li>one</li>\n<li>two</li></ol>\n\n\n",
            "a&#8203;b &#57344;0&#57345;",
            "<im<x>g src=x onerror=alert(1)>",
            "<img src=x o<span>nerror=alert(1)>",
            r#"<a hr<q>ef="java<q>script:alert(1)">x</a>"#,
            "<img src=x onerror=y <b>>",
            "<<b>img src=x onerror=alert(1)>",
        ];
        for sample in samples {
            let once = normalize_content(sample);
            assert_eq!(normalize_content(&once), once, "input: {}", sample);
        }
    }

    #[test]
    fn test_to_plain_text() {
        let html = "<div>What is <b>2+2</b>?</div><div>Tom &amp; Jerry</div><img src=\"x.png\">";
        assert_eq!(to_plain_text(html), "What is 2+2?\nTom & Jerry");
        assert_eq!(to_plain_text("&lt;tag&gt;"), "<tag>");
    }
}

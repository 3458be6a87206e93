//! Card template rendering.
//!
//! Templates reference note fields as `{{Field}}`, optionally through filters
//! (`{{text:Field}}`, `{{cloze:Text}}`), and can guard markup with sections
//! (`{{#Field}}…{{/Field}}` shows when the field is non-empty, `{{^Field}}…`
//! when it is empty). Answer templates usually repeat the question through
//! `{{FrontSide}}` followed by `<hr id=answer>`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::interchange::html::to_plain_text;

const MAX_SECTION_PASSES: usize = 64;

static SECTION_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([#^])\s*([^{}]+?)\s*\}\}").unwrap());

static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^#^/{}\s][^{}]*?)\s*\}\}").unwrap());

static RESIDUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{[^{}]*\}\}").unwrap());

static CLOZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{c(\d+)::(.*?)(?:::(.*?))?\}\}").unwrap());

static ANSWER_HR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<hr\b[^>]*\bid\s*=\s*["']?answer\b["']?[^>]*>"#).unwrap()
});

static READING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" ?([^ >]+?)\[(.+?)\]").unwrap());

/// What a template can reference while rendering one card.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Field name and value pairs of the note
    pub fields: &'a [(&'a str, &'a str)],
    pub tags: &'a str,
    pub deck: &'a str,
    /// Cloze number the card shows (1-based), for cloze models
    pub cloze: Option<i64>,
}

impl<'a> RenderContext<'a> {
    fn lookup(&self, name: &str) -> Option<&'a str> {
        let exact = self.fields.iter().find(|(n, _)| *n == name);
        let loose = || self.fields.iter().find(|(n, _)| n.eq_ignore_ascii_case(name));
        if let Some(&(_, value)) = exact.or_else(loose) {
            return Some(value);
        }
        match name {
            "Tags" => Some(self.tags),
            "Deck" => Some(self.deck),
            _ => None,
        }
    }

    fn is_non_empty(&self, name: &str) -> bool {
        let field = name.rsplit(':').next().unwrap_or(name).trim();
        self.lookup(field)
            .is_some_and(|value| !to_plain_text(value).trim().is_empty() || value.contains("<img"))
    }
}

/// Render the question side of a card.
pub fn render_question(template: &str, ctx: &RenderContext<'_>) -> String {
    render(template, ctx, None)
}

/// Render the answer side, without the repeated question.
pub fn render_answer(template: &str, ctx: &RenderContext<'_>, question: &str) -> String {
    let rendered = render(template, ctx, Some(question));

    if let Some(m) = ANSWER_HR_RE.find(&rendered) {
        return rendered[m.end()..].trim().to_string();
    }
    match rendered.trim_start().strip_prefix(question.trim()) {
        Some(rest) if !question.trim().is_empty() => rest.trim().to_string(),
        _ => rendered.trim().to_string(),
    }
}

fn render(template: &str, ctx: &RenderContext<'_>, front_side: Option<&str>) -> String {
    let answer = front_side.is_some();
    let text = resolve_sections(template, ctx);

    let text = FIELD_RE.replace_all(&text, |caps: &Captures| {
        let reference = caps[1].trim();
        if reference == "FrontSide" {
            return front_side.unwrap_or_default().to_string();
        }

        let mut parts: Vec<&str> = reference.split(':').map(str::trim).collect();
        let name = parts.pop().unwrap_or_default();
        let Some(value) = ctx.lookup(name) else {
            log::debug!("Template references unknown field {}", name);
            return String::new();
        };

        // Filters apply from the one nearest the field outwards
        parts
            .iter()
            .rev()
            .fold(value.to_string(), |value, filter| apply_filter(filter, &value, ctx, answer))
    });

    RESIDUE_RE.replace_all(&text, "").trim().to_string()
}

fn apply_filter(filter: &str, value: &str, ctx: &RenderContext<'_>, answer: bool) -> String {
    match filter {
        "text" => to_plain_text(value),
        "cloze" => render_cloze(value, ctx.cloze, answer),
        // Typing prompts need an interactive reviewer
        "type" => String::new(),
        "kanji" => READING_RE.replace_all(value, "$1").into_owned(),
        "kana" => READING_RE.replace_all(value, "$2").into_owned(),
        "furigana" => READING_RE
            .replace_all(value, "<ruby><rb>$1</rb><rt>$2</rt></ruby>")
            .into_owned(),
        _ => value.to_string(),
    }
}

fn render_cloze(text: &str, active: Option<i64>, answer: bool) -> String {
    CLOZE_RE
        .replace_all(text, |caps: &Captures| {
            let number = caps[1].parse::<i64>().ok();
            let body = &caps[2];
            if active.is_none() || number != active {
                return body.to_string();
            }
            if answer {
                return format!("<b>{}</b>", body);
            }
            match caps.get(3) {
                Some(hint) => format!("<b>[{}]</b>", hint.as_str()),
                None => "<b>[...]</b>".to_string(),
            }
        })
        .into_owned()
}

fn resolve_sections(template: &str, ctx: &RenderContext<'_>) -> String {
    let mut text = template.to_string();

    for _ in 0..MAX_SECTION_PASSES {
        let Some(caps) = SECTION_OPEN_RE.captures(&text) else {
            break;
        };
        let Some(open) = caps.get(0).map(|m| m.range()) else {
            break;
        };
        let inverted = &caps[1] == "^";
        let name = caps[2].to_string();

        let close = format!("{{{{/{}}}}}", name);
        let (inner, rest) = match text[open.end..].find(&close) {
            Some(i) => (
                text[open.end..open.end + i].to_string(),
                open.end + i + close.len(),
            ),
            None => (String::new(), open.end),
        };

        let shown = if ctx.is_non_empty(&name) != inverted {
            inner
        } else {
            String::new()
        };
        text = format!("{}{}{}", &text[..open.start], shown, &text[rest..]);
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(fields: &'a [(&'a str, &'a str)]) -> RenderContext<'a> {
        RenderContext {
            fields,
            tags: "geo",
            deck: "World",
            cloze: None,
        }
    }

    #[test]
    fn test_basic_substitution() {
        let fields = [("Front", "Capital of France?"), ("Back", "Paris")];
        let ctx = ctx(&fields);
        let question = render_question("{{Front}}", &ctx);
        assert_eq!(question, "Capital of France?");
        let answer = render_answer("{{FrontSide}}\n\n<hr id=answer>\n\n{{Back}}", &ctx, &question);
        assert_eq!(answer, "Paris");
    }

    #[test]
    fn test_unknown_fields_and_residue() {
        let fields = [("Front", "Q")];
        let ctx = ctx(&fields);
        assert_eq!(render_question("{{Front}} {{Missing}}{{/}}", &ctx), "Q");
        assert_eq!(render_question("{{front}} ({{Deck}})", &ctx), "Q (World)");
    }

    #[test]
    fn test_sections() {
        let fields = [("Front", "Q"), ("Extra", ""), ("Note", "n")];
        let ctx = ctx(&fields);
        let template = "{{Front}}{{#Extra}} E:{{Extra}}{{/Extra}}{{^Extra}} none{{/Extra}}{{#Note}} N:{{Note}}{{/Note}}";
        assert_eq!(render_question(template, &ctx), "Q none N:n");
        // An unclosed section drops only its opener
        assert_eq!(render_question("{{#Note}}{{Front}}", &ctx), "Q");
    }

    #[test]
    fn test_filters() {
        let fields = [("Front", "<b>bold</b> text"), ("Word", "日本[にほん]")];
        let ctx = ctx(&fields);
        assert_eq!(render_question("{{text:Front}}", &ctx), "bold text");
        assert_eq!(render_question("{{type:Front}}", &ctx), "");
        assert_eq!(render_question("{{kanji:Word}}", &ctx), "日本");
        assert_eq!(render_question("{{kana:Word}}", &ctx), "にほん");
    }

    #[test]
    fn test_cloze() {
        let fields = [("Text", "{{c1::Paris::city}} is in {{c2::France}}")];
        let mut ctx = ctx(&fields);
        ctx.cloze = Some(1);
        let question = render_question("{{cloze:Text}}", &ctx);
        assert_eq!(question, "<b>[city]</b> is in France");
        let answer = render_answer("{{cloze:Text}}", &ctx, &question);
        assert_eq!(answer, "<b>Paris</b> is in France");
    }

    #[test]
    fn test_answer_without_separator() {
        let fields = [("Front", "Q"), ("Back", "A")];
        let ctx = ctx(&fields);
        assert_eq!(render_answer("{{FrontSide}} {{Back}}", &ctx, "Q"), "A");
        assert_eq!(render_answer("{{Back}}", &ctx, "Q"), "A");
    }
}

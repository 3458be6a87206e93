use std::sync::LazyLock;

use chrono::{DateTime, Local, Utc};
use regex::Regex;

use flashdeck_lib::flashcards::CardStatus;
use flashdeck_lib::interchange::to_plain_text;

/// ANSI color codes
pub struct Color;

#[allow(dead_code)]
impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";
}

static MEDIA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<(audio|video)\b[^>]*\bdata-filename="([^"]*)"[^>]*>.*?</(?:audio|video)\s*>|<img\b[^>]*\bdata-filename="([^"]*)"[^>]*>"#,
    )
    .unwrap()
});

pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Card face as terminal text: media become `[audio name]` markers
pub fn render_face(html: &str, use_color: bool, indent: &str) -> String {
    let marked = MEDIA_RE.replace_all(html, |caps: &regex::Captures| {
        let (kind, name) = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(kind), Some(name), _) => (kind.as_str().to_lowercase(), name.as_str()),
            (_, _, Some(name)) => ("image".to_string(), name.as_str()),
            _ => return String::new(),
        };
        format!("[{} {}]", kind, name)
    });
    let text = to_plain_text(&marked);
    wrap_lines(&text, indent, 80)
        .into_iter()
        .map(|line| if use_color { paint(&line, Color::BOLD, true) } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

/// First line of a face, shortened for listings
pub fn summary(html: &str, max_chars: usize) -> String {
    let text = to_plain_text(html);
    let first = text.lines().next().unwrap_or("").trim();
    if first.chars().count() > max_chars {
        let cut: String = first.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", cut)
    } else {
        first.to_string()
    }
}

pub fn state_label(state: CardStatus, width: usize, use_color: bool) -> String {
    let color = match state {
        CardStatus::New => Color::BLUE,
        CardStatus::Learning | CardStatus::Relearning => Color::YELLOW,
        CardStatus::Review => Color::GREEN,
    };
    paint(&format!("{:<width$}", state.to_string(), width = width), color, use_color)
}

pub fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Simple word-wrapping for terminal output
fn wrap_lines(text: &str, prefix: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let effective_width = max_width.saturating_sub(prefix.len());

    for line in text.lines() {
        if line.chars().count() <= effective_width {
            lines.push(format!("{}{}", prefix, line));
            continue;
        }
        let mut current_line = String::new();
        for word in line.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.chars().count() + 1 + word.chars().count() <= effective_width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(format!("{}{}", prefix, current_line));
                current_line = word.to_string();
            }
        }
        if !current_line.is_empty() {
            lines.push(format!("{}{}", prefix, current_line));
        }
    }

    lines
}

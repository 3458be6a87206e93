//! Comma and tab separated text.
//!
//! Columns are `Front, Back, Tags?`. The separator is a tab when the first
//! data line holds one, a comma otherwise. A first row whose first column
//! mentions "front" or "question" is a header. Blanks between a separator
//! and an opening quote are dropped so `a, "b, c"` keeps `b, c` whole. Desktop text exports may start
//! with `#key:value` directives (`#separator:tab`, `#tags column:3`,
//! `#deck:Name`), which override detection.

use csv::{ReaderBuilder, StringRecord, Trim};

use super::records::{ParsedDeck, ParsedRecord, Progress};

const HEADER_KEYWORDS: [&str; 2] = ["front", "question"];

/// Zero-based column holding tags when nothing says otherwise
const DEFAULT_TAGS_COLUMN: usize = 2;

/// Settings taken from the directive block at the top of a file.
#[derive(Debug, Default, PartialEq)]
struct Directives {
    separator: Option<u8>,
    /// Zero-based
    tags_column: Option<usize>,
    deck: Option<String>,
}

/// Parse delimited text. Lines that do not yield both a front and a back are
/// skipped with a warning.
pub fn parse_delimited(text: &str, progress: &mut Progress<'_>) -> ParsedDeck {
    progress.report(0);
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let (directives, body, body_line) = split_directives(text);

    let separator = directives.separator.unwrap_or_else(|| detect_separator(body));
    let tab_separated = separator == b'\t';
    let body = tighten_quoted_fields(body, separator);
    log::debug!(
        "Parsing delimited text, separator {:?}",
        char::from(separator)
    );

    let mut parsed = ParsedDeck {
        deck_name: directives.deck.clone(),
        ..Default::default()
    };
    let mut tags_column = directives.tags_column.unwrap_or(DEFAULT_TAGS_COLUMN);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(separator)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    for (index, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line() as usize);
                parsed.skip(format!("Line {}: {}", body_line + line, e));
                continue;
            }
        };
        let line = body_line + record.position().map_or(index + 1, |p| p.line() as usize);

        if index == 0 && is_header(&record) {
            if directives.tags_column.is_none() {
                if let Some(col) = record.iter().position(|f| f.eq_ignore_ascii_case("tags")) {
                    tags_column = col;
                }
            }
            continue;
        }

        match to_record(&record, tags_column, tab_separated) {
            Some(parsed_record) => parsed.records.push(parsed_record),
            None => parsed.skip(format!("Line {}: missing front or back", line)),
        }

        if let Some(position) = record.position() {
            progress.report_span(5, 90, position.byte() as usize, body.len());
        }
    }

    log::info!(
        "Parsed {} records from delimited text ({} skipped)",
        parsed.records.len(),
        parsed.skipped
    );
    progress.report(90);
    parsed
}

/// Split the leading `#key:value` block off. Returns the directives, the
/// remaining text and the number of lines consumed.
fn split_directives(text: &str) -> (Directives, &str, usize) {
    let mut directives = Directives::default();
    let mut offset = 0;
    let mut consumed = 0;

    for line in text.split_inclusive('\n') {
        let Some((key, value)) = line
            .trim()
            .strip_prefix('#')
            .and_then(|directive| directive.split_once(':'))
            .filter(|(key, _)| is_directive_key(key))
        else {
            break;
        };
        apply_directive(&mut directives, key.trim(), value.trim());
        offset += line.len();
        consumed += 1;
    }

    (directives, &text[offset..], consumed)
}

fn is_directive_key(key: &str) -> bool {
    !key.trim().is_empty() && key.chars().all(|c| c.is_ascii_alphabetic() || c == ' ')
}

fn apply_directive(directives: &mut Directives, key: &str, value: &str) {
    match key.to_ascii_lowercase().as_str() {
        "separator" => {
            directives.separator = match value.to_ascii_lowercase().as_str() {
                "tab" => Some(b'\t'),
                "comma" => Some(b','),
                "semicolon" => Some(b';'),
                "pipe" => Some(b'|'),
                "space" => Some(b' '),
                other if other.len() == 1 => other.bytes().next(),
                other => {
                    log::warn!("Ignoring unknown separator {:?}", other);
                    None
                }
            }
        }
        "tags column" => {
            directives.tags_column = value
                .parse::<usize>()
                .ok()
                .and_then(|col| col.checked_sub(1));
        }
        "deck" if !value.is_empty() => directives.deck = Some(value.to_string()),
        _ => log::debug!("Ignoring directive {}", key),
    }
}

fn detect_separator(body: &str) -> u8 {
    let first_line = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if first_line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

fn is_header(record: &StringRecord) -> bool {
    record
        .get(0)
        .map(|f| f.to_lowercase())
        .is_some_and(|first| HEADER_KEYWORDS.iter().any(|k| first.contains(k)))
}

/// Remove blanks that sit between the start of a field and its opening
/// quote. The reader only honours a quote as the field's first character.
fn tighten_quoted_fields(body: &str, separator: u8) -> String {
    let separator = char::from(separator);
    let is_blank = |c: char| (c == ' ' || c == '\t') && c != separator;

    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    let mut field_start = true;
    let mut in_quotes = false;

    loop {
        if field_start {
            let trimmed = rest.trim_start_matches(is_blank);
            if trimmed.starts_with('"') {
                rest = trimmed;
            }
        }
        let Some(c) = rest.chars().next() else {
            break;
        };
        rest = &rest[c.len_utf8()..];
        out.push(c);

        if in_quotes {
            if c == '"' {
                // "" is an escaped quote
                if let Some(after) = rest.strip_prefix('"') {
                    out.push('"');
                    rest = after;
                } else {
                    in_quotes = false;
                }
            }
        } else if c == '"' && field_start {
            in_quotes = true;
        } else if c == separator || c == '\n' {
            field_start = true;
            continue;
        }
        field_start = false;
    }
    out
}

fn to_record(record: &StringRecord, tags_column: usize, tab_separated: bool) -> Option<ParsedRecord> {
    let front = field(record, 0)?;
    let back = field(record, 1)?;

    let tags = record
        .get(tags_column)
        .filter(|_| tags_column > 1)
        .map(|raw| split_tags(raw, tab_separated))
        .unwrap_or_default();

    Some(ParsedRecord {
        front,
        back,
        tags,
        history: None,
    })
}

fn field(record: &StringRecord, index: usize) -> Option<String> {
    let value = record.get(index)?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.replace("\r\n", "<br>").replace('\n', "<br>"))
}

/// Tab exports separate tags with spaces, comma files with commas.
fn split_tags(raw: &str, tab_separated: bool) -> Vec<String> {
    let parts: Vec<&str> = if tab_separated {
        raw.split_whitespace().collect()
    } else {
        raw.split(',').collect()
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedDeck {
        parse_delimited(text, &mut Progress::silent())
    }

    #[test]
    fn test_csv_with_header() {
        let parsed = parse("Front,Back,Tags\n\"What is 2+2?\",\"4\",\"math, basic\"");
        assert_eq!(parsed.records.len(), 1);
        let record = &parsed.records[0];
        assert_eq!(record.front, "What is 2+2?");
        assert_eq!(record.back, "4");
        assert_eq!(record.tags, vec!["math", "basic"]);
        assert_eq!(parsed.skipped, 0);
    }

    #[test]
    fn test_quoted_separators_and_escaped_quotes() {
        let parsed = parse("\"a, b\",\"say \"\"hi\"\"\"\nplain,text,\n");
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].front, "a, b");
        assert_eq!(parsed.records[0].back, "say \"hi\"");
        assert!(parsed.records[1].tags.is_empty());
    }

    #[test]
    fn test_tab_separated_without_header() {
        let parsed = parse("hola\thello\tspanish greeting\nperro\tdog\n");
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].tags, vec!["spanish", "greeting"]);
        assert_eq!(parsed.records[1].back, "dog");
    }

    #[test]
    fn test_bad_lines_are_skipped() {
        let parsed = parse("Question,Answer\nonly front\n,no front\nok,fine\n");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].front, "ok");
        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.warnings.len(), 2);
        assert!(parsed.warnings[0].starts_with("Line 2"));
    }

    #[test]
    fn test_multiline_fields() {
        let parsed = parse("\"line one\nline two\",back\n");
        assert_eq!(parsed.records[0].front, "line one<br>line two");
    }

    #[test]
    fn test_directives() {
        let text = "#separator:tab\n#html:true\n#deck:Verbs\n#tags column:3\nser\tto be\tirregular core\n";
        let parsed = parse(text);
        assert_eq!(parsed.deck_name.as_deref(), Some("Verbs"));
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].tags, vec!["irregular", "core"]);

        let (directives, body, consumed) = split_directives("#separator:Semicolon\na;b\n");
        assert_eq!(directives.separator, Some(b';'));
        assert_eq!(body, "a;b\n");
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_header_tags_column() {
        let parsed = parse("front,back,notes,tags\nq,a,n,\"t1,t2\"\n# of moons?,1\n");
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].tags, vec!["t1", "t2"]);
        assert_eq!(parsed.records[1].front, "# of moons?");
    }

    #[test]
    fn test_space_before_quoted_field() {
        let parsed = parse("\"What is 2+2?\", \"4, four\", \"math, basic\"\n");
        assert_eq!(parsed.records.len(), 1);
        let record = &parsed.records[0];
        assert_eq!(record.front, "What is 2+2?");
        assert_eq!(record.back, "4, four");
        assert_eq!(record.tags, vec!["math", "basic"]);

        let parsed = parse("  \"a, b\" , \"c \"\"d\"\", e\"\nx, y\n");
        assert_eq!(parsed.records[0].front, "a, b");
        assert_eq!(parsed.records[0].back, "c \"d\", e");
        assert_eq!(parsed.records[1].back, "y");
    }

    #[test]
    fn test_tab_separator_is_not_trimmed_away() {
        assert_eq!(tighten_quoted_fields("a\t \"b\"\n", b'\t'), "a\t\"b\"\n");
        assert_eq!(tighten_quoted_fields("\"x, \"\"y\"\"\", z", b','), "\"x, \"\"y\"\"\", z");
        assert_eq!(tighten_quoted_fields("say \"hi\", \"there\"", b','), "say \"hi\",\"there\"");
    }

    #[test]
    fn test_header_with_longer_labels() {
        let parsed = parse("Front Side,Back Side\nq,a\n");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].front, "q");
        assert_eq!(parsed.skipped, 0);

        let parsed = parse("Question text\tAnswer\tTags\nq\ta\tt1 t2\n");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].tags, vec!["t1", "t2"]);
    }
}

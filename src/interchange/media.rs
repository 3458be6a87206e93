//! Media packaged with a deck.
//!
//! Container sources ship a `media` JSON map (`{"0": "dog.jpg"}`) plus one
//! numbered archive member per file. Card content points at those files in two
//! ways: `[sound:name.mp3]` markers and `<img src="name.jpg">` tags. Resolved
//! references are rewritten into self-contained tags carrying a data URI;
//! unresolved ones are left exactly as they were.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek};
use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::{Captures, Regex};
use zip::ZipArchive;

use crate::flashcards::{MediaFile, MediaType};

/// Name of the archive member holding the media map
pub const MEDIA_MAP_MEMBER: &str = "media";

static SOUND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[sound:([^\]]+)\]").unwrap());

static IMG_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>"#).unwrap()
});

/// Embedded media tag carrying its original filename.
static EMBEDDED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<(audio|video)\b[^>]*\bdata-filename="([^"]*)"[^>]*>.*?</(?:audio|video)\s*>|<img\b[^>]*\bdata-filename="([^"]*)"[^>]*>"#,
    )
    .unwrap()
});

/// Files indexed by their original filename.
#[derive(Debug, Clone, Default)]
pub struct MediaLibrary {
    files: HashMap<String, Vec<u8>>,
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the media map and its members from a container archive.
    ///
    /// A missing map means the deck has no media. A map that cannot be parsed
    /// is logged and treated the same way; media never fails an import.
    pub fn from_archive<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Self {
        let mut library = Self::new();

        let mapping = match read_media_map(archive) {
            Ok(Some(mapping)) => mapping,
            Ok(None) => return library,
            Err(e) => {
                log::warn!("Failed to read media map: {}", e);
                return library;
            }
        };

        for (member, filename) in mapping {
            let mut data = Vec::new();
            match archive.by_name(&member) {
                Ok(mut file) => {
                    if let Err(e) = file.read_to_end(&mut data) {
                        log::warn!("Failed to read media member {} ({}): {}", member, filename, e);
                        continue;
                    }
                }
                Err(_) => {
                    log::warn!("Media file {} listed as member {} is missing", filename, member);
                    continue;
                }
            }
            library.insert(filename, data);
        }

        log::debug!("Loaded {} media files", library.len());
        library
    }

    pub fn insert(&mut self, filename: String, data: Vec<u8>) {
        self.files.insert(filename, data);
    }

    pub fn get(&self, filename: &str) -> Option<&[u8]> {
        self.files.get(filename).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Rewrite resolvable media references in `content` into embedded tags.
    ///
    /// Returns the new content and the files it now carries, one entry per
    /// distinct filename.
    pub fn embed(&self, content: &str) -> (String, Vec<MediaFile>) {
        let mut attached: Vec<MediaFile> = Vec::new();

        let mut attach = |filename: &str, data: &[u8], media_type: MediaType| {
            if !attached.iter().any(|m| m.filename == filename) {
                attached.push(MediaFile {
                    filename: filename.to_string(),
                    data: data.to_vec(),
                    media_type,
                });
            }
        };

        let content = SOUND_RE.replace_all(content, |caps: &Captures| {
            let filename = caps[1].trim();
            let Some(data) = self.get(filename) else {
                log::warn!("Media file not found: {}", filename);
                return caps[0].to_string();
            };
            let media_type = match MediaType::from_filename(filename) {
                Some(MediaType::Video) => MediaType::Video,
                _ => MediaType::Audio,
            };
            attach(filename, data, media_type);
            playable_tag(filename, data, media_type)
        });

        let content = IMG_SRC_RE.replace_all(&content, |caps: &Captures| {
            let src = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            if src.starts_with("data:") {
                return caps[0].to_string();
            }
            let filename = html_escape::decode_html_entities(src);
            let Some(data) = self.get(&filename) else {
                log::warn!("Media file not found: {}", filename);
                return caps[0].to_string();
            };
            attach(&filename, data, MediaType::Image);
            image_tag(&filename, data)
        });

        (content.into_owned(), attached)
    }
}

fn read_media_map<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Option<BTreeMap<String, String>>, String> {
    let mut file = match archive.by_name(MEDIA_MAP_MEMBER) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let mut text = String::new();
    file.read_to_string(&mut text).map_err(|e| e.to_string())?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&text).map(Some).map_err(|e| e.to_string())
}

/// Guess a MIME type from a filename extension.
pub fn mime_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "avif" => "image/avif",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" | "spx" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "m4a" | "aac" => "audio/mp4",
        "flac" => "audio/flac",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "ogv" => "video/ogg",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

fn data_uri(filename: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type(filename), BASE64.encode(data))
}

fn playable_tag(filename: &str, data: &[u8], media_type: MediaType) -> String {
    let element = if media_type == MediaType::Video { "video" } else { "audio" };
    format!(
        r#"<{el} controls data-filename="{name}"><source src="{src}" type="{mime}"></{el}>"#,
        el = element,
        name = html_escape::encode_double_quoted_attribute(filename),
        src = data_uri(filename, data),
        mime = mime_type(filename),
    )
}

fn image_tag(filename: &str, data: &[u8]) -> String {
    let name = html_escape::encode_double_quoted_attribute(filename);
    format!(
        r#"<img src="{}" alt="{}" data-filename="{}">"#,
        data_uri(filename, data),
        name,
        name
    )
}

/// Turn embedded media tags back into plain filename references, the form
/// container decks expect. Inverse of [`MediaLibrary::embed`].
pub fn to_references(content: &str) -> String {
    EMBEDDED_RE
        .replace_all(content, |caps: &Captures| {
            if let Some(name) = caps.get(2) {
                format!("[sound:{}]", html_escape::decode_html_entities(name.as_str()))
            } else {
                let name = caps.get(3).map_or("", |m| m.as_str());
                format!(r#"<img src="{}">"#, name)
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    fn library() -> MediaLibrary {
        let mut library = MediaLibrary::new();
        library.insert("hola.mp3".into(), vec![1, 2, 3]);
        library.insert("dog.jpg".into(), vec![4, 5]);
        library.insert("clip.mp4".into(), vec![6]);
        library
    }

    #[test]
    fn test_embed_sound_marker() {
        let (content, media) = library().embed("Say it [sound:hola.mp3]");
        assert_eq!(
            content,
            r#"Say it <audio controls data-filename="hola.mp3"><source src="data:audio/mpeg;base64,AQID" type="audio/mpeg"></audio>"#
        );
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].media_type, MediaType::Audio);
        assert_eq!(media[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn test_embed_video_marker() {
        let (content, media) = library().embed("[sound:clip.mp4]");
        assert!(content.starts_with("<video controls"));
        assert_eq!(media[0].media_type, MediaType::Video);
    }

    #[test]
    fn test_embed_image() {
        let (content, media) = library().embed(r#"<img class="x" src='dog.jpg'> and <img src="dog.jpg">"#);
        let expected = r#"<img src="data:image/jpeg;base64,BAU=" alt="dog.jpg" data-filename="dog.jpg">"#;
        assert_eq!(content, format!("{} and {}", expected, expected));
        assert_eq!(media.len(), 1);
    }

    #[test]
    fn test_unresolved_references_are_untouched() {
        let raw = r#"[sound:missing.mp3] <img src="missing.png"> <img src="data:image/png;base64,AA">"#;
        let (content, media) = library().embed(raw);
        assert_eq!(content, raw);
        assert!(media.is_empty());
    }

    #[test]
    fn test_to_references_inverts_embed() {
        let raw = r#"Q [sound:hola.mp3] <img src="dog.jpg">"#;
        let (embedded, _) = library().embed(raw);
        assert_eq!(to_references(&embedded), raw);
    }

    #[test]
    fn test_from_archive() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            let options = SimpleFileOptions::default();
            zip.start_file("media", options).unwrap();
            zip.write_all(br#"{"0": "dog.jpg", "1": "gone.mp3"}"#).unwrap();
            zip.start_file("0", options).unwrap();
            zip.write_all(&[9, 9]).unwrap();
            zip.finish().unwrap();
        }
        let mut archive = ZipArchive::new(buf).unwrap();
        let library = MediaLibrary::from_archive(&mut archive);
        assert_eq!(library.len(), 1);
        assert_eq!(library.get("dog.jpg"), Some(&[9u8, 9][..]));
        assert!(library.get("gone.mp3").is_none());
    }

    #[test]
    fn test_from_archive_bad_map() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            zip.start_file("media", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"not json").unwrap();
            zip.finish().unwrap();
        }
        let mut archive = ZipArchive::new(buf).unwrap();
        assert!(MediaLibrary::from_archive(&mut archive).is_empty());
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type("a.PNG"), "image/png");
        assert_eq!(mime_type("noext"), "application/octet-stream");
    }
}

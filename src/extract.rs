//! Document-text extraction for uploaded resumes.
//!
//! The mime type is guessed from the file extension:
//!
//! | Type | Reader |
//! |------|--------|
//! | PDF | `lopdf`, one block of text per page |
//! | Word (`.docx`, `.doc`) | `zip` + `quick-xml` over `word/document.xml`, one line per paragraph |
//! | Text, markdown, JSON, CSV | read as UTF-8 |
//!
//! Anything else is rejected as unsupported. Legacy binary `.doc` files are
//! routed to the Word reader and fail there because they are not zip
//! archives.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{AppError, Result};

/// Mime type reported for files whose extension is unknown.
pub const OCTET_STREAM: &str = "application/octet-stream";

const PDF_MIME: &str = "application/pdf";
const MSWORD_MIME: &str = "application/msword";
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Archive member holding the body of a Word document.
const DOCX_BODY: &str = "word/document.xml";

/// Turns a file on disk into plain text.
pub trait TextExtractor: Send + Sync {
    /// Extract `(text, detected_mime)` from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Extract`] for unsupported types or unreadable
    /// files.
    fn extract(&self, path: &Path) -> Result<(String, String)>;
}

/// Extractor for resume uploads: PDF, Word and text-based documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn extract(&self, path: &Path) -> Result<(String, String)> {
        let mime = sniff_mime(path);
        let text = match mime {
            PDF_MIME => pdf_text(path)?,
            DOCX_MIME | MSWORD_MIME => docx_text(path)?,
            m if is_text_mime(m) => plain_text(path)?,
            other => return Err(AppError::Extract(format!("unsupported file type: {other}"))),
        };

        Ok((text.trim().to_owned(), mime.to_owned()))
    }
}

/// Guess a mime type from the file extension.
#[must_use]
pub fn sniff_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("txt") => "text/plain",
        Some("md" | "markdown") => "text/markdown",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("pdf") => PDF_MIME,
        Some("doc") => MSWORD_MIME,
        Some("docx") => DOCX_MIME,
        _ => OCTET_STREAM,
    }
}

fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/json"
}

fn plain_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .map_err(|err| AppError::Extract(format!("cannot read {}: {err}", path.display())))?;
    String::from_utf8(bytes)
        .map_err(|_| AppError::Extract(format!("{} is not valid UTF-8", path.display())))
}

fn pdf_text(path: &Path) -> Result<String> {
    let doc = lopdf::Document::load(path)
        .map_err(|err| AppError::Extract(format!("cannot parse PDF {}: {err}", path.display())))?;

    let mut pages = Vec::new();
    for number in doc.get_pages().keys() {
        let text = doc.extract_text(&[*number]).map_err(|err| {
            AppError::Extract(format!("cannot read text of PDF page {number}: {err}"))
        })?;
        pages.push(text);
    }
    Ok(pages.join("\n"))
}

fn docx_text(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)
        .map_err(|err| AppError::Extract(format!("cannot read {}: {err}", path.display())))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| {
        AppError::Extract(format!("{} is not a Word document: {err}", path.display()))
    })?;

    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|err| AppError::Extract(format!("missing {DOCX_BODY}: {err}")))?
        .read_to_string(&mut xml)
        .map_err(|err| AppError::Extract(format!("cannot read {DOCX_BODY}: {err}")))?;

    docx_body_text(&xml)
}

/// Text of a WordprocessingML body, one line per `w:p` paragraph.
fn docx_body_text(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| AppError::Extract(format!("invalid document XML: {err}")))?;
        match event {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                b"w:p" => paragraphs.push(String::new()),
                _ => {}
            },
            Event::Text(t) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|err| AppError::Extract(format!("invalid document text: {err}")))?;
                current.push_str(&text);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs.join("\n"))
}

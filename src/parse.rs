//! Multi-format text extraction.
//!
//! [`FormatParser`] turns uploaded bytes into normalized text plus a
//! metadata object. Dispatch is a closed [`Format`] registry: the declared
//! content type is consulted first, the filename extension second. Bytes
//! that match no registered format fall back to strict UTF-8; only when
//! that fails too does the parse hard-fail with
//! [`ParseError::UnsupportedFormat`].
//!
//! Optional extractors (OCR) are gated by a [`Capabilities`] probe run once
//! at startup. A missing capability selects a degraded path that produces a
//! placeholder text plus an `error` key in metadata, keeping the document
//! searchable by its filename instead of failing the ingest.

use serde_json::{json, Map, Value};
use std::io::{Cursor, Read};
use std::process::Command;
use thiserror::Error;

use calamine::{Data, Reader as XlsReader, Xlsx};
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use scraper::{ElementRef, Html, Selector};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported format: content_type={content_type}, filename={filename}")]
    UnsupportedFormat {
        content_type: String,
        filename: String,
    },
    #[error("{format} extraction failed: {message}")]
    Extraction { format: &'static str, message: String },
}

impl ParseError {
    fn extraction(format: &'static str, message: impl ToString) -> Self {
        ParseError::Extraction {
            format,
            message: message.to_string(),
        }
    }
}

/// Normalized parse output: extracted text plus document-level metadata.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// The closed set of formats the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Pdf,
    Docx,
    Text,
    Markdown,
    Csv,
    Xlsx,
    Json,
    Html,
    Pptx,
    Rtf,
    Image,
}

impl Format {
    pub fn tag(&self) -> &'static str {
        match self {
            Format::Pdf => "pdf",
            Format::Docx => "docx",
            Format::Text => "text",
            Format::Markdown => "markdown",
            Format::Csv => "csv",
            Format::Xlsx => "xlsx",
            Format::Json => "json",
            Format::Html => "html",
            Format::Pptx => "pptx",
            Format::Rtf => "rtf",
            Format::Image => "image",
        }
    }

    /// Resolve a format from the declared content type, falling back to the
    /// filename extension. Returns `None` when neither matches.
    pub fn detect(content_type: &str, filename: &str) -> Option<Format> {
        let ct = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        let by_type = match ct.as_str() {
            "application/pdf" => Some(Format::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Format::Docx)
            }
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Some(Format::Xlsx)
            }
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                Some(Format::Pptx)
            }
            "text/plain" => Some(Format::Text),
            "text/markdown" => Some(Format::Markdown),
            "text/csv" => Some(Format::Csv),
            "application/json" => Some(Format::Json),
            "text/html" => Some(Format::Html),
            "application/rtf" | "text/rtf" => Some(Format::Rtf),
            "image/png" | "image/jpeg" | "image/tiff" | "image/bmp" | "image/gif"
            | "image/webp" => Some(Format::Image),
            _ => None,
        };
        if by_type.is_some() {
            return by_type;
        }

        let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            "txt" | "text" | "log" => Some(Format::Text),
            "md" | "markdown" => Some(Format::Markdown),
            "csv" => Some(Format::Csv),
            "xlsx" | "xlsm" => Some(Format::Xlsx),
            "json" => Some(Format::Json),
            "html" | "htm" => Some(Format::Html),
            "pptx" => Some(Format::Pptx),
            "rtf" => Some(Format::Rtf),
            "png" | "jpg" | "jpeg" | "tif" | "tiff" | "bmp" | "gif" | "webp" => {
                Some(Format::Image)
            }
            _ => None,
        }
    }
}

/// Optional extractor availability, probed once at startup.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub ocr: bool,
}

impl Capabilities {
    /// Probe the environment for optional tooling.
    pub fn probe() -> Self {
        let ocr = Command::new("tesseract")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false);
        if !ocr {
            tracing::warn!("tesseract not found; image documents will be stored without OCR text");
        }
        Self { ocr }
    }
}

/// Stateless format dispatcher. Built once and shared.
pub struct FormatParser {
    capabilities: Capabilities,
}

impl FormatParser {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    /// Extract normalized text and metadata from `bytes`.
    pub fn parse(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<ParsedDocument, ParseError> {
        let format = Format::detect(content_type, filename);

        let mut parsed = match format {
            Some(Format::Pdf) => parse_pdf(bytes)?,
            Some(Format::Docx) => parse_docx(bytes)?,
            Some(Format::Text) | Some(Format::Markdown) => {
                parse_utf8(bytes, format.map(|f| f.tag()).unwrap_or("text"))?
            }
            Some(Format::Csv) => parse_csv(bytes)?,
            Some(Format::Xlsx) => parse_xlsx(bytes)?,
            Some(Format::Json) => parse_json(bytes)?,
            Some(Format::Html) => parse_html(bytes)?,
            Some(Format::Pptx) => parse_pptx(bytes)?,
            Some(Format::Rtf) => parse_rtf(bytes)?,
            Some(Format::Image) => parse_image(bytes, filename, self.capabilities.ocr)?,
            None => match std::str::from_utf8(bytes) {
                Ok(text) => ParsedDocument {
                    text: text.to_string(),
                    metadata: Map::new(),
                },
                Err(_) => {
                    return Err(ParseError::UnsupportedFormat {
                        content_type: content_type.to_string(),
                        filename: filename.to_string(),
                    })
                }
            },
        };

        parsed
            .metadata
            .insert("source".to_string(), json!(filename));
        parsed.metadata.insert(
            "format".to_string(),
            json!(format.map(|f| f.tag()).unwrap_or("text")),
        );
        Ok(parsed)
    }
}

fn parse_utf8(bytes: &[u8], format: &'static str) -> Result<ParsedDocument, ParseError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ParseError::extraction(format, e))?
        .to_string();
    Ok(ParsedDocument {
        text,
        metadata: Map::new(),
    })
}

fn parse_pdf(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ParseError::extraction("pdf", e))?;

    let mut metadata = Map::new();
    metadata.insert("pages".to_string(), json!(pages.len()));
    for (key, value) in pdf_info(bytes) {
        metadata.insert(key, json!(value));
    }

    Ok(ParsedDocument {
        text: join_pages(&pages),
        metadata,
    })
}

/// Join per-page text with blank lines, dropping empty pages.
fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Title/author/subject from the PDF Info dictionary, best effort.
fn pdf_info(bytes: &[u8]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let Ok(doc) = lopdf::Document::load_mem(bytes) else {
        return out;
    };
    let Ok(info_ref) = doc.trailer.get(b"Info") else {
        return out;
    };
    let dict = match info_ref {
        lopdf::Object::Reference(id) => match doc.get_dictionary(*id) {
            Ok(d) => d,
            Err(_) => return out,
        },
        lopdf::Object::Dictionary(d) => d,
        _ => return out,
    };
    for (raw, key) in [
        (&b"Title"[..], "title"),
        (&b"Author"[..], "author"),
        (&b"Subject"[..], "subject"),
    ] {
        if let Ok(lopdf::Object::String(value, _)) = dict.get(raw) {
            let s = String::from_utf8_lossy(value);
            let s = s.trim();
            if !s.is_empty() {
                out.push((key.to_string(), s.to_string()));
            }
        }
    }
    out
}

fn zip_read(
    bytes: &[u8],
    name: &str,
    format: &'static str,
) -> Result<Option<Vec<u8>>, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ParseError::extraction(format, e))?;
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ParseError::extraction(format, e)),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| ParseError::extraction(format, e))?;
    Ok(Some(buf))
}

/// Collect the text of every `<{text_tag}>` run, emitting one string per
/// enclosing `<{para_tag}>` element.
fn xml_paragraphs(
    xml: &[u8],
    para_tag: &[u8],
    text_tag: &[u8],
    format: &'static str,
) -> Result<Vec<String>, ParseError> {
    let mut reader = XmlReader::from_reader(xml);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == text_tag => in_text = true,
            Ok(Event::End(e)) if e.name().as_ref() == text_tag => in_text = false,
            Ok(Event::End(e)) if e.name().as_ref() == para_tag => {
                let p = current.trim().to_string();
                if !p.is_empty() {
                    paragraphs.push(p);
                }
                current.clear();
            }
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| ParseError::extraction(format, e))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ParseError::extraction(format, e)),
        }
        buf.clear();
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        paragraphs.push(tail);
    }
    Ok(paragraphs)
}

/// Pull a handful of Dublin Core properties out of `docProps/core.xml`.
fn office_core_properties(bytes: &[u8], format: &'static str) -> Map<String, Value> {
    let mut metadata = Map::new();
    let Ok(Some(xml)) = zip_read(bytes, "docProps/core.xml", format) else {
        return metadata;
    };

    let mut reader = XmlReader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current = match e.name().as_ref() {
                    b"dc:title" => Some("title"),
                    b"dc:creator" => Some("author"),
                    b"dc:subject" => Some("subject"),
                    _ => None,
                };
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Text(t)) => {
                if let Some(key) = current {
                    if let Ok(text) = t.unescape() {
                        let text = text.trim();
                        if !text.is_empty() {
                            metadata.insert(key.to_string(), json!(text));
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        buf.clear();
    }
    metadata
}

fn parse_docx(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let xml = zip_read(bytes, "word/document.xml", "docx")?.ok_or_else(|| {
        ParseError::extraction("docx", "word/document.xml missing from archive")
    })?;
    let paragraphs = xml_paragraphs(&xml, b"w:p", b"w:t", "docx")?;

    Ok(ParsedDocument {
        text: paragraphs.join("\n\n"),
        metadata: office_core_properties(bytes, "docx"),
    })
}

fn parse_pptx(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ParseError::extraction("pptx", e))?;

    // Slide entries are not ordered in the archive; sort by slide number.
    let mut slides: Vec<(u32, String)> = Vec::new();
    for name in archive
        .file_names()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
    {
        let Some(rest) = name.strip_prefix("ppt/slides/slide") else {
            continue;
        };
        let Some(num) = rest.strip_suffix(".xml").and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        slides.push((num, name));
    }
    slides.sort_by_key(|(num, _)| *num);

    let mut blocks = Vec::new();
    for (num, name) in &slides {
        let mut file = archive
            .by_name(name)
            .map_err(|e| ParseError::extraction("pptx", e))?;
        let mut xml = Vec::new();
        file.read_to_end(&mut xml)
            .map_err(|e| ParseError::extraction("pptx", e))?;
        drop(file);

        let paragraphs = xml_paragraphs(&xml, b"a:p", b"a:t", "pptx")?;
        if !paragraphs.is_empty() {
            blocks.push(format!("Slide {}:\n{}", num, paragraphs.join("\n")));
        }
    }

    let mut metadata = office_core_properties(bytes, "pptx");
    metadata.insert("slides".to_string(), json!(slides.len()));

    Ok(ParsedDocument {
        text: blocks.join("\n\n"),
        metadata,
    })
}

fn parse_csv(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::extraction("csv", e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut blocks = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ParseError::extraction("csv", e))?;
        let mut lines = vec![format!("Row {}:", i + 1)];
        for (j, field) in record.iter().enumerate() {
            let key = headers
                .get(j)
                .map(|h| h.as_str())
                .filter(|h| !h.is_empty())
                .map(|h| h.to_string())
                .unwrap_or_else(|| format!("column_{}", j + 1));
            lines.push(format!("  {}: {}", key, field.trim()));
        }
        blocks.push(lines.join("\n"));
    }

    let mut metadata = Map::new();
    metadata.insert("rows".to_string(), json!(blocks.len()));
    metadata.insert("columns".to_string(), json!(headers));

    Ok(ParsedDocument {
        text: blocks.join("\n"),
        metadata,
    })
}

fn format_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Int(i) => format!("{}", i),
        Data::Bool(b) => format!("{}", b),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}

fn parse_xlsx(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| ParseError::extraction("xlsx", e))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut blocks = Vec::new();
    for name in &sheet_names {
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| ParseError::extraction("xlsx", e))?;
        let mut lines = vec![format!("Sheet: {}", name)];
        for row in range.rows() {
            let cells: Vec<String> = row.iter().map(format_cell).collect();
            if cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            lines.push(cells.join(" | "));
        }
        if lines.len() > 1 {
            blocks.push(lines.join("\n"));
        }
    }

    let mut metadata = Map::new();
    metadata.insert("sheets".to_string(), json!(sheet_names));

    Ok(ParsedDocument {
        text: blocks.join("\n\n"),
        metadata,
    })
}

fn parse_json(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ParseError::extraction("json", e))?;
    let text =
        serde_json::to_string_pretty(&value).map_err(|e| ParseError::extraction("json", e))?;
    Ok(ParsedDocument {
        text,
        metadata: Map::new(),
    })
}

const HTML_SKIP_TAGS: [&str; 5] = ["script", "style", "nav", "header", "footer"];

fn inside_skipped(element: ElementRef) -> bool {
    element.ancestors().filter_map(ElementRef::wrap).any(|a| {
        HTML_SKIP_TAGS.contains(&a.value().name())
    })
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn parse_html(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let html = String::from_utf8_lossy(bytes);
    let doc = Html::parse_document(&html);

    // Selectors are static and known-valid.
    let container_sel = Selector::parse("article, main, [role=\"main\"], body")
        .map_err(|e| ParseError::extraction("html", e))?;
    let block_sel = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, blockquote")
        .map_err(|e| ParseError::extraction("html", e))?;
    let title_sel =
        Selector::parse("title").map_err(|e| ParseError::extraction("html", e))?;
    let h1_sel = Selector::parse("h1").map_err(|e| ParseError::extraction("html", e))?;
    let meta_sel = Selector::parse("meta").map_err(|e| ParseError::extraction("html", e))?;

    // Prefer the most specific content container present.
    let container = {
        let mut best: Option<(usize, ElementRef)> = None;
        for el in doc.select(&container_sel) {
            let rank = match el.value().name() {
                "article" => 0,
                "main" => 1,
                "body" => 3,
                _ => 2,
            };
            if best.map(|(r, _)| rank < r).unwrap_or(true) {
                best = Some((rank, el));
            }
        }
        best.map(|(_, el)| el)
    };

    let mut lines = Vec::new();
    if let Some(container) = container {
        for el in container.select(&block_sel) {
            if inside_skipped(el) {
                continue;
            }
            let text = element_text(el);
            if text.is_empty() {
                continue;
            }
            let line = match el.value().name() {
                "h1" => format!("# {}", text),
                "h2" => format!("## {}", text),
                "h3" => format!("### {}", text),
                "h4" => format!("#### {}", text),
                "h5" => format!("##### {}", text),
                "h6" => format!("###### {}", text),
                "li" => format!("- {}", text),
                "blockquote" => format!("> {}", text),
                _ => text,
            };
            // Nested lists repeat the inner text; drop consecutive duplicates.
            if lines.last() != Some(&line) {
                lines.push(line);
            }
        }
    }

    let mut metadata = Map::new();

    let title = doc
        .select(&title_sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            doc.select(&h1_sel)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty())
        });
    if let Some(title) = title {
        metadata.insert("title".to_string(), json!(title));
    }

    // Meta tag fallbacks, first match wins per key.
    let mut meta_values: Vec<(String, String)> = Vec::new();
    for el in doc.select(&meta_sel) {
        let name = el
            .value()
            .attr("name")
            .or_else(|| el.value().attr("property"))
            .unwrap_or("")
            .to_ascii_lowercase();
        let Some(content) = el.value().attr("content") else {
            continue;
        };
        let content = content.trim();
        if !name.is_empty() && !content.is_empty() {
            meta_values.push((name, content.to_string()));
        }
    }
    let lookup = |keys: &[&str]| -> Option<String> {
        for key in keys {
            if let Some((_, v)) = meta_values.iter().find(|(n, _)| n == key) {
                return Some(v.clone());
            }
        }
        None
    };
    if let Some(author) = lookup(&["author", "article:author"]) {
        metadata.insert("author".to_string(), json!(author));
    }
    if let Some(published) = lookup(&["article:published_time", "date", "publish-date"]) {
        metadata.insert("published".to_string(), json!(published));
    }
    if let Some(description) = lookup(&["description", "og:description"]) {
        metadata.insert("description".to_string(), json!(description));
    }

    Ok(ParsedDocument {
        text: lines.join("\n\n"),
        metadata,
    })
}

/// Structured RTF extraction: walk control words, decode `\'hh` escapes,
/// map paragraph breaks, and skip non-content groups.
fn rtf_structured(input: &str) -> String {
    const SKIP_GROUPS: [&str; 6] = ["fonttbl", "colortbl", "stylesheet", "info", "pict", "*"];

    let mut out = String::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    // Depth of the innermost skipped group, if any.
    let mut skip_until: Option<usize> = None;
    let mut depth = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                depth += 1;
                i += 1;
                // Peek the group's first control word to decide skipping.
                if skip_until.is_none() {
                    let rest = &input[i..];
                    if let Some(word) = rest.strip_prefix('\\') {
                        let name: String = word
                            .chars()
                            .take_while(|c| c.is_ascii_alphabetic() || *c == '*')
                            .collect();
                        if SKIP_GROUPS.contains(&name.as_str()) {
                            skip_until = Some(depth);
                        }
                    }
                }
            }
            b'}' => {
                if skip_until == Some(depth) {
                    skip_until = None;
                }
                depth = depth.saturating_sub(1);
                i += 1;
            }
            b'\\' => {
                i += 1;
                if i >= bytes.len() {
                    break;
                }
                match bytes[i] {
                    b'\'' => {
                        // \'hh hex-escaped byte
                        let hex = input.get(i + 1..i + 3).unwrap_or("");
                        if let Ok(byte) = u8::from_str_radix(hex, 16) {
                            if skip_until.is_none() {
                                out.push(byte as char);
                            }
                        }
                        i += 3;
                    }
                    b'\\' | b'{' | b'}' => {
                        if skip_until.is_none() {
                            out.push(bytes[i] as char);
                        }
                        i += 1;
                    }
                    _ => {
                        let word: String = input[i..]
                            .chars()
                            .take_while(|c| c.is_ascii_alphabetic())
                            .collect();
                        i += word.len();
                        // Optional numeric parameter
                        if i < bytes.len() && bytes[i] == b'-' {
                            i += 1;
                        }
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                        // Control words eat one following space
                        if i < bytes.len() && bytes[i] == b' ' {
                            i += 1;
                        }
                        if skip_until.is_none() {
                            match word.as_str() {
                                "par" | "line" => out.push('\n'),
                                "tab" => out.push('\t'),
                                _ => {}
                            }
                        }
                    }
                }
            }
            b'\r' | b'\n' => i += 1,
            c => {
                if skip_until.is_none() {
                    out.push(c as char);
                }
                i += 1;
            }
        }
    }

    out.trim().to_string()
}

fn parse_rtf(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let input = String::from_utf8_lossy(bytes);
    let mut text = rtf_structured(&input);

    if text.is_empty() {
        // Best-effort fallback: strip control words and braces wholesale.
        let controls = regex::Regex::new(r"\\[a-zA-Z]+-?\d* ?|\\'[0-9a-fA-F]{2}|[{}]")
            .map_err(|e| ParseError::extraction("rtf", e))?;
        text = controls.replace_all(&input, "").trim().to_string();
    }

    Ok(ParsedDocument {
        text,
        metadata: Map::new(),
    })
}

fn parse_image(bytes: &[u8], filename: &str, ocr: bool) -> Result<ParsedDocument, ParseError> {
    if !ocr {
        let mut metadata = Map::new();
        metadata.insert(
            "error".to_string(),
            json!("OCR unavailable: tesseract not installed"),
        );
        return Ok(ParsedDocument {
            text: format!("[image: {} — text extraction unavailable]", filename),
            metadata,
        });
    }

    let dir = tempfile::tempdir().map_err(|e| ParseError::extraction("image", e))?;
    let input = dir.path().join("input");
    std::fs::write(&input, bytes).map_err(|e| ParseError::extraction("image", e))?;
    let out_base = dir.path().join("out");

    let status = Command::new("tesseract")
        .arg(&input)
        .arg(&out_base)
        .output()
        .map_err(|e| ParseError::extraction("image", e))?;
    if !status.status.success() {
        return Err(ParseError::extraction(
            "image",
            String::from_utf8_lossy(&status.stderr).into_owned(),
        ));
    }

    let text = std::fs::read_to_string(out_base.with_extension("txt"))
        .map_err(|e| ParseError::extraction("image", e))?;

    Ok(ParsedDocument {
        text: text.trim().to_string(),
        metadata: Map::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> FormatParser {
        FormatParser::new(Capabilities { ocr: false })
    }

    #[test]
    fn detect_prefers_content_type_over_extension() {
        assert_eq!(
            Format::detect("application/pdf", "data.bin"),
            Some(Format::Pdf)
        );
        assert_eq!(Format::detect("text/html", "page.txt"), Some(Format::Html));
    }

    #[test]
    fn detect_falls_back_to_extension() {
        assert_eq!(
            Format::detect("application/octet-stream", "notes.md"),
            Some(Format::Markdown)
        );
        assert_eq!(Format::detect("", "deck.pptx"), Some(Format::Pptx));
        assert_eq!(Format::detect("application/octet-stream", "blob.xyz"), None);
    }

    #[test]
    fn plain_text_passes_through() {
        let doc = parser()
            .parse(b"hello world", "text/plain", "notes.txt")
            .unwrap();
        assert_eq!(doc.text, "hello world");
        assert_eq!(doc.metadata["source"], "notes.txt");
        assert_eq!(doc.metadata["format"], "text");
    }

    #[test]
    fn unknown_format_with_valid_utf8_falls_back() {
        let doc = parser()
            .parse(b"plain enough", "application/octet-stream", "data.xyz")
            .unwrap();
        assert_eq!(doc.text, "plain enough");
    }

    #[test]
    fn unknown_format_with_binary_bytes_is_unsupported() {
        let err = parser()
            .parse(&[0xff, 0xfe, 0x00, 0x01], "application/octet-stream", "data.xyz")
            .unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat { .. }));
    }

    #[test]
    fn pdf_pages_join_with_blank_lines() {
        let pages = vec![
            "Page one text.\n".to_string(),
            String::new(),
            "Page two text.".to_string(),
        ];
        assert_eq!(join_pages(&pages), "Page one text.\n\nPage two text.");
    }

    #[test]
    fn csv_renders_labeled_rows() {
        let doc = parser()
            .parse(
                b"name,age\nAda,36\nAlan,41\n",
                "text/csv",
                "people.csv",
            )
            .unwrap();
        assert!(doc.text.contains("Row 1:"));
        assert!(doc.text.contains("  name: Ada"));
        assert!(doc.text.contains("Row 2:"));
        assert!(doc.text.contains("  age: 41"));
        assert_eq!(doc.metadata["rows"], 2);
    }

    #[test]
    fn json_is_pretty_printed() {
        let doc = parser()
            .parse(br#"{"a":1,"b":[2,3]}"#, "application/json", "data.json")
            .unwrap();
        assert!(doc.text.contains("\"a\": 1"));
    }

    #[test]
    fn invalid_json_is_an_extraction_error() {
        let err = parser()
            .parse(b"{not json", "application/json", "data.json")
            .unwrap_err();
        assert!(matches!(err, ParseError::Extraction { format: "json", .. }));
    }

    #[test]
    fn html_extracts_content_and_skips_chrome() {
        let html = br#"<html><head><title>Release Notes</title>
            <meta name="author" content="Docs Team">
            <meta name="description" content="What changed">
            </head><body>
            <nav><a>Home</a><p>nav junk</p></nav>
            <article><h1>Release Notes</h1>
            <p>First paragraph.</p>
            <ul><li>Item one</li><li>Item two</li></ul>
            <blockquote>Quoted text</blockquote></article>
            <footer><p>copyright</p></footer>
            <script>var x = 1;</script>
            </body></html>"#;
        let doc = parser().parse(html, "text/html", "notes.html").unwrap();
        assert!(doc.text.contains("# Release Notes"));
        assert!(doc.text.contains("First paragraph."));
        assert!(doc.text.contains("- Item one"));
        assert!(doc.text.contains("> Quoted text"));
        assert!(!doc.text.contains("nav junk"));
        assert!(!doc.text.contains("copyright"));
        assert!(!doc.text.contains("var x"));
        assert_eq!(doc.metadata["title"], "Release Notes");
        assert_eq!(doc.metadata["author"], "Docs Team");
        assert_eq!(doc.metadata["description"], "What changed");
    }

    #[test]
    fn rtf_extracts_paragraph_text() {
        let rtf = br"{\rtf1\ansi{\fonttbl{\f0 Helvetica;}}\f0 Hello\par World\par}";
        let doc = parser()
            .parse(rtf, "application/rtf", "memo.rtf")
            .unwrap();
        assert!(doc.text.contains("Hello"));
        assert!(doc.text.contains("World"));
        assert!(!doc.text.contains("Helvetica"));
    }

    #[test]
    fn image_without_ocr_degrades_to_stub() {
        let doc = parser()
            .parse(&[0x89, 0x50, 0x4e, 0x47], "image/png", "scan.png")
            .unwrap();
        assert!(doc.text.contains("scan.png"));
        assert_eq!(
            doc.metadata["error"],
            "OCR unavailable: tesseract not installed"
        );
    }

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        use std::io::Write;
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn docx_joins_paragraphs_with_blank_lines() {
        let document = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
            <w:body>
            <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second </w:t></w:r><w:r><w:t>paragraph.</w:t></w:r></w:p>
            </w:body></w:document>"#;
        let core = r#"<?xml version="1.0"?>
            <cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties"
              xmlns:dc="http://purl.org/dc/elements/1.1/">
            <dc:title>Quarterly Report</dc:title>
            <dc:creator>Ada</dc:creator>
            </cp:coreProperties>"#;
        let bytes = build_zip(&[
            ("word/document.xml", document),
            ("docProps/core.xml", core),
        ]);
        let doc = parser()
            .parse(
                &bytes,
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "report.docx",
            )
            .unwrap();
        assert_eq!(doc.text, "First paragraph.\n\nSecond paragraph.");
        assert_eq!(doc.metadata["title"], "Quarterly Report");
        assert_eq!(doc.metadata["author"], "Ada");
    }

    #[test]
    fn pptx_renders_slides_in_order() {
        let slide = |text: &str| {
            format!(
                r#"<?xml version="1.0"?>
                <p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"
                       xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main">
                <p:cSld><p:spTree><p:sp><p:txBody>
                <a:p><a:r><a:t>{}</a:t></a:r></a:p>
                </p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
                text
            )
        };
        let s1 = slide("Intro");
        let s2 = slide("Details");
        let bytes = build_zip(&[
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let doc = parser()
            .parse(
                &bytes,
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "deck.pptx",
            )
            .unwrap();
        assert_eq!(doc.text, "Slide 1:\nIntro\n\nSlide 2:\nDetails");
        assert_eq!(doc.metadata["slides"], 2);
    }
}

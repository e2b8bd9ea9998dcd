//! Built-in DOCX → Markdown engine.
//!
//! A `.docx` file is a ZIP archive of XML parts:
//!
//! - `word/document.xml`: body (paragraphs, runs, tables, drawings)
//! - `word/styles.xml`: style names, used to recognise headings
//! - `word/numbering.xml`: list definitions (bullet vs. numbered)
//! - `word/_rels/document.xml.rels`: targets of images and hyperlinks
//!
//! The body is streamed once with quick-xml. Paragraphs become Markdown
//! blocks; runs become inline text with `__bold__`, `*italic*` and
//! `~~strike~~` markers; underline follows the style map of the
//! [`EngineOptions`]. Hard line breaks are emitted as `<br>` and left to the
//! post-processor.

use super::engine::{ConversionEngine, EngineError, EngineOptions, EngineOutput, ImageDirective};
use base64::Engine as _;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";
const STYLES_PART: &str = "word/styles.xml";
const NUMBERING_PART: &str = "word/numbering.xml";
const RELS_PART: &str = "word/_rels/document.xml.rels";

/// Engine backed by zip + quick-xml. Stateless; share freely.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxEngine;

impl ConversionEngine for DocxEngine {
    fn convert(&self, bytes: &[u8], options: &EngineOptions) -> Result<EngineOutput, EngineError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
            EngineError::Corrupt(format!("Could not open the file as a ZIP archive: {e}"))
        })?;

        let document = read_part(&mut archive, DOCUMENT_PART)?.ok_or_else(|| {
            EngineError::Corrupt(format!(
                "Could not find main document part: expected '{DOCUMENT_PART}' in the archive"
            ))
        })?;
        let rels = match read_part(&mut archive, RELS_PART)? {
            Some(xml) => parse_relationships(&xml)?,
            None => HashMap::new(),
        };
        let styles = match read_part(&mut archive, STYLES_PART)? {
            Some(xml) => parse_styles(&xml)?,
            None => HashMap::new(),
        };
        let numbering = match read_part(&mut archive, NUMBERING_PART)? {
            Some(xml) => parse_numbering(&xml)?,
            None => Numbering::default(),
        };
        debug!(
            "DOCX parts: {} relationships, {} heading styles, {} numbering instances",
            rels.len(),
            styles.len(),
            numbering.nums.len()
        );

        let mut walker = BodyWalker::new(options, &rels, &styles, &numbering, &mut archive);
        walker.walk(&document)?;
        Ok(walker.finish())
    }
}

// ── Archive helpers ──────────────────────────────────────────────────────

fn read_part<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, EngineError> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(EngineError::Corrupt(format!("Could not read '{name}': {e}"))),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| EngineError::Corrupt(format!("Could not read '{name}': {e}")))?;
    Ok(Some(content))
}

fn read_binary<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, String> {
    let mut file = archive.by_name(name).map_err(|e| e.to_string())?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).map_err(|e| e.to_string())?;
    Ok(data)
}

#[inline]
fn get_attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .find(|a| a.as_ref().ok().map(|x| x.key.as_ref()) == Some(key))
        .and_then(Result::ok)
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

/// `w:val="0"`/`"false"`/`"none"` switches a toggle property off.
#[inline]
fn val_is_off(e: &BytesStart) -> bool {
    matches!(
        get_attr(e, b"w:val").as_deref(),
        Some("0" | "false" | "none")
    )
}

fn xml_error(part: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Corrupt(format!("Malformed XML in '{part}': {e}"))
}

// ── Relationships ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Relationship {
    target: String,
    external: bool,
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, Relationship>, EngineError> {
    let mut rels = HashMap::new();
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (get_attr(&e, b"Id"), get_attr(&e, b"Target")) {
                    let external = get_attr(&e, b"TargetMode").as_deref() == Some("External");
                    rels.insert(id, Relationship { target, external });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(RELS_PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Resolve a relationship target to an archive path.
fn part_path(target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("word/{target}"),
    };
    let mut parts: Vec<&str> = Vec::new();
    for seg in joined.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

// ── Styles ───────────────────────────────────────────────────────────────

/// Style id → heading level (1–6).
fn parse_styles(xml: &str) -> Result<HashMap<String, u8>, EngineError> {
    let mut headings = HashMap::new();
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut style_id: Option<String> = None;
    let mut level: Option<u8> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:style" => {
                style_id = get_attr(&e, b"w:styleId");
                level = None;
            }
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:name" if style_id.is_some() => {
                    if let Some(name) = get_attr(&e, b"w:val") {
                        level = level.or_else(|| heading_level_from_name(&name));
                    }
                }
                b"w:outlineLvl" if style_id.is_some() => {
                    if let Some(v) = get_attr(&e, b"w:val").and_then(|v| v.parse::<u8>().ok()) {
                        if v < 9 {
                            level = level.or(Some((v + 1).min(6)));
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"w:style" => {
                if let (Some(id), Some(lvl)) = (style_id.take(), level.take()) {
                    headings.insert(id, lvl);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(STYLES_PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(headings)
}

fn heading_level_from_name(name: &str) -> Option<u8> {
    let lower = name.trim().to_ascii_lowercase();
    if lower == "title" {
        return Some(1);
    }
    let digits = lower.strip_prefix("heading")?.trim();
    digits.parse::<u8>().ok().filter(|n| (1..=9).contains(n)).map(|n| n.min(6))
}

// ── Numbering ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Numbering {
    /// numId → abstractNumId
    nums: HashMap<String, String>,
    /// (abstractNumId, ilvl) → numFmt
    formats: HashMap<(String, u8), String>,
}

impl Numbering {
    fn is_ordered(&self, num_id: &str, ilvl: u8) -> bool {
        self.nums
            .get(num_id)
            .and_then(|abs| self.formats.get(&(abs.clone(), ilvl)))
            .is_some_and(|fmt| fmt != "bullet" && fmt != "none")
    }
}

fn parse_numbering(xml: &str) -> Result<Numbering, EngineError> {
    let mut numbering = Numbering::default();
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut abstract_id: Option<String> = None;
    let mut ilvl: Option<u8> = None;
    let mut num_id: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:abstractNum" => abstract_id = get_attr(&e, b"w:abstractNumId"),
                b"w:lvl" => ilvl = get_attr(&e, b"w:ilvl").and_then(|v| v.parse().ok()),
                b"w:numFmt" => {
                    if let (Some(abs), Some(lvl), Some(fmt)) =
                        (abstract_id.as_ref(), ilvl, get_attr(&e, b"w:val"))
                    {
                        numbering.formats.insert((abs.clone(), lvl), fmt);
                    }
                }
                b"w:num" => num_id = get_attr(&e, b"w:numId"),
                b"w:abstractNumId" => {
                    if let (Some(id), Some(abs)) = (num_id.as_ref(), get_attr(&e, b"w:val")) {
                        numbering.nums.insert(id.clone(), abs);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:abstractNum" => abstract_id = None,
                b"w:lvl" => ilvl = None,
                b"w:num" => num_id = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(NUMBERING_PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(numbering)
}

// ── Inline model ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RunFormat {
    bold: bool,
    italic: bool,
    strike: bool,
    underline: bool,
}

/// Formatting after the underline style mapping is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Styled {
    Raw,
    Text {
        bold: bool,
        italic: bool,
        strike: bool,
        html_u: bool,
    },
}

impl Styled {
    fn from_run(fmt: RunFormat, options: &EngineOptions) -> Self {
        let mut bold = fmt.bold;
        let mut italic = fmt.italic;
        let mut strike = fmt.strike;
        let mut html_u = false;
        if fmt.underline {
            match options.mapping_for("u") {
                Some("u") => html_u = true,
                Some("em") => italic = true,
                Some("strong") => bold = true,
                Some("s") | Some("strike") => strike = true,
                _ => {}
            }
        }
        Styled::Text {
            bold,
            italic,
            strike,
            html_u,
        }
    }
}

#[derive(Debug)]
struct Segment {
    style: Styled,
    text: String,
}

/// Inline content of a paragraph or of a hyperlink inside one.
#[derive(Debug, Default)]
struct InlineFrame {
    segments: Vec<Segment>,
    link: Option<String>,
}

impl InlineFrame {
    fn push(&mut self, style: Styled, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.segments.last_mut() {
            Some(last) if last.style == style => last.text.push_str(text),
            _ => self.segments.push(Segment {
                style,
                text: text.to_string(),
            }),
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            match seg.style {
                Styled::Raw => out.push_str(&seg.text),
                Styled::Text {
                    bold,
                    italic,
                    strike,
                    html_u,
                } => {
                    let mut s = seg.text.clone();
                    if html_u {
                        s = wrap(&s, "<u>", "</u>");
                    }
                    if italic {
                        s = wrap(&s, "*", "*");
                    }
                    if bold {
                        s = wrap(&s, "__", "__");
                    }
                    if strike {
                        s = wrap(&s, "~~", "~~");
                    }
                    out.push_str(&s);
                }
            }
        }
        out
    }
}

/// Wrap the non-whitespace core of `text` in markers.
fn wrap(text: &str, open: &str, close: &str) -> String {
    let after_lead = text.trim_start();
    let lead = &text[..text.len() - after_lead.len()];
    let core = after_lead.trim_end();
    let trail = &after_lead[core.len()..];
    if core.is_empty() {
        return text.to_string();
    }
    format!("{lead}{open}{core}{close}{trail}")
}

/// Backslash-escape characters that would otherwise start Markdown syntax.
fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '`' | '*' | '_' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_table_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

// ── Blocks ───────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Block {
    Paragraph(String),
    ListItem(String),
    Table(String),
    Empty,
}

fn join_blocks(blocks: &[Block]) -> String {
    let mut out = String::new();
    let mut prev_list = false;
    for (i, block) in blocks.iter().enumerate() {
        let (text, is_list) = match block {
            Block::Paragraph(t) | Block::Table(t) => (t.as_str(), false),
            Block::ListItem(t) => (t.as_str(), true),
            Block::Empty => ("", false),
        };
        if i > 0 {
            out.push_str(if prev_list && is_list { "\n" } else { "\n\n" });
        }
        out.push_str(text);
        prev_list = is_list;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[derive(Debug, Default)]
struct Cell {
    text: String,
    span: usize,
}

#[derive(Debug, Default)]
struct TableBuilder {
    rows: Vec<Vec<Cell>>,
    row: Vec<Cell>,
    cell: Option<Cell>,
}

impl TableBuilder {
    fn append_to_cell(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(cell) = self.cell.as_mut() {
            if !cell.text.is_empty() {
                cell.text.push(' ');
            }
            cell.text.push_str(text);
        }
    }

    /// Everything as a single line, for tables nested in a cell.
    fn flatten(&self) -> String {
        self.rows
            .iter()
            .flat_map(|r| r.iter().map(|c| c.text.as_str()))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn render(&self) -> Option<String> {
        let grid: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                let mut cells = Vec::new();
                for cell in row {
                    cells.push(escape_table_cell(cell.text.trim()));
                    for _ in 1..cell.span.max(1) {
                        cells.push(String::new());
                    }
                }
                cells
            })
            .filter(|r| !r.is_empty())
            .collect();
        let width = grid.iter().map(Vec::len).max()?;
        let line = |cells: &[String]| {
            let mut s = String::from("|");
            for i in 0..width {
                s.push(' ');
                s.push_str(cells.get(i).map(String::as_str).unwrap_or(""));
                s.push_str(" |");
            }
            s
        };
        let mut out = vec![line(&grid[0])];
        out.push(format!("|{}", " --- |".repeat(width)));
        out.extend(grid[1..].iter().map(|r| line(r)));
        Some(out.join("\n"))
    }
}

// ── Body walker ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ParagraphProps {
    style: Option<String>,
    num_id: Option<String>,
    ilvl: u8,
}

#[derive(Debug, Default)]
struct PendingImage {
    rel_id: Option<String>,
    alt: String,
}

struct BodyWalker<'a, R: Read + std::io::Seek> {
    options: &'a EngineOptions,
    rels: &'a HashMap<String, Relationship>,
    styles: &'a HashMap<String, u8>,
    numbering: &'a Numbering,
    archive: &'a mut ZipArchive<R>,

    blocks: Vec<Block>,
    messages: Vec<String>,
    list_counters: HashMap<String, Vec<usize>>,
    tables: Vec<TableBuilder>,

    saw_root: bool,
    in_paragraph: bool,
    in_ppr: bool,
    in_run: bool,
    in_rpr: bool,
    in_text: bool,
    props: ParagraphProps,
    run_fmt: RunFormat,
    frames: Vec<InlineFrame>,
    image: Option<PendingImage>,
}

impl<'a, R: Read + std::io::Seek> BodyWalker<'a, R> {
    fn new(
        options: &'a EngineOptions,
        rels: &'a HashMap<String, Relationship>,
        styles: &'a HashMap<String, u8>,
        numbering: &'a Numbering,
        archive: &'a mut ZipArchive<R>,
    ) -> Self {
        Self {
            options,
            rels,
            styles,
            numbering,
            archive,
            blocks: Vec::new(),
            messages: Vec::new(),
            list_counters: HashMap::new(),
            tables: Vec::new(),
            saw_root: false,
            in_paragraph: false,
            in_ppr: false,
            in_run: false,
            in_rpr: false,
            in_text: false,
            props: ParagraphProps::default(),
            run_fmt: RunFormat::default(),
            frames: Vec::new(),
            image: None,
        }
    }

    fn walk(&mut self, xml: &str) -> Result<(), EngineError> {
        let mut reader = Reader::from_str(xml);
        // Whitespace inside <w:t xml:space="preserve"> is content.
        reader.trim_text(false);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    self.check_root(&e)?;
                    self.handle_start(&e);
                }
                Ok(Event::Empty(e)) => {
                    self.check_root(&e)?;
                    self.handle_empty(&e);
                }
                Ok(Event::Text(t)) if self.in_text => {
                    let text = t.unescape().map_err(|e| xml_error(DOCUMENT_PART, e))?;
                    self.push_text(&text);
                }
                Ok(Event::End(e)) => self.handle_end(e.name().as_ref()),
                Ok(Event::Eof) => break,
                Err(e) => return Err(xml_error(DOCUMENT_PART, e)),
                _ => {}
            }
            buf.clear();
        }
        if !self.saw_root {
            return Err(EngineError::Corrupt(format!(
                "'{DOCUMENT_PART}' is empty"
            )));
        }
        Ok(())
    }

    fn check_root(&mut self, e: &BytesStart) -> Result<(), EngineError> {
        if self.saw_root {
            return Ok(());
        }
        self.saw_root = true;
        if e.name().as_ref() != b"w:document" {
            return Err(EngineError::Unsupported(format!(
                "Unsupported main document: root element is <{}>, not <w:document>",
                String::from_utf8_lossy(e.name().as_ref())
            )));
        }
        Ok(())
    }

    fn handle_start(&mut self, e: &BytesStart) {
        match e.name().as_ref() {
            b"w:p" => self.start_paragraph(),
            b"w:pPr" => self.in_ppr = true,
            b"w:r" if self.in_paragraph => {
                self.in_run = true;
                self.run_fmt = RunFormat::default();
            }
            b"w:rPr" => self.in_rpr = true,
            b"w:t" if self.in_run => self.in_text = true,
            b"w:hyperlink" if self.in_paragraph => {
                let link = match (get_attr(e, b"r:id"), get_attr(e, b"w:anchor")) {
                    (Some(id), _) => self.rels.get(&id).map(|r| r.target.clone()),
                    (None, Some(anchor)) => Some(format!("#{anchor}")),
                    (None, None) => None,
                };
                self.frames.push(InlineFrame {
                    segments: Vec::new(),
                    link,
                });
            }
            b"w:drawing" | b"w:pict" => self.image = Some(PendingImage::default()),
            b"w:tbl" => self.tables.push(TableBuilder::default()),
            b"w:tr" => {
                if let Some(t) = self.tables.last_mut() {
                    t.row.clear();
                }
            }
            b"w:tc" => {
                if let Some(t) = self.tables.last_mut() {
                    t.cell = Some(Cell {
                        text: String::new(),
                        span: 1,
                    });
                }
            }
            _ => self.handle_empty(e),
        }
    }

    fn handle_empty(&mut self, e: &BytesStart) {
        match e.name().as_ref() {
            b"w:p" => {
                self.start_paragraph();
                self.end_paragraph();
            }
            b"w:pStyle" if self.in_ppr => self.props.style = get_attr(e, b"w:val"),
            b"w:numId" if self.in_ppr => self.props.num_id = get_attr(e, b"w:val"),
            b"w:ilvl" if self.in_ppr => {
                self.props.ilvl = get_attr(e, b"w:val")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0)
            }
            b"w:gridSpan" => {
                let span = get_attr(e, b"w:val").and_then(|v| v.parse().ok());
                if let (Some(t), Some(span)) = (self.tables.last_mut(), span) {
                    if let Some(cell) = t.cell.as_mut() {
                        cell.span = span;
                    }
                }
            }
            b"w:b" if self.in_run && self.in_rpr => self.run_fmt.bold = !val_is_off(e),
            b"w:i" if self.in_run && self.in_rpr => self.run_fmt.italic = !val_is_off(e),
            b"w:strike" | b"w:dstrike" if self.in_run && self.in_rpr => {
                self.run_fmt.strike = !val_is_off(e)
            }
            b"w:u" if self.in_run && self.in_rpr => self.run_fmt.underline = !val_is_off(e),
            b"w:br" if self.in_run => {
                // Page and column breaks have no Markdown counterpart.
                if get_attr(e, b"w:type").is_none_or(|t| t == "textWrapping") {
                    let br = if self.tables.is_empty() { "<br>" } else { " " };
                    self.push_styled(br);
                }
            }
            b"w:cr" if self.in_run => {
                let br = if self.tables.is_empty() { "<br>" } else { " " };
                self.push_styled(br);
            }
            b"w:tab" if self.in_run && !self.in_rpr => self.push_styled("\t"),
            b"wp:docPr" => {
                if let Some(img) = self.image.as_mut() {
                    img.alt = get_attr(e, b"descr")
                        .or_else(|| get_attr(e, b"title"))
                        .unwrap_or_default();
                }
            }
            b"a:blip" => {
                if let Some(img) = self.image.as_mut() {
                    img.rel_id = get_attr(e, b"r:embed").or_else(|| get_attr(e, b"r:link"));
                }
            }
            b"v:imagedata" => {
                if let Some(img) = self.image.as_mut() {
                    img.rel_id = get_attr(e, b"r:id");
                    if let Some(title) = get_attr(e, b"o:title") {
                        img.alt = title;
                    }
                }
            }
            b"w:object" => self
                .messages
                .push("Embedded OLE object skipped".to_string()),
            _ => {}
        }
    }

    fn handle_end(&mut self, name: &[u8]) {
        match name {
            b"w:p" => self.end_paragraph(),
            b"w:pPr" => self.in_ppr = false,
            b"w:r" => self.in_run = false,
            b"w:rPr" => self.in_rpr = false,
            b"w:t" => self.in_text = false,
            b"w:hyperlink" if self.frames.len() > 1 => {
                if let Some(frame) = self.frames.pop() {
                    let text = frame.render();
                    let rendered = match frame.link {
                        Some(url) if !text.trim().is_empty() => format!("[{text}]({url})"),
                        _ => text,
                    };
                    if let Some(parent) = self.frames.last_mut() {
                        parent.push(Styled::Raw, &rendered);
                    }
                }
            }
            b"w:drawing" | b"w:pict" => {
                if let Some(img) = self.image.take() {
                    self.emit_image(img);
                }
            }
            b"w:tc" => {
                if let Some(t) = self.tables.last_mut() {
                    if let Some(cell) = t.cell.take() {
                        t.row.push(cell);
                    }
                }
            }
            b"w:tr" => {
                if let Some(t) = self.tables.last_mut() {
                    let row = std::mem::take(&mut t.row);
                    t.rows.push(row);
                }
            }
            b"w:tbl" => {
                if let Some(table) = self.tables.pop() {
                    match self.tables.last_mut() {
                        Some(outer) => outer.append_to_cell(&table.flatten()),
                        None => {
                            if let Some(md) = table.render() {
                                self.blocks.push(Block::Table(md));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn start_paragraph(&mut self) {
        self.in_paragraph = true;
        self.props = ParagraphProps::default();
        self.frames.clear();
        self.frames.push(InlineFrame::default());
    }

    fn end_paragraph(&mut self) {
        self.in_paragraph = false;
        // Unclosed hyperlinks fold into the paragraph.
        while self.frames.len() > 1 {
            if let Some(frame) = self.frames.pop() {
                let text = frame.render();
                if let Some(parent) = self.frames.last_mut() {
                    parent.push(Styled::Raw, &text);
                }
            }
        }
        let text = self
            .frames
            .pop()
            .map(|f| f.render())
            .unwrap_or_default();
        let text = text.trim_end_matches(|c| c == ' ' || c == '\t');
        let props = std::mem::take(&mut self.props);

        if let Some(table) = self.tables.last_mut() {
            table.append_to_cell(text.trim());
            return;
        }

        if text.trim().is_empty() {
            if self.options.preserve_empty_paragraphs {
                self.blocks.push(Block::Empty);
            }
            return;
        }

        let heading = props.style.as_ref().and_then(|s| {
            self.styles
                .get(s)
                .copied()
                .or_else(|| heading_level_from_name(&s.replace("Heading", "heading ")))
        });
        if let Some(level) = heading {
            let hashes = "#".repeat(level as usize);
            self.blocks
                .push(Block::Paragraph(format!("{hashes} {}", text.trim())));
            return;
        }

        match props.num_id.filter(|id| id != "0") {
            Some(num_id) => {
                let marker = self.list_marker(&num_id, props.ilvl);
                let indent = "    ".repeat(props.ilvl as usize);
                self.blocks.push(Block::ListItem(format!(
                    "{indent}{marker} {}",
                    text.trim_start()
                )));
            }
            None => self.blocks.push(Block::Paragraph(text.to_string())),
        }
    }

    fn list_marker(&mut self, num_id: &str, ilvl: u8) -> String {
        let level = ilvl as usize;
        let counters = self.list_counters.entry(num_id.to_string()).or_default();
        counters.truncate(level + 1);
        counters.resize(level + 1, 0);
        counters[level] += 1;
        if self.numbering.is_ordered(num_id, ilvl) {
            format!("{}.", counters[level])
        } else {
            "-".to_string()
        }
    }

    fn push_text(&mut self, text: &str) {
        self.push_styled(&escape_markdown(text));
    }

    fn push_styled(&mut self, text: &str) {
        let style = Styled::from_run(self.run_fmt, self.options);
        if let Some(frame) = self.frames.last_mut() {
            frame.push(style, text);
        }
    }

    fn emit_image(&mut self, img: PendingImage) {
        if self.options.images == ImageDirective::Suppress {
            return;
        }
        let Some(rel_id) = img.rel_id else {
            return;
        };
        let Some(rel) = self.rels.get(&rel_id) else {
            self.messages
                .push(format!("Image relationship '{rel_id}' not found; image skipped"));
            return;
        };
        let alt = escape_markdown(&img.alt);
        let md = if rel.external {
            format!("![{alt}]({})", rel.target)
        } else {
            let path = part_path(&rel.target);
            match read_binary(self.archive, &path) {
                Ok(data) => {
                    let mime = image_mime(&path, &data);
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
                    format!("![{alt}](data:{mime};base64,{encoded})")
                }
                Err(e) => {
                    self.messages
                        .push(format!("Image '{path}' could not be read: {e}"));
                    return;
                }
            }
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.push(Styled::Raw, &md);
        }
    }

    fn finish(self) -> EngineOutput {
        EngineOutput {
            markdown: join_blocks(&self.blocks),
            messages: self.messages,
        }
    }
}

/// MIME type of an embedded picture, from its extension or its bytes.
fn image_mime(path: &str, data: &[u8]) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "emf" => "image/x-emf",
        "wmf" => "image/x-wmf",
        _ => image::guess_format(data)
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream"),
    }
}

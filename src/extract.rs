//! Text extraction for uploaded course files (PDF, PPTX).
//!
//! The extractor turns a stored file into plain UTF-8 text for the prompt.
//! PDFs are read page by page; presentations slide by slide, shape by
//! shape. Any other media type (images included) yields empty text rather
//! than an error. Parse failures surface as [`ExtractError`] so the caller
//! can treat that one file as empty and carry on.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Separator between pages of a PDF.
pub const PAGE_SEPARATOR: &str = "\n";
/// Separator between slides of a presentation.
pub const SLIDE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads the file at `path` and extracts its text according to `media_type`.
///
/// Unsupported types return `Ok("")` without touching the file.
pub fn extract_file(media_type: &str, path: &Path) -> Result<String, ExtractError> {
    if !is_supported(media_type) {
        return Ok(String::new());
    }
    let bytes = std::fs::read(path)?;
    extract_text(&bytes, media_type)
}

/// Extracts plain text from in-memory file bytes.
pub fn extract_text(bytes: &[u8], media_type: &str) -> Result<String, ExtractError> {
    match media_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_PPTX => extract_pptx(bytes),
        _ => Ok(String::new()),
    }
}

pub fn is_supported(media_type: &str) -> bool {
    matches!(media_type, MIME_PDF | MIME_PPTX)
}

/// Guesses a media type from a filename extension.
pub fn media_type_for_filename(filename: &str) -> &'static str {
    match crate::blob::file_extension(filename).as_deref() {
        Some("pdf") => MIME_PDF,
        Some("pptx") => MIME_PPTX,
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        _ => MIME_OCTET_STREAM,
    }
}

/// Resolves the media type to record for an upload: the declared type,
/// unless it is missing or generic.
pub fn resolve_media_type(declared: Option<&str>, filename: &str) -> String {
    match declared.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != MIME_OCTET_STREAM => {
            // Drop parameters such as `; charset=binary`.
            ct.split(';')
                .next()
                .unwrap_or(ct)
                .trim()
                .to_ascii_lowercase()
        }
        _ => media_type_for_filename(filename).to_string(),
    }
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    // `get_pages` is keyed by 1-based page number, so iteration is page order.
    let pages: Vec<String> = doc
        .get_pages()
        .keys()
        .map(|&number| page_text(&doc, number))
        .collect();
    Ok(pages.join(PAGE_SEPARATOR))
}

/// Text of one page; an unreadable page contributes an empty string.
fn page_text(doc: &lopdf::Document, number: u32) -> String {
    match doc.extract_text(&[number]) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::debug!(page = number, error = %e, "no extractable text on PDF page");
            String::new()
        }
    }
}

// ============ PPTX ============

/// Capability interface for anything placed on a slide.
///
/// Only shapes that carry a text frame contribute text; pictures, charts,
/// and tables answer `false` to [`has_text_frame`](SlideShape::has_text_frame).
pub trait SlideShape {
    fn has_text_frame(&self) -> bool;
    /// Paragraphs of the text frame joined by newlines.
    fn text(&self) -> String;
}

/// An `<p:sp>` shape: text boxes, titles, placeholders, autoshapes.
#[derive(Debug, Default)]
pub struct AutoShape {
    text_frame: Option<Vec<String>>,
}

impl SlideShape for AutoShape {
    fn has_text_frame(&self) -> bool {
        self.text_frame.is_some()
    }

    fn text(&self) -> String {
        self.text_frame
            .as_ref()
            .map(|paragraphs| paragraphs.join("\n"))
            .unwrap_or_default()
    }
}

/// An `<p:pic>` image.
#[derive(Debug, Default)]
pub struct Picture;

impl SlideShape for Picture {
    fn has_text_frame(&self) -> bool {
        false
    }

    fn text(&self) -> String {
        String::new()
    }
}

/// An `<p:graphicFrame>`: tables, charts, diagrams.
#[derive(Debug, Default)]
pub struct GraphicFrame;

impl SlideShape for GraphicFrame {
    fn has_text_frame(&self) -> bool {
        false
    }

    fn text(&self) -> String {
        String::new()
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Slide number from an archive entry name such as `ppt/slides/slide12.xml`.
fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

const PRESENTATION_PART: &str = "ppt/presentation.xml";
const PRESENTATION_RELS: &str = "ppt/_rels/presentation.xml.rels";

/// Slide part names in the order the deck presents them.
///
/// `<p:sldIdLst>` in the presentation part is authoritative; part names
/// only reflect creation order. Archives without a presentation part fall
/// back to numeric part order.
fn slide_parts(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let has = |part: &str| names.iter().any(|n| n == part);

    if has(PRESENTATION_PART) && has(PRESENTATION_RELS) {
        let rels = read_zip_entry_bounded(archive, PRESENTATION_RELS, MAX_XML_ENTRY_BYTES)?;
        let targets = parse_relationship_targets(&rels)?;
        let presentation =
            read_zip_entry_bounded(archive, PRESENTATION_PART, MAX_XML_ENTRY_BYTES)?;
        let order = parse_slide_id_list(&presentation)?;
        return Ok(order
            .iter()
            .filter_map(|rel_id| targets.get(rel_id))
            .filter(|part| has(part))
            .cloned()
            .collect());
    }

    let mut numbered: Vec<(u32, String)> = names
        .into_iter()
        .filter_map(|n| slide_number(&n).map(|num| (num, n)))
        .collect();
    numbered.sort_by_key(|(num, _)| *num);
    Ok(numbered.into_iter().map(|(_, n)| n).collect())
}

/// Archive part name for a relationship target of the presentation part.
fn resolve_part(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("ppt/{}", target.trim_start_matches("./")),
    }
}

/// `Id -> part name` for every `<Relationship>` in a rels part.
fn parse_relationship_targets(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut targets = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if local_name_is(&e, b"Relationship") => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    let value = attr
                        .unescape_value()
                        .map_err(|e| ExtractError::Ooxml(e.to_string()))?
                        .into_owned();
                    match attr.key.as_ref() {
                        b"Id" => id = Some(value),
                        b"Target" => target = Some(value),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, resolve_part(&target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Relationship ids of `<p:sldId r:id="...">` entries, in list order.
fn parse_slide_id_list(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut ids = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if local_name_is(&e, b"sldId") => {
                // The unprefixed `id` is the numeric slide id; `r:id` names the part.
                for attr in e.attributes().flatten() {
                    if attr.key.prefix().is_some() && attr.key.local_name().as_ref() == b"id" {
                        let value = attr
                            .unescape_value()
                            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                        ids.push(value.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(ids)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let slides = slide_parts(&mut archive)?;

    let mut blocks = Vec::new();
    for (index, name) in slides.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name, MAX_XML_ENTRY_BYTES)?;
        let shapes = parse_slide_shapes(&xml)?;
        let body = slide_text(&shapes);
        if !body.is_empty() {
            blocks.push(format!("SLIDE {}:\n{}", index + 1, body));
        }
    }
    Ok(blocks.join(SLIDE_SEPARATOR))
}

/// Non-empty text of every text-bearing shape, in shape order.
pub fn slide_text(shapes: &[Box<dyn SlideShape>]) -> String {
    shapes
        .iter()
        .filter(|s| s.has_text_frame())
        .map(|s| s.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Where the reader currently is inside a `<p:sp>`.
#[derive(Default)]
struct ShapeCursor {
    shape: AutoShape,
    in_text_body: bool,
    paragraph: Option<String>,
    in_run_text: bool,
}

fn local_name_is(e: &BytesStart<'_>, name: &[u8]) -> bool {
    e.local_name().as_ref() == name
}

/// Parses a slide part into its shapes, in document order.
///
/// Group shapes are flattened: their children appear where the group is.
fn parse_slide_shapes(xml: &[u8]) -> Result<Vec<Box<dyn SlideShape>>, ExtractError> {
    let mut shapes: Vec<Box<dyn SlideShape>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<ShapeCursor> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match current.as_mut() {
                    None => match name.as_ref() {
                        b"sp" => current = Some(ShapeCursor::default()),
                        b"pic" => shapes.push(Box::new(Picture)),
                        b"graphicFrame" => shapes.push(Box::new(GraphicFrame)),
                        _ => {}
                    },
                    Some(cur) => match name.as_ref() {
                        b"txBody" => {
                            cur.in_text_body = true;
                            cur.shape.text_frame.get_or_insert_with(Vec::new);
                        }
                        b"p" if cur.in_text_body => cur.paragraph = Some(String::new()),
                        b"t" if cur.paragraph.is_some() => cur.in_run_text = true,
                        _ => {}
                    },
                }
            }
            Ok(Event::Empty(e)) => match current.as_mut() {
                None if local_name_is(&e, b"pic") => shapes.push(Box::new(Picture)),
                None => {}
                Some(cur) => {
                    if cur.in_text_body && cur.paragraph.is_none() && local_name_is(&e, b"p") {
                        if let Some(frame) = cur.shape.text_frame.as_mut() {
                            frame.push(String::new());
                        }
                    } else if local_name_is(&e, b"br") {
                        if let Some(p) = cur.paragraph.as_mut() {
                            p.push('\n');
                        }
                    }
                }
            },
            Ok(Event::Text(te)) => {
                if let Some(cur) = current.as_mut() {
                    if cur.in_run_text {
                        let text = te
                            .unescape()
                            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                        if let Some(p) = cur.paragraph.as_mut() {
                            p.push_str(&text);
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let mut shape_done = false;
                if let Some(cur) = current.as_mut() {
                    match e.local_name().as_ref() {
                        b"t" => cur.in_run_text = false,
                        b"p" if cur.in_text_body => {
                            if let (Some(p), Some(frame)) =
                                (cur.paragraph.take(), cur.shape.text_frame.as_mut())
                            {
                                frame.push(p);
                            }
                        }
                        b"txBody" => cur.in_text_body = false,
                        b"sp" => shape_done = true,
                        _ => {}
                    }
                }
                if shape_done {
                    if let Some(done) = current.take() {
                        shapes.push(Box::new(done.shape));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(shapes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn slide_xml(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" \
             xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\">\
             <p:cSld><p:spTree>{}</p:spTree></p:cSld></p:sld>",
            body
        )
    }

    fn text_shape(paragraphs: &[&str]) -> String {
        let ps: String = paragraphs
            .iter()
            .map(|p| format!("<a:p><a:r><a:t>{}</a:t></a:r></a:p>", p))
            .collect();
        format!(
            "<p:sp><p:nvSpPr><p:cNvPr id=\"2\" name=\"T\"/></p:nvSpPr>\
             <p:txBody><a:bodyPr/>{}</p:txBody></p:sp>",
            ps
        )
    }

    fn pptx(slides: &[(&str, String)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, xml) in slides {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(xml.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_media_type_is_empty_not_error() {
        assert_eq!(extract_text(b"\x89PNG", "image/png").unwrap(), "");
        assert_eq!(
            extract_file("image/png", Path::new("/definitely/not/here.png")).unwrap(),
            ""
        );
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_pptx() {
        let err = extract_text(b"not a zip", MIME_PPTX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = extract_file(MIME_PDF, Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }

    /// A deck whose `sldIdLst` presents `order` (part names) in that order.
    fn ordered_deck(slides: &[(&str, String)], order: &[&str]) -> Vec<u8> {
        let rels: String = order
            .iter()
            .enumerate()
            .map(|(i, part)| {
                format!(
                    "<Relationship Id=\"rId{}\" \
                     Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide\" \
                     Target=\"{}\"/>",
                    i + 10,
                    part.trim_start_matches("ppt/")
                )
            })
            .collect();
        let ids: String = (0..order.len())
            .map(|i| format!("<p:sldId id=\"{}\" r:id=\"rId{}\"/>", 256 + i, i + 10))
            .collect();
        let presentation = format!(
            "<p:presentation \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\" \
             xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\">\
             <p:sldIdLst>{}</p:sldIdLst></p:presentation>",
            ids
        );
        let rels = format!(
            "<Relationships \
             xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">{}\
             </Relationships>",
            rels
        );

        let mut parts: Vec<(&str, String)> = slides.to_vec();
        parts.push((PRESENTATION_PART, presentation));
        parts.push((PRESENTATION_RELS, rels));
        pptx(&parts)
    }

    #[test]
    fn reordered_deck_follows_presentation_order() {
        let deck = ordered_deck(
            &[
                ("ppt/slides/slide1.xml", slide_xml(&text_shape(&["Conclusion"]))),
                ("ppt/slides/slide2.xml", slide_xml(&text_shape(&["Title"]))),
            ],
            &["ppt/slides/slide2.xml", "ppt/slides/slide1.xml"],
        );
        assert_eq!(
            extract_text(&deck, MIME_PPTX).unwrap(),
            "SLIDE 1:\nTitle\n\nSLIDE 2:\nConclusion"
        );
    }

    #[test]
    fn parts_outside_the_slide_list_are_ignored() {
        let deck = ordered_deck(
            &[
                ("ppt/slides/slide1.xml", slide_xml("")),
                ("ppt/slides/slide2.xml", slide_xml(&text_shape(&["Orphan"]))),
                ("ppt/slides/slide3.xml", slide_xml(&text_shape(&["Summary"]))),
            ],
            &["ppt/slides/slide3.xml", "ppt/slides/slide1.xml"],
        );
        // Empty slides keep their position; unlisted parts are not slides.
        assert_eq!(extract_text(&deck, MIME_PPTX).unwrap(), "SLIDE 1:\nSummary");
    }

    #[test]
    fn relationship_targets_resolve_to_part_names() {
        assert_eq!(resolve_part("slides/slide4.xml"), "ppt/slides/slide4.xml");
        assert_eq!(resolve_part("/ppt/slides/slide4.xml"), "ppt/slides/slide4.xml");
    }

    #[test]
    fn pptx_without_presentation_part_uses_numeric_order() {
        let deck = pptx(&[
            (
                "ppt/slides/slide10.xml",
                slide_xml(&text_shape(&["Ten"])),
            ),
            (
                "ppt/slides/slide2.xml",
                slide_xml(&format!(
                    "{}{}",
                    text_shape(&["Cells", "Have membranes"]),
                    text_shape(&["Footnote"])
                )),
            ),
            ("ppt/slides/slide1.xml", slide_xml(&text_shape(&["Intro"]))),
        ]);

        let text = extract_text(&deck, MIME_PPTX).unwrap();
        assert_eq!(
            text,
            "SLIDE 1:\nIntro\n\nSLIDE 2:\nCells\nHave membranes\nFootnote\n\nSLIDE 3:\nTen"
        );
    }

    #[test]
    fn shapes_without_text_frames_are_skipped() {
        let body = format!(
            "<p:pic><p:nvPicPr><p:cNvPr id=\"3\" name=\"Img\"/></p:nvPicPr></p:pic>\
             <p:sp><p:nvSpPr><p:cNvPr id=\"4\" name=\"Line\"/></p:nvSpPr></p:sp>\
             <p:graphicFrame><a:graphic><a:graphicData><a:tbl><a:tr><a:tc><a:txBody><a:p><a:r><a:t>cell</a:t></a:r></a:p></a:txBody></a:tc></a:tr></a:tbl></a:graphicData></a:graphic></p:graphicFrame>\
             {}",
            text_shape(&["Kept"])
        );
        let shapes = parse_slide_shapes(slide_xml(&body).as_bytes()).unwrap();
        assert_eq!(shapes.len(), 4);
        assert!(!shapes[0].has_text_frame());
        assert!(!shapes[1].has_text_frame());
        assert!(!shapes[2].has_text_frame());
        assert!(shapes[3].has_text_frame());
        assert_eq!(slide_text(&shapes), "Kept");
    }

    #[test]
    fn runs_are_concatenated_and_entities_unescaped() {
        let body = "<p:sp><p:txBody><a:p><a:r><a:t>Mitosis &amp; </a:t></a:r>\
                    <a:r><a:t>meiosis</a:t></a:r></a:p><a:p/></p:txBody></p:sp>";
        let shapes = parse_slide_shapes(slide_xml(body).as_bytes()).unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].text(), "Mitosis & meiosis\n");
        assert_eq!(slide_text(&shapes), "Mitosis & meiosis");
    }

    #[test]
    fn slides_without_text_are_omitted() {
        let deck = pptx(&[
            ("ppt/slides/slide1.xml", slide_xml("")),
            ("ppt/slides/slide2.xml", slide_xml(&text_shape(&["Only"]))),
        ]);
        assert_eq!(extract_text(&deck, MIME_PPTX).unwrap(), "SLIDE 2:\nOnly");
    }

    #[test]
    fn media_type_resolution() {
        assert_eq!(resolve_media_type(Some("application/pdf"), "x.bin"), MIME_PDF);
        assert_eq!(resolve_media_type(Some(MIME_OCTET_STREAM), "deck.PPTX"), MIME_PPTX);
        assert_eq!(resolve_media_type(None, "photo.jpeg"), "image/jpeg");
        assert_eq!(
            resolve_media_type(Some("application/pdf; charset=binary"), "a"),
            MIME_PDF
        );
        assert_eq!(resolve_media_type(Some("Application/PDF"), "a"), MIME_PDF);
        assert_eq!(media_type_for_filename("notes"), MIME_OCTET_STREAM);
    }

    #[test]
    fn slide_numbers_parse_only_slide_parts() {
        assert_eq!(slide_number("ppt/slides/slide7.xml"), Some(7));
        assert_eq!(slide_number("ppt/slides/_rels/slide7.xml.rels"), None);
        assert_eq!(slide_number("ppt/slideLayouts/slideLayout1.xml"), None);
    }
}

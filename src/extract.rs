//! Plain-text extraction for every supported [`DocumentFormat`].
//!
//! Text and Markdown are decoded (UTF-8, then UTF-16 with a BOM, then
//! Latin-1). PDF goes through `pdf-extract`; DOCX, PPTX and XLSX are read
//! as ZIP archives of XML parts. Extraction never panics: malformed input
//! returns an [`ExtractError`] and the loader skips the document.

use std::fmt;
use std::io::{Cursor, Read};

use docfence_core::models::DocumentFormat;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Upper bound on the inflated size of any one XML part.
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;
/// Worksheets read per workbook.
const MAX_SHEETS: usize = 100;
/// Cell values kept per worksheet.
const MAX_CELLS_PER_SHEET: usize = 100_000;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unreadable pdf: {0}")]
    Pdf(String),
    #[error("unreadable office document: {0}")]
    Ooxml(String),
    #[error("undecodable text: {0}")]
    Encoding(String),
}

fn ooxml(e: impl fmt::Display) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

/// Extract plain UTF-8 text from `bytes` in the given format.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    match format {
        DocumentFormat::Text | DocumentFormat::Markdown => decode_text(bytes),
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::Pptx => extract_pptx(bytes),
        DocumentFormat::Xlsx => extract_xlsx(bytes),
    }
}

fn decode_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Ok(s.to_string());
    }
    let utf16 = |rest: &[u8], be: bool| -> Result<String, ExtractError> {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|p| {
                if be {
                    u16::from_be_bytes([p[0], p[1]])
                } else {
                    u16::from_le_bytes([p[0], p[1]])
                }
            })
            .collect();
        String::from_utf16(&units).map_err(|e| ExtractError::Encoding(e.to_string()))
    };
    match bytes {
        [0xFF, 0xFE, rest @ ..] => utf16(rest, false),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, true),
        _ if bytes.contains(&0) => Err(ExtractError::Encoding("binary content".to_string())),
        // Latin-1 maps every byte to the code point of the same value.
        _ => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// An Office Open XML package: a ZIP archive of XML parts.
struct Package<'a> {
    zip: zip::ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> Package<'a> {
    fn open(bytes: &'a [u8]) -> Result<Self, ExtractError> {
        let zip = zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml)?;
        Ok(Self { zip })
    }

    fn has_part(&self, name: &str) -> bool {
        self.zip.file_names().any(|n| n == name)
    }

    fn part(&mut self, name: &str) -> Result<Vec<u8>, ExtractError> {
        let entry = self
            .zip
            .by_name(name)
            .map_err(|e| ExtractError::Ooxml(format!("part {}: {}", name, e)))?;
        let mut xml = Vec::new();
        entry
            .take(MAX_PART_BYTES + 1)
            .read_to_end(&mut xml)
            .map_err(ooxml)?;
        if xml.len() as u64 > MAX_PART_BYTES {
            return Err(ExtractError::Ooxml(format!(
                "part {} inflates past {} bytes",
                name, MAX_PART_BYTES
            )));
        }
        Ok(xml)
    }

    /// Names of the `<prefix><n>.xml` parts, ordered by `n`.
    fn numbered_parts(&self, prefix: &str) -> Vec<String> {
        let mut parts: Vec<(u32, String)> = self
            .zip
            .file_names()
            .filter_map(|name| {
                let n = name.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
                Some((n, name.to_string()))
            })
            .collect();
        parts.sort();
        parts.into_iter().map(|(_, name)| name).collect()
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut package = Package::open(bytes)?;
    paragraph_text(&package.part("word/document.xml")?)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut package = Package::open(bytes)?;
    let mut slides = Vec::new();
    for name in package.numbered_parts("ppt/slides/slide") {
        let text = paragraph_text(&package.part(&name)?)?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut package = Package::open(bytes)?;
    let shared = if package.has_part("xl/sharedStrings.xml") {
        shared_strings(&package.part("xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };
    let mut sheets = Vec::new();
    for name in package
        .numbered_parts("xl/worksheets/sheet")
        .into_iter()
        .take(MAX_SHEETS)
    {
        let text = sheet_text(&package.part(&name)?, &shared)?;
        if !text.is_empty() {
            sheets.push(text);
        }
    }
    Ok(sheets.join("\n\n"))
}

/// Concatenate the text of every `<*:t>` run, ending each `<*:p>` paragraph
/// with a blank line so the chunker sees paragraph boundaries. Works for both
/// WordprocessingML (`w:`) and DrawingML (`a:`) parts.
fn paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_run = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(ooxml)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_run = true,
            Event::Text(t) if in_run => out.push_str(&t.unescape().map_err(ooxml)?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_run = false,
                b"p" if !out.is_empty() && !out.ends_with("\n\n") => out.push_str("\n\n"),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// One string per `<si>` item; rich-text runs inside an item are joined.
fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut item: Option<String> = None;
    let mut in_run = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(ooxml)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => item = Some(String::new()),
                b"t" => in_run = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_run => {
                if let Some(s) = item.as_mut() {
                    s.push_str(&t.unescape().map_err(ooxml)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_run = false,
                b"si" => strings.extend(item.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values of one worksheet in document order. Shared-string cells are
/// resolved through `shared`; inline strings and literal values are kept as
/// written.
fn sheet_text(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut is_shared = false;
    let mut in_value = false;
    while cells.len() < MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf).map_err(ooxml)? {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                is_shared = e
                    .attributes()
                    .flatten()
                    .any(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s");
            }
            Event::Start(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => in_value = true,
            Event::Text(t) if in_value => {
                let raw = t.unescape().map_err(ooxml)?;
                let value = raw.trim();
                if is_shared {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                        cells.push(s.clone());
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
            }
            Event::End(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => in_value = false,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_text_passes_through() {
        let out = extract_text("\u{feff}héllo".as_bytes(), DocumentFormat::Text).unwrap();
        assert_eq!(out, "héllo");
    }

    #[test]
    fn utf16_with_bom_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE];
        for u in "hi".encode_utf16() {
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        assert_eq!(extract_text(&bytes, DocumentFormat::Markdown).unwrap(), "hi");
    }

    #[test]
    fn latin1_fallback_and_binary_rejection() {
        assert_eq!(decode_text(&[0x63, 0x61, 0x66, 0xE9]).unwrap(), "café");
        assert!(matches!(
            decode_text(&[0xC3, 0x00, 0x01]),
            Err(ExtractError::Encoding(_))
        ));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    fn package(parts: &[(&str, &str)]) -> Vec<u8> {
        use std::io::Write;
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, xml) in parts {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(xml.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn docx(xml_body: &str) -> Vec<u8> {
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            xml_body
        );
        package(&[("word/document.xml", xml.as_str())])
    }

    #[test]
    fn docx_paragraphs_become_blank_line_separated() {
        let bytes = docx(
            "<w:p><w:r><w:t>first</w:t></w:r><w:r><w:t>half</w:t></w:r></w:p><w:p><w:r><w:t>second</w:t></w:r></w:p>",
        );
        let text = extract_text(&bytes, DocumentFormat::Docx).unwrap();
        assert_eq!(text, "firsthalf\n\nsecond");
    }

    #[test]
    fn docx_without_document_part_is_error() {
        let bytes = package(&[("other.xml", "<x/>")]);
        assert!(matches!(
            extract_text(&bytes, DocumentFormat::Docx),
            Err(ExtractError::Ooxml(_))
        ));
    }

    #[test]
    fn pptx_slides_follow_numeric_order() {
        let slide = |text: &str| {
            format!(
                "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>",
                text
            )
        };
        let bytes = package(&[
            ("ppt/slides/slide10.xml", slide("ten").as_str()),
            ("ppt/slides/slide2.xml", slide("two").as_str()),
            ("ppt/slides/_rels/slide2.xml.rels", "<Relationships/>"),
        ]);
        let text = extract_text(&bytes, DocumentFormat::Pptx).unwrap();
        assert_eq!(text, "two\n\nten");
    }

    #[test]
    fn xlsx_resolves_shared_inline_and_literal_cells() {
        let bytes = package(&[
            (
                "xl/sharedStrings.xml",
                "<sst><si><t>alpha</t></si><si/><si><r><t>be</t></r><r><t>ta</t></r></si></sst>",
            ),
            (
                "xl/worksheets/sheet1.xml",
                "<worksheet><sheetData><row>\
                 <c r=\"A1\" t=\"s\"><v>2</v></c>\
                 <c r=\"B1\"><v>42</v></c>\
                 <c r=\"C1\" t=\"inlineStr\"><is><t>gamma</t></is></c>\
                 <c r=\"D1\" t=\"s\"><v>0</v></c>\
                 <c r=\"E1\" t=\"s\"><v>99</v></c>\
                 </row></sheetData></worksheet>",
            ),
            (
                "xl/worksheets/sheet2.xml",
                "<worksheet><sheetData><row><c t=\"str\"><f>A1</f><v>delta</v></c></row></sheetData></worksheet>",
            ),
        ]);
        let text = extract_text(&bytes, DocumentFormat::Xlsx).unwrap();
        assert_eq!(text, "beta 42 gamma alpha\n\ndelta");
    }

    #[test]
    fn xlsx_without_shared_strings_still_reads_values() {
        let bytes = package(&[(
            "xl/worksheets/sheet1.xml",
            "<worksheet><sheetData><row><c><v>7</v></c></row></sheetData></worksheet>",
        )]);
        assert_eq!(extract_text(&bytes, DocumentFormat::Xlsx).unwrap(), "7");
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", DocumentFormat::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }
}

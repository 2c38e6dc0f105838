use crate::error::IngestError;
use crate::models::Document;
use lopdf::Document as PdfDocument;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

/// Largest `word/document.xml` we are willing to inflate.
const MAX_DOCX_XML_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

pub fn load_document(path: &Path) -> Result<Document, IngestError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    let text = match DocumentFormat::from_path(path) {
        Some(DocumentFormat::Pdf) => extract_pdf_text(path)?,
        Some(DocumentFormat::Docx) => extract_docx_text(&fs::read(path)?)?,
        Some(DocumentFormat::Text) => String::from_utf8_lossy(&fs::read(path)?).into_owned(),
        None => return Err(IngestError::UnsupportedFormat(path.display().to_string())),
    };

    Ok(Document::new(name, text))
}

pub fn extract_pdf_text(path: &Path) -> Result<String, IngestError> {
    let document =
        PdfDocument::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for page_no in document.get_pages().into_keys() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| IngestError::PdfParse(error.to_string()))?;
        if !text.trim().is_empty() {
            pages.push(text);
        }
    }

    if pages.is_empty() {
        return Err(IngestError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }

    Ok(pages.join("\n"))
}

/// Text runs of `word/document.xml`, one line per paragraph.
pub fn extract_docx_text(bytes: &[u8]) -> Result<String, IngestError> {
    extract_docx_text_limited(bytes, MAX_DOCX_XML_BYTES)
}

fn extract_docx_text_limited(bytes: &[u8], max_xml_bytes: u64) -> Result<String, IngestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| IngestError::Docx(error.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|error| IngestError::Docx(error.to_string()))?;

    let mut xml = Vec::new();
    entry.take(max_xml_bytes + 1).read_to_end(&mut xml)?;
    if xml.len() as u64 > max_xml_bytes {
        return Err(IngestError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut out = String::new();
    let mut in_text_run = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"t" => {
                in_text_run = true;
            }
            Ok(Event::Text(text)) if in_text_run => {
                let text = text
                    .unescape()
                    .map_err(|error| IngestError::Docx(error.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(element)) => match element.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(IngestError::Docx(error.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn format_is_detected_case_insensitively() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("Act.PDF")),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("brief.docx")),
            Some(DocumentFormat::Docx)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("notes.md")), None);
        assert_eq!(DocumentFormat::from_path(Path::new("README")), None);
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Section 5.</w:t></w:r><w:r><w:t xml:space="preserve"> Bail &amp; bonds</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

        let text = extract_docx_text(&docx_bytes(xml)).unwrap();
        assert_eq!(text, "Section 5. Bail & bonds\nSecond paragraph\n");
    }

    #[test]
    fn docx_size_limit_is_inclusive() {
        let xml = "<w:document><w:body><w:p><w:r><w:t>Held</w:t></w:r></w:p></w:body></w:document>";
        let bytes = docx_bytes(xml);
        let len = xml.len() as u64;

        let text = extract_docx_text_limited(&bytes, len).unwrap();
        assert_eq!(text, "Held\n");

        let result = extract_docx_text_limited(&bytes, len - 1);
        assert!(matches!(result, Err(IngestError::Docx(_))));
    }

    #[test]
    fn invalid_docx_is_an_error() {
        let result = extract_docx_text(b"not a zip archive");
        assert!(matches!(result, Err(IngestError::Docx(_))));
    }

    #[test]
    fn text_files_load_with_their_file_name() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("judgement.txt");
        fs::write(&path, b"The appeal is allowed.\n")?;

        let document = load_document(&path)?;
        assert_eq!(document.source_id, "judgement.txt");
        assert_eq!(document.text, "The appeal is allowed.\n");
        Ok(())
    }

    #[test]
    fn unsupported_extension_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scan.png");
        fs::write(&path, b"\x89PNG")?;

        let result = load_document(&path);
        assert!(matches!(result, Err(IngestError::UnsupportedFormat(_))));
        Ok(())
    }

    #[test]
    fn broken_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = load_document(&path);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }
}

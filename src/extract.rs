//! Text extraction for uploaded documents (plain text, EPUB).
//!
//! The loader is pipeline-layer: callers supply raw bytes plus a
//! [`DocumentFormat`]; this module returns plain UTF-8 text. EPUB containers
//! are spilled to a scoped temporary file and parsed from disk; the spill is
//! removed on every exit path, including parse failures.

use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Prefix for EPUB spill files in the OS temp directory.
const SPILL_PREFIX: &str = "lectern-epub-";

/// Document formats accepted by [`extract_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Epub,
}

impl DocumentFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))?;
        ext.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::PlainText => "text",
            DocumentFormat::Epub => "epub",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" | "plain" | "md" | "markdown" => Ok(DocumentFormat::PlainText),
            "epub" => Ok(DocumentFormat::Epub),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Extract plain text from document bytes.
///
/// Plain text must be valid UTF-8. EPUB extraction walks the container in
/// reading order: `META-INF/container.xml` names the OPF package, the OPF
/// spine orders the XHTML documents, and each document's visible text is
/// pulled out with bounded entry reads. Containers with a damaged or missing
/// spine fall back to name-sorted HTML entries.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String> {
    match format {
        DocumentFormat::PlainText => std::str::from_utf8(bytes)
            .map(|s| s.to_string())
            .map_err(|e| Error::Extraction(format!("document is not valid UTF-8: {}", e))),
        DocumentFormat::Epub => extract_epub(bytes),
    }
}

fn extract_epub(bytes: &[u8]) -> Result<String> {
    // Spill to a named temp file; the guard removes it when this function
    // returns, whether extraction succeeded or not.
    let mut spill = tempfile::Builder::new()
        .prefix(SPILL_PREFIX)
        .tempfile()
        .map_err(|e| Error::Extraction(format!("failed to create spill file: {}", e)))?;
    spill
        .write_all(bytes)
        .map_err(|e| Error::Extraction(format!("failed to write spill file: {}", e)))?;
    let file = spill
        .reopen()
        .map_err(|e| Error::Extraction(format!("failed to reopen spill file: {}", e)))?;

    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::Extraction(format!("not a valid EPUB container: {}", e)))?;

    let text = match spine_document_names(&mut archive) {
        Ok(names) if !names.is_empty() => collect_document_text(&mut archive, &names)?,
        _ => {
            // Damaged metadata. Fall back to every HTML-ish entry in name
            // order, the same way slide decks are walked without a manifest.
            let names = sorted_html_entry_names(&archive);
            collect_document_text(&mut archive, &names)?
        }
    };

    if text.is_empty() {
        return Err(Error::Extraction(
            "EPUB container has no readable text documents".to_string(),
        ));
    }

    Ok(text)
}

/// Resolve the OPF package and return its spine document entry names in
/// reading order.
fn spine_document_names<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> Result<Vec<String>> {
    let container_xml =
        read_zip_entry_bounded(archive, "META-INF/container.xml", MAX_XML_ENTRY_BYTES)?;
    let opf_path = parse_container_rootfile(&container_xml)?;

    let opf_xml = read_zip_entry_bounded(archive, &opf_path, MAX_XML_ENTRY_BYTES)?;
    let opf_dir = opf_path
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or("");

    let (manifest, spine) = parse_opf(&opf_xml)?;

    let mut names = Vec::new();
    for idref in &spine {
        if let Some((href, media_type)) = manifest.get(idref) {
            if media_type == "application/xhtml+xml" || media_type == "text/html" {
                names.push(resolve_href(opf_dir, href));
            }
        }
    }
    Ok(names)
}

/// Pull the `full-path` attribute of the first `rootfile` element out of
/// `META-INF/container.xml`.
fn parse_container_rootfile(xml: &[u8]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"full-path" {
                            return Ok(String::from_utf8_lossy(&attr.value).into_owned());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Err(Error::Extraction(
        "container.xml has no rootfile entry".to_string(),
    ))
}

/// Parse the OPF package: manifest id → (href, media-type), plus the spine's
/// idref order.
#[allow(clippy::type_complexity)]
fn parse_opf(xml: &[u8]) -> Result<(HashMap<String, (String, String)>, Vec<String>)> {
    let mut manifest: HashMap<String, (String, String)> = HashMap::new();
    let mut spine: Vec<String> = Vec::new();

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                match e.local_name().as_ref() {
                    b"item" => {
                        let mut id = None;
                        let mut href = None;
                        let mut media_type = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"id" => id = Some(String::from_utf8_lossy(&attr.value).into_owned()),
                                b"href" => {
                                    href = Some(String::from_utf8_lossy(&attr.value).into_owned())
                                }
                                b"media-type" => {
                                    media_type =
                                        Some(String::from_utf8_lossy(&attr.value).into_owned())
                                }
                                _ => {}
                            }
                        }
                        if let (Some(id), Some(href), Some(media_type)) = (id, href, media_type) {
                            manifest.insert(id, (href, media_type));
                        }
                    }
                    b"itemref" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"idref" {
                                spine.push(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok((manifest, spine))
}

/// Join an OPF-relative href onto the OPF's directory.
fn resolve_href(opf_dir: &str, href: &str) -> String {
    let mut parts: Vec<&str> = if opf_dir.is_empty() {
        Vec::new()
    } else {
        opf_dir.split('/').collect()
    };
    for seg in href.split('/') {
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

/// All HTML-ish entry names in the archive, name-sorted.
fn sorted_html_entry_names<R: Read + Seek>(archive: &zip::ZipArchive<R>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.ends_with(".xhtml") || n.ends_with(".html") || n.ends_with(".htm"))
        .map(|s| s.to_string())
        .collect();
    names.sort();
    names
}

/// Extract and concatenate visible text from the given entries, in order.
/// Entries the archive does not actually contain are skipped.
fn collect_document_text<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    names: &[String],
) -> Result<String> {
    let mut out = String::new();
    for name in names {
        if archive.by_name(name).is_err() {
            tracing::debug!(entry = %name, "spine names a missing entry, skipping");
            continue;
        }
        let xml = read_zip_entry_bounded(archive, name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_visible_text(&xml)?;
        if !out.is_empty() && !text.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Extract the visible text of one XHTML document: every text node outside
/// `script`/`style`/`head`, with newlines at block boundaries.
fn extract_visible_text(xml: &[u8]) -> Result<String> {
    const BLOCK_ENDS: &[&[u8]] = &[
        b"p",
        b"div",
        b"li",
        b"h1",
        b"h2",
        b"h3",
        b"h4",
        b"h5",
        b"h6",
        b"blockquote",
        b"tr",
    ];

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"script" | b"style" | b"head") {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"script" | b"style" | b"head") {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if BLOCK_ENDS.contains(&name.as_ref()) && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"br" && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if skip_depth == 0 => {
                let text = te.unescape().unwrap_or_default();
                if !text.is_empty() {
                    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                        out.push(' ');
                    }
                    out.push_str(text.as_ref());
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn read_zip_entry_bounded<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| Error::Extraction(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| Error::Extraction(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(Error::Extraction(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

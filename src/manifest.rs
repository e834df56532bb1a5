//! Smooth Streaming client manifest (`.ismc`) handling.
//!
//! A protected manifest carries a `<Protection>` element directly under the
//! `<SmoothStreamingMedia>` root. Players that see it go looking for a
//! PlayReady license, so once the media is decrypted the element has to go.
//!
//! The element is cut out of the source text using the node ranges reported
//! by `roxmltree`; everything else is written back exactly as it was read.
//! A `<!DOCTYPE>` declaration is accepted and kept.
use std::ops::Range;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Root element of a client manifest.
pub const ROOT_ELEMENT: &str = "SmoothStreamingMedia";

/// Protection declaration element.
pub const PROTECTION_ELEMENT: &str = "Protection";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Text encoding of a manifest file, detected from its byte order mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8 { bom: bool },
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    /// Detect the encoding and return the text with the BOM stripped.
    pub fn decode(data: &[u8]) -> std::result::Result<(Self, String), String> {
        if let Some(rest) = data.strip_prefix(UTF16_LE_BOM) {
            return decode_utf16(rest, LittleEndian::read_u16).map(|s| (TextEncoding::Utf16Le, s));
        }
        if let Some(rest) = data.strip_prefix(UTF16_BE_BOM) {
            return decode_utf16(rest, BigEndian::read_u16).map(|s| (TextEncoding::Utf16Be, s));
        }
        let (bom, rest) = match data.strip_prefix(UTF8_BOM) {
            Some(rest) => (true, rest),
            None => (false, data),
        };
        let text = std::str::from_utf8(rest).map_err(|e| format!("invalid UTF-8: {}", e))?;
        Ok((TextEncoding::Utf8 { bom }, text.to_string()))
    }

    /// Encode `text` back, including the BOM when the source had one.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 { bom } => {
                let mut out = Vec::with_capacity(text.len() + 3);
                if bom {
                    out.extend_from_slice(UTF8_BOM);
                }
                out.extend_from_slice(text.as_bytes());
                out
            }
            TextEncoding::Utf16Le => {
                let mut out = UTF16_LE_BOM.to_vec();
                out.extend(text.encode_utf16().flat_map(|u| u.to_le_bytes()));
                out
            }
            TextEncoding::Utf16Be => {
                let mut out = UTF16_BE_BOM.to_vec();
                out.extend(text.encode_utf16().flat_map(|u| u.to_be_bytes()));
                out
            }
        }
    }
}

fn decode_utf16(data: &[u8], read: fn(&[u8]) -> u16) -> std::result::Result<String, String> {
    if data.len() % 2 != 0 {
        return Err("odd number of bytes in UTF-16 text".to_string());
    }
    let units = data.chunks_exact(2).map(read).collect::<Vec<u16>>();
    String::from_utf16(&units).map_err(|_| "invalid UTF-16".to_string())
}

/// Result of stripping a manifest.
#[derive(Debug, Clone)]
pub struct StrippedManifest {
    /// Manifest text with the protection element removed.
    pub text: String,
    /// Number of `<Protection>` elements removed (normally 0 or 1).
    pub removed: usize,
}

/// Remove every `<Protection>` child of the `<SmoothStreamingMedia>` root.
///
/// Fails when the text is not well-formed XML or the root element is
/// something else. `<Protection>` elements deeper in the tree are left alone.
pub fn strip_protection(xml: &str) -> std::result::Result<StrippedManifest, String> {
    let mut options = roxmltree::ParsingOptions::default();
    options.allow_dtd = true;
    let doc = roxmltree::Document::parse_with_options(xml, options).map_err(|e| e.to_string())?;

    let root = doc.root_element();
    if root.tag_name().name() != ROOT_ELEMENT {
        return Err(format!(
            "root element is <{}>, expected <{}>",
            root.tag_name().name(),
            ROOT_ELEMENT
        ));
    }

    let mut cuts: Vec<Range<usize>> = Vec::new();
    for node in root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == PROTECTION_ELEMENT)
    {
        let mut range = node.range();
        // take the indentation in front of the element with it
        if let Some(prev) = node.prev_sibling() {
            if prev.is_text() && prev.text().is_some_and(|t| t.trim().is_empty()) {
                range.start = prev.range().start;
            }
        }
        cuts.push(range);
    }

    let mut text = String::with_capacity(xml.len());
    let mut pos = 0;
    for cut in cuts.iter() {
        text.push_str(&xml[pos..cut.start]);
        pos = cut.end;
    }
    text.push_str(&xml[pos..]);

    Ok(StrippedManifest {
        text,
        removed: cuts.len(),
    })
}

/// Read the manifest at `input`, strip it and write it to `output`.
///
/// Returns the number of protection elements removed. The output keeps the
/// input's text encoding.
pub fn strip_protection_file(input: &Path, output: &Path) -> Result<usize> {
    let data = std::fs::read(input).map_err(|e| Error::fs(input, e))?;
    let parse_error = |reason: String| Error::ManifestParse {
        path: input.to_path_buf(),
        reason,
    };

    let (encoding, xml) = TextEncoding::decode(&data).map_err(parse_error)?;
    let stripped = strip_protection(&xml).map_err(parse_error)?;

    std::fs::write(output, encoding.encode(&stripped.text)).map_err(|e| Error::fs(output, e))?;
    Ok(stripped.removed)
}

//! Font embedding and text encoding for watermark content streams
//!
//! The built-in font is the base-14 Helvetica with WinAnsiEncoding, which
//! needs no embedding. File fonts are embedded as a Type0 composite font
//! with Identity-H encoding so any glyph of the font can be addressed:
//!
//! - **Type0 font** referencing:
//!   - **CIDFont** (`CIDFontType2` for TrueType outlines, `CIDFontType0` for CFF)
//!     - **FontDescriptor** with the font program in `FontFile2` / `FontFile3`
//!   - **ToUnicode CMap** for the glyphs the watermark uses

use std::collections::BTreeMap;
use std::fmt::Write;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use rustybuzz::ttf_parser::{GlyphId, RawFace, Tag};

use crate::error::{Error, Result};
use crate::font::{FontFile, FontReference};

/// Helvetica advance widths for ASCII 32..=126, in 1/1000 em
const HELVETICA_ASCII_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // space - /
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0 - 9
    278, 278, 584, 584, 584, 556, 1015, // : - @
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A - M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N - Z
    278, 278, 278, 469, 556, 333, // [ - `
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a - m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n - z
    334, 260, 334, 584, // { - ~
];

/// Width used for WinAnsi codes outside the ASCII table
const HELVETICA_DEFAULT_WIDTH: u16 = 556;

/// Map a Unicode char to its WinAnsi (Windows-1252) code
pub fn winansi_code(c: char) -> Option<u8> {
    let code = match c as u32 {
        0x0020..=0x007E => c as u8,
        0x00A0..=0x00FF => c as u8,
        0x20AC => 0x80,
        0x201A => 0x82,
        0x0192 => 0x83,
        0x201E => 0x84,
        0x2026 => 0x85,
        0x2020 => 0x86,
        0x2021 => 0x87,
        0x02C6 => 0x88,
        0x2030 => 0x89,
        0x0160 => 0x8A,
        0x2039 => 0x8B,
        0x0152 => 0x8C,
        0x017D => 0x8E,
        0x2018 => 0x91,
        0x2019 => 0x92,
        0x201C => 0x93,
        0x201D => 0x94,
        0x2022 => 0x95,
        0x2013 => 0x96,
        0x2014 => 0x97,
        0x02DC => 0x98,
        0x2122 => 0x99,
        0x0161 => 0x9A,
        0x203A => 0x9B,
        0x0153 => 0x9C,
        0x017E => 0x9E,
        0x0178 => 0x9F,
        _ => return None,
    };
    Some(code)
}

fn helvetica_width(code: u8) -> u16 {
    match code {
        32..=126 => HELVETICA_ASCII_WIDTHS[(code - 32) as usize],
        _ => HELVETICA_DEFAULT_WIDTH,
    }
}

/// A glyph used by the watermark text
#[derive(Debug, Clone, PartialEq)]
struct UsedGlyph {
    /// Advance width in 1/1000 em
    width: i64,
    /// Text the glyph was shaped from
    text: String,
}

/// Watermark text encoded for a `Tj` operator, with its metrics
#[derive(Debug, Clone)]
pub struct ShapedText {
    encoded: Vec<u8>,
    /// Total advance in 1/1000 em
    advance: i64,
    glyphs: BTreeMap<u16, UsedGlyph>,
}

impl ShapedText {
    /// Encode `text` for `font`
    ///
    /// Characters the font cannot render become `?` (Helvetica) or the
    /// `.notdef` glyph (file fonts); this never fails for coverage reasons.
    pub fn shape(font: &FontReference, text: &str) -> Result<Self> {
        let text: String = text.chars().map(|c| if c.is_control() { ' ' } else { c }).collect();
        match font.file() {
            None => Ok(Self::shape_winansi(&text)),
            Some(file) => Self::shape_file(file, &text),
        }
    }

    fn shape_winansi(text: &str) -> Self {
        let encoded: Vec<u8> = text.chars().map(|c| winansi_code(c).unwrap_or(b'?')).collect();
        let advance = encoded.iter().map(|&b| i64::from(helvetica_width(b))).sum();
        Self {
            encoded,
            advance,
            glyphs: BTreeMap::new(),
        }
    }

    fn shape_file(file: &FontFile, text: &str) -> Result<Self> {
        let face = file
            .face()
            .ok_or_else(|| Error::render(format!("cannot parse font {}", file.path().display())))?;

        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        buffer.guess_segment_properties();
        let shaped = rustybuzz::shape(&face, &[], buffer);

        let units_per_em = i64::from(face.units_per_em()).max(1);
        let mut encoded = Vec::with_capacity(shaped.len() * 2);
        let mut glyphs = BTreeMap::new();
        let mut advance = 0;

        for info in shaped.glyph_infos() {
            let gid = info.glyph_id as u16;
            let width = face
                .glyph_hor_advance(GlyphId(gid))
                .map(|w| i64::from(w) * 1000 / units_per_em)
                .unwrap_or(0);

            encoded.extend_from_slice(&gid.to_be_bytes());
            advance += width;

            let source = text
                .get(info.cluster as usize..)
                .and_then(|rest| rest.chars().next())
                .map(String::from)
                .unwrap_or_default();
            glyphs.entry(gid).or_insert(UsedGlyph { width, text: source });
        }

        Ok(Self {
            encoded,
            advance,
            glyphs,
        })
    }

    /// Rendered width in points at `font_size`
    pub fn width(&self, font_size: f32) -> f32 {
        self.advance as f32 * font_size / 1000.0
    }

    /// Encoded text as a PDF hex string, including the angle brackets
    pub fn hex_string(&self) -> String {
        let mut out = String::with_capacity(self.encoded.len() * 2 + 2);
        out.push('<');
        for byte in &self.encoded {
            let _ = write!(out, "{:02X}", byte);
        }
        out.push('>');
        out
    }
}

/// Add the font dictionary for `font` to `doc`
///
/// File fonts are embedded in full; `shaped` supplies the widths and
/// Unicode mappings of the glyphs the watermark uses.
pub fn embed_font(doc: &mut Document, font: &FontReference, shaped: &ShapedText) -> Result<ObjectId> {
    match font.file() {
        None => Ok(add_helvetica(doc)),
        Some(file) => embed_file_font(doc, file, shaped),
    }
}

/// Whether embedding this font needs PDF 1.6 (OpenType font programs)
pub fn requires_opentype_embedding(font: &FontReference) -> bool {
    font.file()
        .and_then(|file| file.face())
        .map(|face| is_cff(&face))
        .unwrap_or(false)
}

fn add_helvetica(doc: &mut Document) -> ObjectId {
    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Subtype", Object::Name(b"Type1".to_vec()));
    font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
    font.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
    doc.add_object(Object::Dictionary(font))
}

fn is_cff(face: &rustybuzz::Face<'_>) -> bool {
    let raw = face.raw_face();
    raw.table(Tag::from_bytes(b"CFF ")).is_some() || raw.table(Tag::from_bytes(b"CFF2")).is_some()
}

fn embed_file_font(doc: &mut Document, file: &FontFile, shaped: &ShapedText) -> Result<ObjectId> {
    let face = file
        .face()
        .ok_or_else(|| Error::render(format!("cannot parse font {}", file.path().display())))?;
    let cff = is_cff(&face);
    let units_per_em = i64::from(face.units_per_em()).max(1);
    let scale = |v: i16| i64::from(v) * 1000 / units_per_em;
    let base_font = file.name().as_bytes().to_vec();

    // Font program
    let program = if is_collection(file.data()) {
        extract_face(file.data(), 0)?
    } else {
        file.data().to_vec()
    };
    let mut program_dict = Dictionary::new();
    if cff {
        program_dict.set("Subtype", Object::Name(b"OpenType".to_vec()));
    } else {
        program_dict.set("Length1", Object::Integer(program.len() as i64));
    }
    let program_id = doc.add_object(Object::Stream(Stream::new(program_dict, program)));

    // Font descriptor
    let bbox = face.global_bounding_box();
    let mut descriptor = Dictionary::new();
    descriptor.set("Type", Object::Name(b"FontDescriptor".to_vec()));
    descriptor.set("FontName", Object::Name(base_font.clone()));
    descriptor.set("Flags", Object::Integer(4)); // Symbolic
    descriptor.set("FontBBox", Object::Array(vec![
        Object::Integer(scale(bbox.x_min)),
        Object::Integer(scale(bbox.y_min)),
        Object::Integer(scale(bbox.x_max)),
        Object::Integer(scale(bbox.y_max)),
    ]));
    descriptor.set("ItalicAngle", Object::Integer(0));
    descriptor.set("Ascent", Object::Integer(scale(face.ascender())));
    descriptor.set("Descent", Object::Integer(scale(face.descender())));
    descriptor.set(
        "CapHeight",
        Object::Integer(scale(face.capital_height().unwrap_or_else(|| face.ascender()))),
    );
    descriptor.set("StemV", Object::Integer(80));
    let program_key = if cff { "FontFile3" } else { "FontFile2" };
    descriptor.set(program_key, Object::Reference(program_id));
    let descriptor_id = doc.add_object(Object::Dictionary(descriptor));

    // Descendant CIDFont
    let mut cid_font = Dictionary::new();
    cid_font.set("Type", Object::Name(b"Font".to_vec()));
    let subtype: &[u8] = if cff { b"CIDFontType0" } else { b"CIDFontType2" };
    cid_font.set("Subtype", Object::Name(subtype.to_vec()));
    cid_font.set("BaseFont", Object::Name(base_font.clone()));
    cid_font.set("CIDSystemInfo", Object::Dictionary(Dictionary::from_iter(vec![
        ("Registry", Object::String(b"Adobe".to_vec(), StringFormat::Literal)),
        ("Ordering", Object::String(b"Identity".to_vec(), StringFormat::Literal)),
        ("Supplement", Object::Integer(0)),
    ])));
    cid_font.set("FontDescriptor", Object::Reference(descriptor_id));
    cid_font.set("DW", Object::Integer(1000));
    cid_font.set("W", Object::Array(widths_array(shaped)));
    if !cff {
        cid_font.set("CIDToGIDMap", Object::Name(b"Identity".to_vec()));
    }
    let cid_font_id = doc.add_object(Object::Dictionary(cid_font));

    let to_unicode_id = doc.add_object(Stream::new(
        Dictionary::new(),
        to_unicode_cmap(shaped).into_bytes(),
    ));

    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Subtype", Object::Name(b"Type0".to_vec()));
    font.set("BaseFont", Object::Name(base_font));
    font.set("Encoding", Object::Name(b"Identity-H".to_vec()));
    font.set("DescendantFonts", Object::Array(vec![Object::Reference(cid_font_id)]));
    font.set("ToUnicode", Object::Reference(to_unicode_id));
    Ok(doc.add_object(Object::Dictionary(font)))
}

/// Build a CIDFont `W` array: `[gid [w1 w2 ...]]` per run of consecutive glyph ids
fn widths_array(shaped: &ShapedText) -> Vec<Object> {
    let mut result = Vec::new();
    let mut iter = shaped.glyphs.iter().peekable();

    while let Some((&first_gid, first)) = iter.next() {
        let mut widths = vec![Object::Integer(first.width)];
        let mut expected_next = u32::from(first_gid) + 1;

        while let Some(&(&gid, glyph)) = iter.peek() {
            if u32::from(gid) != expected_next {
                break;
            }
            widths.push(Object::Integer(glyph.width));
            expected_next += 1;
            iter.next();
        }

        result.push(Object::Integer(i64::from(first_gid)));
        result.push(Object::Array(widths));
    }

    result
}

/// ToUnicode CMap mapping each used glyph id back to its source text
fn to_unicode_cmap(shaped: &ShapedText) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <FFFF>\n\
         endcodespacerange\n",
    );

    let mapped: Vec<(&u16, &UsedGlyph)> = shaped
        .glyphs
        .iter()
        .filter(|(gid, glyph)| **gid != 0 && !glyph.text.is_empty())
        .collect();

    // bfchar sections hold at most 100 entries
    for chunk in mapped.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for (gid, glyph) in chunk {
            let utf16: String = glyph
                .text
                .encode_utf16()
                .map(|unit| format!("{:04X}", unit))
                .collect();
            let _ = writeln!(cmap, "<{:04X}> <{}>", gid, utf16);
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap
}

fn is_collection(data: &[u8]) -> bool {
    data.starts_with(b"ttcf")
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Re-pack one face of a font collection into a standalone sfnt
///
/// PDF font programs must be single fonts, so the face's tables are copied
/// behind a fresh table directory.
fn extract_face(data: &[u8], index: u32) -> Result<Vec<u8>> {
    let invalid = |what: &str| Error::render(format!("invalid font collection: {}", what));

    let raw = RawFace::parse(data, index).map_err(|e| invalid(&e.to_string()))?;
    let face_offset = read_u32(data, 12 + 4 * index as usize).ok_or_else(|| invalid("header"))? as usize;
    let sfnt_version = data
        .get(face_offset..face_offset + 4)
        .ok_or_else(|| invalid("offset table"))?;

    let records: Vec<_> = raw.table_records.into_iter().collect();
    let num_tables = records.len() as u16;
    let entry_selector = if num_tables == 0 { 0 } else { 15 - num_tables.leading_zeros() as u16 };
    let search_range = (1u16 << entry_selector) * 16;
    let range_shift = num_tables * 16 - search_range.min(num_tables * 16);

    let mut out = Vec::new();
    out.extend_from_slice(sfnt_version);
    out.extend_from_slice(&num_tables.to_be_bytes());
    out.extend_from_slice(&search_range.to_be_bytes());
    out.extend_from_slice(&entry_selector.to_be_bytes());
    out.extend_from_slice(&range_shift.to_be_bytes());

    let mut offset = 12 + 16 * records.len();
    let mut tables = Vec::new();
    for record in &records {
        let start = record.offset as usize;
        let table = data
            .get(start..start + record.length as usize)
            .ok_or_else(|| invalid("table out of bounds"))?;

        out.extend_from_slice(&record.tag.to_bytes());
        out.extend_from_slice(&record.check_sum.to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&record.length.to_be_bytes());

        let padded = (table.len() + 3) & !3;
        offset += padded;
        tables.push((table, padded));
    }

    for (table, padded) in tables {
        out.extend_from_slice(table);
        out.resize(out.len() + padded - table.len(), 0);
    }

    Ok(out)
}

//! Integration tests for the slide watermark library

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use slide_watermark::pdf::{compose, count_pages, extract_metadata, page_box};
use slide_watermark::pipeline::{watermark_pdf, watermark_pdf_with_font};
use slide_watermark::{
    Error, FontReference, LayerRenderer, PageGeometry, WatermarkOptions, WatermarkSpec,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Fonts tried by the tests that need a real TrueType face
const SYSTEM_TTF_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

fn system_ttf() -> Option<PathBuf> {
    SYSTEM_TTF_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

/// Write a PDF with one page per entry of `sizes`, each with a little content
fn build_pdf(path: &Path, sizes: &[(f32, f32)]) {
    let pages: Vec<(f32, f32, Option<i64>)> = sizes.iter().map(|&(w, h)| (w, h, None)).collect();
    build_pdf_pages(path, &pages);
}

/// Like [`build_pdf`], with an optional `/Rotate` per page
fn build_pdf_pages(path: &Path, pages: &[(f32, f32, Option<i64>)]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for (i, &(width, height, rotate)) in pages.iter().enumerate() {
        let content = format!("0 0 1 rg 10 10 {} {} re f\n", 20 + i, 20 + i);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width),
                Object::Real(height),
            ],
            "Contents" => content_id,
        };
        if let Some(degrees) = rotate {
            page.set("Rotate", Object::Integer(degrees));
        }
        let page_id = doc.add_object(page);
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("Failed to write fixture PDF");
}

fn options(text: &str, tiled: bool) -> WatermarkOptions {
    WatermarkOptions {
        text: text.to_string(),
        tiled,
        ..Default::default()
    }
}

fn builtin_spec(text: &str, tiled: bool) -> WatermarkSpec {
    WatermarkSpec::new(&options(text, tiled), FontReference::builtin())
        .expect("Failed to build watermark spec")
}

/// Page ids of a saved document, in page order
fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// Decoded bytes of a stream object
fn stream_bytes(doc: &Document, id: ObjectId) -> Vec<u8> {
    let stream = doc.get_object(id).unwrap().as_stream().unwrap();
    stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone())
}

/// The `Tm` lines of a layer content stream
fn text_matrices(content: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(content)
        .lines()
        .filter(|line| line.ends_with(" Tm"))
        .map(str::to_string)
        .collect()
}

/// The Form XObject registered as /Watermark on a page
fn watermark_xobject(doc: &Document, page_id: ObjectId) -> ObjectId {
    let page = doc.get_dictionary(page_id).unwrap();
    let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
    let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
    xobjects.get(b"Watermark").unwrap().as_reference().unwrap()
}

#[test]
fn test_page_count_and_sizes_preserved() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("deck.pdf");
    let output = temp_dir.path().join("deck-marked.pdf");
    build_pdf(&input, &[(960.0, 540.0); 4]);

    let report = compose(&input, &output, &builtin_spec("CONFIDENTIAL", false))
        .expect("Failed to watermark PDF");

    assert_eq!(report.pages, 4);
    assert_eq!(report.layers, 1);
    assert_eq!(report.font, "Helvetica");
    assert_eq!(count_pages(&output).unwrap(), 4);

    let doc = Document::load(&output).unwrap();
    for page_id in page_ids(&doc) {
        let page = page_box(&doc, page_id).unwrap();
        assert_eq!(page.geometry, PageGeometry::widescreen());
    }
}

#[test]
fn test_mixed_page_sizes_get_one_layer_each() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("mixed.pdf");
    let output = temp_dir.path().join("mixed-marked.pdf");
    build_pdf(
        &input,
        &[(612.0, 792.0), (960.0, 540.0), (612.0, 792.0), (720.0, 540.0), (960.0, 540.0)],
    );

    let report = compose(&input, &output, &builtin_spec("DRAFT", true)).unwrap();
    assert_eq!(report.pages, 5);
    assert_eq!(report.layers, 3);

    let doc = Document::load(&output).unwrap();
    let ids = page_ids(&doc);
    let layers: Vec<ObjectId> = ids.iter().map(|&id| watermark_xobject(&doc, id)).collect();
    assert_eq!(layers[0], layers[2]);
    assert_eq!(layers[1], layers[4]);
    assert_ne!(layers[0], layers[1]);
    assert_ne!(layers[1], layers[3]);

    let metadata = extract_metadata(&output).unwrap();
    assert_eq!(metadata.page_count, 5);
    assert_eq!(metadata.geometries.len(), 3);
}

#[test]
fn test_layer_bbox_matches_page() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("a4.pdf");
    let output = temp_dir.path().join("a4-marked.pdf");
    build_pdf(&input, &[(595.28, 841.89)]);

    compose(&input, &output, &builtin_spec("DRAFT", true)).unwrap();

    let doc = Document::load(&output).unwrap();
    let page_id = page_ids(&doc)[0];
    let xobject = doc.get_object(watermark_xobject(&doc, page_id)).unwrap().as_stream().unwrap();
    let bbox = xobject.dict.get(b"BBox").unwrap().as_array().unwrap();
    assert!((bbox[2].as_float().unwrap() - 595.28).abs() < 0.01);
    assert!((bbox[3].as_float().unwrap() - 841.89).abs() < 0.01);
}

#[test]
fn test_zero_page_input_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("empty.pdf");
    let output = temp_dir.path().join("out.pdf");
    build_pdf(&input, &[]);

    let result = compose(&input, &output, &builtin_spec("DRAFT", false));
    assert!(matches!(result, Err(Error::Input(_))));
    assert!(!output.exists());
}

#[test]
fn test_corrupt_input_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("corrupt.pdf");
    let output = temp_dir.path().join("out.pdf");
    std::fs::write(&input, b"%PDF-1.4\nthis is not a pdf body").unwrap();

    let result = compose(&input, &output, &builtin_spec("DRAFT", false));
    assert!(matches!(result, Err(Error::Input(_))));
    assert!(!output.exists());
}

#[test]
fn test_missing_input_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let output = temp_dir.path().join("out.pdf");

    let result = watermark_pdf_with_font(
        &temp_dir.path().join("nonexistent.pdf"),
        &output,
        &options("DRAFT", false),
        FontReference::builtin(),
    );
    assert!(matches!(result, Err(Error::Input(_))));
    assert!(!output.exists());
}

#[test]
fn test_explicit_missing_font_is_fatal() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("deck.pdf");
    let output = temp_dir.path().join("out.pdf");
    build_pdf(&input, &[(612.0, 792.0)]);

    let opts = WatermarkOptions {
        font_path: Some(temp_dir.path().join("missing.ttf")),
        ..options("DRAFT", false)
    };
    let result = watermark_pdf(&input, &output, &opts, None);
    assert!(matches!(result, Err(Error::FontLoad { .. })));
    assert!(!output.exists());
}

#[test]
fn test_watermarking_twice_keeps_pages() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("deck.pdf");
    let once = temp_dir.path().join("once.pdf");
    let twice = temp_dir.path().join("twice.pdf");
    build_pdf(&input, &[(960.0, 540.0), (612.0, 792.0)]);

    let spec = builtin_spec("COPY", true);
    compose(&input, &once, &spec).unwrap();
    let report = compose(&once, &twice, &spec).unwrap();

    assert_eq!(report.pages, 2);
    assert_eq!(count_pages(&twice).unwrap(), 2);
}

#[test]
fn test_output_overwrites_existing_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("deck.pdf");
    let output = temp_dir.path().join("out.pdf");
    build_pdf(&input, &[(612.0, 792.0)]);
    std::fs::write(&output, b"stale").unwrap();

    compose(&input, &output, &builtin_spec("DRAFT", false)).unwrap();
    assert_eq!(count_pages(&output).unwrap(), 1);
}

#[test]
fn test_standalone_layer_save() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let output = temp_dir.path().join("layer.pdf");

    let spec = builtin_spec("PREVIEW", true);
    let layer = LayerRenderer::new(&spec)
        .unwrap()
        .render_geometry(PageGeometry::widescreen())
        .unwrap();
    layer.save(&output).unwrap();

    let metadata = extract_metadata(&output).unwrap();
    assert_eq!(metadata.page_count, 1);
    assert_eq!(metadata.geometries, vec![PageGeometry::widescreen()]);
}

#[test]
fn test_system_truetype_font_embedded() {
    let Some(font_path) = system_ttf() else {
        eprintln!("Skipping TrueType embedding test: no system font found");
        return;
    };

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("deck.pdf");
    let output = temp_dir.path().join("deck-marked.pdf");
    build_pdf(&input, &[(960.0, 540.0), (960.0, 540.0)]);

    let opts = WatermarkOptions {
        font_path: Some(font_path),
        ..options("Internal use only", true)
    };
    let report = watermark_pdf(&input, &output, &opts, None).expect("Failed to watermark PDF");
    assert_eq!(report.pages, 2);
    assert_eq!(report.layers, 1);
    assert_ne!(report.font, "Helvetica");

    let doc = Document::load(&output).unwrap();
    let xobject_id = watermark_xobject(&doc, page_ids(&doc)[0]);
    let xobject = doc.get_object(xobject_id).unwrap().as_stream().unwrap();
    let resources = xobject.dict.get(b"Resources").unwrap().as_dict().unwrap();
    let font_id = resources
        .get(b"Font")
        .unwrap()
        .as_dict()
        .unwrap()
        .get(b"WmF1")
        .unwrap()
        .as_reference()
        .unwrap();
    let font = doc.get_dictionary(font_id).unwrap();

    assert_eq!(font.get(b"Subtype").unwrap().as_name().unwrap(), b"Type0");
    assert_eq!(font.get(b"Encoding").unwrap().as_name().unwrap(), b"Identity-H");
    assert!(font.has(b"ToUnicode"));
}

#[test]
fn test_page_count_kept_for_any_opacity_and_rotation() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("deck.pdf");
    build_pdf(&input, &[(960.0, 540.0), (612.0, 792.0), (960.0, 540.0)]);

    for opacity in [0.0, 0.5, 1.0] {
        for rotation in [0.0, 90.0, 359.9] {
            let output = temp_dir.path().join(format!("out-{}-{}.pdf", opacity, rotation));
            let opts = WatermarkOptions {
                opacity,
                rotation,
                ..options("CONFIDENTIAL", true)
            };
            let spec = WatermarkSpec::new(&opts, FontReference::builtin()).unwrap();

            let report = compose(&input, &output, &spec)
                .unwrap_or_else(|e| panic!("opacity {} rotation {}: {}", opacity, rotation, e));
            assert_eq!(report.pages, 3);
            assert_eq!(count_pages(&output).unwrap(), 3);
        }
    }
}

#[test]
fn test_layer_geometry_identical_across_runs() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("deck.pdf");
    let first = temp_dir.path().join("first.pdf");
    let second = temp_dir.path().join("second.pdf");
    build_pdf(&input, &[(960.0, 540.0), (612.0, 792.0)]);

    let spec = builtin_spec("DRAFT", true);
    compose(&input, &first, &spec).unwrap();
    compose(&input, &second, &spec).unwrap();

    let first_doc = Document::load(&first).unwrap();
    let second_doc = Document::load(&second).unwrap();
    let first_ids = page_ids(&first_doc);
    let second_ids = page_ids(&second_doc);

    for (a, b) in first_ids.iter().zip(&second_ids) {
        let a_content = stream_bytes(&first_doc, watermark_xobject(&first_doc, *a));
        let b_content = stream_bytes(&second_doc, watermark_xobject(&second_doc, *b));
        let matrices = text_matrices(&a_content);
        assert!(!matrices.is_empty());
        assert_eq!(matrices, text_matrices(&b_content));
        assert_eq!(a_content, b_content);
    }
}

#[test]
fn test_page_rotation_preserved() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("rotated.pdf");
    let output = temp_dir.path().join("rotated-marked.pdf");
    build_pdf_pages(&input, &[(612.0, 792.0, Some(90)), (612.0, 792.0, None)]);

    compose(&input, &output, &builtin_spec("DRAFT", false)).unwrap();

    let doc = Document::load(&output).unwrap();
    let ids = page_ids(&doc);
    let rotated = doc.get_dictionary(ids[0]).unwrap();
    assert_eq!(rotated.get(b"Rotate").unwrap().as_i64().unwrap(), 90);
    assert!(!doc.get_dictionary(ids[1]).unwrap().has(b"Rotate"));
    assert_eq!(page_box(&doc, ids[0]).unwrap().geometry, PageGeometry::letter());
}

#[test]
fn test_tiled_explicit_spacing() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("letter.pdf");
    let output = temp_dir.path().join("letter-marked.pdf");
    build_pdf(&input, &[(612.0, 792.0)]);

    let opts = WatermarkOptions {
        spacing_x: Some(200.0),
        spacing_y: Some(150.0),
        ..options("DRAFT", true)
    };
    let spec = WatermarkSpec::new(&opts, FontReference::builtin()).unwrap();
    let report = compose(&input, &output, &spec).unwrap();
    assert_eq!(report.layers, 1);

    let doc = Document::load(&output).unwrap();
    let content = stream_bytes(&doc, watermark_xobject(&doc, page_ids(&doc)[0]));

    // x: -200..=800 step 200, y: -150..=900 step 150
    assert_eq!(text_matrices(&content).len(), 6 * 8);
}

#[test]
fn test_oversized_page_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let input = temp_dir.path().join("huge.pdf");
    let output = temp_dir.path().join("huge-marked.pdf");
    build_pdf(&input, &[(612.0, 792.0), (1.0e8, 1.0e8)]);

    let result = compose(&input, &output, &builtin_spec("X", true));
    assert!(matches!(result, Err(Error::Input(_))));
    assert!(!output.exists());
}

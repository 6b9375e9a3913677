//! Font resolution for watermark text
//!
//! Resolution order:
//! 1. An explicit font path (fatal if it cannot be loaded)
//! 2. The path named by [`CJK_FONT_ENV`]
//! 3. A fixed list of per-platform CJK-capable font files
//! 4. CJK-looking font files found by scanning the platform font directories
//! 5. The built-in Helvetica base font
//!
//! Every step after the first keeps searching while the font it found cannot
//! render the sample text. When nothing covers the text the first loadable
//! font (or Helvetica) is used and missing glyphs render as boxes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pdf::font::winansi_code;

/// Environment variable naming a CJK-capable font file
pub const CJK_FONT_ENV: &str = "SLIDE_WATERMARK_CJK_FONT";

/// Operating system a font candidate applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

/// Known CJK-capable font files, evaluated top to bottom
///
/// `~` expands to the home directory and `%WINDIR%` to the Windows directory.
const FONT_CANDIDATES: &[(Platform, &str)] = &[
    (Platform::MacOs, "~/Library/Fonts/NotoSansCJKsc-Regular.otf"),
    (Platform::MacOs, "/System/Library/Fonts/PingFang.ttc"),
    (Platform::MacOs, "/System/Library/Fonts/STHeiti Medium.ttc"),
    (Platform::MacOs, "/System/Library/Fonts/Supplemental/Heiti TC.ttc"),
    (Platform::MacOs, "/Library/Fonts/NotoSansCJKsc-Regular.otf"),
    (Platform::MacOs, "/Library/Fonts/NotoSansCJK-Regular.ttc"),
    (Platform::Windows, "%WINDIR%/Fonts/msyh.ttc"),
    (Platform::Windows, "%WINDIR%/Fonts/msyh.ttf"),
    (Platform::Windows, "%WINDIR%/Fonts/simsun.ttc"),
    (Platform::Windows, "%WINDIR%/Fonts/simhei.ttf"),
    (Platform::Windows, "%WINDIR%/Fonts/msjh.ttc"),
    (Platform::Windows, "%WINDIR%/Fonts/malgun.ttf"),
    (Platform::Linux, "/usr/share/fonts/opentype/noto/NotoSansCJKsc-Regular.otf"),
    (Platform::Linux, "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc"),
    (Platform::Linux, "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc"),
    (Platform::Linux, "/usr/share/fonts/truetype/noto/NotoSansCJK-Regular.ttc"),
    (Platform::Linux, "/usr/share/fonts/opentype/source-han-sans/SourceHanSansSC-Regular.otf"),
    (Platform::Linux, "/usr/share/fonts/truetype/arphic/uming.ttc"),
];

/// Font directories scanned after the fixed candidates
const FONT_DIRS: &[(Platform, &str)] = &[
    (Platform::MacOs, "/System/Library/Fonts"),
    (Platform::MacOs, "/Library/Fonts"),
    (Platform::MacOs, "~/Library/Fonts"),
    (Platform::Windows, "%WINDIR%/Fonts"),
    (Platform::Linux, "/usr/share/fonts"),
    (Platform::Linux, "/usr/local/share/fonts"),
    (Platform::Linux, "~/.fonts"),
    (Platform::Linux, "~/.local/share/fonts"),
];

/// Lowercase file name fragments that identify CJK font families
const CJK_FONT_NAME_HINTS: &[&str] = &[
    "notosanscjk",
    "notoserifcjk",
    "sourcehansans",
    "sourcehanserif",
    "noto sans cjk",
    "noto serif cjk",
    "pingfang",
    "hiragino sans",
    "stheiti",
    "heiti",
    "simsun",
    "simhei",
    "msyh",
    "microsoft yahei",
    "malgungothic",
    "applegothic",
];

const FONT_EXTENSIONS: &[&str] = &["otf", "ttf", "ttc"];

/// Maximum directory depth below a font directory that is scanned
const SCAN_DEPTH: usize = 2;

/// A font file loaded into memory
pub struct FontFile {
    path: PathBuf,
    data: Vec<u8>,
    name: String,
}

impl FontFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// PostScript name usable as a PDF `/BaseFont`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse the first face of the file
    pub fn face(&self) -> Option<rustybuzz::Face<'_>> {
        rustybuzz::Face::from_slice(&self.data, 0)
    }
}

#[derive(Clone)]
enum FontKind {
    /// PDF base-14 Helvetica, no embedding required
    Builtin,
    File(Arc<FontFile>),
}

/// Handle to a font usable for watermark text
#[derive(Clone)]
pub struct FontReference {
    kind: FontKind,
}

impl fmt::Debug for FontReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FontKind::Builtin => f.write_str("FontReference(Helvetica)"),
            FontKind::File(file) => write!(f, "FontReference({})", file.path.display()),
        }
    }
}

impl FontReference {
    /// The built-in Helvetica font
    pub fn builtin() -> Self {
        Self { kind: FontKind::Builtin }
    }

    /// Load a TrueType/OpenType font file (first face of a collection)
    pub fn load(path: &Path) -> Result<Self> {
        let fail = |reason: String| Error::FontLoad {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(fail("file not found".to_string()));
        }

        let data = fs::read(path).map_err(|e| fail(e.to_string()))?;
        let name = {
            let face = rustybuzz::Face::from_slice(&data, 0)
                .ok_or_else(|| fail("not a TrueType/OpenType font".to_string()))?;
            postscript_name(&face).unwrap_or_else(|| name_from_path(path))
        };

        Ok(Self {
            kind: FontKind::File(Arc::new(FontFile {
                path: path.to_path_buf(),
                data,
                name,
            })),
        })
    }

    /// Display name of the font
    pub fn name(&self) -> &str {
        match &self.kind {
            FontKind::Builtin => "Helvetica",
            FontKind::File(file) => file.name(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.kind, FontKind::Builtin)
    }

    /// Loaded font file, `None` for the built-in font
    pub fn file(&self) -> Option<&FontFile> {
        match &self.kind {
            FontKind::Builtin => None,
            FontKind::File(file) => Some(file),
        }
    }

    /// Whether every visible character of `text` has a glyph in this font
    pub fn covers(&self, text: &str) -> bool {
        let mut visible = text.chars().filter(|c| !c.is_whitespace() && !c.is_control());
        match &self.kind {
            FontKind::Builtin => visible.all(|c| winansi_code(c).is_some()),
            FontKind::File(file) => match file.face() {
                Some(face) => visible.all(|c| face.glyph_index(c).is_some()),
                None => false,
            },
        }
    }
}

fn postscript_name(face: &rustybuzz::Face<'_>) -> Option<String> {
    face.names()
        .into_iter()
        .filter(|name| name.name_id == rustybuzz::ttf_parser::name_id::POST_SCRIPT_NAME)
        .find_map(|name| name.to_string())
        .map(|name| sanitize_font_name(&name))
        .filter(|name| !name.is_empty())
}

fn name_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = sanitize_font_name(&stem);
    if name.is_empty() {
        "WatermarkFont".to_string()
    } else {
        name
    }
}

/// Keep only characters that are safe inside a PDF name
fn sanitize_font_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Whether `text` contains Chinese, Japanese or Korean characters
pub fn text_has_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c as u32,
            0x4E00..=0x9FFF       // CJK Unified Ideographs
            | 0x3400..=0x4DBF     // Extension A
            | 0x20000..=0x2A6DF   // Extension B
            | 0x2A700..=0x2B73F   // Extension C
            | 0x2B740..=0x2B81F   // Extension D
            | 0x2B820..=0x2CEAF   // Extension E
            | 0xF900..=0xFAFF     // Compatibility Ideographs
            | 0x2F800..=0x2FA1F   // Compatibility Supplement
            | 0x3040..=0x309F     // Hiragana
            | 0x30A0..=0x30FF     // Katakana
            | 0x31F0..=0x31FF     // Katakana Phonetic Extensions
            | 0xAC00..=0xD7AF     // Hangul Syllables
        )
    })
}

/// Expand `~` and `%WINDIR%` prefixes in a candidate path
fn expand_path(raw: &str) -> Option<PathBuf> {
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))?;
        return Some(PathBuf::from(home).join(rest));
    }
    if let Some(rest) = raw.strip_prefix("%WINDIR%/") {
        let windir = std::env::var_os("WINDIR").unwrap_or_else(|| "C:\\Windows".into());
        return Some(PathBuf::from(windir).join(rest));
    }
    Some(PathBuf::from(raw))
}

fn platform_paths(table: &[(Platform, &str)], platform: Platform) -> Vec<PathBuf> {
    table
        .iter()
        .filter(|(p, _)| *p == platform)
        .filter_map(|(_, raw)| expand_path(raw))
        .collect()
}

/// Searches candidate locations for a font that covers the watermark text
#[derive(Debug, Clone)]
pub struct FontResolver {
    candidates: Vec<PathBuf>,
    scan_dirs: Vec<PathBuf>,
}

impl FontResolver {
    /// Resolver using the candidate list and font directories of this platform
    pub fn system() -> Self {
        let platform = Platform::current();
        Self {
            candidates: platform_paths(FONT_CANDIDATES, platform),
            scan_dirs: platform_paths(FONT_DIRS, platform),
        }
    }

    /// Resolver with custom candidate files and scan directories
    pub fn new(candidates: Vec<PathBuf>, scan_dirs: Vec<PathBuf>) -> Self {
        Self { candidates, scan_dirs }
    }

    /// Pick the font for `sample_text`
    ///
    /// Only an explicit path can fail; every other source falls back.
    pub fn resolve(
        &self,
        explicit_path: Option<&Path>,
        env_override: Option<&Path>,
        sample_text: &str,
    ) -> Result<FontReference> {
        if let Some(path) = explicit_path {
            let font = FontReference::load(path)?;
            if !font.covers(sample_text) {
                warn!(
                    "Font {} has no glyphs for some characters of {:?}; they will render as boxes",
                    path.display(),
                    sample_text
                );
            }
            info!("Using font {} ({})", font.name(), path.display());
            return Ok(font);
        }

        let mut fallback: Option<FontReference> = None;

        if let Some(path) = env_override {
            if !path.exists() {
                warn!("Font path in {} was not found: {}", CJK_FONT_ENV, path.display());
            } else {
                match FontReference::load(path) {
                    Ok(font) => {
                        if let Some(font) = Self::accept(font, sample_text, &mut fallback) {
                            return Ok(font);
                        }
                    }
                    Err(e) => warn!("Ignoring font from {}: {}", CJK_FONT_ENV, e),
                }
            }
        }

        if let Some(font) = self.first_covering(&self.candidates, sample_text, &mut fallback) {
            return Ok(font);
        }

        let scanned = scan_font_dirs(&self.scan_dirs);
        if let Some(font) = self.first_covering(&scanned, sample_text, &mut fallback) {
            return Ok(font);
        }

        let builtin = FontReference::builtin();
        if builtin.covers(sample_text) {
            info!("Using built-in font Helvetica");
            return Ok(builtin);
        }

        let font = fallback.unwrap_or(builtin);
        if text_has_cjk(sample_text) {
            warn!(
                "No CJK font found to render {:?}; using {}. Install a CJK font \
                 (e.g. fonts-noto-cjk) or set {}",
                sample_text,
                font.name(),
                CJK_FONT_ENV
            );
        } else {
            warn!("No font covers {:?}; using {}", sample_text, font.name());
        }
        Ok(font)
    }

    fn first_covering(
        &self,
        paths: &[PathBuf],
        sample_text: &str,
        fallback: &mut Option<FontReference>,
    ) -> Option<FontReference> {
        for path in paths {
            if !path.is_file() {
                continue;
            }
            match FontReference::load(path) {
                Ok(font) => {
                    if let Some(font) = Self::accept(font, sample_text, fallback) {
                        return Some(font);
                    }
                }
                Err(e) => debug!("Skipping font candidate: {}", e),
            }
        }
        None
    }

    /// Return the font if it covers the text, otherwise remember the first one seen
    fn accept(
        font: FontReference,
        sample_text: &str,
        fallback: &mut Option<FontReference>,
    ) -> Option<FontReference> {
        if font.covers(sample_text) {
            info!("Using font {}", font.name());
            return Some(font);
        }
        debug!("Font {} does not cover {:?}", font.name(), sample_text);
        if fallback.is_none() {
            *fallback = Some(font);
        }
        None
    }
}

/// Resolve a font with the system candidate list
pub fn resolve_font(
    explicit_path: Option<&Path>,
    env_override: Option<&Path>,
    sample_text: &str,
) -> Result<FontReference> {
    FontResolver::system().resolve(explicit_path, env_override, sample_text)
}

/// Font path from the `SLIDE_WATERMARK_CJK_FONT` environment variable, if set
pub fn env_font_override() -> Option<PathBuf> {
    std::env::var_os(CJK_FONT_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Find font files whose names suggest CJK coverage
fn scan_font_dirs(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in dirs {
        scan_dir(dir, 0, &mut found);
    }
    found
}

fn scan_dir(dir: &Path, depth: usize, found: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            if depth < SCAN_DEPTH {
                scan_dir(&path, depth + 1, found);
            }
        } else if is_cjk_font_file(&path) {
            found.push(path);
        }
    }
}

fn is_cjk_font_file(path: &Path) -> bool {
    let has_font_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| FONT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if !has_font_ext {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    CJK_FONT_NAME_HINTS.iter().any(|hint| name.contains(hint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn empty_resolver() -> FontResolver {
        FontResolver::new(vec![], vec![])
    }

    #[test]
    fn test_explicit_missing_font_is_fatal() {
        let result = empty_resolver().resolve(Some(Path::new("/nonexistent/font.ttf")), None, "X");
        assert!(matches!(result, Err(Error::FontLoad { .. })));
    }

    #[test]
    fn test_explicit_invalid_font_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.ttf");
        fs::write(&path, b"definitely not a font").unwrap();

        let result = empty_resolver().resolve(Some(&path), None, "X");
        match result {
            Err(Error::FontLoad { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected FontLoad error, got {:?}", other),
        }
    }

    #[test]
    fn test_falls_back_to_builtin() {
        let font = empty_resolver().resolve(None, None, "CONFIDENTIAL").unwrap();
        assert!(font.is_builtin());
        assert_eq!(font.name(), "Helvetica");
    }

    #[test]
    fn test_uncovered_text_is_not_an_error() {
        let font = empty_resolver().resolve(None, None, "机密文件").unwrap();
        assert!(font.is_builtin());
        assert!(!font.covers("机密文件"));
    }

    #[test]
    fn test_bad_env_override_falls_through() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.otf");
        fs::write(&broken, b"nope").unwrap();

        for path in [broken.as_path(), Path::new("/nonexistent/env-font.otf")] {
            let font = empty_resolver().resolve(None, Some(path), "DRAFT").unwrap();
            assert!(font.is_builtin());
        }
    }

    #[test]
    fn test_unloadable_candidates_skipped() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("NotoSansCJKsc-Regular.otf");
        fs::write(&broken, b"nope").unwrap();

        let resolver = FontResolver::new(vec![broken.clone()], vec![dir.path().to_path_buf()]);
        let font = resolver.resolve(None, None, "DRAFT").unwrap();
        assert!(font.is_builtin());
    }

    /// DejaVu Sans ExtraLight has no bullet glyph, regular DejaVu Sans does
    const EXTRA_LIGHT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-ExtraLight.ttf";
    const REGULAR: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
    const BULLET_TEXT: &str = "DRAFT•";

    /// Load `path` if installed and check it really lacks or has the bullet
    fn dejavu(path: &str, covers_bullet: bool) -> Option<PathBuf> {
        let path = PathBuf::from(path);
        let font = FontReference::load(&path).ok()?;
        (font.covers(BULLET_TEXT) == covers_bullet).then_some(path)
    }

    #[test]
    fn test_builtin_beats_non_covering_env_font() {
        let Some(light) = dejavu(EXTRA_LIGHT, false) else {
            eprintln!("Skipping: DejaVu Sans ExtraLight not installed");
            return;
        };
        assert!(FontReference::builtin().covers(BULLET_TEXT));

        let font = empty_resolver().resolve(None, Some(&light), BULLET_TEXT).unwrap();
        assert!(font.is_builtin());
        assert!(font.covers(BULLET_TEXT));
    }

    #[test]
    fn test_later_covering_candidate_wins() {
        let (Some(light), Some(regular)) = (dejavu(EXTRA_LIGHT, false), dejavu(REGULAR, true)) else {
            eprintln!("Skipping: DejaVu Sans fonts not installed");
            return;
        };

        let resolver = FontResolver::new(vec![light, regular.clone()], vec![]);
        let font = resolver.resolve(None, None, BULLET_TEXT).unwrap();
        assert_eq!(font.file().map(|f| f.path().to_path_buf()), Some(regular));
    }

    #[test]
    fn test_non_covering_font_kept_when_nothing_covers() {
        let Some(light) = dejavu(EXTRA_LIGHT, false) else {
            eprintln!("Skipping: DejaVu Sans ExtraLight not installed");
            return;
        };

        // Neither the candidate nor Helvetica has the bullet plus the ideograph
        let text = "机•";
        let resolver = FontResolver::new(vec![light.clone()], vec![]);
        let font = resolver.resolve(None, None, text).unwrap();
        assert_eq!(font.file().map(|f| f.path().to_path_buf()), Some(light));
    }

    #[test]
    fn test_builtin_coverage() {
        let font = FontReference::builtin();
        assert!(font.covers("CONFIDENTIAL"));
        assert!(font.covers("Café – “draft” €5"));
        assert!(font.covers("line one\nline two\t"));
        assert!(!font.covers("机密"));
        assert!(!font.covers("Ωmega"));
    }

    #[test]
    fn test_text_has_cjk() {
        assert!(text_has_cjk("内部资料"));
        assert!(text_has_cjk("マル秘"));
        assert!(text_has_cjk("대외비"));
        assert!(text_has_cjk("Draft 草稿"));
        assert!(!text_has_cjk("CONFIDENTIAL"));
        assert!(!text_has_cjk(""));
    }

    #[test]
    fn test_candidate_table_per_platform() {
        for platform in [Platform::MacOs, Platform::Windows, Platform::Linux] {
            assert!(!platform_paths(FONT_CANDIDATES, platform).is_empty());
            assert!(!platform_paths(FONT_DIRS, platform).is_empty());
        }
    }

    #[test]
    fn test_scan_dirs_do_not_overlap() {
        for &(platform, dir) in FONT_DIRS {
            for &(other_platform, other) in FONT_DIRS {
                if platform == other_platform && dir != other {
                    assert!(
                        !Path::new(other).starts_with(dir),
                        "{} is already scanned under {}",
                        other,
                        dir
                    );
                }
            }
        }
    }

    #[test]
    fn test_expand_windows_dir() {
        let path = expand_path("%WINDIR%/Fonts/msyh.ttc").unwrap();
        assert!(path.ends_with("Fonts/msyh.ttc"));
        assert_eq!(expand_path("/usr/share/fonts").unwrap(), PathBuf::from("/usr/share/fonts"));
    }

    #[test]
    fn test_scan_matches_cjk_names_only() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("opentype").join("noto");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("NotoSansCJK-Regular.ttc"), b"").unwrap();
        fs::write(nested.join("DejaVuSans.ttf"), b"").unwrap();
        fs::write(dir.path().join("msyh.txt"), b"").unwrap();

        let found = scan_font_dirs(&[dir.path().to_path_buf()]);
        assert_eq!(found, vec![nested.join("NotoSansCJK-Regular.ttc")]);
    }

    #[test]
    fn test_scan_depth_limited() {
        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("a").join("b").join("c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("simsun.ttc"), b"").unwrap();

        assert!(scan_font_dirs(&[dir.path().to_path_buf()]).is_empty());
    }

    #[test]
    fn test_sanitize_font_name() {
        assert_eq!(sanitize_font_name("Noto Sans CJK SC"), "NotoSansCJKSC");
        assert_eq!(sanitize_font_name("STHeiti-Medium"), "STHeiti-Medium");
        assert_eq!(name_from_path(Path::new("/x/(  ).ttf")), "WatermarkFont");
    }
}

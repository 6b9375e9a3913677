//! Slide Watermark CLI tool
//!
//! Watermark PDFs, or convert presentation decks to PDF and watermark them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use slide_watermark::convert::{Converter, DEFAULT_CONVERTER};
use slide_watermark::font::{env_font_override, resolve_font};
use slide_watermark::layout::PageGeometry;
use slide_watermark::pdf::{extract_metadata, LayerRenderer};
use slide_watermark::pipeline::{convert_and_watermark, watermark_pdf};
use slide_watermark::{WatermarkOptions, WatermarkSpec};

/// Slide Watermark - Stamp text watermarks onto PDFs and slide decks
#[derive(Parser)]
#[command(name = "slide-watermark")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Stamp a single diagonal watermark on every page
    slide-watermark watermark deck.pdf -o deck-marked.pdf --text CONFIDENTIAL

    # Tile a CJK watermark across a converted PowerPoint deck
    slide-watermark convert deck.pptx -o deck.pdf --text \"内部资料\" --tiled

    # Preview the watermark on an empty 16:9 page
    slide-watermark layer --width 960 --height 540 -o preview.pdf --text DRAFT --tiled

ENVIRONMENT:
    SLIDE_WATERMARK_CJK_FONT   font file tried before the built-in search list
    RUST_LOG                   log filter (default: info)")]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a watermark to every page of a PDF
    Watermark {
        /// Input PDF file
        input: PathBuf,

        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        watermark: WatermarkArgs,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Convert a presentation to PDF, then watermark it
    Convert {
        /// Presentation file (.pptx, .ppt, .odp, ...)
        input: PathBuf,

        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        watermark: WatermarkArgs,

        /// Converter program, invoked as `<program> --headless --convert-to pdf`
        #[arg(long, default_value = DEFAULT_CONVERTER)]
        converter: String,

        /// Seconds to wait for the converter (0 waits forever)
        #[arg(long, default_value_t = 300)]
        timeout: u64,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Write the watermark alone on a blank page of the given size
    Layer {
        /// Page width in points
        #[arg(long, default_value_t = 960.0)]
        width: f32,

        /// Page height in points
        #[arg(long, default_value_t = 540.0)]
        height: f32,

        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        watermark: WatermarkArgs,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Show information about a PDF file
    Info {
        /// PDF file to inspect
        input: PathBuf,
    },
}

/// Watermark appearance, shared by every subcommand that draws one
#[derive(Args)]
struct WatermarkArgs {
    /// Watermark text
    #[arg(long)]
    text: String,

    /// Opacity from 0.0 (invisible) to 1.0 (opaque)
    #[arg(long, default_value_t = 0.3)]
    opacity: f32,

    /// Rotation in degrees, counter-clockwise
    #[arg(long, default_value_t = 45.0, allow_hyphen_values = true)]
    rotation: f32,

    /// Font size in points
    #[arg(long, default_value_t = 40.0)]
    font_size: f32,

    /// Repeat the text across the page instead of one centered stamp
    #[arg(long)]
    tiled: bool,

    /// Horizontal distance between tiles in points (default: derived from font size)
    #[arg(long)]
    spacing_x: Option<f32>,

    /// Vertical distance between tiles in points (default: derived from font size)
    #[arg(long)]
    spacing_y: Option<f32>,

    /// Font file (.ttf, .otf, .ttc); failing to load it is an error
    #[arg(long)]
    font_path: Option<PathBuf>,
}

impl WatermarkArgs {
    fn options(&self) -> WatermarkOptions {
        WatermarkOptions {
            text: self.text.clone(),
            opacity: self.opacity,
            rotation: self.rotation,
            font_size: self.font_size,
            tiled: self.tiled,
            spacing_x: self.spacing_x,
            spacing_y: self.spacing_y,
            font_path: self.font_path.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Watermark { input, output, watermark, open } => {
            cmd_watermark(&input, &output, &watermark, open)
        }
        Commands::Convert { input, output, watermark, converter, timeout, open } => {
            cmd_convert(&input, &output, &watermark, converter, timeout, open)
        }
        Commands::Layer { width, height, output, watermark, open } => {
            cmd_layer(width, height, &output, &watermark, open)
        }
        Commands::Info { input } => cmd_info(&input),
    }
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

/// Open a file with the system default application
fn open_file(path: &Path) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(path)
            .spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(path)
            .spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", &path.display().to_string()])
            .spawn()?;
    }
    Ok(())
}

/// Watermark an existing PDF
fn cmd_watermark(input: &Path, output: &Path, args: &WatermarkArgs, open: bool) -> Result<()> {
    let env_font = env_font_override();
    let report = watermark_pdf(input, output, &args.options(), env_font.as_deref())
        .with_context(|| format!("Failed to watermark {}", input.display()))?;

    eprintln!(
        "Watermarked {} page(s) using {} -> {}",
        report.pages,
        report.font,
        output.display()
    );

    if open {
        open_file(output)?;
    }

    Ok(())
}

/// Convert a presentation and watermark the resulting PDF
fn cmd_convert(
    input: &Path,
    output: &Path,
    args: &WatermarkArgs,
    program: String,
    timeout: u64,
    open: bool,
) -> Result<()> {
    let timeout = (timeout > 0).then(|| Duration::from_secs(timeout));
    let converter = Converter::new(program, timeout);
    let env_font = env_font_override();

    let report = convert_and_watermark(input, output, &args.options(), &converter, env_font.as_deref())
        .with_context(|| format!("Failed to convert and watermark {}", input.display()))?;

    eprintln!(
        "Converted and watermarked {} page(s) using {} -> {}",
        report.pages,
        report.font,
        output.display()
    );

    if open {
        open_file(output)?;
    }

    Ok(())
}

/// Render one watermark layer as a standalone PDF
fn cmd_layer(width: f32, height: f32, output: &Path, args: &WatermarkArgs, open: bool) -> Result<()> {
    let options = args.options();
    options.validate()?;

    let env_font = env_font_override();
    let font = resolve_font(options.font_path.as_deref(), env_font.as_deref(), &options.text)?;
    let spec = WatermarkSpec::new(&options, font)?;

    let layer = LayerRenderer::new(&spec)?
        .render_geometry(PageGeometry::new(width, height))
        .context("Failed to render watermark layer")?;
    layer
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    eprintln!(
        "Wrote {} watermark instance(s) on a {} x {} page -> {}",
        layer.placement_count(),
        width,
        height,
        output.display()
    );

    if open {
        open_file(output)?;
    }

    Ok(())
}

/// Show information about a PDF
fn cmd_info(input: &Path) -> Result<()> {
    let metadata = extract_metadata(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    println!("File: {}", input.display());
    println!("Pages: {}", metadata.page_count);

    if let Some(title) = metadata.title {
        println!("Title: {}", title);
    }
    if let Some(author) = metadata.author {
        println!("Author: {}", author);
    }
    for geometry in metadata.geometries {
        println!("Page size: {:.2} x {:.2} pt", geometry.width, geometry.height);
    }

    Ok(())
}

//! rendertabs - render tab detection state as SVG for inspection.
//!
//! Runs the detector over a JSON page description and writes either the
//! per-box tab classification or the final vectors as an SVG drawing.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;

use meridian_core::render::{render_tab_classification, render_tab_vectors};
use meridian_core::{BBox, Blob, BlobSet, DebugContext, FinderConfig, Point, TabFinder};

/// Which state to render.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Mode {
    /// Per-box tab classification after the run
    Classification,
    /// Final tab vectors
    #[default]
    Vectors,
}

/// Render tab detection state as SVG.
#[derive(Parser, Debug)]
#[command(name = "rendertabs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON page description
    file: PathBuf,

    /// What to render
    #[arg(short, long, value_enum, default_value_t = Mode::Vectors)]
    mode: Mode,

    /// Output SVG path; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct PageFile {
    #[serde(default = "default_resolution")]
    resolution: i32,
    boxes: Vec<BoxEntry>,
}

fn default_resolution() -> i32 {
    300
}

#[derive(Debug, Deserialize)]
struct BoxEntry {
    left: i32,
    bottom: i32,
    right: i32,
    top: i32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let file = File::open(&args.file)
        .with_context(|| format!("cannot open {}", args.file.display()))?;
    let page: PageFile =
        serde_json::from_reader(BufReader::new(file)).context("invalid page description")?;
    let mut blobs = BlobSet::new();
    for entry in &page.boxes {
        blobs.push(Blob::new(BBox::new(
            entry.left,
            entry.bottom,
            entry.right,
            entry.top,
        )));
    }
    let extent = blobs
        .extent()
        .context("page description contains no boxes")?;
    let mut finder = TabFinder::new(
        Point::new(extent.left - 1, extent.bottom - 1),
        Point::new(extent.right + 1, extent.top + 1),
        page.resolution,
        FinderConfig::default(),
        DebugContext::INACTIVE,
    )?;
    finder.find_tab_vectors(&mut blobs, Vec::new())?;

    let width = extent.right + 32;
    let height = extent.top + 32;
    let svg = match args.mode {
        Mode::Classification => render_tab_classification(&blobs, width, height),
        Mode::Vectors => render_tab_vectors(finder.vectors(), width, height),
    };
    match &args.output {
        Some(path) => {
            let mut out = File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            out.write_all(svg.as_bytes())?;
        }
        None => print!("{svg}"),
    }
    Ok(())
}

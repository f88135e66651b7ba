//! findtabs - detect tab stops and column boundaries on a page.
//!
//! Reads a JSON page description (connected-component bounding boxes plus
//! the scan resolution) and prints the detected tab vectors, the page
//! skew, and the common column widths as JSON.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};

use meridian_core::{
    Alignment, BBox, Blob, BlobSet, DebugContext, FinderConfig, Point, RegionKind, TabFinder,
    TabVector,
};

/// Detect tab stops and column boundaries on a scanned page.
#[derive(Parser, Debug)]
#[command(name = "findtabs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON page description
    file: PathBuf,

    /// Use debug logging level
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    debug: bool,

    /// Detail level for search tracing (0 disables)
    #[arg(long, default_value = "0")]
    trace_level: i32,

    /// Minimum gutter width override in pixels
    #[arg(long, default_value = "0")]
    min_gutter: i32,

    /// Multiple of blob height searched by the ragged pass
    #[arg(long, default_value = "25")]
    ragged_search: i32,

    /// Abort threshold on the cosine of the detected skew angle
    #[arg(long, default_value = "0.866025")]
    min_skew_cos: f64,

    /// Minimum number of lines for an accepted column-width peak
    #[arg(long, default_value = "10")]
    min_column_lines: i32,

    /// Minimum fraction of all lines for an accepted column-width peak
    #[arg(long, default_value = "0.125")]
    min_column_fraction: f64,

    /// Pretty-print the JSON output
    #[arg(long, action = ArgAction::SetTrue)]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
struct PageFile {
    /// Scan resolution in dots per inch.
    #[serde(default = "default_resolution")]
    resolution: i32,
    boxes: Vec<BoxEntry>,
    #[serde(default)]
    separators: Vec<SeparatorEntry>,
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
    #[serde(default)]
    kind: Kind,
    #[serde(default)]
    leader_on_left: bool,
    #[serde(default)]
    leader_on_right: bool,
    #[serde(default)]
    line_crossings: i32,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Kind {
    Noise,
    Image,
    #[default]
    Unknown,
    Text,
}

impl From<Kind> for RegionKind {
    fn from(kind: Kind) -> RegionKind {
        match kind {
            Kind::Noise => RegionKind::Noise,
            Kind::Image => RegionKind::Image,
            Kind::Unknown => RegionKind::Unknown,
            Kind::Text => RegionKind::Text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SeparatorEntry {
    x_start: i32,
    y_start: i32,
    x_end: i32,
    y_end: i32,
    #[serde(default)]
    mean_width: i32,
}

#[derive(Debug, Serialize)]
struct Output {
    vertical_skew: [i32; 2],
    deskew: [f64; 2],
    reskew: [f64; 2],
    vectors: Vec<VectorOut>,
    dead_vectors: Vec<VectorOut>,
    common_widths: Vec<WidthOut>,
}

#[derive(Debug, Serialize)]
struct VectorOut {
    alignment: &'static str,
    x_start: i32,
    y_start: i32,
    x_end: i32,
    y_end: i32,
    extended_ymin: i32,
    extended_ymax: i32,
    percent_score: i32,
    box_count: usize,
    partner_count: usize,
}

#[derive(Debug, Serialize)]
struct WidthOut {
    width: i32,
    line_count: i32,
}

fn alignment_name(alignment: Alignment) -> &'static str {
    match alignment {
        Alignment::LeftAligned => "left_aligned",
        Alignment::LeftRagged => "left_ragged",
        Alignment::CenterJustified => "center_justified",
        Alignment::RightAligned => "right_aligned",
        Alignment::RightRagged => "right_ragged",
        Alignment::Separator => "separator",
    }
}

fn vector_out(v: &meridian_core::TabVector) -> VectorOut {
    VectorOut {
        alignment: alignment_name(v.alignment),
        x_start: v.start.x,
        y_start: v.start.y,
        x_end: v.end.x,
        y_end: v.end.y,
        extended_ymin: v.extended_ymin,
        extended_ymax: v.extended_ymax,
        percent_score: v.percent_score,
        box_count: v.box_count(),
        partner_count: v.partners.len(),
    }
}

fn load_page(args: &Args) -> Result<(BlobSet, Vec<TabVector>, i32)> {
    let file = File::open(&args.file)
        .with_context(|| format!("cannot open {}", args.file.display()))?;
    let page: PageFile =
        serde_json::from_reader(BufReader::new(file)).context("invalid page description")?;
    let mut blobs = BlobSet::new();
    for entry in &page.boxes {
        let mut blob = Blob::new(BBox::new(entry.left, entry.bottom, entry.right, entry.top));
        blob.region = entry.kind.into();
        blob.leader_on_left = entry.leader_on_left;
        blob.leader_on_right = entry.leader_on_right;
        blob.line_crossings = entry.line_crossings;
        blobs.push(blob);
    }
    let separators = page
        .separators
        .iter()
        .map(|s| {
            let mut v = TabVector::from_boxes(
                Alignment::Separator,
                s.y_start.min(s.y_end),
                s.y_start.max(s.y_end),
                Vec::new(),
            );
            v.start = Point::new(s.x_start, s.y_start.min(s.y_end));
            v.end = Point::new(s.x_end, s.y_start.max(s.y_end));
            v.mean_width = s.mean_width;
            v.needs_refit = false;
            v.needs_evaluation = false;
            v
        })
        .collect();
    Ok((blobs, separators, page.resolution))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = if args.debug {
        "meridian_core=debug"
    } else {
        "meridian_core=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let (mut blobs, separators, resolution) = load_page(&args)?;
    let extent = blobs
        .extent()
        .context("page description contains no boxes")?;
    let config = FinderConfig {
        min_gutter_width: args.min_gutter,
        ragged_search_multiple: args.ragged_search,
        min_skew_cosine: args.min_skew_cos,
        min_lines_in_column: args.min_column_lines,
        min_fraction_lines_in_column: args.min_column_fraction,
        ..FinderConfig::default()
    };
    let dbg = DebugContext::with_level(args.trace_level);
    let mut finder = TabFinder::new(
        Point::new(extent.left - 1, extent.bottom - 1),
        Point::new(extent.right + 1, extent.top + 1),
        resolution,
        config,
        dbg,
    )?;
    let outcome = finder.find_tab_vectors(&mut blobs, separators)?;

    let output = Output {
        vertical_skew: [outcome.vertical_skew.x, outcome.vertical_skew.y],
        deskew: [outcome.deskew.cos, outcome.deskew.sin],
        reskew: [outcome.reskew.cos, outcome.reskew.sin],
        vectors: finder
            .vectors()
            .iter_live()
            .map(|(_, v)| vector_out(v))
            .collect(),
        dead_vectors: finder.vectors().dead_vectors().iter().map(vector_out).collect(),
        common_widths: finder
            .common_widths()
            .iter()
            .map(|cw| WidthOut {
                width: cw.width * meridian_core::finder::COLUMN_WIDTH_FACTOR,
                line_count: cw.line_count,
            })
            .collect(),
    };
    let json = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{json}");
    Ok(())
}

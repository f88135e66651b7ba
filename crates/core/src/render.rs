//! Read-only SVG rendering of detection state.
//!
//! These hooks exist for the debug viewer; nothing in the detection
//! pipeline consults them and omitting them changes no computed result.

use std::fmt::Write;

use itertools::Itertools;

use crate::blob::{BlobSet, TabState};
use crate::vector::{Alignment, TabVector, VectorStore};

fn state_colour(state: TabState) -> Option<&'static str> {
    match state {
        TabState::None => None,
        TabState::MaybeAligned => Some("blue"),
        TabState::MaybeRagged => Some("gold"),
        TabState::Confirmed => Some("green"),
        TabState::Deleted => Some("grey"),
    }
}

fn alignment_colour(alignment: Alignment) -> &'static str {
    match alignment {
        Alignment::LeftAligned => "limegreen",
        Alignment::LeftRagged => "darkgreen",
        Alignment::CenterJustified => "orange",
        Alignment::RightAligned => "deeppink",
        Alignment::RightRagged => "coral",
        Alignment::Separator => "white",
    }
}

fn svg_open(out: &mut String, width: i32, height: i32) {
    let _ = writeln!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 {width} {height}\" \
         transform=\"scale(1,-1)\">"
    );
}

/// Render every blob box with its per-edge tab classification.
pub fn render_tab_classification(blobs: &BlobSet, width: i32, height: i32) -> String {
    let mut out = String::new();
    svg_open(&mut out, width, height);
    for (_, blob) in blobs.iter() {
        let b = blob.bounds;
        let _ = writeln!(
            out,
            "  <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"none\" \
             stroke=\"silver\"/>",
            b.left,
            b.bottom,
            b.width(),
            b.height()
        );
        if let Some(colour) = state_colour(blob.left_tab) {
            let _ = writeln!(
                out,
                "  <line x1=\"{0}\" y1=\"{1}\" x2=\"{0}\" y2=\"{2}\" stroke=\"{3}\"/>",
                b.left, b.bottom, b.top, colour
            );
        }
        if let Some(colour) = state_colour(blob.right_tab) {
            let _ = writeln!(
                out,
                "  <line x1=\"{0}\" y1=\"{1}\" x2=\"{0}\" y2=\"{2}\" stroke=\"{3}\"/>",
                b.right, b.bottom, b.top, colour
            );
        }
    }
    out.push_str("</svg>\n");
    out
}

fn render_vector(out: &mut String, v: &TabVector) {
    let colour = alignment_colour(v.alignment);
    let _ = writeln!(
        out,
        "  <line x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\" stroke=\"{}\" stroke-width=\"2\"/>",
        v.start.x, v.start.y, v.end.x, v.end.y, colour
    );
    // Extended ranges draw dashed beyond the confirmed span.
    let _ = writeln!(
        out,
        "  <line x1=\"{0}\" y1=\"{1}\" x2=\"{0}\" y2=\"{2}\" stroke=\"grey\" \
         stroke-dasharray=\"4\"/>",
        v.start.x, v.extended_ymin, v.start.y
    );
    let _ = writeln!(
        out,
        "  <line x1=\"{0}\" y1=\"{1}\" x2=\"{0}\" y2=\"{2}\" stroke=\"grey\" \
         stroke-dasharray=\"4\"/>",
        v.end.x, v.end.y, v.extended_ymax
    );
    let _ = writeln!(
        out,
        "  <text x=\"{}\" y=\"{}\" font-size=\"12\">{}</text>",
        v.start.x, v.start.y, v.percent_score
    );
}

/// Render the final vectors, live ones in their alignment colours and
/// dead ones in grey, left-to-right.
pub fn render_tab_vectors(store: &VectorStore, width: i32, height: i32) -> String {
    let mut out = String::new();
    svg_open(&mut out, width, height);
    for (_, v) in store
        .iter_live()
        .sorted_by_key(|(_, v)| v.sort_key)
    {
        render_vector(&mut out, v);
    }
    for v in store.dead_vectors() {
        let _ = writeln!(
            out,
            "  <line x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\" stroke=\"grey\"/>",
            v.start.x, v.start.y, v.end.x, v.end.y
        );
    }
    out.push_str("</svg>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Blob;
    use crate::geom::{BBox, Point};

    #[test]
    fn test_classification_render_marks_candidates() {
        let mut blobs = BlobSet::new();
        let id = blobs.push(Blob::new(BBox::new(10, 10, 50, 30)));
        blobs.get_mut(id).left_tab = TabState::Confirmed;
        let svg = render_tab_classification(&blobs, 100, 100);
        assert!(svg.contains("stroke=\"green\""));
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn test_vector_render_lists_live_and_dead() {
        let mut store = VectorStore::new();
        let mut v = TabVector::from_boxes(Alignment::LeftAligned, 0, 120, Vec::new());
        v.start = Point::new(40, 10);
        v.end = Point::new(40, 110);
        let id = store.push(v);
        store.sort();
        let mut dead = TabVector::from_boxes(Alignment::Separator, 0, 120, Vec::new());
        dead.start = Point::new(80, 0);
        dead.end = Point::new(80, 120);
        store.push(dead);
        store.kill(crate::vector::VectorId(1));
        let svg = render_tab_vectors(&store, 200, 200);
        assert!(svg.contains("limegreen"));
        assert!(svg.matches("<line").count() >= 4);
        let _ = id;
    }
}

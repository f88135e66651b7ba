//! meridian - tab-stop and column-boundary detection for page layout
//! analysis.
//!
//! Given the connected-component bounding boxes of a scanned page, this
//! crate discovers the near-vertical lines (tab stops, column gutters,
//! rule lines) that structurally organize the page into columns, along
//! with the page's skew and the statistically common column widths.

pub mod blob;
pub mod constraint;
pub mod debug;
pub mod error;
pub mod finder;
pub mod geom;
pub mod grid;
pub mod linefit;
pub mod params;
pub mod render;
pub mod search;
pub mod stats;
pub mod vector;

pub use blob::{Blob, BlobId, BlobSet, RegionKind, TabState};
pub use debug::DebugContext;
pub use error::{Result, TabFindError};
pub use finder::{ColumnWidth, TabFindOutcome, TabFinder};
pub use geom::{BBox, Point, Rotation};
pub use grid::BucketGrid;
pub use params::{AlignParams, FinderConfig};
pub use vector::{Alignment, TabVector, VectorId, VectorStore};

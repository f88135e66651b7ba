//! Connected-component boxes and their tab-candidate state.
//!
//! Blobs are produced by the caller's connected-component stage and owned by
//! a [`BlobSet`] arena for the duration of one page. The grid and the tab
//! vectors refer to blobs by [`BlobId`], never by owning handles.

use crate::geom::BBox;

/// Tab-candidate state of one edge of a blob.
///
/// The ordering is meaningful: classification and search only ever tighten
/// the state towards `Confirmed` or `Deleted`, and several tests use
/// `>= MaybeAligned` to mean "was some kind of candidate".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TabState {
    #[default]
    None,
    MaybeRagged,
    MaybeAligned,
    Confirmed,
    Deleted,
}

/// Coarse region classification supplied by the caller.
///
/// Computing this is the stroke-width collaborator's job; here it only
/// gates which blobs may join a text-line trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegionKind {
    Noise,
    Image,
    #[default]
    Unknown,
    Text,
}

impl RegionKind {
    /// Image and noise blobs never participate in text lines.
    pub fn is_text_like(&self) -> bool {
        matches!(self, RegionKind::Unknown | RegionKind::Text)
    }
}

/// Stable handle to a blob in a [`BlobSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(pub u32);

impl BlobId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One connected-component bounding box with its tab bookkeeping.
#[derive(Debug, Clone)]
pub struct Blob {
    pub bounds: BBox,
    /// Tab state of the left and right edges, mutated during detection.
    pub left_tab: TabState,
    pub right_tab: TabState,
    /// x-bounds of the column the blob sits in, from separator rule lines.
    /// Neighbours outside these do not exist for classification purposes.
    pub left_rule: i32,
    pub right_rule: i32,
    /// Like the rule bounds but measured at the blob centre, used when a
    /// projected search position must not cross a rule line.
    pub left_crossing_rule: i32,
    pub right_crossing_rule: i32,
    /// True if the blob is immediately adjacent to a dashed/dotted leader
    /// run on that side; such edges never become tab candidates.
    pub leader_on_left: bool,
    pub leader_on_right: bool,
    /// Number of rule lines crossing this blob.
    pub line_crossings: i32,
    pub region: RegionKind,
}

impl Blob {
    pub fn new(bounds: BBox) -> Self {
        Self {
            bounds,
            left_tab: TabState::None,
            right_tab: TabState::None,
            left_rule: i32::MIN,
            right_rule: i32::MAX,
            left_crossing_rule: i32::MIN,
            right_crossing_rule: i32::MAX,
            leader_on_left: false,
            leader_on_right: false,
            line_crossings: 0,
            region: RegionKind::Unknown,
        }
    }

    pub fn tab_state(&self, right: bool) -> TabState {
        if right { self.right_tab } else { self.left_tab }
    }

    pub fn set_tab_state(&mut self, right: bool, state: TabState) {
        if right {
            self.right_tab = state;
        } else {
            self.left_tab = state;
        }
    }

    /// The edge x-coordinate relevant to a left or right tab search.
    pub fn tab_edge(&self, right: bool) -> i32 {
        if right {
            self.bounds.right
        } else {
            self.bounds.left
        }
    }

    pub fn leader_on(&self, right: bool) -> bool {
        if right {
            self.leader_on_right
        } else {
            self.leader_on_left
        }
    }
}

/// Arena of blobs for one page. Ids are stable for the page's lifetime;
/// blobs are mutated in place but never removed.
#[derive(Debug, Default)]
pub struct BlobSet {
    blobs: Vec<Blob>,
}

impl BlobSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, blob: Blob) -> BlobId {
        let id = BlobId(self.blobs.len() as u32);
        self.blobs.push(blob);
        id
    }

    pub fn get(&self, id: BlobId) -> &Blob {
        &self.blobs[id.index()]
    }

    pub fn get_mut(&mut self, id: BlobId) -> &mut Blob {
        &mut self.blobs[id.index()]
    }

    pub fn bounds(&self, id: BlobId) -> BBox {
        self.blobs[id.index()].bounds
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = BlobId> + '_ {
        (0..self.blobs.len() as u32).map(BlobId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlobId, &Blob)> {
        self.blobs
            .iter()
            .enumerate()
            .map(|(i, b)| (BlobId(i as u32), b))
    }

    /// Bounding box of every blob, or None for an empty set.
    pub fn extent(&self) -> Option<BBox> {
        let mut it = self.blobs.iter();
        let first = it.next()?.bounds;
        Some(it.fold(first, |acc, b| acc.union(&b.bounds)))
    }
}

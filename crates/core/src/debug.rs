//! Debug gating for the search call chain.

use crate::geom::BBox;

/// Controls which probes emit trace output.
///
/// Passed by reference through the search call chain; the default context
/// is inactive everywhere, so release paths pay only a level compare.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugContext {
    /// Detail level; probes specify the minimum level they need.
    pub level: i32,
    /// Optional rectangle restricting output to events inside it.
    pub region: Option<BBox>,
}

impl DebugContext {
    pub const INACTIVE: DebugContext = DebugContext {
        level: 0,
        region: None,
    };

    pub fn with_level(level: i32) -> Self {
        Self {
            level,
            region: None,
        }
    }

    /// True if a probe of the given detail level at (x, y) should log.
    pub fn active(&self, detail_level: i32, x: i32, y: i32) -> bool {
        if self.level < detail_level {
            return false;
        }
        match self.region {
            Some(r) => x >= r.left && x <= r.right && y >= r.bottom && y <= r.top,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_by_default() {
        let dbg = DebugContext::default();
        assert!(!dbg.active(1, 0, 0));
    }

    #[test]
    fn test_region_gating() {
        let dbg = DebugContext {
            level: 3,
            region: Some(BBox::new(10, 10, 20, 20)),
        };
        assert!(dbg.active(2, 15, 15));
        assert!(!dbg.active(2, 25, 15));
        assert!(!dbg.active(4, 15, 15));
    }
}

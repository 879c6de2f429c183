//! Composite grid layout.

use serde::Serialize;

/// Placement of N equally sized tiles inside a bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridLayout {
    pub rows: u32,
    pub cols: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub output_width: u32,
    pub output_height: u32,
}

impl GridLayout {
    /// Layout for `participants` tiles within `max_width` x `max_height`.
    ///
    /// One participant fills the whole box. Otherwise the grid is as square as
    /// possible (`cols = ceil(sqrt(n))`, `rows = ceil(n / cols)`), cells are
    /// rounded down and the output is exactly `cell * dims`, so it never
    /// exceeds the box. Returns `None` for zero participants.
    #[must_use]
    pub fn compute(participants: usize, max_width: u32, max_height: u32) -> Option<Self> {
        let n = u32::try_from(participants).ok().filter(|n| *n > 0)?;
        if n == 1 {
            return Some(Self {
                rows: 1,
                cols: 1,
                cell_width: max_width,
                cell_height: max_height,
                output_width: max_width,
                output_height: max_height,
            });
        }

        let cols = ceil_sqrt(n);
        let rows = n.div_ceil(cols);
        let cell_width = max_width / cols;
        let cell_height = max_height / rows;

        Some(Self {
            rows,
            cols,
            cell_width,
            cell_height,
            output_width: cell_width * cols,
            output_height: cell_height * rows,
        })
    }
}

fn ceil_sqrt(n: u32) -> u32 {
    let mut root = 1u32;
    while u64::from(root) * u64::from(root) < u64::from(n) {
        root += 1;
    }
    root
}

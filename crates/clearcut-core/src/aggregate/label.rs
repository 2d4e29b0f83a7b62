//! 8-connected component labeling over the `alert` band.
//!
//! Pixels join a component only when they carry the same class, so a
//! component is homogeneous in confidence. Class 0 is background and keeps
//! label 0. A component stops growing at `max_pixels`; the pixels it could
//! not absorb seed further components in scan order.

use std::collections::VecDeque;

use crate::grid::Grid;

/// Moore neighbourhood offsets `(d_row, d_col)`.
const MOORE: [(isize, isize); 8] = [(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, -1), (1, 0), (1, 1)];

/// Label image plus per-label pixel counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    pub width: usize,
    pub height: usize,
    /// Row-major, same layout as the source grid. 0 = background.
    pub ids: Vec<u32>,
    /// `sizes[label - 1]` = pixel count of `label`.
    pub sizes: Vec<usize>,
    /// `classes[label - 1]` = alert class shared by the component.
    pub classes: Vec<u8>,
}

impl Labels {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.ids[row * self.width + col]
    }

    /// Label at a signed position; outside the grid reads as background.
    #[inline]
    pub fn get_signed(&self, row: isize, col: isize) -> u32 {
        if row < 0 || col < 0 || row >= self.height as isize || col >= self.width as isize {
            0
        } else {
            self.get(row as usize, col as usize)
        }
    }

    pub fn count(&self) -> usize {
        self.sizes.len()
    }
}

/// Label every non-zero pixel of `alert`. Labels are assigned in row-major
/// scan order starting at 1, so the result depends only on the input.
pub fn label_components(alert: &Grid<u8>, max_pixels: usize) -> Labels {
    let (w, h) = (alert.width, alert.height);
    let cap = max_pixels.max(1);
    let mut ids = vec![0u32; w * h];
    let mut sizes = Vec::new();
    let mut classes = Vec::new();
    let mut queue = VecDeque::new();

    for seed in 0..w * h {
        let class = alert.data[seed];
        if class == 0 || ids[seed] != 0 {
            continue;
        }
        let label = sizes.len() as u32 + 1;
        ids[seed] = label;
        let mut size = 1usize;
        queue.clear();
        queue.push_back(seed);

        'grow: while let Some(idx) = queue.pop_front() {
            let (r, c) = ((idx / w) as isize, (idx % w) as isize);
            for (dr, dc) in MOORE {
                if size >= cap {
                    break 'grow;
                }
                let (nr, nc) = (r + dr, c + dc);
                if nr < 0 || nc < 0 || nr >= h as isize || nc >= w as isize {
                    continue;
                }
                let n = nr as usize * w + nc as usize;
                if ids[n] == 0 && alert.data[n] == class {
                    ids[n] = label;
                    size += 1;
                    queue.push_back(n);
                }
            }
        }
        sizes.push(size);
        classes.push(class);
    }

    Labels { width: w, height: h, ids, sizes, classes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;

    fn grid(rows: &[&[u8]]) -> Grid<u8> {
        // rows are given north first, like a map
        let h = rows.len();
        let w = rows[0].len();
        let mut g = Grid::new(w, h, BBox::new(0.0, 0.0, w as f64, h as f64), 0);
        for (i, row) in rows.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                g.set(h - 1 - i, c, v);
            }
        }
        g
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let l = label_components(&grid(&[&[1, 0, 0], &[0, 1, 0], &[0, 0, 1]]), 1024);
        assert_eq!(l.count(), 1, "Moore neighbourhood joins diagonals");
        assert_eq!(l.sizes, vec![3]);
    }

    #[test]
    fn classes_do_not_mix() {
        let l = label_components(&grid(&[&[1, 2], &[1, 2]]), 1024);
        assert_eq!(l.count(), 2);
        assert_eq!(l.classes, vec![1, 2]);
        assert_eq!(l.sizes, vec![2, 2]);
    }

    #[test]
    fn background_keeps_label_zero() {
        let l = label_components(&grid(&[&[0, 1], &[0, 0]]), 1024);
        assert_eq!(l.ids.iter().filter(|&&v| v == 0).count(), 3);
    }

    /// ✓ The size cap bounds every component and still labels every pixel.
    #[test]
    fn cap_splits_large_components() {
        let g = Grid::new(10, 10, BBox::new(0.0, 0.0, 1.0, 1.0), 1u8);
        let l = label_components(&g, 16);
        assert!(l.sizes.iter().all(|&s| s <= 16), "sizes {:?}", l.sizes);
        assert_eq!(l.sizes.iter().sum::<usize>(), 100);
        assert!(l.ids.iter().all(|&v| v != 0));
    }

    #[test]
    fn labeling_is_deterministic() {
        let g = grid(&[&[1, 1, 0, 2], &[0, 0, 0, 2], &[1, 0, 1, 0]]);
        assert_eq!(label_components(&g, 1024), label_components(&g, 1024));
    }
}

//! Polygon to boolean mask rasterization.
//!
//! Vertices are `[x, y]` in pixel coordinates. A pixel `(row, col)` is set
//! when its integer coordinate lies inside the polygon under the even-odd
//! rule, with half-open spans in both axes so shared edges are not counted
//! twice.

use ndarray::Array2;

/// One region boundary as `[x, y]` vertices.
pub type Polygon = Vec<[f64; 2]>;

/// Rasterize `polygon` into a `height x width` mask.
pub fn rasterize(polygon: &[[f64; 2]], height: usize, width: usize) -> Array2<bool> {
    let mut mask = Array2::from_elem((height, width), false);
    if polygon.len() < 3 || width == 0 {
        return mask;
    }

    let mut crossings = Vec::with_capacity(polygon.len());
    for row in 0..height {
        let y = row as f64;
        crossings.clear();
        for (idx, start) in polygon.iter().enumerate() {
            let end = polygon[(idx + 1) % polygon.len()];
            let (x0, y0) = (start[0], start[1]);
            let (x1, y1) = (end[0], end[1]);
            if (y0 <= y && y < y1) || (y1 <= y && y < y0) {
                crossings.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            let first = span[0].ceil().max(0.0);
            let last = span[1].ceil().min(width as f64);
            if first >= last {
                continue;
            }
            for col in first as usize..last as usize {
                mask[[row, col]] = true;
            }
        }
    }
    mask
}

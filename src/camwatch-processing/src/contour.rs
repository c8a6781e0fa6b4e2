//! Contour extraction from binary masks
//!
//! Each 8-connected foreground region yields the polygon traced along its
//! outer border (Moore-neighbour tracing, vertices at pixel centres).
//! Areas and moments are computed on that polygon with Green's theorem, so
//! a filled w x h rectangle has area (w-1)(h-1) and a one-pixel-wide line
//! has area zero.

use std::collections::VecDeque;

use image::GrayImage;

/// Neighbour offsets in clockwise order (image y axis points down),
/// starting east.
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

const WEST: usize = 4;

/// Raw spatial moments of a contour polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

/// Closed outer border of one foreground region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    points: Vec<(i32, i32)>,
}

impl Contour {
    pub fn new(points: Vec<(i32, i32)>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[(i32, i32)] {
        &self.points
    }

    /// Twice the signed area and the unnormalised first-moment sums
    fn green_sums(&self) -> (f64, f64, f64) {
        let n = self.points.len();
        if n < 3 {
            return (0.0, 0.0, 0.0);
        }

        let (mut a00, mut a10, mut a01) = (0.0f64, 0.0f64, 0.0f64);
        for i in 0..n {
            let (x0, y0) = self.points[i];
            let (x1, y1) = self.points[(i + 1) % n];
            let (x0, y0, x1, y1) = (x0 as f64, y0 as f64, x1 as f64, y1 as f64);
            let cross = x0 * y1 - x1 * y0;
            a00 += cross;
            a10 += cross * (x0 + x1);
            a01 += cross * (y0 + y1);
        }
        (a00, a10, a01)
    }

    /// Polygon moments, sign-normalised so that `m00` is never negative
    pub fn moments(&self) -> Moments {
        let (a00, a10, a01) = self.green_sums();
        let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
        Moments {
            m00: sign * a00 / 2.0,
            m10: sign * a10 / 6.0,
            m01: sign * a01 / 6.0,
        }
    }

    pub fn area(&self) -> f64 {
        self.moments().m00
    }

    /// Integer centroid (truncated), or `None` for a degenerate contour
    /// whose zeroth moment vanishes
    pub fn centroid(&self) -> Option<(i32, i32)> {
        let (a00, a10, a01) = self.green_sums();
        if a00.abs() < f64::EPSILON {
            return None;
        }
        // m10 / m00 == a10 / (3 * a00); one division keeps integral
        // centroids exact
        Some(((a10 / (3.0 * a00)) as i32, (a01 / (3.0 * a00)) as i32))
    }
}

struct Grid<'a> {
    mask: &'a GrayImage,
    width: i32,
    height: i32,
}

impl Grid<'_> {
    fn is_set(&self, x: i32, y: i32) -> bool {
        x >= 0
            && y >= 0
            && x < self.width
            && y < self.height
            && self.mask.get_pixel(x as u32, y as u32).0[0] > 0
    }

    fn index(&self, x: i32, y: i32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

/// Outer contours of every 8-connected foreground region, in raster order
/// of each region's top-left pixel.
pub fn find_external_contours(mask: &GrayImage) -> Vec<Contour> {
    let (w, h) = mask.dimensions();
    let grid = Grid {
        mask,
        width: w as i32,
        height: h as i32,
    };
    let mut visited = vec![false; w as usize * h as usize];
    let mut contours = Vec::new();

    for y in 0..grid.height {
        for x in 0..grid.width {
            if visited[grid.index(x, y)] || !grid.is_set(x, y) {
                continue;
            }
            // First pixel of a new region in raster order: its west
            // neighbour and the whole row above are background.
            contours.push(Contour::new(trace_border(&grid, (x, y))));
            flood_fill(&grid, (x, y), &mut visited);
        }
    }

    contours
}

/// The contour with the largest area and that area
pub fn largest_contour(contours: &[Contour]) -> Option<(&Contour, f64)> {
    contours
        .iter()
        .map(|c| (c, c.area()))
        .fold(None, |best, (c, area)| match best {
            Some((_, best_area)) if best_area >= area => best,
            _ => Some((c, area)),
        })
}

fn direction_index(dx: i32, dy: i32) -> Option<usize> {
    DIRECTIONS.iter().position(|&d| d == (dx, dy))
}

/// Search clockwise around `current` starting at `from`; returns the next
/// border pixel and the direction (relative to it) of the last background
/// pixel examined.
fn next_border_pixel(grid: &Grid, current: (i32, i32), from: usize) -> Option<((i32, i32), usize)> {
    for k in 0..8 {
        let d = (from + k) % 8;
        let (dx, dy) = DIRECTIONS[d];
        let candidate = (current.0 + dx, current.1 + dy);
        if grid.is_set(candidate.0, candidate.1) {
            let (bx, by) = DIRECTIONS[(d + 7) % 8];
            let backtrack = (current.0 + bx, current.1 + by);
            let rel = direction_index(backtrack.0 - candidate.0, backtrack.1 - candidate.1)?;
            return Some((candidate, rel));
        }
    }
    None
}

fn trace_border(grid: &Grid, start: (i32, i32)) -> Vec<(i32, i32)> {
    let mut points = vec![start];
    let mut current = start;
    let mut from = WEST;
    let mut first_step: Option<(i32, i32)> = None;
    // Every border pixel is entered at most once per neighbour direction
    let limit = 8 * (grid.width as usize) * (grid.height as usize) + 8;

    for _ in 0..limit {
        let Some((next, backtrack)) = next_border_pixel(grid, current, from) else {
            break; // isolated pixel
        };
        match first_step {
            None => first_step = Some(next),
            Some(first) if current == start && next == first => break,
            Some(_) => {}
        }
        points.push(next);
        current = next;
        from = backtrack;
    }

    if points.len() > 1 && points.last() == Some(&start) {
        points.pop();
    }
    points
}

fn flood_fill(grid: &Grid, seed: (i32, i32), visited: &mut [bool]) {
    let mut queue = VecDeque::new();
    visited[grid.index(seed.0, seed.1)] = true;
    queue.push_back(seed);

    while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in DIRECTIONS {
            let (nx, ny) = (x + dx, y + dy);
            if grid.is_set(nx, ny) {
                let idx = grid.index(nx, ny);
                if !visited[idx] {
                    visited[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }
    }
}

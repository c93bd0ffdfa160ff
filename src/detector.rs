use crate::image::Image;
use crate::my_types::*;

/// Minimum-eigenvalue ("good features to track") corner detector.
///
/// ref https://docs.opencv.org/4.x/d4/d8c/tutorial_py_shi_tomasi.html
pub struct Detector {
    ix: Vec<f64>,
    iy: Vec<f64>,
    response: Vec<f64>,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    response: f64,
    x: usize,
    y: usize,
}

impl Detector {
    pub fn new() -> Self {
        Detector {
            ix: vec![],
            iy: vec![],
            response: vec![],
        }
    }

    /// Detect at most `max_points` corners in `channel`.
    ///
    /// A pixel is a candidate when its minimum eigenvalue over a
    /// `window_size` block is a local 3x3 maximum and reaches
    /// `quality * strongest response`. Candidates are accepted strongest
    /// first, skipping any closer than `min_separation` to an accepted one.
    pub fn detect(
        &mut self,
        channel: &Image,
        window_size: usize,
        max_points: usize,
        min_separation: f64,
        quality: f64,
    ) -> Vec<Vector2d> {
        if channel.width < 3 || channel.height < 3 || max_points == 0 || window_size == 0 {
            return vec![];
        }

        self.compute_gradients(channel);
        self.compute_response(channel.width, channel.height, window_size);

        let max_response = self.response.iter().cloned().fold(0., f64::max);
        if max_response <= 0. {
            return vec![];
        }
        let threshold = quality * max_response;

        let mut candidates = self.local_maxima(channel.width, channel.height, threshold);
        // stable sort keeps row-major order among equal responses
        candidates.sort_by(|a, b| b.response.total_cmp(&a.response));

        let min_separation2 = min_separation * min_separation;
        let mut corners: Vec<Vector2d> = vec![];
        for candidate in candidates {
            let point = Vector2d::new(candidate.x as f64, candidate.y as f64);
            if corners
                .iter()
                .any(|c| (c - point).norm_squared() < min_separation2)
            {
                continue;
            }
            corners.push(point);
            if corners.len() == max_points {
                break;
            }
        }
        corners
    }

    fn compute_gradients(&mut self, image: &Image) {
        let w = image.width;
        let h = image.height;
        self.ix.clear();
        self.iy.clear();
        self.ix.reserve(w * h);
        self.iy.reserve(w * h);

        let v = |x: usize, y: usize, dx: i64, dy: i64| image.value_clamped(x as i64 + dx, y as i64 + dy);
        for y in 0..h {
            for x in 0..w {
                // Scharr kernel, same weights as the optical flow gradients
                let gx = (10. * v(x, y, 1, 0) + 3. * v(x, y, 1, 1) + 3. * v(x, y, 1, -1)
                    - 10. * v(x, y, -1, 0)
                    - 3. * v(x, y, -1, 1)
                    - 3. * v(x, y, -1, -1))
                    / 32.;
                let gy = (10. * v(x, y, 0, 1) + 3. * v(x, y, 1, 1) + 3. * v(x, y, -1, 1)
                    - 10. * v(x, y, 0, -1)
                    - 3. * v(x, y, 1, -1)
                    - 3. * v(x, y, -1, -1))
                    / 32.;
                self.ix.push(gx);
                self.iy.push(gy);
            }
        }
    }

    fn compute_response(&mut self, w: usize, h: usize, window_size: usize) {
        let r = (window_size / 2) as i64;
        self.response.clear();
        self.response.resize(w * h, 0.);

        for y in 0..h as i64 {
            for x in 0..w as i64 {
                let mut gradient = Matrix2d::zeros();
                for wy in (y - r).max(0)..=(y + r).min(h as i64 - 1) {
                    for wx in (x - r).max(0)..=(x + r).min(w as i64 - 1) {
                        let i = wy as usize * w + wx as usize;
                        let gx = self.ix[i];
                        let gy = self.iy[i];
                        gradient[(0, 0)] += gx * gx;
                        gradient[(0, 1)] += gx * gy;
                        gradient[(1, 1)] += gy * gy;
                    }
                }
                self.response[y as usize * w + x as usize] = min_eigenvalue(&gradient);
            }
        }
    }

    fn local_maxima(&self, w: usize, h: usize, threshold: f64) -> Vec<Candidate> {
        let mut candidates = vec![];
        for y in 0..h {
            for x in 0..w {
                let response = self.response[y * w + x];
                if response <= 0. || response < threshold {
                    continue;
                }
                let mut is_max = true;
                'neighbours: for ny in y.saturating_sub(1)..=usize::min(y + 1, h - 1) {
                    for nx in x.saturating_sub(1)..=usize::min(x + 1, w - 1) {
                        if self.response[ny * w + nx] > response {
                            is_max = false;
                            break 'neighbours;
                        }
                    }
                }
                if is_max {
                    candidates.push(Candidate { response, x, y });
                }
            }
        }
        candidates
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

/// Smaller eigenvalue of the symmetric structure tensor stored in the upper triangle
fn min_eigenvalue(gradient: &Matrix2d) -> f64 {
    let a = gradient[(0, 0)];
    let b = gradient[(0, 1)];
    let c = gradient[(1, 1)];
    let half_trace = 0.5 * (a + c);
    let half_diff = 0.5 * (a - c);
    half_trace - (half_diff * half_diff + b * b).sqrt()
}

/// Row-major grayscale image storage
#[derive(Clone, Debug)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create an image filled with a single value
    pub fn filled(width: usize, height: usize, value: u8) -> Image {
        Image {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    /// Create an image by evaluating `f(x, y)` for every pixel
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> Image {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image {
            data,
            width,
            height,
        }
    }

    /// Clear the image storage
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get the size for a chosen dimension
    pub fn size(&self, dim: usize) -> usize {
        if dim == 0 {
            self.width
        } else {
            self.height
        }
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Pixel value as float, with coordinates clamped to the image border
    #[inline(always)]
    pub fn value_clamped(&self, x: i64, y: i64) -> f64 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.value(x, y) as f64
    }

    #[inline(always)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Paint an axis aligned rectangle, clipped to the image
    pub fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, value: u8) {
        for yy in y..usize::min(y + h, self.height) {
            for xx in x..usize::min(x + w, self.width) {
                self.set_value(xx, yy, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fn_is_row_major() {
        let image = Image::from_fn(3, 2, |x, y| (10 * y + x) as u8);
        assert_eq!(image.data, vec![0, 1, 2, 10, 11, 12]);
        assert_eq!(image.value(2, 1), 12);
        assert_eq!(image.size(0), 3);
        assert_eq!(image.size(1), 2);
    }

    #[test]
    fn test_value_clamped() {
        let image = Image::from_fn(3, 3, |x, y| (x + 3 * y) as u8);
        assert_eq!(image.value_clamped(-5, -5), 0.);
        assert_eq!(image.value_clamped(10, 1), 5.);
        assert_eq!(image.value_clamped(1, 10), 7.);
    }

    #[test]
    fn test_fill_rect_clips() {
        let mut image = Image::filled(4, 4, 0);
        image.fill_rect(2, 2, 10, 10, 9);
        assert_eq!(image.data.iter().filter(|&&v| v == 9).count(), 4);
        assert_eq!(image.value(3, 3), 9);
        assert_eq!(image.value(1, 3), 0);
    }
}

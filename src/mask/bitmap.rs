//! Boolean keep-mask aligned to a tile.

/// Row-major boolean array shaped `(height, width)`. `true` means keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    /// Create a mask with every pixel set to `value`.
    pub fn filled(width: u32, height: u32, value: bool) -> Self {
        Self {
            width,
            height,
            bits: vec![value; width as usize * height as usize],
        }
    }

    /// Create a mask by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    /// Wrap a row-major vector. Returns `None` if the length does not match.
    pub fn from_vec(width: u32, height: u32, bits: Vec<bool>) -> Option<Self> {
        (bits.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            bits,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Value at `(x, y)`; out-of-range coordinates read as `false`.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.bits[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            self.bits[y as usize * self.width as usize + x as usize] = value;
        }
    }

    /// Pixel-wise logical AND with another mask of the same shape.
    ///
    /// Pixels of `self` not covered by `other` are cleared.
    pub fn and_assign(&mut self, other: &Mask) {
        if self.dimensions() == other.dimensions() {
            for (a, b) in self.bits.iter_mut().zip(&other.bits) {
                *a &= *b;
            }
            return;
        }

        for y in 0..self.height {
            for x in 0..self.width {
                let keep = self.get(x, y) && other.get(x, y);
                self.set(x, y, keep);
            }
        }
    }

    /// Whether at least one pixel is kept.
    pub fn any(&self) -> bool {
        self.bits.iter().any(|&b| b)
    }

    /// Whether every pixel is kept.
    pub fn all(&self) -> bool {
        self.bits.iter().all(|&b| b)
    }

    /// Number of kept pixels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

/// An interferometer quadrature pair, `re` is the X (cosine) and `im` the Y (sine) channel
pub type Quadrature = Complex<i32>;

impl Quadrature {
    /// Phase of the pair in radians, `atan2(y, x)`, in [-pi, pi]
    pub fn arg(&self) -> f64 {
        (self.im as f64).atan2(self.re as f64)
    }
}

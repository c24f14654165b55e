//! Compensated summation
//!
//! Neumaier's variant of Kahan summation: the rounding error of every
//! addition is kept in a separate compensation term, folding whichever
//! operand is smaller in magnitude into it. Once the running sum overflows
//! the compensation is reset, since it would otherwise turn `Inf` into
//! `NaN` when added back.

/// Add `inc` to `sum` with compensation `c`, returning the new pair
// Must not be inlined: the compiler may reassociate the float operations and
// lose the error term.
#[inline(never)]
pub fn kahan_inc(inc: f64, sum: f64, c: f64) -> (f64, f64) {
    let t = sum + inc;

    let new_c = if t.is_infinite() {
        0.0
    } else if sum.abs() >= inc.abs() {
        c + ((sum - t) + inc)
    } else {
        c + ((inc - t) + sum)
    };

    (t, new_c)
}

/// Running compensated sum
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    /// Empty sum
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one term
    #[inline]
    pub fn add(&mut self, inc: f64) {
        (self.sum, self.c) = kahan_inc(inc, self.sum, self.c);
    }

    /// Compensated total
    ///
    /// An infinite running sum is returned as is.
    pub fn value(&self) -> f64 {
        if self.sum.is_infinite() {
            self.sum
        } else {
            self.sum + self.c
        }
    }
}

impl FromIterator<f64> for KahanSum {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = KahanSum::new();
        for v in iter {
            acc.add(v);
        }
        acc
    }
}

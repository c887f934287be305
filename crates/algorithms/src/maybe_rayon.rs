//! Row loops that run on rayon with the `parallel` feature and sequentially
//! without it.
//!
//! Score kernels only call `into_par_iter()` on a row range and chain
//! ordinary adapters after it, so the sequential stand-in just forwards to
//! `into_iter()`.

#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
pub trait IntoParallelIterator {
    type Iter: Iterator<Item = Self::Item>;
    type Item;
    fn into_par_iter(self) -> Self::Iter;
}

#[cfg(not(feature = "parallel"))]
impl<I: IntoIterator> IntoParallelIterator for I {
    type Iter = I::IntoIter;
    type Item = I::Item;

    fn into_par_iter(self) -> Self::Iter {
        self.into_iter()
    }
}

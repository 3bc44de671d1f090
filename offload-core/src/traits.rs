use std::fmt::Debug;

use crate::matrix::{StorageFormat, ValueKind};

/// Shape and storage metadata every matrix handed to a solver exposes.
pub trait Matrix: Debug {
    /// Returns the dimensions of the matrix as (rows, columns).
    fn dims(&self) -> (usize, usize);

    fn value_kind(&self) -> ValueKind;

    fn format(&self) -> StorageFormat;

    /// Number of explicitly stored elements.
    fn nnz(&self) -> usize;

    fn rows(&self) -> usize {
        self.dims().0
    }

    fn cols(&self) -> usize {
        self.dims().1
    }

    fn is_square(&self) -> bool {
        let (rows, cols) = self.dims();
        rows == cols
    }
}

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{OffloadError, Result};
use crate::traits::Matrix;

/// Storage layout tag, as written in the flattened header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageFormat {
    Dense,
    Csr,
    Bcsr,
}

impl StorageFormat {
    pub fn tag(self) -> u64 {
        match self {
            StorageFormat::Dense => 0,
            StorageFormat::Csr => 1,
            StorageFormat::Bcsr => 2,
        }
    }

    pub fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            0 => Ok(StorageFormat::Dense),
            1 => Ok(StorageFormat::Csr),
            2 => Ok(StorageFormat::Bcsr),
            other => Err(OffloadError::UnsupportedFormat(format!(
                "storage format tag {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Real,
    Complex,
}

impl ValueKind {
    pub fn tag(self) -> u64 {
        match self {
            ValueKind::Real => 0,
            ValueKind::Complex => 1,
        }
    }

    pub fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            0 => Ok(ValueKind::Real),
            1 => Ok(ValueKind::Complex),
            other => Err(OffloadError::UnsupportedFormat(format!("value kind tag {other}"))),
        }
    }

    /// Number of f64 slots one element occupies.
    pub fn width(self) -> usize {
        match self {
            ValueKind::Real => 1,
            ValueKind::Complex => 2,
        }
    }
}

/// Structural property the solver firmware may exploit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Representation {
    #[default]
    General,
    Symmetric,
    Hermitian,
    Triangular,
}

impl Representation {
    pub fn tag(self) -> u64 {
        match self {
            Representation::General => 0,
            Representation::Symmetric => 1,
            Representation::Hermitian => 2,
            Representation::Triangular => 3,
        }
    }

    pub fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            0 => Ok(Representation::General),
            1 => Ok(Representation::Symmetric),
            2 => Ok(Representation::Hermitian),
            3 => Ok(Representation::Triangular),
            other => Err(OffloadError::UnsupportedFormat(format!(
                "representation tag {other}"
            ))),
        }
    }
}

/// One matrix element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Real(f64),
    Complex { re: f64, im: f64 },
}

impl Scalar {
    pub fn re(self) -> f64 {
        match self {
            Scalar::Real(v) => v,
            Scalar::Complex { re, .. } => re,
        }
    }

    fn read(values: &[f64], index: usize, kind: ValueKind) -> Self {
        match kind {
            ValueKind::Real => Scalar::Real(values[index]),
            ValueKind::Complex => Scalar::Complex {
                re: values[2 * index],
                im: values[2 * index + 1],
            },
        }
    }

    fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Real => Scalar::Real(0.0),
            ValueKind::Complex => Scalar::Complex { re: 0.0, im: 0.0 },
        }
    }
}

/// Row-major dense values, `rows × lda` elements.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseStorage {
    pub(crate) lda: usize,
    pub(crate) values: Vec<f64>,
}

/// Descriptive CSR flags carried through the wire format unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsrFlags {
    pub unit_diag_implicit: bool,
    pub sorted_indices: bool,
    pub upper: bool,
    pub lower: bool,
    pub shared: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsrStorage {
    /// `rows + 1` entries, offset by the matrix base index.
    pub(crate) row_ptr: Vec<usize>,
    pub(crate) col_indices: Vec<usize>,
    pub(crate) values: Vec<f64>,
    pub(crate) flags: CsrFlags,
}

impl CsrStorage {
    pub fn new(row_ptr: Vec<usize>, col_indices: Vec<usize>, values: Vec<f64>) -> Self {
        Self {
            row_ptr,
            col_indices,
            values,
            flags: CsrFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: CsrFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn flags(&self) -> CsrFlags {
        self.flags
    }
}

/// A run of block rows sharing one block size.
///
/// The first chunk of a BCSR matrix holds the full-size blocks; following
/// chunks hold the leftover rows that do not fill a complete block row.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRowChunk {
    pub(crate) block_size: usize,
    pub(crate) block_rows: usize,
    /// `block_rows + 1` entries, offset by the matrix base index.
    pub(crate) row_ptr: Vec<usize>,
    /// Block column indices, offset by the matrix base index.
    pub(crate) col_indices: Vec<usize>,
    /// `nnzb · block_size²` elements, each block row-major.
    pub(crate) values: Vec<f64>,
}

impl BlockRowChunk {
    pub fn new(
        block_size: usize,
        block_rows: usize,
        row_ptr: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        Self {
            block_size,
            block_rows,
            row_ptr,
            col_indices,
            values,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_rows(&self) -> usize {
        self.block_rows
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn rows(&self) -> usize {
        self.block_rows * self.block_size
    }

    pub fn nnz_blocks(&self) -> usize {
        self.col_indices.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BcsrStorage {
    pub(crate) chunks: Vec<BlockRowChunk>,
    pub(crate) shared: bool,
}

impl BcsrStorage {
    pub fn chunks(&self) -> &[BlockRowChunk] {
        &self.chunks
    }

    pub fn shared(&self) -> bool {
        self.shared
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatrixStorage {
    Dense(DenseStorage),
    Csr(CsrStorage),
    Bcsr(BcsrStorage),
}

impl MatrixStorage {
    pub fn format(&self) -> StorageFormat {
        match self {
            MatrixStorage::Dense(_) => StorageFormat::Dense,
            MatrixStorage::Csr(_) => StorageFormat::Csr,
            MatrixStorage::Bcsr(_) => StorageFormat::Bcsr,
        }
    }
}

/// A caller-owned matrix in one of the three supported storage layouts.
///
/// Index arrays of sparse layouts are stored offset by `base_index` (0 or 1);
/// the element accessors on this type always take 0-based coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixView {
    rows: usize,
    cols: usize,
    base_index: usize,
    value_kind: ValueKind,
    representation: Representation,
    pub(crate) storage: MatrixStorage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Triplet {
    row: usize,
    col: usize,
    value: f64,
}

impl Triplet {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Triplet { row, col, value }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

fn check_base(base_index: usize) -> Result<()> {
    if base_index > 1 {
        return Err(OffloadError::InvalidDimensions(format!(
            "base index must be 0 or 1, got {base_index}"
        )));
    }
    Ok(())
}

/// Product of matrix extents, or `InvalidDimensions` if it overflows.
fn checked_extent(factors: &[usize], what: &str) -> Result<usize> {
    factors
        .iter()
        .try_fold(1usize, |acc, &f| acc.checked_mul(f))
        .ok_or_else(|| OffloadError::InvalidDimensions(format!("{what} overflows usize")))
}

/// Shared validation for CSR and each BCSR chunk.
fn check_compressed(
    outer: usize,
    inner_limit: usize,
    base_index: usize,
    row_ptr: &[usize],
    col_indices: &[usize],
    values_len: usize,
    value_stride: usize,
) -> Result<()> {
    let expected_ptrs = outer.checked_add(1).ok_or_else(|| {
        OffloadError::InvalidDimensions(format!("row count {outer} overflows usize"))
    })?;
    if row_ptr.len() != expected_ptrs {
        return Err(OffloadError::InvalidDimensions(format!(
            "row_ptr length must be rows + 1 ({}), got {}",
            expected_ptrs,
            row_ptr.len()
        )));
    }
    if row_ptr[0] != base_index {
        return Err(OffloadError::InvalidDimensions(format!(
            "First element of row_ptr must equal the base index {base_index}"
        )));
    }
    if row_ptr.windows(2).any(|w| w[1] < w[0]) {
        return Err(OffloadError::InvalidDimensions(
            "row_ptr must be non-decreasing".to_string(),
        ));
    }
    let nnz = row_ptr[outer] - base_index;
    if col_indices.len() != nnz {
        return Err(OffloadError::InvalidDimensions(format!(
            "Last element of row_ptr implies {} entries, col_indices has {}",
            nnz,
            col_indices.len()
        )));
    }
    let expected_values = checked_extent(&[nnz, value_stride], "value count")?;
    if values_len != expected_values {
        return Err(OffloadError::InvalidDimensions(format!(
            "values and col_indices disagree: expected {} values, got {}",
            expected_values, values_len
        )));
    }
    if col_indices
        .iter()
        .any(|&c| c < base_index || c - base_index >= inner_limit)
    {
        return Err(OffloadError::InvalidDimensions(
            "Column index out of bounds".to_string(),
        ));
    }
    Ok(())
}

impl MatrixView {
    /// Dense matrix stored row-major with leading dimension `lda`.
    pub fn dense(
        rows: usize,
        cols: usize,
        lda: usize,
        value_kind: ValueKind,
        values: Vec<f64>,
    ) -> Result<Self> {
        if lda < cols {
            return Err(OffloadError::InvalidDimensions(format!(
                "Leading dimension ({lda}) must be at least the column count ({cols})"
            )));
        }
        let expected = checked_extent(&[rows, lda, value_kind.width()], "dense value count")?;
        if values.len() != expected {
            return Err(OffloadError::InvalidDimensions(format!(
                "Data length ({}) does not match dimensions ({}x{}, lda {})",
                values.len(),
                rows,
                cols,
                lda
            )));
        }
        Ok(Self {
            rows,
            cols,
            base_index: 0,
            value_kind,
            representation: Representation::General,
            storage: MatrixStorage::Dense(DenseStorage { lda, values }),
        })
    }

    /// Real dense matrix from a row-major slice of rows.
    pub fn from_dense_rows(dense: &[Vec<f64>]) -> Result<Self> {
        let rows = dense.len();
        let cols = dense.first().map_or(0, |row| row.len());
        if dense.iter().any(|row| row.len() != cols) {
            return Err(OffloadError::InvalidDimensions(
                "Input dense matrix must be rectangular".to_string(),
            ));
        }
        let values = dense.iter().flatten().copied().collect();
        Self::dense(rows, cols, cols, ValueKind::Real, values)
    }

    pub fn csr(
        rows: usize,
        cols: usize,
        base_index: usize,
        value_kind: ValueKind,
        storage: CsrStorage,
    ) -> Result<Self> {
        check_base(base_index)?;
        check_compressed(
            rows,
            cols,
            base_index,
            &storage.row_ptr,
            &storage.col_indices,
            storage.values.len(),
            value_kind.width(),
        )?;
        Ok(Self {
            rows,
            cols,
            base_index,
            value_kind,
            representation: Representation::General,
            storage: MatrixStorage::Csr(storage),
        })
    }

    /// Real CSR matrix from its three arrays.
    pub fn from_csr(
        rows: usize,
        cols: usize,
        base_index: usize,
        values: Vec<f64>,
        col_indices: Vec<usize>,
        row_ptr: Vec<usize>,
    ) -> Result<Self> {
        Self::csr(
            rows,
            cols,
            base_index,
            ValueKind::Real,
            CsrStorage::new(row_ptr, col_indices, values),
        )
    }

    /// Real, 0-based CSR matrix assembled from unordered triplets.
    pub fn from_triplets(rows: usize, cols: usize, triplets: Vec<Triplet>) -> Result<Self> {
        let mut coords = triplets;
        coords.sort_unstable_by_key(|t| (t.row, t.col));

        let mut row_ptr = vec![0usize; rows + 1];
        for t in &coords {
            if t.row >= rows {
                return Err(OffloadError::InvalidDimensions(
                    "Row index out of bounds".to_string(),
                ));
            }
            if t.col >= cols {
                return Err(OffloadError::InvalidDimensions(
                    "Column index out of bounds".to_string(),
                ));
            }
            row_ptr[t.row + 1] += 1;
        }
        for i in 1..=rows {
            row_ptr[i] += row_ptr[i - 1];
        }
        let col_indices = coords.iter().map(|t| t.col).collect();
        let values = coords.iter().map(|t| t.value).collect();

        let flags = CsrFlags {
            sorted_indices: true,
            ..CsrFlags::default()
        };
        Self::csr(
            rows,
            cols,
            0,
            ValueKind::Real,
            CsrStorage::new(row_ptr, col_indices, values).with_flags(flags),
        )
    }

    pub fn bcsr(
        rows: usize,
        cols: usize,
        base_index: usize,
        value_kind: ValueKind,
        chunks: Vec<BlockRowChunk>,
        shared: bool,
    ) -> Result<Self> {
        check_base(base_index)?;
        if chunks.is_empty() {
            return Err(OffloadError::InvalidDimensions(
                "BCSR matrix needs at least one block-row chunk".to_string(),
            ));
        }
        let mut covered = 0usize;
        for chunk in &chunks {
            if chunk.block_size == 0 {
                return Err(OffloadError::InvalidDimensions(
                    "BCSR block size must be positive".to_string(),
                ));
            }
            let block_cols = cols.div_ceil(chunk.block_size);
            check_compressed(
                chunk.block_rows,
                block_cols,
                base_index,
                &chunk.row_ptr,
                &chunk.col_indices,
                chunk.values.len(),
                checked_extent(
                    &[chunk.block_size, chunk.block_size, value_kind.width()],
                    "BCSR block value count",
                )?,
            )?;
            covered = checked_extent(&[chunk.block_rows, chunk.block_size], "BCSR chunk rows")?
                .checked_add(covered)
                .ok_or_else(|| {
                    OffloadError::InvalidDimensions("BCSR row coverage overflows usize".to_string())
                })?;
        }
        if covered != rows {
            return Err(OffloadError::InvalidDimensions(format!(
                "BCSR chunks cover {covered} rows, matrix has {rows}"
            )));
        }
        Ok(Self {
            rows,
            cols,
            base_index,
            value_kind,
            representation: Representation::General,
            storage: MatrixStorage::Bcsr(BcsrStorage { chunks, shared }),
        })
    }

    pub fn with_representation(mut self, representation: Representation) -> Self {
        self.representation = representation;
        self
    }

    pub fn base_index(&self) -> usize {
        self.base_index
    }

    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    pub fn format(&self) -> StorageFormat {
        self.storage.format()
    }

    pub fn storage(&self) -> &MatrixStorage {
        &self.storage
    }

    /// `lda` for dense storage, the column count otherwise.
    pub fn leading_dimension(&self) -> usize {
        match &self.storage {
            MatrixStorage::Dense(d) => d.lda,
            MatrixStorage::Csr(_) | MatrixStorage::Bcsr(_) => self.cols,
        }
    }

    /// Number of stored elements (explicit zeros inside blocks included).
    pub fn nnz(&self) -> usize {
        match &self.storage {
            MatrixStorage::Dense(_) => self.rows * self.cols,
            MatrixStorage::Csr(c) => c.col_indices.len(),
            MatrixStorage::Bcsr(b) => b
                .chunks
                .iter()
                .map(|c| c.nnz_blocks() * c.block_size * c.block_size)
                .sum(),
        }
    }

    /// Visits the stored entries of one row as `(0-based column, element)`.
    fn row_entries(&self, row: usize, mut visit: impl FnMut(usize, Scalar)) {
        let base = self.base_index;
        let kind = self.value_kind;
        match &self.storage {
            MatrixStorage::Dense(d) => {
                for col in 0..self.cols {
                    visit(col, Scalar::read(&d.values, row * d.lda + col, kind));
                }
            }
            MatrixStorage::Csr(c) => {
                for k in (c.row_ptr[row] - base)..(c.row_ptr[row + 1] - base) {
                    visit(c.col_indices[k] - base, Scalar::read(&c.values, k, kind));
                }
            }
            MatrixStorage::Bcsr(b) => {
                let mut first_row = 0;
                for chunk in &b.chunks {
                    if row >= first_row + chunk.rows() {
                        first_row += chunk.rows();
                        continue;
                    }
                    let bs = chunk.block_size;
                    let local = row - first_row;
                    let (block_row, row_in_block) = (local / bs, local % bs);
                    let start = chunk.row_ptr[block_row] - base;
                    let end = chunk.row_ptr[block_row + 1] - base;
                    for k in start..end {
                        let first_col = (chunk.col_indices[k] - base) * bs;
                        for c in 0..bs {
                            let col = first_col + c;
                            if col < self.cols {
                                let index = k * bs * bs + row_in_block * bs + c;
                                visit(col, Scalar::read(&chunk.values, index, kind));
                            }
                        }
                    }
                    return;
                }
            }
        }
    }

    /// Element at 0-based `(row, col)`; structural zeros read as zero.
    pub fn get(&self, row: usize, col: usize) -> Option<Scalar> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let mut found = None;
        self.row_entries(row, |c, value| {
            if c == col && found.is_none() {
                found = Some(value);
            }
        });
        Some(found.unwrap_or_else(|| Scalar::zero(self.value_kind)))
    }

    fn require_real(&self, operation: &str) -> Result<()> {
        if self.value_kind != ValueKind::Real {
            return Err(OffloadError::UnsupportedFormat(format!(
                "{operation} is only implemented for real matrices"
            )));
        }
        Ok(())
    }

    /// `y[i - rows.start] = (A x)[i]` for every row in `rows`.
    pub fn matvec_rows(&self, rows: Range<usize>, x: &[f64]) -> Result<Vec<f64>> {
        self.require_real("matvec")?;
        if x.len() != self.cols || rows.end > self.rows {
            return Err(OffloadError::InvalidDimensions(format!(
                "matvec over rows {:?} of a {}x{} matrix with x of length {}",
                rows,
                self.rows,
                self.cols,
                x.len()
            )));
        }
        Ok(rows
            .map(|row| {
                let mut sum = 0.0;
                self.row_entries(row, |col, value| sum += value.re() * x[col]);
                sum
            })
            .collect())
    }

    /// `A^T x`.
    pub fn transpose_matvec(&self, x: &[f64]) -> Result<Vec<f64>> {
        self.transpose_matvec_rows(0..self.rows, x)
    }

    /// Contribution of the rows in `rows` to `A^T x`; `x` has one entry per row.
    pub fn transpose_matvec_rows(&self, rows: Range<usize>, x: &[f64]) -> Result<Vec<f64>> {
        self.require_real("transpose matvec")?;
        if x.len() != self.rows || rows.end > self.rows {
            return Err(OffloadError::InvalidDimensions(format!(
                "transpose matvec over rows {:?} of a {}x{} matrix with x of length {}",
                rows,
                self.rows,
                self.cols,
                x.len()
            )));
        }
        let mut y = vec![0.0; self.cols];
        for row in rows {
            let xi = x[row];
            self.row_entries(row, |col, value| y[col] += value.re() * xi);
        }
        Ok(y)
    }

    /// Assembles a view from decoded parts; callers have already validated them.
    pub(crate) fn from_parts(
        rows: usize,
        cols: usize,
        base_index: usize,
        value_kind: ValueKind,
        representation: Representation,
        storage: MatrixStorage,
    ) -> Result<Self> {
        let view = match storage {
            MatrixStorage::Dense(d) => Self::dense(rows, cols, d.lda, value_kind, d.values)?,
            MatrixStorage::Csr(c) => Self::csr(rows, cols, base_index, value_kind, c)?,
            MatrixStorage::Bcsr(b) => {
                Self::bcsr(rows, cols, base_index, value_kind, b.chunks, b.shared)?
            }
        };
        if view.base_index != base_index {
            return Err(OffloadError::MalformedBuffer(format!(
                "dense matrix carries base index {base_index}"
            )));
        }
        Ok(view.with_representation(representation))
    }
}

impl Matrix for MatrixView {
    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    fn format(&self) -> StorageFormat {
        self.storage.format()
    }

    fn nnz(&self) -> usize {
        MatrixView::nnz(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_csr() -> MatrixView {
        // [ 1.0, 0.0, 2.0, 0.0 ]
        // [ 0.0, 3.0, 0.0, 4.0 ]
        // [ 0.0, 0.0, 5.0, 0.0 ]
        MatrixView::from_csr(
            3,
            4,
            0,
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![0, 2, 1, 3, 2],
            vec![0, 2, 4, 5],
        )
        .unwrap()
    }

    #[test]
    fn test_csr_get() {
        let matrix = sample_csr();
        assert_eq!(matrix.dims(), (3, 4));
        assert_eq!(matrix.nnz(), 5);
        assert_eq!(matrix.get(0, 2), Some(Scalar::Real(2.0)));
        assert_eq!(matrix.get(1, 3), Some(Scalar::Real(4.0)));
        assert_eq!(matrix.get(2, 0), Some(Scalar::Real(0.0)));
        assert_eq!(matrix.get(3, 0), None);
        assert_eq!(matrix.get(0, 4), None);
    }

    #[test]
    fn test_one_based_csr_get() {
        let identity =
            MatrixView::from_csr(3, 3, 1, vec![1.0; 3], vec![1, 2, 3], vec![1, 2, 3, 4]).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_eq!(identity.get(i, j), Some(Scalar::Real(expected)));
            }
        }
    }

    #[test]
    fn test_from_csr_invalid_row_ptr_len() {
        match MatrixView::from_csr(3, 4, 0, vec![1.0], vec![0], vec![0, 1]) {
            Err(OffloadError::InvalidDimensions(msg)) => assert!(msg.contains("row_ptr length")),
            other => panic!("Expected InvalidDimensions error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_csr_base_mismatch() {
        // 0-based arrays declared as 1-based.
        match MatrixView::from_csr(2, 2, 1, vec![1.0, 1.0], vec![0, 1], vec![0, 1, 2]) {
            Err(OffloadError::InvalidDimensions(msg)) => assert!(msg.contains("base index")),
            other => panic!("Expected InvalidDimensions error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_csr_invalid_col_index() {
        match MatrixView::from_csr(2, 3, 0, vec![1.0, 2.0], vec![0, 3], vec![0, 1, 2]) {
            Err(OffloadError::InvalidDimensions(msg)) => {
                assert!(msg.contains("Column index out of bounds"))
            }
            other => panic!("Expected InvalidDimensions error, got {:?}", other),
        }
    }

    #[test]
    fn test_dense_with_padding_lda() {
        // 2x2 matrix stored with lda 3; the padding column is ignored.
        let matrix =
            MatrixView::dense(2, 2, 3, ValueKind::Real, vec![1.0, 2.0, 9.0, 3.0, 4.0, 9.0])
                .unwrap();
        assert_eq!(matrix.leading_dimension(), 3);
        assert_eq!(matrix.get(1, 0), Some(Scalar::Real(3.0)));
        assert_eq!(matrix.matvec_rows(0..2, &[1.0, 1.0]).unwrap(), vec![3.0, 7.0]);
    }

    #[test]
    fn test_complex_dense_get() {
        let matrix = MatrixView::dense(1, 2, 2, ValueKind::Complex, vec![1.0, -1.0, 2.0, 0.5])
            .unwrap();
        assert_eq!(matrix.get(0, 1), Some(Scalar::Complex { re: 2.0, im: 0.5 }));
        assert!(matches!(
            matrix.matvec_rows(0..1, &[1.0, 1.0]),
            Err(OffloadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_bcsr_with_leftover_chunk() {
        // 3x4 matrix: one 2x2 block row plus a 1-row leftover chunk.
        // [ 1 2 0 0 ]
        // [ 3 4 0 0 ]
        // [ 0 0 0 5 ]
        let full = BlockRowChunk::new(2, 1, vec![0, 1], vec![0], vec![1.0, 2.0, 3.0, 4.0]);
        let leftover = BlockRowChunk::new(1, 1, vec![0, 1], vec![3], vec![5.0]);
        let matrix =
            MatrixView::bcsr(3, 4, 0, ValueKind::Real, vec![full, leftover], false).unwrap();

        assert_eq!(matrix.get(1, 0), Some(Scalar::Real(3.0)));
        assert_eq!(matrix.get(2, 3), Some(Scalar::Real(5.0)));
        assert_eq!(matrix.get(2, 0), Some(Scalar::Real(0.0)));
        assert_eq!(
            matrix.matvec_rows(0..3, &[1.0, 1.0, 1.0, 1.0]).unwrap(),
            vec![3.0, 7.0, 5.0]
        );
        assert_eq!(
            matrix.transpose_matvec(&[1.0, 1.0, 1.0]).unwrap(),
            vec![4.0, 6.0, 0.0, 5.0]
        );
    }

    #[test]
    fn test_bcsr_rows_must_be_covered() {
        let full = BlockRowChunk::new(2, 1, vec![0, 1], vec![0], vec![1.0; 4]);
        match MatrixView::bcsr(3, 2, 0, ValueKind::Real, vec![full], false) {
            Err(OffloadError::InvalidDimensions(msg)) => assert!(msg.contains("cover")),
            other => panic!("Expected InvalidDimensions error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_triplets_sorts_and_counts() {
        let matrix = MatrixView::from_triplets(
            2,
            2,
            vec![
                Triplet::new(1, 1, 4.0),
                Triplet::new(0, 1, 2.0),
                Triplet::new(0, 0, 1.0),
            ],
        )
        .unwrap();
        match matrix.storage() {
            MatrixStorage::Csr(c) => {
                assert_eq!(c.row_ptr(), &[0, 2, 3]);
                assert_eq!(c.col_indices(), &[0, 1, 1]);
                assert!(c.flags().sorted_indices);
            }
            other => panic!("Expected CSR storage, got {:?}", other),
        }
    }
}

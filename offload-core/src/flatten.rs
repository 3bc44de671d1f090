//! Flat, self-describing wire format for [`MatrixView`].
//!
//! Layout: a header of seven `u64` fields (rows, cols, base index, leading
//! dimension, storage tag, value-kind tag, representation tag) followed by a
//! format payload. Scalars are 64-bit and 8-byte aligned. Every bulk array is
//! preceded by its byte length and starts at a multiple of
//! [`FORMAT_ALIGNMENT`] from the beginning of the buffer.
//!
//! CSR payload: base index, unit-diagonal, sorted, upper, lower flags, then
//! row pointer, column indices and values as bulk arrays, then the shared
//! flag. DENSE payload: `lda`, then the values bulk array. BCSR payload: the
//! chunk count, then per chunk its block size, block-row count, block row
//! pointer, block column indices and block values, then the shared flag.
//!
//! Measuring and writing are the same walk over the layout, so
//! [`get_size`] and [`flatten`] cannot disagree on padding.

use bytemuck::Pod;

use crate::buffer::AlignedBuffer;
use crate::error::{OffloadError, Result};
use crate::matrix::{
    BcsrStorage, BlockRowChunk, CsrFlags, CsrStorage, DenseStorage, MatrixStorage, MatrixView,
    Representation, StorageFormat, ValueKind,
};
use crate::traits::Matrix;

/// Alignment of every bulk array, relative to the buffer start.
pub const FORMAT_ALIGNMENT: usize = 64;
/// Alignment of every scalar field.
pub const SCALAR_ALIGNMENT: usize = 8;

const SCALAR_BYTES: usize = std::mem::size_of::<u64>();

#[inline]
pub(crate) fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Walks the wire layout; with no output attached it only measures.
struct Emitter<'b> {
    out: Option<&'b mut [u8]>,
    offset: usize,
    bulk_offsets: Vec<usize>,
}

impl<'b> Emitter<'b> {
    fn measuring() -> Self {
        Self {
            out: None,
            offset: 0,
            bulk_offsets: Vec::new(),
        }
    }

    fn writing(out: &'b mut [u8]) -> Self {
        Self {
            out: Some(out),
            offset: 0,
            bulk_offsets: Vec::new(),
        }
    }

    fn region(&mut self, len: usize) -> Result<Option<&mut [u8]>> {
        let start = self.offset;
        self.offset += len;
        match self.out.as_deref_mut() {
            None => Ok(None),
            Some(out) => {
                let capacity = out.len();
                out.get_mut(start..start + len).map(Some).ok_or_else(|| {
                    OffloadError::InvalidArgument(format!(
                        "output buffer of {capacity} bytes is too small for the matrix"
                    ))
                })
            }
        }
    }

    fn pad_to(&mut self, align: usize) -> Result<()> {
        let padding = align_up(self.offset, align) - self.offset;
        if let Some(gap) = self.region(padding)? {
            gap.fill(0);
        }
        Ok(())
    }

    fn scalar(&mut self, value: u64) -> Result<()> {
        self.pad_to(SCALAR_ALIGNMENT)?;
        if let Some(dst) = self.region(SCALAR_BYTES)? {
            dst.copy_from_slice(&value.to_ne_bytes());
        }
        Ok(())
    }

    fn flag(&mut self, value: bool) -> Result<()> {
        self.scalar(value as u64)
    }

    fn bulk<T: Pod>(&mut self, items: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(items);
        self.scalar(bytes.len() as u64)?;
        self.pad_to(FORMAT_ALIGNMENT)?;
        self.bulk_offsets.push(self.offset);
        if let Some(dst) = self.region(bytes.len())? {
            dst.copy_from_slice(bytes);
        }
        Ok(())
    }
}

fn emit_matrix(e: &mut Emitter<'_>, view: &MatrixView) -> Result<()> {
    let (rows, cols) = view.dims();
    e.scalar(rows as u64)?;
    e.scalar(cols as u64)?;
    e.scalar(view.base_index() as u64)?;
    e.scalar(view.leading_dimension() as u64)?;
    e.scalar(view.format().tag())?;
    e.scalar(view.value_kind().tag())?;
    e.scalar(view.representation().tag())?;

    match view.storage() {
        MatrixStorage::Dense(d) => {
            e.scalar(d.lda as u64)?;
            e.bulk(&d.values)?;
        }
        MatrixStorage::Csr(c) => {
            e.scalar(view.base_index() as u64)?;
            e.flag(c.flags.unit_diag_implicit)?;
            e.flag(c.flags.sorted_indices)?;
            e.flag(c.flags.upper)?;
            e.flag(c.flags.lower)?;
            e.bulk(&c.row_ptr)?;
            e.bulk(&c.col_indices)?;
            e.bulk(&c.values)?;
            e.flag(c.flags.shared)?;
        }
        MatrixStorage::Bcsr(b) => {
            e.scalar(b.chunks.len() as u64)?;
            for chunk in &b.chunks {
                e.scalar(chunk.block_size as u64)?;
                e.scalar(chunk.block_rows as u64)?;
                e.bulk(&chunk.row_ptr)?;
                e.bulk(&chunk.col_indices)?;
                e.bulk(&chunk.values)?;
            }
            e.flag(b.shared)?;
        }
    }
    Ok(())
}

/// Reads fields back at the offsets [`Emitter`] placed them.
struct FieldReader<'b> {
    buf: &'b [u8],
    offset: usize,
}

impl<'b> FieldReader<'b> {
    fn new(buf: &'b [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'b [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                OffloadError::MalformedBuffer(format!(
                    "{what} needs {len} bytes at offset {}, buffer holds {}",
                    self.offset,
                    self.buf.len()
                ))
            })?;
        let bytes = &self.buf[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn skip_to(&mut self, align: usize, what: &str) -> Result<()> {
        let padding = align_up(self.offset, align) - self.offset;
        self.take(padding, what).map(|_| ())
    }

    fn scalar(&mut self, what: &str) -> Result<u64> {
        self.skip_to(SCALAR_ALIGNMENT, what)?;
        let bytes = self.take(SCALAR_BYTES, what)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let value = self.scalar(what)?;
        usize::try_from(value).map_err(|_| {
            OffloadError::MalformedBuffer(format!("{what} ({value}) does not fit this host"))
        })
    }

    fn flag(&mut self, what: &str) -> Result<bool> {
        Ok(self.scalar(what)? != 0)
    }

    fn bulk<T: Pod>(&mut self, what: &str) -> Result<Vec<T>> {
        let len = self.count(what)?;
        let width = std::mem::size_of::<T>();
        if len % width != 0 {
            return Err(OffloadError::MalformedBuffer(format!(
                "{what} byte length {len} is not a multiple of {width}"
            )));
        }
        self.skip_to(FORMAT_ALIGNMENT, what)?;
        let bytes = self.take(len, what)?;
        Ok(bytes
            .chunks_exact(width)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

fn read_matrix(r: &mut FieldReader<'_>) -> Result<MatrixView> {
    let rows = r.count("row count")?;
    let cols = r.count("column count")?;
    let base_index = r.count("base index")?;
    let leading_dimension = r.count("leading dimension")?;
    let format = StorageFormat::from_tag(r.scalar("storage format")?)?;
    let value_kind = ValueKind::from_tag(r.scalar("value kind")?)?;
    let representation = Representation::from_tag(r.scalar("representation")?)?;

    let storage = match format {
        StorageFormat::Dense => {
            let lda = r.count("dense lda")?;
            if lda != leading_dimension {
                return Err(OffloadError::MalformedBuffer(format!(
                    "dense lda {lda} disagrees with header leading dimension {leading_dimension}"
                )));
            }
            let values = r.bulk::<f64>("dense values")?;
            MatrixStorage::Dense(DenseStorage { lda, values })
        }
        StorageFormat::Csr => {
            let payload_base = r.count("CSR base index")?;
            if payload_base != base_index {
                return Err(OffloadError::MalformedBuffer(format!(
                    "CSR base index {payload_base} disagrees with header base index {base_index}"
                )));
            }
            let unit_diag_implicit = r.flag("unit diagonal flag")?;
            let sorted_indices = r.flag("sorted flag")?;
            let upper = r.flag("upper flag")?;
            let lower = r.flag("lower flag")?;
            let row_ptr = r.bulk::<usize>("CSR row pointer")?;
            let col_indices = r.bulk::<usize>("CSR column indices")?;
            let values = r.bulk::<f64>("CSR values")?;
            let shared = r.flag("shared flag")?;
            MatrixStorage::Csr(CsrStorage::new(row_ptr, col_indices, values).with_flags(
                CsrFlags {
                    unit_diag_implicit,
                    sorted_indices,
                    upper,
                    lower,
                    shared,
                },
            ))
        }
        StorageFormat::Bcsr => {
            let chunk_count = r.count("BCSR chunk count")?;
            if chunk_count == 0 || chunk_count > rows.max(1) {
                return Err(OffloadError::MalformedBuffer(format!(
                    "BCSR chunk count {chunk_count} is impossible for {rows} rows"
                )));
            }
            let mut chunks = Vec::new();
            for _ in 0..chunk_count {
                let block_size = r.count("BCSR block size")?;
                let block_rows = r.count("BCSR block rows")?;
                let row_ptr = r.bulk::<usize>("BCSR row pointer")?;
                let col_indices = r.bulk::<usize>("BCSR column indices")?;
                let values = r.bulk::<f64>("BCSR values")?;
                chunks.push(BlockRowChunk::new(
                    block_size,
                    block_rows,
                    row_ptr,
                    col_indices,
                    values,
                ));
            }
            let shared = r.flag("shared flag")?;
            MatrixStorage::Bcsr(BcsrStorage { chunks, shared })
        }
    };

    MatrixView::from_parts(rows, cols, base_index, value_kind, representation, storage).map_err(
        |err| match err {
            OffloadError::InvalidDimensions(msg) => OffloadError::MalformedBuffer(msg),
            other => other,
        },
    )
}

/// Number of bytes [`flatten`] writes for `view`.
pub fn get_size(view: &MatrixView) -> Result<usize> {
    let mut emitter = Emitter::measuring();
    emit_matrix(&mut emitter, view)?;
    Ok(emitter.offset)
}

/// Writes `view` at the start of `out` and returns the number of bytes written.
///
/// `out` should start at a [`FORMAT_ALIGNMENT`]-aligned address for the
/// device to read the bulk arrays in place.
pub fn flatten(view: &MatrixView, out: &mut [u8]) -> Result<usize> {
    let mut emitter = Emitter::writing(out);
    emit_matrix(&mut emitter, view)?;
    Ok(emitter.offset)
}

/// Reconstructs a matrix from the start of `bytes`.
pub fn from_buffer(bytes: &[u8]) -> Result<MatrixView> {
    read_matrix(&mut FieldReader::new(bytes))
}

/// Number of bytes the matrix encoded at the start of `bytes` occupies.
pub fn encoded_size(bytes: &[u8]) -> Result<usize> {
    let mut reader = FieldReader::new(bytes);
    read_matrix(&mut reader)?;
    Ok(reader.offset)
}

/// Serializes `view` into a freshly allocated, aligned buffer.
pub fn serialize(view: &MatrixView) -> Result<FlatMatrixBuffer> {
    let mut emitter = Emitter::measuring();
    emit_matrix(&mut emitter, view)?;
    let size = emitter.offset;

    let mut data = AlignedBuffer::zeroed(size, FORMAT_ALIGNMENT)?;
    let mut writer = Emitter::writing(&mut data);
    emit_matrix(&mut writer, view)?;
    let bulk_offsets = writer.bulk_offsets;
    log::debug!(
        "serialized {:?} {}x{} matrix into {} bytes",
        view.format(),
        view.rows(),
        view.cols(),
        size
    );
    Ok(FlatMatrixBuffer { data, bulk_offsets })
}

/// The serialized form of one matrix.
#[derive(Debug)]
pub struct FlatMatrixBuffer {
    data: AlignedBuffer,
    bulk_offsets: Vec<usize>,
}

impl FlatMatrixBuffer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn alignment(&self) -> usize {
        self.data.align()
    }

    pub fn address(&self) -> u64 {
        self.data.address()
    }

    /// Offsets of every bulk array, in layout order.
    pub fn bulk_offsets(&self) -> &[usize] {
        &self.bulk_offsets
    }

    pub fn to_matrix(&self) -> Result<MatrixView> {
        from_buffer(&self.data)
    }
}

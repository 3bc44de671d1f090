use std::marker::PhantomData;

use bytemuck::Pod;

use crate::error::{OffloadError, Result};
use crate::flatten::{self, FlatMatrixBuffer};
use crate::matrix::MatrixView;

/// Alignment requested for scalar and configuration arguments.
pub const SCALAR_ARGUMENT_ALIGNMENT: u64 = 64;

/// Data flow of one argument across the device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn tag(self) -> u64 {
        match self {
            Direction::In => 0,
            Direction::Out => 1,
            Direction::InOut => 2,
        }
    }

    pub fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            0 => Ok(Direction::In),
            1 => Ok(Direction::Out),
            2 => Ok(Direction::InOut),
            other => Err(OffloadError::MalformedBuffer(format!(
                "unknown argument direction {other}"
            ))),
        }
    }

    /// True when the device may write through the argument's address.
    pub fn is_written(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// One positional call parameter as the device sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentDescriptor {
    pub address: u64,
    pub size: u64,
    pub alignment: u64,
    pub direction: Direction,
}

impl ArgumentDescriptor {
    pub fn new(address: u64, size: u64, alignment: u64, direction: Direction) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(OffloadError::InvalidArgument(format!(
                "alignment {alignment} is not a power of two"
            )));
        }
        Ok(Self {
            address,
            size,
            alignment,
            direction,
        })
    }
}

/// Ordered call arguments. Position in the list is the wire protocol.
///
/// Borrowed scalars and buffers stay borrowed for `'a`, so every address in
/// the list remains valid while the list is alive. Matrices are serialized
/// into blobs the list owns.
#[derive(Debug, Default)]
pub struct ArgumentList<'a> {
    descriptors: Vec<ArgumentDescriptor>,
    blobs: Vec<(usize, FlatMatrixBuffer)>,
    _borrows: PhantomData<&'a mut ()>,
}

impl<'a> ArgumentList<'a> {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            blobs: Vec::new(),
            _borrows: PhantomData,
        }
    }

    fn push(&mut self, descriptor: ArgumentDescriptor) -> usize {
        self.descriptors.push(descriptor);
        log::trace!(
            "argument {}: {} bytes, align {}, {:?}",
            self.descriptors.len() - 1,
            descriptor.size,
            descriptor.alignment,
            descriptor.direction
        );
        self.descriptors.len() - 1
    }

    fn scalar_alignment<T>() -> u64 {
        (std::mem::align_of::<T>() as u64).max(SCALAR_ARGUMENT_ALIGNMENT)
    }

    /// Read-only scalar.
    pub fn add_scalar<T: Pod>(&mut self, value: &'a T) -> usize {
        self.push(ArgumentDescriptor {
            address: value as *const T as usize as u64,
            size: std::mem::size_of::<T>() as u64,
            alignment: Self::scalar_alignment::<T>(),
            direction: Direction::In,
        })
    }

    /// Scalar the device may overwrite.
    pub fn add_scalar_mut<T: Pod>(&mut self, value: &'a mut T, direction: Direction) -> usize {
        self.push(ArgumentDescriptor {
            address: value as *mut T as usize as u64,
            size: std::mem::size_of::<T>() as u64,
            alignment: Self::scalar_alignment::<T>(),
            direction,
        })
    }

    /// Configuration struct, passed by reference and never written back.
    pub fn add_config<T: Pod>(&mut self, config: &'a T) -> usize {
        self.add_scalar(config)
    }

    /// Read-only raw buffer; the byte length is the slice's byte length.
    pub fn add_buffer<T: Pod>(&mut self, data: &'a [T]) -> usize {
        self.push(ArgumentDescriptor {
            address: data.as_ptr() as usize as u64,
            size: std::mem::size_of_val(data) as u64,
            alignment: std::mem::align_of::<T>() as u64,
            direction: Direction::In,
        })
    }

    pub fn add_buffer_mut<T: Pod>(&mut self, data: &'a mut [T], direction: Direction) -> usize {
        self.push(ArgumentDescriptor {
            address: data.as_mut_ptr() as usize as u64,
            size: std::mem::size_of_val(data) as u64,
            alignment: std::mem::align_of::<T>() as u64,
            direction,
        })
    }

    /// Serializes `matrix` into a blob owned by the list and lists the blob.
    pub fn add_matrix(&mut self, matrix: &MatrixView, direction: Direction) -> Result<usize> {
        let blob = flatten::serialize(matrix)?;
        let position = self.push(ArgumentDescriptor {
            address: blob.address(),
            size: blob.len() as u64,
            alignment: blob.alignment() as u64,
            direction,
        });
        self.blobs.push((position, blob));
        Ok(position)
    }

    /// Lists a pre-built descriptor.
    ///
    /// # Safety
    /// `descriptor.address` must point to `descriptor.size` bytes that stay
    /// valid (and writable, for OUT/IN_OUT) for as long as this list is used
    /// in a device call.
    pub unsafe fn add_descriptor(&mut self, descriptor: ArgumentDescriptor) -> Result<usize> {
        let checked = ArgumentDescriptor::new(
            descriptor.address,
            descriptor.size,
            descriptor.alignment,
            descriptor.direction,
        )?;
        Ok(self.push(checked))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&ArgumentDescriptor> {
        self.descriptors.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArgumentDescriptor> {
        self.descriptors.iter()
    }

    pub fn descriptors(&self) -> &[ArgumentDescriptor] {
        &self.descriptors
    }

    /// Decodes the matrix blob at `position`, including anything the device
    /// wrote into it.
    pub fn matrix_at(&self, position: usize) -> Result<MatrixView> {
        self.blobs
            .iter()
            .find(|(p, _)| *p == position)
            .ok_or_else(|| {
                OffloadError::InvalidArgument(format!("argument {position} is not a matrix"))
            })?
            .1
            .to_matrix()
    }
}

impl ArgumentList<'static> {
    /// A list of bare descriptors, as rebuilt from a device record array.
    pub(crate) fn from_descriptors(descriptors: Vec<ArgumentDescriptor>) -> Self {
        Self {
            descriptors,
            blobs: Vec::new(),
            _borrows: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_is_positional() {
        let tolerance = 1e-8f64;
        let mut iterations = 0u64;
        let b = vec![1.0f64; 5];
        let matrix = MatrixView::from_dense_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();

        let mut list = ArgumentList::new();
        assert_eq!(list.add_scalar(&tolerance), 0);
        assert_eq!(list.add_matrix(&matrix, Direction::In).unwrap(), 1);
        assert_eq!(list.add_buffer(&b), 2);
        assert_eq!(list.add_scalar_mut(&mut iterations, Direction::Out), 3);

        let sizes: Vec<u64> = list.iter().map(|d| d.size).collect();
        assert_eq!(sizes[0], 8);
        assert_eq!(sizes[2], 40);
        assert_eq!(sizes[3], 8);
        assert_eq!(list.get(0).unwrap().alignment, SCALAR_ARGUMENT_ALIGNMENT);
        assert_eq!(list.get(1).unwrap().alignment, 64);
        assert_eq!(list.get(3).unwrap().direction, Direction::Out);
        assert_eq!(list.matrix_at(1).unwrap(), matrix);
        assert!(list.matrix_at(2).is_err());
    }

    #[test]
    fn test_buffer_descriptor_points_at_slice() {
        let data = [1u32, 2, 3];
        let mut list = ArgumentList::new();
        list.add_buffer(&data);
        let descriptor = list.get(0).unwrap();
        assert_eq!(descriptor.address, data.as_ptr() as usize as u64);
        assert_eq!(descriptor.size, 12);
        assert_eq!(descriptor.alignment, 4);
    }

    #[test]
    fn test_descriptor_rejects_bad_alignment() {
        let mut list = ArgumentList::new();
        let descriptor = ArgumentDescriptor {
            address: 0x1000,
            size: 16,
            alignment: 12,
            direction: Direction::In,
        };
        assert!(matches!(
            unsafe { list.add_descriptor(descriptor) },
            Err(OffloadError::InvalidArgument(_))
        ));
        assert!(list.is_empty());
    }

    #[test]
    fn test_direction_tags() {
        for direction in [Direction::In, Direction::Out, Direction::InOut] {
            assert_eq!(Direction::from_tag(direction.tag()).unwrap(), direction);
        }
        assert!(Direction::from_tag(3).is_err());
        assert!(Direction::InOut.is_written());
        assert!(!Direction::In.is_written());
    }
}

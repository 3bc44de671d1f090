//! Conversion between [`ArgumentList`] and the driver's record array:
//! a `u64` count followed by one [`SolverArgumentRecord`] per argument.

use std::mem::size_of;

use crate::abi::{SolverArgumentRecord, SolverArgumentsHeader};
use crate::args::{ArgumentDescriptor, ArgumentList, Direction};
use crate::buffer::AlignedBuffer;
use crate::error::{OffloadError, Result};

const HEADER_BYTES: usize = size_of::<SolverArgumentsHeader>();
const RECORD_BYTES: usize = size_of::<SolverArgumentRecord>();
const RECORD_ALIGNMENT: usize = 8;

/// Heap-owned record array handed to `SET`/`GET_SOLVER_ARGUMENTS`.
#[derive(Debug)]
pub struct RecordBuffer {
    data: AlignedBuffer,
}

impl RecordBuffer {
    /// Bytes needed for `count` records, count field included.
    pub fn size_for(count: usize) -> usize {
        HEADER_BYTES + count * RECORD_BYTES
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Pointer passed to the driver, which may write records back through it.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Count field as currently stored.
    pub fn count(&self) -> u64 {
        bytemuck::pod_read_unaligned::<SolverArgumentsHeader>(&self.data[..HEADER_BYTES]).count
    }

    /// Overwrites the record at `position`; used by device fakes and tests.
    pub fn write_record(&mut self, position: usize, record: SolverArgumentRecord) -> Result<()> {
        let start = HEADER_BYTES + position * RECORD_BYTES;
        let slot = self
            .data
            .get_mut(start..start + RECORD_BYTES)
            .ok_or_else(|| {
                OffloadError::InvalidArgument(format!("record {position} is out of range"))
            })?;
        slot.copy_from_slice(bytemuck::bytes_of(&record));
        Ok(())
    }
}

/// Lays `list` out as a record array, preserving list order.
pub fn marshall(list: &ArgumentList<'_>) -> Result<RecordBuffer> {
    let mut data = AlignedBuffer::zeroed(RecordBuffer::size_for(list.len()), RECORD_ALIGNMENT)?;
    let header = SolverArgumentsHeader {
        count: list.len() as u64,
    };
    data[..HEADER_BYTES].copy_from_slice(bytemuck::bytes_of(&header));

    for (position, descriptor) in list.iter().enumerate() {
        let record = SolverArgumentRecord {
            address: descriptor.address,
            size: descriptor.size,
            alignment: descriptor.alignment,
            direction: descriptor.direction.tag(),
        };
        let start = HEADER_BYTES + position * RECORD_BYTES;
        data[start..start + RECORD_BYTES].copy_from_slice(bytemuck::bytes_of(&record));
    }
    log::debug!(
        "marshalled {} arguments into {} bytes",
        list.len(),
        data.len()
    );
    Ok(RecordBuffer { data })
}

/// Rebuilds the descriptor list from a record array, in record order.
pub fn unmarshall(bytes: &[u8]) -> Result<ArgumentList<'static>> {
    if bytes.len() < HEADER_BYTES {
        return Err(OffloadError::MalformedBuffer(format!(
            "record array of {} bytes has no count field",
            bytes.len()
        )));
    }
    let header: SolverArgumentsHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_BYTES]);
    let count = usize::try_from(header.count)
        .ok()
        .filter(|&count| {
            count
                .checked_mul(RECORD_BYTES)
                .and_then(|records| records.checked_add(HEADER_BYTES))
                .is_some_and(|needed| needed <= bytes.len())
        })
        .ok_or_else(|| {
            OffloadError::MalformedBuffer(format!(
                "record count {} exceeds a {}-byte array",
                header.count,
                bytes.len()
            ))
        })?;

    let descriptors = bytes[HEADER_BYTES..HEADER_BYTES + count * RECORD_BYTES]
        .chunks_exact(RECORD_BYTES)
        .map(|chunk| {
            let record: SolverArgumentRecord = bytemuck::pod_read_unaligned(chunk);
            ArgumentDescriptor::new(
                record.address,
                record.size,
                record.alignment,
                Direction::from_tag(record.direction)?,
            )
            .map_err(|err| match err {
                OffloadError::InvalidArgument(msg) => OffloadError::MalformedBuffer(msg),
                other => other,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ArgumentList::from_descriptors(descriptors))
}

/// Checks that `returned` still describes `sent`, position by position.
pub fn verify_round_trip(sent: &ArgumentList<'_>, returned: &ArgumentList<'_>) -> Result<()> {
    if sent.len() != returned.len() {
        return Err(OffloadError::ArgumentMismatch {
            position: sent.len().min(returned.len()),
            detail: format!(
                "{} arguments sent, {} returned",
                sent.len(),
                returned.len()
            ),
        });
    }
    for (position, (before, after)) in sent.iter().zip(returned.iter()).enumerate() {
        if before.size != after.size
            || before.alignment != after.alignment
            || before.direction != after.direction
        {
            return Err(OffloadError::ArgumentMismatch {
                position,
                detail: format!("sent {:?}, returned {:?}", before, after),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixView;

    #[test]
    fn test_empty_list_is_a_lone_count() {
        let records = marshall(&ArgumentList::new()).unwrap();
        assert_eq!(records.len(), 8);
        assert_eq!(records.as_bytes(), &0u64.to_ne_bytes());
        assert_eq!(records.count(), 0);

        let list = unmarshall(records.as_bytes()).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_round_trip_preserves_order_and_shape() {
        let alpha = 2.5f64;
        let mut x = vec![0.0f64; 4];
        let mut status = 0i32;
        let matrix = MatrixView::from_dense_rows(&[vec![2.0, 1.0], vec![1.0, 2.0]]).unwrap();

        let mut list = ArgumentList::new();
        list.add_scalar(&alpha);
        list.add_matrix(&matrix, Direction::In).unwrap();
        list.add_buffer_mut(&mut x, Direction::InOut);
        list.add_scalar_mut(&mut status, Direction::Out);

        let records = marshall(&list).unwrap();
        assert_eq!(records.len(), RecordBuffer::size_for(4));
        let returned = unmarshall(records.as_bytes()).unwrap();

        assert_eq!(returned.len(), list.len());
        for (sent, back) in list.iter().zip(returned.iter()) {
            assert_eq!(sent, back);
        }
        verify_round_trip(&list, &returned).unwrap();
    }

    #[test]
    fn test_verify_detects_changed_direction() {
        let value = 1u64;
        let mut list = ArgumentList::new();
        list.add_scalar(&value);

        let mut records = marshall(&list).unwrap();
        let mut record: SolverArgumentRecord =
            bytemuck::pod_read_unaligned(&records.as_bytes()[8..40]);
        record.direction = Direction::Out.tag();
        records.write_record(0, record).unwrap();

        let returned = unmarshall(records.as_bytes()).unwrap();
        match verify_round_trip(&list, &returned) {
            Err(OffloadError::ArgumentMismatch { position, .. }) => assert_eq!(position, 0),
            other => panic!("Expected ArgumentMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_count_larger_than_buffer_is_malformed() {
        let mut bytes = 3u64.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        assert!(matches!(
            unmarshall(&bytes),
            Err(OffloadError::MalformedBuffer(_))
        ));
        assert!(matches!(
            unmarshall(&[0u8; 4]),
            Err(OffloadError::MalformedBuffer(_))
        ));
    }

    #[test]
    fn test_unknown_direction_is_malformed() {
        let value = 1u64;
        let mut list = ArgumentList::new();
        list.add_scalar(&value);
        let mut records = marshall(&list).unwrap();
        let mut record: SolverArgumentRecord =
            bytemuck::pod_read_unaligned(&records.as_bytes()[8..40]);
        record.direction = 9;
        records.write_record(0, record).unwrap();
        assert!(matches!(
            unmarshall(records.as_bytes()),
            Err(OffloadError::MalformedBuffer(_))
        ));
    }
}

use super::{FilesystemPair, FilesystemRecord};
use crate::error::{Role, ScanError};

/// Assigns scanned records to the source/destination slots.
pub trait Classifier: Send + Sync {
    fn classify(&self, records: Vec<FilesystemRecord>) -> Result<FilesystemPair, ScanError>;
}

/// Records at or above `threshold` bytes are the destination drive, everything
/// else is the source card. Two candidates for the same slot fail the scan.
#[derive(Debug, Clone, Copy)]
pub struct SizeThreshold {
    pub threshold: u64,
}

impl SizeThreshold {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }
}

impl Classifier for SizeThreshold {
    fn classify(&self, records: Vec<FilesystemRecord>) -> Result<FilesystemPair, ScanError> {
        let mut pair = FilesystemPair::default();
        for rec in records {
            let (slot, role) = if rec.size >= self.threshold {
                (&mut pair.destination, Role::Destination)
            } else {
                (&mut pair.source, Role::Source)
            };
            if slot.is_some() {
                return Err(ScanError::AmbiguousClassification { role });
            }
            *slot = Some(rec);
        }
        Ok(pair)
    }
}

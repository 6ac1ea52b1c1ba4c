use crate::error::ImportError;
use genome_import_protocol::GenomeRecord;
use std::io;

/// Rejects genome records whose JSON serialization is larger than a fixed
/// number of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeGuard {
    max_genome_size: u64,
}

impl SizeGuard {
    pub fn new(max_genome_size: u64) -> Self {
        Self { max_genome_size }
    }

    pub fn max_genome_size(&self) -> u64 {
        self.max_genome_size
    }

    pub fn validate(&self, genome: &GenomeRecord) -> Result<(), ImportError> {
        let size = serialized_size(genome)?;
        if size <= self.max_genome_size {
            return Ok(());
        }
        Err(ImportError::SizeExceeded {
            size,
            max: self.max_genome_size,
            breakdown: list_field_sizes(genome)?,
        })
    }
}

/// Counts bytes written and discards them.
#[derive(Debug, Default)]
struct ByteCounter(u64);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Bytes of the compact JSON form of `genome`, measured without
/// buffering the serialization.
pub fn serialized_size(genome: &GenomeRecord) -> Result<u64, ImportError> {
    let mut counter = ByteCounter::default();
    serde_json::to_writer(&mut counter, genome)?;
    Ok(counter.0)
}

/// Serialized size of every list-valued top-level field, largest first.
pub fn list_field_sizes(genome: &GenomeRecord) -> Result<Vec<(String, u64)>, ImportError> {
    let value = serde_json::to_value(genome)?;
    let Some(fields) = value.as_object() else {
        return Ok(vec![]);
    };
    let mut sizes = fields
        .iter()
        .filter(|(_, v)| v.is_array())
        .map(|(k, v)| serde_json::to_vec(v).map(|bytes| (k.clone(), bytes.len() as u64)))
        .collect::<Result<Vec<_>, _>>()?;
    sizes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(sizes)
}

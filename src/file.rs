//! Buffered record I/O over the numbered data files of a store.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{
    error::{ReadError, Result},
    Overlap, RECORD_BYTES,
};

/// Path of data file `index` (1-based) inside a store directory.
#[must_use]
pub fn data_file_name(store: &Path, index: u32) -> PathBuf {
    store.join(format!("{index:04}.dat"))
}

/// Path of the final index file.
#[must_use]
pub fn index_name(store: &Path) -> PathBuf {
    store.join("index")
}

/// Path of a per-slice temporary index.
#[must_use]
pub fn slice_index_name(store: &Path, slice: u32) -> PathBuf {
    store.join(format!("{slice:04}.index"))
}

/// Number of whole records in a data file; zero for an absent file.
pub fn num_overlaps_in(path: &Path) -> Result<u64> {
    if !path.is_file() {
        return Ok(0);
    }
    let len = std::fs::metadata(path)?.len();
    if len % RECORD_BYTES != 0 {
        return Err(ReadError::Truncated(len).into());
    }
    Ok(len / RECORD_BYTES)
}

/// Append-only writer of one data file.
pub struct OverlapFileWriter {
    inner: BufWriter<File>,
    num_written: u64,
}

impl OverlapFileWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let inner = File::create(path).map(BufWriter::new)?;
        Ok(Self {
            inner,
            num_written: 0,
        })
    }

    pub fn write_overlap(&mut self, overlap: &Overlap) -> Result<()> {
        self.inner.write_all(bytemuck::bytes_of(overlap))?;
        self.num_written += 1;
        Ok(())
    }

    #[must_use]
    pub fn num_written(&self) -> u64 {
        self.num_written
    }

    /// Flushes and returns the number of records written.
    pub fn finish(mut self) -> Result<u64> {
        self.inner.flush()?;
        Ok(self.num_written)
    }
}

/// Sequential reader of one data file.
#[derive(Debug)]
pub struct OverlapFileReader {
    inner: BufReader<File>,
}

impl OverlapFileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let inner = File::open(path).map(BufReader::new)?;
        Ok(Self { inner })
    }

    /// Positions the reader at record `index` within the file.
    pub fn seek_to(&mut self, index: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(index * RECORD_BYTES))?;
        Ok(())
    }

    /// Reads the next record; `None` at a clean end of file.
    pub fn read_overlap(&mut self) -> Result<Option<Overlap>> {
        let mut bytes = [0u8; RECORD_BYTES as usize];
        let mut filled = 0;
        while filled < bytes.len() {
            let n = self.inner.read(&mut bytes[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ReadError::PartialRecord(filled).into());
            }
            filled += n;
        }
        Ok(Some(bytemuck::pod_read_unaligned(&bytes)))
    }

    /// Appends every remaining record to `buf`, returning the count read.
    pub fn read_to_end(&mut self, buf: &mut Vec<Overlap>) -> Result<u64> {
        let mut count = 0;
        while let Some(overlap) = self.read_overlap()? {
            buf.push(overlap);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_names() {
        let store = Path::new("asm.ovl");
        assert_eq!(data_file_name(store, 1), store.join("0001.dat"));
        assert_eq!(data_file_name(store, 123), store.join("0123.dat"));
        assert_eq!(slice_index_name(store, 7), store.join("0007.index"));
    }

    #[test]
    fn test_write_then_read_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = data_file_name(dir.path(), 1);

        let mut writer = OverlapFileWriter::create(&path)?;
        for b_id in 10..20 {
            let mut ov = Overlap::new(4, b_id);
            ov.set_coords(0, 100, 5, 105);
            writer.write_overlap(&ov)?;
        }
        assert_eq!(writer.finish()?, 10);
        assert_eq!(num_overlaps_in(&path)?, 10);

        let mut reader = OverlapFileReader::open(&path)?;
        let mut all = Vec::new();
        assert_eq!(reader.read_to_end(&mut all)?, 10);
        assert_eq!(all[0].b_id, 10);
        assert_eq!(all[9].b_id, 19);
        Ok(())
    }

    #[test]
    fn test_seek_to_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = data_file_name(dir.path(), 1);

        let mut writer = OverlapFileWriter::create(&path)?;
        for b_id in 0..8 {
            writer.write_overlap(&Overlap::new(1, b_id))?;
        }
        writer.finish()?;

        let mut reader = OverlapFileReader::open(&path)?;
        reader.seek_to(5)?;
        let ov = reader.read_overlap()?.unwrap();
        assert_eq!(ov.b_id, 5);
        Ok(())
    }

    #[test]
    fn test_partial_record_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = data_file_name(dir.path(), 1);
        std::fs::write(&path, [0u8; 17])?;

        assert!(num_overlaps_in(&path).is_err());

        let mut reader = OverlapFileReader::open(&path)?;
        assert!(reader.read_overlap().is_err());
        Ok(())
    }

    #[test]
    fn test_absent_file_holds_zero() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(num_overlaps_in(&data_file_name(dir.path(), 9))?, 0);
        Ok(())
    }
}

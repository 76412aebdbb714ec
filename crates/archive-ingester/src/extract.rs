use std::io::Cursor;

use lake_types::{Error, Result};
use tempfile::TempDir;
use zip::ZipArchive;

use crate::archive_ext::ArchiveExt;

/// Unpacks an in-memory zip archive into a fresh temporary directory, using
/// [`ArchiveExt::safe_unpack`] so a maliciously-named entry cannot write outside of it.
pub fn extract_archive(source: &str, year: u32, bytes: &[u8]) -> Result<TempDir> {
    let dir = TempDir::new()?;
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::CorruptArchive {
        source: source.to_string(),
        year,
        reason: e.to_string(),
    })?;
    archive.safe_unpack(dir.path()).map_err(|e| Error::CorruptArchive {
        source: source.to_string(),
        year,
        reason: e.to_string(),
    })?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            for (name, contents) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn extracts_valid_archive() {
        let bytes = build_zip(&[("index.xml", b"<FinancialDisclosures/>")]);
        let dir = extract_archive("house", 2024, &bytes).unwrap();
        assert!(dir.path().join("index.xml").exists());
    }

    #[test]
    fn rejects_corrupt_archive() {
        let err = extract_archive("house", 2024, b"not a zip file").unwrap_err();
        assert!(matches!(err, Error::CorruptArchive { .. }));
    }
}

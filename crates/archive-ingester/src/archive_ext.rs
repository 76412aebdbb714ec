use std::fs;
use std::io::{self, Read as _};
use std::path::Path;

use zip::ZipArchive;

pub trait ArchiveExt {
    fn safe_unpack(&mut self, dst: impl AsRef<Path>) -> io::Result<()>;
}

impl<R: io::Read + io::Seek> ArchiveExt for ZipArchive<R> {
    /// Extracts every entry under `dst`, rejecting any entry whose name would resolve
    /// outside of it (zip-slip: `../../etc/passwd`, absolute paths, or unnormalized
    /// components that `enclosed_name` refuses to resolve).
    fn safe_unpack(&mut self, dst: impl AsRef<Path>) -> io::Result<()> {
        let dst = dst.as_ref();
        if dst.symlink_metadata().is_err() {
            fs::create_dir_all(dst).map_err(|e| {
                io::Error::new(e.kind(), format!("failed to create `{}`", dst.display()))
            })?;
        }
        let dst = &dst.canonicalize().unwrap_or_else(|_| dst.to_path_buf());

        for i in 0..self.len() {
            let mut entry = self
                .by_index(i)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

            let Some(name) = entry.enclosed_name() else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("archive entry `{}` escapes the extraction root", entry.name()),
                ));
            };
            let out_path = dst.join(name);
            if !out_path.starts_with(dst) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "archive entry resolves outside of the extraction root",
                ));
            }

            if entry.is_dir() {
                fs::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out_file = fs::File::create(&out_path)?;
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            io::Write::write_all(&mut out_file, &buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(io::Cursor::new(&mut buf));
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
    fn unpacks_nested_entries_under_dst() {
        let dir = tempfile::TempDir::new().unwrap();
        let bytes = build_zip(&[("index.xml", b"<docs/>"), ("docs/a.pdf", b"%PDF-1.4")]);
        let mut archive = ZipArchive::new(io::Cursor::new(bytes)).unwrap();
        archive.safe_unpack(dir.path()).unwrap();

        assert_eq!(std::fs::read(dir.path().join("index.xml")).unwrap(), b"<docs/>");
        assert_eq!(std::fs::read(dir.path().join("docs/a.pdf")).unwrap(), b"%PDF-1.4");
    }
}

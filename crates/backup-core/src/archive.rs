use std::fs::{self, File, Metadata};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

use tar::{EntryType, Header, HeaderMode};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::codec::CompressingWriter;
use crate::format::{CompressionFormat, FormatSettings};

/// Container writer for one artifact. Entries must be appended one at a time;
/// neither container allows interleaving.
pub enum ArchiveWriter<W: Write + Seek> {
    Tar(tar::Builder<CompressingWriter<W>>),
    Zip {
        writer: ZipWriter<W>,
        level: i32,
    },
}

impl<W: Write + Seek> ArchiveWriter<W> {
    pub fn new(settings: FormatSettings, inner: W) -> io::Result<Self> {
        match settings.format() {
            CompressionFormat::TarZstd | CompressionFormat::TarGzip => {
                let mut builder = tar::Builder::new(CompressingWriter::new(settings, inner)?);
                builder.follow_symlinks(false);
                builder.mode(HeaderMode::Complete);
                Ok(Self::Tar(builder))
            }
            CompressionFormat::Zip => Ok(Self::Zip {
                writer: ZipWriter::new(inner),
                level: settings.level(),
            }),
        }
    }

    pub fn append_dir(&mut self, name: &str, path: &Path) -> io::Result<()> {
        match self {
            Self::Tar(builder) => builder.append_dir(name, path),
            Self::Zip { writer, level } => {
                let metadata = fs::symlink_metadata(path)?;
                writer
                    .add_directory(name.to_string(), zip_options(*level, &metadata))
                    .map_err(zip_io_error)
            }
        }
    }

    /// Copies the file body into a new entry and returns the number of bytes copied.
    pub fn append_file(&mut self, name: &str, path: &Path) -> io::Result<u64> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        let len = metadata.len();

        match self {
            Self::Tar(builder) => {
                let mut header = Header::new_gnu();
                header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
                header.set_entry_type(EntryType::Regular);
                header.set_size(len);

                // The header size is fixed up front; a file that grows meanwhile is
                // cut at `len`, one that shrinks would break the framing.
                let mut body = CountingReader::new(file.take(len));
                builder.append_data(&mut header, name, &mut body)?;
                if body.count < len {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} shrank while being archived", path.display()),
                    ));
                }
                Ok(len)
            }
            Self::Zip { writer, level } => {
                writer
                    .start_file(name.to_string(), zip_options(*level, &metadata))
                    .map_err(zip_io_error)?;
                let mut file = file;
                io::copy(&mut file, writer)
            }
        }
    }

    /// Records a symlink entry pointing at the link target; the target is not followed.
    pub fn append_symlink(&mut self, name: &str, path: &Path) -> io::Result<()> {
        match self {
            Self::Tar(builder) => builder.append_path_with_name(path, name),
            Self::Zip { writer, level } => {
                let metadata = fs::symlink_metadata(path)?;
                let target = fs::read_link(path)?;
                writer
                    .add_symlink(
                        name.to_string(),
                        target.to_string_lossy().replace('\\', "/"),
                        zip_options(*level, &metadata),
                    )
                    .map_err(zip_io_error)
            }
        }
    }

    /// Writes the container trailer (and codec trailer) and returns the sink.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Tar(builder) => builder.into_inner()?.finish(),
            Self::Zip { writer, .. } => writer.finish().map_err(zip_io_error),
        }
    }
}

fn zip_options(level: i32, metadata: &Metadata) -> SimpleFileOptions {
    let options = if level == 0 {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(i64::from(level)))
    };
    let options = options.large_file(metadata.is_file() && metadata.len() >= u64::from(u32::MAX));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options.unix_permissions(metadata.permissions().mode() & 0o7777)
    }
    #[cfg(not(unix))]
    {
        options
    }
}

fn zip_io_error(err: ZipError) -> io::Error {
    match err {
        ZipError::Io(err) => err,
        other => io::Error::other(other),
    }
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.count += read as u64;
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::ArchiveWriter;
    use crate::format::{CompressionFormat, FormatSettings};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("atlas-backup-archive-{prefix}-{nanos}"))
    }

    #[test]
    fn tar_entries_carry_names_and_bytes() {
        let dir = unique_temp_dir("tar");
        std::fs::create_dir_all(dir.join("world")).unwrap();
        std::fs::write(dir.join("world").join("level.dat"), b"level-bytes").unwrap();

        let settings = FormatSettings::new(CompressionFormat::TarZstd, 3).unwrap();
        let mut archive = ArchiveWriter::new(settings, Cursor::new(Vec::new())).unwrap();
        archive.append_dir("world", &dir.join("world")).unwrap();
        let copied = archive
            .append_file("world/level.dat", &dir.join("world").join("level.dat"))
            .unwrap();
        assert_eq!(copied, 11);
        let bytes = archive.finish().unwrap().into_inner();

        let decoded = zstd::stream::decode_all(bytes.as_slice()).unwrap();
        let mut tar = tar::Archive::new(decoded.as_slice());
        let mut seen = Vec::new();
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            seen.push((name, body));
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0.trim_end_matches('/'), "world");
        assert_eq!(seen[1], ("world/level.dat".to_string(), b"level-bytes".to_vec()));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn zip_level_zero_stores_entries() {
        let dir = unique_temp_dir("zip-stored");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("data.bin"), vec![7u8; 4096]).unwrap();

        let settings = FormatSettings::new(CompressionFormat::Zip, 0).unwrap();
        let mut archive = ArchiveWriter::new(settings, Cursor::new(Vec::new())).unwrap();
        archive.append_file("data.bin", &dir.join("data.bin")).unwrap();
        let cursor = archive.finish().unwrap();

        let mut zip = zip::ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        let mut entry = zip.by_name("data.bin").unwrap();
        assert_eq!(entry.compression(), zip::CompressionMethod::Stored);
        let mut body = Vec::new();
        entry.read_to_end(&mut body).unwrap();
        assert_eq!(body, vec![7u8; 4096]);

        let _ = std::fs::remove_dir_all(dir);
    }
}

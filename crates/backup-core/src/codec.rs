use std::io::{self, Write};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::format::FormatSettings;

/// Streaming compressor placed between the container writer and the file.
pub enum CompressingWriter<W: Write> {
    Zstd(zstd::stream::write::Encoder<'static, W>),
    Gzip(GzEncoder<W>),
}

impl<W: Write> CompressingWriter<W> {
    pub fn new(settings: FormatSettings, inner: W) -> io::Result<Self> {
        use crate::format::CompressionFormat::*;

        match settings.format() {
            TarZstd => Ok(Self::Zstd(zstd::stream::write::Encoder::new(
                inner,
                settings.level(),
            )?)),
            TarGzip => {
                let level = u32::try_from(settings.level())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "negative gzip level"))?;
                Ok(Self::Gzip(GzEncoder::new(inner, Compression::new(level))))
            }
            Zip => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "format {} does not require secondary compression",
                    settings.format()
                ),
            )),
        }
    }

    /// Writes the codec trailer and hands back the underlying writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Zstd(encoder) => encoder.finish(),
            Self::Gzip(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for CompressingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Zstd(encoder) => encoder.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Zstd(encoder) => encoder.flush(),
            Self::Gzip(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::CompressingWriter;
    use crate::format::{CompressionFormat, FormatSettings};

    #[test]
    fn zstd_stream_decodes_to_input() {
        let settings = FormatSettings::new(CompressionFormat::TarZstd, 3).unwrap();
        let mut writer = CompressingWriter::new(settings, Vec::new()).unwrap();
        writer.write_all(b"level.dat contents").unwrap();
        let compressed = writer.finish().unwrap();

        let decoded = zstd::stream::decode_all(compressed.as_slice()).unwrap();
        assert_eq!(decoded, b"level.dat contents");
    }

    #[test]
    fn gzip_stream_decodes_to_input() {
        let settings = FormatSettings::new(CompressionFormat::TarGzip, 9).unwrap();
        let mut writer = CompressingWriter::new(settings, Vec::new()).unwrap();
        writer.write_all(b"region/r.0.0.mca").unwrap();
        let compressed = writer.finish().unwrap();

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"region/r.0.0.mca");
    }

    #[test]
    fn zip_has_no_secondary_codec() {
        let settings = FormatSettings::new(CompressionFormat::Zip, 6).unwrap();
        let err = CompressingWriter::new(settings, Vec::new())
            .err()
            .expect("zip must not build a codec");
        assert!(err.to_string().contains("does not require secondary compression"));
    }
}

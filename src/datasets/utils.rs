use std::{
    io::{Read, Seek, SeekFrom},
    path::Path,
    time::Duration,
};

use anyhow::Result;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use tar::Archive;
use tracing::info;
use zip::ZipArchive;

/// Upper bound on one archive download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

/// HTTP body that reports its progress while being read.
pub struct RemoteFile {
    response: reqwest::blocking::Response,
    pbar: ProgressBar,
}
impl RemoteFile {
    pub fn open(url: &str, timeout: Duration) -> Result<Self> {
        let response = reqwest::blocking::Client::new()
            .get(url)
            .timeout(timeout)
            .send()?
            .error_for_status()?;

        // servers may omit the length
        let pbar = match response.content_length() {
            Some(total_size) => ProgressBar::new(total_size),
            None => ProgressBar::new_spinner(),
        };
        pbar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
                .progress_chars("#>-"),
        );
        pbar.set_message(format!("Downloading {}", url));
        Ok(Self { response, pbar })
    }
}

impl Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.response.read(buf)?;
        if size == 0 {
            self.pbar.finish_and_clear();
        } else {
            self.pbar.inc(size as u64);
        }
        Ok(size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Zip,
    Tgz,
}

pub fn download_and_extract<P: AsRef<Path>>(
    url: &str,
    path: P,
    format: CompressionFormat,
) -> Result<()> {
    let mut remote_file = RemoteFile::open(url, DOWNLOAD_TIMEOUT)?;
    let mut archive = tempfile::tempfile()?;
    let bytes = std::io::copy(&mut remote_file, &mut archive)?;
    archive.seek(SeekFrom::Start(0))?;
    info!(url, bytes, ?format, "downloaded archive");

    extract(&archive, path, format)
}

pub fn extract<P: AsRef<Path>>(
    archive: &std::fs::File,
    path: P,
    format: CompressionFormat,
) -> Result<()> {
    match format {
        CompressionFormat::Zip => {
            let mut archive = ZipArchive::new(archive)?;
            archive.extract(path)?;
        }
        CompressionFormat::Tgz => {
            let tar = GzDecoder::new(archive);
            let mut archive = Archive::new(tar);
            archive.unpack(path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};

    use super::*;

    #[test]
    fn extracts_tgz() -> Result<()> {
        let mut archive = tempfile::tempfile()?;
        {
            let gz = GzEncoder::new(&mut archive, Compression::default());
            let mut builder = tar::Builder::new(gz);
            let data = b"DB01 DB02\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "ddi.edges", &data[..])?;
            builder.into_inner()?.finish()?.flush()?;
        }
        archive.seek(SeekFrom::Start(0))?;

        let dir = tempfile::tempdir()?;
        extract(&archive, dir.path(), CompressionFormat::Tgz)?;
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ddi.edges"))?,
            "DB01 DB02\n"
        );
        Ok(())
    }
}

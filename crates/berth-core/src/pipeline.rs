// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Streaming deploy pipeline.
//!
//! Deploys arrive as a gzipped tarball byte stream. The pipeline feeds the
//! stream through gzip decompression into tar extraction without ever
//! buffering the whole archive, and reports which stage broke when something
//! goes wrong.

use std::fmt;
use std::io;
use std::path::Path;

use async_compression::tokio::bufread::GzipDecoder;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::{Error, Result};

/// Capacity of the in-memory pipe between decompression and extraction.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Stage of the deploy pipeline, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Reading bytes from the caller's stream.
    Source,
    /// Gzip decompression.
    Decompress,
    /// Tar extraction into the target directory.
    Unpack,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Decompress => write!(f, "decompress"),
            Self::Unpack => write!(f, "unpack"),
        }
    }
}

/// Wrapper that tags an error with the pipeline stage it came from, so the
/// stage survives the trip through the `io::Error` plumbing of the codecs.
#[derive(Debug)]
struct Staged {
    stage: PipelineStage,
    source: io::Error,
}

impl fmt::Display for Staged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage: {}", self.stage, self.source)
    }
}

impl std::error::Error for Staged {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

fn tag(stage: PipelineStage, source: io::Error) -> io::Error {
    let kind = source.kind();
    io::Error::new(kind, Staged { stage, source })
}

fn stage_of(err: &io::Error) -> Option<PipelineStage> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<Staged>())
        .map(|staged| staged.stage)
}

/// Unpack a gzipped tarball stream into `target`.
///
/// The target directory is created if it does not exist. Source and
/// decompression failures take precedence over the extraction result, since
/// a dead input stream makes the tar reader see a harmless-looking EOF.
/// A broken pipe on the feed side only means extraction finished first and
/// defers to the extraction result.
pub async fn unpack_gzip_tar<S>(source: S, target: &Path) -> Result<()>
where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
{
    tokio::fs::create_dir_all(target).await?;

    let tagged = source.map(|item| item.map_err(|e| tag(PipelineStage::Source, e)));
    let mut decoder = GzipDecoder::new(StreamReader::new(tagged));

    // Bounded pipe between decompression and extraction. Dropping the read
    // half makes the copy below fail with BrokenPipe, which cancels the
    // upstream once the archive is done with its input.
    let (mut pipe_tx, pipe_rx) = tokio::io::duplex(PIPE_CAPACITY);

    let decompress = tokio::spawn(async move {
        tokio::io::copy(&mut decoder, &mut pipe_tx).await?;
        pipe_tx.shutdown().await
    });

    let unpacked = tokio_tar::Archive::new(pipe_rx).unpack(target).await;
    let fed = match decompress.await {
        Ok(result) => result,
        Err(join_err) => Err(io::Error::other(join_err)),
    };

    if let Err(feed_err) = fed {
        if feed_err.kind() != io::ErrorKind::BrokenPipe {
            let stage = stage_of(&feed_err).unwrap_or(PipelineStage::Decompress);
            return Err(Error::Pipeline {
                stage,
                source: strip_tag(feed_err),
            });
        }
    }

    match unpacked {
        Ok(()) => {
            debug!(target = %target.display(), "archive unpacked");
            Ok(())
        }
        Err(unpack_err) => Err(Error::Pipeline {
            stage: stage_of(&unpack_err).unwrap_or(PipelineStage::Unpack),
            source: strip_tag(unpack_err),
        }),
    }
}

/// Unwrap a tagged error back to its underlying I/O error for display.
fn strip_tag(err: io::Error) -> io::Error {
    let kind = err.kind();
    match err.downcast::<Staged>() {
        Ok(staged) => staged.source,
        Err(err) => io::Error::new(kind, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::write::GzipEncoder;
    use tempfile::TempDir;

    /// Build an in-memory gzipped tarball with the given files.
    async fn gzip_tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tokio_tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tokio_tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .await
                .unwrap();
        }
        let tar = builder.into_inner().await.unwrap();

        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(&tar).await.unwrap();
        encoder.shutdown().await.unwrap();
        encoder.into_inner()
    }

    fn byte_stream(bytes: Vec<u8>) -> impl Stream<Item = io::Result<Bytes>> + Send + Unpin {
        futures::stream::iter(
            bytes
                .chunks(512)
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn unpacks_valid_archive() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("1");

        let archive = gzip_tarball(&[
            ("manifest.json", r#"{"command": "sh"}"#),
            ("serve.sh", "#!/bin/sh\nexec true\n"),
        ])
        .await;

        unpack_gzip_tar(byte_stream(archive), &target).await.unwrap();

        let manifest = std::fs::read_to_string(target.join("manifest.json")).unwrap();
        assert!(manifest.contains("command"));
        assert!(target.join("serve.sh").exists());
    }

    #[tokio::test]
    async fn garbage_bytes_fail_in_decompress_stage() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("1");

        let garbage = vec![0x42u8; 4096];
        let err = unpack_gzip_tar(byte_stream(garbage), &target)
            .await
            .unwrap_err();

        match err {
            Error::Pipeline { stage, .. } => assert_eq!(stage, PipelineStage::Decompress),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn source_errors_are_attributed_to_the_source() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("1");

        let source = futures::stream::iter(vec![
            Ok(Bytes::from_static(&[0x1f, 0x8b])),
            Err(io::Error::other("connection reset by peer")),
        ]);

        let err = unpack_gzip_tar(source, &target).await.unwrap_err();
        match err {
            Error::Pipeline { stage, source } => {
                assert_eq!(stage, PipelineStage::Source);
                assert!(source.to_string().contains("connection reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_archive_fails_in_unpack_stage() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("1");

        // Valid gzip of an invalid (truncated) tar body.
        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(&[0u8; 100]).await.unwrap();
        encoder.shutdown().await.unwrap();
        let archive = encoder.into_inner();

        let err = unpack_gzip_tar(byte_stream(archive), &target)
            .await
            .unwrap_err();
        match err {
            Error::Pipeline { stage, .. } => assert_eq!(stage, PipelineStage::Unpack),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn creates_target_directory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("3");

        let archive = gzip_tarball(&[("manifest.json", r#"{"command": "sh"}"#)]).await;
        unpack_gzip_tar(byte_stream(archive), &target).await.unwrap();

        assert!(target.join("manifest.json").exists());
    }
}

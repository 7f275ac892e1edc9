//! Archive unpacking
//!
//! Streams a fetched resource through the matching decompressor and a tar
//! parser into a temp directory. Tarballs conventionally wrap their contents
//! in a single top-level directory, so one leading path component is
//! stripped. The user-exec bit from tar headers is re-applied on unix so the
//! unpacked tree hashes the same as the tree the archive was built from.

use crate::fetch::{FileType, ReadableResource};
use crate::progress::{ProgressReader, ProgressSink};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use thiserror::Error;
use xz2::read::XzDecoder;

/// Stream buffer between the source and the decompressor, sized to the
/// largest TLS ciphertext record the transport hands over in one read.
pub const STREAM_BUF_LEN: usize = 16_640;

/// Errors that can occur while unpacking an archive
#[derive(Debug, Error)]
pub enum UnpackError {
    /// Archive entry that is neither a regular file nor a directory
    #[error("illegal file type in package: {path} is not a regular file or directory")]
    IllegalFileType { path: String },

    /// Archive entry whose path would escape the destination
    #[error("unsafe path in archive: {path}")]
    UnsafePath { path: String },

    /// IO error from the stream, decompressor, or tar parser
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A directory resource has nothing to unpack
    #[error("source is a directory; nothing to unpack")]
    NothingToUnpack,
}

/// Unpack a fetched resource into `dest`, reporting bytes read to `progress`.
pub fn unpack_resource(
    resource: ReadableResource,
    file_type: FileType,
    dest: &Path,
    progress: &dyn ProgressSink,
) -> Result<(), UnpackError> {
    match resource {
        ReadableResource::File { file, .. } => {
            let hint = file.metadata().ok().map(|metadata| metadata.len());
            unpack_stream(ProgressReader::new(file, progress, hint), file_type, dest)
        }
        ReadableResource::Http { response, .. } => {
            let hint = response.content_length();
            unpack_stream(
                ProgressReader::new(response, progress, hint),
                file_type,
                dest,
            )
        }
        ReadableResource::Directory { .. } => Err(UnpackError::NothingToUnpack),
    }
}

/// Unpack a raw archive byte stream into `dest`.
pub fn unpack_stream<R: Read>(
    reader: R,
    file_type: FileType,
    dest: &Path,
) -> Result<(), UnpackError> {
    let buffered = BufReader::with_capacity(STREAM_BUF_LEN, reader);
    match file_type {
        FileType::TarGz => unpack_tar(GzDecoder::new(buffered), dest),
        FileType::TarXz => unpack_tar(XzDecoder::new(buffered), dest),
    }
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<(), UnpackError> {
    let mut archive = Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let entry_type = entry.header().entry_type();

        // Strip the top-level wrapper directory; the wrapper itself
        // contributes nothing.
        let rel: PathBuf = entry_path.components().skip(1).collect();
        if rel.as_os_str().is_empty() {
            continue;
        }
        if rel
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(UnpackError::UnsafePath {
                path: entry_path.display().to_string(),
            });
        }

        let out_path = dest.join(&rel);
        if entry_type.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else if entry_type.is_file() {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            io::copy(&mut entry, &mut out)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if entry.header().mode()? & 0o100 != 0 {
                    let mut perms = out.metadata()?.permissions();
                    perms.set_mode(perms.mode() | 0o100);
                    out.set_permissions(perms)?;
                }
            }
        } else {
            return Err(UnpackError::IllegalFileType {
                path: entry_path.display().to_string(),
            });
        }
    }
    Ok(())
}

//! Dependency fetching
//!
//! Normalizes heterogeneous dependency locations (relative paths, `file://`,
//! `http://`, `https://`) into a [`ReadableResource`] the unpacker can
//! consume, and classifies the archive format from whatever evidence the
//! source offers (file extension, `Content-Type`, `Content-Disposition`).

use crate::manifest::{Dependency, DependencyLocation};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors that can occur while resolving and opening a dependency source
#[derive(Debug, Error)]
pub enum FetchError {
    /// The location string is not a parsable URL
    #[error("invalid URL \"{url}\": {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    /// URL scheme this resolver does not understand
    #[error("unknown URL scheme: \"{scheme}\"")]
    UnknownScheme { scheme: String },

    /// `file://` URL whose path cannot be turned into a filesystem path
    #[error("invalid file URL: \"{url}\"")]
    InvalidFileUrl { url: String },

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-200 response
    #[error("expected response status 200 OK, found {status}")]
    HttpStatus { status: StatusCode },

    /// IO error opening a local source
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Local file with an extension the unpacker does not handle
    #[error("unknown file type: {path}")]
    UnknownFileType { path: PathBuf },

    /// Classification was asked for a directory; directories are not unpacked
    #[error("source is a directory; nothing to unpack")]
    IsDirectory,

    /// HTTP response without a Content-Type header
    #[error("missing Content-Type header")]
    MissingContentType,

    /// HTTP response with a Content-Type the unpacker does not handle
    #[error("unrecognized Content-Type: \"{content_type}\"")]
    UnknownContentType { content_type: String },

    /// `application/octet-stream` whose Content-Disposition does not name a tarball
    #[error("unsupported Content-Disposition: \"{disposition}\"")]
    UnsupportedDisposition { disposition: String },
}

/// Blocking HTTP client for dependency downloads.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("vela-pm/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpClient { client })
    }
}

/// A dependency location resolved against its declaring package.
#[derive(Debug, Clone)]
pub enum FetchLocation {
    /// Local path (from a `path` dependency or a `file://` URL)
    File(PathBuf),

    /// Remote HTTP(S) location
    Remote(Url),
}

impl FetchLocation {
    /// Classify a dependency's declared location.
    ///
    /// Paths (and `file://` URLs) resolve relative to `pkg_dir`, the root of
    /// the package that declares the dependency.
    pub fn from_dependency(dep: &Dependency, pkg_dir: &Path) -> Result<Self, FetchError> {
        match dep.location() {
            DependencyLocation::Path(path) => Ok(FetchLocation::File(pkg_dir.join(path.get_ref()))),
            DependencyLocation::Url(url) => {
                let parsed = Url::parse(url.get_ref()).map_err(|source| FetchError::InvalidUrl {
                    url: url.get_ref().clone(),
                    source,
                })?;
                match parsed.scheme() {
                    "file" => {
                        let path = parsed.to_file_path().map_err(|()| {
                            FetchError::InvalidFileUrl {
                                url: url.get_ref().clone(),
                            }
                        })?;
                        Ok(FetchLocation::File(pkg_dir.join(path)))
                    }
                    "http" | "https" => Ok(FetchLocation::Remote(parsed)),
                    scheme => Err(FetchError::UnknownScheme {
                        scheme: scheme.to_string(),
                    }),
                }
            }
        }
    }
}

/// An opened dependency source, ready to be unpacked or hashed.
pub enum ReadableResource {
    /// Open read handle on a local archive
    File { file: File, path: PathBuf },

    /// Local directory tree, already unpacked
    Directory { path: PathBuf },

    /// In-flight HTTP GET whose status was verified to be 200
    Http { response: Response, url: Url },
}

impl ReadableResource {
    /// Open a resolved location as a readable resource.
    ///
    /// Local paths become either a [`ReadableResource::File`] or a
    /// [`ReadableResource::Directory`]: a trailing separator forces a
    /// directory, a non-empty extension forces a file, and anything else is
    /// probed as a directory first.
    pub fn open(location: FetchLocation, http: &HttpClient) -> Result<Self, FetchError> {
        match location {
            FetchLocation::File(path) => Self::open_local(path),
            FetchLocation::Remote(url) => {
                debug!(%url, "fetching");
                let response = http.client.get(url.clone()).send()?;
                let status = response.status();
                if status != StatusCode::OK {
                    return Err(FetchError::HttpStatus { status });
                }
                Ok(ReadableResource::Http { response, url })
            }
        }
    }

    fn open_local(path: PathBuf) -> Result<Self, FetchError> {
        let raw = path.to_string_lossy();
        if raw.ends_with('/') || raw.ends_with(std::path::MAIN_SEPARATOR) {
            return Ok(ReadableResource::Directory { path });
        }

        let has_extension = path.extension().is_some_and(|ext| !ext.is_empty());
        if has_extension {
            let file = File::open(&path)?;
            return Ok(ReadableResource::File { file, path });
        }

        match std::fs::read_dir(&path) {
            Ok(_) => Ok(ReadableResource::Directory { path }),
            Err(err) if err.kind() == io::ErrorKind::NotADirectory => {
                let file = File::open(&path)?;
                Ok(ReadableResource::File { file, path })
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Archive formats the unpacker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    TarGz,
    TarXz,
}

impl FileType {
    /// Decide the archive format of a resource.
    pub fn classify(resource: &ReadableResource) -> Result<FileType, FetchError> {
        match resource {
            ReadableResource::File { path, .. } => Self::from_path(path),
            ReadableResource::Directory { .. } => Err(FetchError::IsDirectory),
            ReadableResource::Http { response, .. } => Self::from_response(response),
        }
    }

    fn from_path(path: &Path) -> Result<FileType, FetchError> {
        let raw = path.to_string_lossy();
        if raw.ends_with(".tar.gz") {
            Ok(FileType::TarGz)
        } else if raw.ends_with(".tar.xz") {
            Ok(FileType::TarXz)
        } else {
            Err(FetchError::UnknownFileType {
                path: path.to_path_buf(),
            })
        }
    }

    fn from_response(response: &Response) -> Result<FileType, FetchError> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .ok_or(FetchError::MissingContentType)?;

        match content_type.to_ascii_lowercase().as_str() {
            "application/gzip" | "application/x-gzip" | "application/tar+gzip" => {
                Ok(FileType::TarGz)
            }
            "application/x-xz" => Ok(FileType::TarXz),
            "application/octet-stream" => {
                let disposition = response
                    .headers()
                    .get(reqwest::header::CONTENT_DISPOSITION)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("");
                if attachment_names_tar_gz(disposition) {
                    Ok(FileType::TarGz)
                } else {
                    Err(FetchError::UnsupportedDisposition {
                        disposition: disposition.to_string(),
                    })
                }
            }
            other => Err(FetchError::UnknownContentType {
                content_type: other.to_string(),
            }),
        }
    }
}

/// Check whether a Content-Disposition header names a `.tar.gz` attachment.
///
/// Case-insensitive: the header must start with `attachment;` and carry a
/// `filename=` (or `filename*=`) parameter whose value, after trimming an
/// optional trailing quote, ends in `.tar.gz`.
pub fn attachment_names_tar_gz(disposition: &str) -> bool {
    let lower = disposition.to_ascii_lowercase();
    let Some(rest) = lower.strip_prefix("attachment;") else {
        return false;
    };
    let Some(idx) = rest.find("filename") else {
        return false;
    };
    let rest = &rest[idx + "filename".len()..];
    let rest = rest.strip_prefix('*').unwrap_or(rest);
    let Some(rest) = rest.strip_prefix('=') else {
        return false;
    };
    let value = rest.split(';').next().unwrap_or("").trim();
    let value = value.strip_suffix('"').unwrap_or(value);
    value.ends_with(".tar.gz")
}

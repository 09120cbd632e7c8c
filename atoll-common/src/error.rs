// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

/// Errors surfaced by the metadata server core. Client-visible errors map to
/// POSIX codes through [`FsError::errno`]; everything else is an internal
/// failure reported as EIO.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("{0}")]
    Common(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotDir(String),

    #[error("is a directory: {0}")]
    IsDir(String),

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("resource temporarily unavailable: {0}")]
    Again(String),

    #[error("permission denied: {0}")]
    Denied(String),

    #[error("cross-peer operation not implemented: {0}")]
    CrossPeer(String),

    #[error("io error: {0}")]
    IO(String),
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotDir(_) => libc::ENOTDIR,
            FsError::IsDir(_) => libc::EISDIR,
            FsError::InvalidArg(_) => libc::EINVAL,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::Again(_) => libc::EAGAIN,
            FsError::Denied(_) => libc::EPERM,
            FsError::CrossPeer(_) => libc::EXDEV,
            FsError::Common(_) | FsError::IO(_) => libc::EIO,
        }
    }
}

impl From<String> for FsError {
    fn from(value: String) -> Self {
        FsError::Common(value)
    }
}

impl From<&str> for FsError {
    fn from(value: &str) -> Self {
        FsError::Common(value.to_string())
    }
}

impl From<std::io::Error> for FsError {
    fn from(value: std::io::Error) -> Self {
        FsError::IO(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::FsError;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound("x".into()).errno(), libc::ENOENT);
        assert_eq!(FsError::CrossPeer("x".into()).errno(), libc::EXDEV);
        assert_eq!(FsError::Common("x".into()).errno(), libc::EIO);
    }
}

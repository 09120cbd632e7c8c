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

pub mod conf;
pub mod error;
pub mod fs;
pub mod proto;
pub mod state;
pub mod utils;

pub use error::FsError;

pub type FsResult<T> = Result<T, FsError>;

/// Build an `Err(FsError::Common(..))` from a format string.
#[macro_export]
macro_rules! err_box {
    ($($arg:tt)*) => {
        Err($crate::FsError::Common(format!($($arg)*)))
    };
}

/// Unwrap an `Option`, returning a common error from the enclosing function
/// when the value is absent.
#[macro_export]
macro_rules! try_option {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return $crate::err_box!("unexpected none value"),
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::FsResult;

    fn head(values: &[u32]) -> FsResult<u32> {
        let first = try_option!(values.first());
        Ok(*first)
    }

    #[test]
    fn error_macros() {
        assert_eq!(head(&[7, 8]).unwrap(), 7);

        let err = head(&[]).unwrap_err();
        assert_eq!(err.errno(), libc::EIO);

        let boxed: FsResult<()> = err_box!("lookup of {} failed", "client9");
        let msg = boxed.unwrap_err().to_string();
        assert!(msg.contains("client9"));
    }
}

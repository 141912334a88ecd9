//! Source validation: make sure the input is a readable PDF before pdfium sees it.
//!
//! pdfium reports every load failure the same opaque way. Checking existence,
//! read permission and the `%PDF` magic up front gives the caller a precise
//! error and keeps an obviously wrong input from ever reaching the renderer.

use crate::error::TilerError;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Validate that `path` exists, is readable, and starts with `%PDF`.
pub fn validate_source(path: &Path) -> Result<(), TilerError> {
    if !path.exists() {
        return Err(TilerError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            // Directories open fine on unix; the read fails instead.
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(TilerError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(TilerError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(TilerError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    debug!("Validated source PDF: {}", path.display());
    Ok(())
}

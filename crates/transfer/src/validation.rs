use crate::TransferError;

/// Validates a single remote file name.
///
/// Rejects empty names, `.` and `..`, path separators and NUL bytes.
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }
    if name == "." || name == ".." {
        return Err(TransferError::InvalidName(format!("reserved name: {name}")));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidName(format!(
            "path separator not allowed: {name}"
        )));
    }
    if name.contains('\0') {
        return Err(TransferError::InvalidName("NUL byte not allowed".into()));
    }
    Ok(())
}

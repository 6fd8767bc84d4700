//! Template assembly.
//!
//! Splices raw UDF source into a language template at a fixed placeholder
//! and writes the complete compilation unit to a transient file.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::TempPath;

use crate::error::{Error, Result};

/// Assemble `source` into `template` and write the result to a new
/// uniquely-named file with `extension` under `temp_dir`.
///
/// The returned [`TempPath`] deletes the file when dropped.
///
/// # Errors
/// - `TemplateMissing` if the template path is empty or unreadable
/// - `PlaceholderNotFound` if the marker is absent from the template
/// - `SourceUnreadable` if the UDF source cannot be read
/// - `TempFileCreationFailed` if the transient file cannot be created
pub fn assemble(
    source: &Path,
    template: &Path,
    placeholder: &str,
    extension: &str,
    temp_dir: &Path,
) -> Result<TempPath> {
    let unit = assemble_to_string(source, template, placeholder)?;
    write_transient(unit.as_bytes(), extension, temp_dir)
}

/// Produce the complete compilation unit in memory.
pub(crate) fn assemble_to_string(source: &Path, template: &Path, placeholder: &str) -> Result<String> {
    if template.as_os_str().is_empty() {
        return Err(Error::TemplateMissing {
            path: template.to_path_buf(),
        });
    }
    let template_text = fs::read_to_string(template).map_err(|_| Error::TemplateMissing {
        path: template.to_path_buf(),
    })?;

    let start = template_text
        .find(placeholder)
        .ok_or_else(|| Error::PlaceholderNotFound {
            template: template.to_path_buf(),
            placeholder: placeholder.to_string(),
        })?;
    if template_text[start + placeholder.len()..].contains(placeholder) {
        tracing::warn!(
            "Placeholder '{}' appears more than once in {}; only the first is replaced",
            placeholder,
            template.display()
        );
    }

    let user_code = fs::read_to_string(source).map_err(|source_err| Error::SourceUnreadable {
        path: source.to_path_buf(),
        source: source_err,
    })?;

    let mut unit = String::with_capacity(template_text.len() + user_code.len());
    unit.push_str(&template_text[..start]);
    unit.push_str(&user_code);
    unit.push_str(&template_text[start + placeholder.len()..]);
    Ok(unit)
}

/// Write bytes to a new uniquely-named transient file.
pub(crate) fn write_transient(bytes: &[u8], extension: &str, temp_dir: &Path) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("udf-")
        .suffix(extension)
        .tempfile_in(temp_dir)
        .map_err(Error::TempFileCreationFailed)?;

    file.write_all(bytes)?;
    file.flush()?;
    Ok(file.into_temp_path())
}

use std::fs;

use anyhow::{Context, Result};

/// Resolve a flag value that may name a file: `@FILE` reads the file,
/// anything else is returned as given.
pub fn read_file_or(value: Option<&str>) -> Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(value) => match value.strip_prefix('@') {
            Some(path) => {
                let text =
                    fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
                Ok(Some(text))
            }
            None => Ok(Some(value.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_plain_value_passes_through() {
        let value = read_file_or(Some("be brief")).unwrap();
        assert_eq!(value.as_deref(), Some("be brief"));
    }

    #[test]
    fn test_none_passes_through() {
        assert!(read_file_or(None).unwrap().is_none());
    }

    #[test]
    fn test_at_prefix_reads_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "instructions from a file").unwrap();

        let arg = format!("@{}", file.path().display());
        let value = read_file_or(Some(&arg)).unwrap();
        assert_eq!(value.as_deref(), Some("instructions from a file"));
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let err = read_file_or(Some("@/no/such/file")).unwrap_err();
        assert!(err.to_string().contains("/no/such/file"));
    }
}

use std::fs;
use std::io::Write;

use camino::Utf8Path;

use crate::error::AgentError;

/// Writes `bytes` to a temp file beside `dest`, then renames it into place.
pub fn write_bytes_atomic(dest: &Utf8Path, bytes: &[u8]) -> Result<(), AgentError> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| AgentError::Filesystem(format!("create {parent}: {err}")))?;
    let mut temp = tempfile::Builder::new()
        .prefix("market-agent-export")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| AgentError::Filesystem(err.to_string()))?;
    temp.write_all(bytes)
        .map_err(|err| AgentError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| AgentError::Filesystem(err.to_string()))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| AgentError::Filesystem(format!("write {dest}: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn replaces_existing_file() {
        let temp = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(temp.path().join("out/result.csv")).unwrap();
        write_bytes_atomic(&dest, b"first").unwrap();
        write_bytes_atomic(&dest, b"second").unwrap();
        assert_eq!(fs::read_to_string(dest.as_std_path()).unwrap(), "second");
        let leftovers = fs::read_dir(dest.parent().unwrap().as_std_path())
            .unwrap()
            .count();
        assert_eq!(leftovers, 1);
    }
}

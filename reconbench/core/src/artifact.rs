//! Element counting for reconstruction artifacts.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};
use tracing::debug;

/// Longest PLY header we are willing to scan before giving up.
const MAX_HEADER_LINES: usize = 256;

/// Number of points or vertices in `path`.
///
/// `.ply` files report the declared `element vertex N` count, `.obj` files the
/// number of `v ` lines. Missing files, unknown extensions and parse failures
/// all yield 0.
pub fn count_elements(path: &Path) -> u64 {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let counted = match extension.as_deref() {
        Some("ply") => count_ply_vertices(path),
        Some("obj") => count_obj_vertices(path),
        _ => return 0,
    };

    counted.unwrap_or_else(|e| {
        debug!(path = %path.display(), error = %e, "Could not count artifact elements");
        0
    })
}

/// Read the declared vertex count from a PLY header. Works for ASCII and binary bodies.
pub fn count_ply_vertices(path: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = Vec::new();

    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();

        if text == "end_header" {
            break;
        }
        if let Some(count) = text.strip_prefix("element vertex ") {
            return count
                .trim()
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }
    }

    Ok(0)
}

pub fn count_obj_vertices(path: &Path) -> io::Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.split(b'\n') {
        if line?.starts_with(b"v ") {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn write(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[rstest]
    #[case(b"ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nend_header\n0 0 0\n1 1 1\n2 2 2\n".as_slice(), 3)]
    #[case(b"ply\nformat binary_little_endian 1.0\nelement vertex 120934\nend_header\n\x00\xff\x13\n".as_slice(), 120934)]
    #[case(b"ply\nformat ascii 1.0\nelement face 2\nend_header\n".as_slice(), 0)]
    #[case(b"ply\nelement vertex lots\nend_header\n".as_slice(), 0)]
    fn counts_ply_vertices(#[case] content: &[u8], #[case] expected: u64) {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "cloud.ply", content);
        assert_eq!(count_elements(&path), expected);
    }

    #[test]
    fn counts_obj_vertices() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "mesh.obj",
            b"# mesh\nv 0 0 0\nv 1 0 0\nvn 0 0 1\nv 0 1 0\nf 1 2 3\n",
        );
        assert_eq!(count_elements(&path), 3);
    }

    #[rstest]
    #[case("missing.ply")]
    #[case("notes.txt")]
    fn unknown_or_missing_is_zero(#[case] name: &str) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "v 1 2 3\n").unwrap();
        assert_eq!(count_elements(&dir.path().join(name)), 0);
    }
}

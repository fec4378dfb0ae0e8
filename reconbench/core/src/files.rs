//! Filesystem helpers for uploads, datasets and result listings.

use reconbench_schemas::FileEntry;
use std::{
    io,
    path::{Component, Path, PathBuf},
};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif", "bmp"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> io::Result<Vec<FileEntry>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_file() && is_image_file(&path) {
            images.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: path.display().to_string(),
                size: metadata.len(),
            });
        }
    }
    images.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(images)
}

/// Every regular file below `dir`, relative to it, sorted.
pub fn list_relative_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(dir)
                .ok()
                .map(|rel| rel.display().to_string())
        })
        .collect();
    files.sort();
    files
}

/// Join `relative` onto `root`, refusing absolute paths and any `..` component.
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (resolved != root).then_some(resolved)
}

/// Final component of a client-supplied file name, if it is a usable name.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let candidate = name.rsplit(['/', '\\']).next()?.trim();
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return None;
    }
    Some(candidate.to_string())
}

/// Whether `name` is safe to use as a single path segment (upload ids, dataset names).
pub fn is_safe_segment(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.JPG", true)]
    #[case("scan.tif", true)]
    #[case("notes.txt", false)]
    #[case("no_extension", false)]
    fn recognises_images(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_image_file(Path::new(name)), expected);
    }

    #[test]
    fn lists_images_with_sizes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"12345").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"1").unwrap();
        std::fs::write(dir.path().join("poses.npy"), b"1").unwrap();

        let images = list_images(dir.path()).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name, "a.jpg");
        assert_eq!(images[1].size, 5);
    }

    #[test]
    fn lists_nested_results() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dense/stereo")).unwrap();
        std::fs::write(dir.path().join("dense/fused.ply"), b"ply").unwrap();
        std::fs::write(dir.path().join("log.txt"), b"ok").unwrap();

        assert_eq!(
            list_relative_files(dir.path()),
            vec!["dense/fused.ply".to_string(), "log.txt".to_string()]
        );
    }

    #[rstest]
    #[case("dense/fused.ply", Some("/results/job/dense/fused.ply"))]
    #[case("./log.txt", Some("/results/job/log.txt"))]
    #[case("../other/secret", None)]
    #[case("dense/../../x", None)]
    #[case("/etc/passwd", None)]
    #[case("", None)]
    fn resolves_only_inside_root(#[case] relative: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            resolve_within(Path::new("/results/job"), relative),
            expected.map(PathBuf::from)
        );
    }

    #[rstest]
    #[case("photo.jpg", Some("photo.jpg"))]
    #[case("../../evil.jpg", Some("evil.jpg"))]
    #[case("C:\\Users\\me\\img.png", Some("img.png"))]
    #[case("..", None)]
    #[case("dir/", None)]
    fn sanitizes_upload_names(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(sanitize_file_name(name), expected.map(str::to_string));
    }

    #[rstest]
    #[case("garden", true)]
    #[case("..", false)]
    #[case("a/b", false)]
    #[case("", false)]
    fn checks_path_segments(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_safe_segment(name), expected);
    }
}

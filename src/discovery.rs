use anyhow::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Expand files and directories into the image files to ingest.
///
/// Files named explicitly are kept regardless of extension; directories are
/// walked recursively and filtered by `extensions`.
pub fn discover_images(inputs: &[PathBuf], extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for input in inputs {
        if input.is_file() {
            images.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            anyhow::bail!("No such file or directory: {}", input.display());
        }

        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && has_extension(p, extensions))
            .collect();

        // Sort by path for consistent ordering
        found.sort();
        images.extend(found);
    }

    Ok(images)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| e.to_lowercase() == ext))
}

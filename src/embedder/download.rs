/// First-run fetch of the embedding model from HuggingFace.
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Local file name and path inside the HuggingFace repository.
const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
    ("config.json", "config.json"),
];

/// Check whether all required model files exist in `model_dir`.
#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    MODEL_FILES
        .iter()
        .all(|(name, _)| model_dir.join(name).exists())
}

/// Download whichever model files are missing from `repo` into `model_dir`.
pub fn download_model_files(model_dir: &Path, repo: &str) -> Result<()> {
    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create model directory: {}", model_dir.display()))?;

    for &(filename, remote) in MODEL_FILES {
        let dest = model_dir.join(filename);
        if dest.exists() {
            continue;
        }
        let url = format!("https://huggingface.co/{repo}/resolve/main/{remote}");
        info!("Downloading {url}");
        download_file(&dest, &url).with_context(|| format!("failed to download {filename}"))?;
    }

    info!("Embedding model files ready in {}", model_dir.display());
    Ok(())
}

/// Stream `url` into `dest`, writing to a sibling `.part` file first so an
/// interrupted download is never mistaken for a complete one.
fn download_file(dest: &Path, url: &str) -> Result<()> {
    let resp = reqwest::blocking::get(url).with_context(|| format!("HTTP request failed: {url}"))?;
    if !resp.status().is_success() {
        anyhow::bail!("bad status: {} for {url}", resp.status());
    }

    let pb = match resp.content_length() {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {percent}% ({bytes}/{total_bytes}) {msg}")
            {
                pb.set_style(style.progress_chars("█▓░"));
            }
            pb
        }
        _ => ProgressBar::new_spinner(),
    };

    let partial = dest.with_extension("part");
    let mut file = fs::File::create(&partial)
        .with_context(|| format!("failed to create file: {}", partial.display()))?;
    std::io::copy(&mut pb.wrap_read(resp), &mut file).context("failed to write file")?;
    pb.finish_and_clear();

    fs::rename(&partial, dest)
        .with_context(|| format!("failed to move download into place: {}", dest.display()))?;
    Ok(())
}

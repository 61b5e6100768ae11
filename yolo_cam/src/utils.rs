//! Utility functions
//!
use std::{
    fs::{self, File},
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::Result;
use reqwest::Client;

/// Default directory to keep downloaded models in.
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("yolo_cam")
        .join("models")
}

/// Download a file from a URL to a given filepath.
///
/// The content is written next to `filepath` first and moved in place once complete, so an
/// interrupted download never leaves a truncated file behind.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let filepath = filepath.as_ref();
    let resp = client.get(url).send().await?.error_for_status()?;

    let partial = filepath.with_extension("part");
    {
        let mut file = File::create(&partial)?;
        let mut content = Cursor::new(resp.bytes().await?);
        std::io::copy(&mut content, &mut file)?;
    }
    fs::rename(&partial, filepath)?;

    log::debug!("Downloaded {} to {}", url, filepath.display());

    Ok(())
}

#[cfg(test)]
mod test {
    use super::default_model_dir;

    #[test]
    fn model_dir_is_namespaced() {
        assert!(default_model_dir().ends_with("yolo_cam/models"));
    }
}

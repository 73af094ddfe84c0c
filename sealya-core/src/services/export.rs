//! Export service
//!
//! Packages letters as a ZIP archive with a manifest and checksums.
//! Letters still locked by their schedule are left out.

use crate::clock::SharedClock;
use crate::database::Letter;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use tokio::fs;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Export manifest structure
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    pub version: String,
    pub timestamp: String,
    pub letter_count: usize,
    /// Letters withheld because they are still scheduled
    pub locked_skipped: usize,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub checksum: String,
}

/// Export service
#[derive(Clone)]
pub struct ExportService {
    exports_dir: PathBuf,
    clock: SharedClock,
}

impl ExportService {
    pub fn new(app_data_dir: PathBuf, clock: SharedClock) -> Self {
        Self {
            exports_dir: app_data_dir.join("exports"),
            clock,
        }
    }

    pub fn exports_dir(&self) -> &PathBuf {
        &self.exports_dir
    }

    /// Write `letters` to a new archive and return its path
    pub async fn export_letters(&self, letters: &[Letter]) -> Result<PathBuf> {
        tracing::info!("Exporting {} letters", letters.len());

        fs::create_dir_all(&self.exports_dir).await?;

        let now = self.clock.now();
        let stamp = now.format("%Y%m%d-%H%M%S").to_string();
        let zip_path = self.exports_dir.join(format!("sealya-letters-{}.zip", stamp));
        let temp_path = self.exports_dir.join(format!("sealya-letters-{}.zip.tmp", stamp));

        let (open, locked): (Vec<&Letter>, Vec<&Letter>) =
            letters.iter().partition(|letter| !letter.is_locked(now));

        let mut manifest = ExportManifest {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: now.to_rfc3339(),
            letter_count: open.len(),
            locked_skipped: locked.len(),
            files: Vec::new(),
        };

        let temp_file = std::fs::File::create(&temp_path)?;
        let mut zip = ZipWriter::new(temp_file);
        let options =
            FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);

        let letters_json = serde_json::to_vec_pretty(&open)?;
        add_file(&mut zip, options, &mut manifest, "letters.json", &letters_json)?;

        // Protected letters only travel inside letters.json, still encrypted
        for letter in open.iter().filter(|letter| !letter.is_protected()) {
            let path = format!("letters/{}", text_file_name(letter));
            add_file(
                &mut zip,
                options,
                &mut manifest,
                &path,
                render_letter(letter).as_bytes(),
            )?;
        }

        let manifest_json = serde_json::to_string_pretty(&manifest)?;
        zip.start_file("manifest.json", options)?;
        zip.write_all(manifest_json.as_bytes())?;
        zip.finish()?;

        fs::rename(&temp_path, &zip_path).await?;

        tracing::info!(
            "Export written to {:?} ({} letters, {} locked skipped)",
            zip_path,
            manifest.letter_count,
            manifest.locked_skipped
        );
        Ok(zip_path)
    }
}

fn add_file(
    zip: &mut ZipWriter<std::fs::File>,
    options: FileOptions<()>,
    manifest: &mut ExportManifest,
    path: &str,
    data: &[u8],
) -> Result<()> {
    zip.start_file(path, options)?;
    zip.write_all(data)?;

    manifest.files.push(FileEntry {
        path: path.to_string(),
        size: data.len() as u64,
        checksum: calculate_checksum(data),
    });
    Ok(())
}

/// `2025-07-01-dear-future-me-1a2b3c4d.txt`
fn text_file_name(letter: &Letter) -> String {
    let slug: String = letter
        .title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug = if slug.is_empty() { "letter".to_string() } else { slug };
    let short_id: String = letter.id.chars().take(8).collect();

    format!(
        "{}-{}-{}.txt",
        letter.timestamp.format("%Y-%m-%d"),
        slug,
        short_id
    )
}

fn render_letter(letter: &Letter) -> String {
    let mut out = format!(
        "{} {}\n{}\n",
        letter.emoji.emoji(),
        letter.title,
        letter.timestamp.format("%Y-%m-%d %H:%M UTC")
    );
    if !letter.label.is_empty() {
        out.push_str(&format!("Label: {}\n", letter.label));
    }
    out.push('\n');
    out.push_str(&letter.content);
    out.push('\n');
    out
}

fn calculate_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

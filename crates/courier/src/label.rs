//! Thermal label output.
//!
//! The carrier returns labels as base64 PDF. [`LabelWriter`] decodes them
//! into a shared scratch file and an archive copy named after the tracking
//! number.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Write the shared scratch file.
    pub write: bool,
    /// Keep a per-tracking-number copy under `dir`.
    pub archive: bool,
    pub scratch_file: PathBuf,
    pub dir: PathBuf,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            write: true,
            archive: true,
            scratch_file: PathBuf::from("etiqueta.pdf"),
            dir: PathBuf::from("etiquetas"),
        }
    }
}

/// Files written for one label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelFiles {
    pub scratch: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub bytes: usize,
}

pub struct LabelWriter {
    config: LabelConfig,
}

impl LabelWriter {
    pub fn new(config: LabelConfig) -> Self {
        Self { config }
    }

    pub fn archive_path(&self, tracking_number: &str) -> PathBuf {
        self.config
            .dir
            .join(format!("etiqueta_{}.pdf", file_safe(tracking_number)))
    }

    /// Decode `encoded` and write the configured files.
    pub fn write(&self, tracking_number: &str, encoded: &str) -> Result<LabelFiles> {
        let pdf = decode(encoded)?;
        let mut files = LabelFiles {
            bytes: pdf.len(),
            ..Default::default()
        };

        if self.config.write {
            write_file(&self.config.scratch_file, &pdf)?;
            files.scratch = Some(self.config.scratch_file.clone());
        }
        if self.config.archive {
            let path = self.archive_path(tracking_number);
            write_file(&path, &pdf)?;
            files.archive = Some(path);
        }
        Ok(files)
    }
}

/// Decode base64, tolerating whitespace and a `data:` URI prefix.
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    let payload = encoded
        .split_once("base64,")
        .map_or(encoded, |(_, rest)| rest);
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .context("label is not valid base64")
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create label dir {}", parent.display()))?;
    }
    fs::write(path, data).with_context(|| format!("failed to write label {}", path.display()))
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    const PDF: &[u8] = b"%PDF-1.4 label";

    fn config(root: &Path) -> LabelConfig {
        LabelConfig {
            write: true,
            archive: true,
            scratch_file: root.join("etiqueta.pdf"),
            dir: root.join("etiquetas"),
        }
    }

    #[test]
    fn writes_scratch_and_archive_copies() {
        let td = tempdir().expect("tempdir");
        let writer = LabelWriter::new(config(td.path()));

        let files = writer
            .write("1234567", &STANDARD.encode(PDF))
            .expect("write");

        assert_eq!(files.bytes, PDF.len());
        let archive = files.archive.expect("archive");
        assert_eq!(archive, td.path().join("etiquetas/etiqueta_1234567.pdf"));
        assert_eq!(fs::read(archive).expect("read"), PDF);
        assert_eq!(fs::read(td.path().join("etiqueta.pdf")).expect("read"), PDF);
    }

    #[test]
    fn archive_can_be_disabled() {
        let td = tempdir().expect("tempdir");
        let writer = LabelWriter::new(LabelConfig {
            archive: false,
            ..config(td.path())
        });
        let files = writer.write("G1", &STANDARD.encode(PDF)).expect("write");
        assert!(files.archive.is_none());
        assert!(!td.path().join("etiquetas").exists());
    }

    #[test]
    fn decode_accepts_data_uri_and_line_breaks() {
        let encoded = STANDARD.encode(PDF);
        let (head, tail) = encoded.split_at(8);
        let wrapped = format!("data:application/pdf;base64,{head}\n{tail}");
        assert_eq!(decode(&wrapped).expect("decode"), PDF);
        assert!(decode("not base64!").is_err());
    }

    #[test]
    fn tracking_number_is_made_file_safe() {
        let writer = LabelWriter::new(LabelConfig::default());
        assert_eq!(
            writer.archive_path("12/34 5"),
            PathBuf::from("etiquetas/etiqueta_12_34_5.pdf")
        );
    }
}

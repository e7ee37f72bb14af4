//! Screen text recognition through the `tesseract` command-line tool.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::mode::Ocr;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed { program: String, status: String, stderr: String },
}

/// Runs `tesseract IMAGE stdout` and shapes the output to the console grid.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub program: PathBuf,
    pub tessdata: Option<PathBuf>,
    pub lang: String,
    /// Page segmentation mode; 6 treats the image as one block of text.
    pub psm: u8,
    pub columns: usize,
    pub rows: usize,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        TesseractOcr {
            program: PathBuf::from("tesseract"),
            tessdata: None,
            lang: "eng".to_owned(),
            psm: 6,
            columns: 80,
            rows: 25,
        }
    }
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self::default()
    }

    fn command(&self, image: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(image).arg("stdout");
        if let Some(dir) = &self.tessdata {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd.arg("-l").arg(&self.lang).arg("--psm").arg(self.psm.to_string());
        cmd
    }
}

impl Ocr for TesseractOcr {
    fn recognize(&mut self, image: &Path) -> Result<Vec<String>, OcrError> {
        let program = self.program.display().to_string();
        let output = self
            .command(image)
            .output()
            .map_err(|source| OcrError::Spawn { program: program.clone(), source })?;
        if !output.status.success() {
            return Err(OcrError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let rows = fit_to_screen(&text, self.columns, self.rows);
        debug!(rows = rows.len(), "ocr");
        Ok(rows)
    }
}

/// Split OCR output into rows: trailing whitespace and form feeds removed,
/// each row cut to `columns` characters, only the bottom `rows` rows kept.
/// Zero disables the respective limit.
pub fn fit_to_screen(text: &str, columns: usize, rows: usize) -> Vec<String> {
    let mut lines: Vec<String> = text
        .lines()
        .map(|l| {
            let l = l.trim_end_matches(|c: char| c.is_whitespace() || c == '\u{c}');
            if columns > 0 {
                l.chars().take(columns).collect()
            } else {
                l.to_owned()
            }
        })
        .collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    if rows > 0 && lines.len() > rows {
        lines.drain(..lines.len() - rows);
    }
    lines
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Execution modes: where typed text, keys and screen captures go.
//!
//! The executor only talks to an [`ExecutionMode`].  [`LiveMode`] drives a
//! real VM through a [`Transport`] (key injection and screen dumps) and an
//! [`Ocr`] engine; [`DryRunMode`] records a narration of what would happen
//! and touches nothing.

use std::path::Path;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::keybind::{self, KeyCode};
use crate::ocr::OcrError;
use crate::script::stmt::ImageFormat;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ModeError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Ocr(#[from] OcrError),
}

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Key injection and screen dumps for one VM.
pub trait Transport {
    fn send_key(&mut self, key: &KeyCode) -> Result<(), ModeError>;
    /// Write the current screen of the VM to `path`.
    fn screendump(&mut self, path: &Path, format: ImageFormat) -> Result<(), ModeError>;
}

/// Text recognition over a screen image.
pub trait Ocr {
    /// One string per screen row, top to bottom.
    fn recognize(&mut self, image: &Path) -> Result<Vec<String>, OcrError>;
}

/// Everything the executor needs from the outside world.
pub trait ExecutionMode {
    /// Type `text`; a trailing `\n` presses Enter.
    fn send_text(&mut self, text: &str) -> Result<(), ModeError>;
    fn send_key(&mut self, key: &KeyCode) -> Result<(), ModeError>;
    /// Switch to virtual console `number` (1-12).
    fn switch_console(&mut self, number: u8) -> Result<(), ModeError>;
    fn wait(&mut self, duration: Duration);
    fn screenshot(&mut self, path: &Path, format: ImageFormat) -> Result<(), ModeError>;
    /// OCR the current screen, one string per row.
    fn capture_screen(&mut self) -> Result<Vec<String>, ModeError>;

    fn is_dry_run(&self) -> bool {
        false
    }

    /// Describe a step that has no side effect of its own (dry runs only).
    fn narrate(&mut self, _message: &str) {}
}

impl<M: ExecutionMode + ?Sized> ExecutionMode for Box<M> {
    fn send_text(&mut self, text: &str) -> Result<(), ModeError> {
        (**self).send_text(text)
    }
    fn send_key(&mut self, key: &KeyCode) -> Result<(), ModeError> {
        (**self).send_key(key)
    }
    fn switch_console(&mut self, number: u8) -> Result<(), ModeError> {
        (**self).switch_console(number)
    }
    fn wait(&mut self, duration: Duration) {
        (**self).wait(duration)
    }
    fn screenshot(&mut self, path: &Path, format: ImageFormat) -> Result<(), ModeError> {
        (**self).screenshot(path, format)
    }
    fn capture_screen(&mut self) -> Result<Vec<String>, ModeError> {
        (**self).capture_screen()
    }
    fn is_dry_run(&self) -> bool {
        (**self).is_dry_run()
    }
    fn narrate(&mut self, message: &str) {
        (**self).narrate(message)
    }
}

// ── LiveMode ──────────────────────────────────────────────────────────────────

/// Drives a VM: keys through `T`, screen text through `O`.
pub struct LiveMode<T, O> {
    transport: T,
    ocr: O,
    /// Pause between individual key presses while typing text.
    key_delay: Duration,
}

impl<T: Transport, O: Ocr> LiveMode<T, O> {
    pub fn new(transport: T, ocr: O) -> Self {
        LiveMode { transport, ocr, key_delay: Duration::ZERO }
    }

    pub fn with_key_delay(mut self, delay: Duration) -> Self {
        self.key_delay = delay;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn ocr(&self) -> &O {
        &self.ocr
    }
}

impl<T: Transport, O: Ocr> ExecutionMode for LiveMode<T, O> {
    fn send_text(&mut self, text: &str) -> Result<(), ModeError> {
        debug!(text, "typing");
        for ch in text.chars() {
            let Some(key) = keybind::char_key(ch) else {
                warn!(?ch, "no key types this character; skipped");
                continue;
            };
            self.transport.send_key(&key)?;
            if !self.key_delay.is_zero() {
                thread::sleep(self.key_delay);
            }
        }
        Ok(())
    }

    fn send_key(&mut self, key: &KeyCode) -> Result<(), ModeError> {
        debug!(%key, "key");
        self.transport.send_key(key)
    }

    fn switch_console(&mut self, number: u8) -> Result<(), ModeError> {
        debug!(number, "switching console");
        self.transport.send_key(&KeyCode::new(format!("ctrl-alt-f{number}")))
    }

    fn wait(&mut self, duration: Duration) {
        thread::sleep(duration);
    }

    fn screenshot(&mut self, path: &Path, format: ImageFormat) -> Result<(), ModeError> {
        info!(path = %path.display(), format = format.name(), "screenshot");
        self.transport.screendump(path, format)
    }

    fn capture_screen(&mut self) -> Result<Vec<String>, ModeError> {
        let image = tempfile::Builder::new()
            .prefix("vmscript-")
            .suffix(".ppm")
            .tempfile()?;
        self.transport.screendump(image.path(), ImageFormat::Ppm)?;
        let rows = self.ocr.recognize(image.path())?;
        debug!(rows = rows.len(), "captured screen");
        Ok(rows)
    }
}

// ── DryRunMode ────────────────────────────────────────────────────────────────

/// Records what a live run would do.
#[derive(Debug, Default)]
pub struct DryRunMode {
    narration: Vec<String>,
}

impl DryRunMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn narration(&self) -> &[String] {
        &self.narration
    }

    fn record(&mut self, message: String) {
        info!(target: "vmscript::dry_run", "{message}");
        self.narration.push(message);
    }
}

impl ExecutionMode for DryRunMode {
    fn send_text(&mut self, text: &str) -> Result<(), ModeError> {
        match text.strip_suffix('\n') {
            Some(line) => self.record(format!("type {line:?} + Enter")),
            None => self.record(format!("type {text:?}")),
        }
        Ok(())
    }

    fn send_key(&mut self, key: &KeyCode) -> Result<(), ModeError> {
        self.record(format!("press {key}"));
        Ok(())
    }

    fn switch_console(&mut self, number: u8) -> Result<(), ModeError> {
        self.record(format!("switch to console {number}"));
        Ok(())
    }

    fn wait(&mut self, duration: Duration) {
        self.record(format!("wait {duration:?}"));
    }

    fn screenshot(&mut self, path: &Path, format: ImageFormat) -> Result<(), ModeError> {
        self.record(format!("screenshot {} ({})", path.display(), format.name()));
        Ok(())
    }

    fn capture_screen(&mut self) -> Result<Vec<String>, ModeError> {
        Ok(Vec::new())
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    fn narrate(&mut self, message: &str) {
        self.record(message.to_owned());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        keys: Vec<String>,
        dumps: Vec<(PathBuf, ImageFormat)>,
    }

    impl Transport for RecordingTransport {
        fn send_key(&mut self, key: &KeyCode) -> Result<(), ModeError> {
            self.keys.push(key.to_string());
            Ok(())
        }
        fn screendump(&mut self, path: &Path, format: ImageFormat) -> Result<(), ModeError> {
            self.dumps.push((path.to_path_buf(), format));
            Ok(())
        }
    }

    struct FixedOcr(Vec<String>);

    impl Ocr for FixedOcr {
        fn recognize(&mut self, image: &Path) -> Result<Vec<String>, OcrError> {
            assert!(image.exists(), "capture image should exist during OCR");
            Ok(self.0.clone())
        }
    }

    fn live() -> LiveMode<RecordingTransport, FixedOcr> {
        LiveMode::new(RecordingTransport::default(), FixedOcr(vec!["login:".into()]))
    }

    #[test]
    fn typing_sends_one_key_per_character() {
        let mut m = live();
        m.send_text("Hi!\n").unwrap();
        assert_eq!(m.transport().keys, vec!["shift-h", "i", "shift-1", "ret"]);
    }

    #[test]
    fn untypeable_characters_are_skipped() {
        let mut m = live();
        m.send_text("aé").unwrap();
        assert_eq!(m.transport().keys, vec!["a"]);
    }

    #[test]
    fn console_switch_uses_ctrl_alt_fn() {
        let mut m = live();
        m.switch_console(3).unwrap();
        assert_eq!(m.transport().keys, vec!["ctrl-alt-f3"]);
    }

    #[test]
    fn capture_dumps_ppm_then_ocrs() {
        let mut m = live();
        let rows = m.capture_screen().unwrap();
        assert_eq!(rows, vec!["login:"]);
        let (path, format) = &m.transport().dumps[0];
        assert_eq!(*format, ImageFormat::Ppm);
        assert!(!path.exists(), "temporary capture should be removed");
    }

    #[test]
    fn dry_run_narrates() {
        let mut m = DryRunMode::new();
        assert!(m.is_dry_run());
        m.send_text("ls\n").unwrap();
        m.send_key(&KeyCode::new("ctrl-c")).unwrap();
        m.wait(Duration::from_secs(2));
        m.narrate("would wait for \"login:\"");
        assert_eq!(
            m.narration(),
            &[
                "type \"ls\" + Enter".to_owned(),
                "press ctrl-c".to_owned(),
                "wait 2s".to_owned(),
                "would wait for \"login:\"".to_owned(),
            ]
        );
        assert!(m.capture_screen().unwrap().is_empty());
    }
}

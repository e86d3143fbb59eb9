pub mod bundle;
pub mod cas;
pub mod completions;
pub mod create_layer;
pub mod init;
pub mod man_pages;
pub mod refs;
pub mod unpack;
pub mod validate;

use indicatif::{ProgressBar, ProgressStyle};
use ocitool_core::{autodetect, CoreError, Image, InputType};
use ocitool_store::{CancelToken, SourceWalker, StoreError};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(ok: bool) -> String {
    use console::Style;
    if ok {
        Style::new().green().apply_to("OK").to_string()
    } else {
        Style::new().red().bold().apply_to("FAIL").to_string()
    }
}

/// Error text for engine failures; the prefix selects `EXIT_STORE_ERROR`.
pub fn store_err(e: &StoreError) -> String {
    format!("store error: {e}")
}

pub fn usage_err(msg: impl std::fmt::Display) -> String {
    format!("usage error: {msg}")
}

/// Parse an explicit `--type`, or detect it from the file.
pub fn input_type(path: &Path, kind: Option<&str>) -> Result<InputType, String> {
    match kind {
        Some(kind) => kind.parse().map_err(|e: CoreError| usage_err(e)),
        None => autodetect(path).map_err(|e| e.to_string()),
    }
}

/// Open an image source that carries references: a layout directory or an
/// image tarball.
pub fn open_image(
    path: &Path,
    kind: Option<&str>,
    cancel: &CancelToken,
) -> Result<Image<SourceWalker>, String> {
    let walker = match input_type(path, kind)? {
        InputType::ImageLayout => SourceWalker::directory(path, cancel.clone()),
        InputType::Image => SourceWalker::tar(path, cancel.clone()).map_err(|e| store_err(&e))?,
        other => {
            return Err(usage_err(format!(
                "{}: {other} input has no references; expected imageLayout or image",
                path.display()
            )))
        }
    };
    Ok(Image::new(walker, cancel.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"file": "image.tar", "ok": true});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"file\""));
        assert!(result.contains("image.tar"));
    }

    #[test]
    fn colorize_status_keeps_text() {
        assert!(colorize_status(true).contains("OK"));
        assert!(colorize_status(false).contains("FAIL"));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_USAGE);
        assert_ne!(EXIT_USAGE, EXIT_STORE_ERROR);
    }

    #[test]
    fn explicit_type_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            input_type(dir.path(), Some("manifest")).unwrap(),
            InputType::Manifest
        );
        let err = input_type(dir.path(), Some("bogus")).unwrap_err();
        assert!(err.starts_with("usage error:"));
        assert_eq!(input_type(dir.path(), None).unwrap(), InputType::ImageLayout);
    }

    #[test]
    fn json_inputs_cannot_be_opened_as_images() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_image(dir.path(), Some("config"), &CancelToken::new())
            .err()
            .unwrap();
        assert!(err.starts_with("usage error:"));
    }

    #[test]
    fn spinner_creates_progress_bar() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}

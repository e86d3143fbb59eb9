use super::{
    colorize_status, input_type, json_pretty, open_image, usage_err, EXIT_FAILURE, EXIT_SUCCESS,
};
use ocitool_core::{CoreError, InputType};
use ocitool_schema::media_type::{
    MEDIA_TYPE_IMAGE_CONFIG, MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_IMAGE_MANIFEST_LIST,
};
use ocitool_schema::{JsonSchemaValidator, SchemaError, SchemaValidator};
use ocitool_store::CancelToken;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    ok: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    references: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

pub fn run(
    files: &[PathBuf],
    kind: Option<&str>,
    refs: &[String],
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    if let Some(kind) = kind {
        kind.parse::<InputType>().map_err(|e: CoreError| usage_err(e))?;
    }

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let report = validate_path(file, kind, refs, cancel);
        if cancel.is_cancelled() {
            return Err("validation interrupted".to_owned());
        }
        if !json {
            print_report(&report);
        }
        reports.push(report);
    }

    if json {
        println!("{}", json_pretty(&reports)?);
    }
    if reports.iter().all(|r| r.ok) {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}

fn print_report(report: &FileReport) {
    for reference in &report.references {
        println!("{}: reference {reference:?}: {}", report.file, colorize_status(true));
    }
    if report.ok {
        println!("{}: {}", report.file, colorize_status(true));
    } else {
        for error in &report.errors {
            eprintln!("{}: validation failed: {error}", report.file);
        }
    }
}

fn validate_path(
    file: &Path,
    kind: Option<&str>,
    refs: &[String],
    cancel: &CancelToken,
) -> FileReport {
    let mut report = FileReport {
        file: file.display().to_string(),
        kind: None,
        ok: false,
        references: Vec::new(),
        errors: Vec::new(),
    };
    let kind = match input_type(file, kind) {
        Ok(kind) => kind,
        Err(e) => {
            report.errors.push(format!("unable to determine type: {e}"));
            return report;
        }
    };
    report.kind = Some(kind.to_string());

    let media_type = match kind {
        InputType::ImageLayout | InputType::Image => {
            validate_image(file, kind, refs, cancel, &mut report);
            report.ok = report.errors.is_empty();
            return report;
        }
        InputType::Manifest => MEDIA_TYPE_IMAGE_MANIFEST,
        InputType::ManifestList => MEDIA_TYPE_IMAGE_MANIFEST_LIST,
        InputType::Config => MEDIA_TYPE_IMAGE_CONFIG,
    };

    match std::fs::read(file) {
        Ok(data) => match JsonSchemaValidator::new().validate(media_type, &data) {
            Ok(()) => {}
            Err(SchemaError::ValidationFailed { errors, .. }) => report.errors = errors,
            Err(e) => report.errors.push(e.to_string()),
        },
        Err(e) => report.errors.push(format!("unable to open file: {e}")),
    }
    report.ok = report.errors.is_empty();
    report
}

fn validate_image(
    file: &Path,
    kind: InputType,
    refs: &[String],
    cancel: &CancelToken,
    report: &mut FileReport,
) {
    let mut image = match open_image(file, Some(kind.as_str()), cancel) {
        Ok(image) => image,
        Err(e) => {
            report.errors.push(e);
            return;
        }
    };
    match image.validate(refs) {
        Ok(results) => {
            for (reference, result) in results {
                match result {
                    Ok(()) => report.references.push(reference),
                    Err(e) => report.errors.extend(
                        messages(&e)
                            .into_iter()
                            .map(|m| format!("reference {reference:?}: {m}")),
                    ),
                }
            }
        }
        Err(e) => report.errors.extend(messages(&e)),
    }
}

/// One line per schema violation, or the whole error chain.
fn messages(err: &CoreError) -> Vec<String> {
    match err.schema_violations() {
        Some(violations) => violations.to_vec(),
        None => vec![err.to_string()],
    }
}

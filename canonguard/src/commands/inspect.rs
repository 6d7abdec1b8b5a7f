// canonguard/src/commands/inspect.rs
use anyhow::{Context, Result};
use is_terminal::IsTerminal;
use log::debug;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use canonguard_core::{find_match, FingerprintExtractor, GuardConfig, TemplateIndex};

use crate::output;

/// Prints the fingerprint of `file` and the template it would be restored from.
/// Read-only. Fails when the document is not a candidate.
pub fn run_inspect(config: &GuardConfig, file: &Path) -> Result<()> {
    debug!("Inspecting {}", file.display());
    let extractor = FingerprintExtractor::new(config.schema.clone());
    let fingerprint = extractor
        .try_extract(file)
        .with_context(|| format!("{} has no usable fingerprint", file.display()))?;
    let index = TemplateIndex::build(&config.template_dir(), &config.schema);

    let stdout = io::stdout();
    let color = stdout.is_terminal();
    let mut out = stdout.lock();
    writeln!(out, "{}", output::highlight(&file.display().to_string(), color))?;
    let rows: Vec<(String, String)> = fingerprint.fields().into_iter().collect();
    output::print_fields(&mut out, &rows, color)?;

    match find_match(&fingerprint, &index) {
        Some(template) => {
            let canonical = fs::read(&template.path)
                .with_context(|| format!("Failed to read template {}", template.path.display()))?;
            let current = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
            let state = if canonical == current {
                "already canonical"
            } else {
                "differs"
            };
            writeln!(
                out,
                "matches template '{}' ({})",
                output::highlight(&template.name, color),
                state
            )?;
        }
        None => writeln!(out, "no matching template")?,
    }
    Ok(())
}

// canonguard/src/commands/templates.rs
use anyhow::Result;
use is_terminal::IsTerminal;
use std::io::{self, Write};

use canonguard_core::{GuardConfig, TemplateIndex};

use crate::output;

/// Lists the templates in enumeration order, then any identities that shadow
/// one another.
pub fn run_templates(config: &GuardConfig) -> Result<()> {
    let dir = config.template_dir();
    let index = TemplateIndex::build(&dir, &config.schema);

    let stdout = io::stdout();
    let color = stdout.is_terminal();
    let mut out = stdout.lock();

    if index.is_empty() {
        writeln!(out, "No templates in {}", dir.display())?;
        return Ok(());
    }

    writeln!(out, "{} templates in {}", index.len(), dir.display())?;
    for template in index.all() {
        let (mst, form, period_type, period) = template.fingerprint.identity();
        let sequence = template.fingerprint.sequence().unwrap_or("-");
        writeln!(
            out,
            "  {}  mst={} form={} period={}:{} seq={}",
            output::highlight(&template.name, color),
            mst,
            form,
            period_type,
            period,
            sequence
        )?;
    }

    for (first, shadowed) in index.shared_identities() {
        output::warn_msg(format!(
            "'{}' shadows '{}' (same identity)",
            first.name, shadowed.name
        ));
    }
    Ok(())
}

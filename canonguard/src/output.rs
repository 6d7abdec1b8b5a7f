// canonguard/src/output.rs
//! Terminal message helpers. Colour is used only when the stream is a terminal.

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::io::{self, Write};

pub fn info_msg(msg: impl AsRef<str>) {
    let color = io::stderr().is_terminal();
    let line = if color {
        format!("{} {}", "[info]".cyan(), msg.as_ref())
    } else {
        format!("[info] {}", msg.as_ref())
    };
    let _ = writeln!(io::stderr(), "{}", line);
}

pub fn warn_msg(msg: impl AsRef<str>) {
    let color = io::stderr().is_terminal();
    let line = if color {
        format!("{} {}", "[warn]".yellow(), msg.as_ref())
    } else {
        format!("[warn] {}", msg.as_ref())
    };
    let _ = writeln!(io::stderr(), "{}", line);
}

pub fn error_msg(msg: impl AsRef<str>) {
    let color = io::stderr().is_terminal();
    let line = if color {
        format!("{} {}", "[error]".red().bold(), msg.as_ref())
    } else {
        format!("[error] {}", msg.as_ref())
    };
    let _ = writeln!(io::stderr(), "{}", line);
}

/// Writes `key: value` rows to `out`, aligning the values.
pub fn print_fields<W: Write>(
    out: &mut W,
    rows: &[(String, String)],
    color: bool,
) -> io::Result<()> {
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in rows {
        let padded = format!("{:width$}", key, width = width);
        if color {
            writeln!(out, "  {}  {}", padded.bold(), value)?;
        } else {
            writeln!(out, "  {}  {}", padded, value)?;
        }
    }
    Ok(())
}

/// Green when coloured, plain otherwise.
pub fn highlight(text: &str, color: bool) -> String {
    if color {
        text.green().to_string()
    } else {
        text.to_string()
    }
}

//! Menu shown when the CLI is started without inputs

use anyhow::Result;
use std::io::{BufRead, Write};

/// What the user asked for in the menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MenuChoice {
    /// Process one image, optionally writing to an explicit output file
    SingleImage { input: String, output: Option<String> },
    /// Process a directory into an output directory
    Directory { input: String, output: Option<String> },
    Quit,
}

/// Prompt until a valid choice is entered; end of input counts as quit
pub(crate) fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<MenuChoice> {
    loop {
        writeln!(out, "bgstrip - remove image backgrounds")?;
        writeln!(out, "  1) Process a single image")?;
        writeln!(out, "  2) Process a directory")?;
        writeln!(out, "  3) Quit")?;

        let Some(choice) = ask(input, out, "Select an option [1-3]: ")? else {
            return Ok(MenuChoice::Quit);
        };

        match choice.as_str() {
            "1" => {
                let Some(path) = ask_required(input, out, "Image path: ")? else {
                    return Ok(MenuChoice::Quit);
                };
                let output = ask(input, out, "Output file (empty for default): ")?
                    .filter(|s| !s.is_empty());
                return Ok(MenuChoice::SingleImage {
                    input: path,
                    output,
                });
            },
            "2" => {
                let Some(path) = ask_required(input, out, "Directory path: ")? else {
                    return Ok(MenuChoice::Quit);
                };
                let output = ask(input, out, "Output directory (empty for ./processed): ")?
                    .filter(|s| !s.is_empty());
                return Ok(MenuChoice::Directory {
                    input: path,
                    output,
                });
            },
            "3" | "q" | "quit" => return Ok(MenuChoice::Quit),
            other => writeln!(out, "Invalid option '{other}'\n")?,
        }
    }
}

/// One trimmed line, `None` at end of input
fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, question: &str) -> Result<Option<String>> {
    write!(out, "{question}")?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn ask_required<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    question: &str,
) -> Result<Option<String>> {
    loop {
        match ask(input, out, question)? {
            Some(answer) if answer.is_empty() => writeln!(out, "A path is required")?,
            other => return Ok(other),
        }
    }
}

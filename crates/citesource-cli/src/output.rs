use std::io::Write;

use citesource_core::matching::strip_latex;
use citesource_core::{PaperMetadata, Reference, Resolution, RunLog};
use citesource_ingest::{ResolveError, ResolveOutcome};
use owo_colors::OwoColorize;
use serde::Serialize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// JSON form of one `resolve` run.
#[derive(Serialize)]
struct ResolveRecord<'a> {
    paper_id: &'a str,
    from_cache: bool,
    resolution: &'a Resolution,
    log: &'a RunLog,
}

pub fn print_json(w: &mut dyn Write, paper_id: &str, outcome: &ResolveOutcome) -> std::io::Result<()> {
    let record = ResolveRecord {
        paper_id,
        from_cache: outcome.from_cache,
        resolution: &outcome.resolution,
        log: &outcome.log,
    };
    serde_json::to_writer_pretty(&mut *w, &record)?;
    writeln!(w)?;
    Ok(())
}

/// JSON form of a run that stopped on a fault.
#[derive(Serialize)]
struct ErrorRecord<'a> {
    paper_id: &'a str,
    error: String,
    log: &'a RunLog,
}

pub fn print_error_json(w: &mut dyn Write, paper_id: &str, err: &ResolveError) -> std::io::Result<()> {
    let record = ErrorRecord {
        paper_id,
        error: err.to_string(),
        log: &err.log,
    };
    serde_json::to_writer_pretty(&mut *w, &record)?;
    writeln!(w)?;
    Ok(())
}

/// Print the reference list, or the failure message.
pub fn print_resolution(
    w: &mut dyn Write,
    paper_id: &str,
    outcome: &ResolveOutcome,
    color: ColorMode,
) -> std::io::Result<()> {
    let heading = format!("References cited by {}", paper_id);
    if color.enabled() {
        writeln!(w, "{}", heading.bold())?;
    } else {
        writeln!(w, "{}", heading)?;
    }
    if outcome.from_cache {
        if color.enabled() {
            writeln!(w, "{}", "(from cache)".dimmed())?;
        } else {
            writeln!(w, "(from cache)")?;
        }
    }
    writeln!(w)?;

    let references = match &outcome.resolution {
        Resolution::Resolved(references) => references,
        Resolution::Failed(failure) => {
            if color.enabled() {
                writeln!(w, "{} {}", "Failed:".red().bold(), failure)?;
            } else {
                writeln!(w, "Failed: {}", failure)?;
            }
            return Ok(());
        }
    };

    for reference in references {
        print_reference(w, reference, color)?;
    }
    print_summary(w, references, color)
}

fn print_reference(w: &mut dyn Write, reference: &Reference, color: ColorMode) -> std::io::Result<()> {
    let title = reference
        .title()
        .map(strip_latex)
        .unwrap_or_else(|| "(untitled)".to_string());
    if color.enabled() {
        writeln!(
            w,
            "[{}] {} {}",
            reference.index,
            title.bold(),
            format!("({})", reference.key).dimmed()
        )?;
    } else {
        writeln!(w, "[{}] {} ({})", reference.index, title, reference.key)?;
    }

    if let Some(author) = reference.author() {
        let authors = truncate(&strip_latex(author), 100);
        if color.enabled() {
            writeln!(w, "    {}", authors.dimmed())?;
        } else {
            writeln!(w, "    {}", authors)?;
        }
    }

    match &reference.arxiv_id {
        Some(id) => {
            let mut line = format!("arXiv:{}", id);
            if let Some(date) = reference.published {
                line.push_str(&format!(" ({})", date.format("%B %Y")));
            }
            if color.enabled() {
                writeln!(w, "    {}", line.green())?;
            } else {
                writeln!(w, "    {}", line)?;
            }
        }
        None => {
            if let Some(url) = reference.url() {
                writeln!(w, "    {}", url)?;
            }
        }
    }
    Ok(())
}

fn print_summary(w: &mut dyn Write, references: &[Reference], color: ColorMode) -> std::io::Result<()> {
    let with_ids = references.iter().filter(|r| r.arxiv_id.is_some()).count();
    writeln!(w)?;
    let msg = format!(
        "{} cited references, {} with arXiv identifiers",
        references.len(),
        with_ids
    );
    if color.enabled() {
        writeln!(w, "{}", msg.bold())?;
    } else {
        writeln!(w, "{}", msg)?;
    }
    Ok(())
}

pub fn print_metadata(w: &mut dyn Write, metadata: &PaperMetadata, color: ColorMode) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {}", format!("[{}]", metadata.id).dimmed(), metadata.title.bold())?;
    } else {
        writeln!(w, "[{}] {}", metadata.id, metadata.title)?;
    }
    writeln!(w)?;
    writeln!(w, "{}", metadata.abstract_text)?;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

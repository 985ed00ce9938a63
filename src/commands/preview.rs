use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::PreviewArgs;
use crate::normalize::{ChartRow, chart_rows, normalize};
use crate::source::read_rows;

#[derive(Debug, Serialize)]
struct PreviewResponse {
    source: String,
    variant: &'static str,
    rows_read: usize,
    rows_kept: usize,
    rows_dropped: usize,
    returned: usize,
    rows: Vec<ChartRow>,
}

pub fn run(args: PreviewArgs) -> Result<()> {
    let rows = read_rows(&args.csv)?;
    let normalized = normalize(&rows, args.variant.columns());

    let mut chart = chart_rows(&normalized.documents);
    chart.truncate(args.limit);

    info!(
        csv = %args.csv.display(),
        rows = rows.len(),
        kept = normalized.documents.len(),
        dropped = normalized.rejected.len(),
        "normalized preview"
    );

    let response = PreviewResponse {
        source: args.csv.display().to_string(),
        variant: args.variant.as_str(),
        rows_read: rows.len(),
        rows_kept: normalized.documents.len(),
        rows_dropped: normalized.rejected.len(),
        returned: chart.len(),
        rows: chart,
    };

    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &response)
        .context("failed to serialize preview json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

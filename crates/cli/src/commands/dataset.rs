//! Offline dataset commands

use anyhow::{Context, Result};
use coach_lib::dataset::preprocess::{
    load_records, preprocess_record, save_records, stats, PreprocessOptions, DEFAULT_EMA_ALPHA,
};
use colored::Colorize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{print_json, print_success, print_warning, OutputFormat};

/// Row for the label counts table
#[derive(Tabled)]
struct LabelRow {
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Positives")]
    positives: usize,
    #[tabled(rename = "Share")]
    share: String,
}

/// Center, scale and optionally smooth every record of a sequences file
pub fn preprocess(
    input: &Path,
    output: &Path,
    ema_alpha: Option<f32>,
    no_smooth: bool,
    format: OutputFormat,
) -> Result<()> {
    let alpha = ema_alpha.unwrap_or(DEFAULT_EMA_ALPHA);
    anyhow::ensure!(
        alpha > 0.0 && alpha <= 1.0,
        "--ema-alpha must be in (0, 1], got {}",
        alpha
    );
    let options = PreprocessOptions {
        ema_alpha: (!no_smooth).then_some(alpha),
    };

    let records = load_records(input)?;
    let processed: Vec<_> = records
        .iter()
        .map(|record| preprocess_record(record, options))
        .collect();
    save_records(output, &processed)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "input": input,
            "output": output,
            "records": processed.len(),
            "ema_alpha": options.ema_alpha,
        }));
    }

    if processed.is_empty() {
        print_warning("No records found in input");
    }
    print_success(&format!(
        "Preprocessed {} records into {}",
        processed.len(),
        output.display()
    ));
    Ok(())
}

/// Summarize a sequences file
pub fn show_stats(input: &Path, format: OutputFormat) -> Result<()> {
    let records = load_records(input)?;
    let summary = stats(&records);

    if format == OutputFormat::Json {
        return print_json(&summary);
    }

    println!("{}", "Dataset Statistics".bold());
    println!("{}", "=".repeat(40));
    println!("Records:         {}", summary.records);
    println!("Mean seq length: {:.1}", summary.mean_seq_len);
    println!();

    if summary.records == 0 {
        print_warning("Dataset is empty");
        return Ok(());
    }

    let rows: Vec<LabelRow> = summary
        .positives
        .iter()
        .map(|(label, count)| LabelRow {
            label: label.clone(),
            positives: *count,
            share: format!("{:.0}%", *count as f64 * 100.0 / summary.records as f64),
        })
        .collect();

    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);
    Ok(())
}

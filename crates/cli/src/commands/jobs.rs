//! Job submission, status and cancellation commands

use anyhow::{Context, Result};
use coach_lib::health::HealthResponse;
use colored::Colorize;
use std::path::Path;
use tabled::Tabled;

use crate::client::{
    ApiClient, CancelResponse, JobReport, StatusResponse, SubmitResponse, SubmitVideoRequest,
    UploadQuery,
};
use crate::output::{
    color_status, format_angle, format_bytes, print_info, print_json, print_success,
    print_warning, OutputFormat,
};

/// Row for the health components table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Guess a video MIME type from the file extension
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("webm") => "video/webm",
        _ => "video/mp4",
    }
}

/// Submit a video already stored in the service's upload directory
pub async fn submit(
    client: &ApiClient,
    user: i64,
    video: &Path,
    duration_secs: u64,
    caption: Option<String>,
    wait: bool,
    format: OutputFormat,
) -> Result<()> {
    let request = SubmitVideoRequest {
        video_path: video.display().to_string(),
        duration_secs,
        mime_type: mime_for_path(video).to_string(),
        caption,
        wait,
    };
    let response: SubmitResponse = client
        .post(&format!("v1/users/{}/videos", user), &request)
        .await?;

    print_submit_response(&response, format)
}

/// Upload a local video file for analysis
pub async fn upload(
    client: &ApiClient,
    user: i64,
    file: &Path,
    duration_secs: u64,
    caption: Option<String>,
    wait: bool,
    format: OutputFormat,
) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if format == OutputFormat::Table {
        print_info(&format!(
            "Uploading {} ({})",
            file.display(),
            format_bytes(bytes.len() as u64)
        ));
    }

    let query = UploadQuery {
        duration_secs,
        caption,
        wait,
    };
    let response: SubmitResponse = client
        .post_bytes(
            &format!("v1/users/{}/uploads", user),
            &query,
            mime_for_path(file),
            bytes,
        )
        .await?;

    print_submit_response(&response, format)
}

fn print_submit_response(response: &SubmitResponse, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(response);
    }

    match response {
        SubmitResponse::Ticket(ticket) => {
            print_success(&ticket.message);
            println!("Job:       {}", ticket.job_id.cyan());
            println!("Remaining: {} submissions in this window", ticket.remaining);
        }
        SubmitResponse::Report(report) => print_report(report),
    }
    Ok(())
}

fn print_report(report: &JobReport) {
    println!("{}", "Analysis Report".bold());
    println!("{}", "=".repeat(50));
    println!("Job:      {}", report.job_id.cyan());
    println!("Status:   {}", color_status(&report.status));
    println!("Message:  {}", report.message);

    if let Some(summary) = &report.summary {
        println!(
            "Frames:   {} analyzed of {} extracted",
            summary.processed_count, summary.frames_count
        );
        match &summary.min_angle {
            Some(min) => println!(
                "Minimum:  {} {} (frame {})",
                min.angle,
                format_angle(min.value).bold(),
                min.frame.index
            ),
            None => println!("Minimum:  n/a"),
        }
        if let Some(annotated) = &summary.annotated_frame {
            println!("Overlay:  {}", annotated);
        }
    }

    if let Some(dataset) = &report.dataset {
        let detail = dataset
            .raw
            .as_deref()
            .or(dataset.error.as_deref())
            .map(|d| format!(" ({})", d))
            .unwrap_or_default();
        println!("Dataset:  {}{}", color_status(&dataset.result), detail);
    }
}

/// Show the user's active job and remaining quota
pub async fn status(client: &ApiClient, user: i64, format: OutputFormat) -> Result<()> {
    let result: StatusResponse = client.get(&format!("v1/users/{}/job", user)).await?;

    if format == OutputFormat::Json {
        return print_json(&result);
    }

    match &result.job {
        Some(job) => {
            println!("Job:       {}", job.job_id.to_string().cyan());
            println!("Status:    {}", color_status(&format!("{:?}", job.status)));
            println!("Started:   {}", job.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            if job.cancel_requested {
                print_warning("Cancellation requested");
            }
        }
        None => print_info(&format!("No active job for user {}", user)),
    }
    println!("Remaining: {} submissions in this window", result.remaining);
    Ok(())
}

/// Cancel the user's active job
pub async fn cancel(client: &ApiClient, user: i64, format: OutputFormat) -> Result<()> {
    let result: CancelResponse = client.delete(&format!("v1/users/{}/job", user)).await?;

    if format == OutputFormat::Json {
        return print_json(&result);
    }
    print_success(&result.message);
    Ok(())
}

/// Show service health by component
pub async fn health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (code, health): (_, HealthResponse) = client.get_with_status("healthz").await?;

    if format == OutputFormat::Json {
        return print_json(&health);
    }

    println!(
        "Service: {} (HTTP {})",
        color_status(health.status.as_str()),
        code.as_u16()
    );

    let mut rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(component.status.as_str()),
            message: component.message.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));

    if rows.is_empty() {
        print_warning("No components registered");
        return Ok(());
    }

    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("squat.MOV")), "video/quicktime");
        assert_eq!(mime_for_path(Path::new("a/b/clip.webm")), "video/webm");
        assert_eq!(mime_for_path(Path::new("clip.mpg")), "video/mpeg");
        assert_eq!(mime_for_path(Path::new("noext")), "video/mp4");
    }
}

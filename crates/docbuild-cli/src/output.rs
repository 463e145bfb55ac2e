//! Plain text tables.

use chrono::DateTime;
use docbuild_core::protocol::StatusResponse;

/// Left-aligned columns separated by two spaces.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(headers.to_vec())];
    out.extend(rows.iter().map(|row| line(row.iter().map(String::as_str).collect())));
    out.join("\n")
}

pub fn timestamp(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn status(status: &StatusResponse) -> String {
    let rows: Vec<Vec<String>> = status
        .jobs
        .iter()
        .map(|job| {
            vec![
                job.id.to_string(),
                job.project.clone(),
                job.dc_file.clone(),
                job.branch.clone(),
                job.commit.chars().take(7).collect(),
                job.status.to_string(),
                timestamp(job.time_created),
                job.time_started.map(timestamp).unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    let mut out = format!(
        "Running builds: {}\nScheduled builds: {}",
        status.running_builds, status.scheduled_builds
    );
    if !rows.is_empty() {
        out.push_str("\n\n");
        out.push_str(&table(
            &["ID", "PROJECT", "DC FILE", "BRANCH", "COMMIT", "STATUS", "CREATED", "STARTED"],
            &rows,
        ));
    }
    out
}

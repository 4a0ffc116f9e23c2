use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Run discriminator derived from the instant a run started.
pub fn run_id_at(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

/// One audit file per cycle, partitioned by run so reruns never overwrite.
pub fn audit_object_key(base_prefix: &str, job: &str, run_id: &str, cycle: usize) -> String {
    let trimmed = base_prefix.trim_matches('/');
    if trimmed.is_empty() {
        format!("{job}/run={run_id}/cycle={cycle:04}.json")
    } else {
        format!("{trimmed}/{job}/run={run_id}/cycle={cycle:04}.json")
    }
}

pub fn fetch_page_key(base_prefix: &str, source: &str, page_index: usize) -> String {
    let trimmed = base_prefix.trim_matches('/');
    if trimmed.is_empty() {
        format!("{source}/page-{page_index:05}.json")
    } else {
        format!("{trimmed}/{source}/page-{page_index:05}.json")
    }
}

pub fn date_partition_key(target_prefix: &str, date: NaiveDate, file_name: &str) -> String {
    format!(
        "{}/year={}/month={:02}/day={:02}/{file_name}",
        target_prefix.trim_end_matches('/'),
        date.year(),
        date.month(),
        date.day(),
    )
}

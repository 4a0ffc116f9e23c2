//! Date partitioning of flat object prefixes.
//!
//! Objects whose file name carries a date are moved under
//! `{target}/year=YYYY/month=MM/day=DD/`. Moves are copy then delete, and a
//! target that already exists is left alone so reruns are harmless.

use std::fmt::Write as _;

use chrono::NaiveDate;

use crate::error::{SyncError, SyncStage};
use crate::listing::{ObjectStore, ObjectStoreLister};
use crate::storage_keys::date_partition_key;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub source_key: String,
    pub target_key: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocationPlan {
    pub moves: Vec<Relocation>,
    /// Targets that already exist.
    pub already_present: Vec<String>,
    /// Objects with no recognizable date in their file name.
    pub undated: Vec<String>,
}

impl RelocationPlan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocationSummary {
    pub moved: usize,
    pub skipped: usize,
}

/// First date in `file_name` matching `format`, scanning left to right.
pub fn find_date(file_name: &str, format: &str) -> Option<NaiveDate> {
    let width = date_width(format).ok()?;
    (0..file_name.len())
        .filter_map(|start| file_name.get(start..start + width))
        .find_map(|window| NaiveDate::parse_from_str(window, format).ok())
}

fn date_width(format: &str) -> Result<usize, SyncError> {
    let sample = NaiveDate::from_ymd_opt(2000, 12, 31)
        .ok_or_else(|| SyncError::configuration("invalid sample date"))?;
    let mut rendered = String::new();
    write!(rendered, "{}", sample.format(format))
        .map_err(|_| SyncError::configuration(format!("invalid date format `{format}`")))?;
    if rendered.is_empty() {
        return Err(SyncError::configuration("date format must not be empty"));
    }
    Ok(rendered.len())
}

pub fn plan_relocations(
    store: &dyn ObjectStore,
    bucket: &str,
    source_prefix: &str,
    target_prefix: &str,
    date_format: &str,
) -> Result<RelocationPlan, SyncError> {
    date_width(date_format)?;
    let objects = ObjectStoreLister::new(store)
        .list(bucket, source_prefix)
        .map_err(|error| match error {
            SyncError::StoreUnavailable { message, .. } => SyncError::StoreUnavailable {
                stage: SyncStage::Relocation,
                message,
            },
            other => other,
        })?;

    let mut plan = RelocationPlan::default();
    for object in objects {
        let file_name = object.key.rsplit('/').next().unwrap_or(&object.key);
        let Some(date) = find_date(file_name, date_format) else {
            plan.undated.push(object.key);
            continue;
        };
        let target_key = date_partition_key(target_prefix, date, file_name);
        if target_key == object.key {
            plan.already_present.push(target_key);
            continue;
        }
        let exists = store
            .head(bucket, &target_key)
            .map_err(|message| SyncError::StoreUnavailable {
                stage: SyncStage::Relocation,
                message: format!("{bucket}/{target_key}: {message}"),
            })?;
        if exists {
            plan.already_present.push(target_key);
        } else {
            plan.moves.push(Relocation {
                source_key: object.key,
                target_key,
                date,
            });
        }
    }

    tracing::info!(
        component = "relocator",
        event = "plan_ready",
        bucket,
        source_prefix,
        moves = plan.moves.len(),
        already_present = plan.already_present.len(),
        undated = plan.undated.len()
    );
    Ok(plan)
}

pub fn execute_relocations(
    store: &dyn ObjectStore,
    bucket: &str,
    plan: &RelocationPlan,
    dry_run: bool,
) -> Result<RelocationSummary, SyncError> {
    let mut summary = RelocationSummary {
        moved: 0,
        skipped: plan.already_present.len() + plan.undated.len(),
    };
    for relocation in &plan.moves {
        if dry_run {
            tracing::info!(
                component = "relocator",
                event = "dry_run_move",
                source = relocation.source_key.as_str(),
                target = relocation.target_key.as_str()
            );
            summary.skipped += 1;
            continue;
        }

        let failed = |message: String| SyncError::StoreUnavailable {
            stage: SyncStage::Relocation,
            message: format!("{} -> {}: {message}", relocation.source_key, relocation.target_key),
        };
        store
            .copy(bucket, &relocation.source_key, &relocation.target_key)
            .map_err(failed)?;
        store
            .delete(bucket, &relocation.source_key)
            .map_err(failed)?;
        summary.moved += 1;
        tracing::debug!(
            component = "relocator",
            event = "moved",
            source = relocation.source_key.as_str(),
            target = relocation.target_key.as_str()
        );
    }
    Ok(summary)
}

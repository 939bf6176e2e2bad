//! Three-way property merge.

use crate::admin::AdminArea;
use crate::changelog::{Command, TimestampValue};
use crate::entries::fields;
use crate::error::WcResult;
use crate::props::{self, PropDiff};
use crate::types::MergeOutcome;
use std::collections::BTreeMap;
use tracing::debug;

/// Name of the rejected-property-changes file for a directory.
const DIR_PREJ_FILE: &str = "dir-conflicts.prej";

/// Merges an incoming property diff into the working properties of
/// `name` (the directory's own when empty).
///
/// Per property: a working value already equal to the incoming one needs
/// nothing; an unmodified working value takes the incoming one cleanly;
/// anything else is a conflict, recorded in a `.prej` file beside the
/// target unless `dry_run`. Non-conflicting changes still apply when
/// others conflict.
pub fn merge_props(
    area: &mut AdminArea,
    name: &str,
    diff: &PropDiff,
    dry_run: bool,
) -> WcResult<MergeOutcome> {
    if diff.is_empty() {
        return Ok(MergeOutcome::Unchanged);
    }
    let working = area.props(name)?;
    let base = area.base_props(name)?;
    let had_local_mods = working != base;

    let mut merged = working.clone();
    let mut conflicts: Vec<String> = Vec::new();
    let mut applied = 0usize;

    for (prop, incoming) in diff {
        let working_value = working.get(prop);
        let base_value = base.get(prop);
        match incoming {
            Some(new_value) => {
                if working_value == Some(new_value) {
                    continue;
                }
                if working_value == base_value {
                    merged.insert(prop.clone(), new_value.clone());
                    applied += 1;
                } else {
                    conflicts.push(format!(
                        "Trying to change property '{prop}' from '{}' to '{new_value}', \
                         but it has been locally changed to '{}'.",
                        base_value.map(String::as_str).unwrap_or("<absent>"),
                        working_value.map(String::as_str).unwrap_or("<deleted>"),
                    ));
                }
            }
            None => {
                if working_value.is_none() {
                    continue;
                }
                if working_value == base_value {
                    merged.remove(prop);
                    applied += 1;
                } else {
                    conflicts.push(format!(
                        "Trying to delete property '{prop}', but it has been \
                         locally changed to '{}'.",
                        working_value.map(String::as_str).unwrap_or("<deleted>"),
                    ));
                }
            }
        }
    }

    let outcome = if !conflicts.is_empty() {
        MergeOutcome::Conflicted
    } else if applied > 0 {
        if had_local_mods {
            MergeOutcome::Merged
        } else {
            MergeOutcome::Changed
        }
    } else {
        MergeOutcome::Unchanged
    };
    debug!(name, ?outcome, applied, conflicts = conflicts.len(), "merged properties");

    if dry_run || (applied == 0 && conflicts.is_empty()) {
        return Ok(outcome);
    }

    let mut log = area.log()?;
    let root = area.root().to_path_buf();
    let rel = |p: &std::path::Path| {
        p.strip_prefix(&root)
            .unwrap_or(p)
            .to_string_lossy()
            .into_owned()
    };

    if applied > 0 {
        let tmp = area.tmp_file("props")?;
        props::write_props(&tmp, &merged)?;
        log.add_command(Command::Move {
            src: rel(&tmp),
            dst: rel(&area.prop_path(name)),
        });
        log.add_command(Command::ModifyEntry {
            name: name.to_string(),
            fields: BTreeMap::from([(
                fields::PROP_TIME.to_string(),
                fields::WORKING_TIME.to_string(),
            )]),
        });
    }
    if !conflicts.is_empty() {
        let tmp = area.tmp_file("prej")?;
        let mut text = conflicts.join("\n");
        text.push('\n');
        std::fs::write(&tmp, text)?;
        let prej = if name.is_empty() {
            DIR_PREJ_FILE.to_string()
        } else {
            format!("{name}.prej")
        };
        log.add_command(Command::Move {
            src: rel(&tmp),
            dst: prej,
        });
    }
    log.save()?;
    area.run_logs()?;
    Ok(outcome)
}

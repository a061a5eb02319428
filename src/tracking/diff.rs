//! Minimal diffs between successive fetch results.
//!
//! An edit matrix over the old and new row sequences (insertions and
//! deletions only, using raw row equality) yields a minimal script; a
//! standardize pass then fuses insertion/deletion pairs that refer to the
//! same record identity into moves and updates, each carrying the old values
//! of the columns that changed.

use std::collections::HashMap;

use crate::row::Row;
use crate::value::Value;

/// One change turning the old item list into the new one.
///
/// Indices refer to the old list for deletions and move origins, to the new
/// list for insertions, move targets and updates.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Inserted {
        new_index: usize,
    },
    Deleted {
        old_index: usize,
    },
    Moved {
        old_index: usize,
        new_index: usize,
        /// Old values of the columns whose value changed.
        changes: HashMap<String, Value>,
    },
    Updated {
        old_index: usize,
        new_index: usize,
        /// Old values of the columns whose value changed.
        changes: HashMap<String, Value>,
    },
}

/// Compute the standardized change script from `old` to `new`.
///
/// `same_record` is the identity comparator: it decides whether a deleted row
/// and an inserted row refer to the same entity and should fuse into a move
/// or an update. Updates are emitted after every insertion, deletion and
/// move.
pub fn row_changes(
    old: &[Row],
    new: &[Row],
    same_record: &dyn Fn(&Row, &Row) -> bool,
) -> Vec<RowChange> {
    let script = edit_script(old, new);
    standardize(old, new, script, same_record)
}

enum EditStep {
    Insert { new_index: usize },
    Delete { old_index: usize },
}

/// Minimal insertion/deletion script via the classic edit matrix.
fn edit_script(old: &[Row], new: &[Row]) -> Vec<EditStep> {
    let m = old.len();
    let n = new.len();
    let mut d = vec![vec![0usize; n + 1]; m + 1];
    for (i, row) in d.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=n {
        d[0][j] = j;
    }
    for i in 1..=m {
        for j in 1..=n {
            d[i][j] = if old[i - 1] == new[j - 1] {
                d[i - 1][j - 1]
            } else {
                1 + d[i - 1][j].min(d[i][j - 1])
            };
        }
    }

    // Backtrack; steps come out right-to-left and are reversed at the end.
    let mut steps = Vec::with_capacity(d[m][n]);
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old[i - 1] == new[j - 1] && d[i][j] == d[i - 1][j - 1] {
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || d[i][j] == d[i][j - 1] + 1) {
            j -= 1;
            steps.push(EditStep::Insert { new_index: j });
        } else {
            i -= 1;
            steps.push(EditStep::Delete { old_index: i });
        }
    }
    steps.reverse();
    steps
}

/// Fuse same-identity insertion/deletion pairs; order updates last.
fn standardize(
    old: &[Row],
    new: &[Row],
    script: Vec<EditStep>,
    same_record: &dyn Fn(&Row, &Row) -> bool,
) -> Vec<RowChange> {
    let mut merged: Vec<RowChange> = Vec::with_capacity(script.len());

    for step in script {
        match step {
            EditStep::Delete { old_index } => {
                let fused = merged.iter().position(|change| {
                    matches!(change, RowChange::Inserted { new_index }
                        if same_record(&old[old_index], &new[*new_index]))
                });
                match fused {
                    Some(position) => {
                        let RowChange::Inserted { new_index } = merged.remove(position) else {
                            unreachable!("position found by matching Inserted");
                        };
                        merged.push(fuse(old, new, old_index, new_index));
                    }
                    None => merged.push(RowChange::Deleted { old_index }),
                }
            }
            EditStep::Insert { new_index } => {
                let fused = merged.iter().position(|change| {
                    matches!(change, RowChange::Deleted { old_index }
                        if same_record(&old[*old_index], &new[new_index]))
                });
                match fused {
                    Some(position) => {
                        let RowChange::Deleted { old_index } = merged.remove(position) else {
                            unreachable!("position found by matching Deleted");
                        };
                        merged.push(fuse(old, new, old_index, new_index));
                    }
                    None => merged.push(RowChange::Inserted { new_index }),
                }
            }
        }
    }

    // Updates are delivered after all insertions, deletions and moves.
    let (updates, mut ordered): (Vec<RowChange>, Vec<RowChange>) = merged
        .into_iter()
        .partition(|change| matches!(change, RowChange::Updated { .. }));
    ordered.extend(updates);
    ordered
}

fn fuse(old: &[Row], new: &[Row], old_index: usize, new_index: usize) -> RowChange {
    let changes = changed_columns(&old[old_index], &new[new_index]);
    if old_index == new_index {
        RowChange::Updated {
            old_index,
            new_index,
            changes,
        }
    } else {
        RowChange::Moved {
            old_index,
            new_index,
            changes,
        }
    }
}

/// Old values of the columns whose value differs between the two rows.
fn changed_columns(old: &Row, new: &Row) -> HashMap<String, Value> {
    let mut changes = HashMap::new();
    for (name, old_value) in old.iter() {
        if new.value(name) != Some(old_value) {
            changes.insert(name.to_owned(), old_value.clone());
        }
    }
    changes
}

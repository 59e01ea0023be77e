//! Collection import
//!
//! Children of an extracted archive are discovered with a walk that stops at
//! directories matching a known (multi-file) format, then imported as
//! independent tasks. Child failures are isolated: a child whose task cannot
//! be built is dropped, a child whose import fails is logged, and neither
//! affects its siblings.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::context::ImportContext;
use crate::dispatch::{self, DispatchError, TaskOutcome};
use crate::events::{ImportEvent, Listeners};
use crate::files;
use crate::listeners::{ProjectError, ProjectListener};
use crate::tasks::ImportTask;

/// Import every child of `collection`, returning the upload paths of the
/// children that were imported.
pub fn import_collection(
    ctx: &ImportContext,
    listeners: &Listeners,
    collection: &Path,
    parent_upload: &Path,
    prefer_copy: bool,
) -> Vec<PathBuf> {
    let formats = ctx.formats();
    let project = listeners.project();

    let mut tasks = Vec::new();
    let is_image_dir = |dir: &Path| formats.match_importable(dir).is_some();
    for child in files::extracted_children(collection, is_image_dir) {
        listeners.notify(&ImportEvent::RegisterFile {
            path: child.clone(),
            parent: parent_upload.to_path_buf(),
        });
        match build_task(&child, project, prefer_copy) {
            Ok(task) => tasks.push(task),
            Err(e) => warn!("Dropping {} from collection: {}", child.display(), e),
        }
    }

    info!(
        "Importing {} child(ren) of {}",
        tasks.len(),
        parent_upload.display()
    );
    let outcomes = run_batch(ctx, &tasks);

    let mut imported = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(paths) => imported.extend(paths),
            Err(e) => {
                let child = tasks.get(outcome.index).map(|t| t.args.path.display().to_string());
                warn!(
                    task = outcome.task,
                    "Child {} failed: {}",
                    child.unwrap_or_default(),
                    e
                );
            }
        }
    }
    imported
}

fn build_task(
    child: &Path,
    project: Option<&ProjectListener>,
    prefer_copy: bool,
) -> Result<ImportTask, ProjectError> {
    let name = child
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match project {
        Some(project) => {
            let listener = project.new_listener_from_registered_child(child)?;
            Ok(ImportTask::import_with_project(child, name, listener, prefer_copy))
        }
        None => Ok(ImportTask::import(child, name, prefer_copy)),
    }
}

/// Run the batch in-process when the task queue is disabled, otherwise on the
/// configured dispatcher. A failing dispatcher falls back to in-process
/// execution of every task it did not complete.
fn run_batch(ctx: &ImportContext, tasks: &[ImportTask]) -> Vec<TaskOutcome> {
    if !ctx.config().task_queue_enabled {
        return dispatch::run_sequential(ctx, tasks, 0..tasks.len());
    }

    match ctx.dispatcher().run_batch(ctx, tasks) {
        Ok(outcomes) => outcomes,
        Err(DispatchError::Submit(reason)) => {
            warn!("Task submission failed ({}), importing sequentially", reason);
            dispatch::run_sequential(ctx, tasks, 0..tasks.len())
        }
        Err(DispatchError::Join {
            completed, reason, ..
        }) => {
            warn!(
                "Task join failed after {} task(s) ({}), importing the rest sequentially",
                completed.len(),
                reason
            );
            let done: HashSet<usize> = completed.iter().map(|o| o.index).collect();
            let remaining = (0..tasks.len()).filter(|i| !done.contains(i));

            let mut outcomes = completed;
            outcomes.extend(dispatch::run_sequential(ctx, tasks, remaining));
            outcomes.sort_by_key(|o| o.index);
            outcomes
        }
    }
}

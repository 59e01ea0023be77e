//! Named import tasks
//!
//! A task is a task kind plus its arguments. The kind maps to the handler
//! that runs it, so a batch can be described by names and executed by any
//! [`TaskDispatcher`](crate::dispatch::TaskDispatcher).

use std::path::{Path, PathBuf};

use crate::context::ImportContext;
use crate::error::Result;
use crate::events::{ImportListener, Listeners};
use crate::importer::FileImporter;
use crate::listeners::{LogListener, ProjectListener};
use crate::metrics::MetricsListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Import,
    ImportWithProject,
}

pub type TaskHandler = fn(&ImportContext, &TaskArgs) -> Result<Vec<PathBuf>>;

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Import => "import",
            TaskKind::ImportWithProject => "import_with_project",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "import" => Some(TaskKind::Import),
            "import_with_project" => Some(TaskKind::ImportWithProject),
            _ => None,
        }
    }

    pub fn handler(&self) -> TaskHandler {
        match self {
            TaskKind::Import => import_task,
            TaskKind::ImportWithProject => import_with_project_task,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskArgs {
    pub path: PathBuf,
    pub name: String,
    pub prefer_copy: bool,
    pub project: Option<ProjectListener>,
}

/// One deferred import of a collection child.
#[derive(Debug, Clone)]
pub struct ImportTask {
    pub kind: TaskKind,
    pub args: TaskArgs,
}

impl ImportTask {
    pub fn import(path: impl Into<PathBuf>, name: impl Into<String>, prefer_copy: bool) -> Self {
        Self {
            kind: TaskKind::Import,
            args: TaskArgs {
                path: path.into(),
                name: name.into(),
                prefer_copy,
                project: None,
            },
        }
    }

    pub fn import_with_project(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        project: ProjectListener,
        prefer_copy: bool,
    ) -> Self {
        Self {
            kind: TaskKind::ImportWithProject,
            args: TaskArgs {
                path: path.into(),
                name: name.into(),
                prefer_copy,
                project: Some(project),
            },
        }
    }

    pub fn run(&self, ctx: &ImportContext) -> Result<Vec<PathBuf>> {
        (self.kind.handler())(ctx, &self.args)
    }
}

fn import_task(ctx: &ImportContext, args: &TaskArgs) -> Result<Vec<PathBuf>> {
    run_import(ctx, &args.path, &args.name, Vec::new(), args.prefer_copy)
}

fn import_with_project_task(ctx: &ImportContext, args: &TaskArgs) -> Result<Vec<PathBuf>> {
    let extra: Vec<Box<dyn ImportListener>> = args
        .project
        .iter()
        .cloned()
        .map(|project| Box::new(project) as Box<dyn ImportListener>)
        .collect();
    run_import(ctx, &args.path, &args.name, extra, args.prefer_copy)
}

/// Import `path` with a log listener named `name`, a metrics listener and
/// `extra` listeners, in that order.
pub fn run_import(
    ctx: &ImportContext,
    path: &Path,
    name: &str,
    extra: Vec<Box<dyn ImportListener>>,
    prefer_copy: bool,
) -> Result<Vec<PathBuf>> {
    let mut listeners = Listeners::new()
        .with(LogListener::new(name))
        .with(MetricsListener::new(ctx.metrics().clone()));
    for listener in extra {
        listeners.push(listener);
    }

    FileImporter::new(ctx, path, Some(name.to_string()), listeners).run(prefer_copy)
}

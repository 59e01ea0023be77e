//! soma_import - image import pipeline for the SOMA image store
//!
//! Takes uploaded files (single images, multi-file images, archives of many
//! images) from a pending area into the managed store, where each image gets
//! role-tagged representations: `original`, `spatial` (region readable,
//! converted when needed) and `histogram`.
//!
//! Every phase of an import is observable through [`ImportListener`]s.
//! Collection children are imported as independent tasks, in-process or on a
//! worker pool.

pub mod archive;
pub mod collection;
pub mod config;
pub mod context;
pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod files;
pub mod formats;
pub mod histogram;
pub mod image;
pub mod importer;
pub mod keys;
pub mod listeners;
pub mod metrics;
pub mod tasks;

pub use config::{ConfigError, ImporterConfig};
pub use context::ImportContext;
pub use dispatch::{
    DispatchError, SequentialDispatcher, TaskDispatcher, TaskFailure, TaskOutcome,
    WorkerPoolDispatcher,
};
pub use error::{ErrorKind, ImportError, Result};
pub use events::{ImportEvent, ImportEventKind, ImportListener, ListenerError, Listeners};
pub use formats::{Format, FormatError, FormatRegistry, IntegrityError};
pub use histogram::HistogramType;
pub use importer::{FileImporter, ImportUnit};
pub use listeners::{EventLog, LogListener, MemoryProjectClient, ProjectClient, ProjectListener};
pub use metrics::{ImportMetrics, MetricsSnapshot};
pub use tasks::{run_import, ImportTask, TaskKind};

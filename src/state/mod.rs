//! Run state
//!
//! Tracks where a run is, what failed, and what is still pending, so that a
//! later run resumes where the last one stopped or retries only what failed.
//!
//! # Overview
//!
//! The state module provides:
//! - `Progress` - Current phase and sub-status with finished work units
//! - `FailureRecord` - Failed identifiers per API domain
//! - `AppStatus` - The persisted root document and its merge rule
//! - `StatusManager` - Atomic file persistence for `AppStatus`
//! - `TempIndex` - Crash-safe list of request ids awaiting detail loads

mod failure;
mod manager;
mod progress;
mod status;
mod temp_index;

pub use failure::FailureRecord;
pub use manager::StatusManager;
pub use progress::{
    ApiDomain, BasicDataStatus, FormDetailStatus, FormOutlineStatus, InitializingStatus, Progress,
    ProgressStatus, Stage, TerminatingStatus,
};
pub use status::{AppStatus, ErrorKind, ErrorRecord};
pub use temp_index::{GroupEntry, TempIndex};

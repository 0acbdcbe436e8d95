//! Resumable integration run
//!
//! The integrator walks a fixed sequence of stages:
//!
//! ```text
//! INITIALIZING  LOADING_CONFIG → INIT_DIRECTORIES → INIT_TOKEN → INIT_DB_CONNECTION
//!               → INIT_DB_TABLES → COMPLETED
//! BASIC_DATA    GET_USER → GET_GROUP → GET_POSITION
//! FORM_OUTLINE  GET_FORM_INFO → GET_OUTLINE
//! FORM_DETAIL   SEEK_TARGET → GET_DETAIL
//! TERMINATING   CLOSE_DB_CONNECTION → DELETE_TEMP_FILES → COMPLETED
//! ```
//!
//! Progress is persisted after each stage as the merge of the previous run's
//! status and this run's. A later run resumes at the persisted stage and
//! retries whatever the failure records name. Request ids found by the outline
//! stage are kept in a crash-safe temp index until their details are stored.
//!
//! Cancellation is cooperative: it is checked before each stage and before
//! each form or request, so the item in flight always finishes.

mod phases;
mod runner;
mod types;

pub use runner::Integrator;
pub use types::{CancelHandle, RunOutcome};

//! Progress through the run's phases
//!
//! A run moves through five top-level phases, each with its own ordered
//! sub-statuses. [`Stage`] combines the two so that a single comparison
//! orders any two points of a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Top-level phases
// ============================================================================

/// Top-level phase of a run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    #[default]
    Initializing,
    BasicData,
    FormOutline,
    FormDetail,
    Terminating,
}

impl ProgressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::BasicData => "BASIC_DATA",
            Self::FormOutline => "FORM_OUTLINE",
            Self::FormDetail => "FORM_DETAIL",
            Self::Terminating => "TERMINATING",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Sub-statuses
// ============================================================================

macro_rules! sub_status {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// All values in run order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            fn parse(text: &str) -> Option<Self> {
                match text {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

sub_status!(
    /// Sub-statuses of [`ProgressStatus::Initializing`]
    InitializingStatus {
        LoadingConfig => "LOADING_CONFIG",
        InitDirectories => "INIT_DIRECTORIES",
        InitToken => "INIT_TOKEN",
        InitDbConnection => "INIT_DB_CONNECTION",
        InitDbTables => "INIT_DB_TABLES",
        Completed => "COMPLETED",
    }
);

sub_status!(
    /// Sub-statuses of [`ProgressStatus::BasicData`]
    BasicDataStatus {
        GetUser => "GET_USER",
        GetGroup => "GET_GROUP",
        GetPosition => "GET_POSITION",
    }
);

sub_status!(
    /// Sub-statuses of [`ProgressStatus::FormOutline`]
    FormOutlineStatus {
        GetFormInfo => "GET_FORM_INFO",
        GetOutline => "GET_OUTLINE",
    }
);

sub_status!(
    /// Sub-statuses of [`ProgressStatus::FormDetail`]
    FormDetailStatus {
        SeekTarget => "SEEK_TARGET",
        GetDetail => "GET_DETAIL",
    }
);

sub_status!(
    /// Sub-statuses of [`ProgressStatus::Terminating`]
    TerminatingStatus {
        CloseDbConnection => "CLOSE_DB_CONNECTION",
        DeleteTempFiles => "DELETE_TEMP_FILES",
        Completed => "COMPLETED",
    }
);

/// A phase together with its sub-status
///
/// Variant order follows the phase order, so the derived `Ord` compares
/// phases first and sub-statuses second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Initializing(InitializingStatus),
    BasicData(BasicDataStatus),
    FormOutline(FormOutlineStatus),
    FormDetail(FormDetailStatus),
    Terminating(TerminatingStatus),
}

impl Stage {
    /// First stage of a fresh run
    pub const START: Stage = Stage::Initializing(InitializingStatus::LoadingConfig);

    /// Final stage of a run that finished
    pub const DONE: Stage = Stage::Terminating(TerminatingStatus::Completed);

    /// Every stage of a run, in order
    pub fn sequence() -> Vec<Stage> {
        let mut stages = Vec::new();
        stages.extend(InitializingStatus::ALL.iter().copied().map(Self::Initializing));
        stages.extend(BasicDataStatus::ALL.iter().copied().map(Self::BasicData));
        stages.extend(FormOutlineStatus::ALL.iter().copied().map(Self::FormOutline));
        stages.extend(FormDetailStatus::ALL.iter().copied().map(Self::FormDetail));
        stages.extend(TerminatingStatus::ALL.iter().copied().map(Self::Terminating));
        stages
    }

    /// The top-level phase
    pub fn status(self) -> ProgressStatus {
        match self {
            Self::Initializing(_) => ProgressStatus::Initializing,
            Self::BasicData(_) => ProgressStatus::BasicData,
            Self::FormOutline(_) => ProgressStatus::FormOutline,
            Self::FormDetail(_) => ProgressStatus::FormDetail,
            Self::Terminating(_) => ProgressStatus::Terminating,
        }
    }

    /// Name of the sub-status
    pub fn detail(self) -> &'static str {
        match self {
            Self::Initializing(s) => s.as_str(),
            Self::BasicData(s) => s.as_str(),
            Self::FormOutline(s) => s.as_str(),
            Self::FormDetail(s) => s.as_str(),
            Self::Terminating(s) => s.as_str(),
        }
    }

    /// Rebuild a stage from its persisted names
    pub fn from_parts(status: ProgressStatus, detail: &str) -> Option<Self> {
        match status {
            ProgressStatus::Initializing => {
                InitializingStatus::parse(detail).map(Self::Initializing)
            }
            ProgressStatus::BasicData => BasicDataStatus::parse(detail).map(Self::BasicData),
            ProgressStatus::FormOutline => FormOutlineStatus::parse(detail).map(Self::FormOutline),
            ProgressStatus::FormDetail => FormDetailStatus::parse(detail).map(Self::FormDetail),
            ProgressStatus::Terminating => TerminatingStatus::parse(detail).map(Self::Terminating),
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::START
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.status(), self.detail())
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Current stage plus the work units already finished within it
///
/// Persisted as `{"outline": <STATUS>, "detail": <SUB>, "specifics": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProgressRepr", into = "ProgressRepr")]
pub struct Progress {
    stage: Stage,
    specifics: BTreeSet<String>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress positioned at `stage` with no specifics
    pub fn at(stage: Stage) -> Self {
        Self {
            stage,
            specifics: BTreeSet::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn status(&self) -> ProgressStatus {
        self.stage.status()
    }

    /// Move to `stage`
    ///
    /// Moving forward clears the specifics; moving to the current or an
    /// earlier stage changes nothing. Returns whether the stage changed.
    pub fn advance(&mut self, stage: Stage) -> bool {
        if stage <= self.stage {
            return false;
        }
        self.stage = stage;
        self.specifics.clear();
        true
    }

    /// Whether the run is already past `stage`
    pub fn has_passed(&self, stage: Stage) -> bool {
        self.stage > stage
    }

    /// Whether `stage` has not been reached yet
    pub fn is_ahead(&self, stage: Stage) -> bool {
        self.stage < stage
    }

    /// Whether the run finished
    pub fn is_completed(&self) -> bool {
        self.stage == Stage::DONE
    }

    pub fn specifics(&self) -> &BTreeSet<String> {
        &self.specifics
    }

    pub fn has_specific(&self, item: &str) -> bool {
        self.specifics.contains(item)
    }

    /// Mark a work unit of the current stage as done
    pub fn add_specific(&mut self, item: impl Into<String>) {
        self.specifics.insert(item.into());
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stage)?;
        if !self.specifics.is_empty() {
            write!(f, " ({} done)", self.specifics.len())?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct ProgressRepr {
    outline: ProgressStatus,
    detail: String,
    #[serde(default)]
    specifics: Vec<String>,
}

impl TryFrom<ProgressRepr> for Progress {
    type Error = String;

    fn try_from(repr: ProgressRepr) -> Result<Self, Self::Error> {
        let stage = Stage::from_parts(repr.outline, &repr.detail)
            .ok_or_else(|| format!("unknown sub-status '{}' for {}", repr.detail, repr.outline))?;
        Ok(Self {
            stage,
            specifics: repr.specifics.into_iter().collect(),
        })
    }
}

impl From<Progress> for ProgressRepr {
    fn from(progress: Progress) -> Self {
        Self {
            outline: progress.stage.status(),
            detail: progress.stage.detail().to_string(),
            specifics: progress.specifics.into_iter().collect(),
        }
    }
}

// ============================================================================
// API domains
// ============================================================================

/// A named bucket of work units, scoped to one API and one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiDomain {
    Users,
    Groups,
    Positions,
    Forms,
    FormOutline,
    RequestDetail,
}

impl ApiDomain {
    pub const ALL: [ApiDomain; 6] = [
        Self::Users,
        Self::Groups,
        Self::Positions,
        Self::Forms,
        Self::FormOutline,
        Self::RequestDetail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Groups => "groups",
            Self::Positions => "positions",
            Self::Forms => "forms",
            Self::FormOutline => "form_outline",
            Self::RequestDetail => "request_detail",
        }
    }

    /// The stage whose work fills this domain
    pub fn stage(self) -> Stage {
        match self {
            Self::Users => Stage::BasicData(BasicDataStatus::GetUser),
            Self::Groups => Stage::BasicData(BasicDataStatus::GetGroup),
            Self::Positions => Stage::BasicData(BasicDataStatus::GetPosition),
            Self::Forms => Stage::FormOutline(FormOutlineStatus::GetFormInfo),
            Self::FormOutline => Stage::FormOutline(FormOutlineStatus::GetOutline),
            Self::RequestDetail => Stage::FormDetail(FormDetailStatus::GetDetail),
        }
    }
}

impl fmt::Display for ApiDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

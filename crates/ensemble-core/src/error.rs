use thiserror::Error;

/// Which reference set turned out empty for a district.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Cultivar,
    Pixel,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Cultivar => f.write_str("cultivar"),
            RecordKind::Pixel => f.write_str("pixel"),
        }
    }
}

/// Failure raised by a simulation engine implementation.
/// Carried through the orchestrator unchanged: `Display` and `source()`
/// forward to the wrapped error.
#[derive(Debug)]
pub struct EngineError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl EngineError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self(err.into())
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }

    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("unknown district {0:?}")]
    UnknownDistrict(String),

    #[error("district {district:?} has no usable {kind} records")]
    EmptySet { district: String, kind: RecordKind },

    #[error("cultivar {cultivar:?} has length of season {los}, which gives no positive fertilization interval")]
    InvalidSeasonLength { cultivar: String, los: f64 },

    #[error("date out of range for year {0}")]
    InvalidYear(i32),

    #[error("season start {month:02}-{day:02} is not a calendar date")]
    InvalidSeasonStart { month: u32, day: u32 },

    #[error("nitrogen rate must be finite and non-negative, got {0}")]
    InvalidNitrogenRate(f64),

    #[error("engine returned {got} rows for {expected} submitted treatments")]
    RowCountMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EnsembleError>;

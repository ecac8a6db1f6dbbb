use std::fmt;

/// The step of a reconstruction or sync that was running when a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    TestOrders,
    TestResults,
    TestSamples,
    MirrorPregnancies,
    SourcePregnancies,
    InsertPregnancies,
    SourcePatients,
    MirrorPatients,
    InsertPatients,
    Screenings,
    Patients,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::TestOrders => "test orders",
            Phase::TestResults => "test results",
            Phase::TestSamples => "test samples",
            Phase::MirrorPregnancies => "mirror pregnancies",
            Phase::SourcePregnancies => "source pregnancies",
            Phase::InsertPregnancies => "pregnancy insert",
            Phase::SourcePatients => "source patients",
            Phase::MirrorPatients => "mirror patients",
            Phase::InsertPatients => "patient insert",
            Phase::Screenings => "screenings",
            Phase::Patients => "patients",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by a backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid stored row: {0}")]
    InvalidRow(String),
}

/// Engine-level failures surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum EmtctError {
    #[error("lookup of {phase} failed for {subject}: {source}")]
    LookupFailure {
        phase: Phase,
        subject: String,
        #[source]
        source: StoreError,
    },
    #[error("write of {phase} failed for {subject}: {source}")]
    WriteFailure {
        phase: Phase,
        subject: String,
        #[source]
        source: StoreError,
    },
    #[error("registry transaction failed for year {year}: {source}")]
    TransactionFailure {
        year: i32,
        #[source]
        source: StoreError,
    },
    #[error("cancelled during {phase}")]
    Cancelled { phase: Phase },
    #[error("deadline exceeded during {phase}")]
    DeadlineExceeded { phase: Phase },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("failed to open store: {0}")]
    StoreOpen(#[source] StoreError),
}

impl EmtctError {
    pub(crate) fn lookup(phase: Phase, subject: impl Into<String>, source: StoreError) -> Self {
        EmtctError::LookupFailure {
            phase,
            subject: subject.into(),
            source,
        }
    }

    pub(crate) fn write(phase: Phase, subject: impl Into<String>, source: StoreError) -> Self {
        EmtctError::WriteFailure {
            phase,
            subject: subject.into(),
            source,
        }
    }
}

pub type EmtctResult<T> = std::result::Result<T, EmtctError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_failure_names_phase_and_subject() {
        let err = EmtctError::lookup(
            Phase::TestResults,
            "patient 12",
            StoreError::Unavailable("connection reset".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("test results"), "{msg}");
        assert!(msg.contains("patient 12"), "{msg}");
        assert!(msg.contains("connection reset"), "{msg}");
    }

    #[test]
    fn write_failure_is_not_reported_as_a_lookup() {
        let err = EmtctError::write(
            Phase::Screenings,
            "patient 7",
            StoreError::Unavailable("disk full".into()),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("write of screenings failed"), "{msg}");
        assert!(!msg.contains("lookup"), "{msg}");
    }

    #[test]
    fn transaction_failure_keeps_source() {
        let err = EmtctError::TransactionFailure {
            year: 2021,
            source: StoreError::InvalidRow("bad lmp".into()),
        };
        let source = std::error::Error::source(&err).expect("source should be kept");
        assert_eq!(source.to_string(), "invalid stored row: bad lmp");
    }
}

//! Application error type.
//!
//! Every fallible operation in the crate returns `Result<T, AppError>`. The
//! `kind` drives propagation policy (which failures abort a whole run and which
//! only abort one station or one fold); the exit code is what the `frost`
//! binary reports to the shell.

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Splitting cannot satisfy the fold/ratio constraints.
    InsufficientStations,
    /// A station-variable series is entirely missing.
    UnrecoverableSeries,
    /// Missing or non-finite values reached the model boundary.
    InvalidInput,
    /// Malformed experiment setup (fold index, horizons, hyperparameters).
    Configuration,
    /// File system, CSV or JSON failure.
    Io,
    /// Not enough usable data to build samples or metrics.
    InsufficientData,
    /// Non-finite values produced internally.
    Numeric,
}

impl ErrorKind {
    fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Configuration | ErrorKind::Io => 2,
            ErrorKind::InsufficientStations
            | ErrorKind::UnrecoverableSeries
            | ErrorKind::InsufficientData => 3,
            ErrorKind::InvalidInput | ErrorKind::Numeric => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::InsufficientStations => "insufficient stations",
            ErrorKind::UnrecoverableSeries => "unrecoverable series",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Io => "i/o error",
            ErrorKind::InsufficientData => "insufficient data",
            ErrorKind::Numeric => "numeric error",
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    kind: ErrorKind,
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            exit_code: kind.exit_code(),
            message: message.into(),
        }
    }

    pub fn insufficient_stations(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientStations, message)
    }

    pub fn unrecoverable_series(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnrecoverableSeries, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn insufficient_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientData, message)
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Numeric, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Configuration errors abort the whole run; everything else only aborts
    /// the unit of work (station, fold) that raised it.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Configuration
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_kind() {
        assert_eq!(AppError::configuration("x").exit_code(), 2);
        assert_eq!(AppError::insufficient_stations("x").exit_code(), 3);
        assert_eq!(AppError::invalid_input("x").exit_code(), 4);
    }

    #[test]
    fn only_configuration_is_fatal() {
        assert!(AppError::configuration("bad fold").is_fatal());
        assert!(!AppError::insufficient_stations("two stations").is_fatal());
        assert!(!AppError::unrecoverable_series("all missing").is_fatal());
    }
}

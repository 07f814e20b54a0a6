use std::fmt::Display;

pub type ABCResult<T> = Result<T, ABCErr>;

#[derive(Debug)]
pub enum ABCErr {
    /// Caller misconfiguration, e.g. zero particles or no registered loss evaluators
    ConfigurationError(String),
    /// The worker pool could not be started.  Never retried.
    WorkerPoolError(String),
    /// Initial rejection sampling ran out of its draw budget
    InitialisationError(String),
    KernelError(String),
    StorageError(String),
    InfrastructureError(String),
}

impl Display for ABCErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigurationError(ref msg) => write!(f, "ConfigurationErr: {}", msg),
            Self::WorkerPoolError(ref msg) => write!(f, "WorkerPoolErr: {}", msg),
            Self::InitialisationError(ref msg) => write!(f, "InitialisationErr: {}", msg),
            Self::KernelError(ref msg) => write!(f, "KernelErr: {}", msg),
            Self::StorageError(ref msg) => write!(f, "StorageErr: {}", msg),
            Self::InfrastructureError(ref msg) => write!(f, "InfrastructureErr: {}", msg),
        }
    }
}

impl std::error::Error for ABCErr {}

impl From<serde_json::Error> for ABCErr {
    fn from(value: serde_json::Error) -> Self {
        ABCErr::InfrastructureError(format!("Serde Error: {}", value))
    }
}

impl From<toml::de::Error> for ABCErr {
    fn from(value: toml::de::Error) -> Self {
        ABCErr::ConfigurationError(format!("TOML Error: {}", value))
    }
}

impl From<std::io::Error> for ABCErr {
    fn from(value: std::io::Error) -> Self {
        ABCErr::InfrastructureError(format!("IO Error: {}", value))
    }
}

impl From<regex::Error> for ABCErr {
    fn from(value: regex::Error) -> Self {
        ABCErr::InfrastructureError(format!("RegEx Error: {}", value))
    }
}

impl From<statrs::StatsError> for ABCErr {
    fn from(value: statrs::StatsError) -> Self {
        ABCErr::ConfigurationError(format!("Distribution Error: {}", value))
    }
}

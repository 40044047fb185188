use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Feature or adjacency tensors do not fit the layer they are fed to.
    #[error("dimension mismatch in {op}: expected {expected}, got {got}")]
    DimensionMismatch {
        op: &'static str,
        expected: String,
        got: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn dims(op: &'static str, expected: impl ToString, got: impl ToString) -> Self {
        Self::DimensionMismatch {
            op,
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

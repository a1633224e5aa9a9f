use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaeError {
    #[error("no two parameters may share the same name: {0}")]
    DuplicateParameter(String),

    #[error("this `{0}` instance already belongs to another VAE")]
    AlreadyBound(&'static str),

    #[error("`{0}` is not bound to a VAE yet")]
    NotBound(&'static str),

    #[error(
        "KL integrator expects ({expected_prior}, {expected_posterior}) \
         but got prior `{prior}` and posterior `{posterior}`"
    )]
    IncompatibleKl {
        prior: &'static str,
        posterior: &'static str,
        expected_prior: &'static str,
        expected_posterior: &'static str,
    },

    #[error("number of samples must be at least 1, got {0}")]
    InvalidNumSamples(usize),

    #[error("monitoring channel `{0}` is already defined")]
    DuplicateChannel(String),

    #[error("expected {expected}, got shape {got:?}")]
    InvalidShape { expected: String, got: Vec<usize> },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, VaeError>;

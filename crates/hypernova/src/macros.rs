//! Internal macros.

/// Unwrap an `Outcome`, propagating `Err`/`Cancelled`/`Panicked` verbatim.
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            asupersync::Outcome::Ok(value) => value,
            asupersync::Outcome::Err(e) => return asupersync::Outcome::Err(e),
            asupersync::Outcome::Cancelled(r) => return asupersync::Outcome::Cancelled(r),
            asupersync::Outcome::Panicked(p) => return asupersync::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside an `Outcome`-returning function.
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return asupersync::Outcome::Err(e),
        }
    };
}

pub(crate) use try_outcome;
pub(crate) use try_result;

//! The interface a loaded speech model exposes to a [`Backend`](crate::Backend).

use crate::audio::RawOutput;
use crate::error::BoxError;
use crate::params::ParamBag;

/// A loaded, ready-to-use speech model instance.
pub trait SpeechModel: Send {
    /// Move the model to `device`.
    ///
    /// Called once right after construction. Models whose placement is fixed
    /// at construction time keep the default no-op.
    fn to_device(&mut self, _device: &str) -> Result<(), BoxError> {
        Ok(())
    }

    /// Read a named attribute such as `sample_rate`.
    fn property(&self, _name: &str) -> Option<serde_json::Value> {
        None
    }

    /// The text-to-audio entry point, if this model has one.
    fn generator(&mut self) -> Option<&mut dyn Generator>;
}

/// A text-to-audio entry point.
pub trait Generator {
    /// Keyword names this generator understands.
    ///
    /// `None` means the generator does not publish a list; callers then pass
    /// every keyword through.
    fn accepted_params(&self) -> Option<&[&str]> {
        None
    }

    /// Synthesize `text` with the given keyword arguments.
    fn generate(&mut self, text: &str, params: &ParamBag) -> Result<RawOutput, BoxError>;
}

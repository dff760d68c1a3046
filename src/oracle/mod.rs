//! The correction oracle: something that reads a prompt, optionally looks at
//! table images, and answers in free text.

pub mod openai;

pub use openai::ChatCompletionsOracle;

use anyhow::Result;
use image::DynamicImage;

pub trait CorrectionOracle: Send + Sync {
    fn respond(&self, prompt: &str, images: &[DynamicImage]) -> Result<String>;
}

/// Oracle backed by a closure, for replays and tests.
pub struct FnOracle<F> {
    respond: F,
}

impl<F> FnOracle<F>
where
    F: Fn(&str, &[DynamicImage]) -> Result<String> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self { respond }
    }
}

impl<F> CorrectionOracle for FnOracle<F>
where
    F: Fn(&str, &[DynamicImage]) -> Result<String> + Send + Sync,
{
    fn respond(&self, prompt: &str, images: &[DynamicImage]) -> Result<String> {
        (self.respond)(prompt, images)
    }
}

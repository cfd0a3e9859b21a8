pub mod artifact;
pub mod engine;

pub use artifact::{AudioInfo, OutputArtifact};
pub use engine::{PiperEngine, SynthesisRequest, SynthesisTask, DEFAULT_START_TIMEOUT};

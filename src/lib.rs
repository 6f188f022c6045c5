pub mod audio;
pub mod config;
pub mod error;
pub mod services;
pub mod session;

pub use error::PipelineError;
pub use session::controller::VoiceSession;

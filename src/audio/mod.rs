pub mod capture;
pub mod codec;
pub mod playback;
pub mod scheduler;

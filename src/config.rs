use anyhow::{Context, Result};

use crate::services::genai::GenAiClient;
use crate::session::SessionConfig;

pub const LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const LIVE_VOICE: &str = "Zephyr";
pub const LIVE_SYSTEM_INSTRUCTION: &str =
    "You are a friendly cybersecurity expert advisor. Speak naturally and clearly.";
pub const CHAT_SYSTEM_INSTRUCTION: &str = "You are \"CyberGuard AI\", an expert cybersecurity \
consultant. Your goal is to educate users about cyber threats, prevention, and safety in the \
digital world. Format important keywords in bold.";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
}

impl Config {
    /// The single credential everything consumes. No config files.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY is not set")?;
        Ok(Self { api_key })
    }

    pub fn live_session(&self) -> SessionConfig {
        SessionConfig {
            model: LIVE_MODEL.to_string(),
            voice: LIVE_VOICE.to_string(),
            system_instruction: LIVE_SYSTEM_INSTRUCTION.to_string(),
        }
    }

    /// Chat/image/video client with the advisor persona baked in.
    pub fn genai_client(&self) -> GenAiClient {
        GenAiClient::new(self.api_key.clone(), CHAT_SYSTEM_INSTRUCTION.to_string())
    }
}

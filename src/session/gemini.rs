//! Live session client for the vendor's bidirectional audio endpoint
//! (BidiGenerateContent over websocket).

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::audio::codec::EncodedBlob;
use crate::error::PipelineError;
use crate::session::{LiveConnector, LiveSession, ServerEvent, SessionConfig};

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const SETUP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

pub struct GeminiConnector {
    api_key: String,
}

impl GeminiConnector {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

/// Incoming server message. One message can carry several things at once
/// (transcription text, an audio part, the interrupted flag).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<TranscriptionPart>,
    output_transcription: Option<TranscriptionPart>,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionPart {
    #[serde(default)]
    text: String,
}

impl LiveConnector for GeminiConnector {
    async fn connect(
        &self,
        config: &SessionConfig,
    ) -> Result<(Box<dyn LiveSession>, mpsc::Receiver<ServerEvent>), PipelineError> {
        let url = format!("{}?key={}", LIVE_ENDPOINT, self.api_key);
        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let setup = json!({
            "setup": {
                "model": format!("models/{}", config.model),
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": config.voice }
                        }
                    }
                },
                "systemInstruction": {
                    "parts": [{ "text": config.system_instruction }]
                },
                "inputAudioTranscription": {},
                "outputAudioTranscription": {}
            }
        });
        write
            .send(Message::Text(setup.to_string()))
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        // Handshake: the server acknowledges the setup before any content.
        let handshake = async {
            loop {
                match read.next().await {
                    Some(Ok(msg)) => {
                        let Some(text) = message_text(&msg) else { continue };
                        if let Ok(parsed) = serde_json::from_str::<ServerMessage>(&text) {
                            if parsed.setup_complete.is_some() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Err(e)) => return Err(PipelineError::Transport(e.to_string())),
                    None => {
                        return Err(PipelineError::Transport(
                            "connection closed during setup".into(),
                        ))
                    }
                }
            }
        };
        tokio::time::timeout(SETUP_TIMEOUT, handshake)
            .await
            .map_err(|_| PipelineError::Transport("setup handshake timed out".into()))??;
        info!("Live session established (model={})", config.model);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(64);

        // Writer: serialized outbound frames, until the session handle drops.
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if write.send(msg).await.is_err() {
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // Reader: translate server traffic into pipeline events.
        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Close(_)) => {
                        let _ = event_tx.send(ServerEvent::Closed).await;
                        return;
                    }
                    Ok(msg) => {
                        let Some(text) = message_text(&msg) else { continue };
                        let parsed = match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!("Unparseable server message: {}", e);
                                continue;
                            }
                        };
                        let Some(content) = parsed.server_content else { continue };
                        for event in content_events(content) {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        debug!("Live session transport error: {}", e);
                        let _ = event_tx.send(ServerEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = event_tx.send(ServerEvent::Closed).await;
        });

        let session = GeminiSession {
            out_tx: Some(out_tx),
        };
        Ok((Box::new(session), event_rx))
    }
}

/// The endpoint sends JSON in both text and binary frames.
fn message_text(msg: &Message) -> Option<String> {
    match msg {
        Message::Text(t) => Some(t.clone()),
        Message::Binary(b) => String::from_utf8(b.clone()).ok(),
        _ => None,
    }
}

fn content_events(content: ServerContent) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    if let Some(t) = content.output_transcription {
        if !t.text.is_empty() {
            events.push(ServerEvent::OutputTranscription(t.text));
        }
    }
    if let Some(t) = content.input_transcription {
        if !t.text.is_empty() {
            events.push(ServerEvent::InputTranscription(t.text));
        }
    }
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                events.push(ServerEvent::Audio { data: inline.data });
            }
        }
    }
    if content.interrupted {
        events.push(ServerEvent::Interrupted);
    }
    events
}

struct GeminiSession {
    out_tx: Option<mpsc::UnboundedSender<Message>>,
}

impl LiveSession for GeminiSession {
    fn send_realtime(&self, blob: EncodedBlob) -> Result<(), PipelineError> {
        let Some(tx) = &self.out_tx else {
            return Ok(()); // closed; frame dropped silently
        };
        let msg = json!({
            "realtimeInput": {
                "mediaChunks": [{
                    "mimeType": blob.mime_type,
                    "data": blob.data
                }]
            }
        });
        // Fire-and-forget: a frame racing session teardown is dropped.
        let _ = tx.send(Message::Text(msg.to_string()));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(tx) = self.out_tx.take() {
            let _ = tx.send(Message::Close(None));
        }
    }
}

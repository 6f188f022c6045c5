use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cyberguard_voice::config::Config;
use cyberguard_voice::services::genai::{
    poll_bounded, Attachment, GenAiClient, ImageConfig, CHAT_FALLBACK,
};

/// Serves exactly one canned HTTP response on a random local port and hands
/// the raw request back for inspection.
fn serve_once(status: u16, body: &'static str) -> (String, std::sync::mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local listener");
    let addr = listener.local_addr().expect("listener address");
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let request = read_http_request(&mut stream);
            let _ = tx.send(request);
            let response = format!(
                "HTTP/1.1 {} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    (format!("http://{}", addr), rx)
}

fn read_http_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = find_subslice(&buf, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            let total = header_end + 4 + content_length;
            while buf.len() < total {
                let n = stream.read(&mut chunk).unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            break;
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn test_client(base_url: String) -> GenAiClient {
    GenAiClient::new("test-key".into(), "You are an advisor.".into()).with_base_url(base_url)
}

#[tokio::test]
async fn chat_failure_folds_into_fallback_reply() {
    let (base, _requests) = serve_once(500, "{}");
    let client = test_client(base);

    let reply = client.send_message("hello", &[], false).await;

    assert_eq!(reply.text, CHAT_FALLBACK);
    assert!(reply.grounding_metadata.is_none());
}

#[tokio::test]
async fn chat_reply_carries_text_and_grounding() {
    let body = r#"{"candidates":[{"content":{"parts":[{"text":"Use MFA everywhere."}]},"groundingMetadata":{"webSearchQueries":["mfa"]}}]}"#;
    let (base, _requests) = serve_once(200, body);
    let client = test_client(base);

    let reply = client.send_message("how do I stay safe?", &[], true).await;

    assert_eq!(reply.text, "Use MFA everywhere.");
    assert!(reply.grounding_metadata.is_some());
}

#[tokio::test]
async fn attachment_data_uris_are_stripped_before_upload() {
    let (base, requests) = serve_once(200, r#"{"candidates":[]}"#);
    let client = test_client(base);
    let attachment = Attachment {
        data: "data:image/png;base64,QUJD".into(),
        mime_type: "image/png".into(),
    };

    let reply = client.send_message("check this", &[attachment], false).await;

    // An empty candidate list also folds into the fallback.
    assert_eq!(reply.text, CHAT_FALLBACK);
    let request = requests.recv().expect("request was captured");
    assert!(request.contains("\"data\":\"QUJD\""));
    assert!(!request.contains("data:image/png"));
}

#[tokio::test]
async fn missing_image_part_is_an_error() {
    let body = r#"{"candidates":[{"content":{"parts":[{"text":"cannot draw that"}]}}]}"#;
    let (base, _requests) = serve_once(200, body);
    let client = test_client(base);
    let config = ImageConfig {
        aspect_ratio: "1:1".into(),
        image_size: "1K".into(),
    };

    let err = client
        .generate_image("a padlock", &config)
        .await
        .expect_err("no inline data in the response");

    assert!(err.to_string().contains("no image generated"));
}

#[tokio::test]
async fn generated_image_resolves_to_a_data_uri() {
    let body = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"QUJD"}}]}}]}"#;
    let (base, _requests) = serve_once(200, body);
    let client = test_client(base);
    let config = ImageConfig {
        aspect_ratio: "16:9".into(),
        image_size: "2K".into(),
    };

    let uri = client
        .generate_image("a padlock", &config)
        .await
        .expect("image response");

    assert_eq!(uri, "data:image/png;base64,QUJD");
}

#[tokio::test]
async fn config_wires_up_the_chat_client() {
    std::env::set_var("GEMINI_API_KEY", "test-key");
    let config = Config::from_env().expect("key is set");

    let client = config.genai_client();

    // The configured persona rides along as the system instruction.
    let (base, requests) = serve_once(500, "{}");
    let reply = client.with_base_url(base).send_message("hi", &[], false).await;
    assert_eq!(reply.text, CHAT_FALLBACK);
    let request = requests.recv().expect("request was captured");
    assert!(request.contains("CyberGuard AI"));
}

#[tokio::test(start_paused = true)]
async fn polling_resolves_once_the_job_reports_done() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let cancel = CancellationToken::new();

    let result: anyhow::Result<&str> = poll_bounded(
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok((n >= 3).then_some("video.mp4")) }
        },
        Duration::from_secs(10),
        Duration::from_secs(600),
        &cancel,
    )
    .await;

    assert_eq!(result.unwrap(), "video.mp4");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn polling_gives_up_at_the_deadline() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let cancel = CancellationToken::new();

    let result: anyhow::Result<&str> = poll_bounded(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) } // never done
        },
        Duration::from_secs(10),
        Duration::from_secs(60),
        &cancel,
    )
    .await;

    assert!(result.is_err());
    // 60s budget at a 10s interval: bounded, not unbounded.
    assert!(calls.load(Ordering::SeqCst) <= 6);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_poll_loop() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result: anyhow::Result<&str> = poll_bounded(
        move || async { Ok(Some("never reached")) },
        Duration::from_secs(10),
        Duration::from_secs(600),
        &cancel,
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn poll_errors_propagate() {
    let cancel = CancellationToken::new();

    let result: anyhow::Result<&str> = poll_bounded(
        move || async { Err(anyhow::anyhow!("operation poll error: 500")) },
        Duration::from_secs(10),
        Duration::from_secs(600),
        &cancel,
    )
    .await;

    assert!(result.is_err());
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{Level, error, info, warn};
use worldbus::frame::{FrameReader, FrameWriter};
use worldbus::topic::{
    AI_REQUEST, AiRequest, Envelope, ai_request_from_envelope, ai_response_envelope,
};

const OPENAI_API_BASE_DEFAULT: &str = "https://api.openai.com/v1";
const MODEL_NAME_DEFAULT: &str = "gpt-4o-mini";

fn usage_and_exit() -> ! {
    let base = format!("default {OPENAI_API_BASE_DEFAULT}");
    let model = format!("default {MODEL_NAME_DEFAULT}");
    eprintln!("ai_requester\n\nUSAGE:\n  ai_requester [--bus HOST:PORT]\n\nENV:");
    // The requester dials the message broker, not the orchestrator. The broker relays
    // ai_request and ai_response between this process and the orchestrator's BUS_BIND.
    for (key, about) in [
        ("BUS_ADDR", "default 127.0.0.1:4301 (message broker address)"),
        ("OPENAI_API_BASE", base.as_str()),
        ("OPENAI_API_KEY", "required"),
        ("MODEL_NAME", model.as_str()),
        ("AI_MAX_TRIES", "default 10"),
        ("AI_BACKOFF_BASE_MS", "default 5000"),
        ("AI_BACKOFF_MAX_MS", "default 60000"),
        ("AI_MAX_TOKENS", "default 1000"),
    ] {
        eprintln!("  {key:<20} {about}");
    }
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    bus: SocketAddr,
    api_base: String,
    api_key: String,
    model: String,
    max_tries: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    max_tokens: u32,
}

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_args() -> Config {
    let mut bus: SocketAddr = env_str("BUS_ADDR")
        .unwrap_or_else(|| "127.0.0.1:4301".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bus" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bus = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    let Some(api_key) = env_str("OPENAI_API_KEY") else {
        eprintln!("OPENAI_API_KEY is not set");
        usage_and_exit();
    };

    Config {
        bus,
        api_base: env_str("OPENAI_API_BASE").unwrap_or_else(|| OPENAI_API_BASE_DEFAULT.to_string()),
        api_key,
        model: env_str("MODEL_NAME").unwrap_or_else(|| MODEL_NAME_DEFAULT.to_string()),
        max_tries: env_num("AI_MAX_TRIES", 10u32).max(1),
        backoff_base_ms: env_num("AI_BACKOFF_BASE_MS", 5_000u64),
        backoff_max_ms: env_num("AI_BACKOFF_MAX_MS", 60_000u64),
        max_tokens: env_num("AI_MAX_TOKENS", 1_000u32),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ai_requester=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = Arc::new(parse_args());
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()?;

    info!(bus = %cfg.bus, model = %cfg.model, base = %cfg.api_base, "ai requester starting");

    // Finished answers outlive a bus connection; they are written after the next reconnect.
    let (tx, mut rx) = mpsc::channel::<Envelope>(256);
    let mut announced_down = false;
    let mut attempt: u32 = 0;

    loop {
        match TcpStream::connect(cfg.bus).await {
            Ok(stream) => {
                announced_down = false;
                attempt = 0;
                info!(bus = %cfg.bus, "connected to bus");

                let (rd, wr) = stream.into_split();
                let mut fr = FrameReader::new(rd);
                let mut fw = FrameWriter::new(wr);

                loop {
                    tokio::select! {
                        msg = rx.recv() => {
                            let Some(env) = msg else { return Ok(()); };
                            if let Err(e) = fw.write_envelope(&env).await {
                                warn!(err = %e, "failed to publish ai response");
                                break;
                            }
                            if fw.flush().await.is_err() {
                                break;
                            }
                        }
                        res = fr.read_envelope() => {
                            let env = match res {
                                Ok(Some(Ok(env))) => env,
                                Ok(Some(Err(e))) => {
                                    warn!(err = %e, "dropping undecodable frame");
                                    continue;
                                }
                                Ok(None) | Err(_) => break,
                            };
                            if env.topic != AI_REQUEST {
                                continue;
                            }
                            match ai_request_from_envelope(env) {
                                Ok(req) => {
                                    let cfg = cfg.clone();
                                    let client = client.clone();
                                    let tx = tx.clone();
                                    tokio::spawn(async move {
                                        let env = answer(&client, &cfg, req).await;
                                        let _ = tx.send(env).await;
                                    });
                                }
                                Err(e) => warn!(err = %e, "bad ai request"),
                            }
                        }
                    }
                }

                warn!(bus = %cfg.bus, "bus disconnected; reconnecting");
            }
            Err(e) => {
                if !announced_down {
                    warn!(bus = %cfg.bus, err = %e, "bus down; retrying");
                    announced_down = true;
                }
            }
        }
        let delay = backoff_delay(attempt, 250, 10_000);
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}

/// Ask the model, retrying transient failures. Gives up with an empty response.
async fn answer(client: &reqwest::Client, cfg: &Config, req: AiRequest) -> Envelope {
    let t0 = std::time::Instant::now();
    for attempt in 0..cfg.max_tries {
        match chat_completion(client, cfg, &req.system_message, &req.prompt).await {
            Ok(text) => {
                info!(
                    request_id = %req.request_id,
                    tries = attempt + 1,
                    ms = t0.elapsed().as_millis() as u64,
                    "ai response"
                );
                return ai_response_envelope(&req.request_id, &text);
            }
            Err(AiError::Transient(msg)) => {
                let delay = backoff_delay(attempt, cfg.backoff_base_ms, cfg.backoff_max_ms);
                warn!(
                    request_id = %req.request_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    err = %msg,
                    "transient ai failure; retrying"
                );
                if attempt + 1 < cfg.max_tries {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(AiError::Fatal(msg)) => {
                error!(request_id = %req.request_id, err = %msg, "ai request failed");
                return ai_response_envelope(&req.request_id, "");
            }
        }
    }
    error!(request_id = %req.request_id, tries = cfg.max_tries, "ai request exhausted retries");
    ai_response_envelope(&req.request_id, "")
}

#[derive(Debug, PartialEq)]
enum AiError {
    Transient(String),
    Fatal(String),
}

impl std::fmt::Display for AiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiError::Transient(m) => write!(f, "transient: {m}"),
            AiError::Fatal(m) => write!(f, "fatal: {m}"),
        }
    }
}

impl std::error::Error for AiError {}

fn classify(status: StatusCode, body: &str) -> AiError {
    let msg = format!("chat http={} {}", status.as_u16(), truncate(body, 200));
    let lower = body.to_ascii_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || lower.contains("overloaded")
        || lower.contains("rate_limit")
    {
        AiError::Transient(msg)
    } else {
        AiError::Fatal(msg)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect::<String>() + " [truncated]"
    } else {
        s.to_string()
    }
}

fn extract_content(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("choices")?
                .as_array()?
                .first()?
                .get("message")?
                .get("content")?
                .as_str()
                .map(|s| s.trim().to_string())
        })
}

async fn chat_completion(
    client: &reqwest::Client,
    cfg: &Config,
    system: &str,
    prompt: &str,
) -> Result<String, AiError> {
    let url = format!("{}/chat/completions", cfg.api_base.trim_end_matches('/'));
    let req = serde_json::json!({
        "model": cfg.model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": prompt}
        ],
        "max_tokens": cfg.max_tokens,
    });

    let resp = client
        .post(url)
        .bearer_auth(&cfg.api_key)
        .json(&req)
        .send()
        .await
        .map_err(|e| AiError::Transient(e.to_string()))?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| AiError::Transient(e.to_string()))?;
    if status != StatusCode::OK {
        return Err(classify(status, &body));
    }
    if body.contains("\"error\"") && extract_content(&body).is_none() {
        return Err(classify(status, &body));
    }

    extract_content(&body)
        .ok_or_else(|| AiError::Fatal("response did not include choices".to_string()))
}

/// `base * 2^attempt`, capped at `max`.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

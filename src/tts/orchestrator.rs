//! The TTS orchestrator: resolves the job, replays completed chunks from
//! durable state, fans the remaining sentences out across the worker pool
//! with bounded concurrency, and emits SSE frames through a single writer.
//!
//! Emission order across sentences is not guaranteed under concurrency; the
//! `id` field carries the sentence index and consumers reorder by it.

use crate::error::{GatewayError, ProxyResult};
use crate::sse::Event;
use crate::tts::state::TtsJobState;
use crate::tts::text::sentences_of;
use crate::tts::TtsEngine;
use crate::types::constants::{
    is_valid_voice, ROUTER_COUNTER_NAME, TTS_AUDIO_MIME, TTS_CONCURRENCY,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Deserialize)]
pub struct TtsRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "voiceId")]
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(rename = "apiKey")]
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Validated request parameters.
#[derive(Debug, Clone)]
pub struct TtsParams {
    pub text: String,
    pub voice_id: String,
    pub api_key: String,
}

impl TtsRequest {
    /// Rejects missing parameters and malformed voice names up front, before
    /// any SSE bytes are committed.
    pub fn into_params(self) -> ProxyResult<TtsParams> {
        let text = self
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("text is required".to_string()))?;
        let voice_id = self
            .voice_id
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("voiceId is required".to_string()))?;
        if !is_valid_voice(&voice_id) {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid voice name: {}",
                voice_id
            )));
        }
        let api_key = self
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("apiKey is required".to_string()))?;
        Ok(TtsParams {
            text,
            voice_id,
            api_key,
        })
    }
}

fn message_event(index: u32, chunk: &str, job_id: &str) -> String {
    Event::default()
        .event("message")
        .id(index)
        .data(
            json!({
                "audioChunk": chunk,
                "index": index,
                "mimeType": TTS_AUDIO_MIME,
                "jobId": job_id,
            })
            .to_string(),
        )
        .to_string()
}

fn error_event(index: u32, message: &str, job_id: &str) -> String {
    Event::default()
        .event("error")
        .id(index)
        .data(
            json!({
                "index": index,
                "message": message,
                "audioContentBase64": null,
                "jobId": job_id,
            })
            .to_string(),
        )
        .to_string()
}

fn end_event() -> String {
    Event::default().event("end").data("").to_string()
}

/// Chunks to replay from durable state and the index to resume from. The
/// high-water mark is the last index written; when that write succeeded the
/// job resumes right after it, when it failed (or is missing) the sentence
/// is synthesized again.
pub fn plan_replay(state: &TtsJobState, sentence_count: usize) -> (Vec<(u32, String)>, usize) {
    if !state.initialised || state.current_sentence_index < 0 || sentence_count == 0 {
        return (Vec::new(), 0);
    }
    let current = state.current_sentence_index as u32;
    let last = current.min(sentence_count.saturating_sub(1) as u32);

    let mut replay = Vec::new();
    for index in 0..=last {
        if let Some(chunk) = state.successful_chunk(index) {
            replay.push((index, chunk.to_string()));
        }
    }
    let resume_at = if state.successful_chunk(current).is_some() {
        current as usize + 1
    } else {
        current as usize
    };
    (replay, resume_at.min(sentence_count))
}

/// Kicks off a job and returns the SSE frame receiver. The caller turns the
/// receiver into the response body; dropping it cancels outstanding work at
/// the next suspension point.
pub fn start(
    engine: Arc<TtsEngine>,
    job_id: Option<String>,
    params: TtsParams,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(run(engine, job_id, params, tx));
    rx
}

async fn run(
    engine: Arc<TtsEngine>,
    job_id: Option<String>,
    params: TtsParams,
    tx: mpsc::Sender<String>,
) {
    let job_id = job_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    log::info!("tts job {} starting", job_id);

    if let Err(e) = engine
        .jobs
        .initialize(&job_id, &params.text, &params.voice_id)
        .await
    {
        log::error!("tts job {}: failed to initialise state: {}", job_id, e);
        let _ = tx
            .send(error_event(0, &format!("failed to initialise job state: {}", e), &job_id))
            .await;
        let _ = tx.send(end_event()).await;
        return;
    }

    // A state fetch failure is tolerated: the job just runs from scratch.
    let state = engine.jobs.get_state(&job_id).await.unwrap_or_else(|e| {
        log::warn!("tts job {}: state load failed, assuming fresh: {}", job_id, e);
        TtsJobState::default()
    });

    let sentences = sentences_of(&params.text);
    if sentences.is_empty() {
        let _ = tx.send(end_event()).await;
        return;
    }

    let (replay, resume_at) = plan_replay(&state, sentences.len());
    if !replay.is_empty() {
        log::info!(
            "tts job {}: replaying {} stored chunks, resuming at {}",
            job_id,
            replay.len(),
            resume_at
        );
    }
    for (index, chunk) in replay {
        if tx.send(message_event(index, &chunk, &job_id)).await.is_err() {
            return;
        }
    }

    let job_id = Arc::new(job_id);
    let params = Arc::new(params);
    futures::stream::iter(sentences.into_iter().enumerate().skip(resume_at))
        .map(|(index, sentence)| {
            let engine = engine.clone();
            let job_id = job_id.clone();
            let params = params.clone();
            let tx = tx.clone();
            async move {
                if tx.is_closed() {
                    return;
                }
                process_sentence(engine, &job_id, index as u32, sentence, &params, tx).await;
            }
        })
        .buffer_unordered(TTS_CONCURRENCY)
        .collect::<Vec<()>>()
        .await;

    let _ = tx.send(end_event()).await;
    log::info!("tts job {} finished", job_id);
}

async fn process_sentence(
    engine: Arc<TtsEngine>,
    job_id: &str,
    index: u32,
    sentence: String,
    params: &TtsParams,
    tx: mpsc::Sender<String>,
) {
    // Round-robin selection is per sentence against the global counter.
    let pick = match engine.counter.increment(ROUTER_COUNTER_NAME).await {
        Ok(value) => value,
        Err(e) => {
            log::warn!(
                "tts job {}: counter increment failed, falling back to index: {}",
                job_id,
                e
            );
            index as i64 + 1
        }
    };
    let worker_index = (pick as usize) % engine.backends.len();

    let result = engine
        .backends
        .synthesize(worker_index, index, &sentence, &params.voice_id, &params.api_key)
        .await;

    // Persist before emitting so a resumed job never misses an acknowledged
    // chunk.
    let frame = match result {
        Ok(chunk) => {
            match engine
                .jobs
                .update_progress(job_id, index, Some(chunk.clone()), None)
                .await
            {
                Ok(()) => message_event(index, &chunk, job_id),
                Err(e) => {
                    log::error!("tts job {}: persist failed for sentence {}: {}", job_id, index, e);
                    error_event(index, &format!("state persistence failed: {}", e), job_id)
                }
            }
        }
        Err(e) => {
            let message = e.to_string();
            log::warn!("tts job {}: sentence {} failed: {}", job_id, index, message);
            if let Err(persist_err) = engine
                .jobs
                .update_progress(job_id, index, None, Some(message.clone()))
                .await
            {
                log::error!(
                    "tts job {}: persist failed for sentence {}: {}",
                    job_id,
                    index,
                    persist_err
                );
            }
            error_event(index, &message, job_id)
        }
    };
    let _ = tx.send(frame).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_chunks(chunks: &[(u32, Option<&str>)], current: i64) -> TtsJobState {
        TtsJobState {
            text: "irrelevant".to_string(),
            voice_id: "Kore".to_string(),
            initialised: true,
            current_sentence_index: current,
            audio_chunks: chunks
                .iter()
                .map(|(i, c)| (*i, c.map(str::to_string)))
                .collect(),
            last_error: None,
            error_timestamp: None,
        }
    }

    #[test]
    fn fresh_job_has_nothing_to_replay() {
        let (replay, resume) = plan_replay(&TtsJobState::default(), 3);
        assert!(replay.is_empty());
        assert_eq!(resume, 0);
    }

    #[test]
    fn resume_replays_completed_chunks_then_continues() {
        let state = state_with_chunks(&[(0, Some("c0")), (1, Some("c1"))], 1);
        let (replay, resume) = plan_replay(&state, 3);
        assert_eq!(
            replay,
            vec![(0, "c0".to_string()), (1, "c1".to_string())]
        );
        assert_eq!(resume, 2);
    }

    #[test]
    fn failed_high_water_sentence_is_retried() {
        let state = state_with_chunks(&[(0, Some("c0")), (1, None)], 1);
        let (replay, resume) = plan_replay(&state, 3);
        assert_eq!(replay, vec![(0, "c0".to_string())]);
        assert_eq!(resume, 1);
    }

    #[test]
    fn resume_never_exceeds_sentence_count() {
        let state = state_with_chunks(&[(0, Some("c0")), (1, Some("c1"))], 1);
        let (_, resume) = plan_replay(&state, 2);
        assert_eq!(resume, 2);
    }

    #[test]
    fn message_event_has_exact_sse_layout() {
        let frame = message_event(0, "QUJD", "job-1");
        assert!(frame.starts_with("event: message\nid: 0\ndata: "));
        assert!(frame.ends_with("\n\n"));
        let data: serde_json::Value = serde_json::from_str(
            frame
                .lines()
                .find(|l| l.starts_with("data: "))
                .unwrap()
                .strip_prefix("data: ")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(data["audioChunk"], "QUJD");
        assert_eq!(data["index"], 0);
        assert_eq!(data["mimeType"], TTS_AUDIO_MIME);
        assert_eq!(data["jobId"], "job-1");
    }

    #[test]
    fn error_event_carries_null_audio() {
        let frame = error_event(2, "HTTP error Status 503", "job-1");
        assert!(frame.starts_with("event: error\nid: 2\ndata: "));
        let data: serde_json::Value = serde_json::from_str(
            frame
                .lines()
                .find(|l| l.starts_with("data: "))
                .unwrap()
                .strip_prefix("data: ")
                .unwrap(),
        )
        .unwrap();
        assert!(data["audioContentBase64"].is_null());
        assert_eq!(data["message"], "HTTP error Status 503");
    }

    #[test]
    fn end_event_is_exact() {
        assert_eq!(end_event(), "event: end\ndata: \n\n");
    }

    #[test]
    fn params_validation() {
        let ok = TtsRequest {
            text: Some("Hello.".to_string()),
            voice_id: Some("Kore".to_string()),
            api_key: Some("k".to_string()),
        };
        assert!(ok.into_params().is_ok());

        let missing_text = TtsRequest {
            text: None,
            voice_id: Some("Kore".to_string()),
            api_key: Some("k".to_string()),
        };
        assert!(missing_text.into_params().is_err());

        let bad_voice = TtsRequest {
            text: Some("Hello.".to_string()),
            voice_id: Some("definitely not a voice".to_string()),
            api_key: Some("k".to_string()),
        };
        assert!(bad_voice.into_params().is_err());
    }
}

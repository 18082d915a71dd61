//! HTTP detection-service backend.
//!
//! Sends the raw RGB24 frame to an open-vocabulary detection server
//! (e.g. a YOLO-World deployment) and keeps the highest-confidence box.
//!
//! Request: `POST {endpoint}?phrase=..&width=..&height=..`, body is the raw
//! pixel buffer. Response: `{"boxes": [{"cx", "cy", "w", "h", "confidence"}]}`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::bbox::CenterBox;
use crate::detect::backend::GroundingDetector;
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct HttpDetectorConfig {
    pub endpoint: String,
    /// Client-side request timeout; the session timeout still applies on top.
    pub timeout: Duration,
}

pub struct HttpDetector {
    agent: ureq::Agent,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct DetectionReply {
    #[serde(default)]
    boxes: Vec<ScoredBox>,
}

#[derive(Debug, Deserialize)]
struct ScoredBox {
    cx: f64,
    cy: f64,
    w: f64,
    h: f64,
    #[serde(default)]
    confidence: f64,
}

impl HttpDetector {
    pub fn new(config: HttpDetectorConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(anyhow!("http detector requires an endpoint"));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            agent,
            endpoint: config.endpoint,
        })
    }
}

impl GroundingDetector for HttpDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&mut self, frame: &Frame, phrase: &str) -> Result<Option<CenterBox>> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Ok(None);
        }
        let response = self
            .agent
            .post(&self.endpoint)
            .query("phrase", phrase)
            .query("width", &frame.width().to_string())
            .query("height", &frame.height().to_string())
            .set("Content-Type", "application/octet-stream")
            .send_bytes(frame.pixels())
            .map_err(|e| anyhow!("detection request failed: {}", e))?;
        let body = response
            .into_string()
            .context("read detection response")?;
        let reply: DetectionReply =
            serde_json::from_str(&body).context("invalid detection response")?;
        Ok(best_box(reply.boxes))
    }
}

fn best_box(boxes: Vec<ScoredBox>) -> Option<CenterBox> {
    boxes
        .into_iter()
        .filter(|b| b.w >= 0.0 && b.h >= 0.0)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|b| CenterBox::new(b.cx as i32, b.cy as i32, b.w as i32, b.h as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_confidence() {
        let reply: DetectionReply = serde_json::from_str(
            r#"{"boxes": [
                {"cx": 10, "cy": 10, "w": 4, "h": 4, "confidence": 0.3},
                {"cx": 50.7, "cy": 20.2, "w": 8, "h": 6, "confidence": 0.9}
            ]}"#,
        )
        .unwrap();
        assert_eq!(best_box(reply.boxes), Some(CenterBox::new(50, 20, 8, 6)));
    }

    #[test]
    fn empty_reply_is_not_found() {
        let reply: DetectionReply = serde_json::from_str("{}").unwrap();
        assert_eq!(best_box(reply.boxes), None);
    }
}

//! Chat-completion refiner.
//!
//! Uploads the video to the provider's file store (`purpose=vision`), then
//! asks a vision chat model for a short referring phrase that answers the
//! question. Speaks the OpenAI-compatible shape used by the BigModel
//! (`glm-4v`) endpoint.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

use super::QueryRefiner;

pub const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

const PROMPT: &str = "You are a computer vision assistant. Your task is to analyze the provided video \
and the user's question to create a concise English phrase that uniquely identifies the target object. \
This phrase will be fed into a visual grounding model. It must be descriptive and include spatial \
relationships if necessary. Do NOT just respond with a single word. Be specific.\n\n\
Here are some examples of perfect responses:\n\
Question: 'what is next to the other squirrel?' -> 'the squirrel on the left'\n\
Question: 'what does the adult woman in black hold in the living room?' -> 'the book in her hands'\n";

#[derive(Clone, Debug)]
pub struct ChatRefinerConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

pub struct ChatRefiner {
    agent: ureq::Agent,
    config: ChatRefinerConfig,
}

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: String,
}

impl ChatRefiner {
    pub fn new(config: ChatRefinerConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(anyhow!("chat refiner requires an API key"));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { agent, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.api_key)
    }

    fn upload(&self, video: &Path) -> Result<String> {
        let bytes = std::fs::read(video)
            .with_context(|| format!("read video {}", video.display()))?;
        let filename = video
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4");
        let boundary = format!("grounding-{:x}", bytes.len() ^ 0x5eed_f00d);
        let body = multipart_body(&boundary, filename, &bytes);

        let response = self
            .agent
            .post(&self.endpoint("files"))
            .set("Authorization", &self.bearer())
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
            .map_err(|e| anyhow!("upload failed: {}", e))?;
        let uploaded: UploadedFile = response
            .into_json()
            .context("invalid upload response")?;
        log::debug!("uploaded {} as {}", video.display(), uploaded.id);
        Ok(uploaded.id)
    }
}

fn multipart_body(boundary: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"purpose\"\r\n\r\nvision\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: video/mp4\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

impl QueryRefiner for ChatRefiner {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn refine(&self, video: &Path, query: &str) -> Result<String> {
        let file_id = self.upload(video)?;
        let request = json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "text",
                        "text": format!("{PROMPT}Now, analyze this video.\nQuestion: '{query}' ->"),
                    },
                    { "type": "file_url", "file_url": { "url": file_id } },
                ],
            }],
            "max_tokens": self.config.max_tokens,
            "temperature": 0.0,
        });

        let response = self
            .agent
            .post(&self.endpoint("chat/completions"))
            .set("Authorization", &self.bearer())
            .send_json(request)
            .map_err(|e| anyhow!("chat completion failed: {}", e))?;
        let completion: Completion = response
            .into_json()
            .context("invalid chat completion response")?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no choices"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_carries_purpose_and_file() {
        let body = multipart_body("b", "video_7.mp4", b"RAW");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b\r\n"));
        assert!(text.contains("name=\"purpose\"\r\n\r\nvision\r\n"));
        assert!(text.contains("filename=\"video_7.mp4\""));
        assert!(text.ends_with("RAW\r\n--b--\r\n"));
    }

    #[test]
    fn requires_api_key() {
        let config = ChatRefinerConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: " ".to_string(),
            model: "glm-4v".to_string(),
            max_tokens: 20,
            timeout: Duration::from_secs(1),
        };
        assert!(ChatRefiner::new(config).is_err());
    }
}

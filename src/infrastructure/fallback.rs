#[cfg(test)]
#[path = "fallback_test.rs"]
mod tests;

use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use serde_derive::Serialize;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::Attachment;

const ANSWER_KEYS: [&str; 5] = ["response", "answer", "text", "message", "output"];

/// Atomic request path used whenever the streaming transport isn't open.
/// One call, one complete answer.
#[async_trait]
pub trait Requester {
    async fn complete(&self, prompt: &str, attachment: Option<&Attachment>) -> Result<String>;
}

#[derive(Serialize)]
struct AnswerRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<&'a Attachment>,
}

pub struct FallbackClient {
    url: String,
    backup_url: String,
    timeout: String,
    auth_token: String,
}

impl Default for FallbackClient {
    fn default() -> FallbackClient {
        return FallbackClient {
            url: Config::get(ConfigKey::FallbackURL),
            backup_url: Config::get(ConfigKey::FallbackBackupURL),
            timeout: Config::get(ConfigKey::RequestTimeout),
            auth_token: Config::get(ConfigKey::AuthToken),
        };
    }
}

#[async_trait]
impl Requester for FallbackClient {
    async fn complete(&self, prompt: &str, attachment: Option<&Attachment>) -> Result<String> {
        match self.request_primary(prompt, attachment).await {
            Ok(answer) => return Ok(answer),
            Err(err) => {
                tracing::warn!(error = ?err, "primary fallback request failed, trying the alternate endpoint");
            }
        }

        return self.request_alternate(prompt).await;
    }
}

impl FallbackClient {
    fn timeout_duration(&self) -> Result<Duration> {
        return Ok(Duration::from_millis(self.timeout.parse::<u64>()?));
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.auth_token.is_empty() {
            return builder;
        }
        return builder.bearer_auth(&self.auth_token);
    }

    async fn request_primary(
        &self,
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> Result<String> {
        let req = self
            .authorize(reqwest::Client::new().post(&self.url))
            .timeout(self.timeout_duration()?)
            .json(&AnswerRequest { prompt, attachment });

        let res = req.send().await?;
        if !res.status().is_success() {
            tracing::error!(
                status = res.status().as_u16(),
                "fallback answer request failed"
            );
            bail!("fallback answer request failed");
        }

        return extract_answer(res.json::<serde_json::Value>().await?);
    }

    /// GET variant for backends that only accept the prompt as a query
    /// parameter.
    async fn request_alternate(&self, prompt: &str) -> Result<String> {
        let req = self
            .authorize(reqwest::Client::new().get(&self.backup_url))
            .timeout(self.timeout_duration()?)
            .query(&[("q", prompt)]);

        let res = req.send().await?;
        if !res.status().is_success() {
            tracing::error!(
                status = res.status().as_u16(),
                "alternate fallback request failed"
            );
            bail!("alternate fallback request failed");
        }

        return extract_answer(res.json::<serde_json::Value>().await?);
    }
}

/// Backends differ on which key carries the answer; accept the usual ones.
fn extract_answer(body: serde_json::Value) -> Result<String> {
    for key in ANSWER_KEYS {
        if let Some(answer) = body.get(key).and_then(|value| return value.as_str()) {
            return Ok(answer.to_string());
        }
    }

    bail!("fallback response carried no answer under a known key");
}

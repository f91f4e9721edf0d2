use crate::config::Config;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// What an external context reference points at on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContextKind {
    Uploaded,
    Generated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextImage {
    pub kind: ContextKind,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub context_images: Vec<ContextImage>,
    pub style_id: Option<String>,
    pub model_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Complete {
        image_url: String,
        external_image_id: String,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image_url: String,
    pub external_image_id: String,
}

#[async_trait]
pub trait ImageGenClient: Send + Sync + Debug {
    async fn submit(&self, job: &GenerationJob) -> Result<String>;
    async fn poll(&self, job_id: &str) -> Result<JobStatus>;
}

const POLL_INTERVAL_SECS: u64 = 3;
const MAX_POLL_ATTEMPTS: u32 = 40;

/// Submit a job and poll to completion: 3 s interval, 40 attempts
/// (about 2 minutes), progress logged every 5 polls.
pub async fn generate_and_wait(
    client: &dyn ImageGenClient,
    job: &GenerationJob,
) -> Result<GeneratedImage> {
    let job_id = client.submit(job).await?;
    log::debug!("Submitted image job {}", job_id);

    for attempt in 1..=MAX_POLL_ATTEMPTS {
        tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;

        match client.poll(&job_id).await? {
            JobStatus::Pending => {
                if attempt % 5 == 0 {
                    log::info!(
                        "Image job {} still pending after {} polls",
                        job_id,
                        attempt
                    );
                }
            }
            JobStatus::Complete {
                image_url,
                external_image_id,
            } => {
                return Ok(GeneratedImage {
                    image_url,
                    external_image_id,
                });
            }
            JobStatus::Failed { reason } => {
                return Err(anyhow!("Image generation failed: {}", reason));
            }
        }
    }

    Err(anyhow!(
        "Image generation timed out after {} seconds (job {})",
        POLL_INTERVAL_SECS * MAX_POLL_ATTEMPTS as u64,
        job_id
    ))
}

pub fn create_imagegen(config: &Config) -> Box<dyn ImageGenClient> {
    Box::new(LeonardoClient::new(config))
}

// --- Leonardo ---

#[derive(Debug)]
pub struct LeonardoClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl LeonardoClient {
    pub fn new(config: &Config) -> Self {
        Self {
            api_key: config.image.api_key.clone(),
            base_url: config.image.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeonardoGenerationRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    seed: i64,
    num_images: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    controlnets: Vec<LeonardoControlnet<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeonardoControlnet<'a> {
    init_image_id: &'a str,
    init_image_type: &'a str,
    preprocessor_id: u32,
}

#[derive(Deserialize)]
struct LeonardoSubmitResponse {
    #[serde(rename = "sdGenerationJob")]
    job: LeonardoJob,
}

#[derive(Deserialize)]
struct LeonardoJob {
    #[serde(rename = "generationId")]
    generation_id: String,
}

#[derive(Deserialize)]
struct LeonardoPollResponse {
    #[serde(rename = "generations_by_pk")]
    generation: Option<LeonardoGeneration>,
}

#[derive(Deserialize)]
struct LeonardoGeneration {
    status: String,
    #[serde(default)]
    generated_images: Vec<LeonardoImage>,
}

#[derive(Deserialize)]
struct LeonardoImage {
    url: String,
    id: String,
}

// Style-reference preprocessor on Leonardo's controlnet API.
const STYLE_REFERENCE_PREPROCESSOR: u32 = 67;

#[async_trait]
impl ImageGenClient for LeonardoClient {
    async fn submit(&self, job: &GenerationJob) -> Result<String> {
        let controlnets: Vec<LeonardoControlnet> = job
            .context_images
            .iter()
            .map(|ctx| LeonardoControlnet {
                init_image_id: &ctx.id,
                init_image_type: match ctx.kind {
                    ContextKind::Uploaded => "UPLOADED",
                    ContextKind::Generated => "GENERATED",
                },
                preprocessor_id: STYLE_REFERENCE_PREPROCESSOR,
            })
            .collect();

        let body = LeonardoGenerationRequest {
            prompt: &job.prompt,
            width: job.width,
            height: job.height,
            seed: job.seed,
            num_images: 1,
            model_id: job.model_id.as_deref(),
            style_id: job.style_id.as_deref(),
            controlnets,
        };

        let resp = self
            .client
            .post(format!("{}/generations", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Image API error: {}", error_text));
        }

        let result: LeonardoSubmitResponse = resp.json().await?;
        Ok(result.job.generation_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        let resp = self
            .client
            .get(format!("{}/generations/{}", self.base_url, job_id))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Image API poll error: {}", error_text));
        }

        let result: LeonardoPollResponse = resp.json().await?;
        let generation = result
            .generation
            .ok_or_else(|| anyhow!("Image job {} not found on provider", job_id))?;

        match generation.status.as_str() {
            "COMPLETE" => {
                let image = generation
                    .generated_images
                    .first()
                    .ok_or_else(|| anyhow!("Image job {} complete but returned no images", job_id))?;
                Ok(JobStatus::Complete {
                    image_url: image.url.clone(),
                    external_image_id: image.id.clone(),
                })
            }
            "FAILED" | "DECLINED" => Ok(JobStatus::Failed {
                reason: format!("provider reported status {}", generation.status),
            }),
            _ => Ok(JobStatus::Pending),
        }
    }
}

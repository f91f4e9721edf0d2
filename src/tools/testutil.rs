//! Shared mocks for tool tests: a scripted text model, an instant image
//! generator backed by real PNG files on disk, and a disk uploader whose
//! URLs double as file paths.

use crate::config::Config;
use crate::imagegen::{GenerationJob, ImageGenClient, JobStatus};
use crate::llm::{CompletionOptions, TextModelClient};
use crate::store::ComicStore;
use crate::tools::ToolContext;
use crate::uploader::DiskUploader;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Text model that replays queued responses in order.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    text: Mutex<VecDeque<String>>,
    vision: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, response: &str) {
        self.text.lock().unwrap().push_back(response.to_string());
    }

    pub fn push_vision(&self, response: &str) {
        self.vision.lock().unwrap().push_back(response.to_string());
    }
}

/// Responses beginning with `ERROR:` are returned as errors instead.
fn unwrap_scripted(response: Option<String>, kind: &str) -> Result<String> {
    match response {
        Some(r) => match r.strip_prefix("ERROR:") {
            Some(msg) => Err(anyhow!("{}", msg)),
            None => Ok(r),
        },
        None => Err(anyhow!("no scripted {} response left", kind)),
    }
}

#[async_trait]
impl TextModelClient for ScriptedLlm {
    async fn complete_text(
        &self,
        _system: &str,
        _user: &str,
        _opts: CompletionOptions,
    ) -> Result<String> {
        unwrap_scripted(self.text.lock().unwrap().pop_front(), "text")
    }

    async fn complete_vision(
        &self,
        _system: &str,
        _user: &str,
        _image_bytes: &[u8],
        _mime: &str,
        _opts: CompletionOptions,
    ) -> Result<String> {
        unwrap_scripted(self.vision.lock().unwrap().pop_front(), "vision")
    }
}

/// Image generator that completes on the first poll, writing a real PNG
/// under `dir` so downstream stages can fetch it as a local path.
/// `fail_while` maps a prompt substring to a remaining-failure budget:
/// while the budget is positive, matching jobs fail and the budget
/// decrements.
#[derive(Debug)]
pub struct MockImageGen {
    dir: PathBuf,
    counter: AtomicU32,
    jobs: Mutex<HashMap<String, JobStatus>>,
    fail_while: Mutex<HashMap<String, u32>>,
    pub submitted_prompts: Mutex<Vec<String>>,
    pub submitted_context_counts: Mutex<Vec<usize>>,
}

impl MockImageGen {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU32::new(0),
            jobs: Mutex::new(HashMap::new()),
            fail_while: Mutex::new(HashMap::new()),
            submitted_prompts: Mutex::new(Vec::new()),
            submitted_context_counts: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_while(&self, prompt_substring: &str, times: u32) {
        self.fail_while
            .lock()
            .unwrap()
            .insert(prompt_substring.to_string(), times);
    }
}

#[async_trait]
impl ImageGenClient for MockImageGen {
    async fn submit(&self, job: &GenerationJob) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let job_id = format!("job-{}", n);
        self.submitted_prompts.lock().unwrap().push(job.prompt.clone());
        self.submitted_context_counts
            .lock()
            .unwrap()
            .push(job.context_images.len());

        let mut fail = false;
        {
            let mut budgets = self.fail_while.lock().unwrap();
            for (sub, remaining) in budgets.iter_mut() {
                if job.prompt.contains(sub.as_str()) && *remaining > 0 {
                    *remaining -= 1;
                    fail = true;
                    break;
                }
            }
        }

        let status = if fail {
            JobStatus::Failed {
                reason: "provider reported status FAILED".to_string(),
            }
        } else {
            std::fs::create_dir_all(&self.dir).unwrap();
            let path = self.dir.join(format!("gen-{}.png", n));
            tiny_png(&path);
            JobStatus::Complete {
                image_url: path.to_string_lossy().to_string(),
                external_image_id: format!("ext-{}", n),
            }
        };
        self.jobs.lock().unwrap().insert(job_id.clone(), status);
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| anyhow!("Image job {} not found on provider", job_id))
    }
}

pub fn tiny_png(path: &std::path::Path) {
    let img = RgbaImage::from_pixel(8, 8, Rgba([120, 40, 200, 255]));
    img.save(path).unwrap();
}

pub struct TestHarness {
    pub llm: Arc<ScriptedLlm>,
    pub imagegen: Arc<MockImageGen>,
    pub ctx: ToolContext,
}

/// Fully offline context with an empty scripted model.
pub fn context() -> (tempfile::TempDir, ToolContext) {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _, _) = build(dir.path());
    (dir, ctx)
}

/// Context plus handles to the scripted model and image generator.
pub fn harness() -> (tempfile::TempDir, TestHarness) {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, llm, imagegen) = build(dir.path());
    (dir, TestHarness { llm, imagegen, ctx })
}

fn build(root: &std::path::Path) -> (ToolContext, Arc<ScriptedLlm>, Arc<MockImageGen>) {
    let config = Config::for_tests(root);
    let store = Arc::new(ComicStore::new(&config.data_dir).unwrap());
    let llm = Arc::new(ScriptedLlm::new());
    let imagegen = Arc::new(MockImageGen::new(root.join("mockgen")));
    let uploader = Arc::new(DiskUploader::new(
        &config.output_dir,
        &config.uploader.public_base_url,
    ));
    let ctx = ToolContext::new(
        config,
        store,
        Arc::clone(&llm) as Arc<dyn TextModelClient>,
        Arc::clone(&imagegen) as Arc<dyn ImageGenClient>,
        uploader,
    );
    (ctx, llm, imagegen)
}

use crate::error::{EmbedError, Result};
use crate::vector::l2_normalize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

#[cfg(feature = "fastembed")]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
#[cfg(feature = "model2vec")]
use model2vec_rs::model::StaticModel;

#[cfg(feature = "model2vec")]
const POTION_REPO: &str = "minishlab/potion-base-8M";

/// Supported embedding models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelChoice {
    /// AllMiniLML6V2 - 22M params, 384 dims, very fast
    #[default]
    MiniLM,
    /// AllMiniLML12V2 - 33M params, 384 dims
    MiniLML12,
    /// ParaphraseMLMiniLML12V2 - multilingual, 384 dims
    Multilingual,
    /// BGESmallENV15 - 33M params, 384 dims, good balance
    BGESmall,
    /// BGEBaseENV15 - 110M params, 768 dims
    BGEBase,
    /// NomicEmbedTextV15 - 137M params, 768 dims, good quality
    Nomic,
    /// EmbeddingGemma300M - 300M params, 768 dims, highest quality but slowest
    Gemma,
    /// PotionBase8M - 8M params, model2vec backend, tiny and fast
    Potion,
}

impl ModelChoice {
    pub const ALL: [ModelChoice; 8] = [
        ModelChoice::MiniLM,
        ModelChoice::MiniLML12,
        ModelChoice::Multilingual,
        ModelChoice::BGESmall,
        ModelChoice::BGEBase,
        ModelChoice::Nomic,
        ModelChoice::Gemma,
        ModelChoice::Potion,
    ];

    /// Canonical identifier, as sentence-transformers names the model
    pub fn id(self) -> &'static str {
        match self {
            ModelChoice::MiniLM => "all-MiniLM-L6-v2",
            ModelChoice::MiniLML12 => "all-MiniLM-L12-v2",
            ModelChoice::Multilingual => "paraphrase-multilingual-MiniLM-L12-v2",
            ModelChoice::BGESmall => "bge-small-en-v1.5",
            ModelChoice::BGEBase => "bge-base-en-v1.5",
            ModelChoice::Nomic => "nomic-embed-text-v1.5",
            ModelChoice::Gemma => "embeddinggemma-300m",
            ModelChoice::Potion => "potion-base-8M",
        }
    }

    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            ModelChoice::MiniLM => &["minilm", "mini", "fast"],
            ModelChoice::MiniLML12 => &["minilm-l12"],
            ModelChoice::Multilingual => &["multilingual", "paraphrase"],
            ModelChoice::BGESmall => &["bge", "bge-small", "bgesmall"],
            ModelChoice::BGEBase => &["bge-base"],
            ModelChoice::Nomic => &["nomic"],
            ModelChoice::Gemma => &["gemma", "embeddinggemma"],
            ModelChoice::Potion => &["potion", "potion8m", "potion-8m", "model2vec"],
        }
    }

    pub fn backend(self) -> BackendKind {
        match self {
            ModelChoice::Potion => BackendKind::Model2Vec,
            _ => BackendKind::Fastembed,
        }
    }

    /// Output width, when it is fixed ahead of loading
    pub fn dims(self) -> Option<usize> {
        match self {
            ModelChoice::MiniLM
            | ModelChoice::MiniLML12
            | ModelChoice::Multilingual
            | ModelChoice::BGESmall => Some(384),
            ModelChoice::BGEBase | ModelChoice::Nomic | ModelChoice::Gemma => Some(768),
            ModelChoice::Potion => None,
        }
    }

    #[cfg(feature = "fastembed")]
    fn fastembed_config(self) -> Option<(EmbeddingModel, usize)> {
        let model = match self {
            ModelChoice::MiniLM => EmbeddingModel::AllMiniLML6V2,
            ModelChoice::MiniLML12 => EmbeddingModel::AllMiniLML12V2,
            ModelChoice::Multilingual => EmbeddingModel::ParaphraseMLMiniLML12V2,
            ModelChoice::BGESmall => EmbeddingModel::BGESmallENV15,
            ModelChoice::BGEBase => EmbeddingModel::BGEBaseENV15,
            ModelChoice::Nomic => EmbeddingModel::NomicEmbedTextV15,
            ModelChoice::Gemma => EmbeddingModel::EmbeddingGemma300M,
            ModelChoice::Potion => return None,
        };
        Some((model, self.dims()?))
    }

    /// Parse a model identifier. Matching ignores case and any organisation
    /// prefix, so `sentence-transformers/all-MiniLM-L6-v2` resolves too.
    pub fn parse(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        let name = key.rsplit_once('/').map_or(key.as_str(), |(_, name)| name);
        Self::ALL
            .into_iter()
            .find(|choice| choice.id().to_lowercase() == name || choice.aliases().contains(&name))
            .ok_or_else(|| EmbedError::UnknownModel {
                name: s.to_string(),
                options: Self::ALL
                    .iter()
                    .map(|c| c.id())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Embedding libraries this binary can be built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Fastembed,
    Model2Vec,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Fastembed => "fastembed",
            BackendKind::Model2Vec => "model2vec",
        }
    }

    /// Cargo feature that compiles the backend in
    pub fn feature(self) -> &'static str {
        match self {
            BackendKind::Fastembed => "fastembed",
            BackendKind::Model2Vec => "model2vec",
        }
    }

    pub fn is_available(self) -> bool {
        match self {
            BackendKind::Fastembed => cfg!(feature = "fastembed"),
            BackendKind::Model2Vec => cfg!(feature = "model2vec"),
        }
    }

    pub fn missing(self) -> EmbedError {
        EmbedError::DependencyMissing {
            backend: self.name(),
            feature: self.feature(),
        }
    }
}

/// Knobs handed to the backend when a model is loaded
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub cache_dir: Option<PathBuf>,
    pub max_length: Option<usize>,
    pub batch_size: Option<usize>,
    pub threads: Option<usize>,
}

/// A loaded model. Implementations return one vector per input, in order.
pub trait TextEmbedder {
    fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Acquires a model. Fails with `DependencyMissing` when the backend the
/// model needs cannot be provided.
pub trait BackendLoader {
    fn load(&self, choice: ModelChoice, opts: &LoadOptions) -> Result<EmbedderHandle>;
}

pub struct EmbedderHandle {
    backend: Box<dyn TextEmbedder>,
    pub dims: usize,
}

impl EmbedderHandle {
    pub fn new(backend: Box<dyn TextEmbedder>, dims: usize) -> Self {
        Self { backend, dims }
    }

    /// Embed `texts` and return unit-length vectors of width `dims`. A text
    /// the model maps to all zeros (model2vec on `""`) stays all zeros.
    pub fn embed_texts(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut embeddings = self.backend.embed(texts)?;
        if embeddings.len() != texts.len() {
            return Err(EmbedError::Inference(format!(
                "backend returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        for emb in &mut embeddings {
            if emb.len() != self.dims {
                return Err(EmbedError::Inference(format!(
                    "expected {}-dimensional vectors, got {}",
                    self.dims,
                    emb.len()
                )));
            }
            l2_normalize(emb);
        }
        Ok(embeddings)
    }
}

/// Loads models from the backends compiled into this binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalLoader;

impl BackendLoader for LocalLoader {
    fn load(&self, choice: ModelChoice, opts: &LoadOptions) -> Result<EmbedderHandle> {
        let start = Instant::now();
        info!(model = choice.id(), backend = choice.backend().name(), "loading model");
        let handle = match choice.backend() {
            BackendKind::Fastembed => load_fastembed(choice, opts)?,
            BackendKind::Model2Vec => load_model2vec(choice, opts)?,
        };
        debug!(
            model = choice.id(),
            dims = handle.dims,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "model ready"
        );
        Ok(handle)
    }
}

fn load_error(choice: ModelChoice, err: impl std::fmt::Display) -> EmbedError {
    EmbedError::ModelLoad {
        model: choice.id().to_string(),
        reason: err.to_string(),
    }
}

/// Create the configured weight cache, if any.
fn prepare_cache_dir(choice: ModelChoice, opts: &LoadOptions) -> Result<Option<&Path>> {
    match &opts.cache_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| load_error(choice, e))?;
            Ok(Some(dir.as_path()))
        }
        None => Ok(None),
    }
}

/// Accelerator registered with ONNX Runtime; `None` means plain CPU.
pub fn accelerator() -> Option<&'static str> {
    if cfg!(target_os = "macos") {
        Some("coreml")
    } else if cfg!(feature = "cuda") {
        Some("cuda")
    } else {
        None
    }
}

#[cfg(all(feature = "fastembed", target_os = "macos"))]
fn execution_provider() -> Option<ort::execution_providers::ExecutionProviderDispatch> {
    use ort::execution_providers::coreml::{CoreMLComputeUnits, CoreMLExecutionProvider};
    let compute_units = std::env::var("SEMANTIC_EMBED_COMPUTE_UNITS")
        .ok()
        .map(|v| match v.to_lowercase().as_str() {
            "ane" | "neural" | "neuralengine" => CoreMLComputeUnits::CPUAndNeuralEngine,
            "gpu" => CoreMLComputeUnits::CPUAndGPU,
            "cpu" => CoreMLComputeUnits::CPUOnly,
            _ => CoreMLComputeUnits::All,
        })
        .unwrap_or(CoreMLComputeUnits::All);
    let provider = CoreMLExecutionProvider::default()
        .with_subgraphs(true)
        .with_compute_units(compute_units);
    Some(provider.build())
}

#[cfg(all(feature = "cuda", not(target_os = "macos")))]
fn execution_provider() -> Option<ort::execution_providers::ExecutionProviderDispatch> {
    use ort::execution_providers::CUDAExecutionProvider;
    Some(CUDAExecutionProvider::default().build())
}

#[cfg(all(feature = "fastembed", not(feature = "cuda"), not(target_os = "macos")))]
fn execution_provider() -> Option<ort::execution_providers::ExecutionProviderDispatch> {
    None
}

#[cfg(feature = "fastembed")]
struct FastembedEmbedder {
    model: TextEmbedding,
    batch_size: Option<usize>,
}

#[cfg(feature = "fastembed")]
impl TextEmbedder for FastembedEmbedder {
    fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.model
            .embed(texts, self.batch_size)
            .map_err(|e| EmbedError::Inference(e.to_string()))
    }
}

#[cfg(feature = "fastembed")]
fn load_fastembed(choice: ModelChoice, opts: &LoadOptions) -> Result<EmbedderHandle> {
    let (model_type, dims) = choice
        .fastembed_config()
        .ok_or_else(|| load_error(choice, "not a fastembed model"))?;

    // Set thread count for ONNX Runtime
    let num_threads = opts.threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(8)
    });
    // SAFETY: runs before any backend threads exist; the process is single-threaded here.
    unsafe {
        std::env::set_var("OMP_NUM_THREADS", num_threads.to_string());
        std::env::set_var("ORT_NUM_THREADS", num_threads.to_string());
    }

    let mut init = InitOptions::new(model_type).with_show_download_progress(false);
    if let Some(provider) = execution_provider() {
        init = init.with_execution_providers(vec![provider]);
    }
    if let Some(dir) = prepare_cache_dir(choice, opts)? {
        init = init.with_cache_dir(dir.to_path_buf());
    }
    if let Some(max_length) = opts.max_length {
        init = init.with_max_length(max_length);
    }

    debug!(accelerator = accelerator().unwrap_or("cpu"), "creating onnx session");
    let model = TextEmbedding::try_new(init).map_err(|e| load_error(choice, e))?;
    Ok(EmbedderHandle::new(
        Box::new(FastembedEmbedder {
            model,
            batch_size: opts.batch_size,
        }),
        dims,
    ))
}

#[cfg(not(feature = "fastembed"))]
fn load_fastembed(_choice: ModelChoice, _opts: &LoadOptions) -> Result<EmbedderHandle> {
    Err(BackendKind::Fastembed.missing())
}

#[cfg(feature = "model2vec")]
struct Model2VecEmbedder {
    model: StaticModel,
    max_length: Option<usize>,
    batch_size: usize,
}

#[cfg(feature = "model2vec")]
impl TextEmbedder for Model2VecEmbedder {
    fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let input: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        Ok(self
            .model
            .encode_with_args(&input, self.max_length, self.batch_size))
    }
}

#[cfg(feature = "model2vec")]
fn load_model2vec(choice: ModelChoice, opts: &LoadOptions) -> Result<EmbedderHandle> {
    if let Some(dir) = prepare_cache_dir(choice, opts)? {
        point_hf_hub_at(dir);
    }
    let model = StaticModel::from_pretrained(POTION_REPO, None, Some(true), None)
        .map_err(|e| load_error(choice, e))?;
    let dims = model
        .encode(&[String::from("dimension_check")])
        .first()
        .map(|vec| vec.len())
        .ok_or_else(|| load_error(choice, "no embedding returned"))?;
    Ok(EmbedderHandle::new(
        Box::new(Model2VecEmbedder {
            model,
            max_length: Some(opts.max_length.unwrap_or(512)),
            batch_size: opts.batch_size.unwrap_or(64),
        }),
        dims,
    ))
}

/// model2vec-rs downloads through hf-hub, which takes its cache root from `HF_HOME`.
#[cfg(feature = "model2vec")]
fn point_hf_hub_at(dir: &Path) {
    // SAFETY: runs before any backend threads exist; the process is single-threaded here.
    unsafe {
        std::env::set_var("HF_HOME", dir);
    }
}

#[cfg(not(feature = "model2vec"))]
fn load_model2vec(_choice: ModelChoice, _opts: &LoadOptions) -> Result<EmbedderHandle> {
    Err(BackendKind::Model2Vec.missing())
}

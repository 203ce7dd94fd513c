use crate::config::RuntimeConfig;
use crate::delegate::ComputeDelegate;
use crate::engine::{Engine, installed_engine};
use crate::error::{EngineNotAvailableError, InvalidSourceError, LoadError};
use crate::model::ModelHandle;
use crate::source::{
    AssetResolver, ByteFetcher, DefaultFetcher, ModelSource, NoAssetResolver, ResolvedSource,
    SizeLimitExceeded, parse_uri,
};
use crate::{print_debug, print_info};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Turns model sources into [`ModelHandle`]s.
///
/// This is the only place where model bytes are read and the engine is initialized. Loading is
/// blocking; use [`spawn_load`](Self::spawn_load) or a [`ModelSlot`](crate::ModelSlot) to keep it
/// off latency-sensitive threads.
#[derive(Clone)]
pub struct ModelLoader {
    engine: Arc<dyn Engine>,
    resolver: Arc<dyn AssetResolver>,
    fetcher: Arc<dyn ByteFetcher>,
    max_model_bytes: Option<u64>,
    default_delegate: ComputeDelegate,
}

impl ModelLoader {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            resolver: Arc::new(NoAssetResolver),
            fetcher: Arc::new(DefaultFetcher::new()),
            max_model_bytes: None,
            default_delegate: ComputeDelegate::Default,
        }
    }

    /// A loader using the engine installed with
    /// [`ensure_engine_installed`](crate::ensure_engine_installed).
    pub fn from_installed() -> Result<Self, EngineNotAvailableError> {
        Ok(Self::new(installed_engine()?))
    }

    /// A loader with the fetcher, size limit and default delegate taken from `config`.
    pub fn from_config(engine: Arc<dyn Engine>, config: &RuntimeConfig) -> Self {
        Self::new(engine)
            .with_fetcher(Arc::new(DefaultFetcher::with_user_agent(
                config.user_agent.clone(),
            )))
            .with_max_model_bytes(config.max_model_bytes)
            .with_default_delegate(config.default_delegate)
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AssetResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ByteFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_max_model_bytes(mut self, limit: Option<u64>) -> Self {
        self.max_model_bytes = limit;
        self
    }

    /// Delegate used by [`load_default`](Self::load_default) and
    /// [`ModelSlot::request_default`](crate::ModelSlot::request_default).
    pub fn with_default_delegate(mut self, delegate: ComputeDelegate) -> Self {
        self.default_delegate = delegate;
        self
    }

    pub fn default_delegate(&self) -> ComputeDelegate {
        self.default_delegate
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Resolve a source to something fetchable, without reading any model bytes.
    ///
    /// Bundled assets go through the asset resolver first. URIs are validated as they are.
    pub fn resolve(&self, source: &ModelSource) -> Result<ResolvedSource, LoadError> {
        let uri = match source {
            ModelSource::BundledAsset(asset) => {
                let uri = self
                    .resolver
                    .resolve(*asset)
                    .map_err(|reason| LoadError::AssetResolution {
                        asset: *asset,
                        reason,
                    })?;
                print_debug!("Resolved {asset} to \"{uri}\"");
                uri
            }
            ModelSource::Uri(uri) => uri.clone(),
        };
        Ok(parse_uri(&uri)?)
    }

    /// Load a model and compile it for `delegate`.
    pub fn load(
        &self,
        source: &ModelSource,
        delegate: ComputeDelegate,
    ) -> Result<ModelHandle, LoadError> {
        let start = Instant::now();
        let resolved = self.resolve(source)?;
        let uri = resolved.to_string();

        if !self.engine.supports(delegate) {
            return Err(LoadError::UnsupportedDelegate {
                delegate,
                engine: self.engine.name().to_string(),
            });
        }

        print_info!("Loading model from \"{uri}\" with delegate \"{delegate}\"...");
        let bytes = self
            .fetcher
            .fetch(&resolved, self.max_model_bytes)
            .map_err(|reason| match reason.downcast_ref::<SizeLimitExceeded>() {
                Some(exceeded) => LoadError::TooLarge {
                    uri: uri.clone(),
                    size: exceeded.size,
                    limit: exceeded.limit,
                },
                None => LoadError::Fetch {
                    uri: uri.clone(),
                    reason,
                },
            })?;

        if let Some(limit) = self.max_model_bytes {
            let size = bytes.len() as u64;
            if size > limit {
                return Err(LoadError::TooLarge { uri, size, limit });
            }
        }

        print_debug!("Model buffer is {} bytes, compiling...", bytes.len());
        let interpreter = self
            .engine
            .compile(bytes, delegate)
            .map_err(|cause| LoadError::Compile {
                uri: uri.clone(),
                cause,
            })?;

        let model = ModelHandle::from_interpreter(interpreter, delegate, uri);
        print_info!(
            "Successfully loaded model in {} ms ({} inputs, {} outputs)",
            start.elapsed().as_millis(),
            model.inputs().len(),
            model.outputs().len()
        );
        Ok(model)
    }

    /// Load a model with the default delegate, the CPU unless configured otherwise.
    pub fn load_default(&self, source: &ModelSource) -> Result<ModelHandle, LoadError> {
        self.load(source, self.default_delegate)
    }

    /// Load a model on a background thread.
    ///
    /// URI sources are validated before the thread is spawned, so a malformed URI fails here and
    /// nothing is fetched.
    pub fn spawn_load(
        &self,
        source: ModelSource,
        delegate: ComputeDelegate,
    ) -> Result<LoadJob, InvalidSourceError> {
        if let ModelSource::Uri(uri) = &source {
            parse_uri(uri)?;
        }
        let loader = self.clone();
        let join = std::thread::spawn(move || loader.load(&source, delegate));
        Ok(LoadJob { join: Some(join) })
    }
}

/// A model load running on a background thread.
pub struct LoadJob {
    join: Option<JoinHandle<Result<ModelHandle, LoadError>>>,
}

impl LoadJob {
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn wait(mut self) -> Result<ModelHandle, LoadError> {
        match self.join.take() {
            Some(join) => join.join().unwrap_or_else(|e| {
                Err(LoadError::ThreadPanicked(format!(
                    "Loading thread panicked: {e:?}"
                )))
            }),
            None => Err(LoadError::ThreadPanicked(
                "Load result was already taken".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CompileError;
    use crate::tensor::ElementType;
    use crate::testing::{CountingResolver, MemoryFetcher, TestEngine, TestModel};

    const DETECTOR_URI: &str = "http://models.test/detector.tflite";

    fn loader_with(engine: Arc<TestEngine>, fetcher: Arc<MemoryFetcher>) -> ModelLoader {
        ModelLoader::new(engine).with_fetcher(fetcher)
    }

    #[test]
    fn loads_and_captures_descriptors() {
        crate::logging::init_test_logger();
        let fetcher =
            Arc::new(MemoryFetcher::new().with_file(DETECTOR_URI, TestModel::detector().to_bytes()));
        let loader = loader_with(Arc::new(TestEngine::new()), fetcher.clone());

        let model = loader.load_default(&ModelSource::uri(DETECTOR_URI)).unwrap();

        assert_eq!(model.delegate(), ComputeDelegate::Default);
        assert_eq!(model.label(), DETECTOR_URI);
        assert_eq!(model.inputs()[0].shape(), &[1, 320, 320, 3]);
        assert_eq!(model.inputs()[0].element_type(), ElementType::Float32);
        assert_eq!(model.outputs()[0].shape(), &[1, 10]);
        assert_eq!(fetcher.fetches(), 1);
    }

    #[test]
    fn bundled_assets_go_through_the_resolver() {
        let uri = CountingResolver::uri_for(crate::AssetId(3));
        let fetcher = Arc::new(MemoryFetcher::new().with_file(&uri, TestModel::detector().to_bytes()));
        let resolver = Arc::new(CountingResolver::default());
        let loader = loader_with(Arc::new(TestEngine::new()), fetcher.clone())
            .with_resolver(resolver.clone());

        let model = loader.load_default(&ModelSource::asset(3)).unwrap();
        assert_eq!(model.label(), uri);
        assert_eq!(resolver.lookups(), 1);
        assert_eq!(fetcher.fetches(), 1);
    }

    #[test]
    fn missing_resolver_is_a_load_error() {
        let loader = loader_with(Arc::new(TestEngine::new()), Arc::new(MemoryFetcher::new()));
        assert!(matches!(
            loader.load_default(&ModelSource::asset(1)),
            Err(LoadError::AssetResolution { .. })
        ));
    }

    #[test]
    fn unreachable_uri_is_a_fetch_error() {
        let loader = loader_with(Arc::new(TestEngine::new()), Arc::new(MemoryFetcher::new()));
        let err = loader
            .load_default(&ModelSource::uri("https://models.test/missing.tflite"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Fetch { .. }));
        assert!(err.to_string().contains("missing.tflite"));
    }

    #[test]
    fn garbage_bytes_fail_to_compile() {
        let fetcher = Arc::new(MemoryFetcher::new().with_file(DETECTOR_URI, b"not a model".to_vec()));
        let loader = loader_with(Arc::new(TestEngine::new()), fetcher);
        assert!(matches!(
            loader.load_default(&ModelSource::uri(DETECTOR_URI)),
            Err(LoadError::Compile {
                cause: CompileError::InvalidModel(_),
                ..
            })
        ));
    }

    #[test]
    fn platform_delegates_are_checked_before_fetching() {
        let fetcher =
            Arc::new(MemoryFetcher::new().with_file(DETECTOR_URI, TestModel::detector().to_bytes()));
        let engine = Arc::new(TestEngine::with_delegates(&[ComputeDelegate::Default]));
        let loader = loader_with(engine.clone(), fetcher.clone());

        let err = loader
            .load(&ModelSource::uri(DETECTOR_URI), ComputeDelegate::Metal)
            .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedDelegate { .. }));
        assert!(err.is_delegate_error());
        assert_eq!(fetcher.fetches(), 0);
        assert_eq!(engine.compiles(), 0);
    }

    #[test]
    fn model_delegates_are_checked_on_compile() {
        let fetcher =
            Arc::new(MemoryFetcher::new().with_file(DETECTOR_URI, TestModel::detector().to_bytes()));
        let loader = loader_with(Arc::new(TestEngine::new()), fetcher);

        let err = loader
            .load(&ModelSource::uri(DETECTOR_URI), ComputeDelegate::CoreMl)
            .unwrap_err();
        assert!(err.is_delegate_error());
    }

    #[test]
    fn size_limit_is_enforced() {
        let bytes = TestModel::detector().to_bytes();
        let limit = bytes.len() as u64 - 1;
        let fetcher = Arc::new(MemoryFetcher::new().with_file(DETECTOR_URI, bytes));
        let engine = Arc::new(TestEngine::new());
        let loader =
            loader_with(engine.clone(), fetcher).with_max_model_bytes(Some(limit));

        assert!(matches!(
            loader.load_default(&ModelSource::uri(DETECTOR_URI)),
            Err(LoadError::TooLarge { .. })
        ));
        assert_eq!(engine.compiles(), 0);
    }

    #[test]
    fn spawn_load_rejects_malformed_uris_eagerly() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let loader = loader_with(Arc::new(TestEngine::new()), fetcher.clone());
        assert!(
            loader
                .spawn_load(ModelSource::uri("model.tflite"), ComputeDelegate::Default)
                .is_err()
        );
        assert_eq!(fetcher.fetches(), 0);
    }

    #[test]
    fn spawn_load_delivers_the_handle() {
        let fetcher =
            Arc::new(MemoryFetcher::new().with_file(DETECTOR_URI, TestModel::detector().to_bytes()));
        let loader = loader_with(Arc::new(TestEngine::new()), fetcher);

        let job = loader
            .spawn_load(ModelSource::uri(DETECTOR_URI), ComputeDelegate::Default)
            .unwrap();
        let model = job.wait().unwrap();
        assert_eq!(model.outputs().len(), 1);
    }

    #[test]
    fn config_picks_the_default_delegate() {
        let config = RuntimeConfig::from_toml_str(r#"default_delegate = "metal""#).unwrap();
        let loader = ModelLoader::from_config(Arc::new(TestEngine::new()), &config)
            .with_fetcher(Arc::new(MemoryFetcher::new().with_file(
                DETECTOR_URI,
                TestModel::detector()
                    .delegates(&[ComputeDelegate::Metal])
                    .to_bytes(),
            )));

        assert_eq!(loader.default_delegate(), ComputeDelegate::Metal);
        let model = loader.load_default(&ModelSource::uri(DETECTOR_URI)).unwrap();
        assert_eq!(model.delegate(), ComputeDelegate::Metal);
    }

    #[test]
    fn config_applies_size_limit() {
        let config = RuntimeConfig {
            max_model_bytes: Some(0),
            ..RuntimeConfig::default()
        };
        let file = std::env::temp_dir().join(format!("fast-tflite-cfg-{}.tflite", std::process::id()));
        std::fs::write(&file, TestModel::detector().to_bytes()).unwrap();
        let uri = format!("file://{}", file.display());

        let loader = ModelLoader::from_config(Arc::new(TestEngine::new()), &config);
        assert!(matches!(
            loader.load_default(&ModelSource::uri(uri)),
            Err(LoadError::TooLarge { limit: 0, .. })
        ));
        let _ = std::fs::remove_file(file);
    }
}

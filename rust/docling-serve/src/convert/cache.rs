//! Options fingerprinting and the bounded converter cache.
//!
//! Converters are expensive to build (model loading, pipeline warm-up), so
//! ready instances are memoised under a stable hash of the resolved pipeline
//! options. The cache is a bounded LRU; evicted entries merely drop the
//! reference, so an in-flight worker holding one stays safe.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::convert::engine::{
    ConversionEngine, ConversionResult, ConvertLimits, EngineError, EngineFactory, EngineSource,
};
use crate::convert::PipelineSpec;

/// Stable cache key of a resolved pipeline.
pub type OptionsFingerprint = [u8; 32];

/// Compute the fingerprint of a pipeline spec.
///
/// The spec is serialized through `serde_json::Value`, whose object maps are
/// key-sorted, so equal specs hash to identical bytes regardless of field
/// ordering.
#[must_use]
pub fn fingerprint(spec: &PipelineSpec) -> OptionsFingerprint {
    let value = serde_json::to_value(spec).expect("pipeline spec serializes");
    let canonical = value.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    digest.into()
}

/// A cached engine instance plus the serialisation guard for engines that
/// are not safe for concurrent calls.
pub struct Converter {
    engine: Arc<dyn ConversionEngine>,
    guard: Option<Mutex<()>>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("serialized", &self.guard.is_some())
            .finish()
    }
}

impl Converter {
    fn new(engine: Arc<dyn ConversionEngine>) -> Self {
        let guard = if engine.is_concurrent_safe() {
            None
        } else {
            Some(Mutex::new(()))
        };
        Self { engine, guard }
    }

    /// Run a conversion, serialising per instance when the engine requires it.
    pub fn convert_all(
        &self,
        sources: &[EngineSource],
        headers: Option<&HashMap<String, String>>,
        limits: &ConvertLimits,
    ) -> Vec<ConversionResult> {
        let _serial = self.guard.as_ref().map(Mutex::lock);
        self.engine.convert_all(sources, headers, limits)
    }
}

/// Bounded LRU of ready converter instances keyed by options fingerprint.
pub struct ConverterCache {
    factory: Arc<dyn EngineFactory>,
    entries: Mutex<LruCache<OptionsFingerprint, Arc<Converter>>>,
}

impl std::fmt::Debug for ConverterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterCache")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

impl ConverterCache {
    /// Create a cache of the given capacity (minimum 1).
    #[must_use]
    pub fn new(factory: Arc<dyn EngineFactory>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            factory,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch the converter for `spec`, building and inserting it on a miss.
    ///
    /// Construction happens under the cache lock so concurrent callers with
    /// the same options never build the instance twice.
    pub fn get_or_build(&self, spec: &PipelineSpec) -> Result<Arc<Converter>, EngineError> {
        let key = fingerprint(spec);
        let mut entries = self.entries.lock();
        if let Some(converter) = entries.get(&key) {
            tracing::debug!(fingerprint = %hex(&key), "Converter cache hit");
            return Ok(Arc::clone(converter));
        }

        tracing::info!(
            fingerprint = %hex(&key),
            pipeline = %spec.pipeline_cls,
            backend = %spec.backend,
            "Converter cache miss, building new converter"
        );
        let engine = self.factory.build(spec)?;
        let converter = Arc::new(Converter::new(engine));
        entries.put(key, Arc::clone(&converter));
        Ok(converter)
    }

    /// Evict every cached converter.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let evicted = entries.len();
        entries.clear();
        tracing::info!(evicted, "Converter cache cleared");
    }

    /// Number of cached converters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DoclingServeSettings;
    use crate::convert::builtin::BasicEngineFactory;
    use crate::convert::prepare_pipeline;
    use crate::datamodel::convert::{ConvertDocumentsOptions, PictureDescriptionApi};

    fn spec_for(options: &ConvertDocumentsOptions) -> PipelineSpec {
        prepare_pipeline(options, &DoclingServeSettings::default())
    }

    #[test]
    fn options_cache_key_changes_with_recognised_fields() {
        let mut hashes = Vec::new();

        let mut opts = ConvertDocumentsOptions::default();
        hashes.push(fingerprint(&spec_for(&opts)));

        opts.do_picture_description = true;
        let hash = fingerprint(&spec_for(&opts));
        assert!(!hashes.contains(&hash));
        hashes.push(hash);

        let mut params = serde_json::Map::new();
        params.insert("model".to_string(), serde_json::json!("mymodel"));
        opts.picture_description_api = Some(PictureDescriptionApi {
            url: "http://localhost".parse().unwrap(),
            headers: HashMap::new(),
            params,
            timeout: None,
            prompt: Some("Hello 1".to_string()),
        });
        let hash = fingerprint(&spec_for(&opts));
        assert!(!hashes.contains(&hash));
        hashes.push(hash);

        let mut params = serde_json::Map::new();
        params.insert("model".to_string(), serde_json::json!("your-model"));
        opts.picture_description_api.as_mut().unwrap().params = params;
        let hash = fingerprint(&spec_for(&opts));
        assert!(!hashes.contains(&hash));
        hashes.push(hash);

        opts.picture_description_api.as_mut().unwrap().prompt = Some("World".to_string());
        let hash = fingerprint(&spec_for(&opts));
        assert!(!hashes.contains(&hash));
    }

    #[test]
    fn semantically_equal_options_share_a_fingerprint() {
        let a: ConvertDocumentsOptions = serde_json::from_str("{}").unwrap();
        let b = ConvertDocumentsOptions::default();
        assert_eq!(fingerprint(&spec_for(&a)), fingerprint(&spec_for(&b)));
    }

    #[test]
    fn cache_reuses_and_evicts_by_lru() {
        let cache = ConverterCache::new(Arc::new(BasicEngineFactory::default()), 2);

        let default_spec = spec_for(&ConvertDocumentsOptions::default());
        let first = cache.get_or_build(&default_spec).unwrap();
        let again = cache.get_or_build(&default_spec).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.len(), 1);

        let mut opts = ConvertDocumentsOptions::default();
        opts.do_ocr = false;
        cache.get_or_build(&spec_for(&opts)).unwrap();
        opts.force_ocr = true;
        cache.get_or_build(&spec_for(&opts)).unwrap();
        // Capacity 2: the default-options converter was evicted.
        assert_eq!(cache.len(), 2);

        let rebuilt = cache.get_or_build(&default_spec).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
    }

    #[test]
    fn clear_evicts_everything() {
        let cache = ConverterCache::new(Arc::new(BasicEngineFactory::default()), 2);
        cache
            .get_or_build(&spec_for(&ConvertDocumentsOptions::default()))
            .unwrap();
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }
}

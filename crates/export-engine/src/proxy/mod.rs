//! Proxy service.
//!
//! Produces downscaled stand-ins for oversized source media. Proxies are
//! cached on disk under `<cache_dir>/<kind>/<key>.mp4`, where the key is a
//! hash of the absolute source path, target box, kind, fps and
//! [`FORMAT_VERSION`]. At most one generation runs per key; concurrent
//! callers for the same key share its result.

pub mod preset;
pub mod tiers;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use framecast_common::error::FramecastResult;

use crate::fallback::{first_success, Attempt};
use crate::hardware::HardwareEncoder;
use crate::probe::MediaProber;
use crate::session::CancelToken;
use crate::transcoder::Transcoder;

pub use preset::{fit_dimensions, ProxyKind, ProxyOptions, ProxyOverrides, ProxyPreset, ResolvedProxySettings};
use tiers::{tiers_for, ScaleTarget, TierAttempt};

/// Bumped whenever proxy encoding changes, invalidating older cache entries.
pub const FORMAT_VERSION: &str = "fc-proxy-v2";

/// Outcome of a proxy request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

impl ProxyResult {
    pub fn ready(path: PathBuf) -> Self {
        Self {
            success: true,
            proxy_path: Some(path),
            error: None,
            skipped: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            success: true,
            proxy_path: None,
            error: None,
            skipped: true,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            proxy_path: None,
            error: Some(error.into()),
            skipped: false,
        }
    }
}

type InFlight = Arc<OnceCell<ProxyResult>>;

/// Proxy generation and cache maintenance.
pub struct ProxyService {
    cache_dir: PathBuf,
    transcoder: Arc<dyn Transcoder>,
    prober: Arc<dyn MediaProber>,
    hardware_encoder: Option<HardwareEncoder>,
    /// Entries validated during this process lifetime: key -> (kind, path).
    validated: Mutex<HashMap<String, (ProxyKind, PathBuf)>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl ProxyService {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        transcoder: Arc<dyn Transcoder>,
        prober: Arc<dyn MediaProber>,
        hardware_encoder: Option<HardwareEncoder>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            transcoder,
            prober,
            hardware_encoder,
            validated: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Return a valid proxy for `input`, generating it if needed.
    ///
    /// Never fails hard: errors come back as `ProxyResult { success: false }`
    /// so callers can fall back to the original media.
    ///
    /// Kinds with a skip width (glow) decide the skip from
    /// `options.source_width`/`source_height` without running anything.
    /// When the size is not given the source is probed first.
    pub async fn ensure_proxy(
        &self,
        input: &Path,
        options: &ProxyOptions,
        cancel: &CancelToken,
    ) -> ProxyResult {
        let source = match std::fs::canonicalize(input) {
            Ok(path) => path,
            Err(_) => return ProxyResult::failed(format!("source not found: {}", input.display())),
        };
        let settings = options.resolve();
        let key = cache_key(&source, &settings);
        let proxy_path = self.proxy_path(settings.kind, &key);

        if self.is_known_valid(&key, &source, settings.min_valid_bytes)
            || is_valid_cache(&proxy_path, &source, settings.min_valid_bytes)
        {
            self.remember(&key, settings.kind, &proxy_path);
            tracing::debug!(kind = %settings.kind, path = %proxy_path.display(), "Proxy cache hit");
            return ProxyResult::ready(proxy_path);
        }

        let cell = self.in_flight_cell(&key);
        let result = cell
            .get_or_init(|| self.generate(&source, options, &settings, &key, &proxy_path, cancel))
            .await
            .clone();

        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight.get(&key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                in_flight.remove(&key);
            }
        }
        result
    }

    fn in_flight_cell(&self, key: &str) -> InFlight {
        match self.in_flight.lock() {
            Ok(mut map) => map.entry(key.to_string()).or_default().clone(),
            Err(_) => Arc::new(OnceCell::new()),
        }
    }

    async fn generate(
        &self,
        source: &Path,
        options: &ProxyOptions,
        settings: &ResolvedProxySettings,
        key: &str,
        proxy_path: &Path,
        cancel: &CancelToken,
    ) -> ProxyResult {
        // A generation for this key may have finished after our cache check.
        if is_valid_cache(proxy_path, source, settings.min_valid_bytes) {
            self.remember(key, settings.kind, proxy_path);
            tracing::debug!(kind = %settings.kind, path = %proxy_path.display(), "Proxy finished by another request");
            return ProxyResult::ready(proxy_path.to_path_buf());
        }

        let source_size = match (options.source_width, options.source_height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => match self.prober.probe(source).await {
                Ok(info) => Some((info.width, info.height)),
                Err(e) => {
                    tracing::debug!(source = %source.display(), error = %e, "Probe failed, scaling by box");
                    None
                }
            },
        };

        if let (Some(min_width), Some((width, _))) = (settings.skip_below_width, source_size) {
            if width < min_width {
                tracing::debug!(kind = %settings.kind, width, min_width, "Source already small, skipping proxy");
                return ProxyResult::skipped();
            }
        }

        match self.run_tiers(source, settings, source_size, proxy_path, cancel).await {
            Ok(size) => {
                self.remember(key, settings.kind, proxy_path);
                tracing::info!(
                    kind = %settings.kind,
                    source = %source.display(),
                    proxy = %proxy_path.display(),
                    bytes = size,
                    "Proxy generated"
                );
                ProxyResult::ready(proxy_path.to_path_buf())
            }
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::warn!(kind = %settings.kind, source = %source.display(), error = %e, "Proxy generation failed");
                }
                ProxyResult::failed(e.to_string())
            }
        }
    }

    async fn run_tiers(
        &self,
        source: &Path,
        settings: &ResolvedProxySettings,
        source_size: Option<(u32, u32)>,
        proxy_path: &Path,
        cancel: &CancelToken,
    ) -> FramecastResult<u64> {
        let dir = proxy_path.parent().unwrap_or(&self.cache_dir);
        std::fs::create_dir_all(dir)?;

        let scale = match source_size {
            Some(size) => {
                let (w, h) = fit_dimensions(size, (settings.max_width, settings.max_height));
                ScaleTarget::Exact(w, h)
            }
            None => ScaleTarget::Fit(settings.max_width, settings.max_height),
        };

        // Written next to the final file and renamed once complete, so an
        // interrupted transcode never looks like a cache entry.
        let partial = proxy_path.with_extension("partial.mp4");
        let attempts: Vec<TierAttempt<'_>> = tiers_for(self.hardware_encoder)
            .into_iter()
            .map(|tier| TierAttempt {
                tier,
                transcoder: self.transcoder.as_ref(),
                args: tier.args(source, &partial, settings, scale),
                output: partial.clone(),
                min_valid_bytes: settings.min_valid_bytes,
                cancel,
            })
            .collect();
        let chain: Vec<&dyn Attempt<Output = u64>> =
            attempts.iter().map(|a| a as &dyn Attempt<Output = u64>).collect();

        let size = first_success(&chain, cancel).await;
        match size {
            Ok(size) => {
                std::fs::rename(&partial, proxy_path)?;
                Ok(size)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                Err(e)
            }
        }
    }

    fn proxy_path(&self, kind: ProxyKind, key: &str) -> PathBuf {
        self.cache_dir.join(kind.as_str()).join(format!("{key}.mp4"))
    }

    fn is_known_valid(&self, key: &str, source: &Path, min_valid_bytes: u64) -> bool {
        let known = self
            .validated
            .lock()
            .ok()
            .and_then(|map| map.get(key).map(|(_, path)| path.clone()));
        match known {
            Some(path) => {
                let valid = is_valid_cache(&path, source, min_valid_bytes);
                if !valid {
                    if let Ok(mut map) = self.validated.lock() {
                        map.remove(key);
                    }
                }
                valid
            }
            None => false,
        }
    }

    fn remember(&self, key: &str, kind: ProxyKind, path: &Path) {
        if let Ok(mut map) = self.validated.lock() {
            map.insert(key.to_string(), (kind, path.to_path_buf()));
        }
    }

    /// Delete every cached proxy of one kind. Returns the number of files removed.
    pub fn clear_proxies_of_type(&self, kind: ProxyKind) -> FramecastResult<usize> {
        if let Ok(mut map) = self.validated.lock() {
            map.retain(|_, (k, _)| *k != kind);
        }

        let dir = self.cache_dir.join(kind.as_str());
        let mut removed = 0;
        match std::fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_file() {
                        std::fs::remove_file(&path)?;
                        removed += 1;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(kind = %kind, removed, "Cleared proxy cache");
        Ok(removed)
    }

    /// Delete the whole proxy cache.
    pub fn clear_all(&self) -> FramecastResult<usize> {
        let mut removed = 0;
        for kind in ProxyKind::ALL {
            removed += self.clear_proxies_of_type(kind)?;
        }
        Ok(removed)
    }

    /// Bytes used on disk by all proxy kinds.
    pub fn cache_size(&self) -> u64 {
        ProxyKind::ALL
            .iter()
            .filter_map(|kind| std::fs::read_dir(self.cache_dir.join(kind.as_str())).ok())
            .flat_map(|entries| entries.flatten())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }
}

/// Deterministic cache key of a request.
pub fn cache_key(source: &Path, settings: &ResolvedProxySettings) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(format!("{}x{}", settings.max_width, settings.max_height).as_bytes());
    hasher.update(b"\0");
    hasher.update(settings.kind.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(settings.fps.map(|f| f.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"\0");
    hasher.update(FORMAT_VERSION.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// A cached proxy is valid when it exists, is not older than its source,
/// and is at least `min_valid_bytes` long.
pub fn is_valid_cache(proxy: &Path, source: &Path, min_valid_bytes: u64) -> bool {
    let Ok(proxy_meta) = std::fs::metadata(proxy) else {
        return false;
    };
    if !proxy_meta.is_file() || proxy_meta.len() < min_valid_bytes {
        return false;
    }
    let source_modified = std::fs::metadata(source).and_then(|m| m.modified());
    match (proxy_meta.modified(), source_modified) {
        (Ok(proxy_time), Ok(source_time)) => proxy_time >= source_time,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProber, FakeTranscoder};

    fn service(dir: &Path, transcoder: Arc<FakeTranscoder>, hw: Option<HardwareEncoder>) -> ProxyService {
        ProxyService::new(dir.join("proxies"), transcoder, Arc::new(FakeProber::new(3840, 2160)), hw)
    }

    fn service_with_prober(dir: &Path, transcoder: Arc<FakeTranscoder>, prober: Arc<FakeProber>) -> ProxyService {
        ProxyService::new(dir.join("proxies"), transcoder, prober, None)
    }

    fn source(dir: &Path) -> PathBuf {
        let path = dir.join("source.mov");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_transcode() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path());
        let transcoder = Arc::new(FakeTranscoder::new(200 * 1024).with_delay_ms(100));
        let proxies = service(dir.path(), transcoder.clone(), None);
        let options = ProxyOptions::new(ProxyKind::Export);
        let cancel = CancelToken::new();

        let (a, b) = tokio::join!(
            proxies.ensure_proxy(&input, &options, &cancel),
            proxies.ensure_proxy(&input, &options, &cancel)
        );
        assert!(a.success && b.success);
        assert_eq!(a, b);
        assert_eq!(transcoder.calls(), 1);

        // Cache hit afterwards.
        let c = proxies.ensure_proxy(&input, &options, &cancel).await;
        assert_eq!(c.proxy_path, a.proxy_path);
        assert_eq!(transcoder.calls(), 1);
    }

    #[tokio::test]
    async fn test_small_source_skips_glow_without_transcoding() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path());
        let transcoder = Arc::new(FakeTranscoder::new(200 * 1024));
        let prober = Arc::new(FakeProber::new(3840, 2160));
        let proxies = service_with_prober(dir.path(), transcoder.clone(), prober.clone());
        let options = ProxyOptions::new(ProxyKind::Glow).with_source_size(320, 180);

        let result = proxies.ensure_proxy(&input, &options, &CancelToken::new()).await;
        assert!(result.success && result.skipped);
        assert!(result.proxy_path.is_none());
        assert_eq!(transcoder.calls(), 0);
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_glow_without_size_probes_then_skips() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path());
        let transcoder = Arc::new(FakeTranscoder::new(200 * 1024));
        let prober = Arc::new(FakeProber::new(320, 180));
        let proxies = service_with_prober(dir.path(), transcoder.clone(), prober.clone());

        let result = proxies
            .ensure_proxy(&input, &ProxyOptions::new(ProxyKind::Glow), &CancelToken::new())
            .await;
        assert!(result.success && result.skipped);
        assert_eq!(prober.calls(), 1);
        assert_eq!(transcoder.calls(), 0);
    }

    #[tokio::test]
    async fn test_generation_reuses_proxy_finished_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path());
        let transcoder = Arc::new(FakeTranscoder::new(200 * 1024));
        let proxies = service(dir.path(), transcoder.clone(), None);
        let options = ProxyOptions::new(ProxyKind::Export);
        let settings = options.resolve();
        let canonical = std::fs::canonicalize(&input).unwrap();
        let key = cache_key(&canonical, &settings);
        let proxy_path = proxies.proxy_path(settings.kind, &key);

        // Another request wrote the proxy between our cache check and generation.
        std::fs::create_dir_all(proxy_path.parent().unwrap()).unwrap();
        std::fs::write(&proxy_path, vec![0u8; settings.min_valid_bytes as usize]).unwrap();

        let result = proxies
            .generate(&canonical, &options, &settings, &key, &proxy_path, &CancelToken::new())
            .await;
        assert!(result.success);
        assert_eq!(result.proxy_path, Some(proxy_path));
        assert_eq!(transcoder.calls(), 0);
    }

    #[tokio::test]
    async fn test_tiers_fall_through_to_software() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path());
        let transcoder = Arc::new(FakeTranscoder::new(200 * 1024).failing_first(2));
        let proxies = service(dir.path(), transcoder.clone(), Some(HardwareEncoder::Nvenc));

        let result = proxies
            .ensure_proxy(&input, &ProxyOptions::new(ProxyKind::Export), &CancelToken::new())
            .await;
        assert!(result.success);
        assert_eq!(transcoder.calls(), 3);
        let last = transcoder.last_args().unwrap();
        assert!(last.contains(&"libx264".to_string()));
        assert!(result.proxy_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_all_tiers_failing_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path());
        let transcoder = Arc::new(FakeTranscoder::new(200 * 1024).failing_first(10));
        let proxies = service(dir.path(), transcoder.clone(), Some(HardwareEncoder::Vaapi));

        let result = proxies
            .ensure_proxy(&input, &ProxyOptions::new(ProxyKind::Preview), &CancelToken::new())
            .await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(proxies.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_undersized_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path());
        let transcoder = Arc::new(FakeTranscoder::new(10));
        let proxies = service(dir.path(), transcoder, None);

        let result = proxies
            .ensure_proxy(&input, &ProxyOptions::new(ProxyKind::Export), &CancelToken::new())
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_clear_by_kind_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path());
        let transcoder = Arc::new(FakeTranscoder::new(200 * 1024));
        let proxies = service(dir.path(), transcoder.clone(), None);
        let cancel = CancelToken::new();

        proxies.ensure_proxy(&input, &ProxyOptions::new(ProxyKind::Export), &cancel).await;
        proxies.ensure_proxy(&input, &ProxyOptions::new(ProxyKind::Preview), &cancel).await;
        assert_eq!(proxies.cache_size(), 400 * 1024);

        assert_eq!(proxies.clear_proxies_of_type(ProxyKind::Export).unwrap(), 1);
        assert_eq!(proxies.cache_size(), 200 * 1024);

        // The cleared kind regenerates, the other is still cached.
        proxies.ensure_proxy(&input, &ProxyOptions::new(ProxyKind::Export), &cancel).await;
        proxies.ensure_proxy(&input, &ProxyOptions::new(ProxyKind::Preview), &cancel).await;
        assert_eq!(transcoder.calls(), 3);

        proxies.clear_all().unwrap();
        assert_eq!(proxies.cache_size(), 0);
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let export = ProxyOptions::new(ProxyKind::Export).resolve();
        let preview = ProxyOptions::new(ProxyKind::Preview).resolve();
        let path = Path::new("/media/a.mov");
        assert_eq!(cache_key(path, &export), cache_key(path, &export));
        assert_ne!(cache_key(path, &export), cache_key(path, &preview));
        assert_ne!(cache_key(path, &export), cache_key(Path::new("/media/b.mov"), &export));
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let proxies = service(dir.path(), Arc::new(FakeTranscoder::new(1)), None);
        let result = proxies
            .ensure_proxy(&dir.path().join("nope.mov"), &ProxyOptions::new(ProxyKind::Export), &CancelToken::new())
            .await;
        assert!(!result.success);
    }
}

//! Concrete output variants and the fixed-order probe that picks one.

pub mod native;
pub mod plugin;
pub mod stub;

use std::sync::Arc;

use log::{debug, info, warn};

use super::{BackendKind, OutputBackend};
use crate::config::FeederConfig;
use crate::error::BackendError;
use crate::logging::FeederLogger;
use crate::scheduler::Scheduler;

pub use native::{NativeBackend, NativeContext};
pub use plugin::{PluginBackend, PluginHost, PluginSink};
pub use stub::StubBackend;

type ProbeFn = Box<dyn Fn() -> bool + Send + Sync>;
type BuildFn = Box<dyn Fn(&BackendRequest) -> Result<Box<dyn OutputBackend>, BackendError> + Send + Sync>;

/// Everything a backend needs at construction
#[derive(Clone)]
pub struct BackendRequest {
    /// Channel count the feeder was initialized with
    pub channels: u16,
    /// Sample rate the feeder was initialized with
    pub rate: u32,
    pub config: FeederConfig,
    pub scheduler: Scheduler,
    pub logger: FeederLogger,
}

/// A backend variant: a cheap capability probe plus its constructor
pub struct BackendCandidate {
    kind: BackendKind,
    probe: ProbeFn,
    build: BuildFn,
}

impl BackendCandidate {
    pub fn new<P, B>(kind: BackendKind, probe: P, build: B) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
        B: Fn(&BackendRequest) -> Result<Box<dyn OutputBackend>, BackendError> + Send + Sync + 'static,
    {
        Self {
            kind,
            probe: Box::new(probe),
            build: Box::new(build),
        }
    }

    pub fn native() -> Self {
        Self::new(BackendKind::Native, NativeBackend::is_supported, |request| {
            Ok(Box::new(NativeBackend::new(request)?) as Box<dyn OutputBackend>)
        })
    }

    pub fn plugin(host: Arc<dyn PluginHost>) -> Self {
        let probe_host = Arc::clone(&host);
        Self::new(
            BackendKind::Plugin,
            move || probe_host.is_supported(),
            move |request| Ok(Box::new(PluginBackend::new(host.as_ref(), request)?) as Box<dyn OutputBackend>),
        )
    }

    pub fn stub() -> Self {
        Self::new(BackendKind::Stub, StubBackend::is_supported, |request| {
            Ok(Box::new(StubBackend::new(request)) as Box<dyn OutputBackend>)
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn is_supported(&self) -> bool {
        (self.probe)()
    }

    /// Construct the backend, or fail with `Unsupported` when the capability check says no
    pub fn build(&self, request: &BackendRequest) -> Result<Box<dyn OutputBackend>, BackendError> {
        if !self.is_supported() {
            return Err(BackendError::Unsupported {
                backend: self.kind.as_str().to_string(),
            });
        }
        (self.build)(request)
    }
}

/// Highest fidelity first: native device, then plugin sink if a host is given, then stub
pub fn default_candidates(plugin_host: Option<Arc<dyn PluginHost>>) -> Vec<BackendCandidate> {
    let mut candidates = vec![BackendCandidate::native()];
    if let Some(host) = plugin_host {
        candidates.push(BackendCandidate::plugin(host));
    }
    candidates.push(BackendCandidate::stub());
    candidates
}

/// Instantiate the first supported candidate that builds.
///
/// A candidate whose probe passes but whose construction fails is skipped.
/// When nothing is left a stub is used, so selection never fails.
pub fn select_backend(candidates: &[BackendCandidate], request: &BackendRequest) -> Box<dyn OutputBackend> {
    for candidate in candidates {
        match candidate.build(request) {
            Ok(backend) => {
                info!(
                    "Selected {} output at {} Hz, {} channels",
                    backend.kind(),
                    backend.rate(),
                    backend.channels()
                );
                return backend;
            }
            Err(BackendError::Unsupported { backend }) => {
                debug!("{} output not supported, skipping", backend);
            }
            Err(e) => {
                warn!("{} output failed to initialize: {}", candidate.kind(), e);
            }
        }
    }

    warn!("No usable output found, falling back to silent stub");
    Box::new(StubBackend::new(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{recording_candidate, test_request, RecordingLog};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unsupported(kind: BackendKind, builds: Arc<AtomicUsize>) -> BackendCandidate {
        BackendCandidate::new(
            kind,
            || false,
            move |request| {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(StubBackend::new(request)) as Box<dyn OutputBackend>)
            },
        )
    }

    fn failing(kind: BackendKind) -> BackendCandidate {
        BackendCandidate::new(kind, || true, |_| {
            Err(BackendError::InitializationFailed("device busy".to_string()))
        })
    }

    #[tokio::test]
    async fn test_first_supported_candidate_wins() {
        let log = RecordingLog::new();
        let candidates = vec![
            recording_candidate(BackendKind::Native, &log, 48000, 2),
            BackendCandidate::stub(),
        ];

        let backend = select_backend(&candidates, &test_request(1, 22050));
        assert_eq!(backend.kind(), BackendKind::Native);
        assert_eq!(backend.rate(), 48000);
    }

    #[tokio::test]
    async fn test_unsupported_candidates_are_never_built() {
        let builds = Arc::new(AtomicUsize::new(0));
        let candidates = vec![
            unsupported(BackendKind::Native, Arc::clone(&builds)),
            unsupported(BackendKind::Plugin, Arc::clone(&builds)),
            BackendCandidate::stub(),
        ];

        let backend = select_backend(&candidates, &test_request(2, 44100));
        assert_eq!(backend.kind(), BackendKind::Stub);
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_candidate_refuses_to_build() {
        let builds = Arc::new(AtomicUsize::new(0));
        let candidate = unsupported(BackendKind::Plugin, Arc::clone(&builds));

        match candidate.build(&test_request(2, 44100)) {
            Err(BackendError::Unsupported { backend }) => assert_eq!(backend, "plugin"),
            Err(e) => panic!("expected Unsupported, got {}", e),
            Ok(_) => panic!("unsupported candidate was built"),
        }
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_build_falls_through() {
        let log = RecordingLog::new();
        let candidates = vec![
            failing(BackendKind::Native),
            recording_candidate(BackendKind::Plugin, &log, 44100, 2),
        ];

        let backend = select_backend(&candidates, &test_request(2, 44100));
        assert_eq!(backend.kind(), BackendKind::Plugin);
    }

    #[tokio::test]
    async fn test_stub_fallback_when_nothing_usable() {
        let candidates = vec![failing(BackendKind::Native)];

        let backend = select_backend(&candidates, &test_request(3, 32000));
        assert_eq!(backend.kind(), BackendKind::Stub);
        assert_eq!(backend.rate(), 32000);
        assert_eq!(backend.channels(), 3);

        let backend = select_backend(&[], &test_request(1, 8000));
        assert_eq!(backend.kind(), BackendKind::Stub);
    }

    #[test]
    fn test_default_candidate_order() {
        let kinds: Vec<_> = default_candidates(None).iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![BackendKind::Native, BackendKind::Stub]);

        let host: Arc<dyn PluginHost> = Arc::new(crate::test_support::MockPluginHost::new(true));
        let kinds: Vec<_> = default_candidates(Some(host)).iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![BackendKind::Native, BackendKind::Plugin, BackendKind::Stub]);
    }
}

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use shed_limit::AdmissionStat;
use shed_limit::Shedder;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::AdaptiveShedService;
use crate::Classify;
use crate::ErrorClassifier;
use crate::ShedError;

/// A production ready shedding stack.
///
/// Requests are offered to the shedder first. Admitted requests run under a hard
/// deadline, and every error leaves the stack as a [`ShedError`].
///
/// ### Error Responsibilities:
/// - **Overloaded (`ShedError::Overloaded`)**: the shedder rejected the request. The
///   inner service never saw it.
/// - **Timeout (`ShedError::Timeout`)**: the inner service took longer than
///   `max_wait`. The request's promise is dropped and counts as a fail.
/// - **Inner (`ShedError::Inner`)**: any other inner service error, stringified.
///
/// HTTP services should install `HttpStatusClassifier` (feature `http`) with
/// [`ManagedShedLayer::with_classifier`], otherwise a 5xx response counts as a pass.
pub struct ManagedShedLayer<Req, C = ErrorClassifier> {
    shedder: Arc<dyn Shedder>,
    max_wait: Duration,
    classifier: C,
    stat: Option<Arc<AdmissionStat>>,
    _phantom: PhantomData<fn(Req)>,
}

// Deriving Clone would require `Req: Clone`
impl<Req, C: Clone> Clone for ManagedShedLayer<Req, C> {
    fn clone(&self) -> Self {
        Self {
            shedder: Arc::clone(&self.shedder),
            max_wait: self.max_wait,
            classifier: self.classifier.clone(),
            stat: self.stat.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<Req> ManagedShedLayer<Req> {
    pub fn new(shedder: Arc<dyn Shedder>, max_wait: Duration) -> Self {
        Self {
            shedder,
            max_wait,
            classifier: ErrorClassifier,
            stat: None,
            _phantom: PhantomData,
        }
    }
}

impl<Req, C> ManagedShedLayer<Req, C> {
    /// Set how results are classified into passes and fails.
    pub fn with_classifier<C2>(self, classifier: C2) -> ManagedShedLayer<Req, C2> {
        ManagedShedLayer {
            shedder: self.shedder,
            max_wait: self.max_wait,
            classifier,
            stat: self.stat,
            _phantom: PhantomData,
        }
    }

    pub fn with_stat(mut self, stat: Arc<AdmissionStat>) -> Self {
        self.stat = Some(stat);
        self
    }
}

impl<S, C, Req> Layer<S> for ManagedShedLayer<Req, C>
where
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    C: Classify<S::Response, BoxError> + Clone + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let mut shed = AdaptiveShedService::new(inner, Arc::clone(&self.shedder))
            .with_classifier(self.classifier.clone());
        if let Some(stat) = &self.stat {
            shed = shed.with_stat(Arc::clone(stat));
        }

        // Timeout is outer so that an expired request drops, and so fails, its promise
        let svc = tower::ServiceBuilder::new()
            .timeout(self.max_wait)
            .service(shed);

        let mapped_svc = tower::util::MapErr::new(svc, |err: BoxError| {
            if err.is::<tower::timeout::error::Elapsed>() {
                BoxError::from(ShedError::Timeout)
            } else if err.is::<ShedError>() {
                err
            } else {
                Box::from(ShedError::Inner(err.to_string()))
            }
        });

        BoxCloneSyncService::new(mapped_svc)
    }
}

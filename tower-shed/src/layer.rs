use std::sync::Arc;

use shed_limit::AdmissionStat;
use shed_limit::Shedder;
use shed_limit::ShedderPool;
use tower::Layer;

use crate::classify::ErrorClassifier;
use crate::service::AdaptiveShedService;
use crate::service::Keyed;

/// Applies adaptive load shedding to requests.
#[derive(Debug, Clone)]
pub struct AdaptiveShedLayer<A, C = ErrorClassifier> {
    admission: A,
    classifier: C,
    stat: Option<Arc<AdmissionStat>>,
}

/// A layer that gives each request key its own shedder from a [`ShedderPool`].
pub type KeyedShedLayer<F, C = ErrorClassifier> = AdaptiveShedLayer<Keyed<F>, C>;

impl<S> AdaptiveShedLayer<Arc<S>>
where
    S: Shedder + ?Sized,
{
    /// Create an AdaptiveShedLayer guarded by a single shedder
    pub fn new(shedder: Arc<S>) -> Self {
        AdaptiveShedLayer {
            admission: shedder,
            classifier: ErrorClassifier,
            stat: None,
        }
    }
}

impl<F> AdaptiveShedLayer<Keyed<F>> {
    /// Create a layer that looks up the shedder for each request by `key`.
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use shed_limit::ShedderConfig;
    /// use shed_limit::ShedderPool;
    /// use tower_shed::KeyedShedLayer;
    ///
    /// let pool = Arc::new(ShedderPool::new(ShedderConfig::default()).unwrap());
    /// let layer = KeyedShedLayer::keyed(pool, |route: &String| route.clone());
    /// ```
    pub fn keyed(pool: Arc<ShedderPool>, key: F) -> Self {
        AdaptiveShedLayer {
            admission: Keyed::new(pool, key),
            classifier: ErrorClassifier,
            stat: None,
        }
    }
}

impl<A, C> AdaptiveShedLayer<A, C> {
    /// Set how results are classified.
    ///
    /// Only outcomes classified as [`Outcome::Fail`](crate::Outcome::Fail) are kept out
    /// of the latency and throughput history.
    pub fn with_classifier<C2>(self, classifier: C2) -> AdaptiveShedLayer<A, C2> {
        AdaptiveShedLayer {
            admission: self.admission,
            classifier,
            stat: self.stat,
        }
    }

    /// Count totals, passes and drops in `stat`.
    pub fn with_stat(mut self, stat: Arc<AdmissionStat>) -> Self {
        self.stat = Some(stat);
        self
    }
}

impl<A, C, S> Layer<S> for AdaptiveShedLayer<A, C>
where
    A: Clone,
    C: Clone,
{
    type Service = AdaptiveShedService<S, A, C>;

    fn layer(&self, service: S) -> Self::Service {
        let svc = AdaptiveShedService::new(service, self.admission.clone())
            .with_classifier(self.classifier.clone());
        match &self.stat {
            Some(stat) => svc.with_stat(Arc::clone(stat)),
            None => svc,
        }
    }
}

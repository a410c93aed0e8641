use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;

use shed_limit::AdmissionStat;
use shed_limit::Promise;
use shed_limit::ServiceOverloaded;
use shed_limit::Shedder;
use shed_limit::ShedderPool;

use crate::classify::Classify;
use crate::classify::ErrorClassifier;
use crate::classify::Outcome;
use crate::error::ShedError;

/// Picks the shedder that decides whether a request is admitted.
pub trait Admission<Req> {
    fn allow(&self, req: &Req) -> Result<Promise, ServiceOverloaded>;
}

impl<S, Req> Admission<Req> for Arc<S>
where
    S: Shedder + ?Sized,
{
    #[inline]
    fn allow(&self, _req: &Req) -> Result<Promise, ServiceOverloaded> {
        Shedder::allow(self.as_ref())
    }
}

/// Admission through a [`ShedderPool`], one shedder per request key.
pub struct Keyed<F> {
    pool: Arc<ShedderPool>,
    key: F,
}

impl<F> Keyed<F> {
    pub fn new(pool: Arc<ShedderPool>, key: F) -> Self {
        Self { pool, key }
    }

    pub fn pool(&self) -> &Arc<ShedderPool> {
        &self.pool
    }
}

impl<F: Clone> Clone for Keyed<F> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            key: self.key.clone(),
        }
    }
}

impl<F> std::fmt::Debug for Keyed<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyed")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl<F, Req> Admission<Req> for Keyed<F>
where
    F: Fn(&Req) -> String,
{
    fn allow(&self, req: &Req) -> Result<Promise, ServiceOverloaded> {
        let key = (self.key)(req);
        let shedder = self.pool.get_shedder(&key);
        Shedder::allow(shedder.as_ref())
    }
}

#[derive(Clone, Debug)]
struct ShedServiceMetrics {
    requests: Counter<u64>,
}

impl ShedServiceMetrics {
    fn new() -> Self {
        let meter = global::meter("adaptive_shed_service");
        Self {
            requests: meter.u64_counter("adaptive_shed.requests").build(),
        }
    }

    fn record(&self, outcome: &'static str) {
        self.requests.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

/// Sheds requests when the guarded service is overloaded.
///
/// Every request is offered to the shedder before the inner service sees it. A rejected
/// request fails immediately with [`ShedError::Overloaded`] and never reaches the inner
/// service. An admitted request carries its promise until the inner future completes, at
/// which point the classifier decides between a pass and a fail.
#[derive(Clone, Debug)]
pub struct AdaptiveShedService<S, A, C = ErrorClassifier> {
    inner: S,
    admission: A,
    classifier: C,
    stat: Option<Arc<AdmissionStat>>,
    instruments: ShedServiceMetrics,
}

impl<S, A> AdaptiveShedService<S, A> {
    pub fn new(inner: S, admission: A) -> Self {
        Self {
            inner,
            admission,
            classifier: ErrorClassifier,
            stat: None,
            instruments: ShedServiceMetrics::new(),
        }
    }
}

impl<S, A, C> AdaptiveShedService<S, A, C> {
    /// Replace the classifier that turns results into pass or fail.
    pub fn with_classifier<C2>(self, classifier: C2) -> AdaptiveShedService<S, A, C2> {
        AdaptiveShedService {
            inner: self.inner,
            admission: self.admission,
            classifier,
            stat: self.stat,
            instruments: self.instruments,
        }
    }

    /// Count every request in `stat`.
    pub fn with_stat(mut self, stat: Arc<AdmissionStat>) -> Self {
        self.stat = Some(stat);
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

pin_project! {
    /// Resolves the request's promise when the inner future completes.
    ///
    /// Dropping this future before completion drops the promise, which fails it.
    pub struct ResponseFuture<F, C> {
        #[pin]
        inner: Option<F>,
        promise: Option<Promise>,
        classifier: C,
        stat: Option<Arc<AdmissionStat>>,
        instruments: ShedServiceMetrics,
    }
}

impl<F, T, C> Future for ResponseFuture<F, C>
where
    F: Future<Output = Result<T, BoxError>>,
    C: Classify<T, BoxError>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let Some(inner) = this.inner.as_pin_mut() else {
            return Poll::Ready(Err(Box::new(ShedError::Overloaded)));
        };

        let result = ready!(inner.poll(cx));
        if let Some(promise) = this.promise.take() {
            match this.classifier.classify(&result) {
                Outcome::Pass => {
                    promise.pass();
                    if let Some(stat) = this.stat {
                        stat.incr_pass();
                    }
                    this.instruments.record("pass");
                }
                Outcome::Fail => {
                    promise.fail();
                    this.instruments.record("fail");
                }
            }
        }
        Poll::Ready(result)
    }
}

impl<S, A, C, Req> Service<Req> for AdaptiveShedService<S, A, C>
where
    S: Service<Req, Error = BoxError>,
    A: Admission<Req>,
    C: Classify<S::Response, BoxError> + Clone,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future, C>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        if let Some(stat) = &self.stat {
            stat.incr_total();
        }

        match self.admission.allow(&req) {
            Ok(promise) => ResponseFuture {
                inner: Some(self.inner.call(req)),
                promise: Some(promise),
                classifier: self.classifier.clone(),
                stat: self.stat.clone(),
                instruments: self.instruments.clone(),
            },
            Err(ServiceOverloaded) => {
                if let Some(stat) = &self.stat {
                    stat.incr_drop();
                }
                self.instruments.record("shed");
                tracing::debug!("request shed");
                ResponseFuture {
                    inner: None,
                    promise: None,
                    classifier: self.classifier.clone(),
                    stat: None,
                    instruments: self.instruments.clone(),
                }
            }
        }
    }
}

use std::sync::Arc;

use shed_limit::Shedder;
use shed_limit::ShedderPool;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::AdaptiveShedLayer;
use crate::KeyedShedLayer;

/// Service Builder Extension with shedding layers for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Shed load with a single shared shedder
    fn adaptive_shed(
        self,
        shedder: Arc<dyn Shedder>,
    ) -> ServiceBuilder<Stack<AdaptiveShedLayer<Arc<dyn Shedder>>, L>>;

    /// Shed load with one shedder per request key
    fn keyed_shed<F>(
        self,
        pool: Arc<ShedderPool>,
        key: F,
    ) -> ServiceBuilder<Stack<KeyedShedLayer<F>, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn adaptive_shed(
        self,
        shedder: Arc<dyn Shedder>,
    ) -> ServiceBuilder<Stack<AdaptiveShedLayer<Arc<dyn Shedder>>, L>> {
        self.layer(AdaptiveShedLayer::new(shedder))
    }

    fn keyed_shed<F>(
        self,
        pool: Arc<ShedderPool>,
        key: F,
    ) -> ServiceBuilder<Stack<KeyedShedLayer<F>, L>> {
        self.layer(KeyedShedLayer::keyed(pool, key))
    }
}

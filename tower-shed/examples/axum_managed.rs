use axum::{
    Router, error_handling::HandleErrorLayer, extract::Request, http::StatusCode,
    response::IntoResponse, routing::get,
};
use shed_limit::ShedderConfig;
use shed_limit::new_shedder;
use std::time::Duration;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_shed::{HttpStatusClassifier, ManagedShedLayer, ShedError};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // 1. Setup Shedder: samples the host CPU
    let shedder = new_shedder(ShedderConfig::default().with_name("axum")).unwrap();

    // 2. Setup Managed Layer: 5xx responses count as failures
    let managed_layer = ManagedShedLayer::<Request>::new(shedder, Duration::from_millis(500))
        .with_classifier(HttpStatusClassifier);
    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Shed!" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_shed_error))
                // 2. The middle layer: introduces BoxError
                .layer(managed_layer)
                // 3. Converts the Route's Infallible to BoxError
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}

/// The signature must match BoxError -> IntoResponse
async fn handle_shed_error(err: tower::BoxError) -> impl IntoResponse {
    if let Some(shed_err) = err.downcast_ref::<ShedError>() {
        shed_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}

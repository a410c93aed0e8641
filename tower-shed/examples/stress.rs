use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::time::sleep;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;

use shed_limit::AdaptiveShedder;
use shed_limit::ShedderConfig;
use tower_shed::ManagedShedLayer;
use tower_shed::ShedError;

/// Fire a burst of requests at a shedder that believes the CPU is saturated.
#[derive(Parser, Debug)]
struct Args {
    /// Number of requests to send at once
    #[arg(short, long, default_value_t = 200)]
    requests: usize,

    /// Simulated CPU load, in per-mille
    #[arg(short, long, default_value_t = 950)]
    cpu: u64,

    /// How long each request takes
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "20ms")]
    work: Duration,

    /// Deadline for each request
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "500ms")]
    max_wait: Duration,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // 1. Setup Shedder: a fixed CPU reading, 1 second window of 10 buckets
    let cpu = args.cpu;
    let config = ShedderConfig::default()
        .with_name("stress")
        .with_window(Duration::from_secs(1), 10)
        .with_cpu_sampler(move || Some(cpu));
    let shedder = Arc::new(AdaptiveShedder::new(config).unwrap());

    // 2. Setup Managed Layer
    let layer = ManagedShedLayer::new(shedder.clone(), args.max_wait);

    // 3. Define a "Work" service
    let work = args.work;
    let service = tower::service_fn(move |_: ()| async move {
        sleep(work).await;
        Ok::<&str, tower::BoxError>("Request Successful")
    });

    let managed_service = layer.layer(service);

    println!("🚀 Starting Stress Test...");
    println!("Shedder: Adaptive (CPU: {}‰)", args.cpu);
    println!("Managed Budget: {:?} wait\n", args.max_wait);

    // 4. Fire the requests instantly
    let mut tasks = Vec::new();
    for i in 0..args.requests {
        let mut svc = managed_service.clone();
        tasks.push(tokio::spawn(async move {
            match svc.ready().await {
                Ok(ready_svc) => match ready_svc.call(()).await {
                    Ok(resp) => println!("[{i:03}] ✅ {resp}"),
                    Err(e) => {
                        if let Some(shed_err) = e.downcast_ref::<ShedError>() {
                            println!("[{i:03}] ❌ Shed: {shed_err}");
                        } else {
                            println!("[{i:03}] 💥 Unexpected Error: {e}");
                        }
                    }
                },
                Err(e) => println!("[{i:03}] ⚠️ Service Unavailable: {e}"),
            }
        }));
    }

    // Wait for all requests to finish
    for task in tasks {
        let _ = task.await;
    }

    println!("\n🏁 Stress test complete.");
    println!("{:#?}", shedder.snapshot());
}

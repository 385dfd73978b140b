//! End-to-end client-server benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use dronelink_client::DroneClient;
use dronelink_server::{CoordinatorContext, Server, ServerConfig, TokenIssuer};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::Mutex;

struct TestSetup {
    _server_handle: tokio::task::JoinHandle<()>,
    url: String,
}

fn setup_server(rt: &Runtime) -> TestSetup {
    let issuer = TokenIssuer::new("bench-secret", Duration::from_secs(3600)).unwrap();
    let ctx = Arc::new(CoordinatorContext::new(issuer));

    // Find available port
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = Arc::new(Server::new(ServerConfig::new(addr), ctx));

    // Start server
    let server_handle = rt.spawn(async move {
        let _ = server.run().await;
    });

    // Give server time to start
    std::thread::sleep(Duration::from_millis(100));

    TestSetup {
        _server_handle: server_handle,
        url: format!("ws://{}", addr),
    }
}

fn bench_command_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server(&rt);

    let client = rt.block_on(async {
        let mut client = DroneClient::connect(setup.url.as_str()).await.unwrap();
        client.login("bench-drone", "333").await.unwrap();
        Mutex::new(client)
    });

    let mut group = c.benchmark_group("e2e_command");
    group.throughput(Throughput::Elements(1));

    group.bench_function("patrol", |b| {
        b.to_async(&rt).iter(|| async {
            let mut client = client.lock().await;
            black_box(client.send_command("patrol").await.unwrap())
        });
    });

    group.finish();
}

fn bench_connect_login_close(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server(&rt);
    let url = setup.url.clone();

    let mut group = c.benchmark_group("e2e_session");
    group.throughput(Throughput::Elements(1));

    // Unique identities so a lagging release never collides
    let counter = std::sync::atomic::AtomicU64::new(0);
    group.bench_function("connect_login_close", |b| {
        b.to_async(&rt).iter(|| async {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let mut client = DroneClient::connect(url.as_str()).await.unwrap();
            black_box(client.login(&format!("drone-{}", n), "333").await.unwrap());
            client.close().await.unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_command_latency, bench_connect_login_close);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, Criterion};
use rustpool::{ConnectionPool, PoolOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            if let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        }
    });

    addr
}

fn checkout_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let (pool, address) = rt.block_on(async {
        let addr = spawn_echo_server().await;
        let address = addr.to_string();
        let pool = Arc::new(ConnectionPool::new(PoolOptions::default()));

        // Warm one connection so the measured path is reuse, not the dial.
        let acquired = pool.acquire(&address).await.unwrap();
        pool.release(acquired.conn).await.unwrap();

        (pool, address)
    });

    c.bench_function("acquire_release_reuse", |b| {
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            let address = address.clone();
            async move {
                let acquired = pool.acquire(&address).await.unwrap();
                pool.release(acquired.conn).await.unwrap();
            }
        })
    });

    c.bench_function("status_snapshot", |b| {
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            async move {
                let status = pool.status().await;
                assert!(!status.is_empty());
            }
        })
    });
}

criterion_group!(benches, checkout_cycle);
criterion_main!(benches);

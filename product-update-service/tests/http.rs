use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use product_update_service::{
    http::{AppState, router},
    product::{Product, StockPolicy},
    queue::EventQueue,
    store::ProductStore,
    worker::WorkerPool,
};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Harness {
    app: Router,
    queue: Arc<EventQueue<Product>>,
    store: Arc<ProductStore>,
}

impl Harness {
    fn new(capacity: usize) -> Self {
        let queue = Arc::new(EventQueue::new(capacity));
        let store = Arc::new(ProductStore::new());
        let app = router(AppState {
            store: Arc::clone(&store),
            queue: Arc::clone(&queue),
            stock_policy: StockPolicy::NonNegative,
        });
        Self { app, queue, store }
    }

    fn start_workers(&self, workers: usize) -> WorkerPool {
        WorkerPool::start(
            workers,
            Arc::clone(&self.queue),
            Arc::clone(&self.store),
            CancellationToken::new(),
        )
    }

    async fn post_raw(&self, body: impl Into<Body>) -> Result<(StatusCode, Value)> {
        let request = Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json")
            .body(body.into())?;
        self.send(request).await
    }

    async fn post_event(&self, event: Value) -> Result<StatusCode> {
        let (status, _) = self.post_raw(event.to_string()).await?;
        Ok(status)
    }

    async fn get_product(&self, id: &str) -> Result<(StatusCode, Value)> {
        let request = Request::builder()
            .uri(format!("/products/{id}"))
            .body(Body::empty())?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, body))
    }
}

#[tokio::test]
async fn post_then_get_product() -> Result<()> {
    let harness = Harness::new(10);
    let pool = harness.start_workers(2);

    let status = harness
        .post_event(json!({"product_id": "p1", "price": 10.0, "stock": 5}))
        .await?;
    assert_eq!(status, StatusCode::ACCEPTED);

    let body = timeout(Duration::from_secs(2), async {
        loop {
            let (status, body) = harness.get_product("p1").await.expect("get");
            if status == StatusCode::OK {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    assert_eq!(body, json!({"product_id": "p1", "price": 10.0, "stock": 5}));

    pool.stop().await;
    Ok(())
}

#[tokio::test]
async fn sequential_updates_keep_the_last_one() -> Result<()> {
    let harness = Harness::new(100);
    let pool = harness.start_workers(1);

    for i in 1..=5 {
        let status = harness
            .post_event(json!({"product_id": "p2", "price": 10 * i, "stock": 5 * i}))
            .await?;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    harness.queue.close();
    timeout(Duration::from_secs(2), pool.join()).await?;

    let (status, body) = harness.get_product("p2").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"product_id": "p2", "price": 50.0, "stock": 25}));
    Ok(())
}

#[tokio::test]
async fn concurrent_posts_for_different_products() -> Result<()> {
    let harness = Arc::new(Harness::new(100));
    let pool = harness.start_workers(4);

    let posts: Vec<_> = (3..=7)
        .map(|i| {
            let harness = Arc::clone(&harness);
            let event = json!({
                "product_id": format!("p{i}"),
                "price": 10 * i + 5,
                "stock": 10 * (i - 2),
            });
            tokio::spawn(async move { harness.post_event(event).await })
        })
        .collect();
    for post in posts {
        assert_eq!(post.await??, StatusCode::ACCEPTED);
    }

    harness.queue.close();
    timeout(Duration::from_secs(2), pool.join()).await?;

    for i in 3..=7 {
        let stored = harness.store.get(&format!("p{i}")).expect("applied");
        assert_eq!(stored.price, (10 * i + 5) as f64);
        assert_eq!(stored.stock, 10 * (i - 2));
    }
    Ok(())
}

#[tokio::test]
async fn unknown_product_is_404() -> Result<()> {
    let harness = Harness::new(10);

    let (status, body) = harness.get_product("unknown").await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "product not found");
    Ok(())
}

#[tokio::test]
async fn full_queue_is_503() -> Result<()> {
    // No workers: nothing drains the queue.
    let harness = Harness::new(1);

    let first = harness
        .post_event(json!({"product_id": "p9", "price": 100, "stock": 10}))
        .await?;
    let second = harness
        .post_event(json!({"product_id": "p10", "price": 200, "stock": 20}))
        .await?;

    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(second, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(harness.queue.len(), 1);
    Ok(())
}

#[tokio::test]
async fn closed_queue_is_503() -> Result<()> {
    let harness = Harness::new(4);
    harness.queue.close();

    let status = harness
        .post_event(json!({"product_id": "p1", "price": 1, "stock": 1}))
        .await?;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn malformed_and_invalid_bodies_are_400() -> Result<()> {
    let harness = Harness::new(4);

    for body in [
        "not json".to_string(),
        json!({"product_id": "p1", "price": "ten", "stock": 1}).to_string(),
        json!({"product_id": "p1", "price": 1.0}).to_string(),
        json!({"product_id": "", "price": 1.0, "stock": 1}).to_string(),
        json!({"product_id": "p1", "price": -1.0, "stock": 1}).to_string(),
        json!({"product_id": "p1", "price": 1.0, "stock": -4}).to_string(),
    ] {
        let (status, response) = harness.post_raw(body.clone()).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert!(response["error"].is_string());
    }

    assert!(harness.queue.is_empty(), "nothing malformed is enqueued");
    Ok(())
}

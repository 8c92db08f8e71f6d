//! End-to-end tests: an in-process gRPC server driven by the generated
//! client, one server per test on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::Code;
use tonic::transport::{Channel, Server};

use relay_server::api::grpc::PubSubService;
use relay_server::api::proto::pubsub::v1::pub_sub_client::PubSubClient;
use relay_server::api::proto::pubsub::v1::pub_sub_server::PubSubServer;
use relay_server::api::proto::pubsub::v1::{PublishRequest, SubscribeRequest};
use relay_server::bus::{Bus, BusConfig};
use relay_server::core::ShutdownService;

struct TestApp {
    addr: String,
    shutdown: ShutdownService,
}

async fn start_app() -> TestApp {
    let bus = Arc::new(Bus::new(BusConfig::default()));
    let shutdown = ShutdownService::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());

    let service = PubSubService::new(bus, shutdown.subscribe());
    let mut stop_rx = shutdown.subscribe();
    tokio::spawn(async move {
        Server::builder()
            .add_service(PubSubServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                let _ = stop_rx.wait_for(|&v| v).await;
            })
            .await
            .unwrap();
    });

    TestApp { addr, shutdown }
}

async fn connect(app: &TestApp) -> PubSubClient<Channel> {
    for _ in 0..20 {
        if let Ok(client) = PubSubClient::connect(app.addr.clone()).await {
            return client;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("failed to connect to {}", app.addr);
}

fn publish_req(key: &str, data: &str) -> PublishRequest {
    PublishRequest {
        key: key.to_string(),
        data: data.to_string(),
    }
}

fn subscribe_req(key: &str) -> SubscribeRequest {
    SubscribeRequest {
        key: key.to_string(),
    }
}

#[tokio::test]
async fn publish_with_empty_key() {
    let app = start_app().await;
    let mut client = connect(&app).await;

    let err = client.publish(publish_req("", "data")).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn publish_with_empty_data() {
    let app = start_app().await;
    let mut client = connect(&app).await;

    let err = client.publish(publish_req("test", "")).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn publish_to_nonexistent_subject() {
    let app = start_app().await;
    let mut client = connect(&app).await;

    let err = client
        .publish(publish_req("nonexistent", "data"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "no such subject");
}

#[tokio::test]
async fn subscribe_with_empty_key() {
    let app = start_app().await;
    let mut client = connect(&app).await;

    let err = client.subscribe(subscribe_req("")).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn subscribe_and_receive_messages() {
    let app = start_app().await;
    let mut client = connect(&app).await;

    let mut stream = client
        .subscribe(subscribe_req("test"))
        .await
        .unwrap()
        .into_inner();
    sleep(Duration::from_millis(100)).await;

    client
        .publish(publish_req("test", "test message"))
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(2), stream.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.data, "test message");

    client
        .publish(publish_req("test", "second message"))
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(2), stream.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.data, "second message");
}

#[tokio::test]
async fn multiple_subscribers_receive_broadcast() {
    let app = start_app().await;
    let mut client = connect(&app).await;

    let mut stream1 = client
        .subscribe(subscribe_req("test"))
        .await
        .unwrap()
        .into_inner();
    let mut stream2 = client
        .subscribe(subscribe_req("test"))
        .await
        .unwrap()
        .into_inner();
    sleep(Duration::from_millis(100)).await;

    client
        .publish(publish_req("test", "broadcast"))
        .await
        .unwrap();

    let event1 = timeout(Duration::from_secs(2), stream1.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let event2 = timeout(Duration::from_secs(2), stream2.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event1.data, "broadcast");
    assert_eq!(event2.data, "broadcast");
}

#[tokio::test]
async fn client_cancel_releases_subscription() {
    let app = start_app().await;
    let mut client = connect(&app).await;

    let stream = client
        .subscribe(subscribe_req("test"))
        .await
        .unwrap()
        .into_inner();
    sleep(Duration::from_millis(100)).await;

    // Dropping the stream cancels the RPC; the server must unsubscribe
    // and, as this was the last subscriber, drop the subject.
    drop(stream);

    let mut released = false;
    for _ in 0..20 {
        match client.publish(publish_req("test", "x")).await {
            Err(status) => {
                assert_eq!(status.code(), Code::InvalidArgument);
                assert_eq!(status.message(), "no such subject");
                released = true;
                break;
            }
            Ok(_) => sleep(Duration::from_millis(50)).await,
        }
    }
    assert!(released, "subscription not released after client cancel");
}

#[tokio::test]
async fn server_stop_cancels_active_stream() {
    let app = start_app().await;
    let mut client = connect(&app).await;

    let mut stream = client
        .subscribe(subscribe_req("test"))
        .await
        .unwrap()
        .into_inner();
    sleep(Duration::from_millis(100)).await;

    app.shutdown.trigger();

    let err = timeout(Duration::from_secs(2), stream.message())
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), Code::Cancelled);
}

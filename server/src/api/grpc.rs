//! gRPC pub/sub frontend
//!
//! Bridges the wire surface to the bus: unary `Publish` forwards to
//! [`Bus::publish`], server-streaming `Subscribe` registers a bus
//! subscription whose handler feeds the response stream.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::transport::Server as TonicServer;
use tonic::{Code, Request, Response, Status};

use super::middleware::RpcContext;
use super::proto::pubsub::v1::pub_sub_server::{PubSub, PubSubServer};
use super::proto::pubsub::v1::{Event, PublishRequest, PublishResponse, SubscribeRequest};
use crate::bus::{Bus, BusError, Payload, handler_fn};
use crate::core::config::GrpcConfig;

/// Events buffered per stream between the bus handler and the transport.
const STREAM_BUFFER: usize = 16;

pub struct PubSubGrpcServer {
    addr: SocketAddr,
    bus: Arc<Bus>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PubSubGrpcServer {
    pub fn new(
        config: &GrpcConfig,
        bus: Arc<Bus>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let addr = SocketAddr::new(config.addr.parse()?, config.port);
        Ok(Self {
            addr,
            bus,
            shutdown_rx,
        })
    }

    pub async fn start(self) -> Result<()> {
        let addr = self.addr;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tracing::info!(%addr, "Starting pub/sub gRPC server");

        TonicServer::builder()
            .add_service(PubSubServer::new(PubSubService::new(
                self.bus,
                self.shutdown_rx,
            )))
            .serve_with_shutdown(addr, async move {
                let _ = shutdown_rx.wait_for(|&v| v).await;
                tracing::debug!("gRPC server shutting down");
            })
            .await?;

        Ok(())
    }
}

/// Response stream handed to tonic. The drop guard tells the monitor task
/// the client went away when tonic drops the stream mid-session.
pub struct EventStream {
    inner: ReceiverStream<Result<Event, Status>>,
    _client_gone: DropGuard,
}

impl futures::Stream for EventStream {
    type Item = Result<Event, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

pub struct PubSubService {
    bus: Arc<Bus>,
    srv_stop: watch::Receiver<bool>,
}

impl PubSubService {
    pub fn new(bus: Arc<Bus>, srv_stop: watch::Receiver<bool>) -> Self {
        Self { bus, srv_stop }
    }

    async fn handle_publish(
        &self,
        ctx: &RpcContext,
        req: PublishRequest,
    ) -> Result<Response<PublishResponse>, Status> {
        if req.key.is_empty() {
            return Err(Status::invalid_argument("key required"));
        }
        if req.data.is_empty() {
            return Err(Status::invalid_argument("data required"));
        }

        let payload: Payload = Arc::new(req.data);
        match self.bus.publish(&req.key, payload).await {
            Ok(()) => Ok(Response::new(PublishResponse {})),
            Err(BusError::NoSuchSubject) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    subject = %req.key,
                    "Publish to unknown subject"
                );
                Err(Status::invalid_argument("no such subject"))
            }
            Err(BusError::Closed) => Err(Status::cancelled("server stopping")),
            Err(e) => Err(Status::internal(format!("failed to publish: {e}"))),
        }
    }
}

#[tonic::async_trait]
impl PubSub for PubSubService {
    async fn publish(
        &self,
        request: Request<PublishRequest>,
    ) -> Result<Response<PublishResponse>, Status> {
        let ctx = RpcContext::begin("Publish");
        let result = self.handle_publish(&ctx, request.into_inner()).await;
        match &result {
            Ok(_) => ctx.finish(Code::Ok),
            Err(status) => ctx.finish(status.code()),
        }
        result
    }

    type SubscribeStream = EventStream;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<EventStream>, Status> {
        let ctx = RpcContext::begin("Subscribe");
        let req = request.into_inner();

        if req.key.is_empty() {
            ctx.finish(Code::InvalidArgument);
            return Err(Status::invalid_argument("key required"));
        }

        let (event_tx, event_rx) = mpsc::channel::<Result<Event, Status>>(STREAM_BUFFER);
        let (send_failed_tx, mut send_failed_rx) = mpsc::channel::<()>(1);

        let handler_tx = event_tx.clone();
        let handler = handler_fn(move |payload: Payload| {
            let tx = handler_tx.clone();
            let failed = send_failed_tx.clone();
            async move {
                // Non-string payloads come from in-process publishers and
                // have no wire representation.
                let Some(data) = payload.downcast_ref::<String>() else {
                    return;
                };
                let event = Event { data: data.clone() };
                if tx.send(Ok(event)).await.is_err() {
                    let _ = failed.try_send(());
                }
            }
        });

        let sub = match self.bus.subscribe(&req.key, handler) {
            Ok(sub) => sub,
            Err(BusError::Closed) => {
                ctx.finish(Code::Cancelled);
                return Err(Status::cancelled("server stopping"));
            }
            Err(e) => {
                ctx.finish(Code::Internal);
                return Err(Status::internal(format!("failed to subscribe: {e}")));
            }
        };

        tracing::debug!(
            request_id = %ctx.request_id,
            subscription_id = %sub.id(),
            subject = %req.key,
            "Subscription attached"
        );

        let client_gone = CancellationToken::new();
        let stream = EventStream {
            inner: ReceiverStream::new(event_rx),
            _client_gone: client_gone.clone().drop_guard(),
        };

        // The monitor owns the subscription and resolves the first of:
        // send failure, client cancel, server stop, bus close.
        let mut srv_stop = self.srv_stop.clone();
        tokio::spawn(async move {
            let (code, reason) = tokio::select! {
                _ = send_failed_rx.recv() => (Code::Unavailable, "failed to send event"),
                _ = client_gone.cancelled() => (Code::Cancelled, "cancelled by client"),
                _ = srv_stop.wait_for(|&v| v) => {
                    let _ = event_tx.try_send(Err(Status::cancelled("server stopping")));
                    (Code::Cancelled, "server stopping")
                }
                _ = sub.closed() => {
                    let _ = event_tx.try_send(Err(Status::cancelled("subscription closed")));
                    (Code::Cancelled, "subscription closed")
                }
            };
            sub.unsubscribe();
            ctx.finish_stream(code, reason);
        });

        Ok(Response::new(stream))
    }
}

//! Request-scoped RPC context: correlation ids and completion logging.

use std::time::Instant;

use tonic::Code;

use crate::utils::id;

/// Correlation id and timing for one incoming RPC. Created at the top of
/// every handler; every log record about the request carries the id.
pub struct RpcContext {
    pub request_id: String,
    method: &'static str,
    started: Instant,
}

impl RpcContext {
    /// Assign a fresh correlation id to an incoming RPC.
    pub fn begin(method: &'static str) -> Self {
        let ctx = Self {
            request_id: id::generate(),
            method,
            started: Instant::now(),
        };
        tracing::debug!(request_id = %ctx.request_id, method = ctx.method, "RPC started");
        ctx
    }

    /// Log the terminal status and duration of a unary RPC (or of stream
    /// establishment when it fails before streaming).
    pub fn finish(&self, code: Code) {
        tracing::info!(
            request_id = %self.request_id,
            method = self.method,
            code = ?code,
            duration_ms = self.started.elapsed().as_millis() as u64,
            "RPC finished"
        );
    }

    /// Log stream termination; `reason` names which of the racing exits
    /// won (send failure, client cancel, server stop, bus close).
    pub fn finish_stream(&self, code: Code, reason: &str) {
        tracing::info!(
            request_id = %self.request_id,
            method = self.method,
            code = ?code,
            reason,
            session_ms = self.started.elapsed().as_millis() as u64,
            "Stream closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let a = RpcContext::begin("Publish");
        let b = RpcContext::begin("Publish");
        assert_ne!(a.request_id, b.request_id);
    }
}

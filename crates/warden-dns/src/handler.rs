//! Per-request filtering in front of a handler chain.
//!
//! Every query is checked against the querying client's policy before
//! anything else sees it. A denied name gets an immediate NXDOMAIN; an
//! allowed one is delegated to the wrapped handler unchanged. The DNS
//! path never reports an error to the client beyond the synthesized
//! NXDOMAIN; anything unexpected degrades to a denial.

use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Header, ResponseCode};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tracing::{debug, info, warn};

use warden_filter::{Decision, FilterEngine};

/// A filtering `RequestHandler` wrapping the next handler in the chain.
pub struct FilterHandler<N> {
    engine: Arc<FilterEngine>,
    next: N,
}

impl<N> FilterHandler<N> {
    pub fn new(engine: Arc<FilterEngine>, next: N) -> Self {
        FilterHandler { engine, next }
    }

    /// Evaluate a source address and query name against the engine.
    ///
    /// Query names arrive as FQDNs; the trailing dot is stripped before
    /// evaluation so the tries see presentation-form names.
    fn evaluate(&self, src_ip: &str, qname: &str) -> Decision {
        let name = qname.trim_end_matches('.');
        self.engine.decide(src_ip, name)
    }
}

#[async_trait]
impl<N: RequestHandler> RequestHandler for FilterHandler<N> {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let ip = request.src().ip().to_string();

        let qname = match request.request_info() {
            Ok(info) => info.query.name().to_string(),
            Err(e) => {
                warn!(client = %ip, error = %e, "unreadable query; denying");
                return deny(request, response_handle).await;
            }
        };

        match self.evaluate(&ip, &qname) {
            Decision::Allow => {
                debug!(client = %ip, query = %qname, "passing query downstream");
                self.next.handle_request(request, response_handle).await
            }
            Decision::Deny => {
                info!(client = %ip, query = %qname, "blocking query");
                deny(request, response_handle).await
            }
        }
    }
}

/// Answer the request with NXDOMAIN.
async fn deny<R: ResponseHandler>(request: &Request, mut response_handle: R) -> ResponseInfo {
    let response = MessageResponseBuilder::from_message_request(request)
        .error_msg(request.header(), ResponseCode::NXDomain);

    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "failed to send NXDOMAIN response");
            let mut header = Header::response_from_request(request.header());
            header.set_response_code(ResponseCode::NXDomain);
            ResponseInfo::from(header)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use warden_filter::{ClientPolicy, ListKind};

    struct NoopNext;

    #[async_trait]
    impl RequestHandler for NoopNext {
        async fn handle_request<R: ResponseHandler>(
            &self,
            request: &Request,
            response_handle: R,
        ) -> ResponseInfo {
            deny(request, response_handle).await
        }
    }

    fn handler() -> (TempDir, FilterHandler<NoopNext>) {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FilterEngine::new(
            dir.path().join("clients.json"),
            dir.path().join("blocklists"),
            dir.path().join("whitelists"),
        ));
        engine.initialize().unwrap();
        engine
            .create_list(
                "ads",
                ListKind::Block,
                &["example.com !mail".to_string()],
            )
            .unwrap();
        engine
            .create_client(ClientPolicy {
                ip: "10.0.0.1".to_string(),
                blocklists: vec!["ads".to_string()],
                whitelists: vec![],
                mode: ListKind::Block,
            })
            .unwrap();
        (dir, FilterHandler::new(engine, NoopNext))
    }

    #[test]
    fn evaluate_strips_fqdn_dot() {
        let (_dir, handler) = handler();
        assert_eq!(handler.evaluate("10.0.0.1", "example.com."), Decision::Deny);
        assert_eq!(
            handler.evaluate("10.0.0.1", "mail.example.com."),
            Decision::Allow
        );
        assert_eq!(handler.evaluate("10.0.0.1", "other.com."), Decision::Allow);
    }

    #[test]
    fn evaluate_denies_unknown_client() {
        let (_dir, handler) = handler();
        assert_eq!(
            handler.evaluate("192.168.1.50", "other.com."),
            Decision::Deny
        );
    }
}

//! HTTP/1 client speaking through an overlay dialer.

use crate::overlay::dialer::Dialer;
use crate::overlay::OverlayError;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use log::debug;

/// Errors from one upstream request attempt.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error("Upstream HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

/// Per-backend HTTP client.
///
/// Each request dials the overlay, performs an HTTP/1 handshake on the
/// resulting stream and drives the connection from a background task. The
/// connection lives for exactly one exchange; pooling is left to the
/// overlay SDK, which multiplexes dials over its own session.
#[derive(Clone)]
pub struct OverlayHttpClient {
    dialer: Dialer,
}

impl OverlayHttpClient {
    pub fn new(dialer: Dialer) -> Self {
        Self { dialer }
    }

    pub fn service(&self) -> &str {
        self.dialer.service()
    }

    pub async fn request(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, ClientError> {
        let stream = self.dialer.dial().await?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        let service = self.dialer.service().to_string();
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!("Upstream connection to {} closed: {}", service, err);
            }
        });

        Ok(sender.send_request(req).await?)
    }
}

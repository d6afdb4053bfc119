//! A `tower` layer that catches panics unwinding out of an inner service,
//! logs the payload, and turns them into a 500 response — so one bad request
//! cannot take the whole process down. Ported in spirit from the original
//! `panicCatcherMiddleware`; backtraces still reach stderr through the
//! default panic hook when `RUST_BACKTRACE=1` is set, this layer adds the
//! structured log and the 500 conversion the Go middleware provided.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use futures_util::FutureExt;
use tower::{Layer, Service};

#[derive(Debug, Clone, Default)]
pub struct CatchPanicLayer;

impl<S> Layer<S> for CatchPanicLayer {
    type Service = CatchPanicService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        CatchPanicService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct CatchPanicService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for CatchPanicService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        Box::pin(async move {
            match AssertUnwindSafe(inner.call(req)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    tracing::error!(
                        %method,
                        %path,
                        panic = %panic_message(&payload),
                        "mgmt-http: handler panicked, returning 500"
                    );
                    Ok((StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response())
                }
            }
        })
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

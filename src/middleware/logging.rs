//! # Request Logging Middleware
//!
//! Structured start/finish log lines for every HTTP request, with method,
//! path, peer address, status and duration.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::info;

pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingService { service }))
    }
}

pub struct RequestLoggingService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let peer = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(response) => {
                    info!(
                        method = %method,
                        path = %path,
                        peer = %peer,
                        status = response.status().as_u16(),
                        duration_ms,
                        "request completed"
                    );
                }
                Err(e) => {
                    info!(
                        method = %method,
                        path = %path,
                        peer = %peer,
                        error = %e,
                        duration_ms,
                        "request failed"
                    );
                }
            }

            result
        })
    }
}

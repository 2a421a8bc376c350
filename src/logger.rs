//! Request logging middleware
//!
//! Every request gets an operation id. It is visible to handlers through
//! [`current_operation_id`] for the duration of the request, so error
//! documents and log lines can be correlated.
use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::Method;
use actix_web::{Error, HttpMessage, ResponseError};
use futures::future::{ok, LocalBoxFuture, Ready};
use log::info;
use std::rc::Rc;
use std::time::Instant;
use uuid::Uuid;

tokio::task_local! {
    static OPERATION_ID: String;
    static IS_HEAD: bool;
}

/// The operation id of the request being handled, if any.
pub fn current_operation_id() -> Option<String> {
    OPERATION_ID.try_with(|id| id.clone()).ok()
}

pub fn current_request_is_head() -> bool {
    IS_HEAD.try_with(|head| *head).unwrap_or(false)
}

/// The channel a request was attributed to, set by the token parser.
#[derive(Clone, Debug)]
pub struct LoggedChannel(pub String);

#[derive(Default)]
pub struct Logger {}

impl<S, B> Transform<S, ServiceRequest> for Logger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = LoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(LoggerMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct LoggerMiddleware<S> {
    service: Rc<S>,
}

fn request_line(req: &ServiceRequest) -> String {
    if req.query_string().is_empty() {
        format!("{} {} {:?}", req.method(), req.path(), req.version())
    } else {
        format!(
            "{} {}?{} {:?}",
            req.method(),
            req.path(),
            req.query_string(),
            req.version()
        )
    }
}

impl<S, B> Service<ServiceRequest> for LoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let entry_time = Instant::now();
        let operation_id = Uuid::new_v4().simple().to_string();
        let is_head = req.method() == Method::HEAD;

        let remote_ip = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("-")
            .to_string();
        let request_line = request_line(&req);
        let user_agent = req
            .headers()
            .get("User-Agent")
            .and_then(|val| val.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let service = self.service.clone();
        let fut = async move {
            let log = |channel: &str, status: u16, size: u64| {
                info!(
                    "{} \"{}\" {} {} {} {} {:.6}",
                    remote_ip,
                    request_line,
                    channel,
                    status,
                    size,
                    user_agent,
                    entry_time.elapsed().as_secs_f64()
                );
            };

            // Middleware errors are turned into responses by the server, after
            // this scope ends; log them here with what we know.
            let res = match service.call(req).await {
                Ok(res) => res,
                Err(e) => {
                    log("-", e.as_response_error().status_code().as_u16(), 0);
                    return Err(e);
                }
            };

            let channel = res
                .request()
                .extensions()
                .get::<LoggedChannel>()
                .map(|c| c.0.clone())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "-".to_string());
            let size = match res.response().body().size() {
                BodySize::Sized(n) => n,
                _ => 0,
            };
            log(&channel, res.status().as_u16(), size);
            Ok(res)
        };

        Box::pin(OPERATION_ID.scope(operation_id, IS_HEAD.scope(is_head, fut)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ApiError, ComposerErrorCode};
    use actix_web::{test, web, App, HttpResponse};

    async fn fail() -> Result<HttpResponse, ApiError> {
        Err(ApiError::composer(ComposerErrorCode::ComposeNotFound))
    }

    async fn echo_operation_id() -> HttpResponse {
        HttpResponse::Ok().body(current_operation_id().unwrap_or_default())
    }

    #[actix_web::test]
    async fn test_operation_id_is_scoped_to_request() {
        assert!(current_operation_id().is_none());
        let app = test::init_service(
            App::new()
                .wrap(Logger::default())
                .route("/op", web::get().to(echo_operation_id))
                .route("/fail", web::route().to(fail)),
        )
        .await;

        let a = test::call_and_read_body(&app, test::TestRequest::get().uri("/op").to_request()).await;
        let b = test::call_and_read_body(&app, test::TestRequest::get().uri("/op").to_request()).await;
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/fail").to_request()).await;
        assert_eq!(resp.status().as_u16(), 404);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "IMAGE-BUILDER-COMPOSER-15");
        assert_eq!(body["operation_id"].as_str().unwrap().len(), 32);
    }

    async fn echo_path(path: web::Path<String>) -> HttpResponse {
        HttpResponse::Ok().body(path.into_inner())
    }

    #[actix_web::test]
    async fn test_scoped_routes_resolve_path_params() {
        let app = test::init_service(
            App::new()
                .wrap(Logger::default())
                .service(web::scope("/api").route("/items/{id}", web::get().to(echo_path))),
        )
        .await;
        let req = test::TestRequest::get().uri("/api/items/abc").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert_eq!(test::read_body(resp).await, "abc");
    }

    #[actix_web::test]
    async fn test_head_errors_have_no_body() {
        let app = test::init_service(
            App::new()
                .wrap(Logger::default())
                .route("/fail", web::route().to(fail)),
        )
        .await;
        let req = test::TestRequest::default()
            .method(Method::HEAD)
            .uri("/fail")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 404);
        assert!(test::read_body(resp).await.is_empty());
    }
}

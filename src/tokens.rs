use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::error::{ErrorForbidden, ErrorUnauthorized};
use actix_web::http::header::{HeaderValue, AUTHORIZATION};
use actix_web::{Error, HttpMessage, HttpRequest};
use futures::future::{ok, LocalBoxFuture, Ready};
use jwt::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::rc::Rc;

use crate::config::JwtConfig;
use crate::errors::{Api, ApiError, ComposerErrorCode, WorkerErrorCode};
use crate::logger::LoggedChannel;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    /// Every other claim, tenant fields among them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Looks up a claim; dots walk into nested objects.
    fn lookup(&self, field: &str) -> Option<&Value> {
        let mut parts = field.split('.');
        let mut value = self.extra.get(parts.next()?)?;
        for part in parts {
            value = value.get(part)?;
        }
        Some(value)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TenantError {
    #[error("request carries no verified claims")]
    NoClaims,

    #[error("none of the tenant provider fields are set")]
    NotFound,
}

/// Maps verified claims to the channel a request may see.
#[derive(Clone, Debug)]
pub struct TenantResolver {
    enabled: bool,
    provider_fields: Vec<String>,
}

impl TenantResolver {
    pub fn new(config: &JwtConfig) -> Self {
        TenantResolver {
            enabled: config.enabled,
            provider_fields: config.tenant_provider_fields.clone(),
        }
    }

    pub fn disabled() -> Self {
        TenantResolver {
            enabled: false,
            provider_fields: vec![],
        }
    }

    pub fn channel(&self, claims: Option<&Claims>) -> Result<String, TenantError> {
        if !self.enabled {
            return Ok(String::new());
        }
        let claims = claims.ok_or(TenantError::NoClaims)?;
        for field in self.provider_fields.iter() {
            let tenant = match claims.lookup(field) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            if !tenant.is_empty() {
                return Ok(format!("org-{tenant}"));
            }
        }
        Err(TenantError::NotFound)
    }
}

pub trait ClaimsValidator {
    fn get_claims(&self) -> Option<Claims>;
    fn tenant_channel(&self, resolver: &TenantResolver, api: Api) -> Result<String, ApiError>;
}

impl ClaimsValidator for HttpRequest {
    fn get_claims(&self) -> Option<Claims> {
        self.extensions().get::<Claims>().cloned()
    }

    fn tenant_channel(&self, resolver: &TenantResolver, api: Api) -> Result<String, ApiError> {
        resolver
            .channel(self.get_claims().as_ref())
            .map_err(|e| match api {
                Api::Composer => ApiError::composer(ComposerErrorCode::TenantNotFound),
                Api::Worker => ApiError::worker(WorkerErrorCode::TenantNotFound),
            }
            .with_internal(e))
    }
}

fn parse_authorization(header: &HeaderValue) -> Option<String> {
    // "Bearer *" length
    if header.len() < 8 {
        return None;
    }

    let mut parts = header.to_str().ok()?.splitn(2, ' ');
    match parts.next() {
        Some("Bearer") => (),
        _ => return None,
    }

    parts.next().map(|token| token.to_string())
}

struct Inner {
    api: Api,
    secret: Vec<u8>,
    acl: Vec<String>,
    resolver: TenantResolver,
}

impl Inner {
    fn unauthenticated(&self, msg: &'static str) -> Error {
        match self.api {
            Api::Composer => ApiError::composer(ComposerErrorCode::Unauthenticated)
                .with_internal(msg)
                .into(),
            Api::Worker => ErrorUnauthorized(msg),
        }
    }

    fn forbidden(&self, sub: &str) -> Error {
        let msg = format!("subject {sub:?} is not in the acl");
        match self.api {
            Api::Composer => ApiError::composer(ComposerErrorCode::Unauthorized)
                .with_internal(msg)
                .into(),
            Api::Worker => ErrorForbidden(msg),
        }
    }

    fn validate(&self, req: &ServiceRequest) -> Result<Claims, Error> {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .ok_or_else(|| self.unauthenticated("No bearer token"))?;
        let token =
            parse_authorization(header).ok_or_else(|| self.unauthenticated("Invalid bearer token"))?;

        let key = DecodingKey::from_secret(&self.secret);
        let claims = decode::<Claims>(&token, &key, &Validation::new(Algorithm::HS256))
            .map_err(|_| self.unauthenticated("Invalid token"))?
            .claims;

        if !self.acl.is_empty() && !self.acl.contains(&claims.sub) {
            return Err(self.forbidden(&claims.sub));
        }
        Ok(claims)
    }
}

/// Verifies the bearer token of every request in a scope and stores its
/// claims in the request extensions. Lets everything through when jwt is
/// disabled.
pub struct TokenParser {
    enabled: bool,
    inner: Rc<Inner>,
}

impl TokenParser {
    pub fn new(api: Api, config: &JwtConfig) -> Self {
        TokenParser {
            enabled: config.enabled,
            inner: Rc::new(Inner {
                api,
                secret: config.secret.clone(),
                acl: config.acl.clone(),
                resolver: TenantResolver::new(config),
            }),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for TokenParser
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = TokenParserMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(TokenParserMiddleware {
            service: Rc::new(service),
            enabled: self.enabled,
            inner: self.inner.clone(),
        })
    }
}

pub struct TokenParserMiddleware<S> {
    service: Rc<S>,
    enabled: bool,
    inner: Rc<Inner>,
}

impl<S, B> Service<ServiceRequest> for TokenParserMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if self.enabled {
            let claims = match self.inner.validate(&req) {
                Ok(claims) => claims,
                // Rendered here, while the request's operation id is still in scope
                Err(e) => return Box::pin(ok(req.error_response(e).map_into_right_body())),
            };
            if let Ok(channel) = self.inner.resolver.channel(Some(&claims)) {
                req.extensions_mut().insert(LoggedChannel(channel));
            }
            req.extensions_mut().insert(claims);
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}

#[cfg(test)]
pub mod test_tokens {
    use super::*;
    use jwt::{encode, EncodingKey, Header};

    pub const SECRET: &[u8] = b"test-secret";

    pub fn jwt_config() -> JwtConfig {
        JwtConfig {
            enabled: true,
            secret: SECRET.to_vec(),
            ..Default::default()
        }
    }

    /// A bearer token for the given tenant claims.
    pub fn bearer(sub: &str, extra: Value) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            extra: extra.as_object().cloned().unwrap_or_default(),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap();
        format!("Bearer {token}")
    }
}

#[cfg(test)]
mod tests {
    use super::test_tokens::*;
    use super::*;
    use crate::logger::Logger;
    use actix_web::{test as actix_test, web, App, HttpResponse};
    use serde_json::json;

    fn claims(extra: Value) -> Claims {
        Claims {
            sub: "worker".to_string(),
            exp: 0,
            extra: extra.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_tenant_resolution() {
        let resolver = TenantResolver::new(&jwt_config());
        assert_eq!(
            resolver.channel(Some(&claims(json!({"rh-org-id": "42"})))),
            Ok("org-42".to_string())
        );
        // Empty values fall through to the next provider field.
        assert_eq!(
            resolver.channel(Some(&claims(json!({"rh-org-id": "", "account_id": 987})))),
            Ok("org-987".to_string())
        );
        assert_eq!(
            resolver.channel(Some(&claims(json!({"other": "1"})))),
            Err(TenantError::NotFound)
        );
        assert_eq!(resolver.channel(None), Err(TenantError::NoClaims));

        assert_eq!(TenantResolver::disabled().channel(None), Ok(String::new()));
    }

    #[test]
    fn test_nested_provider_field() {
        let resolver = TenantResolver::new(&JwtConfig {
            tenant_provider_fields: vec!["identity.org_id".to_string()],
            ..jwt_config()
        });
        assert_eq!(
            resolver.channel(Some(&claims(json!({"identity": {"org_id": "7"}})))),
            Ok("org-7".to_string())
        );
    }

    #[test]
    fn test_parse_authorization() {
        assert_eq!(
            parse_authorization(&HeaderValue::from_static("Bearer abc")),
            Some("abc".to_string())
        );
        assert_eq!(parse_authorization(&HeaderValue::from_static("Basic abcdef")), None);
        assert_eq!(parse_authorization(&HeaderValue::from_static("Bearer")), None);
    }

    async fn whoami(req: HttpRequest) -> HttpResponse {
        let resolver = TenantResolver::new(&jwt_config());
        match req.tenant_channel(&resolver, Api::Composer) {
            Ok(channel) => HttpResponse::Ok().body(channel),
            Err(e) => HttpResponse::from_error(e),
        }
    }

    #[actix_web::test]
    async fn test_token_parser() {
        let config = JwtConfig {
            acl: vec!["worker".to_string()],
            ..jwt_config()
        };
        let app = actix_test::init_service(
            App::new().wrap(Logger::default()).service(
                web::scope("/api")
                    .wrap(TokenParser::new(Api::Composer, &config))
                    .route("/whoami", web::get().to(whoami)),
            ),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/api/whoami").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 401);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["code"], "IMAGE-BUILDER-COMPOSER-401");
        assert_eq!(body["operation_id"].as_str().unwrap().len(), 32);

        let req = actix_test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header((AUTHORIZATION, "Bearer garbage"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status().as_u16(), 401);

        let req = actix_test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header((AUTHORIZATION, bearer("intruder", json!({"rh-org-id": "1"}))))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status().as_u16(), 403);

        let req = actix_test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header((AUTHORIZATION, bearer("worker", json!({"rh-org-id": "42"}))))
            .to_request();
        let body = actix_test::call_and_read_body(&app, req).await;
        assert_eq!(body, "org-42");
    }

    #[actix_web::test]
    async fn test_disabled_lets_everything_through() {
        let app = actix_test::init_service(
            App::new().service(
                web::scope("/api")
                    .wrap(TokenParser::new(Api::Worker, &JwtConfig::default()))
                    .route("/ping", web::get().to(HttpResponse::Ok)),
            ),
        )
        .await;
        let req = actix_test::TestRequest::get().uri("/api/ping").to_request();
        assert!(actix_test::call_service(&app, req).await.status().is_success());
    }
}

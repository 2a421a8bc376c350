use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::web::{self, Data};
use actix_web::{App, Error, HttpResponse};
use std::sync::Arc;

use crate::api;
use crate::config::Config;
use crate::errors::{Api, ApiError, ComposerErrorCode, WorkerErrorCode};
use crate::logger::Logger;
use crate::planner::Planner;
use crate::tokens::{TenantResolver, TokenParser};
use crate::worker::WorkerServer;

pub const COMPOSER_SCOPE: &str = "/api/image-builder-composer/v2";
pub const WORKER_SCOPE: &str = "/api/worker/v1";

pub struct AppState {
    pub planner: Arc<Planner>,
    pub server: Arc<WorkerServer>,
    pub tenants: TenantResolver,
    pub config: Arc<Config>,
}

async fn composer_not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::composer(ComposerErrorCode::ResourceNotFound))
}

async fn worker_not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::worker(WorkerErrorCode::ResourceNotFound))
}

fn json_config(api: Api) -> web::JsonConfig {
    web::JsonConfig::default().error_handler(move |err, _req| {
        match api {
            Api::Composer => ApiError::composer(ComposerErrorCode::BodyDecodingError),
            Api::Worker => ApiError::worker(WorkerErrorCode::BodyDecodingError),
        }
        .with_internal(err)
        .into()
    })
}

pub fn create_app(
    state: Data<AppState>,
    config: &Config,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    use api::compose as c;
    use api::worker as w;

    App::new()
        .app_data(state)
        .wrap(Logger::default())
        .service(
            web::scope(COMPOSER_SCOPE)
                .wrap(TokenParser::new(Api::Composer, &config.jwt))
                .app_data(json_config(Api::Composer))
                .service(web::resource("/compose").route(web::post().to(c::post_compose)))
                .service(web::resource("/composes").route(web::get().to(c::get_composes)))
                .service(
                    web::resource("/composes/{id}")
                        .name("compose_status")
                        .route(web::get().to(c::get_compose))
                        .route(web::delete().to(c::delete_compose)),
                )
                .service(web::resource("/composes/{id}/logs").route(web::get().to(c::get_compose_logs)))
                .service(
                    web::resource("/composes/{id}/manifests")
                        .route(web::get().to(c::get_compose_manifests)),
                )
                .service(
                    web::resource("/composes/{id}/metadata")
                        .route(web::get().to(c::get_compose_metadata)),
                )
                .service(web::resource("/composes/{id}/sboms").route(web::get().to(c::get_compose_sboms)))
                .service(
                    web::resource("/composes/{id}/download").route(web::get().to(c::download_compose)),
                )
                .service(web::resource("/composes/{id}/clone").route(web::post().to(c::clone_compose)))
                .service(
                    web::resource("/clones/{id}")
                        .name("clone_status")
                        .route(web::get().to(c::get_clone_status)),
                )
                .service(
                    web::resource("/depsolve/blueprint").route(web::post().to(c::depsolve_blueprint)),
                )
                .service(web::resource("/search-packages").route(web::post().to(c::search_packages)))
                .service(web::resource("/distributions").route(web::get().to(c::get_distributions)))
                .service(web::resource("/errors").route(web::get().to(c::list_errors)))
                .service(web::resource("/errors/{id}").route(web::get().to(c::get_error)))
                .default_service(web::route().to(composer_not_found)),
        )
        .service(
            web::scope(WORKER_SCOPE)
                .wrap(TokenParser::new(Api::Worker, &config.jwt))
                .app_data(json_config(Api::Worker))
                .service(web::resource("/status").route(web::get().to(w::status)))
                .service(web::resource("/jobs").route(web::post().to(w::request_job)))
                .service(
                    web::resource("/jobs/{token}")
                        .route(web::get().to(w::get_job))
                        .route(web::patch().to(w::update_job)),
                )
                .service(web::resource("/jobs/{token}/heartbeat").route(web::post().to(w::heartbeat)))
                .service(
                    web::resource("/jobs/{token}/artifacts/{name}")
                        .route(web::put().to(w::upload_artifact))
                        .route(web::post().to(w::upload_artifact)),
                )
                .service(web::resource("/errors").route(web::get().to(w::list_errors)))
                .service(web::resource("/errors/{id}").route(web::get().to(w::get_error)))
                .default_service(web::route().to(worker_not_found)),
        )
}

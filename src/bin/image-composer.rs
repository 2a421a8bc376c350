use dotenv::dotenv;
use std::env;
use std::path::PathBuf;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config_path = PathBuf::from(env::var("COMPOSER_CONFIG").unwrap_or_else(|_| "config.json".to_string()));
    let config = composer::load_config(&config_path)?;

    let server = composer::start(config)?;
    server.await
}

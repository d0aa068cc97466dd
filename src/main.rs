pub mod config;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod language;
pub mod workspace;

#[get("/")]
async fn service_index() -> impl Responder {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(r#"
<!doctype html>
<html lang="en">
    <head>
        <meta charset="UTF-8">
        <title>Code Runner</title>
    </head>
    <body>
        <h1>Usage</h1>
        <section>
            <h2>POST /api/run</h2>
            <p>Runs the code in an isolated container (no network, limited memory and CPU, 5 second wall clock by default).</p>
            <p>Input: JSON</p>
            <pre>{
    "language": "python" | "javascript" | "c" | "cpp" | "java" | "sql",
    "code": string,
    "stdin": string?,
}</pre>
            <p>Output: JSON</p>
            <pre>{
    "output": string,
    "error": string | null,
    "exitCode": number?,
}</pre>
        </section>
        <section>
            <h2>GET /api/languages</h2>
            <p>Lists the supported languages with their source file names and container images.</p>
        </section>
    </body>
</html>
    "#)
}

#[derive(Deserialize)]
struct RunRequestData {
    language: Option<String>,
    code: Option<String>,
    stdin: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
struct RunResponse {
    output: String,
    /// Always present; `null` only when the runtime is missing.
    error: Option<String>,
    #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
}

impl From<Outcome> for RunResponse {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed { stdout, stderr, exit_code } => RunResponse {
                output: stdout,
                error: Some(stderr),
                exit_code: Some(exit_code),
            },
            Outcome::TimedOut { limit_secs } => RunResponse {
                output: String::new(),
                error: Some(format!("Execution Timed Out ({limit_secs}s limit)")),
                exit_code: None,
            },
            Outcome::RuntimeMissing { runtime } => RunResponse {
                output: runtime_missing_guidance(&runtime),
                error: None,
                exit_code: None,
            },
            Outcome::ImageMissing { language, image, detail } => {
                let mut error = format!(
                    "Container image '{image}' for {language} was not found. Build it with:\n    docker build -t {image} images/{language}"
                );
                if !detail.is_empty() {
                    error.push_str("\n\n");
                    error.push_str(&detail);
                }
                RunResponse {
                    output: String::new(),
                    error: Some(error),
                    exit_code: None,
                }
            }
            Outcome::Failed { message } => RunResponse {
                output: String::new(),
                error: Some(message),
                exit_code: None,
            },
        }
    }
}

fn runtime_missing_guidance(runtime: &str) -> String {
    format!(
        "Code execution is unavailable: the container runtime '{runtime}' is not installed on the server or is not on its PATH.\n\
         \n\
         To enable it:\n\
         1. Install Docker (https://docs.docker.com/get-docker/) on the server.\n\
         2. Build the language images: cargo run --bin build_images\n\
         3. Restart the service and run your code again."
    )
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for ExecutionError {
    fn status_code(&self) -> StatusCode {
        match self {
            ExecutionError::Validation(_) => StatusCode::BAD_REQUEST,
            ExecutionError::Workspace(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ExecutionError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            ExecutionError::Validation(err) => err.to_string(),
            ExecutionError::Workspace(_) => "Failed to prepare execution workspace".to_string(),
            ExecutionError::Busy => "Too many executions in progress, try again later".to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody { error })
    }
}

#[post("/api/run")]
async fn service_run(
    executor: web::Data<Executor>,
    data: web::Json<RunRequestData>,
) -> Result<web::Json<RunResponse>, ExecutionError> {
    let RunRequestData { language, code, stdin } = data.into_inner();
    let outcome = executor
        .execute(language.as_deref(), code.as_deref(), stdin.as_deref())
        .await?;
    Ok(web::Json(outcome.into()))
}

#[derive(Serialize)]
struct LanguagesResponse {
    languages: Vec<LanguageDescriptor>,
}

#[get("/api/languages")]
async fn service_languages(executor: web::Data<Executor>) -> impl Responder {
    web::Json(LanguagesResponse {
        languages: executor.registry().descriptors(),
    })
}

#[get("/api/health")]
async fn service_health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| {
            let body = ErrorBody { error: err.to_string() };
            actix_web::error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
        })
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(service_index)
        .service(service_run)
        .service(service_languages)
        .service(service_health);
}

fn load_tls(tls: &TlsConfig) -> anyhow::Result<rustls::ServerConfig> {
    let mut cert_file = BufReader::new(
        File::open(&tls.cert).with_context(|| format!("opening {}", tls.cert.display()))?,
    );
    let mut key_file = BufReader::new(
        File::open(&tls.key).with_context(|| format!("opening {}", tls.key.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_file).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut key_file)?
        .ok_or_else(|| anyhow!("no private key found in {}", tls.key.display()))?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

/// Runs untrusted snippets in per-language containers behind `POST /api/run`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file; a missing file means defaults
    #[arg(short, long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_path(&args.config)?;
    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let executor = web::Data::new(Executor::new(&config)?);
    if let Err(err) = executor.runner().probe().await {
        // keep serving; requests get an in-band diagnostic
        warn!(error = %err, "container runtime unavailable");
    }

    let max_body = config.server.max_body_bytes;
    let app_executor = executor.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();
        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(app_executor.clone())
            .app_data(json_config(max_body))
            .configure(routes)
    });

    let bind = config.server.bind.as_str();
    let server = match &config.server.tls {
        Some(tls) => server.bind_rustls_0_22(bind, load_tls(tls)?)?,
        None => server.bind(bind)?,
    };
    info!(
        %bind,
        tls = config.server.tls.is_some(),
        workspace = %executor.workspace_root().path().display(),
        runtime = %config.runtime.executable,
        "code runner listening"
    );
    server.run().await?;
    Ok(())
}

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{get, middleware, post, web, App, HttpResponse, HttpServer, Responder, ResponseError};
use anyhow::{anyhow, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, TlsConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use error::ExecutionError;
use execution::{Executor, Outcome};
use language::LanguageDescriptor;

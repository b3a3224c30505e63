use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{get, put, web, App, HttpResponse, HttpServer, Responder};
use log::{error, info};
use serde::Deserialize;

use nick_gen_core::config::ConfigManager;
use nick_gen_core::error::ConfigError;
use nick_gen_core::{Error, NicknamePipeline};

mod logging;

/// Query parameters of the `/v1/generate` endpoint
#[derive(Deserialize)]
struct GenerateParams {
	style: Option<String>,
	count: Option<usize>,
	persist: Option<bool>,
}

#[derive(Deserialize)]
struct NamesQuery {
	style: Option<String>,
	limit: Option<usize>,
}

#[derive(Deserialize)]
struct StyleQuery {
	style: Option<String>,
}

type SharedPipeline = web::Data<NicknamePipeline>;

/// Style of the query, or the default one from `config.yaml`.
fn resolve_style(pipeline: &NicknamePipeline, style: &Option<String>) -> Result<String, HttpResponse> {
	match style {
		Some(s) if !s.trim().is_empty() => Ok(s.trim().to_owned()),
		_ => pipeline
			.config()
			.system()
			.generation
			.style
			.ok_or_else(|| HttpResponse::BadRequest().body("Missing style")),
	}
}

fn error_response(e: Error) -> HttpResponse {
	match e {
		Error::Config(ConfigError::UnknownStyle(_) | ConfigError::InvalidStyle { .. }) => {
			HttpResponse::BadRequest().body(e.to_string())
		}
		e => {
			error!("request failed: {e}");
			HttpResponse::InternalServerError().body(e.to_string())
		}
	}
}

/// Runs a blocking pipeline call off the async workers.
async fn run_blocking<T, F>(pipeline: SharedPipeline, f: F) -> Result<T, HttpResponse>
where
	T: Send + 'static,
	F: FnOnce(&NicknamePipeline) -> nick_gen_core::Result<T> + Send + 'static,
{
	match web::block(move || f(pipeline.get_ref())).await {
		Ok(Ok(value)) => Ok(value),
		Ok(Err(e)) => Err(error_response(e)),
		Err(_) => Err(HttpResponse::InternalServerError().body("Worker failed")),
	}
}

/// HTTP GET endpoint `/v1/styles`
///
/// Enabled styles, one per line.
#[get("/v1/styles")]
async fn get_styles(data: SharedPipeline) -> impl Responder {
	match run_blocking(data, |pipeline| Ok(pipeline.config().list_styles())).await {
		Ok(styles) => HttpResponse::Ok().body(styles.join("\n")),
		Err(response) => response,
	}
}

/// HTTP GET endpoint `/v1/generate`
///
/// Generates nicknames for a style and returns the JSON report.
/// Names are stored unless `persist=false`.
#[get("/v1/generate")]
async fn get_generated(data: SharedPipeline, query: web::Query<GenerateParams>) -> impl Responder {
	let style = match resolve_style(&data, &query.style) {
		Ok(s) => s,
		Err(response) => return response,
	};
	let count = query.count.unwrap_or_else(|| data.config().system().generation.count);
	if count == 0 {
		return HttpResponse::BadRequest().body("Count must be greater than 0");
	}
	let persist = query.persist.unwrap_or(true);

	match run_blocking(data, move |pipeline| pipeline.generate(&style, count, persist)).await {
		Ok(report) => HttpResponse::Ok().json(report),
		Err(response) => response,
	}
}

/// HTTP GET endpoint `/v1/names`
///
/// Most recent stored names of a style, one per line.
#[get("/v1/names")]
async fn get_names(data: SharedPipeline, query: web::Query<NamesQuery>) -> impl Responder {
	let style = match resolve_style(&data, &query.style) {
		Ok(s) => s,
		Err(response) => return response,
	};
	let limit = query.limit;

	match run_blocking(data, move |pipeline| pipeline.storage().list_names(&style, limit)).await {
		Ok(names) => HttpResponse::Ok().body(names.join("\n")),
		Err(response) => response,
	}
}

/// HTTP GET endpoint `/v1/estimate`
///
/// Theoretical candidate count of each template of a style.
#[get("/v1/estimate")]
async fn get_estimate(data: SharedPipeline, query: web::Query<StyleQuery>) -> impl Responder {
	let style = match resolve_style(&data, &query.style) {
		Ok(s) => s,
		Err(response) => return response,
	};

	match run_blocking(data, move |pipeline| pipeline.estimate(&style)).await {
		Ok(estimates) => HttpResponse::Ok().json(estimates),
		Err(response) => response,
	}
}

/// HTTP GET endpoint `/v1/root_files`
///
/// Styles with word roots on disk, one per line.
#[get("/v1/root_files")]
async fn get_root_files(data: SharedPipeline) -> impl Responder {
	match run_blocking(data, |pipeline| pipeline.roots().stored_styles()).await {
		Ok(styles) => HttpResponse::Ok().body(styles.join("\n")),
		Err(response) => response,
	}
}

/// HTTP PUT endpoint `/v1/regenerate_roots`
///
/// Drops cached and stored word roots of a style and generates new ones.
#[put("/v1/regenerate_roots")]
async fn put_regenerate_roots(data: SharedPipeline, query: web::Query<StyleQuery>) -> impl Responder {
	let style = match &query.style {
		Some(s) if !s.trim().is_empty() => s.trim().to_owned(),
		_ => return HttpResponse::BadRequest().body("Missing or empty style"),
	};

	match run_blocking(data, move |pipeline| pipeline.regenerate_roots(&style)).await {
		Ok(count) => HttpResponse::Ok().body(format!("Word roots regenerated: {count}")),
		Err(response) => response,
	}
}

/// Main entry point for the server.
///
/// Loads the configuration directory (first argument, `config` by default),
/// builds the generation pipeline and starts an Actix-web HTTP server.
///
/// # Notes
/// - The server binds to 127.0.0.1:5000.
/// - Log level comes from `RUST_LOG` (default `info`).
/// - Logs go to the console and to daily rotated files under `NICK_GEN_LOG_DIR` (`logs` by default).
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	let log_dir = logging::log_dir();
	let _log_guard = logging::init(std::path::Path::new(&log_dir))?;
	info!("logging to {log_dir}/{}.*.log", logging::LOG_FILE);

	let config_dir = std::env::args().nth(1).unwrap_or_else(|| "config".to_owned());
	let pipeline = ConfigManager::new(&config_dir)
		.map_err(Error::from)
		.and_then(|config| NicknamePipeline::from_config(Arc::new(config)))
		.map_err(|e| std::io::Error::other(format!("failed to start from {config_dir}: {e}")))?;
	let shared_pipeline = web::Data::new(pipeline);

	info!("listening on 127.0.0.1:5000");
	HttpServer::new(move || {
		App::new()
			.wrap(Cors::permissive())
			.app_data(shared_pipeline.clone())
			.service(get_styles)
			.service(get_generated)
			.service(get_names)
			.service(get_estimate)
			.service(get_root_files)
			.service(put_regenerate_roots)
	})
		.bind(("127.0.0.1", 5000))?
		.run()
		.await
}

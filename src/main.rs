mod cli;

use clap::Parser;
use cli::{Cli, Commands, FetchArgs};
use serde_json::Value;
use servicetask::config::Config;
use servicetask::request::{ParameterEncoding, Parameters};
use servicetask::result::downcast_payload;
use servicetask::{BoxError, ServiceResult, UiThread, WebService};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    servicetask::observability::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch(args) => fetch(args).await?,
        Commands::Config(args) => println!("{}", load_config(args.config)?.to_toml()?),
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config, BoxError> {
    Ok(match path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    })
}

async fn fetch(args: FetchArgs) -> Result<(), BoxError> {
    let config = load_config(args.config)?;

    let ui = Arc::new(UiThread::spawn("ui")?);
    let service = WebService::from_config(&config)?.with_ui_dispatcher(ui);
    let task = service.request(args.method, &args.url)?;

    for (name, value) in args.headers {
        task.set_header(name, value);
    }
    if !args.query.is_empty() {
        let parameters: Parameters = args
            .query
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        task.set_parameters(&parameters, ParameterEncoding::Percent)?;
    }
    if let Some(body) = args.json {
        let body: Value = serde_json::from_str(&body)?;
        task.set_json_body(&body)?;
    }

    let failed = Arc::new(AtomicBool::new(false));
    let failed_flag = failed.clone();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    task.response_json(|json, _| Ok(ServiceResult::from_value(json.clone())))
        .update_ui(|value| match downcast_payload::<Value>(value) {
            Ok(json) => match serde_json::to_string_pretty(json.as_ref()) {
                Ok(text) => println!("{}", text),
                Err(e) => tracing::warn!(error = %e, "Failed to render response"),
            },
            Err(e) => tracing::warn!(error = %e, "Unexpected response value"),
        })
        .response_error(move |err| {
            failed_flag.store(true, Ordering::SeqCst);
            tracing::error!(error = %err, "Fetch failed");
        })
        .metrics_collected(move |metrics, response| {
            let _ = done_tx.send((metrics.clone(), response.map(|r| r.status.as_u16())));
        })
        .resume();

    let (metrics, status) = done_rx.await?;
    tracing::info!(
        task_id = %task.id(),
        status,
        fetch_ms = metrics.fetch_duration().map(|d| d.num_milliseconds()),
        json_ms = metrics.json_duration().map(|d| d.num_milliseconds()),
        "Fetch finished"
    );

    if failed.load(Ordering::SeqCst) {
        return Err("fetch failed".into());
    }
    Ok(())
}

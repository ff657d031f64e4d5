use clap::{Parser, Subcommand};
use reqwest::Method;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "servicetask")]
#[command(about = "servicetask CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a URL through a service task and print the JSON response
    Fetch(FetchArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (defaults to `SERVICETASK_CONFIG` or `config/servicetask.toml`)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Absolute URL, or a path relative to the configured base URL
    pub url: String,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "GET", value_parser = parse_method)]
    pub method: Method,

    /// Extra request header, `Name: value`
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Query or form parameter, `key=value`
    #[arg(long = "query", short = 'q', value_parser = parse_pair)]
    pub query: Vec<(String, String)>,

    /// JSON request body
    #[arg(long)]
    pub json: Option<String>,

    /// Configuration file (defaults to `SERVICETASK_CONFIG` or `config/servicetask.toml`)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{}'", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected `key=value`, got '{}'", raw))
}

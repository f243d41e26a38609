//! OpenAPI Exchange CLI
//!
//! Command-line interface for resolving operations and unmarshalling
//! requests and responses against an OpenAPI contract.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use oas_exchange::{
    load_contract, Contract, ExchangeError, ExchangeUnmarshaller, Options, SimpleRequest,
    SimpleResponse,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use url::{Position, Url};

#[derive(Parser)]
#[command(name = "oas-exchange")]
#[command(about = "Resolve and unmarshal HTTP exchanges against an OpenAPI contract")]
#[command(version)]
struct Cli {
    /// Log resolution and unmarshalling steps to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the path, operation and server a request resolves to
    Find {
        #[command(flatten)]
        target: TargetArgs,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Unmarshal a request: parameters, body and security
    Request {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        exchange: ExchangeArgs,
    },

    /// Unmarshal the response to a request: headers and body
    Response {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        exchange: ExchangeArgs,

        /// Response status code
        #[arg(long)]
        status: u16,

        /// Request header sent along with the response's request (NAME:VALUE)
        #[arg(long = "request-header", value_name = "NAME:VALUE")]
        request_headers: Vec<String>,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Contract file (JSON or YAML)
    contract: PathBuf,

    /// HTTP method
    #[arg(long, short, default_value = "GET")]
    method: String,

    /// Full request URL, including the query string
    #[arg(long, conflicts_with = "webhook", required_unless_present = "webhook")]
    url: Option<String>,

    /// Webhook name to dispatch to instead of a URL
    #[arg(long, conflicts_with = "url")]
    webhook: Option<String>,

    /// Base URL that relative server URLs are joined to
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Args)]
struct ExchangeArgs {
    /// Header (NAME:VALUE), repeatable
    #[arg(long = "header", short = 'H', value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Cookie (NAME=VALUE), repeatable
    #[arg(long = "cookie", value_name = "NAME=VALUE")]
    cookies: Vec<String>,

    /// Body file
    #[arg(long)]
    body: Option<PathBuf>,

    /// Body content type
    #[arg(long, default_value = "application/json")]
    content_type: String,

    /// Fail on body media types without a deserializer
    #[arg(long)]
    strict: bool,

    /// Output results as JSON (for automation)
    #[arg(long)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Find { target, pretty } => run_find(&target, pretty),
        Commands::Request { target, exchange } => run_request(&target, &exchange),
        Commands::Response {
            target,
            exchange,
            status,
            request_headers,
        } => run_response(&target, &exchange, status, &request_headers),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Events go to stderr so stdout stays machine-readable. `RUST_LOG` wins
/// over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "oas_exchange=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

fn run_find(target: &TargetArgs, pretty: bool) -> Result<(), u8> {
    let contract = load(&target.contract)?;
    let request = build_request(target, &[], &[], None)?;
    let unmarshaller = ExchangeUnmarshaller::new(&contract, options(target, false));

    let resolved = unmarshaller.resolve(&request).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    print_json(&resolved.summary(), pretty)
}

fn run_request(target: &TargetArgs, exchange: &ExchangeArgs) -> Result<(), u8> {
    let contract = load(&target.contract)?;
    let body = read_body(exchange)?.map(|body| (body, exchange.content_type.as_str()));
    let request = build_request(target, &exchange.headers, &exchange.cookies, body)?;
    let unmarshaller = ExchangeUnmarshaller::new(&contract, options(target, exchange.strict));

    let result = unmarshaller.unmarshal_request(&request).map_err(|e| {
        report_error(exchange.json, &e.to_string());
        e.exit_code() as u8
    })?;
    report(exchange, result.is_valid(), &result, &result.errors)
}

fn run_response(
    target: &TargetArgs,
    exchange: &ExchangeArgs,
    status: u16,
    request_headers: &[String],
) -> Result<(), u8> {
    let contract = load(&target.contract)?;
    let request = build_request(target, request_headers, &[], None)?;

    let mut response = SimpleResponse::new(status);
    for header in &exchange.headers {
        let (name, value) = split_pair(header, ':')?;
        response = response.with_header(name, value);
    }
    if let Some(body) = read_body(exchange)? {
        response = response.with_body(exchange.content_type.as_str(), body);
    }

    let unmarshaller = ExchangeUnmarshaller::new(&contract, options(target, exchange.strict));
    let result = unmarshaller
        .unmarshal_response(&request, &response)
        .map_err(|e| {
            report_error(exchange.json, &e.to_string());
            e.exit_code() as u8
        })?;
    report(exchange, result.is_valid(), &result, &result.errors)
}

fn load(path: &Path) -> Result<Contract, u8> {
    load_contract(path).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })
}

fn options(target: &TargetArgs, strict: bool) -> Options {
    let options = Options::new().strict_media_types(strict);
    match &target.base_url {
        Some(base_url) => options.base_url(base_url.as_str()),
        None => options,
    }
}

fn read_body(exchange: &ExchangeArgs) -> Result<Option<Vec<u8>>, u8> {
    let Some(path) = &exchange.body else {
        return Ok(None);
    };
    std::fs::read(path).map(Some).map_err(|e| {
        eprintln!("Error reading {}: {}", path.display(), e);
        3u8
    })
}

fn build_request(
    target: &TargetArgs,
    headers: &[String],
    cookies: &[String],
    body: Option<(Vec<u8>, &str)>,
) -> Result<SimpleRequest, u8> {
    let mut request = match (&target.url, &target.webhook) {
        (_, Some(name)) => SimpleRequest::webhook(name.as_str(), target.method.as_str()),
        (Some(url), None) => {
            let (host_url, path) = split_url(url);
            SimpleRequest::new(host_url, target.method.as_str(), &path)
        }
        (None, None) => {
            eprintln!("Error: either --url or --webhook is required");
            return Err(2);
        }
    };

    for header in headers {
        let (name, value) = split_pair(header, ':')?;
        request = request.with_header(name, value);
    }
    for cookie in cookies {
        let (name, value) = split_pair(cookie, '=')?;
        request = request.with_cookie(name, value);
    }
    if let Some((body, content_type)) = body {
        request = request.with_body(content_type, body);
    }
    Ok(request)
}

/// Split an absolute URL into its origin and the rest; relative URLs have
/// no origin.
fn split_url(url: &str) -> (String, String) {
    match Url::parse(url) {
        Ok(parsed) if parsed.has_host() => (
            parsed.origin().ascii_serialization(),
            parsed[Position::BeforePath..Position::AfterQuery].to_string(),
        ),
        _ => (String::new(), url.to_string()),
    }
}

fn split_pair(pair: &str, separator: char) -> Result<(&str, &str), u8> {
    pair.split_once(separator)
        .map(|(name, value)| (name.trim(), value.trim()))
        .ok_or_else(|| {
            eprintln!("Error: expected NAME{}VALUE, got \"{}\"", separator, pair);
            2u8
        })
}

fn report<T: Serialize>(
    exchange: &ExchangeArgs,
    valid: bool,
    result: &T,
    errors: &[ExchangeError],
) -> Result<(), u8> {
    if exchange.json {
        let mut output = serde_json::to_value(result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        if let Some(fields) = output.as_object_mut() {
            fields.insert("valid".into(), valid.into());
        }
        print_json(&output, exchange.pretty)?;
    } else {
        print_json(result, exchange.pretty)?;
        if !valid {
            eprintln!("Unmarshalling failed:");
            for error in errors {
                eprintln!("  {}", error);
                for schema_error in error.schema_errors() {
                    eprintln!("    {}", schema_error);
                }
            }
        }
    }

    if valid {
        Ok(())
    } else {
        Err(1)
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), u8> {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);
    Ok(())
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

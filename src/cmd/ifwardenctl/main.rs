use clap::{Parser, Subcommand};
use ifwarden::internal::{api::MethodCall, dhcp6::request::Dhcp6Request};
use serde_json::{json, Value};
use std::fs;

const DEFAULT_URL: &str = "http://127.0.0.1:7780";

#[derive(Parser)]
#[command(name = "ifwardenctl")]
#[command(about = "Control client for the ifwarden manager", long_about = None)]
struct Cli {
    /// Manager base URL (default: $IFWARDEN_URL or http://127.0.0.1:7780)
    #[arg(long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a policy; an empty name lets the manager pick one
    CreatePolicy {
        #[arg(default_value = "")]
        name: String,
    },
    /// Look up the managed device object for an interface
    GetDevice {
        ifname: String,
    },
    /// Supply a credential for a security id and configuration path
    AddSecret {
        security_id: String,
        path: String,
        value: String,
    },
    /// List exposed objects
    Objects,
    /// Validate a DHCPv6 test-mode request document and print it
    Dhcp6Request {
        /// Path to the request XML
        #[arg(short, long)]
        request: Option<String>,

        /// Acquire timeout in seconds, overriding the document
        #[arg(short, long)]
        timeout: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let base_url = cli
        .url
        .or_else(|| std::env::var("IFWARDEN_URL").ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string());

    match &cli.command {
        Commands::CreatePolicy { name } => {
            call_method(&base_url, "createPolicy", vec![json!(name)]).await?;
        }
        Commands::GetDevice { ifname } => {
            call_method(&base_url, "getDevice", vec![json!(ifname)]).await?;
        }
        Commands::AddSecret {
            security_id,
            path,
            value,
        } => {
            call_method(
                &base_url,
                "addSecret",
                vec![json!(security_id), json!(path), json!(value)],
            )
            .await?;
        }
        Commands::Objects => {
            list_objects(&base_url).await?;
        }
        Commands::Dhcp6Request { request, timeout } => {
            check_dhcp6_request(request, *timeout)?;
        }
    }

    Ok(())
}

async fn call_method(
    base_url: &str,
    method: &str,
    args: Vec<Value>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!(
            "{}/v1/manager/{}",
            base_url.trim_end_matches('/'),
            method
        ))
        .json(&MethodCall { args })
        .send()
        .await?;

    print_reply(response).await
}

async fn list_objects(base_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let response = reqwest::get(format!("{}/v1/objects", base_url.trim_end_matches('/'))).await?;
    print_reply(response).await
}

async fn print_reply(response: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = response.status();
    let body: Value = response.json().await?;

    if !status.is_success() {
        let fault = body.get("error").and_then(|v| v.as_str()).unwrap_or("Failed");
        let message = body.get("message").and_then(|v| v.as_str()).unwrap_or("");
        return Err(format!("{}: {}", fault, message).into());
    }

    if let Some(path) = body.get("path").and_then(|v| v.as_str()) {
        println!("{}", path);
    } else {
        println!("{}", serde_json::to_string_pretty(&body)?);
    }
    Ok(())
}

fn check_dhcp6_request(
    request: &Option<String>,
    timeout: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let document = match request {
        Some(path) => Some(fs::read_to_string(path)?),
        None => None,
    };

    let mut parsed = Dhcp6Request::from_document(document.as_deref())?;
    parsed.override_timeout(timeout);
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

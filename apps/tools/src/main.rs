use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::{Map, Value};
use shared::{domain::Event, error::ApiError, protocol::ShadowDelta};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "displayctl", about = "Sends events to a running displayd")]
struct Cli {
    #[arg(long, env = "DISPLAY_SERVER_URL", default_value = "http://127.0.0.1:8088")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Posts one event to `/display`.
    Send {
        #[arg(long)]
        stage: String,
        /// `key=value`; values that parse as JSON are sent as JSON, anything else as a string.
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
        /// Extra fields as a JSON object, merged before `--field` values.
        #[arg(long)]
        json: Option<String>,
    },
    /// Pushes a desired shadow change through a loopback `displayd`.
    Desired {
        #[arg(long)]
        stage: Option<String>,
        /// Stage parameters as a JSON object; replaces the current `data`.
        #[arg(long)]
        data: Option<String>,
    },
    /// Delivers a message on a loopback broker topic, as a producer would.
    Publish {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        json: String,
    },
    /// Checks `/healthz` and prints the active stage.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let base = Url::parse(&cli.server_url)
        .with_context(|| format!("invalid server url: {}", cli.server_url))?;
    let http = Client::new();

    match cli.command {
        Command::Send {
            stage,
            fields,
            json,
        } => {
            let event = build_event(&stage, json.as_deref(), &fields)?;
            let res = http
                .post(base.join("display")?)
                .json(&event)
                .send()
                .await?;
            refused(res, "event").await?;
            println!("sent stage={}", event.stage);
        }
        Command::Desired { stage, data } => {
            let delta = build_delta(stage, data.as_deref())?;
            let res = http
                .post(base.join("shadow/desired")?)
                .json(&delta)
                .send()
                .await?;
            refused(res, "desired state").await?;
            println!("desired state sent");
        }
        Command::Publish { topic, json } => {
            let payload: Value =
                serde_json::from_str(&json).context("--json is not valid JSON")?;
            let res = http
                .post(base.join("broker/messages")?)
                .json(&serde_json::json!({ "topic": topic, "payload": payload }))
                .send()
                .await?;
            refused(res, "message").await?;
            println!("published to {topic}");
        }
        Command::Health => {
            let health = http
                .get(base.join("healthz")?)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            let status: Value = http
                .get(base.join("status")?)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let active = status
                .get("active_stage")
                .and_then(Value::as_str)
                .unwrap_or("none");
            println!("health={health} active_stage={active}");
        }
    }

    Ok(())
}

async fn refused(res: reqwest::Response, what: &str) -> Result<()> {
    if res.status().is_success() {
        return Ok(());
    }
    let status = res.status();
    let message = match res.json::<ApiError>().await {
        Ok(error) => error.message,
        Err(_) => status.to_string(),
    };
    Err(anyhow!("server refused {what} ({status}): {message}"))
}

fn build_delta(stage: Option<String>, data: Option<&str>) -> Result<ShadowDelta> {
    let data = match data {
        None => None,
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--data is not valid JSON")? {
            Value::Object(object) => Some(object),
            _ => return Err(anyhow!("--data must be a JSON object")),
        },
    };
    if stage.is_none() && data.is_none() {
        return Err(anyhow!("pass --stage, --data or both"));
    }
    Ok(ShadowDelta {
        stage,
        data,
        ..ShadowDelta::default()
    })
}

fn build_event(stage: &str, json: Option<&str>, fields: &[String]) -> Result<Event> {
    let mut payload = Map::new();
    if let Some(raw) = json {
        match serde_json::from_str::<Value>(raw).context("--json is not valid JSON")? {
            Value::Object(object) => payload.extend(object),
            _ => return Err(anyhow!("--json must be a JSON object")),
        }
    }
    for field in fields {
        let (key, raw) = field
            .split_once('=')
            .ok_or_else(|| anyhow!("field must look like key=value: {field}"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        payload.insert(key.trim().to_string(), value);
    }
    payload.insert("stage".into(), Value::String(stage.to_string()));

    Event::from_value(Value::Object(payload)).map_err(|error| anyhow!("invalid event: {error}"))
}

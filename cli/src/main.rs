//! Command-line front end for kinesis-reader: describe a stream, put a JSON record and
//! read recent records back into a file.

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_kinesis::primitives::{DateTime, DateTimeFormat};
use clap::{Args, Parser, Subcommand};
use kinesis_reader::{
    self as reader,
    stream::WaitConfig,
    types::{Record, StartingPosition},
    Client, StreamClient,
};
use serde_json::{json, Value};
use std::{fs, path::PathBuf, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Talk to an Amazon Kinesis data stream
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set the log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// AWS region of the stream
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Custom endpoint, e.g. a local emulator
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Stream name
    #[arg(short, long, env = "KINESIS_STREAM", default_value = "demo_data_stream")]
    stream: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the stream
    Create {
        /// Number of shards
        #[arg(default_value = "1")]
        shards: i32,

        /// Return as soon as the request is accepted
        #[arg(long)]
        no_wait: bool,

        /// Seconds to wait for the stream to become active
        #[arg(long, default_value = "60")]
        wait_timeout: u64,
    },

    /// Show the stream status and its shards
    Describe,

    /// Put one JSON record
    Put {
        /// Partition key routing the record to a shard
        partition_key: String,

        /// Record body, must be valid JSON
        json: String,
    },

    /// Read records from the first shard
    Read {
        /// Stop once at least this many records were read
        max_records: usize,

        #[command(flatten)]
        position: PositionArgs,

        /// Write records to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Records asked for in each round trip
        #[arg(long, default_value = "10")]
        limit: i32,

        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Milliseconds to pause after an empty batch
        #[arg(long, default_value = "1000")]
        poll_interval: u64,
    },
}

#[derive(Args)]
#[group(multiple = false)]
struct PositionArgs {
    /// Start at records arrived at or after this RFC 3339 timestamp
    #[arg(long)]
    since: Option<String>,

    /// Start at the oldest retained record (default)
    #[arg(long)]
    trim_horizon: bool,

    /// Start after the newest record
    #[arg(long)]
    latest: bool,

    /// Start at this sequence number
    #[arg(long)]
    at_sequence: Option<String>,
}

impl PositionArgs {
    fn starting_position(&self) -> Result<StartingPosition> {
        if self.trim_horizon {
            return Ok(StartingPosition::TrimHorizon);
        }

        if let Some(since) = &self.since {
            let ts = DateTime::from_str(since, DateTimeFormat::DateTime)
                .with_context(|| format!("invalid timestamp: {since}"))?;
            return Ok(StartingPosition::AtTimestamp(ts));
        }

        if let Some(seq) = &self.at_sequence {
            return Ok(StartingPosition::AtSequence(seq.clone()));
        }

        if self.latest {
            return Ok(StartingPosition::Latest);
        }

        Ok(StartingPosition::TrimHorizon)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(cli.region.clone()));
    if let Some(endpoint_url) = &cli.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }
    let config = loader.load().await;
    let client = Client::new(&config);

    match cli.command {
        Commands::Create {
            shards,
            no_wait,
            wait_timeout,
        } => {
            let wait = (!no_wait).then(|| {
                WaitConfig::new(Duration::from_secs(1), Duration::from_secs(wait_timeout))
            });
            let stream = StreamClient::new(client)
                .create(&cli.stream, shards, wait)
                .await?;

            match stream {
                Some(stream) => print_json(&describe_json(&stream))?,
                None => info!("Requested stream {}.", cli.stream),
            }
        }
        Commands::Describe => {
            let stream = StreamClient::new(client).describe(&cli.stream).await?;
            print_json(&describe_json(&stream))?;
        }
        Commands::Put {
            partition_key,
            json,
        } => {
            let data: Value = serde_json::from_str(&json).context("record body is not JSON")?;
            let client = StreamClient::new(client);
            let stream = client.describe(&cli.stream).await?;
            let output = client.put_record(&stream, &data, &partition_key).await?;

            print_json(&json!({
                "shard_id": output.shard_id,
                "sequence_number": output.sequence_number,
            }))?;
        }
        Commands::Read {
            max_records,
            position,
            output,
            limit,
            timeout,
            poll_interval,
        } => {
            let client = reader::stream::builder()
                .client(client)
                .limit(limit)
                .timeout(Some(Duration::from_secs(timeout)))
                .poll_interval(Some(Duration::from_millis(poll_interval)))
                .build();
            let stream = client.describe(&cli.stream).await?;

            match client
                .get_records(&stream, max_records, position.starting_position()?)
                .await
            {
                Ok(records) => write_records(&records, output.as_ref())?,
                Err(err) => {
                    warn!("Read failed after {} records.", err.records.len());
                    write_records(&err.records, output.as_ref())?;
                    return Err(err.into());
                }
            }
        }
    }

    Ok(())
}

fn describe_json(stream: &reader::types::StreamHandle) -> Value {
    json!({
        "name": stream.name(),
        "status": format!("{:?}", stream.status()),
        "shards": stream.shard_ids(),
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_records(records: &[Record], output: Option<&PathBuf>) -> Result<()> {
    let data = records
        .iter()
        .map(|record| String::from_utf8_lossy(record.data()).into_owned())
        .collect::<Vec<String>>();
    let body = serde_json::to_string(&data)?;

    match output {
        Some(path) => {
            fs::write(path, body).with_context(|| format!("cannot write {}", path.display()))?;
            info!("Wrote {} records to {}.", data.len(), path.display());
        }
        None => println!("{body}"),
    }

    Ok(())
}

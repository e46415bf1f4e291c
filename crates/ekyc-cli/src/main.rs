//! ekyc - operator tool for the eKYC engine.
//!
//! Encodes an identity frame from command-line flags, sends it to a
//! running engine over UDP and, unless told otherwise, waits for the
//! response frame and prints the decoded verdict.

use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ekyc_core::codec::{self, FrameFields, FRAME_LEN, MSG_ADD_USER, MSG_VERIFY_REQUEST};
use ekyc_core::config::ChannelBinding;
use ekyc_daemon::transport::udp::UdpTransport;
use ekyc_daemon::transport::Transport;
use tracing_subscriber::EnvFilter;

/// Operator tool for the eKYC identity-verification engine.
#[derive(Parser, Debug)]
#[command(name = "ekyc")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one identity frame and wait for the engine's reply.
    Send(SendArgs),
}

/// Which request to put in the `msg` field.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RequestKind {
    /// Ask whether the identity exists.
    Verify,
    /// Register the identity.
    Add,
}

impl RequestKind {
    const fn msg(self) -> &'static str {
        match self {
            Self::Verify => MSG_VERIFY_REQUEST,
            Self::Add => MSG_ADD_USER,
        }
    }
}

#[derive(Parser, Debug)]
struct SendArgs {
    /// Engine request endpoint, e.g. udp://127.0.0.1:50000
    #[arg(long, default_value = "udp://127.0.0.1:50000")]
    to: String,

    /// Local endpoint the engine publishes replies to,
    /// e.g. udp://127.0.0.1:10001
    #[arg(long, default_value = "udp://127.0.0.1:10001")]
    reply_on: String,

    /// Stream id for both bindings
    #[arg(long, default_value = "1001")]
    stream_id: u32,

    /// Request kind
    #[arg(long, value_enum, default_value = "verify")]
    request: RequestKind,

    /// Identity number
    #[arg(long)]
    id: String,

    /// Full name
    #[arg(long)]
    name: String,

    /// Document type
    #[arg(long, default_value = "passport")]
    doc_type: String,

    /// Document issue date (ISO-8601)
    #[arg(long, default_value = "2021-01-01")]
    date_of_issue: String,

    /// Document expiry date (ISO-8601)
    #[arg(long, default_value = "2031-01-01")]
    date_of_expiry: String,

    /// Address
    #[arg(long, default_value = "")]
    address: String,

    /// How long to wait for the reply before giving up
    #[arg(long, default_value = "5", value_name = "SECONDS")]
    timeout: u64,

    /// Fire the request without waiting for a reply
    #[arg(long)]
    no_wait: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let result = match args.cmd {
        Command::Send(send) => run_send(&send),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ekyc: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_send(args: &SendArgs) -> Result<()> {
    let mut frame = [0u8; FRAME_LEN];
    codec::encode(
        &FrameFields {
            msg: args.request.msg(),
            doc_type: &args.doc_type,
            id: &args.id,
            name: &args.name,
            date_of_issue: &args.date_of_issue,
            date_of_expiry: &args.date_of_expiry,
            address: &args.address,
            verified: "false",
        },
        &mut frame,
    )
    .context("encoding request frame")?;

    let transport = UdpTransport::new();

    // Bind the reply subscription before the request leaves, so a fast
    // engine cannot answer into the void.
    let mut replies = if args.no_wait {
        None
    } else {
        Some(
            transport
                .subscribe(&ChannelBinding {
                    channel: args.reply_on.clone(),
                    stream_id: args.stream_id,
                })
                .context("binding reply endpoint")?,
        )
    };

    let requests = transport
        .publication(&ChannelBinding {
            channel: args.to.clone(),
            stream_id: args.stream_id,
        })
        .context("connecting to engine")?;

    let offer = requests.offer(&frame);
    if !offer.is_success() {
        bail!("engine refused the frame: {offer}");
    }
    println!("sent {} for id={} name={}", args.request.msg(), args.id, args.name);

    let Some(replies) = replies.as_mut() else {
        return Ok(());
    };

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    let reply = loop {
        if Instant::now() >= deadline {
            bail!("no reply within {} seconds", args.timeout);
        }
        let mut received = None;
        replies.poll(&mut |bytes| received = Some(bytes.to_vec()), 1);
        if let Some(bytes) = received {
            break bytes;
        }
        std::thread::sleep(Duration::from_millis(5));
    };

    let decoded = codec::decode(&reply)
        .map_err(|e| anyhow::anyhow!("undecodable reply: {e}"))?;
    println!(
        "{}: id={} name={} verified={}",
        decoded.msg(),
        decoded.id(),
        decoded.name(),
        decoded.verified()
    );
    Ok(())
}

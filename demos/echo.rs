//! Joins channels and answers `!echo <text>` with `<text>`.
//!
//! ```text,ignore
//! $ cargo run --example echo -- \
//!   --host irc.libera.chat \
//!   --nick ircline-echo \
//!   --channel '#ircline'
//! ```

use anyhow::{bail, Result};
use clap::Parser;
use futures_util::StreamExt;
use ircline::client::Diagnostic;
use ircline::{Command, Security, Session};
use std::time::Duration;

#[derive(Parser)]
#[command(author, version)]
struct Args {
  /// Server to connect to
  #[arg(long)]
  host: String,

  /// Port, defaults to 6697 (or 6667 with --plain)
  #[arg(long)]
  port: Option<u16>,

  /// Connect without TLS
  #[arg(long)]
  plain: bool,

  #[arg(long, default_value = "ircline-echo")]
  nick: String,

  /// Channels to join
  #[arg(long)]
  channel: Vec<String>,

  /// Connect timeout in seconds
  #[arg(long, default_value_t = 10)]
  timeout: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let security = if args.plain {
    Security::Plain
  } else {
    Security::Tls
  };
  let port = args.port.unwrap_or(security.default_port());

  let session = Session::builder(&args.nick).build();
  let mut messages = session.subscribe();
  let (closed_tx, mut closed) = tokio::sync::mpsc::unbounded_channel();
  session.connection().on_diagnostic(move |d| {
    if let Diagnostic::Closed(reason) = d {
      let _ = closed_tx.send(reason.to_string());
    }
  });

  if !session
    .connect(&args.host, port, Duration::from_secs(args.timeout), security)
    .await
  {
    bail!("failed to connect to {}:{port}", args.host);
  }
  session.join(&args.channel).await;

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        session.quit("bye").await;
        session.disconnect().await;
        break;
      }
      Some(reason) = closed.recv() => {
        println!("{reason}");
        break;
      }
      msg = messages.next() => {
        let Some(msg) = msg else { break };
        if msg.command() != Command::Privmsg {
          continue;
        }
        println!("{} <{}> {}", msg.target(), msg.nick().unwrap_or("?"), msg.text());
        if let Some(text) = msg.text().strip_prefix("!echo ") {
          session.privmsg(msg.target(), text).await;
        }
      }
    }
  }

  Ok(())
}

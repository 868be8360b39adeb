use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use spannorm_core::{
    clock::SystemClock,
    config::Config,
    handler::SpanHandler,
    hooks::{Callbacks, OperationEnd, OperationStart},
    model::{ChatMessage, ChatResponse, Instance, LlmInstance, Role},
    payload::Payload,
    replay::Replayer,
    stream::{BoxStreamEv, StreamEvent, TracedStream},
    telemetry::{FinishedSpan, InMemoryBackend, NoContext},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "spannorm diagnostics tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines log of host notifications and print the spans
    Replay {
        #[arg(short, long, help = "JSON-lines log, one record per line")]
        input: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long, help = "Pretty-print the span JSON")]
        pretty: bool,
    },
    /// Load and validate a config file
    CheckConfig { path: PathBuf },
    /// Trace a synthetic streamed chat response (prints deltas live)
    DemoStream {
        #[arg(short, long, help = "Text the fake model streams back")]
        text: String,
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    Ok(match path {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    })
}

fn print_spans(spans: &[FinishedSpan], pretty: bool) -> anyhow::Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(spans)?
    } else {
        serde_json::to_string(spans)?
    };
    println!("{out}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { input, config, pretty } => {
            let cfg = load_config(config.as_ref())?;
            let log = tokio::fs::read(&input).await?;
            let replayer = Replayer::new(&cfg, 0)?;
            let spans = replayer.run(log.as_slice())?;
            let pending = replayer.pending();
            if pending > 0 {
                tracing::warn!(pending, "spans still open at end of log");
            }
            print_spans(&spans, pretty)?;
        }
        Commands::CheckConfig { path } => {
            let cfg = Config::from_path(&path)?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        Commands::DemoStream { text, model } => {
            let backend = InMemoryBackend::new();
            let handler = SpanHandler::new(
                Arc::new(backend.clone()),
                Arc::new(NoContext),
                Arc::new(SystemClock),
                &Config::default(),
            )?;
            let id = "DemoLLM.astream_chat-1";
            let instance = Instance::Llm(LlmInstance {
                class_name: "DemoLLM".into(),
                model_name: Some(model),
                metadata: Payload::Null,
                function_calling: false,
            });
            handler.on_start(&OperationStart {
                id: id.into(),
                parent_id: None,
                instance: Some(instance.clone()),
                bound_args: Payload::from(serde_json::json!({ "messages": [text.clone()] })),
            });

            let mut events: Vec<StreamEvent> = text
                .split_inclusive(' ')
                .map(|w| StreamEvent::Delta(w.to_string()))
                .collect();
            events.push(StreamEvent::Final(ChatResponse {
                message: ChatMessage::text(Role::Assistant, text.as_str()),
                raw: Payload::Null,
                additional_kwargs: Payload::Null,
                delta: None,
            }));
            let inner: BoxStreamEv = futures_util::stream::iter(events).boxed();
            let mut stream = TracedStream::new(handler.manager().clone(), id, inner);
            handler.on_end(&OperationEnd {
                id: id.into(),
                instance: Some(instance),
                result: stream.result_payload(),
            });

            while let Some(ev) = stream.next().await {
                if let Some(delta) = ev.as_text_delta() {
                    print!("{delta}");
                    io::stdout().flush().ok();
                }
            }
            println!();
            print_spans(&backend.take(), true)?;
        }
    }

    Ok(())
}

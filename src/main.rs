use anyhow::{Context, Result, bail};
use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use generative_ai_sample::screens::photo_reasoning::mime_type_for;
use generative_ai_sample::screens::{
    ChatScreen, PhotoReasoningScreen, StructuredOutputScreen, SummarizeScreen,
};
use generative_ai_sample::{Config, GenerativeModelFactory, ImageAttachment, ScreenKind, UiState};

const USAGE: &str = "usage: generative-ai-sample [menu|summarize|structured_output|photo_reasoning|chat] [--stream] [--image PATH]... [PROMPT...]";

#[derive(Debug, Default)]
struct ShellArgs {
    screen: Option<ScreenKind>,
    stream: bool,
    images: Vec<String>,
    prompt: Vec<String>,
}

impl ShellArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = ShellArgs::default();
        let mut args = args.into_iter();

        match args.next().as_deref() {
            None | Some("menu") => return Ok(parsed),
            Some("-h") | Some("--help") => {
                println!("{USAGE}");
                return Ok(parsed);
            }
            Some(route) => {
                parsed.screen = Some(
                    route
                        .parse::<ScreenKind>()
                        .with_context(|| format!("unknown route '{route}'\n{USAGE}"))?,
                );
            }
        }

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--stream" => parsed.stream = true,
                "--image" => match args.next() {
                    Some(path) => parsed.images.push(path),
                    None => bail!("--image needs a path\n{USAGE}"),
                },
                _ => parsed.prompt.push(arg),
            }
        }
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so model output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let args = ShellArgs::parse(std::env::args().skip(1))?;
    let Some(screen) = args.screen else {
        print_menu();
        return Ok(());
    };

    let config = Arc::new(Config::load());
    let factory = GenerativeModelFactory::from_config(config)?;
    tracing::info!(%screen, stream = args.stream, "Opening screen");

    let succeeded = match screen {
        ScreenKind::Summarize => {
            let input = prompt_text(&args).await?;
            let screen = SummarizeScreen::open(&factory);
            let call = screen.summarize(&input);
            render(screen.subscribe(), call).await
        }
        ScreenKind::StructuredOutput => {
            let prompt = prompt_text(&args).await?;
            let screen = StructuredOutputScreen::open(&factory);
            let call = if args.stream {
                screen.structured_output_streaming(&prompt)
            } else {
                screen.structured_output(&prompt)
            };
            render(screen.subscribe(), call).await
        }
        ScreenKind::PhotoReasoning => {
            if args.images.is_empty() {
                bail!("photo_reasoning needs at least one --image\n{USAGE}");
            }
            let question = prompt_text(&args).await?;
            let images = load_images(&args.images).await?;
            let screen = PhotoReasoningScreen::open(&factory);
            let call = screen.reason(&question, images);
            render(screen.subscribe(), call).await
        }
        ScreenKind::Chat => run_chat(ChatScreen::open(&factory)).await?,
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn print_menu() {
    println!("{}", "Generative AI sample".bold());
    for kind in ScreenKind::ALL {
        println!("  {:<18} {}", kind.route().cyan(), kind.description());
    }
    println!("\n{USAGE}");
}

async fn prompt_text(args: &ShellArgs) -> Result<String> {
    if !args.prompt.is_empty() {
        return Ok(args.prompt.join(" "));
    }
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read prompt from stdin")?;
    let input = input.trim().to_string();
    if input.is_empty() {
        bail!("no prompt given\n{USAGE}");
    }
    Ok(input)
}

async fn load_images(paths: &[String]) -> Result<Vec<ImageAttachment>> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read image {path}"))?;
        images.push(ImageAttachment {
            mime_type: mime_type_for(path).to_string(),
            data,
        });
    }
    Ok(images)
}

/// Print each published state until the call finishes. Returns false if the
/// call settled on an error.
async fn render(mut rx: watch::Receiver<UiState>, mut call: JoinHandle<()>) -> bool {
    let mut printer = StatePrinter::default();
    printer.show(&rx.borrow_and_update());

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                printer.show(&state);
            }
            _ = &mut call => break,
        }
    }

    let settled = rx.borrow().clone();
    printer.show(&settled);
    printer.finish();
    !matches!(settled, UiState::Error(_))
}

#[derive(Default)]
struct StatePrinter {
    printed: String,
    loading_shown: bool,
    error_shown: bool,
}

impl StatePrinter {
    fn show(&mut self, state: &UiState) {
        match state {
            UiState::Initial => {}
            UiState::Loading => {
                if !self.loading_shown {
                    eprintln!("{}", "Loading...".dimmed());
                    self.loading_shown = true;
                }
            }
            UiState::Success(text) => {
                // Streaming output grows monotonically; print only the new tail
                let tail = text.strip_prefix(self.printed.as_str()).unwrap_or(text);
                if !tail.is_empty() {
                    print!("{tail}");
                    let _ = std::io::stdout().flush();
                    self.printed = text.clone();
                }
            }
            UiState::Error(message) => {
                if !self.error_shown {
                    eprintln!("{} {}", "Error:".red().bold(), message);
                    self.error_shown = true;
                }
            }
        }
    }

    fn finish(&self) {
        if !self.printed.is_empty() && !self.printed.ends_with('\n') {
            println!();
        }
    }
}

async fn run_chat(screen: ChatScreen) -> Result<bool> {
    for message in screen.messages() {
        println!("{} {}", "history>".dimmed(), message.text.dimmed());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut all_ok = true;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(follow) = screen.send_message(line) else {
            continue;
        };
        let rx = screen.subscribe();
        // The transcript follower owns the call; render off its completion
        all_ok &= render(rx, follow).await;
    }
    screen.close();
    Ok(all_ok)
}

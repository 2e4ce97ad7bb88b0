use glycostream::client::{drive, replay};
use glycostream::transcript::{Artifact, Transcript};
use glycostream::*;

use clap::Parser;
use colored::*;
use reqwest::Url;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Writes demuxed output to the terminal as it arrives.
struct Printer {
    hide_reasoning: bool,
    json: bool,
    last_channel: Option<Channel>,
}

impl Printer {
    fn new(args: &Args) -> Self {
        Self {
            hide_reasoning: args.hide_reasoning,
            json: args.json,
            last_channel: None,
        }
    }

    fn print(&mut self, output: &DemuxOutput) {
        let mut stdout = std::io::stdout().lock();

        if self.json {
            match serde_json::to_string(output) {
                Ok(line) => {
                    let _ = writeln!(stdout, "{}", line);
                }
                Err(e) => tracing::error!("Failed to serialize output: {}", e),
            }
            return;
        }

        if !output.reasoning_delta.is_empty() && !self.hide_reasoning {
            self.switch_to(&mut stdout, Channel::Reasoning);
            let _ = write!(stdout, "{}", output.reasoning_delta.dimmed().italic());
        }
        if !output.visible_delta.is_empty() {
            self.switch_to(&mut stdout, Channel::Visible);
            let _ = write!(stdout, "{}", output.visible_delta);
        }

        for event in &output.events {
            let line = match event {
                StreamEvent::ToolStart { name } => format!("[tool] {} ...", name).cyan(),
                StreamEvent::ToolEnd { name } => format!("[tool] {} done", name).cyan(),
                StreamEvent::CodeOutput { stdout: out, stderr, .. } => {
                    let mut text = format!("[code] {}", out.trim_end());
                    if !stderr.is_empty() {
                        text.push_str(&format!("\n[code stderr] {}", stderr.trim_end()));
                    }
                    text.yellow()
                }
                StreamEvent::DisplayPlot { url, alt } => {
                    format!("[plot] {} {}", url, alt.as_deref().unwrap_or("")).green()
                }
                StreamEvent::LoadPdb { url, filename } => {
                    format!("[pdb] {} ({})", filename, url).green()
                }
                StreamEvent::Error { message } => format!("[error] {}", message).red().bold(),
                StreamEvent::Done | StreamEvent::TextDelta { .. } => continue,
            };
            let _ = writeln!(stdout, "\n{}", line);
            self.last_channel = None;
        }
        let _ = stdout.flush();
    }

    fn switch_to(&mut self, out: &mut impl Write, channel: Channel) {
        if self.last_channel.is_some() && self.last_channel != Some(channel) {
            let _ = writeln!(out);
        }
        self.last_channel = Some(channel);
    }

    fn finish(&mut self, transcript: &Transcript) {
        if self.json {
            return;
        }
        println!();
        for artifact in &transcript.artifacts {
            match artifact {
                Artifact::Plot { url, .. } => println!("{} {}", "plot:".bold(), url),
                Artifact::Structure { url, filename } => {
                    println!("{} {} <- {}", "structure:".bold(), filename, url)
                }
            }
        }
        if !transcript.active_tools().is_empty() {
            println!(
                "{} {}",
                "unfinished tools:".yellow(),
                transcript.active_tools().join(", ")
            );
        }
        self.last_channel = None;
    }
}

fn base_url(args: &Args) -> Option<Url> {
    match Url::parse(&format!("{}/", args.api_url.trim_end_matches('/'))) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!("Invalid API URL {}: {}", args.api_url, e);
            None
        }
    }
}

async fn run_replay(args: &Args, input: &str) -> Result<()> {
    let reader: Box<dyn AsyncRead + Send + Unpin> = if input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(tokio::fs::File::open(input).await?)
    };

    let mut printer = Printer::new(args);
    let mut transcript = Transcript::new(base_url(args));
    drive(
        replay(reader, DemuxConfig::from(args)),
        &mut transcript,
        |out| printer.print(out),
    )
    .await?;
    printer.finish(&transcript);
    Ok(())
}

async fn ask_once(
    client: &ChatClient,
    args: &Args,
    history: &[ChatMessage],
) -> Result<Transcript> {
    let stream = client.ask(history).await?;
    let mut printer = Printer::new(args);
    let mut transcript = Transcript::new(base_url(args));
    drive(stream, &mut transcript, |out| printer.print(out)).await?;
    printer.finish(&transcript);
    Ok(transcript)
}

async fn run_chat(args: &Args) -> Result<()> {
    let client = ChatClient::from_args(args)?;

    if let Some(message) = &args.message {
        ask_once(&client, args, &[ChatMessage::user(message.as_str())]).await?;
        return Ok(());
    }

    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("{} ", ">".bold());
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        if question.is_empty() {
            eprint!("{} ", ">".bold());
            continue;
        }
        history.push(ChatMessage::user(question));
        match ask_once(&client, args, &history).await {
            Ok(transcript) => history.push(transcript.to_chat_message()),
            Err(e) => {
                // Drop the unanswered question so the next request stays well-formed.
                history.pop();
                eprintln!("{} {}", "request failed:".red(), e.inner);
            }
        }
        eprint!("{} ", ">".bold());
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    match &args.input {
        Some(input) => run_replay(&args, input).await,
        None => run_chat(&args).await,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let guard = glycostream::logging::init_tracing(args.log_dir.as_deref());
    glycostream::logging::setup_panic_hook();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e.inner);
            1
        }
    };

    drop(guard);
    std::process::exit(code);
}

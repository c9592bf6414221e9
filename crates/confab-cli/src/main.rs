mod inputs;
mod session;

use std::collections::HashMap;
use std::env;
use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use confab::agent::Agent;
use confab::command::{Command, CommandSystem, DEFAULT_TIMEOUT};
use confab::providers::configs::{
    OpenAiProviderConfig, ProviderConfig, OPENAI_DEFAULT_MODEL, OPENAI_HOST,
};
use confab::providers::factory::get_provider;
use confab::servers::{ServerRegistry, Settings};
use confab::transcript::{Transcript, DEFAULT_MESSAGE_SEPARATOR, DEFAULT_ROLE_SEPARATOR};

use crate::inputs::read_file_or;
use crate::session::Session;

const EXAMPLES: &str = "\
Examples:
  # minimal
  confab < input.txt
  # continue the chat: edit output.txt to append your reply, feed it back
  confab < input.txt > output.txt
  confab < output.txt
  # with instructions and a tool
  confab -i @instructions.txt -t ./tools/word_count.sh < input.txt
  # against another chat completions endpoint
  confab -u http://127.0.0.1:11434 -m llama3.2 < input.txt
";

#[derive(Parser)]
#[command(author, version, about, long_about = None, after_help = EXAMPLES)]
struct Cli {
    /// Model to use
    #[arg(short, long, default_value = OPENAI_DEFAULT_MODEL)]
    model: String,

    /// Base url of the chat completions API; "/v1/chat/completions" is
    /// appended
    #[arg(short = 'u', long, default_value = OPENAI_HOST)]
    base_url: String,

    /// Instructions, system messages for the agent, @FILE reads the file
    #[arg(short, long)]
    instructions: Option<String>,

    /// Role separator string, default: ">\n"
    #[arg(short, long, default_value = DEFAULT_ROLE_SEPARATOR, hide_default_value = true)]
    role_separator: String,

    /// Message separator string, default: "\n---\n"
    #[arg(short = 's', long, default_value = DEFAULT_MESSAGE_SEPARATOR, hide_default_value = true)]
    message_separator: String,

    /// Executable to expose as a tool, may be repeated
    #[arg(short, long = "tool")]
    tools: Vec<String>,

    /// Tool timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,

    /// Auxiliary server settings as JSON, @FILE reads the file
    #[arg(long)]
    servers: Option<String>,

    /// Enable debug log
    #[arg(long)]
    debug: bool,

    /// Quiet log
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the transcript.
    let level = if cli.quiet {
        Level::ERROR
    } else if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("start confab");

    let provider = get_provider(ProviderConfig::OpenAi(OpenAiProviderConfig::new(
        cli.base_url.clone(),
        env::var("OPENAI_API_KEY").unwrap_or_default(),
        cli.model.clone(),
    )))?;

    let mut agent = Agent::new(provider);
    if let Some(instructions) = read_file_or(cli.instructions.as_deref())? {
        agent.set_instructions(instructions);
    }

    let timeout = Duration::from_secs(cli.timeout);
    // The environment is read once; every adapter gets a copy.
    let environment: HashMap<String, String> = env::vars().collect();
    for executable in &cli.tools {
        let command = Command::new(executable.clone())
            .with_timeout(timeout)
            .with_env(environment.clone());
        let system = CommandSystem::discover(command)
            .await
            .with_context(|| format!("failed to register tool {executable}"))?;
        agent.add_system(Box::new(system));
    }

    let mut registry = match read_file_or(cli.servers.as_deref())? {
        Some(text) => ServerRegistry::from_settings(Settings::from_json(&text)?),
        None => ServerRegistry::new(),
    };

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read the transcript from stdin")?;

    registry.connect_all().await?;

    let transcript = Transcript::new(cli.role_separator, cli.message_separator);
    let mut session = Session::new(agent, transcript);

    // Servers are torn down on every exit path of the turn.
    let result = session.run(&input).await;
    registry.shutdown().await;
    let output = result?;

    println!("{output}");

    tracing::debug!("end confab successfully");
    Ok(())
}

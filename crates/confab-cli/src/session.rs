use anyhow::Result;
use futures::TryStreamExt;

use confab::agent::Agent;
use confab::transcript::Transcript;

/// One reply turn over a textual transcript.
pub struct Session {
    agent: Agent,
    transcript: Transcript,
}

impl Session {
    pub fn new(agent: Agent, transcript: Transcript) -> Self {
        Session { agent, transcript }
    }

    /// Decode the transcript, run one turn, and return the transcript
    /// with the agent's replies appended, ready to print.
    pub async fn run(&mut self, input: &str) -> Result<String> {
        let mut messages = self.transcript.decode(input);

        let mut stream = self.agent.reply(&messages);
        while let Some(message) = stream.try_next().await? {
            messages.push(message);
        }

        Ok(self.transcript.encode(&messages))
    }
}

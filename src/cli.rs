//! Line-oriented chat client over the exchange engine.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::watch;

use crate::exchange::{ChatSession, ExchangeController, SubmitOutcome};

/// Command typed at the prompt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Send a message.
    Say(String),
    /// Select the assistant backend.
    Model(String),
    /// Leave the client.
    Quit,
    /// Nothing to do.
    Empty,
}

impl Command {
    /// Parse one input line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if line == "/quit" {
            return Self::Quit;
        }
        if let Some(label) = line.strip_prefix("/model ") {
            let label = label.trim();
            if !label.is_empty() {
                return Self::Model(label.to_string());
            }
        }
        Self::Say(line.to_string())
    }
}

/// Run the interactive loop until stdin closes, `/quit`, or Ctrl-C at the
/// prompt.
///
/// # Errors
/// Returns an error if stdin or stdout fail.
pub async fn run_repl(controller: Arc<ExchangeController>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut updates = controller.store().subscribe();

    prompt()?;
    loop {
        match next_command(&mut lines, interrupted()).await? {
            Command::Quit => break,
            Command::Empty => {}
            Command::Model(label) => {
                controller.store().set_model(&label);
                tracing::info!("model set to {label}");
            }
            Command::Say(text) => exchange_once(&controller, &text, &mut updates).await?,
        }
        prompt()?;
    }

    Ok(())
}

/// Read the next command, or [`Command::Quit`] once input ends or
/// `interrupt` fires first.
async fn next_command<R>(
    lines: &mut Lines<R>,
    interrupt: impl Future<Output = ()>,
) -> std::io::Result<Command>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?.map_or(Command::Quit, |text| Command::parse(&text))),
        () = interrupt => Ok(Command::Quit),
    }
}

/// Resolve on Ctrl-C; never resolves if the signal cannot be watched.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Submit one message, echoing the reply as it streams in.
///
/// Ctrl-C cancels the exchange; the loop then waits for the submission to
/// report the cancellation.
async fn exchange_once(
    controller: &ExchangeController,
    text: &str,
    updates: &mut watch::Receiver<ChatSession>,
) -> std::io::Result<()> {
    let submit = controller.submit(text);
    tokio::pin!(submit);
    let mut shown = 0;

    let result = loop {
        tokio::select! {
            result = &mut submit => break result,
            changed = updates.changed() => {
                if changed.is_ok() {
                    let session = updates.borrow_and_update();
                    shown = print_delta(&session, shown)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                controller.cancel();
            }
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match result {
        Ok(SubmitOutcome::Committed { content, .. }) => {
            writeln!(out, "{}", content.get(shown..).unwrap_or_default())
        }
        Ok(SubmitOutcome::Cancelled(id)) => writeln!(out, "\n(exchange {id} cancelled)"),
        Ok(SubmitOutcome::Ignored(reason)) => writeln!(out, "(ignored: {reason:?})"),
        Err(err) => writeln!(out, "\n{}", err.notice()),
    }
}

/// Print the part of the streaming reply not shown yet.
fn print_delta(session: &ChatSession, shown: usize) -> std::io::Result<usize> {
    if !session.is_exchange_in_flight() {
        return Ok(shown);
    }
    let reply = session
        .last_assistant()
        .map_or("", |message| message.content.as_str());
    let Some(delta) = reply.get(shown..) else {
        return Ok(shown);
    };
    if !delta.is_empty() {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        write!(out, "{delta}")?;
        out.flush()?;
    }
    Ok(reply.len())
}

fn prompt() -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write!(out, "> ")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  "), Command::Empty);
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(
            Command::parse("/model storyteller"),
            Command::Model("storyteller".to_string())
        );
        assert_eq!(Command::parse(" hi there "), Command::Say("hi there".to_string()));
        assert_eq!(Command::parse("/model "), Command::Say("/model".to_string()));
    }

    #[tokio::test]
    async fn test_interrupt_at_prompt_quits() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();
        let command = next_command(&mut lines, std::future::ready(())).await.unwrap();
        assert_eq!(command, Command::Quit);
    }

    #[tokio::test]
    async fn test_next_command_reads_lines_until_eof() {
        let mut lines = BufReader::new(&b"hello\n/model fast\n"[..]).lines();
        let never = std::future::pending::<()>;
        assert_eq!(
            next_command(&mut lines, never()).await.unwrap(),
            Command::Say("hello".to_string())
        );
        assert_eq!(
            next_command(&mut lines, never()).await.unwrap(),
            Command::Model("fast".to_string())
        );
        assert_eq!(next_command(&mut lines, never()).await.unwrap(), Command::Quit);
    }

    #[test]
    fn test_print_delta_tracks_streamed_length() {
        use crate::exchange::{SessionId, SessionStore};

        let store = SessionStore::new(SessionId::from("s"), "default");
        assert_eq!(print_delta(&store.snapshot(), 0).unwrap(), 0);

        let exchange = store.begin_exchange("hi").unwrap();
        store.append_assistant_chunk(exchange.id, "Hel").unwrap();
        let shown = print_delta(&store.snapshot(), 0).unwrap();
        assert_eq!(shown, 3);

        store.append_assistant_chunk(exchange.id, "lo").unwrap();
        assert_eq!(print_delta(&store.snapshot(), shown).unwrap(), 5);
    }
}

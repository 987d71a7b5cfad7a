//! Interactive pause at the end of a dev refresh.
//!
//! The session blocks on the operator. It is only ever entered from the dev
//! branch of the dispatcher.

use std::io::{self, Write};

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

use crate::engine::{ContainerEngine, ContainerHandle};

const PROMPT: &str = "(deploy) ";

const HELP: &str = "\
Commands:
  ps          list containers that are running now
  removed     list containers removed by this run
  c/continue  finish the refresh
  q/quit      stop without finishing
  h/help      show this message";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionExit {
    Continue,
    Quit,
}

#[async_trait]
pub trait InspectionSession: Send {
    /// Blocks until the operator leaves the session.
    async fn suspend_and_inspect(
        &mut self,
        engine: &dyn ContainerEngine,
        removed: &[ContainerHandle],
    ) -> Result<SessionExit>;
}

/// Line-oriented prompt on a terminal (or any reader/writer pair).
pub struct TerminalInspector<R, W> {
    lines: Lines<R>,
    out: W,
}

impl TerminalInspector<BufReader<Stdin>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), io::stdout())
    }
}

impl<R, W> TerminalInspector<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    pub fn new(input: R, out: W) -> Self {
        Self {
            lines: input.lines(),
            out,
        }
    }

    pub fn into_writer(self) -> W {
        self.out
    }

    fn prompt(&mut self) -> io::Result<()> {
        write!(self.out, "{PROMPT}")?;
        self.out.flush()
    }

    fn write_containers(&mut self, containers: &[ContainerHandle]) -> io::Result<()> {
        if containers.is_empty() {
            return writeln!(self.out, "  (none)");
        }
        for container in containers {
            let short_id = container.id.get(..12).unwrap_or(&container.id);
            writeln!(
                self.out,
                "  {short_id}  {:<24} {}",
                container.label(),
                container.image
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl<R, W> InspectionSession for TerminalInspector<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    async fn suspend_and_inspect(
        &mut self,
        engine: &dyn ContainerEngine,
        removed: &[ContainerHandle],
    ) -> Result<SessionExit> {
        info!(removed = removed.len(), "entering inspection session");
        writeln!(
            self.out,
            "-- deploy paused for inspection ({} container(s) removed) --",
            removed.len()
        )?;
        writeln!(self.out, "Type `help` for commands, `continue` to finish.")?;
        self.prompt()?;

        while let Some(line) = self.lines.next_line().await? {
            match line.trim() {
                "" => {}
                "c" | "continue" => {
                    info!("inspection session continued");
                    return Ok(SessionExit::Continue);
                }
                "q" | "quit" | "exit" => {
                    info!("inspection session quit");
                    return Ok(SessionExit::Quit);
                }
                "ps" => match engine.list_running().await {
                    Ok(running) => self.write_containers(&running)?,
                    Err(err) => {
                        warn!(?err, "listing containers from inspection session failed");
                        writeln!(self.out, "error: {err}")?;
                    }
                },
                "removed" => self.write_containers(removed)?,
                "h" | "help" | "?" => writeln!(self.out, "{HELP}")?,
                other => writeln!(self.out, "unknown command: {other} (try `help`)")?,
            }
            self.prompt()?;
        }

        writeln!(self.out)?;
        info!("inspection session reached end of input");
        Ok(SessionExit::Continue)
    }
}

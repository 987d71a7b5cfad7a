use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use console::style;
use tracing::info;

use crate::build::{BuildTool, ProcessBuildTool};
use crate::cli::{Cli, Mode};
use crate::config::RuntimeConfig;
use crate::engine::{ContainerEngine, ContainerHandle, DockerCli};
use crate::inspect::{InspectionSession, SessionExit, TerminalInspector};

/// How a single dispatch ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Outcome {
    Refreshed { removed: usize },
    /// The operator quit the inspection session.
    Aborted { removed: usize },
    Built,
    BuildFailed { exit_code: Option<i32> },
}

impl Outcome {
    pub fn status(self) -> u8 {
        match self {
            Outcome::Refreshed { .. } | Outcome::Built => 0,
            Outcome::Aborted { .. } | Outcome::BuildFailed { .. } => 1,
        }
    }
}

/// The collaborators a dispatch may touch.
pub struct Collaborators<'a> {
    pub engine: &'a dyn ContainerEngine,
    pub build: &'a dyn BuildTool,
    pub session: &'a mut dyn InspectionSession,
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let cfg = RuntimeConfig::load_from_env()?;
    cfg.preflight(cli.env)?;
    info!(
        mode = ?cli.env,
        engine_command = %cfg.engine_command,
        build_command = %cfg.build_command,
        build_args = ?cfg.build_args,
        cwd = %cfg.cwd.display(),
        "starting deploy",
    );

    let engine = DockerCli::from_config(&cfg);
    let build = ProcessBuildTool::from_config(&cfg);
    let mut session = TerminalInspector::stdio();

    let collaborators = Collaborators {
        engine: &engine,
        build: &build,
        session: &mut session,
    };

    let mut stdout = io::stdout();
    let outcome = dispatch(cli.env, collaborators, &mut stdout).await?;
    info!(?outcome, "deploy finished");
    Ok(ExitCode::from(outcome.status()))
}

/// Runs exactly one branch for `mode`, writing user-facing output to `out`.
pub async fn dispatch(
    mode: Mode,
    collaborators: Collaborators<'_>,
    out: &mut (dyn Write + Send),
) -> Result<Outcome> {
    match mode {
        Mode::Dev => refresh_containers(collaborators.engine, collaborators.session, out).await,
        Mode::Prod => build_package(collaborators.build, out).await,
    }
}

async fn refresh_containers(
    engine: &dyn ContainerEngine,
    session: &mut dyn InspectionSession,
    out: &mut (dyn Write + Send),
) -> Result<Outcome> {
    writeln!(out, "{}", style("Deploy started.").green())?;

    let containers = engine
        .list_running()
        .await
        .context("failed to list running containers")?;
    info!(count = containers.len(), "removing running containers");

    // Stops at the first failure; later containers are left running.
    let mut removed: Vec<ContainerHandle> = Vec::with_capacity(containers.len());
    for container in containers {
        engine
            .force_remove(&container)
            .await
            .with_context(|| format!("failed to remove container {}", container.label()))?;
        info!(id = %container.id, name = %container.name, "container removed");
        removed.push(container);
    }

    let removed_count = removed.len();
    match session.suspend_and_inspect(engine, &removed).await? {
        SessionExit::Continue => {
            writeln!(out, "{}", style("Deploy refreshed.").green())?;
            Ok(Outcome::Refreshed {
                removed: removed_count,
            })
        }
        SessionExit::Quit => Ok(Outcome::Aborted {
            removed: removed_count,
        }),
    }
}

async fn build_package(build: &dyn BuildTool, out: &mut (dyn Write + Send)) -> Result<Outcome> {
    let result = build.invoke().await?;
    if result.success() {
        info!("build succeeded");
        return Ok(Outcome::Built);
    }

    info!(exit_code = ?result.exit_code, "build failed");
    writeln!(out, "{}", result.text())?;
    out.flush()?;
    Ok(Outcome::BuildFailed {
        exit_code: result.exit_code,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::{Collaborators, Outcome, dispatch};
    use crate::build::{BuildOutput, BuildTool};
    use crate::cli::Mode;
    use crate::engine::{ContainerEngine, ContainerHandle, EngineError};
    use crate::inspect::{InspectionSession, SessionExit};

    #[derive(Default)]
    struct FakeEngine {
        running: Vec<ContainerHandle>,
        fail_on: Option<String>,
        unreachable: bool,
        removed: Mutex<Vec<String>>,
    }

    impl FakeEngine {
        fn with_running(ids: &[&str]) -> Self {
            Self {
                running: ids
                    .iter()
                    .map(|id| ContainerHandle {
                        id: (*id).to_owned(),
                        name: format!("{id}-name"),
                        image: "app:dev".to_owned(),
                    })
                    .collect(),
                ..Self::default()
            }
        }

        fn removed(&self) -> Vec<String> {
            self.removed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn list_running(&self) -> Result<Vec<ContainerHandle>, EngineError> {
            if self.unreachable {
                return Err(EngineError::CommandFailed {
                    command: "docker ps".to_owned(),
                    code: Some(1),
                    stderr: "Cannot connect to the Docker daemon".to_owned(),
                });
            }
            Ok(self.running.clone())
        }

        async fn force_remove(&self, container: &ContainerHandle) -> Result<(), EngineError> {
            if self.fail_on.as_deref() == Some(container.id.as_str()) {
                return Err(EngineError::CommandFailed {
                    command: format!("docker rm --force {}", container.id),
                    code: Some(1),
                    stderr: "removal of container is already in progress".to_owned(),
                });
            }
            self.removed.lock().unwrap().push(container.id.clone());
            Ok(())
        }
    }

    struct FakeBuild {
        exit_code: Option<i32>,
        output: &'static str,
        calls: Mutex<usize>,
    }

    impl FakeBuild {
        fn exiting(exit_code: i32, output: &'static str) -> Self {
            Self {
                exit_code: Some(exit_code),
                output,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl BuildTool for FakeBuild {
        async fn invoke(&self) -> Result<BuildOutput> {
            *self.calls.lock().unwrap() += 1;
            Ok(BuildOutput {
                exit_code: self.exit_code,
                output: self.output.as_bytes().to_vec(),
            })
        }
    }

    struct RecordingSession {
        exit: SessionExit,
        /// Removed container ids as seen by the engine when the session began.
        entered_with: Option<Vec<String>>,
    }

    impl RecordingSession {
        fn new(exit: SessionExit) -> Self {
            Self {
                exit,
                entered_with: None,
            }
        }
    }

    #[async_trait]
    impl InspectionSession for RecordingSession {
        async fn suspend_and_inspect(
            &mut self,
            _engine: &dyn ContainerEngine,
            removed: &[ContainerHandle],
        ) -> Result<SessionExit> {
            assert!(self.entered_with.is_none(), "session entered twice");
            self.entered_with = Some(removed.iter().map(|c| c.id.clone()).collect());
            Ok(self.exit)
        }
    }

    async fn run_mode(
        mode: Mode,
        engine: &FakeEngine,
        build: &FakeBuild,
        session: &mut RecordingSession,
    ) -> (Result<Outcome>, String) {
        let mut out = Vec::new();
        let collaborators = Collaborators {
            engine,
            build,
            session,
        };
        let outcome = dispatch(mode, collaborators, &mut out).await;
        (outcome, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn prod_success_prints_nothing() {
        let engine = FakeEngine::with_running(&["a"]);
        let build = FakeBuild::exiting(0, "Building deploy (0.1.0)\n");
        let mut session = RecordingSession::new(SessionExit::Continue);

        let (outcome, out) = run_mode(Mode::Prod, &engine, &build, &mut session).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome, Outcome::Built);
        assert_eq!(outcome.status(), 0);
        assert!(out.is_empty(), "unexpected output: {out:?}");
        assert_eq!(build.calls(), 1);
        assert!(engine.removed().is_empty());
        assert!(session.entered_with.is_none());
    }

    #[tokio::test]
    async fn prod_failure_prints_output_and_exits_one() {
        let engine = FakeEngine::default();
        let build = FakeBuild::exiting(2, "error: missing lockfile");
        let mut session = RecordingSession::new(SessionExit::Continue);

        let (outcome, out) = run_mode(Mode::Prod, &engine, &build, &mut session).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome, Outcome::BuildFailed { exit_code: Some(2) });
        assert_eq!(outcome.status(), 1);
        assert_eq!(out, "error: missing lockfile\n");
        assert!(session.entered_with.is_none());
    }

    #[tokio::test]
    async fn dev_removes_every_container_before_the_session() {
        let engine = FakeEngine::with_running(&["a", "b", "c"]);
        let build = FakeBuild::exiting(0, "");
        let mut session = RecordingSession::new(SessionExit::Continue);

        let (outcome, out) = run_mode(Mode::Dev, &engine, &build, &mut session).await;

        assert_eq!(outcome.unwrap(), Outcome::Refreshed { removed: 3 });
        let mut removed = engine.removed();
        removed.sort();
        assert_eq!(removed, vec!["a", "b", "c"]);
        let mut seen = session.entered_with.expect("session should be entered");
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(build.calls(), 0);
        assert!(out.contains("Deploy started."), "{out}");
        assert!(out.contains("Deploy refreshed."), "{out}");
    }

    #[tokio::test]
    async fn dev_with_nothing_running_still_enters_the_session() {
        let engine = FakeEngine::default();
        let build = FakeBuild::exiting(0, "");
        let mut session = RecordingSession::new(SessionExit::Continue);

        let (outcome, _) = run_mode(Mode::Dev, &engine, &build, &mut session).await;

        assert_eq!(outcome.unwrap(), Outcome::Refreshed { removed: 0 });
        assert!(engine.removed().is_empty());
        assert_eq!(session.entered_with, Some(Vec::new()));
    }

    #[tokio::test]
    async fn default_mode_behaves_like_dev() {
        let engine = FakeEngine::with_running(&["only"]);
        let build = FakeBuild::exiting(0, "");
        let mut session = RecordingSession::new(SessionExit::Continue);

        let (outcome, _) = run_mode(Mode::default(), &engine, &build, &mut session).await;

        assert_eq!(outcome.unwrap(), Outcome::Refreshed { removed: 1 });
        assert_eq!(engine.removed(), vec!["only"]);
        assert_eq!(build.calls(), 0);
    }

    #[tokio::test]
    async fn removal_failure_stops_the_batch() {
        let engine = FakeEngine {
            fail_on: Some("b".to_owned()),
            ..FakeEngine::with_running(&["a", "b", "c"])
        };
        let build = FakeBuild::exiting(0, "");
        let mut session = RecordingSession::new(SessionExit::Continue);

        let (outcome, out) = run_mode(Mode::Dev, &engine, &build, &mut session).await;

        let err = outcome.unwrap_err();
        assert!(
            format!("{err:#}").contains("failed to remove container b-name"),
            "{err:#}"
        );
        assert_eq!(engine.removed(), vec!["a"]);
        assert!(session.entered_with.is_none());
        assert!(!out.contains("Deploy refreshed."), "{out}");
    }

    #[tokio::test]
    async fn unreachable_engine_is_fatal() {
        let engine = FakeEngine {
            unreachable: true,
            ..FakeEngine::default()
        };
        let build = FakeBuild::exiting(0, "");
        let mut session = RecordingSession::new(SessionExit::Continue);

        let (outcome, _) = run_mode(Mode::Dev, &engine, &build, &mut session).await;

        let err = outcome.unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("failed to list running containers"), "{chain}");
        assert!(chain.contains("Cannot connect to the Docker daemon"), "{chain}");
        assert!(session.entered_with.is_none());
    }

    #[tokio::test]
    async fn quitting_the_session_aborts() {
        let engine = FakeEngine::with_running(&["a"]);
        let build = FakeBuild::exiting(0, "");
        let mut session = RecordingSession::new(SessionExit::Quit);

        let (outcome, out) = run_mode(Mode::Dev, &engine, &build, &mut session).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome, Outcome::Aborted { removed: 1 });
        assert_eq!(outcome.status(), 1);
        assert!(!out.contains("Deploy refreshed."), "{out}");
    }
}

use std::{
    collections::VecDeque,
    fs, io,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing_subscriber::fmt::MakeWriter;

use self_supervisor::{
    ChildProcess, ExecutableImage, ExitOutcome, LaunchCommand, Spawner, Supervisor,
    SupervisorConfig, SupervisorHandle,
};

/// One scripted spawn.
#[allow(unused)]
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// The child runs for `after`, then ends with `outcome`.
    Exit { outcome: ExitOutcome, after: Duration },
    /// The OS refuses to start the child.
    Fail,
    /// The child runs until terminated.
    Hang,
}

#[allow(unused)]
impl Step {
    pub const fn code(code: i32) -> Self {
        Self::Exit {
            outcome: ExitOutcome::Exited(code),
            after: Duration::ZERO,
        }
    }

    pub const fn code_after(code: i32, after: Duration) -> Self {
        Self::Exit {
            outcome: ExitOutcome::Exited(code),
            after,
        }
    }
}

struct Script {
    steps: VecDeque<Step>,
    fallback: Step,
    commands: Vec<LaunchCommand>,
}

/// Spawner that plays back a list of steps, then repeats `fallback` forever.
#[derive(Clone)]
pub struct ScriptedSpawner {
    script: Arc<Mutex<Script>>,
    spawned: Arc<AtomicUsize>,
    terminated: Arc<AtomicUsize>,
}

#[allow(unused)]
impl ScriptedSpawner {
    pub fn new(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                steps: steps.into_iter().collect(),
                fallback,
                commands: Vec::new(),
            })),
            spawned: Arc::new(AtomicUsize::new(0)),
            terminated: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.script.lock().unwrap().commands.len()
    }

    /// Children actually started.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<LaunchCommand> {
        self.script.lock().unwrap().commands.clone()
    }
}

#[async_trait]
impl Spawner for ScriptedSpawner {
    async fn spawn(&self, command: &LaunchCommand) -> io::Result<Box<dyn ChildProcess>> {
        let step = {
            let mut script = self.script.lock().unwrap();
            script.commands.push(command.clone());
            let fallback = script.fallback;
            script.steps.pop_front().unwrap_or(fallback)
        };
        let pid = match step {
            Step::Fail => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "scripted spawn failure",
                ))
            }
            Step::Exit { .. } | Step::Hang => 1000 + self.spawned.fetch_add(1, Ordering::SeqCst) as u32,
        };
        Ok(Box::new(FakeChild {
            pid,
            step,
            stop: Arc::new(Notify::new()),
            terminated: self.terminated.clone(),
        }))
    }
}

struct FakeChild {
    pid: u32,
    step: Step,
    stop: Arc<Notify>,
    terminated: Arc<AtomicUsize>,
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> io::Result<ExitOutcome> {
        match self.step {
            Step::Exit { outcome, after } => {
                tokio::time::sleep(after).await;
                Ok(outcome)
            }
            Step::Hang | Step::Fail => {
                self.stop.notified().await;
                Ok(ExitOutcome::Signaled(15))
            }
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        self.stop.notify_one();
        Ok(())
    }
}

/// A throwaway directory holding a fake binary called `app`.
pub struct Scratch {
    pub dir: PathBuf,
    pub image: ExecutableImage,
}

#[allow(unused)]
impl Scratch {
    pub fn new(name: &str) -> Self {
        Self::with_script(name, "#!/bin/sh\nexit 0\n")
    }

    /// Same, but `app` is the given shell script, so copies can really run.
    pub fn with_script(name: &str, script: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "self-supervisor-test-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("app");
        fs::write(&path, script).unwrap();
        Self {
            dir,
            image: ExecutableImage::new(path),
        }
    }

    pub fn worker_copy(&self) -> PathBuf {
        self.dir.join("app.worker")
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// A scratch directory named by a path relative to the test's working directory.
pub struct RelativeDir {
    pub rel: PathBuf,
}

#[allow(unused)]
impl RelativeDir {
    pub fn new(name: &str) -> Self {
        let rel = PathBuf::from(format!("self-supervisor-rel-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&rel);
        fs::create_dir_all(&rel).unwrap();
        Self { rel }
    }

    pub fn absolute(&self) -> PathBuf {
        std::env::current_dir().unwrap().join(&self.rel)
    }
}

impl Drop for RelativeDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.rel);
    }
}

/// Polls until `path` exists, in real time.
#[allow(unused)]
pub async fn wait_for_file(path: &std::path::Path) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never appeared", path.display()));
}

/// Starts a supervisor over `spawner` with `serve -supervisor` as its own arguments.
#[allow(unused)]
pub fn run_supervisor(
    config: SupervisorConfig,
    scratch: &Scratch,
    spawner: &ScriptedSpawner,
) -> SupervisorHandle {
    Supervisor::new(
        config,
        scratch.image.clone(),
        spawner.clone(),
        vec!["serve".into(), "-supervisor".into()],
    )
    .run()
}

/// Waits until a worker is live and returns its generation.
#[allow(unused)]
pub async fn live_generation(handle: &SupervisorHandle) -> u64 {
    loop {
        if let Some(child) = handle.current_child().await.unwrap() {
            return child.generation;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// In-memory log sink for asserting on supervisor log lines.
#[allow(unused)]
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

#[allow(unused)]
impl LogCapture {
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(capture.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

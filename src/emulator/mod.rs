//! Emulator process lifecycle
//!
//! Discovery, spawn, health monitoring, restart-on-request, and teardown of
//! the BasiliskII / SheepShaver child process. The controller is owned
//! exclusively by the supervisor loop; no other task touches it.

pub mod prefs;
pub mod storage;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};

use crate::error::{GatewayError, Result};

/// Exit code with which the emulator requests a restart
pub const EXIT_RESTART_REQUESTED: i32 = 75;

/// Settle delay before respawning after an exit
const RESTART_SETTLE: Duration = Duration::from_millis(500);

/// Graceful shutdown deadline before SIGKILL
const STOP_DEADLINE: Duration = Duration::from_secs(3);

/// Conventional locations searched when no explicit path is given.
/// No PATH search on purpose.
const CANDIDATE_PATHS: &[&str] = &[
    "./BasiliskII",
    "./SheepShaver",
    "../BasiliskII/src/Unix/BasiliskII",
    "../SheepShaver/src/Unix/SheepShaver",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    Absent,
    Starting,
    Running,
    Exiting,
    Crashed,
}

impl std::fmt::Display for EmulatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmulatorState::Absent => write!(f, "absent"),
            EmulatorState::Starting => write!(f, "starting"),
            EmulatorState::Running => write!(f, "running"),
            EmulatorState::Exiting => write!(f, "exiting"),
            EmulatorState::Crashed => write!(f, "crashed"),
        }
    }
}

pub struct EmulatorController {
    child: Option<Child>,
    state: EmulatorState,
    explicit_path: Option<PathBuf>,
    prefs_path: PathBuf,
    control_sock_path: PathBuf,
    auto_restart: bool,
    /// Pending respawn deadline (settle delay after exit)
    respawn_at: Option<Instant>,
}

impl EmulatorController {
    pub fn new(
        explicit_path: Option<PathBuf>,
        prefs_path: PathBuf,
        control_sock_path: PathBuf,
        auto_restart: bool,
    ) -> Self {
        Self {
            child: None,
            state: EmulatorState::Absent,
            explicit_path,
            prefs_path,
            control_sock_path,
            auto_restart,
            respawn_at: None,
        }
    }

    pub fn state(&self) -> EmulatorState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, EmulatorState::Starting | EmulatorState::Running)
    }

    /// Resolve the emulator executable: explicit path first, then the
    /// bounded list of conventional locations.
    pub fn discover(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.explicit_path {
            if is_executable(path) {
                return Ok(path.clone());
            }
            return Err(GatewayError::EmulatorGone(format!(
                "specified emulator not executable: {}",
                path.display()
            )));
        }

        for candidate in CANDIDATE_PATHS {
            let path = Path::new(candidate);
            if is_executable(path) {
                return Ok(path
                    .canonicalize()
                    .unwrap_or_else(|_| path.to_path_buf()));
            }
        }

        Err(GatewayError::EmulatorGone(
            "no emulator found; use --emulator or place BasiliskII in the current directory".into(),
        ))
    }

    /// Spawn the emulator with the control-socket path in its environment
    /// and the prefs file as its single argument.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.respawn_at = None;

        let exe = self.discover()?;

        // BasiliskII takes --config, SheepShaver takes --prefs.
        let prefs_flag = if exe
            .file_name()
            .map(|n| n.to_string_lossy().contains("SheepShaver"))
            .unwrap_or(false)
        {
            "--prefs"
        } else {
            "--config"
        };

        tracing::info!(
            "Starting emulator: {} {} {}",
            exe.display(),
            prefs_flag,
            self.prefs_path.display()
        );

        let child = Command::new(&exe)
            .arg(prefs_flag)
            .arg(&self.prefs_path)
            .env("MACEMU_CONTROL_SOCK", &self.control_sock_path)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GatewayError::EmulatorGone(format!("spawn {} failed: {}", exe.display(), e))
            })?;

        tracing::info!("Emulator started with PID {:?}", child.id());
        self.child = Some(child);
        self.state = EmulatorState::Starting;
        Ok(())
    }

    /// Non-blocking reap, called from the supervisor every 500 ms. Handles
    /// the exit-75 restart convention and auto-restart.
    pub fn poll(&mut self) {
        if let Some(deadline) = self.respawn_at {
            if Instant::now() >= deadline {
                self.respawn_at = None;
                if let Err(e) = self.start() {
                    tracing::warn!("Respawn failed: {}", e);
                }
            }
            return;
        }

        let Some(child) = self.child.as_mut() else {
            return;
        };

        match child.try_wait() {
            Ok(None) => {
                if self.state == EmulatorState::Starting {
                    self.state = EmulatorState::Running;
                }
            }
            Ok(Some(status)) => {
                self.child = None;
                match status.code() {
                    Some(0) => {
                        tracing::info!("Emulator exited cleanly");
                        self.state = EmulatorState::Absent;
                        if self.auto_restart {
                            self.respawn_at = Some(Instant::now() + RESTART_SETTLE);
                        }
                    }
                    Some(EXIT_RESTART_REQUESTED) => {
                        tracing::info!("Emulator requested restart (exit code 75)");
                        self.state = EmulatorState::Absent;
                        self.respawn_at = Some(Instant::now() + RESTART_SETTLE);
                    }
                    Some(code) => {
                        tracing::warn!("Emulator exited with code {}", code);
                        self.state = EmulatorState::Crashed;
                        if self.auto_restart {
                            self.respawn_at = Some(Instant::now() + RESTART_SETTLE);
                        }
                    }
                    None => {
                        use std::os::unix::process::ExitStatusExt;
                        tracing::warn!("Emulator killed by signal {:?}", status.signal());
                        self.state = EmulatorState::Crashed;
                        if self.auto_restart {
                            self.respawn_at = Some(Instant::now() + RESTART_SETTLE);
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("try_wait failed: {}", e);
                self.child = None;
                self.state = EmulatorState::Crashed;
            }
        }
    }

    /// Graceful stop: SIGTERM, poll up to 3 s, then SIGKILL and reap.
    pub async fn stop(&mut self) {
        self.respawn_at = None;
        let Some(mut child) = self.child.take() else {
            self.state = EmulatorState::Absent;
            return;
        };

        self.state = EmulatorState::Exiting;

        if let Some(pid) = child.id() {
            tracing::info!("Stopping emulator PID {}", pid);
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }

        let start = Instant::now();
        while start.elapsed() < STOP_DEADLINE {
            match child.try_wait() {
                Ok(Some(_)) => {
                    tracing::info!("Emulator stopped");
                    self.state = EmulatorState::Absent;
                    return;
                }
                Ok(None) => tokio::time::sleep(Duration::from_millis(100)).await,
                Err(_) => break,
            }
        }

        tracing::warn!("Emulator ignored SIGTERM, force killing");
        let _ = child.kill().await;
        let _ = child.wait().await;
        self.state = EmulatorState::Absent;
    }

    /// Stop then schedule an immediate restart.
    pub async fn restart(&mut self) {
        self.stop().await;
        self.respawn_at = Some(Instant::now() + RESTART_SETTLE);
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn fake_emulator(dir: &Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", script).unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn controller(exe: PathBuf, auto_restart: bool) -> EmulatorController {
        EmulatorController::new(
            Some(exe),
            PathBuf::from("test.prefs"),
            PathBuf::from("/tmp/macemu-test.sock"),
            auto_restart,
        )
    }

    #[test]
    fn discovery_fails_without_emulator() {
        let ctl = EmulatorController::new(
            Some(PathBuf::from("/nonexistent/BasiliskII")),
            PathBuf::from("p"),
            PathBuf::from("s"),
            false,
        );
        assert!(ctl.discover().is_err());
    }

    #[tokio::test]
    async fn clean_exit_reaps_to_absent() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_emulator(dir.path(), "BasiliskII", "exit 0");
        let mut ctl = controller(exe, false);

        ctl.start().unwrap();
        assert_eq!(ctl.state(), EmulatorState::Starting);

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctl.poll();
            if ctl.state() == EmulatorState::Absent {
                return;
            }
        }
        panic!("emulator never reaped, state {:?}", ctl.state());
    }

    #[tokio::test]
    async fn crash_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_emulator(dir.path(), "BasiliskII", "exit 3");
        let mut ctl = controller(exe, false);

        ctl.start().unwrap();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctl.poll();
            if ctl.state() == EmulatorState::Crashed {
                return;
            }
        }
        panic!("crash not detected, state {:?}", ctl.state());
    }

    #[tokio::test]
    async fn exit_75_triggers_respawn() {
        let dir = tempfile::tempdir().unwrap();
        // First run exits 75, later runs sleep so the restart is observable.
        let marker = dir.path().join("ran-once");
        let exe = fake_emulator(
            dir.path(),
            "BasiliskII",
            &format!(
                "if [ -e {m} ]; then sleep 30; else touch {m}; exit 75; fi",
                m = marker.display()
            ),
        );
        let mut ctl = controller(exe, false);

        ctl.start().unwrap();
        let first_pid = ctl.pid();

        // Within a second the controller must have respawned.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctl.poll();
            if ctl.is_running() && ctl.pid() != first_pid && ctl.pid().is_some() {
                break;
            }
            if Instant::now() > deadline {
                panic!("no respawn after exit 75, state {:?}", ctl.state());
            }
        }

        ctl.stop().await;
        assert_eq!(ctl.state(), EmulatorState::Absent);
    }

    #[tokio::test]
    async fn stop_terminates_stubborn_child() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_emulator(dir.path(), "BasiliskII", "sleep 60");
        let mut ctl = controller(exe, false);

        ctl.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctl.poll();
        assert_eq!(ctl.state(), EmulatorState::Running);

        let begun = Instant::now();
        ctl.stop().await;
        assert_eq!(ctl.state(), EmulatorState::Absent);
        assert!(begun.elapsed() < Duration::from_secs(4));
    }
}

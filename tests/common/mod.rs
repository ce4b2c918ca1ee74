//! Shared fakes for the VDE manager integration tests.
//!
//! `FakeDb` models the roles and databases the provisioning statements
//! create and drop. `FakeSupervisor` is an engine whose processes change
//! state immediately.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use vde_manager::{
    AppError, DbConfig, HttpConfig, Mode, NodeConfig, ProcessDefinition, ProcessHandle,
    ProcessState, ProcessSupervisor, Result, SqlExecutor, SupervisorConfig, VdeManager,
};

#[derive(Default)]
struct DbState {
    roles: HashSet<String>,
    /// database name -> owner
    databases: HashMap<String, String>,
    statements: Vec<String>,
    fail_prefix: Option<String>,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct FakeDb {
    state: Mutex<DbState>,
}

impl FakeDb {
    /// Make every later statement starting with `prefix` fail.
    pub fn fail_on(&self, prefix: &str) {
        self.lock().fail_prefix = Some(prefix.to_string());
    }

    /// Every later statement takes `delay` to run.
    pub fn slow_statements(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    pub fn clear_failure(&self) {
        self.lock().fail_prefix = None;
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.lock().roles.contains(role)
    }

    pub fn database_owner(&self, name: &str) -> Option<String> {
        self.lock().databases.get(name).cloned()
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DbState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SqlExecutor for FakeDb {
    async fn execute(&self, statement: &str) -> Result<()> {
        let delay = self.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.statements.push(statement.to_string());
        if let Some(prefix) = &state.fail_prefix {
            if statement.starts_with(prefix.as_str()) {
                return Err(AppError::db(format!("injected failure: {statement}")));
            }
        }

        let words: Vec<&str> = statement.split_whitespace().collect();
        match words.as_slice() {
            ["CREATE", "ROLE", role, ..] => {
                if !state.roles.insert((*role).to_string()) {
                    return Err(AppError::db(format!("role \"{role}\" already exists")));
                }
            }
            ["CREATE", "DATABASE", name, "OWNER", owner] => {
                if state.databases.contains_key(*name) {
                    return Err(AppError::db(format!("database \"{name}\" already exists")));
                }
                state
                    .databases
                    .insert((*name).to_string(), (*owner).to_string());
            }
            ["DROP", "DATABASE", "IF", "EXISTS", name] => {
                state.databases.remove(*name);
            }
            ["DROP", "OWNED", "BY", _, "CASCADE"] => {}
            ["DROP", "ROLE", "IF", "EXISTS", role] => {
                if state.databases.values().any(|owner| owner.as_str() == *role) {
                    return Err(AppError::db(format!(
                        "role \"{role}\" cannot be dropped because some objects depend on it"
                    )));
                }
                state.roles.remove(*role);
            }
            _ => return Err(AppError::db(format!("unexpected statement: {statement}"))),
        }
        Ok(())
    }
}

pub struct FakeHandle {
    definition: ProcessDefinition,
    state: Mutex<ProcessState>,
    fail_start: bool,
    stop_delay: Option<Duration>,
}

impl FakeHandle {
    pub fn set_state(&self, state: ProcessState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn state(&self) -> ProcessState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pid(&self) -> Option<u32> {
        (self.state() == ProcessState::Running).then_some(4242)
    }

    async fn start(&self, _wait: bool) -> Result<()> {
        if self.fail_start {
            self.set_state(ProcessState::Fatal);
            return Err(AppError::process(format!(
                "{} exited during startup",
                self.definition.name
            )));
        }
        self.set_state(ProcessState::Running);
        Ok(())
    }

    async fn stop(&self, _wait: bool) -> Result<()> {
        if !self.state().can_stop() {
            return Ok(());
        }
        self.set_state(ProcessState::Stopping);
        if let Some(delay) = self.stop_delay {
            tokio::time::sleep(delay).await;
        }
        self.set_state(ProcessState::Stopped);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSupervisor {
    processes: Mutex<HashMap<String, Arc<FakeHandle>>>,
    added: Mutex<Vec<ProcessDefinition>>,
    fail_start: Mutex<bool>,
    stop_delay: Mutex<Option<Duration>>,
}

impl FakeSupervisor {
    /// Processes added from now on fail to start and end up FATAL.
    pub fn fail_starts(&self) {
        *self.fail_start.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    /// Processes added from now on take `delay` to stop.
    pub fn slow_stops(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    pub fn handle(&self, name: &str) -> Option<Arc<FakeHandle>> {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Every definition passed to `add`, in order.
    pub fn added(&self) -> Vec<ProcessDefinition> {
        self.added.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn add(&self, name: &str, definition: ProcessDefinition) -> Result<()> {
        let initial = if definition.autostart {
            ProcessState::Running
        } else {
            ProcessState::Stopped
        };
        let handle = Arc::new(FakeHandle {
            definition: definition.clone(),
            state: Mutex::new(initial),
            fail_start: *self.fail_start.lock().unwrap_or_else(|e| e.into_inner()),
            stop_delay: *self.stop_delay.lock().unwrap_or_else(|e| e.into_inner()),
        });
        self.added
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(definition);
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), handle);
        Ok(())
    }

    fn find(&self, name: &str) -> Option<Arc<dyn ProcessHandle>> {
        self.handle(name).map(|h| h as Arc<dyn ProcessHandle>)
    }

    fn remove(&self, name: &str) -> Option<Arc<dyn ProcessHandle>> {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .map(|h| h as Arc<dyn ProcessHandle>)
    }

    fn for_each(&self, visit: &mut dyn FnMut(&str, ProcessState)) {
        let processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        for (name, handle) in processes.iter() {
            visit(name, handle.state());
        }
    }
}

pub fn node_config(mode: Mode, work_dir: &Path) -> NodeConfig {
    NodeConfig {
        mode,
        work_dir: work_dir.to_path_buf(),
        private_dir: work_dir.join("private"),
        node_executable: Some(work_dir.join("bin").join("vde-node")),
        db: DbConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "master".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 5,
        },
        http: HttpConfig {
            host: "127.0.0.1".to_string(),
            port: 7079,
        },
        supervisor: SupervisorConfig::default(),
    }
}

/// A manager over a temporary work directory and fake backends.
pub struct TestNode {
    pub dir: TempDir,
    pub db: Arc<FakeDb>,
    pub supervisor: Arc<FakeSupervisor>,
    pub manager: VdeManager,
}

impl TestNode {
    pub fn master() -> Self {
        Self::with_mode(Mode::Master)
    }

    pub fn worker() -> Self {
        Self::with_mode(Mode::Worker)
    }

    fn with_mode(mode: Mode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(FakeDb::default());
        let supervisor = Arc::new(FakeSupervisor::default());
        let manager = Self::manager(mode, dir.path(), &db, &supervisor);
        Self {
            dir,
            db,
            supervisor,
            manager,
        }
    }

    /// A second manager over the same work directory, as after a restart of
    /// the controller, with a fresh engine.
    pub fn reopen(&self) -> (VdeManager, Arc<FakeSupervisor>) {
        let supervisor = Arc::new(FakeSupervisor::default());
        let manager = Self::manager(Mode::Master, self.dir.path(), &self.db, &supervisor);
        (manager, supervisor)
    }

    fn manager(
        mode: Mode,
        work_dir: &Path,
        db: &Arc<FakeDb>,
        supervisor: &Arc<FakeSupervisor>,
    ) -> VdeManager {
        VdeManager::new(
            node_config(mode, work_dir),
            Arc::clone(db) as Arc<dyn SqlExecutor>,
            Arc::clone(supervisor) as Arc<dyn ProcessSupervisor>,
        )
    }

    pub fn instance_dir(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join("configs").join(name)
    }
}

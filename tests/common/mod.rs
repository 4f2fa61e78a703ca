//! Shared test utilities for the unitfleet test suite.
//!
//! This module provides:
//! - [`FakeHost`]: an in-memory host that interprets the shell commands
//!   unitfleet sends (files, `systemctl`, `journalctl`, users and groups)
//! - [`FakeFleet`]: a [`SessionFactory`] serving fake hosts by hostname
//! - Fixtures for a [`FleetManager`] wired to fake hosts
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use unitfleet::config::Config;
use unitfleet::connection::{
    CommandError, CommandResult, ConnectionError, ConnectionResult, Credential, Session,
    SessionFactory, SessionTarget,
};
use unitfleet::fleet::FleetManager;
use unitfleet::model::{Host, ManagedUnit, RecordId};
use unitfleet::secrets::StaticResolver;
use unitfleet::store::{MemoryStore, Page, Store, UnitFilter};

/// Unit directory of the default configuration.
pub const UNIT_DIR: &str = "/etc/systemd/system";

// ============================================================================
// Fake Units
// ============================================================================

/// Runtime state of a unit on a fake host.
#[derive(Debug, Clone)]
pub struct FakeUnit {
    pub active: String,
    pub sub: String,
    pub enabled: String,
    pub description: String,
    pub exec_start: Option<String>,
    pub main_pid: u32,
    /// Loaded from a file in [`UNIT_DIR`] by `daemon-reload`
    file_backed: bool,
}

impl FakeUnit {
    fn with_state(active: &str, sub: &str, enabled: &str, description: &str) -> Self {
        Self {
            active: active.to_string(),
            sub: sub.to_string(),
            enabled: enabled.to_string(),
            description: description.to_string(),
            exec_start: None,
            main_pid: 0,
            file_backed: false,
        }
    }

    /// An enabled unit that is running.
    pub fn running(description: &str) -> Self {
        Self {
            main_pid: 4242,
            ..Self::with_state("active", "running", "enabled", description)
        }
    }

    /// A disabled unit that is not running.
    pub fn stopped(description: &str) -> Self {
        Self::with_state("inactive", "dead", "disabled", description)
    }

    /// An enabled unit whose last run failed.
    pub fn failed(description: &str) -> Self {
        Self::with_state("failed", "failed", "enabled", description)
    }

    pub fn exec(mut self, command: &str) -> Self {
        self.exec_start = Some(command.to_string());
        self
    }

    fn from_file() -> Self {
        Self {
            file_backed: true,
            ..Self::stopped("")
        }
    }
}

// ============================================================================
// Fake Host State
// ============================================================================

#[derive(Debug, Clone)]
struct FakeFile {
    content: String,
    mtime: u64,
}

#[derive(Debug, Default)]
struct HostState {
    files: BTreeMap<String, FakeFile>,
    dirs: BTreeSet<String>,
    executables: HashSet<String>,
    programs: HashMap<String, String>,
    units: IndexMap<String, FakeUnit>,
    users: HashSet<String>,
    groups: HashSet<String>,
    journal: Vec<(String, String)>,
    clock: u64,
    reloads: usize,
}

fn ok(stdout: impl Into<String>) -> CommandResult {
    CommandResult::success(stdout.into(), String::new())
}

fn fail(code: i32, stderr: impl Into<String>) -> CommandResult {
    CommandResult::failure(code, String::new(), stderr.into())
}

fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => ".",
    }
}

impl HostState {
    fn write(&mut self, path: &str, content: &str) -> Result<(), String> {
        if !self.dirs.contains(parent(path)) {
            return Err(format!("{}: No such file or directory", path));
        }
        self.clock += 1;
        self.files.insert(
            path.to_string(),
            FakeFile {
                content: content.to_string(),
                mtime: self.clock,
            },
        );
        Ok(())
    }

    fn mkdir_all(&mut self, dir: &str) {
        let mut current = dir.trim_end_matches('/').to_string();
        while !current.is_empty() && current != "/" {
            self.dirs.insert(current.clone());
            current = parent(&current).to_string();
        }
        self.dirs.insert("/".to_string());
    }

    fn has_children(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir);
        self.files.keys().any(|f| f.starts_with(&prefix)) || self.dirs.iter().any(|d| d.starts_with(&prefix))
    }

    fn unit_file(name: &str) -> String {
        format!("{}/{}", UNIT_DIR, name)
    }

    /// `systemctl daemon-reload`: load new unit files, drop deleted ones.
    fn reload_units(&mut self) {
        self.reloads += 1;
        let on_disk: Vec<String> = self
            .files
            .keys()
            .filter(|path| parent(path) == UNIT_DIR)
            .filter_map(|path| path.rsplit_once('/').map(|(_, name)| name.to_string()))
            .filter(|name| name.ends_with(".service") || name.ends_with(".timer"))
            .collect();
        for name in &on_disk {
            if !self.units.contains_key(name) {
                self.units.insert(name.clone(), FakeUnit::from_file());
            }
        }
        self.units
            .retain(|name, unit| !unit.file_backed || on_disk.contains(name));
    }

    fn run(&mut self, argv: &[String], stdin: &str) -> CommandResult {
        let mut args: Vec<&str> = argv.iter().map(String::as_str).collect();
        if args.first() == Some(&"sudo") {
            args.remove(0);
            if args.first() == Some(&"-n") {
                args.remove(0);
            }
        }
        let Some((&program, rest)) = args.split_first() else {
            return ok("");
        };

        match program {
            "echo" => ok(format!("{}\n", rest.join(" "))),
            "printf" => ok(rest.get(1).copied().unwrap_or_default()),
            "tee" => match rest.first() {
                Some(path) => match self.write(path, stdin) {
                    Ok(()) => ok(stdin),
                    Err(e) => fail(1, format!("tee: {}", e)),
                },
                None => ok(stdin),
            },
            "cat" => match rest.first().and_then(|p| self.files.get(*p)) {
                Some(file) => ok(file.content.clone()),
                None => fail(1, format!("cat: {}: No such file or directory", rest.join(" "))),
            },
            "test" => {
                let (flag, path) = match rest {
                    [flag, path] => (*flag, *path),
                    _ => return fail(2, "test: bad arguments"),
                };
                let found = match flag {
                    "-f" => self.files.contains_key(path),
                    "-d" => self.dirs.contains(path),
                    "-e" => self.files.contains_key(path) || self.dirs.contains(path),
                    "-x" => self.executables.contains(path),
                    _ => false,
                };
                if found {
                    ok("")
                } else {
                    fail(1, "")
                }
            }
            "cp" => match rest {
                [src, dst] => match self.files.get(*src).map(|f| f.content.clone()) {
                    Some(content) => match self.write(dst, &content) {
                        Ok(()) => ok(""),
                        Err(e) => fail(1, format!("cp: {}", e)),
                    },
                    None => fail(1, format!("cp: cannot stat '{}': No such file or directory", src)),
                },
                _ => fail(1, "cp: missing operand"),
            },
            "mv" => match rest
                .iter()
                .copied()
                .filter(|a| !a.starts_with('-'))
                .collect::<Vec<_>>()
                .as_slice()
            {
                [src, dst] => match self.files.get(*src).map(|f| f.content.clone()) {
                    Some(content) => match self.write(dst, &content) {
                        Ok(()) => {
                            self.files.remove(*src);
                            ok("")
                        }
                        Err(e) => fail(1, format!("mv: {}", e)),
                    },
                    None => fail(1, format!("mv: cannot stat '{}': No such file or directory", src)),
                },
                _ => fail(1, "mv: missing operand"),
            },
            "mkdir" => {
                for dir in rest.iter().filter(|a| !a.starts_with('-')) {
                    self.mkdir_all(dir);
                }
                ok("")
            }
            "chmod" => match rest.last() {
                Some(path) if self.files.contains_key(*path) => ok(""),
                _ => fail(1, "chmod: No such file or directory"),
            },
            "rm" => {
                for path in rest.iter().filter(|a| !a.starts_with('-')) {
                    match path.strip_suffix('*') {
                        Some(prefix) => self.files.retain(|f, _| !f.starts_with(prefix)),
                        None => {
                            self.files.remove(*path);
                        }
                    }
                }
                ok("")
            }
            "rmdir" => match rest.iter().find(|a| !a.starts_with('-')) {
                Some(dir) if !self.dirs.contains(*dir) => fail(
                    1,
                    format!("rmdir: failed to remove '{}': No such file or directory", dir),
                ),
                Some(dir) => {
                    if !self.has_children(dir) {
                        self.dirs.remove(*dir);
                    }
                    ok("")
                }
                None => fail(1, "rmdir: missing operand"),
            },
            "ls" => {
                let Some(pattern) = rest.iter().find(|a| !a.starts_with('-')) else {
                    return fail(2, "ls: missing operand");
                };
                let prefix = pattern.trim_end_matches('*');
                let mut matches: Vec<(&String, u64)> = self
                    .files
                    .iter()
                    .filter(|(path, _)| path.starts_with(prefix))
                    .map(|(path, file)| (path, file.mtime))
                    .collect();
                if matches.is_empty() {
                    return fail(2, format!("ls: cannot access '{}': No such file or directory", pattern));
                }
                matches.sort_by(|a, b| b.1.cmp(&a.1));
                ok(matches
                    .iter()
                    .map(|(path, _)| format!("{}\n", path))
                    .collect::<String>())
            }
            "which" => match rest.first().and_then(|p| self.programs.get(*p)) {
                Some(path) => ok(format!("{}\n", path)),
                None => fail(1, ""),
            },
            "id" => match rest.last() {
                Some(user) if self.users.contains(*user) => ok("1000\n"),
                Some(user) => fail(1, format!("id: '{}': no such user", user)),
                None => ok("uid=0(root)\n"),
            },
            "getent" => match rest {
                ["group", group] if self.groups.contains(*group) => ok(format!("{}:x:1000:\n", group)),
                _ => fail(2, ""),
            },
            "uname" => match rest.first() {
                Some(&"-r") => ok("6.1.0-18-amd64\n"),
                Some(&"-m") => ok("x86_64\n"),
                _ => ok("Linux\n"),
            },
            "nproc" => ok("4\n"),
            "grep" => self.grep(rest, stdin),
            "cut" => ok(cut(rest, stdin)),
            "tr" => match rest {
                ["-d", chars] => ok(stdin.chars().filter(|c| !chars.contains(*c)).collect::<String>()),
                _ => ok(stdin),
            },
            "awk" => self.awk(rest),
            "systemctl" => self.systemctl(rest),
            "journalctl" => self.journalctl(rest),
            other => fail(127, format!("sh: {}: command not found", other)),
        }
    }

    fn grep(&self, args: &[&str], stdin: &str) -> CommandResult {
        let (pattern, input) = match args {
            [pattern] => (*pattern, stdin.to_string()),
            [pattern, path] => match self.files.get(*path) {
                Some(file) => (*pattern, file.content.clone()),
                None => return fail(2, format!("grep: {}: No such file or directory", path)),
            },
            _ => return fail(2, "grep: bad arguments"),
        };
        let Ok(re) = regex::Regex::new(pattern) else {
            return fail(2, "grep: invalid pattern");
        };
        let matched: String = input
            .lines()
            .filter(|line| re.is_match(line))
            .map(|line| format!("{}\n", line))
            .collect();
        if matched.is_empty() {
            fail(1, "")
        } else {
            ok(matched)
        }
    }

    fn awk(&self, args: &[&str]) -> CommandResult {
        match args {
            [program, "/proc/meminfo"] if program.contains("MemTotal") => {
                let kb = self
                    .files
                    .get("/proc/meminfo")
                    .and_then(|f| {
                        f.content
                            .lines()
                            .find(|l| l.starts_with("MemTotal:"))
                            .and_then(|l| l.split_whitespace().nth(1))
                            .and_then(|v| v.parse::<u64>().ok())
                    });
                match kb {
                    Some(kb) => ok(format!("{}\n", kb / 1024)),
                    None => fail(2, "awk: cannot open /proc/meminfo"),
                }
            }
            _ => fail(127, "awk: unsupported program"),
        }
    }

    fn systemctl(&mut self, args: &[&str]) -> CommandResult {
        let Some((&verb, rest)) = args.split_first() else {
            return fail(1, "systemctl: missing verb");
        };
        let target = rest.iter().find(|a| !a.starts_with('-')).copied();

        match verb {
            "daemon-reload" => {
                self.reload_units();
                ok("")
            }
            "list-units" => {
                let services = self.units.iter().filter(|(name, _)| name.ends_with(".service"));
                if rest.contains(&"--output=json") {
                    let listed: Vec<serde_json::Value> = services
                        .map(|(name, unit)| {
                            serde_json::json!({
                                "unit": name,
                                "load": "loaded",
                                "active": unit.active,
                                "sub": unit.sub,
                                "description": unit.description,
                            })
                        })
                        .collect();
                    ok(serde_json::Value::Array(listed).to_string())
                } else {
                    ok(services
                        .map(|(name, unit)| {
                            format!("{} loaded {} {} {}\n", name, unit.active, unit.sub, unit.description)
                        })
                        .collect::<String>())
                }
            }
            "show" => {
                let Some(name) = target else {
                    return fail(1, "systemctl show: missing unit");
                };
                ok(self.show(name))
            }
            "list-unit-files" => {
                let Some(name) = target else {
                    return ok("0 unit files listed.\n");
                };
                let known = self.units.get(name).map(|u| u.enabled.clone()).or_else(|| {
                    self.files
                        .contains_key(&Self::unit_file(name))
                        .then(|| "disabled".to_string())
                });
                match known {
                    Some(state) => ok(format!(
                        "UNIT FILE STATE PRESET\n{} {} enabled\n\n1 unit files listed.\n",
                        name, state
                    )),
                    None => CommandResult::failure(1, "0 unit files listed.\n".to_string(), String::new()),
                }
            }
            "start" | "stop" | "restart" | "reload" | "enable" | "disable" => {
                let Some(name) = target else {
                    return fail(1, format!("Too few arguments for {}", verb));
                };
                self.act(verb, name)
            }
            other => fail(1, format!("Unknown command verb {}.", other)),
        }
    }

    fn show(&self, name: &str) -> String {
        let Some(unit) = self.units.get(name) else {
            return format!(
                "Id={}\nLoadState=not-found\nActiveState=inactive\nSubState=dead\nUnitFileState=\nMainPID=0\n",
                name
            );
        };
        let mut out = format!(
            "Id={}\nDescription={}\nLoadState=loaded\nActiveState={}\nSubState={}\nUnitFileState={}\nMainPID={}\nRestart=on-failure\n",
            name, unit.description, unit.active, unit.sub, unit.enabled, unit.main_pid
        );
        if let Some(exec) = &unit.exec_start {
            let path = exec.split_whitespace().next().unwrap_or_default();
            out.push_str(&format!(
                "ExecStart={{ path={} ; argv[]={} ; ignore_errors=no ; start_time=[n/a] }}\n",
                path, exec
            ));
        }
        let fragment = if unit.file_backed {
            Self::unit_file(name)
        } else {
            format!("/lib/systemd/system/{}", name)
        };
        out.push_str(&format!("FragmentPath={}\n", fragment));
        if unit.active == "active" {
            out.push_str("MemoryCurrent=52428800\n");
        } else {
            out.push_str("MemoryCurrent=[not set]\n");
        }
        out
    }

    fn act(&mut self, verb: &str, name: &str) -> CommandResult {
        self.clock += 1;
        let clock = self.clock;
        let Some(unit) = self.units.get_mut(name) else {
            return fail(5, format!("Failed to {} {}: Unit {} not found.", verb, name, name));
        };
        let is_timer = name.ends_with(".timer");
        let entry = match verb {
            "start" | "restart" => {
                unit.active = "active".to_string();
                unit.sub = if is_timer { "waiting" } else { "running" }.to_string();
                unit.main_pid = if is_timer { 0 } else { 4000 + clock as u32 };
                Some(format!("Started {}.", name))
            }
            "stop" => {
                unit.active = "inactive".to_string();
                unit.sub = "dead".to_string();
                unit.main_pid = 0;
                Some(format!("Stopped {}.", name))
            }
            "reload" => {
                if unit.active != "active" {
                    return fail(1, format!("Unit {} cannot be reloaded because it is inactive.", name));
                }
                Some(format!("Reloaded {}.", name))
            }
            "enable" => {
                unit.enabled = "enabled".to_string();
                None
            }
            "disable" => {
                unit.enabled = "disabled".to_string();
                None
            }
            _ => None,
        };
        if let Some(line) = entry {
            self.journal.push((name.to_string(), line));
        }
        ok("")
    }

    fn journalctl(&self, args: &[&str]) -> CommandResult {
        let unit = args
            .iter()
            .position(|a| *a == "-u")
            .and_then(|i| args.get(i + 1))
            .copied()
            .unwrap_or_default();
        let lines = args
            .iter()
            .position(|a| *a == "-n")
            .and_then(|i| args.get(i + 1))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(10);

        let entries: Vec<&str> = self
            .journal
            .iter()
            .filter(|(u, _)| u == unit)
            .map(|(_, line)| line.as_str())
            .collect();
        if entries.is_empty() {
            return ok("-- No entries --\n");
        }
        let start = entries.len().saturating_sub(lines);
        ok(entries[start..]
            .iter()
            .map(|l| format!("{}\n", l))
            .collect::<String>())
    }
}

/// `cut -d<delim> -f<n>[-]`
fn cut(args: &[&str], stdin: &str) -> String {
    let delim = args
        .iter()
        .find_map(|a| a.strip_prefix("-d"))
        .and_then(|d| d.chars().next())
        .unwrap_or('\t');
    let field = args.iter().find_map(|a| a.strip_prefix("-f")).unwrap_or("1");
    let (index, to_end) = match field.strip_suffix('-') {
        Some(n) => (n.parse::<usize>().unwrap_or(1), true),
        None => (field.parse::<usize>().unwrap_or(1), false),
    };

    stdin
        .lines()
        .map(|line| {
            let parts: Vec<&str> = line.split(delim).collect();
            let selected = if to_end {
                parts.get(index - 1..).map(|p| p.join(delim.to_string().as_str()))
            } else {
                parts.get(index - 1).map(|p| p.to_string())
            };
            format!("{}\n", selected.unwrap_or_default())
        })
        .collect()
}

// ============================================================================
// Fake Host
// ============================================================================

enum Fault {
    Exit { code: i32, stderr: String },
    Interrupt,
}

/// A host that interprets unitfleet's shell commands against in-memory state.
///
/// Every command line received is logged. Faults injected with
/// [`FakeHost::fail_on`] and [`FakeHost::interrupt_on`] apply to any command
/// line containing the given text, before it changes any state.
pub struct FakeHost {
    hostname: String,
    state: RwLock<HostState>,
    log: RwLock<Vec<String>>,
    faults: RwLock<Vec<(String, Fault)>>,
}

impl FakeHost {
    /// A Debian-like host with a `deploy` user and no units.
    pub fn new(hostname: &str) -> Self {
        let mut state = HostState::default();
        for dir in [UNIT_DIR, "/tmp", "/usr/bin", "/usr/sbin", "/opt/app", "/proc"] {
            state.mkdir_all(dir);
        }
        state.files.insert(
            "/etc/os-release".to_string(),
            FakeFile {
                content: "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nNAME=\"Debian GNU/Linux\"\nVERSION=\"12 (bookworm)\"\nID=debian\n".to_string(),
                mtime: 0,
            },
        );
        state.files.insert(
            "/proc/meminfo".to_string(),
            FakeFile {
                content: "MemTotal:       16256844 kB\nMemFree:         8123456 kB\n".to_string(),
                mtime: 0,
            },
        );
        for user in ["root", "deploy", "www-data"] {
            state.users.insert(user.to_string());
            state.groups.insert(user.to_string());
        }
        for program in ["python3", "bash", "sh"] {
            let path = format!("/usr/bin/{}", program);
            state.programs.insert(program.to_string(), path.clone());
            state.executables.insert(path);
        }

        Self {
            hostname: hostname.to_string(),
            state: RwLock::new(state),
            log: RwLock::new(Vec::new()),
            faults: RwLock::new(Vec::new()),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Add a unit that is not backed by a file in the unit directory.
    pub fn with_unit(self, name: &str, unit: FakeUnit) -> Self {
        self.state.write().units.insert(name.to_string(), unit);
        self
    }

    /// Add an executable at an absolute path, reachable by `which` under its
    /// file name.
    pub fn with_program(self, path: &str) -> Self {
        {
            let mut state = self.state.write();
            if let Some((_, name)) = path.rsplit_once('/') {
                state.programs.insert(name.to_string(), path.to_string());
            }
            state.executables.insert(path.to_string());
        }
        self
    }

    pub fn with_journal(self, unit: &str, lines: &[&str]) -> Self {
        self.state
            .write()
            .journal
            .extend(lines.iter().map(|l| (unit.to_string(), l.to_string())));
        self
    }

    pub fn with_dir(self, dir: &str) -> Self {
        self.state.write().mkdir_all(dir);
        self
    }

    /// Create or replace a file, creating its directory.
    pub fn put_file(&self, path: &str, content: &str) {
        let mut state = self.state.write();
        state.mkdir_all(parent(path));
        let _ = state.write(path, content);
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.read().files.get(path).map(|f| f.content.clone())
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.state.read().files.contains_key(path)
    }

    pub fn has_dir(&self, dir: &str) -> bool {
        self.state.read().dirs.contains(dir)
    }

    /// Paths starting with `prefix`, sorted.
    pub fn files_under(&self, prefix: &str) -> Vec<String> {
        self.state
            .read()
            .files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn unit(&self, name: &str) -> Option<FakeUnit> {
        self.state.read().units.get(name).cloned()
    }

    pub fn remove_unit(&self, name: &str) {
        self.state.write().units.shift_remove(name);
    }

    pub fn set_unit_state(&self, name: &str, active: &str) {
        if let Some(unit) = self.state.write().units.get_mut(name) {
            unit.active = active.to_string();
        }
    }

    pub fn daemon_reloads(&self) -> usize {
        self.state.read().reloads
    }

    /// Make every command line containing `pattern` exit with `code`.
    pub fn fail_on(&self, pattern: &str, code: i32, stderr: &str) {
        self.faults.write().push((
            pattern.to_string(),
            Fault::Exit {
                code,
                stderr: stderr.to_string(),
            },
        ));
    }

    /// Drop the session on every command line containing `pattern`.
    pub fn interrupt_on(&self, pattern: &str) {
        self.faults
            .write()
            .push((pattern.to_string(), Fault::Interrupt));
    }

    pub fn clear_faults(&self) {
        self.faults.write().clear();
    }

    /// Every command line received, pool probes included.
    pub fn commands(&self) -> Vec<String> {
        self.log.read().clone()
    }

    /// Command lines containing `pattern`.
    pub fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.log
            .read()
            .iter()
            .filter(|c| c.contains(pattern))
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.write().clear();
    }

    fn interpret(&self, line: &str) -> Result<CommandResult, CommandError> {
        self.log.write().push(line.to_string());

        for (pattern, fault) in self.faults.read().iter() {
            if line.contains(pattern.as_str()) {
                return match fault {
                    Fault::Exit { code, stderr } => Ok(fail(*code, stderr.clone())),
                    Fault::Interrupt => Err(CommandError::Interrupted(format!(
                        "{} closed the channel",
                        self.hostname
                    ))),
                };
            }
        }

        let words = match shell_words::split(line) {
            Ok(words) => words,
            Err(e) => return Ok(fail(2, format!("sh: {}", e))),
        };

        // Split on `|`, `||` and `&&`; redirections are dropped.
        let mut chain: Vec<(Option<String>, Vec<String>)> = vec![(None, Vec::new())];
        let mut skip_next = false;
        for word in words {
            if skip_next {
                skip_next = false;
                continue;
            }
            match word.as_str() {
                "|" | "||" | "&&" => chain.push((Some(word), Vec::new())),
                ">" | "2>" => skip_next = true,
                _ => {
                    if let Some((_, argv)) = chain.last_mut() {
                        argv.push(word);
                    }
                }
            }
        }

        let mut state = self.state.write();
        let mut result = ok("");
        for (operator, argv) in chain {
            result = match operator.as_deref() {
                Some("|") => state.run(&argv, &result.stdout),
                Some("||") if result.exit_ok => continue,
                Some("&&") if !result.exit_ok => continue,
                _ => state.run(&argv, ""),
            };
        }
        Ok(result)
    }
}

// ============================================================================
// Sessions and Factory
// ============================================================================

/// One session to a [`FakeHost`].
pub struct FakeSession {
    id: String,
    host: Arc<FakeHost>,
    open: AtomicBool,
}

#[async_trait]
impl Session for FakeSession {
    fn identifier(&self) -> &str {
        &self.id
    }

    async fn execute(&self, command: &str) -> Result<CommandResult, CommandError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CommandError::Interrupted("session closed".to_string()));
        }
        let result = self.host.interpret(command);
        if matches!(result, Err(CommandError::Interrupted(_))) {
            self.open.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Serves [`FakeHost`]s by hostname and counts connection attempts.
#[derive(Default)]
pub struct FakeFleet {
    hosts: RwLock<HashMap<String, Arc<FakeHost>>>,
    unreachable: RwLock<HashSet<String>>,
    connects: AtomicUsize,
    transient_failures: AtomicUsize,
    credentials: RwLock<Vec<Credential>>,
    delay: Duration,
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect takes `delay`, so concurrent acquires overlap.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn add(&self, host: FakeHost) -> Arc<FakeHost> {
        let host = Arc::new(host);
        self.hosts
            .write()
            .insert(host.hostname().to_string(), Arc::clone(&host));
        host
    }

    pub fn set_unreachable(&self, hostname: &str) {
        self.unreachable.write().insert(hostname.to_string());
    }

    pub fn set_reachable(&self, hostname: &str) {
        self.unreachable.write().remove(hostname);
    }

    /// Time out the next `n` connection attempts.
    pub fn time_out_next(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Credentials presented by each connection attempt, in order.
    pub fn credentials(&self) -> Vec<Credential> {
        self.credentials.read().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeFleet {
    async fn connect(&self, target: &SessionTarget) -> ConnectionResult<Arc<dyn Session>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.credentials.write().push(target.credential.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.unreachable.read().contains(&target.host) {
            return Err(ConnectionError::Unreachable(format!(
                "{}:{} refused the connection",
                target.host, target.port
            )));
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ConnectionError::Timeout(target.timeout.as_secs()));
        }

        let host = self
            .hosts
            .read()
            .get(&target.host)
            .cloned()
            .ok_or_else(|| ConnectionError::Unreachable(format!("unknown host {}", target.host)))?;
        Ok(Arc::new(FakeSession {
            id: target.pool_key(),
            host,
            open: AtomicBool::new(true),
        }))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Defaults with no connection retries and a short timeout.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.ssh.retries = 0;
    config.ssh.timeout = Duration::from_secs(5);
    config
}

/// A fleet manager over a fresh memory store and `hosts`.
pub fn fleet_with(hosts: &Arc<FakeFleet>) -> FleetManager {
    fleet_with_resolver(hosts, StaticResolver::new())
}

pub fn fleet_with_resolver(hosts: &Arc<FakeFleet>, resolver: StaticResolver) -> FleetManager {
    let factory: Arc<dyn SessionFactory> = Arc::clone(hosts) as Arc<dyn SessionFactory>;
    FleetManager::new(
        test_config(),
        Arc::new(MemoryStore::new()),
        factory,
        Arc::new(resolver),
    )
}

/// Save a host record for `hostname`.
pub async fn register(fleet: &FleetManager, hostname: &str) -> Host {
    let host = fleet.new_host(hostname, "deploy");
    fleet.store().save_host(host).await.unwrap()
}

/// All unit records of a host, in id order.
pub async fn units_of(fleet: &FleetManager, host_id: RecordId) -> Vec<ManagedUnit> {
    let mut units = fleet
        .store()
        .list_units(&UnitFilter::for_host(host_id), Page::all())
        .await
        .unwrap();
    units.sort_by_key(|u| u.id);
    units
}

/// The unit record of a host with the given canonical name.
pub async fn unit_named(fleet: &FleetManager, host_id: RecordId, name: &str) -> ManagedUnit {
    units_of(fleet, host_id)
        .await
        .into_iter()
        .find(|u| u.canonical_name() == name)
        .unwrap_or_else(|| panic!("no unit named {}", name))
}

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse the single JSON line printed in JSON output mode.
    pub fn json(&self) -> serde_json::Value {
        let line = self
            .stdout
            .lines()
            .rev()
            .find(|l| l.trim_start().starts_with('{'))
            .unwrap_or_else(|| panic!("no JSON on stdout; log: {}", self.log_path.display()));
        serde_json::from_str(line)
            .unwrap_or_else(|e| panic!("bad JSON ({e}); log: {}", self.log_path.display()))
    }
}

/// Isolated HOME: every default path (config, settings, logs, cache) lands in it.
pub struct Sandbox {
    pub home: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let sandbox = Self {
            home: TempDir::new().expect("create sandbox home"),
        };
        fs::create_dir_all(sandbox.target()).expect("create cache dir");
        sandbox
    }

    /// Sandbox without the cache directory.
    pub fn without_cache() -> Self {
        let sandbox = Self::new();
        fs::remove_dir_all(sandbox.target()).expect("remove cache dir");
        sandbox
    }

    pub fn target(&self) -> PathBuf {
        self.home
            .path()
            .join("Library/Caches/com.apple.coresymbolicationd")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.home.path().join(".local/share/symbolsweep")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir().join("settings.json")
    }

    /// Sparse file of `len` bytes inside the cache directory.
    pub fn sparse_file(&self, name: &str, len: u64) -> PathBuf {
        let path = self.target().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        let f = fs::File::create(&path).expect("create sparse file");
        f.set_len(len).expect("set sparse length");
        path
    }

    pub fn write_settings(&self, raw: &str) {
        fs::create_dir_all(self.data_dir()).expect("create data dir");
        fs::write(self.settings_file(), raw).expect("write settings");
    }

    pub fn run(&self, case_name: &str, args: &[&str]) -> CmdResult {
        run_cli_case_in(case_name, args, self.home.path())
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_symsweep") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "symsweep.exe"
    } else {
        "symsweep"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve symsweep binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let sandbox = Sandbox::new();
    sandbox.run(case_name, args)
}

fn run_cli_case_in(case_name: &str, args: &[&str], home: &Path) -> CmdResult {
    let root = std::env::temp_dir().join("symsweep-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("HOME", home)
        .env("SSW_OUTPUT_FORMAT", "json")
        .env("RUST_BACKTRACE", "1");
    for (key, _) in std::env::vars() {
        if key.starts_with("SSW_") && key != "SSW_OUTPUT_FORMAT" {
            command.env_remove(key);
        }
    }
    let output = command.output().expect("execute symsweep command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("home={}\n", home.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

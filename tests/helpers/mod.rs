//! Shared fixtures for integration tests.
//!
//! [`FakeHost`] is a recording [`CommandExecutor`]: it never runs anything,
//! but simulates the few commands whose effects later steps read back
//! (`useradd`, `usermod`, `wg genkey`, `wg pubkey`) against a temporary host
//! root seeded by [`seed_ubuntu_root`].

use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use hostprep::cli::{ApplyArgs, CommonArgs, LogLevel};
use hostprep::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use tempfile::TempDir;

#[allow(dead_code)]
pub const UBUNTU_HOSTS: &str = "127.0.0.1 localhost\n127.0.1.1 ubuntu\n\n# The following lines are desirable for IPv6 capable hosts\n::1     ip6-localhost ip6-loopback\nff02::1 ip6-allnodes\nff02::2 ip6-allrouters\n";

#[allow(dead_code)]
pub const UBUNTU_SSHD_CONFIG: &str = "# This is the sshd server system-wide configuration file.\n#Port 22\nKbdInteractiveAuthentication no\nUsePAM yes\nX11Forwarding yes\nPrintMotd no\nAcceptEnv LANG LC_*\nSubsystem sftp /usr/lib/openssh/sftp-server\n";

#[allow(dead_code)]
pub const ROOT_KEYS: &str = "# provider-installed key\nssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBmF0bnR0ZXN0a2V5cm9vdA root@provider\n";

#[allow(dead_code)]
pub const OPS_KEYS: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOpsVGVhbUtleU9uZQ ops@laptop\n\necdsa-sha2-nistp256 AAAAE2VjZHNhLXNoYTItbmlzdHAyNTY ops@desktop\n";

fn exit(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

/// A recording executor bound to a fake host root.
pub struct FakeHost {
    root: Utf8PathBuf,
    calls: Mutex<Vec<CommandSpec>>,
    failures: Vec<(String, Vec<String>)>,
    responses: Vec<(String, Vec<String>, String)>,
    key_counter: AtomicUsize,
}

#[allow(dead_code)]
impl FakeHost {
    pub fn new(root: &Utf8Path) -> Self {
        Self {
            root: root.to_path_buf(),
            calls: Mutex::new(Vec::new()),
            failures: Vec::new(),
            responses: Vec::new(),
            key_counter: AtomicUsize::new(0),
        }
    }

    /// Makes every command matching `command` + `args` prefix exit with status 1.
    pub fn fail_on(mut self, command: &str, args: &[&str]) -> Self {
        self.failures
            .push((command.to_string(), args.iter().map(|a| a.to_string()).collect()));
        self
    }

    /// Returns `stdout` for captured commands matching `command` + `args` prefix.
    pub fn respond(mut self, command: &str, args: &[&str], stdout: &str) -> Self {
        self.responses.push((
            command.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
            stdout.to_string(),
        ));
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Every recorded call rendered as a command line (secrets redacted).
    pub fn rendered(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn count(&self, command: &str, args: &[&str]) -> usize {
        self.calls().iter().filter(|c| c.matches(command, args)).count()
    }

    pub fn position(&self, command: &str, args: &[&str]) -> Option<usize> {
        self.calls().iter().position(|c| c.matches(command, args))
    }

    fn matches_any(list: &[(String, Vec<String>)], spec: &CommandSpec) -> bool {
        list.iter().any(|(command, args)| {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            spec.matches(command, &args)
        })
    }

    fn scripted(&self, spec: &CommandSpec) -> Option<String> {
        self.responses
            .iter()
            .find(|(command, args, _)| {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                spec.matches(command, &args)
            })
            .map(|(_, _, stdout)| stdout.clone())
    }

    fn host_path(&self, in_host: &str) -> Utf8PathBuf {
        self.root.join(in_host.trim_start_matches('/'))
    }

    fn simulate(&self, spec: &CommandSpec) -> Result<Option<String>> {
        match (spec.command.as_str(), spec.args.first().map(String::as_str)) {
            ("useradd", _) => {
                let user = spec.args.last().cloned().unwrap_or_default();
                let passwd = self.host_path("/etc/passwd");
                let mut content = fs::read_to_string(&passwd).unwrap_or_default();
                content.push_str(&format!("{}:x:1001:1001::/home/{}:/bin/bash\n", user, user));
                fs::write(&passwd, content)?;
                fs::create_dir_all(self.host_path(&format!("/home/{}", user)))?;
                Ok(None)
            }
            ("usermod", Some("-aG")) => {
                let group = &spec.args[1];
                let user = &spec.args[2];
                let path = self.host_path("/etc/group");
                let content = fs::read_to_string(&path).unwrap_or_default();
                let updated: Vec<String> = content
                    .lines()
                    .map(|line| {
                        if line.split(':').next() == Some(group.as_str()) && !line.contains(user.as_str()) {
                            if line.ends_with(':') {
                                format!("{}{}", line, user)
                            } else {
                                format!("{},{}", line, user)
                            }
                        } else {
                            line.to_string()
                        }
                    })
                    .collect();
                fs::write(&path, updated.join("\n") + "\n")?;
                Ok(None)
            }
            ("wg", Some("genkey")) => {
                let n = self.key_counter.fetch_add(1, Ordering::SeqCst);
                Ok(Some(format!("PRIVATE{}KEYAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=\n", n)))
            }
            ("wg", Some("pubkey")) => {
                let private = spec.stdin.clone().unwrap_or_default();
                Ok(Some(format!("PUB-{}\n", private.trim())))
            }
            _ => Ok(None),
        }
    }
}

impl CommandExecutor for FakeHost {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        self.calls.lock().unwrap().push(spec.clone());

        if Self::matches_any(&self.failures, spec) {
            return Ok(ExecutionResult {
                status: Some(exit(1)),
                stdout: None,
            });
        }

        let simulated = self.simulate(spec)?;
        let stdout = if spec.capture_stdout {
            self.scripted(spec).or(simulated)
        } else {
            None
        };
        Ok(ExecutionResult {
            status: Some(exit(0)),
            stdout,
        })
    }
}

/// A temporary host root and its UTF-8 path.
pub struct FakeRoot {
    _dir: TempDir,
    pub root: Utf8PathBuf,
}

#[allow(dead_code)]
impl FakeRoot {
    pub fn path(&self, in_host: &str) -> Utf8PathBuf {
        self.root.join(in_host.trim_start_matches('/'))
    }

    pub fn read(&self, in_host: &str) -> String {
        fs::read_to_string(self.path(in_host))
            .unwrap_or_else(|e| panic!("failed to read {}: {}", in_host, e))
    }

    pub fn write(&self, in_host: &str, content: &str) {
        let path = self.path(in_host);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn exists(&self, in_host: &str) -> bool {
        self.path(in_host).exists()
    }

    pub fn mode(&self, in_host: &str) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(self.path(in_host)).unwrap().permissions().mode() & 0o7777
    }

    /// Backup copies hostprep left next to files in `dir`.
    pub fn backups_in(&self, dir: &str) -> usize {
        fs::read_dir(self.path(dir))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().contains(".hostprep-2"))
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Creates a host root resembling a fresh Ubuntu cloud image.
#[allow(dead_code)]
pub fn seed_ubuntu_root() -> FakeRoot {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
    let fake = FakeRoot { _dir: dir, root };
    fake.write("/etc/hosts", UBUNTU_HOSTS);
    fake.write("/etc/hostname", "ubuntu\n");
    fake.write(
        "/etc/passwd",
        "root:x:0:0:root:/root:/bin/bash\nubuntu:x:1000:1000:Ubuntu:/home/ubuntu:/bin/bash\n",
    );
    fake.write("/etc/group", "root:x:0:\nsudo:x:27:ubuntu\nubuntu:x:1000:\n");
    fake.write("/etc/ssh/sshd_config", UBUNTU_SSHD_CONFIG);
    fake.write("/root/.ssh/authorized_keys", ROOT_KEYS);
    fs::create_dir_all(fake.path("/home/ubuntu")).unwrap();
    fake
}

/// Owned environment pairs.
#[allow(dead_code)]
pub fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// `apply` arguments targeting `root`.
#[allow(dead_code)]
pub fn apply_args(root: &Utf8Path, dry_run: bool) -> ApplyArgs {
    ApplyArgs {
        common: CommonArgs {
            file: None,
            log_level: LogLevel::Info,
        },
        root: root.to_path_buf(),
        dry_run,
    }
}

#[allow(dead_code)]
pub fn shared(fake: FakeHost) -> (Arc<FakeHost>, Arc<dyn CommandExecutor>) {
    let fake = Arc::new(fake);
    let executor: Arc<dyn CommandExecutor> = fake.clone();
    (fake, executor)
}

//! iSCSI attach backend
//!
//! Production `AttachBackend` driving the open-iscsi tools: `iscsiadm` for
//! discovery and login, `blkid`/`mkfs` for formatting and `mount`/`umount`.

use crate::context::CallContext;
use crate::domain::ports::{AttachBackend, AttachOutcome, DetachOutcome};
use crate::error::{Error, Result};
use crate::node::mount::{MountTable, PROC_MOUNTS};
use crate::node::session::AttachmentSession;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// `iscsiadm` exit status when a session for the node already exists
const ISCSI_ERR_SESS_EXISTS: i32 = 15;

/// `blkid -p` exit status when the probe finds nothing
const BLKID_NOT_FOUND: i32 = 2;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct IscsiConfig {
    pub iscsiadm: String,
    /// Filesystem created on blank devices when the request names none
    pub default_fs_type: String,
    /// How long to wait for the device link after login
    pub device_timeout: Duration,
    pub poll_interval: Duration,
    pub mounts_path: PathBuf,
    pub by_path_dir: PathBuf,
}

impl Default for IscsiConfig {
    fn default() -> Self {
        Self {
            iscsiadm: "iscsiadm".to_string(),
            default_fs_type: "ext4".to_string(),
            device_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            mounts_path: PathBuf::from(PROC_MOUNTS),
            by_path_dir: PathBuf::from("/dev/disk/by-path"),
        }
    }
}

impl IscsiConfig {
    pub fn with_default_fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.default_fs_type = fs_type.into();
        self
    }

    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }
}

// =============================================================================
// Backend
// =============================================================================

pub struct IscsiAdmBackend {
    config: IscsiConfig,
}

impl IscsiAdmBackend {
    pub fn new(config: IscsiConfig) -> Self {
        Self { config }
    }

    async fn mounts(&self) -> Result<MountTable> {
        MountTable::load(&self.config.mounts_path).await
    }

    async fn iscsiadm(&self, ctx: &CallContext, args: &[&str]) -> Result<Output> {
        output(ctx, &self.config.iscsiadm, args).await
    }

    /// Discover the target through `portal` and log into it
    async fn login(&self, ctx: &CallContext, session: &AttachmentSession, portal: &str) -> Result<()> {
        let iface = session.iscsi_interface.as_str();
        let discovery = ["-m", "discoverydb", "-t", "sendtargets", "-p", portal, "-I", iface];

        check(
            self.iscsiadm(ctx, &[&discovery[..], &["-o", "new"]].concat()).await?,
            "iscsiadm discoverydb",
        )?;
        check(
            self.iscsiadm(ctx, &[&discovery[..], &["--discover"]].concat()).await?,
            "iscsiadm discover",
        )?;

        let login = self
            .iscsiadm(
                ctx,
                &["-m", "node", "-p", portal, "-T", session.iqn.as_str(), "-I", iface, "--login"],
            )
            .await?;
        if login.status.code() == Some(ISCSI_ERR_SESS_EXISTS) {
            debug!("Session to {} via {} already exists", session.iqn, portal);
            return Ok(());
        }
        check(login, "iscsiadm login")
    }

    /// Poll for the by-path link of any logged-in portal
    async fn wait_for_device(
        &self,
        ctx: &CallContext,
        session: &AttachmentSession,
        portals: &[String],
    ) -> Result<String> {
        let deadline = Instant::now() + self.config.device_timeout;
        loop {
            for portal in portals {
                let link = self.config.by_path_dir.join(session.device_link(portal));
                if tokio::fs::metadata(&link).await.is_ok() {
                    return Ok(link.to_string_lossy().into_owned());
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Command {
                    command: "attach".into(),
                    reason: format!(
                        "could not find iSCSI device for {} lun {}",
                        session.iqn, session.lun
                    ),
                });
            }
            let interval = self.config.poll_interval;
            ctx.run(async {
                tokio::time::sleep(interval).await;
                Ok(())
            })
            .await?;
        }
    }

    /// Filesystem type on `device`, `None` when blank
    async fn probe_fs(&self, ctx: &CallContext, device: &str) -> Result<Option<String>> {
        let out = output(ctx, "blkid", &["-p", "-s", "TYPE", "-o", "value", device]).await?;
        if out.status.code() == Some(BLKID_NOT_FOUND) {
            return Ok(None);
        }
        let out = check_output(out, "blkid")?;
        let fs = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok(Some(fs).filter(|fs| !fs.is_empty()))
    }
}

#[async_trait]
impl AttachBackend for IscsiAdmBackend {
    async fn attach(&self, ctx: &CallContext, session: &AttachmentSession) -> Result<AttachOutcome> {
        if self.mounts().await?.is_mount_point(&session.target_path) {
            info!("{} is already mounted", session.target_path);
            return Ok(AttachOutcome::AlreadyMounted);
        }

        let mut logged_in = Vec::new();
        let mut last_error = None;
        for portal in session.all_portals()? {
            match self.login(ctx, session, &portal).await {
                Ok(()) => {
                    info!("Logged into {} via {}", session.iqn, portal);
                    logged_in.push(portal);
                }
                Err(e @ (Error::Cancelled | Error::DeadlineExceeded(_))) => return Err(e),
                Err(e) => {
                    warn!("Login to {} via {} failed: {}", session.iqn, portal, e);
                    last_error = Some(e);
                }
            }
        }
        if logged_in.is_empty() {
            return Err(last_error.unwrap_or_else(|| Error::Command {
                command: "iscsiadm login".into(),
                reason: "no portals to log into".into(),
            }));
        }

        let device = self.wait_for_device(ctx, session, &logged_in).await?;
        debug!("Found device {} for {}", device, session.iqn);

        ctx.check()?;
        tokio::fs::create_dir_all(&session.target_path).await?;

        let fs_type = session
            .fs_type
            .clone()
            .unwrap_or_else(|| self.config.default_fs_type.clone());
        match self.probe_fs(ctx, &device).await? {
            Some(existing) => debug!("Device {} already formatted as {}", device, existing),
            None if session.read_only => {
                return Err(Error::Command {
                    command: "mount".into(),
                    reason: format!("{} has no filesystem and is requested read-only", device),
                })
            }
            None => {
                info!("Formatting {} as {}", device, fs_type);
                let mkfs = format!("mkfs.{}", fs_type);
                check(output(ctx, &mkfs, &[device.as_str()]).await?, &mkfs)?;
            }
        }

        let mut args = vec!["-t", fs_type.as_str()];
        if session.read_only {
            args.extend(["-o", "ro"]);
        }
        args.extend([device.as_str(), session.target_path.as_str()]);
        check(output(ctx, "mount", &args).await?, "mount")?;

        info!("Mounted {} at {}", device, session.target_path);
        Ok(AttachOutcome::Attached { device })
    }

    async fn detach(&self, ctx: &CallContext, target_path: &str) -> Result<DetachOutcome> {
        let Some(device) = self.mounts().await?.device_for(target_path).map(String::from) else {
            return Ok(DetachOutcome::NotMounted);
        };

        // Resolve sessions before unmounting; the device may vanish after logout
        let sessions = find_sessions(&self.config.by_path_dir, &device).await?;

        check(output(ctx, "umount", &[target_path]).await?, "umount")?;
        info!("Unmounted {} from {}", device, target_path);

        if let Err(e) = tokio::fs::remove_dir(target_path).await {
            warn!("Could not remove {}: {}", target_path, e);
        }

        let remaining = self.mounts().await?.references(&device);
        if remaining > 0 {
            info!("{} still has {} mounts, keeping session", device, remaining);
            return Ok(DetachOutcome::Detached);
        }

        for (portal, iqn) in sessions {
            let node = ["-m", "node", "-p", portal.as_str(), "-T", iqn.as_str()];
            check(
                self.iscsiadm(ctx, &[&node[..], &["--logout"]].concat()).await?,
                "iscsiadm logout",
            )?;
            check(
                self.iscsiadm(ctx, &[&node[..], &["-o", "delete"]].concat()).await?,
                "iscsiadm node delete",
            )?;
            info!("Logged out of {} via {}", iqn, portal);
        }
        Ok(DetachOutcome::Detached)
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn output(ctx: &CallContext, program: &str, args: &[&str]) -> Result<Output> {
    debug!("Running {} {}", program, args.join(" "));
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    ctx.run(async {
        command.output().await.map_err(|e| Error::Command {
            command: program.to_string(),
            reason: e.to_string(),
        })
    })
    .await
}

fn check_output(out: Output, command: &str) -> Result<Output> {
    if out.status.success() {
        return Ok(out);
    }
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    Err(Error::Command {
        command: command.to_string(),
        reason: if stderr.is_empty() {
            out.status.to_string()
        } else {
            stderr
        },
    })
}

fn check(out: Output, command: &str) -> Result<()> {
    check_output(out, command).map(|_| ())
}

/// `(portal, iqn)` of every by-path link resolving to `device`
pub async fn find_sessions(by_path_dir: &Path, device: &str) -> Result<Vec<(String, String)>> {
    let device = tokio::fs::canonicalize(device)
        .await
        .unwrap_or_else(|_| PathBuf::from(device));

    let mut sessions = Vec::new();
    let mut dir = match tokio::fs::read_dir(by_path_dir).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((portal, iqn, _lun)) = parse_link_name(&name) else {
            continue;
        };
        match tokio::fs::canonicalize(entry.path()).await {
            Ok(target) if target == device => {
                let session = (portal.to_string(), iqn.to_string());
                if !sessions.contains(&session) {
                    sessions.push(session);
                }
            }
            _ => {}
        }
    }
    sessions.sort();
    Ok(sessions)
}

/// Split `ip-{portal}-iscsi-{iqn}-lun-{lun}`
fn parse_link_name(name: &str) -> Option<(&str, &str, &str)> {
    let rest = name.strip_prefix("ip-")?;
    let (portal, rest) = rest.split_once("-iscsi-")?;
    let (iqn, lun) = rest.rsplit_once("-lun-")?;
    if portal.is_empty() || iqn.is_empty() || lun.contains('-') {
        return None;
    }
    Some((portal, iqn, lun))
}

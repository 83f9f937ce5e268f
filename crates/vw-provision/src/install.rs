//! Package installation per OS family and protocol variant

use std::time::Duration;

use vw_core::config::RetryConfig;
use vw_core::{CommandError, CommandOutput, OsClass, Protocol, ProvisionError, RemoteCommand, RemoteExec};

const APT: &str = "DEBIAN_FRONTEND=noninteractive apt-get";
/// apt with a two minute wait on the dpkg frontend lock
const APT_WAIT: &str = "DEBIAN_FRONTEND=noninteractive apt-get -o DPkg::Lock::Timeout=120";

const AMNEZIA_PPA: &str = "ppa:amnezia/ppa";
const AMNEZIA_KEY: &str = "57290828";
const AMNEZIA_SOURCE: &str = "deb https://ppa.launchpadcontent.net/amnezia/ppa/ubuntu focal main";

/// Pause after clearing stale package-manager locks
const LOCK_RELEASE_SETTLE: Duration = Duration::from_secs(2);

/// Failure text of a DKMS or initramfs build that left the package half-configured
const MODULE_BUILD_MARKERS: &[&str] = &["mkinitrd", "initramfs", "dkms", "exit status"];

/// Installs tunnel tooling on the remote host
pub struct Installer<'a, R: ?Sized> {
    exec: &'a R,
    retry: &'a RetryConfig,
}

impl<'a, R: RemoteExec + ?Sized> Installer<'a, R> {
    pub fn new(exec: &'a R, retry: &'a RetryConfig) -> Self {
        Self { exec, retry }
    }

    /// Install the tooling for `protocol` on a host of class `os`
    ///
    /// Safe to repeat: the obfuscated path probes for an existing install
    /// first and package managers treat installed packages as a no-op.
    pub async fn install(&self, protocol: Protocol, os: &OsClass) -> Result<(), ProvisionError> {
        match protocol {
            Protocol::WireGuard => self.install_wireguard(os).await,
            Protocol::AmneziaWg => self.install_amneziawg(os).await,
        }
    }

    async fn install_wireguard(&self, os: &OsClass) -> Result<(), ProvisionError> {
        match os {
            OsClass::Debian => {
                tracing::info!("Installing WireGuard");
                self.apt(&format!("{} update -y", APT)).await?;
                self.apt(&format!(
                    "{} install -y wireguard qrencode iptables curl",
                    APT
                ))
                .await?;
                self.best_effort(&format!("{} install -y iptables-persistent", APT))
                    .await?;
                Ok(())
            }
            OsClass::Rhel => {
                tracing::info!("Installing WireGuard");
                let pm = self.package_manager().await?;
                self.best_effort(&format!("{} install -y epel-release", pm))
                    .await?;
                self.required(&format!(
                    "{} install -y wireguard-tools qrencode iptables curl",
                    pm
                ))
                .await?;
                Ok(())
            }
            OsClass::Unsupported(id) => Err(ProvisionError::UnsupportedDistro(id.clone())),
        }
    }

    async fn install_amneziawg(&self, os: &OsClass) -> Result<(), ProvisionError> {
        if self.has_awg().await? {
            tracing::info!("AmneziaWG already installed, skipping");
            self.best_effort("modprobe amneziawg").await?;
            return Ok(());
        }

        match os {
            OsClass::Debian => self.install_amneziawg_debian().await,
            OsClass::Rhel => {
                tracing::info!("Installing AmneziaWG");
                let pm = self.package_manager().await?;
                self.best_effort(&format!("{} copr enable -y amneziavpn/amneziawg", pm))
                    .await?;
                self.required(&format!(
                    "{} install -y amneziawg-dkms amneziawg-tools qrencode curl",
                    pm
                ))
                .await?;
                Ok(())
            }
            OsClass::Unsupported(id) => Err(ProvisionError::UnsupportedDistro(id.clone())),
        }
    }

    async fn install_amneziawg_debian(&self) -> Result<(), ProvisionError> {
        if self.package_manager_busy().await? {
            self.release_apt_locks().await?;
        }

        tracing::info!("Updating packages");
        self.apt(&format!("{} update -y", APT_WAIT)).await?;

        tracing::info!("Installing prerequisites");
        self.apt(&format!(
            "{} install -y software-properties-common gnupg2 curl qrencode iptables",
            APT_WAIT
        ))
        .await?;

        let headers = format!("{} install -y linux-headers-$(uname -r)", APT_WAIT);
        if let Err(e) = self.apt(&headers).await {
            tracing::warn!("Kernel header install failed ({}), reclaiming /boot and retrying", first_line(&e));
            self.clean_boot_partition().await?;
            self.apt(&headers).await?;
        }

        tracing::info!("Adding AmneziaWG repository");
        let add_repo = format!(
            "add-apt-repository -y {ppa} || (apt-key adv --keyserver keyserver.ubuntu.com --recv-keys {key} && echo '{source}' >> /etc/apt/sources.list)",
            ppa = AMNEZIA_PPA,
            key = AMNEZIA_KEY,
            source = AMNEZIA_SOURCE,
        );
        self.best_effort(&add_repo).await?;
        self.apt(&format!("{} update -y", APT_WAIT)).await?;

        tracing::info!("Installing AmneziaWG");
        match self.apt(&format!("{} install -y amneziawg", APT_WAIT)).await {
            Ok(_) => Ok(()),
            Err(e) if is_module_build_failure(&e) => {
                tracing::warn!("Module build failed, loading the module directly");
                self.best_effort("dpkg --configure -a --force-confdef").await?;
                self.best_effort("modprobe amneziawg").await?;
                if self.has_awg().await? {
                    Ok(())
                } else {
                    Err(ProvisionError::ToolMissing(
                        "AmneziaWG tools not installed after module fallback".to_string(),
                    ))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run an apt command, retrying while another process holds the dpkg lock
    async fn apt(&self, command: &str) -> Result<CommandOutput, CommandError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .exec
                .execute(&RemoteCommand::shell(command).sudo())
                .await
            {
                Err(e) if e.is_lock_contention() && attempt < attempts => {
                    tracing::warn!(
                        "Package manager locked, retrying in {:?} ({}/{})",
                        self.retry.delay,
                        attempt,
                        attempts
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn required(&self, command: &str) -> Result<CommandOutput, CommandError> {
        self.exec
            .execute(&RemoteCommand::shell(command).sudo())
            .await
    }

    async fn best_effort(&self, command: &str) -> Result<(), CommandError> {
        let output = self
            .exec
            .execute(&RemoteCommand::shell(command).sudo().allow_failure())
            .await?;
        if !output.succeeded() {
            tracing::warn!("Ignoring failure of '{}': {}", command, output.text());
        }
        Ok(())
    }

    async fn package_manager(&self) -> Result<String, CommandError> {
        let pm = self
            .exec
            .run(RemoteCommand::shell("command -v dnf >/dev/null && echo dnf || echo yum").allow_failure())
            .await?;
        Ok(if pm == "dnf" { pm } else { "yum".to_string() })
    }

    async fn has_awg(&self) -> Result<bool, CommandError> {
        let probe = self
            .exec
            .run(RemoteCommand::shell("command -v awg >/dev/null 2>&1 && echo installed || echo missing").allow_failure())
            .await?;
        Ok(probe == "installed")
    }

    async fn package_manager_busy(&self) -> Result<bool, CommandError> {
        let state = self
            .exec
            .run(
                RemoteCommand::shell(
                    "pgrep -x 'apt|apt-get|dpkg|unattended-upgr' >/dev/null && echo busy || echo idle",
                )
                .allow_failure(),
            )
            .await?;
        Ok(state == "busy")
    }

    /// Stop apt timers, kill blocking processes and clear stale lock files
    async fn release_apt_locks(&self) -> Result<(), CommandError> {
        tracing::info!("Releasing package manager locks");
        self.best_effort(
            "systemctl stop unattended-upgrades apt-daily.timer apt-daily-upgrade.timer 2>/dev/null || true; \
             killall -9 unattended-upgrade apt apt-get dpkg 2>/dev/null || true; \
             rm -f /var/lib/apt/lists/lock /var/cache/apt/archives/lock /var/lib/dpkg/lock* 2>/dev/null || true; \
             dpkg --configure -a 2>/dev/null || true",
        )
        .await?;
        tokio::time::sleep(LOCK_RELEASE_SETTLE).await;
        Ok(())
    }

    /// Purge kernels other than the running one to free /boot
    async fn clean_boot_partition(&self) -> Result<(), CommandError> {
        tracing::info!("Removing old kernels to free /boot");
        self.best_effort(
            "current=$(uname -r); \
             dpkg -l 'linux-image-[0-9]*' | awk '/^ii/{print $2}' | grep -v \"$current\" | \
             xargs -r apt-get -y purge",
        )
        .await?;
        self.best_effort(&format!("{} autoremove -y", APT)).await?;
        self.best_effort("apt-get clean").await?;
        Ok(())
    }
}

fn is_module_build_failure(err: &CommandError) -> bool {
    let text = err.output_text().to_lowercase();
    MODULE_BUILD_MARKERS.iter().any(|marker| text.contains(marker))
}

fn first_line(err: &CommandError) -> String {
    err.to_string().lines().next().unwrap_or_default().to_string()
}

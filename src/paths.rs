use std::path::PathBuf;

/// Location of the timesync clock file, relative to a system root.
pub const TIMESYNC_CLOCK: &str = "var/lib/systemd/timesync/clock";

/// Filesystem layout of one install: the mount roots the orchestrator
/// has prepared, plus accessors for every path this crate reads or
/// persists under them. Passed explicitly into each pipeline step; there
/// is no process-global root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallDirs {
    /// Root of the currently running installer system, normally `/`.
    pub host_root: PathBuf,
    /// Mounted seed partition.
    pub seed_root: PathBuf,
    /// Mounted boot partition.
    pub boot_root: PathBuf,
    /// Writable target system tree on the data partition.
    pub data_root: PathBuf,
    /// Mounted save partition.
    pub save_root: PathBuf,
}

impl InstallDirs {
    pub fn new(
        host_root: impl Into<PathBuf>,
        seed_root: impl Into<PathBuf>,
        boot_root: impl Into<PathBuf>,
        data_root: impl Into<PathBuf>,
        save_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host_root: host_root.into(),
            seed_root: seed_root.into(),
            boot_root: boot_root.into(),
            data_root: data_root.into(),
            save_root: save_root.into(),
        }
    }

    /// Conventional layout with all install partitions mounted under
    /// `<host>/run/mnt`.
    pub fn under_run_mnt(host_root: impl Into<PathBuf>) -> Self {
        let host_root = host_root.into();
        let mnt = host_root.join("run/mnt");
        Self {
            seed_root: mnt.join("seed"),
            boot_root: mnt.join("boot"),
            data_root: mnt.join("data"),
            save_root: mnt.join("save"),
            host_root,
        }
    }

    /// Install-host directory holding per-role key files and the FDE
    /// marker.
    pub fn data_fde_dir(&self) -> PathBuf {
        self.data_root.join("var/lib/snapd/device/fde")
    }

    /// Save-partition-local FDE directory holding the marker copy.
    pub fn save_fde_dir(&self) -> PathBuf {
        self.save_root.join("device/fde")
    }

    pub fn boot_device_dir(&self) -> PathBuf {
        self.boot_root.join("device")
    }

    pub fn model_record_path(&self) -> PathBuf {
        self.boot_device_dir().join("model")
    }

    /// Content-addressed cache of trusted bootloader assets, referenced
    /// later by measured-boot sealing.
    pub fn boot_assets_cache_dir(&self) -> PathBuf {
        self.data_root.join("var/lib/snapd/boot-assets")
    }

    /// Marker file forcing an unencrypted install on dangerous models.
    pub fn force_unencrypted_marker(&self) -> PathBuf {
        self.seed_root.join(".force-unencrypted")
    }

    /// Cloud-init config directory shipped on the seed partition.
    pub fn seed_cloud_config_dir(&self) -> PathBuf {
        self.seed_root.join("data/etc/cloud/cloud.cfg.d")
    }

    pub fn writable_defaults_dir(&self) -> PathBuf {
        self.data_root.join("_writable_defaults")
    }

    pub fn host_timesync_clock(&self) -> PathBuf {
        self.host_root.join(TIMESYNC_CLOCK)
    }

    pub fn data_timesync_clock(&self) -> PathBuf {
        self.data_root.join(TIMESYNC_CLOCK)
    }
}

//! Storage layout planning
//!
//! Translates a resolved target disk and the deployment configuration into
//! the concrete partition table, BTRFS subvolumes and ordered mount plan the
//! disk phases execute.
//!
//! # Layout
//!
//! | # | Partition | Size | Contents |
//! |---|-----------|------|----------|
//! | 1 | ESP       | 1 GiB | FAT32, mounted at `/boot` |
//! | 2 | root      | operator choice (>= 50 GiB) | LUKS2 → BTRFS `@`, `@var`, `@varcache`, `@snapshots`, `@log` |
//! | 3 | home      | rest of disk (>= 20 GiB) | LUKS2 → BTRFS `@home` |
//!
//! Everything here is pure: no I/O, only plans.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::config::DeploymentConfig;
use crate::validation::EFI_SIZE_GB;

/// Mount options shared by every BTRFS subvolume mount.
pub const BTRFS_BASE_OPTIONS: &str = "compress=zstd,noatime,space_cache=v2";

/// First usable MiB on the disk (GPT + alignment).
const FIRST_MIB: u64 = 1;

/// The resolved target disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLayout {
    pub device: PathBuf,
    pub efi_partition: PathBuf,
    pub root_partition: PathBuf,
    pub home_partition: PathBuf,
    pub available_gb: u64,
    pub root_gb: u64,
    pub home_gb: u64,
}

impl DiskLayout {
    /// Derive partition paths for `device` from the naming convention.
    pub fn new(device: impl Into<PathBuf>, available_gb: u64, root_gb: u64, home_gb: u64) -> Self {
        let device = device.into();
        Self {
            efi_partition: partition_path(&device, 1),
            root_partition: partition_path(&device, 2),
            home_partition: partition_path(&device, 3),
            device,
            available_gb,
            root_gb,
            home_gb,
        }
    }

    pub fn partitions(&self) -> [&Path; 3] {
        [
            &self.efi_partition,
            &self.root_partition,
            &self.home_partition,
        ]
    }

    /// The `parted mkpart` plan for this disk.
    pub fn partition_plan(&self) -> Vec<PartitionSpec> {
        let efi_end = FIRST_MIB + EFI_SIZE_GB * 1024;
        let root_end = efi_end + self.root_gb * 1024;
        vec![
            PartitionSpec {
                number: 1,
                name: "ESP",
                fs_type: "fat32",
                start_mib: FIRST_MIB,
                end: PartitionEnd::Mib(efi_end),
                type_code: "ef00",
            },
            PartitionSpec {
                number: 2,
                name: "cryptroot",
                fs_type: "btrfs",
                start_mib: efi_end,
                end: PartitionEnd::Mib(root_end),
                type_code: "8309",
            },
            PartitionSpec {
                number: 3,
                name: "crypthome",
                fs_type: "btrfs",
                start_mib: root_end,
                end: PartitionEnd::Rest,
                type_code: "8309",
            },
        ]
    }
}

/// Where a partition ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionEnd {
    Mib(u64),
    /// Up to the end of the disk
    Rest,
}

impl std::fmt::Display for PartitionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mib(mib) => write!(f, "{}MiB", mib),
            Self::Rest => write!(f, "100%"),
        }
    }
}

/// One GPT partition to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub number: u32,
    pub name: &'static str,
    pub fs_type: &'static str,
    pub start_mib: u64,
    pub end: PartitionEnd,
    /// sgdisk type code
    pub type_code: &'static str,
}

/// Generate a partition device path from a disk path and partition number.
///
/// Devices whose name ends in a digit (NVMe, MMC, loop) use a `p` separator:
/// `/dev/nvme0n1` → `/dev/nvme0n1p1`, `/dev/sda` → `/dev/sda1`.
pub fn partition_path(disk: &Path, number: u32) -> PathBuf {
    let disk_str = disk.display().to_string();
    if disk_str.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", disk_str, number))
    } else {
        PathBuf::from(format!("{}{}", disk_str, number))
    }
}

/// Which encrypted filesystem a subvolume lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volume {
    Root,
    Home,
}

/// BTRFS subvolumes, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Subvolume {
    #[strum(serialize = "@")]
    Root,
    #[strum(serialize = "@var")]
    Var,
    #[strum(serialize = "@varcache")]
    VarCache,
    #[strum(serialize = "@log")]
    Log,
    #[strum(serialize = "@snapshots")]
    Snapshots,
    #[strum(serialize = "@home")]
    Home,
}

impl Subvolume {
    pub fn volume(self) -> Volume {
        match self {
            Self::Home => Volume::Home,
            _ => Volume::Root,
        }
    }

    /// Mountpoint relative to the target root.
    pub fn mountpoint(self) -> &'static str {
        match self {
            Self::Root => "",
            Self::Var => "var",
            Self::VarCache => "var/cache",
            Self::Log => "var/log",
            Self::Snapshots => ".snapshots",
            Self::Home => "home",
        }
    }

    /// Hardening flags added to the BTRFS base options.
    pub fn hardening(self) -> &'static [&'static str] {
        match self {
            Self::Root => &[],
            Self::Var | Self::Home => &["nodev", "nosuid"],
            Self::VarCache | Self::Log | Self::Snapshots => &["nodev", "nosuid", "noexec"],
        }
    }

    /// Full `-o` option string for this subvolume.
    pub fn mount_options(self) -> String {
        let mut options = vec![BTRFS_BASE_OPTIONS.to_string(), format!("subvol={}", self)];
        options.extend(self.hardening().iter().map(|s| s.to_string()));
        options.join(",")
    }

    /// Subvolumes the configuration asks for.
    pub fn selected(config: &DeploymentConfig) -> Vec<Self> {
        Self::iter()
            .filter(|s| *s != Self::Log || config.log_subvolume)
            .collect()
    }
}

/// What gets mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    Subvolume(Subvolume),
    Efi,
}

/// A mount in the target tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: MountSource,
    pub device: PathBuf,
    pub target: PathBuf,
    pub fs_type: &'static str,
    pub options: String,
}

/// EFI mount options.
pub const EFI_MOUNT_OPTIONS: &str = "umask=0077,nodev,nosuid,noexec";

/// Ordered mount plan: parents before children, so unmounting runs it in
/// reverse.
pub fn mount_plan(
    config: &DeploymentConfig,
    layout: &DiskLayout,
    target_root: &Path,
) -> Vec<MountSpec> {
    let root_mapper = mapper_path(&config.root_mapper);
    let home_mapper = mapper_path(&config.home_mapper);

    let mut subvolumes = Subvolume::selected(config);
    // "var" must be mounted before "var/cache" and "var/log"
    subvolumes.sort_by_key(|s| s.mountpoint().matches('/').count() + usize::from(*s != Subvolume::Root));

    let mut plan: Vec<MountSpec> = subvolumes
        .into_iter()
        .map(|sv| MountSpec {
            source: MountSource::Subvolume(sv),
            device: match sv.volume() {
                Volume::Root => root_mapper.clone(),
                Volume::Home => home_mapper.clone(),
            },
            target: join_target(target_root, sv.mountpoint()),
            fs_type: "btrfs",
            options: sv.mount_options(),
        })
        .collect();

    plan.push(MountSpec {
        source: MountSource::Efi,
        device: layout.efi_partition.clone(),
        target: join_target(target_root, "boot"),
        fs_type: "vfat",
        options: EFI_MOUNT_OPTIONS.to_string(),
    });
    plan
}

/// `/dev/mapper/<name>`
pub fn mapper_path(name: &str) -> PathBuf {
    Path::new("/dev/mapper").join(name)
}

/// Join a relative path onto the target root; "" is the root itself.
pub fn join_target(target_root: &Path, relative: &str) -> PathBuf {
    if relative.is_empty() {
        target_root.to_path_buf()
    } else {
        target_root.join(relative)
    }
}

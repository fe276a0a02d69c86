//! Input validators.
//!
//! Pure predicates over operator input. Callers reprompt on failure, so every
//! error carries a message fit to show the operator directly.

use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use thiserror::Error;

const GIB: u64 = 1024 * 1024 * 1024;

/// EFI system partition size in GB.
pub const EFI_SIZE_GB: u64 = 1;
/// Smallest root partition accepted, in GB.
pub const MIN_ROOT_GB: u64 = 50;
/// Smallest home partition accepted, in GB.
pub const MIN_HOME_GB: u64 = 20;
/// Smallest target disk accepted, in GB (EFI + root + home minimums).
pub const MIN_DISK_GB: u64 = EFI_SIZE_GB + MIN_ROOT_GB + MIN_HOME_GB;

/// Why an input was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} '{value}' may only contain {allowed}")]
    InvalidCharacters {
        field: &'static str,
        value: String,
        allowed: &'static str,
    },

    #[error("{field} is too long ({len} > {max} characters)")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{0} is not a block device")]
    NotBlockDevice(String),

    #[error("{device} is mounted at {mountpoint}")]
    Mounted { device: String, mountpoint: String },

    #[error(
        "Insufficient disk space: {available_gb}GB available, {required_gb}GB required ({shortfall_gb}GB short)"
    )]
    InsufficientSpace {
        available_gb: u64,
        required_gb: u64,
        shortfall_gb: u64,
    },

    #[error("Root partition must be at least 50GB (got {0}GB)")]
    RootTooSmall(u64),

    #[error("Root size {root_gb}GB leaves {home_gb}GB for home; home needs at least 20GB")]
    HomeTooSmall { root_gb: u64, home_gb: u64 },

    #[error("Root size {root_gb}GB does not fit on a {available_gb}GB disk")]
    RootTooLarge { root_gb: u64, available_gb: u64 },

    #[error("'{0}' is not a valid size in GB")]
    NotANumber(String),

    #[error("Timezone '{0}' is not a zoneinfo name")]
    InvalidTimezone(String),
}

fn check_charset(
    field: &'static str,
    value: &str,
    max: usize,
    allow_underscore: bool,
) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    let ok = value.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '-' || (allow_underscore && c == '_')
    });
    if !ok {
        return Err(ValidationError::InvalidCharacters {
            field,
            value: value.to_string(),
            allowed: if allow_underscore {
                "letters, digits, '-' and '_'"
            } else {
                "letters, digits and '-'"
            },
        });
    }
    if value.len() > max {
        return Err(ValidationError::TooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

/// `^[A-Za-z0-9-]+$`, at most 63 characters.
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    check_charset("Hostname", hostname, 63, false)
}

/// `^[A-Za-z0-9_-]+$`, at most 32 characters.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    check_charset("Username", username, 32, true)
}

/// `^[A-Za-z0-9_-]+$`; used for LUKS mapper names.
pub fn validate_volume_name(name: &str) -> Result<(), ValidationError> {
    check_charset("Volume name", name, 64, true)
}

/// Console keymap name such as `us` or `de-latin1`.
pub fn validate_keymap(keymap: &str) -> Result<(), ValidationError> {
    check_charset("Keymap", keymap, 64, true)
}

/// Zoneinfo-style name such as `Europe/Berlin` or `UTC`.
pub fn validate_timezone(tz: &str) -> Result<(), ValidationError> {
    if tz.is_empty() {
        return Err(ValidationError::Empty { field: "Timezone" });
    }
    let ok = !tz.starts_with('/')
        && tz.split('/').all(|part| !part.is_empty() && part != ".." && part != ".")
        && tz
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+'));
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidTimezone(tz.to_string()))
    }
}

/// Every mountpoint of `device` or any of its partitions in a
/// `/proc/mounts`-formatted table, in table order.
pub fn device_mounts(device: &str, mount_table: &str) -> Vec<String> {
    mount_table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let rest = source.strip_prefix(device)?;
            // "/dev/sda" must match "/dev/sda2" and "/dev/nvme0n1p2" but not "/dev/sdab"
            let is_partition = rest.is_empty()
                || rest.chars().all(|c| c.is_ascii_digit())
                || rest
                    .strip_prefix('p')
                    .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
            is_partition.then(|| target.replace("\\040", " "))
        })
        .collect()
}

/// First mountpoint of `device` or any of its partitions.
pub fn find_mount(device: &str, mount_table: &str) -> Option<String> {
    device_mounts(device, mount_table).into_iter().next()
}

/// The path must be a block device that is not currently mounted.
pub fn validate_block_device(path: &Path, mount_table: &str) -> Result<(), ValidationError> {
    let is_block = std::fs::metadata(path)
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false);
    validate_device_state(path, is_block, mount_table)
}

/// [`validate_block_device`] with the block-device check already done.
pub fn validate_device_state(
    path: &Path,
    is_block_device: bool,
    mount_table: &str,
) -> Result<(), ValidationError> {
    let display = path.display().to_string();
    if !is_block_device {
        return Err(ValidationError::NotBlockDevice(display));
    }
    if let Some(mountpoint) = find_mount(&display, mount_table) {
        return Err(ValidationError::Mounted {
            device: display,
            mountpoint,
        });
    }
    Ok(())
}

/// Returns the available space in whole GB when the device holds at least
/// `MIN_DISK_GB` GiB.
pub fn check_disk_space(device_bytes: u64) -> Result<u64, ValidationError> {
    let required_bytes = MIN_DISK_GB * GIB;
    let available_gb = device_bytes / GIB;
    if device_bytes < required_bytes {
        let shortfall = required_bytes - device_bytes;
        return Err(ValidationError::InsufficientSpace {
            available_gb,
            required_gb: MIN_DISK_GB,
            shortfall_gb: shortfall.div_ceil(GIB),
        });
    }
    Ok(available_gb)
}

/// Computed root/home split for a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSizes {
    pub root_gb: u64,
    pub home_gb: u64,
}

/// Split `available_gb` into EFI (1GB), root and home.
pub fn compute_partition_sizes(
    available_gb: u64,
    root_gb: u64,
) -> Result<PartitionSizes, ValidationError> {
    if root_gb < MIN_ROOT_GB {
        return Err(ValidationError::RootTooSmall(root_gb));
    }
    let home_gb = available_gb
        .checked_sub(EFI_SIZE_GB)
        .and_then(|rest| rest.checked_sub(root_gb))
        .ok_or(ValidationError::RootTooLarge {
            root_gb,
            available_gb,
        })?;
    if home_gb < MIN_HOME_GB {
        return Err(ValidationError::HomeTooSmall { root_gb, home_gb });
    }
    Ok(PartitionSizes { root_gb, home_gb })
}

/// Parse a size typed by the operator ("60", "60G", "60GB").
pub fn parse_size_gb(input: &str) -> Result<u64, ValidationError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_suffix("GB")
        .or_else(|| trimmed.strip_suffix("gb"))
        .or_else(|| trimmed.strip_suffix('G'))
        .or_else(|| trimmed.strip_suffix('g'))
        .unwrap_or(trimmed);
    digits
        .trim()
        .parse()
        .map_err(|_| ValidationError::NotANumber(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_accepts_dashes_and_digits() {
        assert!(validate_hostname("arch-box-01").is_ok());
        assert!(validate_hostname("A").is_ok());
    }

    #[test]
    fn test_hostname_rejections() {
        for bad in ["", "arch.box", "arch_box", "arch box", "ärch", "host\n"] {
            assert!(validate_hostname(bad).is_err(), "{:?} should be rejected", bad);
        }
        assert!(matches!(
            validate_hostname(&"a".repeat(64)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_username_and_volume_allow_underscore() {
        assert!(validate_username("dev_user-1").is_ok());
        assert!(validate_volume_name("crypt_root").is_ok());
        assert!(validate_username("root user").is_err());
        assert!(validate_volume_name("crypt/root").is_err());
        assert!(validate_volume_name("").is_err());
    }

    #[test]
    fn test_timezone() {
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("America/Argentina/Buenos_Aires").is_ok());
        assert!(validate_timezone("Etc/GMT+3").is_ok());
        assert!(validate_timezone("../etc/passwd").is_err());
        assert!(validate_timezone("/UTC").is_err());
        assert!(validate_timezone("").is_err());
    }

    #[test]
    fn test_find_mount_matches_partitions_only() {
        let table = "\
/dev/sda2 / ext4 rw 0 0
/dev/nvme0n1p1 /boot vfat rw 0 0
/dev/sdab1 /data\\040disk xfs rw 0 0
";
        assert_eq!(find_mount("/dev/sda", table), Some("/".to_string()));
        assert_eq!(find_mount("/dev/nvme0n1", table), Some("/boot".to_string()));
        assert_eq!(find_mount("/dev/sdab", table), Some("/data disk".to_string()));
        assert_eq!(find_mount("/dev/sdb", table), None);
        assert_eq!(find_mount("/dev/nvme0n", table), None);
    }

    #[test]
    fn test_device_mounts_lists_all_partitions() {
        let table = "\
/dev/sdb2 /mnt btrfs rw 0 0
/dev/sdb1 /mnt/boot vfat rw 0 0
/dev/sda1 / ext4 rw 0 0
";
        assert_eq!(device_mounts("/dev/sdb", table), vec!["/mnt", "/mnt/boot"]);
        assert!(device_mounts("/dev/sdc", table).is_empty());
    }

    #[test]
    fn test_validate_device_state() {
        let table = "/dev/sda2 / ext4 rw 0 0\n";
        assert!(validate_device_state(Path::new("/dev/sdb"), true, table).is_ok());
        assert!(matches!(
            validate_device_state(Path::new("/dev/sda"), true, table),
            Err(ValidationError::Mounted { .. })
        ));
        assert!(matches!(
            validate_device_state(Path::new("/dev/sdb"), false, table),
            Err(ValidationError::NotBlockDevice(_))
        ));
    }

    #[test]
    fn test_validate_block_device_rejects_regular_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            validate_block_device(file.path(), ""),
            Err(ValidationError::NotBlockDevice(_))
        ));
        assert!(validate_block_device(Path::new("/dev/does-not-exist-42"), "").is_err());
    }

    #[test]
    fn test_check_disk_space_threshold() {
        let threshold = 71 * GIB;
        assert_eq!(check_disk_space(threshold), Ok(71));
        assert_eq!(check_disk_space(200 * GIB + 12345), Ok(200));

        let err = check_disk_space(threshold - 1).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InsufficientSpace {
                available_gb: 70,
                required_gb: 71,
                shortfall_gb: 1,
            }
        );
        assert!(err.to_string().contains("1GB short"));

        let err = check_disk_space(32 * GIB).unwrap_err();
        assert!(err.to_string().contains("39GB short"));
    }

    #[test]
    fn test_partition_sizes() {
        assert_eq!(
            compute_partition_sizes(200, 50),
            Ok(PartitionSizes {
                root_gb: 50,
                home_gb: 149
            })
        );
        assert_eq!(
            compute_partition_sizes(200, 49),
            Err(ValidationError::RootTooSmall(49))
        );
        // 200 - 1 - 180 = 19 < 20
        assert!(matches!(
            compute_partition_sizes(200, 180),
            Err(ValidationError::HomeTooSmall { home_gb: 19, .. })
        ));
        assert_eq!(compute_partition_sizes(71, 50).unwrap().home_gb, 20);
        // Root larger than the disk
        assert_eq!(
            compute_partition_sizes(100, 500),
            Err(ValidationError::RootTooLarge {
                root_gb: 500,
                available_gb: 100
            })
        );
        // Exactly the disk minus the EFI partition leaves no home at all
        assert!(matches!(
            compute_partition_sizes(100, 99),
            Err(ValidationError::HomeTooSmall { home_gb: 0, .. })
        ));
    }

    #[test]
    fn test_partition_sizes_reject_huge_root() {
        let huge = parse_size_gb("18446744073709551615").unwrap();
        assert!(matches!(
            compute_partition_sizes(200, huge),
            Err(ValidationError::RootTooLarge { .. })
        ));
        assert!(matches!(
            compute_partition_sizes(200, 1 << 63),
            Err(ValidationError::RootTooLarge { .. })
        ));
    }

    #[test]
    fn test_keymap_errors_name_the_keymap() {
        assert!(validate_keymap("de-latin1").is_ok());
        let err = validate_keymap("us intl").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCharacters { field: "Keymap", .. }));
        assert!(err.to_string().starts_with("Keymap 'us intl'"));
    }

    #[test]
    fn test_parse_size_gb() {
        assert_eq!(parse_size_gb("60"), Ok(60));
        assert_eq!(parse_size_gb(" 75GB "), Ok(75));
        assert_eq!(parse_size_gb("80G"), Ok(80));
        assert!(parse_size_gb("sixty").is_err());
        assert!(parse_size_gb("-5").is_err());
    }
}

//! Pre-flight checks for radar
//!
//! Validates system requirements before attempting to load the probe.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use std::path::Path;

use object::Object;

use crate::config::SensorConfig;
use crate::domain::SensorError;

/// Minimum kernel version: tracepoint programs writing to perf event arrays
const MIN_KERNEL_VERSION: (u32, u32) = (4, 7);

/// Run all pre-flight checks before touching the kernel
///
/// # Errors
/// Returns [`SensorError::Permission`] when not running as root and
/// [`SensorError::Load`] for an old kernel or an unusable probe artifact
pub fn run_preflight_checks(config: &SensorConfig) -> Result<(), SensorError> {
    check_privileges()?;
    check_kernel_version(&config.object_path)?;
    check_probe_artifact(config)?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<(), SensorError> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // CAP_BPF + CAP_PERFMON would be enough on 5.8+, but checking
    // capabilities needs extra dependencies, so require root
    Err(SensorError::Permission {
        action: "running pre-flight checks",
        reason: "radar requires root privileges to load eBPF programs.\n\n\
                 Run with: sudo radar ..."
            .to_string(),
    })
}

/// Parse `major.minor` out of a release string like "6.1.0-arch1-1"
pub fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

fn check_kernel_version(object_path: &Path) -> Result<(), SensorError> {
    let Ok(version_str) = std::fs::read_to_string("/proc/version") else {
        // Can't tell, let the loader find out
        return Ok(());
    };

    // "Linux version 5.15.0-generic ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some((major, minor)) = parse_kernel_release(release) else {
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        return Err(SensorError::Load {
            path: object_path.to_path_buf(),
            reason: format!(
                "Kernel version {major}.{minor} is too old.\n\n\
                 radar requires Linux {}.{} or newer for tracepoint perf output.\n\
                 Current kernel: {release}",
                MIN_KERNEL_VERSION.0, MIN_KERNEL_VERSION.1
            ),
        });
    }

    Ok(())
}

/// Check that the probe artifact exists and carries the attach target
pub fn check_probe_artifact(config: &SensorConfig) -> Result<(), SensorError> {
    let path = &config.object_path;
    let load_error = |reason: String| SensorError::Load { path: path.clone(), reason };

    if !path.exists() {
        return Err(load_error(
            "probe object not found.\n\n\
             Build the probe or point --object at the compiled radar.o"
                .to_string(),
        ));
    }
    if !path.is_file() {
        return Err(load_error("not a file; --object must point to a compiled probe".to_string()));
    }

    let data = std::fs::read(path).map_err(|e| load_error(e.to_string()))?;
    let obj = object::File::parse(&*data)
        .map_err(|e| load_error(format!("not a valid ELF object: {e}")))?;

    let section = config.attach.section_name();
    if obj.section_by_name(&section).is_none() {
        return Err(load_error(format!("no {section} section in probe object")));
    }
    if obj.section_by_name(".maps").is_none() && obj.section_by_name("maps").is_none() {
        return Err(load_error("probe object defines no maps".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("5.15.0-generic"), Some((5, 15)));
        assert_eq!(parse_kernel_release("6.1.0-arch1-1"), Some((6, 1)));
        assert_eq!(parse_kernel_release("4.19-rc1"), Some((4, 19)));
        assert_eq!(parse_kernel_release("unknown"), None);
    }

    #[test]
    fn test_kernel_version_check_matches_running_kernel() {
        let Ok(version_str) = std::fs::read_to_string("/proc/version") else {
            return;
        };
        let release = version_str.split_whitespace().nth(2).unwrap();
        let version = parse_kernel_release(release)
            .unwrap_or_else(|| panic!("unparsable kernel release {release:?}"));

        let result = check_kernel_version(Path::new("radar.o"));
        if version >= MIN_KERNEL_VERSION {
            assert!(result.is_ok(), "kernel {release} rejected: {result:?}");
        } else {
            assert!(matches!(result, Err(SensorError::Load { .. })));
        }
    }

    #[test]
    fn test_artifact_not_found() {
        let config = SensorConfig {
            object_path: "/nonexistent/path/to/radar.o".into(),
            ..SensorConfig::default()
        };
        let err = check_probe_artifact(&config).unwrap_err();
        assert!(matches!(err, SensorError::Load { .. }));
        assert!(err.to_string().contains("/nonexistent/path/to/radar.o"));
    }

    #[test]
    fn test_artifact_is_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = SensorConfig { object_path: dir.path().to_path_buf(), ..SensorConfig::default() };
        let err = check_probe_artifact(&config).unwrap_err();
        assert!(matches!(err, SensorError::Load { ref reason, .. } if reason.contains("not a file")));
    }

    #[test]
    fn test_artifact_not_elf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"#!/bin/sh\necho not a probe\n").unwrap();
        let config =
            SensorConfig { object_path: file.path().to_path_buf(), ..SensorConfig::default() };
        let err = check_probe_artifact(&config).unwrap_err();
        assert!(matches!(err, SensorError::Load { ref reason, .. } if reason.contains("ELF")));
    }
}
